//! Buffered reads of a file's remaining byte range.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Default read buffer size: 64 KB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Reads a file from a resume offset to its end in buffers, so the
/// driver can check for cancellation between reads.
pub struct FileSlice {
    file: tokio::fs::File,
    offset: u64,
    file_size: u64,
    buf_size: usize,
}

impl FileSlice {
    /// Opens `path` and seeks to `start`.
    ///
    /// If `buf_size` is 0, [`DEFAULT_BUFFER_SIZE`] is used.
    pub async fn open(path: &Path, start: u64, buf_size: usize) -> std::io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();
        file.seek(SeekFrom::Start(start)).await?;
        let buf_size = if buf_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buf_size
        };
        Ok(Self {
            file,
            offset: start,
            file_size,
            buf_size,
        })
    }

    /// Reads the next buffer. Returns `None` at the end of the file.
    pub async fn next_buf(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.buf_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        self.offset += n as u64;
        Ok(Some(buf))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}

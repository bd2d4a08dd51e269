//! Backing-object naming.
//!
//! The locator is the only place a `(sessionId, filename)` pair is
//! turned into a filesystem name, and both the mutate path (receiver)
//! and the query path (status oracle) go through it — the two can never
//! disagree about whether a session exists.
//!
//! The filename is attacker-controlled, so it is treated as opaque
//! bytes and hex-encoded rather than spliced into the path. Session ids
//! are restricted to the UUID charset before any storage access.

/// Returns the backing-object file name for a session.
///
/// Deterministic and collision-resistant: distinct `(sessionId,
/// filename)` pairs always map to distinct names, and no byte of the
/// filename reaches the filesystem verbatim.
pub fn backing_name(session_id: &str, filename: &str) -> String {
    format!("file-{session_id}-{}", hex::encode(filename.as_bytes()))
}

/// `true` if `id` is limited to the UUID charset (hex digits and `-`).
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_hexdigit() || b == b'-')
}

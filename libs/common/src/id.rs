use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let token = push_common::id::prefixed_ulid("cht");
/// assert!(token.starts_with("cht_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Returns true if `id` has the shape produced by [`prefixed_ulid`] for `prefix`.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    match id.split_once('_') {
        Some((p, rest)) => p == prefix && Ulid::from_string(rest).is_ok(),
        None => false,
    }
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Transport channel tokens handed to subscribers.
    pub const CHANNEL_TOKEN: &str = "cht";
    /// Individual socket connections attached to a channel token.
    pub const CONNECTION: &str = "conn";
}

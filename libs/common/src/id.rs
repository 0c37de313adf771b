use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = slate_common::id::prefixed_ulid("sess");
/// assert!(id.starts_with("sess_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// A live WebSocket session.
    pub const SESSION: &str = "sess";
    /// A gateway process instance.
    pub const GATEWAY: &str = "gw";
    /// A presence tracker process instance.
    pub const TRACKER: &str = "pt";
}

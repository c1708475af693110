use chrono::{DateTime, Utc};

/// Wall-clock source used for timestamps and TTL checks.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

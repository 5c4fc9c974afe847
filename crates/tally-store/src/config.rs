use serde::{Deserialize, Serialize};

/// Connection settings for [`SqliteLedgerStore`](crate::SqliteLedgerStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL, e.g. `sqlite://tally.db` or `sqlite::memory:`.
    pub url: String,
    /// Upper bound on pooled connections. Forced to 1 for in-memory
    /// databases, which exist per connection.
    pub max_connections: u32,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout_ms: u64,
    /// Create the database file on first connect.
    pub create_if_missing: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://tally.db".into(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
            create_if_missing: true,
        }
    }
}

impl DatabaseConfig {
    /// A private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            ..Self::default()
        }
    }

    /// Whether the URL names an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

//! Store configuration.

use crate::schema::Schema;
use std::time::Duration;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Sync the journal to stable storage on every commit (safer, slower).
    pub sync_on_commit: bool,

    /// Default bound on how long a save waits for the commit lock.
    /// `None` waits indefinitely.
    pub save_timeout: Option<Duration>,

    /// Entities the store holds.
    pub schema: Schema,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            save_timeout: None,
            schema: Schema::ledger(),
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the default save timeout.
    #[must_use]
    pub const fn save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = Some(timeout);
        self
    }

    /// Replaces the schema.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.save_timeout, None);
        assert!(config.schema.describe("Account").is_some());
        assert!(config.schema.describe("Transaction").is_some());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .save_timeout(Duration::from_millis(250))
            .schema(Schema::new());

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.save_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.schema.entities().count(), 0);
    }
}

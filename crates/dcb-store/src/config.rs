//! Store-level configuration and validation.

use std::path::PathBuf;

use dcb_types::ConfigError;

use crate::paths::is_valid_context_name;

/// Configuration for an [`crate::EventStore`].
///
/// Validated eagerly by [`StoreConfig::validate`]; `EventStore::open`
/// refuses to start with an invalid configuration, so configuration
/// mistakes surface at startup and never mid-append or mid-read.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Absolute filesystem path the store is rooted at.
    pub root_path: PathBuf,
    /// Context names to open (and create, if missing) on startup.
    pub contexts: Vec<String>,
    /// fsync event files (and the ledger) on every commit, vs letting
    /// the OS write back the page cache lazily.
    pub flush_events_immediately: bool,
    /// Set the read-only bit on event files after their final rename.
    pub write_protect_event_files: bool,
    /// Set the read-only bit on projection state files after write.
    pub write_protect_projection_files: bool,
    /// Allow concurrent event-file loads during query evaluation.
    pub parallel_read: bool,
}

impl StoreConfig {
    /// Builds a configuration with the durability-first defaults:
    /// fsync on every commit, no write-protection bits set.
    pub fn new(root_path: impl Into<PathBuf>, contexts: impl IntoIterator<Item = String>) -> Self {
        Self {
            root_path: root_path.into(),
            contexts: contexts.into_iter().collect(),
            flush_events_immediately: true,
            write_protect_event_files: false,
            write_protect_projection_files: false,
            parallel_read: false,
        }
    }

    /// Validates the configuration, returning the first violation
    /// found: root path not absolute, no contexts configured, or an
    /// invalid context name. Checked in that order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root_path.is_absolute() {
            return Err(ConfigError::RootPathNotAbsolute(
                self.root_path.display().to_string(),
            ));
        }
        if self.contexts.is_empty() {
            return Err(ConfigError::NoContexts);
        }
        for name in &self.contexts {
            if !is_valid_context_name(name) {
                return Err(ConfigError::InvalidContextName {
                    name: name.clone(),
                    reason: "empty, contains a filesystem-reserved character, or is an OS-reserved device name".to_string(),
                });
            }
        }
        Ok(())
    }
}

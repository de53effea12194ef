#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dcb-store** -- an embedded, file-backed event store implementing
//! Dynamic Consistency Boundaries: per-context ledger, event and index
//! files, optimistic-concurrency append, query resolution, and a
//! checkpointed projection engine.
//!
//! Everything in this crate is organized per *context*: an isolated
//! event log with its own ledger, `Events/` directory, secondary
//! indices, and projection registry. A context name maps directly to a
//! subdirectory under [`StoreConfig::root_path`].

mod append;
mod config;
mod decision;
mod events;
mod index;
mod ledger;
mod maintenance;
mod paths;
mod projection;
mod query_engine;
mod read;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use dcb_types::{AppendCondition, EventRecord, NewEvent, OpenError, Position, Query, StoreError, Tag};
use tokio::fs;
use tokio_util::sync::CancellationToken;

pub use append::AppendCoordinator;
pub use config::StoreConfig;
pub use decision::{execute_decision, Decision};
pub use maintenance::TagMigrationResult;
pub use paths::ContextPaths;
pub use projection::{CatchUpResult, Projection, ProjectionEngine, ProjectionStatus};
pub use read::{Direction, ReadEngine, ReadOptions};

/// Convenience re-export of the most commonly used types.
pub mod prelude {
    pub use crate::{ContextHandle, Decision, EventStore, Projection, ReadOptions, StoreConfig};
    pub use dcb_types::prelude::*;
}

/// One isolated event log, with its own ledger, event files, indices,
/// and projection registry.
pub struct ContextHandle {
    name: String,
    paths: ContextPaths,
    coordinator: AppendCoordinator,
    projections: ProjectionEngine,
}

impl ContextHandle {
    async fn open(root: &std::path::Path, name: &str, config: &StoreConfig) -> Result<Self, StoreError> {
        let paths = ContextPaths::new(root, name);
        fs::create_dir_all(paths.root()).await?;

        let event_store =
            events::EventFileStore::new(paths.clone(), config.flush_events_immediately, config.write_protect_event_files);
        let highest = event_store.scan_highest_position().await?;
        let ledger = ledger::Ledger::open(paths.ledger_file(), highest, config.flush_events_immediately).await?;
        let indices = index::IndexManager::new(paths.clone(), config.flush_events_immediately);
        let coordinator = AppendCoordinator::new(ledger, event_store, indices);
        let projections = ProjectionEngine::new(
            paths.clone(),
            config.flush_events_immediately,
            config.write_protect_projection_files,
        );

        Ok(Self {
            name: name.to_string(),
            paths,
            coordinator,
            projections,
        })
    }

    /// This context's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The durably-committed head position.
    pub fn head(&self) -> Position {
        self.coordinator.head()
    }

    /// Number of event files opened and read so far. Exposed for test
    /// harnesses asserting the `readLast` fast path's O(1) I/O bound;
    /// not meant for production monitoring.
    pub fn event_reads_performed(&self) -> usize {
        self.coordinator.events().reads_performed()
    }

    /// Registers a projection so it can be caught up or rebuilt.
    /// Intended to be called once at startup, before the handle is
    /// shared across concurrent callers.
    pub fn register_projection<P: Projection + 'static>(&mut self, projection: P) {
        self.projections.register(projection);
    }

    /// Commits `events` under the optional optimistic-concurrency
    /// `condition`, returning their assigned positions.
    pub async fn append(
        &self,
        events: Vec<NewEvent>,
        condition: Option<AppendCondition>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Position>, StoreError> {
        self.coordinator.append(events, condition, cancel).await
    }

    /// Reads every event matching `query` strictly after `after`,
    /// ordered and limited per `options`.
    pub async fn read(
        &self,
        query: &Query,
        after: Position,
        options: &ReadOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let engine = ReadEngine::new(self.coordinator.indices(), self.coordinator.events());
        engine.read_after(query, after, self.head(), options, cancel).await
    }

    /// Reads the most recent event matching `query`, if any.
    pub async fn read_last(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Option<EventRecord>, StoreError> {
        let engine = ReadEngine::new(self.coordinator.indices(), self.coordinator.events());
        engine.read_last(query, self.head(), cancel).await
    }

    /// Runs the bounded decision-retry loop against this context's
    /// `append`.
    pub async fn execute_decision<D, DFut>(
        &self,
        max_attempts: u32,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
        mut decide: D,
    ) -> Result<Vec<Position>, StoreError>
    where
        D: FnMut(u32) -> DFut,
        DFut: Future<Output = Result<Decision, StoreError>>,
    {
        execute_decision(max_attempts, deadline, cancel, &mut decide, |events, condition| {
            self.coordinator.append(events, condition, cancel)
        })
        .await
    }

    /// Catches up `name` to this context's current head.
    pub async fn catch_up_projection(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<CatchUpResult, StoreError> {
        let engine = ReadEngine::new(self.coordinator.indices(), self.coordinator.events());
        self.projections.catch_up(name, &engine, self.head(), cancel).await
    }

    /// Truncates and replays `name` from position zero.
    pub async fn rebuild_projection(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<CatchUpResult, StoreError> {
        let engine = ReadEngine::new(self.coordinator.indices(), self.coordinator.events());
        self.projections.rebuild(name, &engine, self.head(), cancel).await
    }

    /// Rebuilds every registered projection; see
    /// [`ProjectionEngine::rebuild_all`] for the `force_all` semantics.
    pub async fn rebuild_all_projections(
        &self,
        force_all: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, CatchUpResult)>, StoreError> {
        let engine = ReadEngine::new(self.coordinator.indices(), self.coordinator.events());
        self.projections.rebuild_all(force_all, &engine, self.head(), cancel).await
    }

    /// The checkpoint currently recorded for `name`.
    pub async fn projection_checkpoint(&self, name: &str) -> Result<Position, StoreError> {
        self.projections.get_checkpoint(name).await
    }

    /// Run status for every registered projection.
    pub async fn projection_status(&self) -> Result<Vec<ProjectionStatus>, StoreError> {
        self.projections.get_rebuild_status().await
    }

    /// Backfills `new_tags` onto every existing event of `event_type`.
    pub async fn add_tags(
        &self,
        event_type: &str,
        new_tags: &[Tag],
        cancel: &CancellationToken,
    ) -> Result<TagMigrationResult, StoreError> {
        maintenance::add_tags(
            &self.paths,
            self.coordinator.events(),
            self.coordinator.indices(),
            self.coordinator.ledger(),
            event_type,
            new_tags,
            cancel,
        )
        .await
    }
}

/// The top-level handle to a DCB event store: owns one [`ContextHandle`]
/// per configured context, recovered on [`EventStore::open`].
pub struct EventStore {
    config: StoreConfig,
    contexts: HashMap<String, ContextHandle>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("config", &self.config)
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventStore {
    /// Validates `config` and recovers every configured context's
    /// on-disk state.
    pub async fn open(config: StoreConfig) -> Result<Self, OpenError> {
        config.validate()?;

        let mut contexts = HashMap::with_capacity(config.contexts.len());
        for name in &config.contexts {
            let handle = ContextHandle::open(&config.root_path, name, &config).await?;
            contexts.insert(name.clone(), handle);
        }

        tracing::info!(
            contexts = config.contexts.len(),
            root = %config.root_path.display(),
            "event store opened"
        );

        Ok(Self { config, contexts })
    }

    /// This store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Borrows a configured context by name.
    pub fn context(&self, name: &str) -> Result<&ContextHandle, StoreError> {
        self.contexts
            .get(name)
            .ok_or_else(|| StoreError::NotFound(format!("context '{name}'")))
    }

    /// Mutably borrows a configured context by name, for registering
    /// projections at startup.
    pub fn context_mut(&mut self, name: &str) -> Result<&mut ContextHandle, StoreError> {
        self.contexts
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(format!("context '{name}'")))
    }

    /// Every configured context's name.
    pub fn context_names(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    /// Irreversibly wipes `name`'s event log, indices, ledger, and
    /// projection state, then reopens an empty context under the same
    /// name.
    pub async fn delete_context(&mut self, name: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        if !self.contexts.contains_key(name) {
            return Err(StoreError::NotFound(format!("context '{name}'")));
        }
        let paths = ContextPaths::new(&self.config.root_path, name);
        maintenance::delete_store(&paths, cancel).await?;
        let handle = ContextHandle::open(&self.config.root_path, name, &self.config).await?;
        self.contexts.insert(name.to_string(), handle);
        Ok(())
    }
}

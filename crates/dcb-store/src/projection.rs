//! The projection engine: checkpointed, idempotent folds over the
//! event log into materialized per-key state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dcb_types::{EventRecord, Position, Query, QueryItem, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::paths::ContextPaths;
use crate::read::{ReadEngine, ReadOptions};

/// A materialized view folded from a bounded set of event types.
///
/// `State` is serialized with MessagePack between runs, so it must
/// round-trip through `serde`. The transition in [`Projection::apply`]
/// must be idempotent: the update protocol can re-apply the same event
/// after a crash between writing state and advancing the checkpoint,
/// so implementations typically guard with a check like
/// "already merged → skip".
pub trait Projection: Send + Sync {
    /// The materialized state type for one partition key.
    type State: Serialize + DeserializeOwned + Clone + Send + Sync + Default + 'static;

    /// Unique name; used as the subdirectory under `Projections/`.
    fn name(&self) -> &str;

    /// Event types this projection consumes.
    fn event_types(&self) -> Vec<String>;

    /// Extracts the partition key an event belongs to (typically from
    /// a tag).
    fn key_of(&self, event: &EventRecord) -> String;

    /// An optional read-only query resolving events related to `event`,
    /// for multi-stream projections. Always evaluated outside the
    /// append critical section.
    fn related_query(&self, event: &EventRecord) -> Option<Query> {
        let _ = event;
        None
    }

    /// Folds `event` (plus any `related` events) into `current`,
    /// producing the new state for `event`'s partition key.
    fn apply(&self, current: Self::State, event: &EventRecord, related: &[EventRecord]) -> Self::State;
}

/// Object-safe adapter over [`Projection`] so a registry can hold
/// projections with different `State` types, serializing each one's
/// state through MessagePack at the type-erasure boundary.
trait ErasedProjection: Send + Sync {
    fn name(&self) -> &str;
    fn event_types(&self) -> Vec<String>;
    fn key_of(&self, event: &EventRecord) -> String;
    fn related_query(&self, event: &EventRecord) -> Option<Query>;
    fn apply_erased(
        &self,
        current: Option<Vec<u8>>,
        event: &EventRecord,
        related: &[EventRecord],
    ) -> Result<Vec<u8>, StoreError>;
}

struct ProjectionAdapter<P>(P);

impl<P: Projection> ErasedProjection for ProjectionAdapter<P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn event_types(&self) -> Vec<String> {
        self.0.event_types()
    }

    fn key_of(&self, event: &EventRecord) -> String {
        self.0.key_of(event)
    }

    fn related_query(&self, event: &EventRecord) -> Option<Query> {
        self.0.related_query(event)
    }

    fn apply_erased(
        &self,
        current: Option<Vec<u8>>,
        event: &EventRecord,
        related: &[EventRecord],
    ) -> Result<Vec<u8>, StoreError> {
        let current_state: P::State = match current {
            Some(bytes) => rmp_serde::from_slice(&bytes).map_err(|e| StoreError::CorruptRecord {
                context: format!("projection '{}' state", self.0.name()),
                reason: e.to_string(),
            })?,
            None => P::State::default(),
        };
        let new_state = self.0.apply(current_state, event, related);
        rmp_serde::to_vec_named(&new_state).map_err(|e| StoreError::CorruptRecord {
            context: format!("projection '{}' state", self.0.name()),
            reason: e.to_string(),
        })
    }
}

/// Snapshot of a projection's rebuild/catch-up activity, for operator
/// monitoring via `getRebuildStatus`.
#[derive(Debug, Clone)]
pub struct ProjectionStatus {
    /// The projection's name.
    pub name: String,
    /// Whether a catch-up/rebuild run is currently in flight.
    pub in_progress: bool,
    /// The checkpoint as of the last completed run.
    pub checkpoint: Position,
    /// When the most recent run started, if any.
    pub started_at: Option<DateTime<Utc>>,
    /// When the most recent run finished, if any.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of a tag-backfill or projection catch-up run's event count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatchUpResult {
    /// Number of events applied during this run.
    pub events_applied: u64,
    /// The checkpoint after this run.
    pub checkpoint: Position,
}

#[derive(Default)]
struct RunState {
    in_progress: bool,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Manages the registry of projections for one context and runs the
/// update/rebuild protocol.
pub struct ProjectionEngine {
    paths: ContextPaths,
    write_protect: bool,
    durable: bool,
    registry: HashMap<String, Arc<dyn ErasedProjection>>,
    run_state: Mutex<HashMap<String, RunState>>,
}

impl ProjectionEngine {
    /// Builds an empty projection engine for a context.
    pub fn new(paths: ContextPaths, durable: bool, write_protect: bool) -> Self {
        Self {
            paths,
            write_protect,
            durable,
            registry: HashMap::new(),
            run_state: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a projection. Names must be unique within a context.
    pub fn register<P: Projection + 'static>(&mut self, projection: P) {
        let name = projection.name().to_string();
        self.registry.insert(name, Arc::new(ProjectionAdapter(projection)));
    }

    /// The checkpoint currently recorded for `name` (`Position::ZERO`
    /// if the projection has never run).
    pub async fn get_checkpoint(&self, name: &str) -> Result<Position, StoreError> {
        read_checkpoint(&self.paths.projection_checkpoint_file(name)).await
    }

    /// Snapshots every registered projection's run state.
    pub async fn get_rebuild_status(&self) -> Result<Vec<ProjectionStatus>, StoreError> {
        let run_state = self.run_state.lock().await;
        let mut statuses = Vec::with_capacity(self.registry.len());
        for name in self.registry.keys() {
            let checkpoint = self.get_checkpoint(name).await?;
            let run = run_state.get(name);
            statuses.push(ProjectionStatus {
                name: name.clone(),
                in_progress: run.map(|r| r.in_progress).unwrap_or(false),
                checkpoint,
                started_at: run.and_then(|r| r.started_at),
                finished_at: run.and_then(|r| r.finished_at),
            });
        }
        Ok(statuses)
    }

    /// Runs the update protocol for `name`: read events after the
    /// checkpoint, fold each into its partition's state, advance the
    /// checkpoint one event at a time.
    pub async fn catch_up(
        &self,
        name: &str,
        read_engine: &ReadEngine<'_>,
        head: Position,
        cancel: &CancellationToken,
    ) -> Result<CatchUpResult, StoreError> {
        let projection = self
            .registry
            .get(name)
            .ok_or_else(|| StoreError::NotFound(format!("projection '{name}'")))?
            .clone();

        self.mark_started(name).await;
        let result = self.run_catch_up(&projection, read_engine, head, cancel).await;
        self.mark_finished(name).await;
        result
    }

    async fn run_catch_up(
        &self,
        projection: &Arc<dyn ErasedProjection>,
        read_engine: &ReadEngine<'_>,
        head: Position,
        cancel: &CancellationToken,
    ) -> Result<CatchUpResult, StoreError> {
        let name = projection.name();
        let checkpoint_path = self.paths.projection_checkpoint_file(name);
        let mut checkpoint = read_checkpoint(&checkpoint_path).await?;

        let query = Query::single(QueryItem::all().with_event_types(projection.event_types()));
        let events = read_engine
            .read_after(&query, checkpoint, head, &ReadOptions::ascending(), cancel)
            .await?;

        let mut applied = 0u64;
        for event in &events {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            let related = match projection.related_query(event) {
                Some(related_query) => {
                    read_engine
                        .read_after(&related_query, Position::ZERO, head, &ReadOptions::ascending(), cancel)
                        .await?
                }
                None => Vec::new(),
            };

            let key = projection.key_of(event);
            let state_path = self.paths.projection_state_file(name, &key);
            let current = read_state_bytes(&state_path).await?;

            let new_state = projection
                .apply_erased(current, event, &related)
                .map_err(|e| StoreError::ProjectionApplyFailure {
                    projection: name.to_string(),
                    position: event.position,
                    reason: e.to_string(),
                })?;

            write_state_bytes(&state_path, &new_state, self.durable, self.write_protect).await?;
            persist_checkpoint(&checkpoint_path, event.position, self.durable).await?;
            checkpoint = event.position;
            applied += 1;

            tracing::debug!(
                projection = name,
                position = event.position.get(),
                key = %key,
                "projection checkpoint advanced"
            );
        }

        Ok(CatchUpResult {
            events_applied: applied,
            checkpoint,
        })
    }

    /// Atomically truncates `name`'s state directory and checkpoint,
    /// then replays from position 1.
    pub async fn rebuild(
        &self,
        name: &str,
        read_engine: &ReadEngine<'_>,
        head: Position,
        cancel: &CancellationToken,
    ) -> Result<CatchUpResult, StoreError> {
        if !self.registry.contains_key(name) {
            return Err(StoreError::NotFound(format!("projection '{name}'")));
        }
        let state_dir = self.paths.projection_state_dir(name);
        if fs::metadata(&state_dir).await.is_ok() {
            fs::remove_dir_all(&state_dir).await?;
        }
        let checkpoint_path = self.paths.projection_checkpoint_file(name);
        if fs::metadata(&checkpoint_path).await.is_ok() {
            fs::remove_file(&checkpoint_path).await?;
        }
        self.catch_up(name, read_engine, head, cancel).await
    }

    /// Rebuilds every registered projection. When `force_all` is
    /// `false`, only projections whose checkpoint is missing or zero
    /// are rebuilt; the rest are left alone.
    pub async fn rebuild_all(
        &self,
        force_all: bool,
        read_engine: &ReadEngine<'_>,
        head: Position,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, CatchUpResult)>, StoreError> {
        let names: Vec<String> = self.registry.keys().cloned().collect();
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if !force_all {
                let checkpoint = self.get_checkpoint(&name).await?;
                if !checkpoint.is_zero() {
                    continue;
                }
            }
            let result = self.rebuild(&name, read_engine, head, cancel).await?;
            results.push((name, result));
        }
        Ok(results)
    }

    async fn mark_started(&self, name: &str) {
        let mut run_state = self.run_state.lock().await;
        let entry = run_state.entry(name.to_string()).or_default();
        entry.in_progress = true;
        entry.started_at = Some(Utc::now());
    }

    async fn mark_finished(&self, name: &str) {
        let mut run_state = self.run_state.lock().await;
        let entry = run_state.entry(name.to_string()).or_default();
        entry.in_progress = false;
        entry.finished_at = Some(Utc::now());
    }
}

async fn read_checkpoint(path: &std::path::Path) -> Result<Position, StoreError> {
    match fs::read_to_string(path).await {
        Ok(contents) => contents
            .trim()
            .parse::<u64>()
            .map(Position)
            .map_err(|e| StoreError::CorruptRecord {
                context: path.display().to_string(),
                reason: e.to_string(),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Position::ZERO),
        Err(e) => Err(e.into()),
    }
}

async fn persist_checkpoint(path: &std::path::Path, position: Position, durable: bool) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("checkpoint.tmp");
    {
        use tokio::io::AsyncWriteExt;
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(position.get().to_string().as_bytes()).await?;
        if durable {
            file.sync_all().await?;
        }
    }
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn read_state_bytes(path: &std::path::Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_state_bytes(
    path: &std::path::Path,
    bytes: &[u8],
    durable: bool,
    write_protect: bool,
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        use tokio::io::AsyncWriteExt;
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        if durable {
            file.sync_all().await?;
        }
    }
    fs::rename(&tmp_path, path).await?;
    if write_protect {
        let mut perms = fs::metadata(path).await?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFileStore;
    use crate::index::IndexManager;
    use dcb_types::{Metadata, Tag};
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct RosterState {
        student_ids: Vec<String>,
    }

    struct RosterProjection;

    impl Projection for RosterProjection {
        type State = RosterState;

        fn name(&self) -> &str {
            "roster"
        }

        fn event_types(&self) -> Vec<String> {
            vec!["StudentRegistered".to_string()]
        }

        fn key_of(&self, event: &EventRecord) -> String {
            event
                .tags
                .iter()
                .find(|t| t.key == "courseId")
                .map(|t| t.value.clone())
                .unwrap_or_default()
        }

        fn apply(&self, mut current: RosterState, event: &EventRecord, _related: &[EventRecord]) -> RosterState {
            let student_id = event
                .tags
                .iter()
                .find(|t| t.key == "studentId")
                .map(|t| t.value.clone())
                .unwrap_or_default();
            // Idempotent merge: re-applying the same event is a no-op.
            if !current.student_ids.contains(&student_id) {
                current.student_ids.push(student_id);
            }
            current
        }
    }

    async fn seed_events(events: &EventFileStore, indices: &IndexManager, count: u64, courses: u64) {
        for i in 1..=count {
            let course = format!("C{}", i % courses);
            let record = EventRecord {
                position: Position(i),
                event_type: "StudentRegistered".to_string(),
                payload: vec![],
                payload_type: "t".to_string(),
                tags: vec![Tag::new("courseId", &course), Tag::new("studentId", format!("S{i}"))],
                metadata: Metadata::now(),
            };
            events.write(&record).await.unwrap();
            indices.index_event(&record).await.unwrap();
        }
    }

    #[tokio::test]
    async fn catch_up_advances_checkpoint_and_state() {
        let dir = tempdir().unwrap();
        let paths = ContextPaths::new(dir.path(), "Ctx");
        let events = EventFileStore::new(paths.clone(), true, false);
        let indices = IndexManager::new(paths.clone(), true);
        seed_events(&events, &indices, 10, 3).await;

        let mut engine = ProjectionEngine::new(paths, true, false);
        engine.register(RosterProjection);

        let read_engine = ReadEngine::new(&indices, &events);
        let cancel = CancellationToken::new();
        let result = engine.catch_up("roster", &read_engine, Position(10), &cancel).await.unwrap();
        assert_eq!(result.events_applied, 10);
        assert_eq!(engine.get_checkpoint("roster").await.unwrap(), Position(10));

        // Re-running with no new events applies nothing further.
        let second = engine.catch_up("roster", &read_engine, Position(10), &cancel).await.unwrap();
        assert_eq!(second.events_applied, 0);
    }

    #[tokio::test]
    async fn rebuild_matches_incremental_state() {
        let dir = tempdir().unwrap();
        let paths = ContextPaths::new(dir.path(), "Ctx");
        let events = EventFileStore::new(paths.clone(), true, false);
        let indices = IndexManager::new(paths.clone(), true);
        seed_events(&events, &indices, 60, 5).await;

        let mut engine = ProjectionEngine::new(paths, true, false);
        engine.register(RosterProjection);
        let read_engine = ReadEngine::new(&indices, &events);
        let cancel = CancellationToken::new();

        // Incremental: two batches.
        engine.catch_up("roster", &read_engine, Position(30), &cancel).await.unwrap();
        engine.catch_up("roster", &read_engine, Position(60), &cancel).await.unwrap();
        let incremental_state = read_state_bytes(&engine.paths.projection_state_file("roster", "C1"))
            .await
            .unwrap()
            .unwrap();

        engine.rebuild("roster", &read_engine, Position(60), &cancel).await.unwrap();
        let rebuilt_state = read_state_bytes(&engine.paths.projection_state_file("roster", "C1"))
            .await
            .unwrap()
            .unwrap();

        let incremental: RosterState = rmp_serde::from_slice(&incremental_state).unwrap();
        let rebuilt: RosterState = rmp_serde::from_slice(&rebuilt_state).unwrap();
        assert_eq!(incremental.student_ids.len(), rebuilt.student_ids.len());
        assert_eq!(
            incremental.student_ids.iter().collect::<std::collections::HashSet<_>>(),
            rebuilt.student_ids.iter().collect::<std::collections::HashSet<_>>(),
        );
    }

    #[tokio::test]
    async fn rebuild_all_skips_already_caught_up_projections_unless_forced() {
        let dir = tempdir().unwrap();
        let paths = ContextPaths::new(dir.path(), "Ctx");
        let events = EventFileStore::new(paths.clone(), true, false);
        let indices = IndexManager::new(paths.clone(), true);
        seed_events(&events, &indices, 5, 2).await;

        let mut engine = ProjectionEngine::new(paths, true, false);
        engine.register(RosterProjection);
        let read_engine = ReadEngine::new(&indices, &events);
        let cancel = CancellationToken::new();

        engine.catch_up("roster", &read_engine, Position(5), &cancel).await.unwrap();

        let skipped = engine.rebuild_all(false, &read_engine, Position(5), &cancel).await.unwrap();
        assert!(skipped.is_empty());

        let forced = engine.rebuild_all(true, &read_engine, Position(5), &cancel).await.unwrap();
        assert_eq!(forced.len(), 1);
    }
}

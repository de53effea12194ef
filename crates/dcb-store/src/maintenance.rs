//! Maintenance operations: tag backfill and destructive context wipe.

use dcb_types::{Position, StoreError, Tag};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::events::EventFileStore;
use crate::index::IndexManager;
use crate::ledger::Ledger;
use crate::paths::ContextPaths;

/// Outcome of an [`add_tags`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagMigrationResult {
    /// Number of tags appended across all rewritten events. An event
    /// that already carries a tag being backfilled does not count
    /// twice (the migration is idempotent).
    pub tags_added: u64,
    /// Number of events inspected, whether or not they were rewritten.
    pub events_processed: u64,
}

/// Appends `new_tags` to every existing event of `event_type`, rewrites
/// its file and indices, and advances a resumable cursor so a crash
/// mid-run restarts from the last rewritten position rather than from
/// scratch.
///
/// Idempotent: an event that already carries a tag in `new_tags` is
/// left alone for that tag, so re-running after a crash (which may
/// re-rewrite the last-touched event) changes nothing.
pub async fn add_tags(
    paths: &ContextPaths,
    events: &EventFileStore,
    indices: &IndexManager,
    ledger: &Ledger,
    event_type: &str,
    new_tags: &[Tag],
    cancel: &CancellationToken,
) -> Result<TagMigrationResult, StoreError> {
    if new_tags.is_empty() {
        return Ok(TagMigrationResult::default());
    }

    let cursor_path = paths.root().join(format!(".backfill-{}", crate::paths::encode_component(event_type)));
    let mut cursor = read_cursor(&cursor_path).await?;
    let head = ledger.head();

    let mut result = TagMigrationResult::default();
    let positions = indices.positions_for_type(event_type).await?;

    let start_cursor = cursor;
    for position in positions.into_iter().filter(|p| *p > start_cursor) {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if position > head {
            break;
        }
        let Some(mut record) = events.read(position).await? else {
            cursor = position;
            persist_cursor(&cursor_path, cursor).await?;
            continue;
        };

        let missing: Vec<Tag> = new_tags
            .iter()
            .filter(|t| !record.has_tag(&t.key, &t.value))
            .cloned()
            .collect();

        if !missing.is_empty() {
            record.tags.extend(missing.iter().cloned());
            events.rewrite(&record).await?;
            for tag in &missing {
                indices.index_tag(position, tag).await?;
            }
            result.tags_added += missing.len() as u64;
        }

        result.events_processed += 1;
        cursor = position;
        persist_cursor(&cursor_path, cursor).await?;
    }

    if fs::metadata(&cursor_path).await.is_ok() {
        fs::remove_file(&cursor_path).await?;
    }

    tracing::info!(
        event_type,
        tags_added = result.tags_added,
        events_processed = result.events_processed,
        "tag backfill complete"
    );
    Ok(result)
}

async fn read_cursor(path: &std::path::Path) -> Result<Position, StoreError> {
    match fs::read_to_string(path).await {
        Ok(contents) => contents.trim().parse::<u64>().map(Position).map_err(|e| StoreError::CorruptRecord {
            context: path.display().to_string(),
            reason: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Position::ZERO),
        Err(e) => Err(e.into()),
    }
}

async fn persist_cursor(path: &std::path::Path, position: Position) -> Result<(), StoreError> {
    use tokio::io::AsyncWriteExt;
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(position.get().to_string().as_bytes()).await?;
        file.sync_all().await?;
    }
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Irreversibly deletes every event, index, ledger, and projection
/// state belonging to a context. Clears any write-protect bits first
/// so the recursive removal cannot be blocked by read-only event
/// files. The context's directory skeleton is recreated lazily the
/// next time it is opened.
pub async fn delete_store(paths: &ContextPaths, cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    let root = paths.root();
    if fs::metadata(root).await.is_err() {
        return Ok(());
    }
    clear_readonly_recursive(root).await?;
    fs::remove_dir_all(root).await?;
    tracing::warn!(context = %root.display(), "context destructively wiped");
    Ok(())
}

fn clear_readonly_recursive(
    dir: &std::path::Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), StoreError>> + Send + '_>> {
    Box::pin(async move {
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                clear_readonly_recursive(&path).await?;
            } else if metadata.permissions().readonly() {
                let mut perms = metadata.permissions();
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                fs::set_permissions(&path, perms).await?;
            }
        }
        Ok(())
    })
}

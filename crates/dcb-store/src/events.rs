//! The event file layer: write-temp-fsync-rename, and position-keyed
//! reads that tolerate gaps.

use std::sync::atomic::{AtomicUsize, Ordering};

use dcb_types::{EventRecord, Position, StoreError};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::paths::ContextPaths;

/// Reads and writes individual event files under `Events/`.
#[derive(Debug)]
pub struct EventFileStore {
    paths: ContextPaths,
    durable: bool,
    write_protect: bool,
    /// Count of event files actually opened and read, exposed for
    /// tests that assert the `readLast` fast path performs O(1) I/O.
    reads_performed: AtomicUsize,
}

impl EventFileStore {
    /// Builds a file store rooted at the given context paths.
    pub fn new(paths: ContextPaths, durable: bool, write_protect: bool) -> Self {
        Self {
            paths,
            durable,
            write_protect,
            reads_performed: AtomicUsize::new(0),
        }
    }

    /// Writes `record` to its final position-keyed file: temp name,
    /// fsync (if durable), atomic rename.
    pub async fn write(&self, record: &EventRecord) -> Result<(), StoreError> {
        fs::create_dir_all(self.paths.events_dir()).await?;

        let bytes = rmp_serde::to_vec_named(record).map_err(|e| StoreError::CorruptRecord {
            context: format!("event at position {}", record.position),
            reason: e.to_string(),
        })?;

        let tmp_path = self.paths.event_tmp_file(record.position);
        {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            if self.durable {
                file.sync_all().await?;
            }
        }

        let final_path = self.paths.event_file(record.position);
        fs::rename(&tmp_path, &final_path).await?;

        if self.write_protect {
            let mut perms = fs::metadata(&final_path).await?.permissions();
            perms.set_readonly(true);
            fs::set_permissions(&final_path, perms).await?;
        }

        Ok(())
    }

    /// Reads the event committed at `position`, or `None` if its file
    /// is missing: a reserved-but-never-written position is skipped
    /// silently rather than treated as an error.
    pub async fn read(&self, position: Position) -> Result<Option<EventRecord>, StoreError> {
        let path = self.paths.event_file(position);
        self.reads_performed.fetch_add(1, Ordering::Relaxed);
        match fs::read(&path).await {
            Ok(bytes) => {
                let record: EventRecord =
                    rmp_serde::from_slice(&bytes).map_err(|e| StoreError::CorruptRecord {
                        context: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(position = position.get(), "skipping missing event file");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrites the event file at `record.position` with `record`'s
    /// current contents, used by the tag backfill maintenance
    /// operation. Crash-safe via the same temp-rename path as
    /// [`EventFileStore::write`].
    pub async fn rewrite(&self, record: &EventRecord) -> Result<(), StoreError> {
        if self.write_protect {
            let final_path = self.paths.event_file(record.position);
            if let Ok(metadata) = fs::metadata(&final_path).await {
                let mut perms = metadata.permissions();
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = fs::set_permissions(&final_path, perms).await;
            }
        }
        self.write(record).await
    }

    /// Scans `Events/` for the highest position with a committed
    /// file, used to seed [`crate::ledger::Ledger::open`]'s recovery
    /// reconciliation. Returns `0` if the directory is absent or empty.
    pub async fn scan_highest_position(&self) -> Result<u64, StoreError> {
        let dir = self.paths.events_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut highest = 0u64;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".ev") {
                if let Ok(position) = stem.parse::<u64>() {
                    highest = highest.max(position);
                }
            }
        }
        Ok(highest)
    }

    /// Number of event files opened and read since this store was
    /// constructed. Test-only instrumentation for the `readLast`
    /// O(1)-I/O invariant.
    pub fn reads_performed(&self) -> usize {
        self.reads_performed.load(Ordering::Relaxed)
    }
}

//! The ledger: the one piece of global state within a context.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dcb_types::{Position, StoreError};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Assigns the next position for a context, exactly once per
/// successful append batch, in strict commit order.
///
/// Callers serialize `reserve`/`commit` pairs themselves by holding
/// the context-wide write lock (see [`crate::append::AppendCoordinator`]);
/// the ledger's own atomic only needs to support lock-free reads of
/// the durably-committed head from readers running concurrently with
/// a writer.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    /// The last durably-committed position. `0` means empty.
    committed: AtomicU64,
    durable: bool,
}

impl Ledger {
    /// Opens the ledger file at `path`, reconciling it against
    /// `highest_event_file_position`: on-disk event files always win
    /// over a stale or missing ledger value.
    pub async fn open(
        path: PathBuf,
        highest_event_file_position: u64,
        durable: bool,
    ) -> Result<Self, StoreError> {
        let recorded = read_ledger_file(&path).await?;
        let reconciled = recorded.max(highest_event_file_position);

        let ledger = Self {
            path,
            committed: AtomicU64::new(reconciled),
            durable,
        };
        if reconciled != recorded {
            tracing::info!(
                recorded,
                reconciled,
                "ledger recovered to highest on-disk event position"
            );
            ledger.persist(reconciled).await?;
        }
        Ok(ledger)
    }

    /// The last durably-committed position (`Position::ZERO` if the
    /// context is empty).
    pub fn head(&self) -> Position {
        Position(self.committed.load(Ordering::Acquire))
    }

    /// Tentatively reserves `n` consecutive positions starting after
    /// the current head. The caller must hold the context write lock
    /// and must call [`Ledger::commit`] (or accept that a crash before
    /// commit leaves these positions as a reclaimed gap) -- this
    /// method itself does not mutate durable state.
    pub fn reserve(&self, n: u64) -> (Position, Position) {
        let start = self.committed.load(Ordering::Acquire) + 1;
        let end = start + n - 1;
        (Position(start), Position(end))
    }

    /// Durably advances the last-assigned position to `end`. Must be
    /// called with the context write lock held and after every event
    /// file and index entry for `[start, end]` has been written.
    pub async fn commit(&self, end: Position) -> Result<(), StoreError> {
        self.persist(end.get()).await?;
        self.committed.store(end.get(), Ordering::Release);
        Ok(())
    }

    async fn persist(&self, value: u64) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("ledger.tmp");
        {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(value.to_string().as_bytes()).await?;
            if self.durable {
                file.sync_all().await?;
            }
        }
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

async fn read_ledger_file(path: &Path) -> Result<u64, StoreError> {
    match fs::read_to_string(path).await {
        Ok(contents) => contents.trim().parse::<u64>().map_err(|e| {
            StoreError::CorruptRecord {
                context: path.display().to_string(),
                reason: e.to_string(),
            }
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

//! Secondary indices: append-only, fixed-width position lists keyed by
//! event type or by `key=value` tag.

use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use dcb_types::{EventRecord, Position, StoreError, Tag};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::paths::ContextPaths;

const ENTRY_WIDTH: u64 = 8;

/// A single append-only list of positions backing one index
/// discriminator (an event type, or a `key=value` tag).
#[derive(Debug)]
struct PositionList {
    path: PathBuf,
}

impl PositionList {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Appends `position` to the list. Safe to call twice for the same
    /// position during crash recovery: duplicates are deduplicated on
    /// read.
    async fn append(&self, position: Position, durable: bool) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&position.get().to_le_bytes()).await?;
        if durable {
            file.sync_all().await?;
        }
        Ok(())
    }

    /// All positions in the list, ascending and deduplicated.
    async fn read_all(&self) -> Result<BTreeSet<Position>, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        decode_positions(&self.path, &bytes)
    }

    /// O(1) tail read: seeks to the last 8-byte entry. `None` if the
    /// list is missing or empty.
    async fn read_last(&self) -> Result<Option<Position>, StoreError> {
        let mut file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if len < ENTRY_WIDTH {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(len - ENTRY_WIDTH)).await?;
        let mut buf = [0u8; ENTRY_WIDTH as usize];
        file.read_exact(&mut buf).await?;
        Ok(Some(Position(u64::from_le_bytes(buf))))
    }
}

fn decode_positions(path: &Path, bytes: &[u8]) -> Result<BTreeSet<Position>, StoreError> {
    if bytes.len() % ENTRY_WIDTH as usize != 0 {
        return Err(StoreError::CorruptRecord {
            context: path.display().to_string(),
            reason: format!(
                "index length {} is not a multiple of the {}-byte entry width",
                bytes.len(),
                ENTRY_WIDTH
            ),
        });
    }
    Ok(bytes
        .chunks_exact(ENTRY_WIDTH as usize)
        .map(|chunk| Position(u64::from_le_bytes(chunk.try_into().unwrap())))
        .collect())
}

/// Owns the `EventType` and `Tags` index subtrees for one context and
/// exposes the operations the append and read paths need.
#[derive(Debug)]
pub struct IndexManager {
    paths: ContextPaths,
    durable: bool,
}

impl IndexManager {
    /// Builds an index manager rooted at `paths`.
    pub fn new(paths: ContextPaths, durable: bool) -> Self {
        Self { paths, durable }
    }

    /// Appends `record`'s position to its event-type list and to every
    /// one of its tag lists.
    pub async fn index_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        let type_list = PositionList::new(self.paths.event_type_index_file(&record.event_type));
        type_list.append(record.position, self.durable).await?;

        for tag in &record.tags {
            let tag_list = PositionList::new(self.paths.tag_index_file(tag));
            tag_list.append(record.position, self.durable).await?;
        }
        tracing::debug!(
            position = record.position.get(),
            event_type = %record.event_type,
            tag_count = record.tags.len(),
            "indexed event"
        );
        Ok(())
    }

    /// Appends `position` to a single tag's list, without touching the
    /// event-type list. Used by tag backfill, which adds a tag to an
    /// already-indexed event and must not re-append it to the
    /// event-type list a second time.
    pub async fn index_tag(&self, position: Position, tag: &Tag) -> Result<(), StoreError> {
        PositionList::new(self.paths.tag_index_file(tag))
            .append(position, self.durable)
            .await
    }

    /// Ascending, deduplicated positions for a single event type.
    pub async fn positions_for_type(&self, event_type: &str) -> Result<BTreeSet<Position>, StoreError> {
        PositionList::new(self.paths.event_type_index_file(event_type))
            .read_all()
            .await
    }

    /// Ascending, deduplicated positions for a single tag.
    pub async fn positions_for_tag(&self, tag: &Tag) -> Result<BTreeSet<Position>, StoreError> {
        PositionList::new(self.paths.tag_index_file(tag)).read_all().await
    }

    /// O(1) tail read of the event-type list.
    pub async fn last_for_type(&self, event_type: &str) -> Result<Option<Position>, StoreError> {
        PositionList::new(self.paths.event_type_index_file(event_type))
            .read_last()
            .await
    }

    /// O(1) tail read of a tag's list.
    pub async fn last_for_tag(&self, tag: &Tag) -> Result<Option<Position>, StoreError> {
        PositionList::new(self.paths.tag_index_file(tag)).read_last().await
    }
}

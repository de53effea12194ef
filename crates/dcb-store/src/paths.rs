//! On-disk layout for a single context:
//!
//! ```text
//! <root>/<context>/
//!   .ledger
//!   Events/<position>.ev
//!   Indices/EventType/<type>
//!   Indices/Tags/<k>=<v>
//!   Projections/<name>/state/<key>
//!   Projections/<name>/.checkpoint
//! ```

use std::path::{Path, PathBuf};

use dcb_types::{Position, Tag};

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters that are unsafe across Windows, macOS and Linux filesystems,
/// plus `%` which this engine uses as its own escape character.
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '%'];

/// Returns `true` if `name` is usable as a context name: non-empty,
/// free of filesystem-reserved characters and NUL, and not an
/// OS-reserved device name.
pub fn is_valid_context_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name.contains('\0') || name.chars().any(|c| RESERVED_CHARS.contains(&c)) {
        return false;
    }
    !RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Percent-encodes any byte that would be unsafe in a path component,
/// so arbitrary tag keys/values and event-type strings round-trip to a
/// valid, human-legible file name on every major OS.
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        let c = byte as char;
        let safe = c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '=');
        if safe {
            out.push(c);
        } else {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        }
    }
    out
}

/// Computed filesystem paths for one context.
#[derive(Debug, Clone)]
pub struct ContextPaths {
    root: PathBuf,
}

impl ContextPaths {
    /// Builds the path layout for `context` rooted under `store_root`.
    pub fn new(store_root: &Path, context: &str) -> Self {
        Self {
            root: store_root.join(context),
        }
    }

    /// The context's own root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The ledger file recording the last assigned position.
    pub fn ledger_file(&self) -> PathBuf {
        self.root.join(".ledger")
    }

    /// The directory holding one file per committed event.
    pub fn events_dir(&self) -> PathBuf {
        self.root.join("Events")
    }

    /// The final path for the event committed at `position`.
    pub fn event_file(&self, position: Position) -> PathBuf {
        self.events_dir().join(format!("{}.ev", position.get()))
    }

    /// The temporary path an event is written to before the final
    /// atomic rename.
    pub fn event_tmp_file(&self, position: Position) -> PathBuf {
        self.events_dir().join(format!("{}.ev.tmp", position.get()))
    }

    /// Directory holding one append-only position list per event type.
    pub fn event_type_index_dir(&self) -> PathBuf {
        self.root.join("Indices").join("EventType")
    }

    /// Position list file for a single event type.
    pub fn event_type_index_file(&self, event_type: &str) -> PathBuf {
        self.event_type_index_dir().join(encode_component(event_type))
    }

    /// Directory holding one append-only position list per `key=value`
    /// tag.
    pub fn tag_index_dir(&self) -> PathBuf {
        self.root.join("Indices").join("Tags")
    }

    /// Position list file for a single tag.
    pub fn tag_index_file(&self, tag: &Tag) -> PathBuf {
        self.tag_index_dir()
            .join(encode_component(&tag.as_kv_string()))
    }

    /// Root directory for all registered projections.
    pub fn projections_dir(&self) -> PathBuf {
        self.root.join("Projections")
    }

    /// Root directory for a single named projection.
    pub fn projection_dir(&self, name: &str) -> PathBuf {
        self.projections_dir().join(encode_component(name))
    }

    /// Directory holding one materialized-state file per partition key.
    pub fn projection_state_dir(&self, name: &str) -> PathBuf {
        self.projection_dir(name).join("state")
    }

    /// Materialized state file for a single partition key.
    pub fn projection_state_file(&self, name: &str, key: &str) -> PathBuf {
        self.projection_state_dir(name).join(encode_component(key))
    }

    /// Checkpoint file recording the highest position a projection has
    /// successfully applied.
    pub fn projection_checkpoint_file(&self, name: &str) -> PathBuf {
        self.projection_dir(name).join(".checkpoint")
    }
}

//! Record types shared by the log, checkpoint and recovery layers.
//!
//! Field names are camelCase on the wire so logs written by earlier tooling
//! stay readable. These types carry no I/O and serialize deterministically.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of filesystem mutation recorded in the file-action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    FileCreate,
    FileModify,
    FileDelete,
    DirCreate,
    DirDelete,
    MetadataUpdate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::FileCreate,
        ActionKind::FileModify,
        ActionKind::FileDelete,
        ActionKind::DirCreate,
        ActionKind::DirDelete,
        ActionKind::MetadataUpdate,
    ];

    /// Wire literal for this action.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::FileCreate => "FILE_CREATE",
            ActionKind::FileModify => "FILE_MODIFY",
            ActionKind::FileDelete => "FILE_DELETE",
            ActionKind::DirCreate => "DIR_CREATE",
            ActionKind::DirDelete => "DIR_DELETE",
            ActionKind::MetadataUpdate => "METADATA_UPDATE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Applied,
    RolledBack,
    Failed,
}

/// Whole-file content captured around a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub content: String,
}

impl FileState {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// The mutation an entry records, tagged by `action`.
///
/// File and metadata actions carry content snapshots; directory actions carry
/// none. Flattened into [`WalEntry`] so the wire shape stays a single object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Mutation {
    FileCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_state: Option<FileState>,
    },
    FileModify {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_state: Option<FileState>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_state: Option<FileState>,
    },
    FileDelete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_state: Option<FileState>,
    },
    DirCreate,
    DirDelete,
    MetadataUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_state: Option<FileState>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_state: Option<FileState>,
    },
}

impl Mutation {
    pub fn action(&self) -> ActionKind {
        match self {
            Mutation::FileCreate { .. } => ActionKind::FileCreate,
            Mutation::FileModify { .. } => ActionKind::FileModify,
            Mutation::FileDelete { .. } => ActionKind::FileDelete,
            Mutation::DirCreate => ActionKind::DirCreate,
            Mutation::DirDelete => ActionKind::DirDelete,
            Mutation::MetadataUpdate { .. } => ActionKind::MetadataUpdate,
        }
    }

    /// Content captured before the mutation, when the action carries one.
    pub fn previous_state(&self) -> Option<&FileState> {
        match self {
            Mutation::FileModify { previous_state, .. }
            | Mutation::FileDelete { previous_state }
            | Mutation::MetadataUpdate { previous_state, .. } => previous_state.as_ref(),
            Mutation::FileCreate { .. } | Mutation::DirCreate | Mutation::DirDelete => None,
        }
    }

    pub fn new_state(&self) -> Option<&FileState> {
        match self {
            Mutation::FileCreate { new_state }
            | Mutation::FileModify { new_state, .. }
            | Mutation::MetadataUpdate { new_state, .. } => new_state.as_ref(),
            Mutation::FileDelete { .. } | Mutation::DirCreate | Mutation::DirDelete => None,
        }
    }
}

/// One record of the file-action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalEntry {
    pub id: String,
    pub checkpoint_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(flatten)]
    pub mutation: Mutation,
    pub target: String,
    pub status: EntryStatus,
}

impl WalEntry {
    pub fn action(&self) -> ActionKind {
        self.mutation.action()
    }

    pub fn previous_state(&self) -> Option<&FileState> {
        self.mutation.previous_state()
    }
}

/// Status of a checkpoint. `Active` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Active,
    #[serde(alias = "finalized")]
    Committed,
    RolledBack,
}

impl CheckpointStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckpointStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::Active => "active",
            CheckpointStatus::Committed => "committed",
            CheckpointStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recovery point bounding one task attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub snapshot_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: CheckpointStatus,
    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub finalized_at: Option<i64>,
}

/// Whole-file contents captured when a checkpoint begins. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub id: String,
    pub timestamp: i64,
    /// Absolute path -> content.
    pub files: BTreeMap<String, String>,
}

/// A log line rejected by the safe parser. Reported, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptedFrame {
    /// 1-based line number in the log file.
    pub line_number: usize,
    /// Bounded preview of the raw line.
    pub raw_content: String,
    pub parse_error: String,
}

/// Checksummed record of the generic state journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub id: String,
    pub timestamp: i64,
    pub data: Value,
    pub checksum: String,
}

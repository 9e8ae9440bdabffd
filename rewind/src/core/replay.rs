//! Undo planning for file-action entries.
//!
//! Pure functions: ordering entries for undo and mapping each entry to the
//! filesystem step that reverses it. Applying the steps lives in
//! [`crate::recovery`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::types::{ActionKind, Mutation, WalEntry};

/// Filesystem step that reverses one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Undo<'a> {
    /// Remove a file the task created (no-op if already gone).
    RemoveFile,
    /// Overwrite a modified file with its previous content.
    WriteContent { content: &'a str },
    /// Recreate a deleted file, including missing parent directories.
    RecreateFile { content: &'a str },
    /// Remove a directory the task created. Must be empty.
    RemoveDir,
    /// Recreate a directory the task removed.
    RecreateDir,
    /// Metadata changes are not reversed.
    Ignore,
    /// The entry needs a previous state it does not carry.
    MissingPreviousState,
}

/// Map an entry to its undo step.
pub fn undo_for(entry: &WalEntry) -> Undo<'_> {
    match &entry.mutation {
        Mutation::FileCreate { .. } => Undo::RemoveFile,
        Mutation::FileModify {
            previous_state: Some(prev),
            ..
        } => Undo::WriteContent {
            content: &prev.content,
        },
        Mutation::FileDelete {
            previous_state: Some(prev),
        } => Undo::RecreateFile {
            content: &prev.content,
        },
        Mutation::FileModify {
            previous_state: None,
            ..
        }
        | Mutation::FileDelete {
            previous_state: None,
        } => Undo::MissingPreviousState,
        Mutation::DirCreate => Undo::RemoveDir,
        Mutation::DirDelete => Undo::RecreateDir,
        Mutation::MetadataUpdate { .. } => Undo::Ignore,
    }
}

/// Order entries for undo: newest timestamp first.
///
/// Entries sharing a timestamp are undone in reverse log order, so the last
/// write to a file is always reverted before earlier ones.
pub fn undo_order(entries: Vec<WalEntry>) -> Vec<WalEntry> {
    let mut indexed: Vec<(usize, WalEntry)> = entries.into_iter().enumerate().collect();
    indexed.sort_by(|(left_idx, left), (right_idx, right)| {
        right
            .timestamp
            .cmp(&left.timestamp)
            .then_with(|| right_idx.cmp(left_idx))
    });
    indexed.into_iter().map(|(_, entry)| entry).collect()
}

/// A restoration a dry run reports without performing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRestore {
    pub target: String,
    pub action: ActionKind,
}

/// Restorations a real run would perform, in undo order.
///
/// Only entries carrying a previous state are listed.
pub fn planned_restorations(ordered: &[WalEntry]) -> Vec<PlannedRestore> {
    ordered
        .iter()
        .filter(|entry| entry.previous_state().is_some())
        .map(|entry| PlannedRestore {
            target: entry.target.clone(),
            action: entry.action(),
        })
        .collect()
}

/// Entries whose target is not captured in the snapshot.
///
/// Used when restoring to the snapshot: captured files come back from the
/// snapshot, everything else is still undone entry by entry.
pub fn entries_outside_snapshot(
    ordered: Vec<WalEntry>,
    files: &BTreeMap<String, String>,
) -> Vec<WalEntry> {
    ordered
        .into_iter()
        .filter(|entry| !files.contains_key(&entry.target))
        .collect()
}

/// Restorations a snapshot-based run would perform.
///
/// Entries outside the snapshot come first, in undo order, followed by every
/// captured file in path order.
pub fn planned_snapshot_restorations(
    ordered: Vec<WalEntry>,
    files: &BTreeMap<String, String>,
) -> Vec<PlannedRestore> {
    let mut planned = planned_restorations(&entries_outside_snapshot(ordered, files));
    planned.extend(files.keys().map(|path| PlannedRestore {
        target: path.clone(),
        action: ActionKind::FileModify,
    }));
    planned
}

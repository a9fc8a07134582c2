//! Total, pure snapshot transformations.
//!
//! # Invariants
//! - `Patch::apply` never fails; an absent target yields `PatchEffect::Noop`.
//! - Patches touching different task ids commute.
//! - A task keeps its owning board across title/status updates.

use crate::model::board::{Board, BoardId, Task, TaskId, TaskStatus};
use crate::store::snapshot::{BoardSnapshot, TaskEntry};
use std::collections::BTreeMap;

/// One change to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Replaces all content with an authoritative refresh.
    ///
    /// Tasks whose board is not listed are dropped. Ids already present keep
    /// their display sequence.
    ReplaceAll { boards: Vec<Board>, tasks: Vec<Task> },
    UpsertBoard(Board),
    /// Removes a board together with every task it owns.
    RemoveBoard { board_id: BoardId },
    /// Re-inserts a removed board and its entries at their original positions.
    RestoreBoard { board: Board, tasks: Vec<TaskEntry> },
    /// Inserts a task that must not exist yet.
    InsertTask(Task),
    /// Overwrites title/status of a known id, or inserts an unknown id into
    /// `task.board_id`.
    MergeTask(Task),
    SetStatus { task_id: TaskId, status: TaskStatus },
    RemoveTask { task_id: TaskId },
    /// Re-inserts a previously removed entry at its original position.
    RestoreTask(TaskEntry),
    /// Swaps a placeholder id for the server-assigned one.
    ///
    /// When `id` is already present the placeholder is dropped instead.
    ConfirmPlaceholder {
        placeholder: TaskId,
        id: TaskId,
        title: String,
    },
}

/// Result of applying one patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchEffect {
    Changed,
    Noop(NoopReason),
}

impl PatchEffect {
    pub fn is_changed(self) -> bool {
        matches!(self, Self::Changed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopReason {
    /// Target already holds the requested values.
    Unchanged,
    MissingTask(TaskId),
    MissingBoard(BoardId),
    AlreadyPresent(TaskId),
    BoardAlreadyPresent(BoardId),
}

impl NoopReason {
    /// Whether the no-op came from a reference that vanished.
    pub fn is_stale(self) -> bool {
        matches!(self, Self::MissingTask(_) | Self::MissingBoard(_))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::MissingTask(_) => "missing_task",
            Self::MissingBoard(_) => "missing_board",
            Self::AlreadyPresent(_) => "already_present",
            Self::BoardAlreadyPresent(_) => "board_already_present",
        }
    }
}

impl Patch {
    /// Applies this patch to `snapshot`, returning the next snapshot.
    ///
    /// The revision advances only when content changed.
    pub fn apply(&self, snapshot: &BoardSnapshot) -> (BoardSnapshot, PatchEffect) {
        let mut next = snapshot.clone();
        let effect = self.apply_in_place(&mut next);
        if effect.is_changed() {
            next.revision += 1;
        }
        (next, effect)
    }

    /// Short patch name used in log events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReplaceAll { .. } => "replace_all",
            Self::UpsertBoard(_) => "upsert_board",
            Self::RemoveBoard { .. } => "remove_board",
            Self::RestoreBoard { .. } => "restore_board",
            Self::InsertTask(_) => "insert_task",
            Self::MergeTask(_) => "merge_task",
            Self::SetStatus { .. } => "set_status",
            Self::RemoveTask { .. } => "remove_task",
            Self::RestoreTask(_) => "restore_task",
            Self::ConfirmPlaceholder { .. } => "confirm_placeholder",
        }
    }

    fn apply_in_place(&self, snapshot: &mut BoardSnapshot) -> PatchEffect {
        match self {
            Self::ReplaceAll { boards, tasks } => replace_all(snapshot, boards, tasks),
            Self::UpsertBoard(board) => {
                if snapshot.boards.get(&board.id) == Some(board) {
                    return PatchEffect::Noop(NoopReason::Unchanged);
                }
                snapshot.boards.insert(board.id, board.clone());
                PatchEffect::Changed
            }
            Self::RemoveBoard { board_id } => {
                if snapshot.boards.remove(board_id).is_none() {
                    return PatchEffect::Noop(NoopReason::MissingBoard(*board_id));
                }
                snapshot
                    .tasks
                    .retain(|_, entry| entry.task.board_id != *board_id);
                PatchEffect::Changed
            }
            Self::RestoreBoard { board, tasks } => {
                if snapshot.boards.contains_key(&board.id) {
                    return PatchEffect::Noop(NoopReason::BoardAlreadyPresent(board.id));
                }
                snapshot.boards.insert(board.id, board.clone());
                for entry in tasks {
                    if entry.task.board_id != board.id || snapshot.tasks.contains_key(&entry.task.id) {
                        continue;
                    }
                    snapshot.next_seq = snapshot.next_seq.max(entry.seq + 1);
                    snapshot.tasks.insert(entry.task.id, entry.clone());
                }
                PatchEffect::Changed
            }
            Self::InsertTask(task) => {
                if snapshot.tasks.contains_key(&task.id) {
                    return PatchEffect::Noop(NoopReason::AlreadyPresent(task.id));
                }
                if !snapshot.boards.contains_key(&task.board_id) {
                    return PatchEffect::Noop(NoopReason::MissingBoard(task.board_id));
                }
                let seq = snapshot.allocate_seq();
                snapshot.tasks.insert(
                    task.id,
                    TaskEntry {
                        task: task.clone(),
                        seq,
                    },
                );
                PatchEffect::Changed
            }
            Self::MergeTask(task) => {
                if let Some(entry) = snapshot.tasks.get_mut(&task.id) {
                    if entry.task.title == task.title && entry.task.status == task.status {
                        return PatchEffect::Noop(NoopReason::Unchanged);
                    }
                    entry.task.title = task.title.clone();
                    entry.task.status = task.status;
                    return PatchEffect::Changed;
                }
                Self::InsertTask(task.clone()).apply_in_place(snapshot)
            }
            Self::SetStatus { task_id, status } => match snapshot.tasks.get_mut(task_id) {
                None => PatchEffect::Noop(NoopReason::MissingTask(*task_id)),
                Some(entry) if entry.task.status == *status => {
                    PatchEffect::Noop(NoopReason::Unchanged)
                }
                Some(entry) => {
                    entry.task.status = *status;
                    PatchEffect::Changed
                }
            },
            Self::RemoveTask { task_id } => match snapshot.tasks.remove(task_id) {
                Some(_) => PatchEffect::Changed,
                None => PatchEffect::Noop(NoopReason::MissingTask(*task_id)),
            },
            Self::RestoreTask(entry) => {
                if snapshot.tasks.contains_key(&entry.task.id) {
                    return PatchEffect::Noop(NoopReason::AlreadyPresent(entry.task.id));
                }
                if !snapshot.boards.contains_key(&entry.task.board_id) {
                    return PatchEffect::Noop(NoopReason::MissingBoard(entry.task.board_id));
                }
                snapshot.next_seq = snapshot.next_seq.max(entry.seq + 1);
                snapshot.tasks.insert(entry.task.id, entry.clone());
                PatchEffect::Changed
            }
            Self::ConfirmPlaceholder {
                placeholder,
                id,
                title,
            } => {
                let Some(mut entry) = snapshot.tasks.remove(placeholder) else {
                    return PatchEffect::Noop(NoopReason::MissingTask(*placeholder));
                };
                if snapshot.tasks.contains_key(id) {
                    // Server id already merged from an event or refresh.
                    return PatchEffect::Changed;
                }
                entry.task.id = *id;
                entry.task.title = title.clone();
                snapshot.tasks.insert(*id, entry);
                PatchEffect::Changed
            }
        }
    }
}

fn replace_all(snapshot: &mut BoardSnapshot, boards: &[Board], tasks: &[Task]) -> PatchEffect {
    let next_boards = boards
        .iter()
        .map(|board| (board.id, board.clone()))
        .collect::<BTreeMap<_, _>>();

    let mut next_tasks = BTreeMap::<TaskId, TaskEntry>::new();
    for task in tasks {
        if !next_boards.contains_key(&task.board_id) {
            continue;
        }
        let seq = match next_tasks.get(&task.id) {
            Some(existing) => existing.seq,
            None => match snapshot.tasks.get(&task.id) {
                Some(existing) => existing.seq,
                None => snapshot.allocate_seq(),
            },
        };
        next_tasks.insert(
            task.id,
            TaskEntry {
                task: task.clone(),
                seq,
            },
        );
    }

    if next_boards == snapshot.boards && next_tasks == snapshot.tasks {
        return PatchEffect::Noop(NoopReason::Unchanged);
    }
    snapshot.boards = next_boards;
    snapshot.tasks = next_tasks;
    PatchEffect::Changed
}

//! Immutable normalized snapshot and display views.

use crate::model::board::{Board, BoardId, Task, TaskId, TaskStatus};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Stored task plus its display sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub task: Task,
    /// Insertion order inside the owning board; stable across updates.
    pub seq: u64,
}

/// Normalized view of every known board and task.
///
/// Equality compares content only (`boards` and `tasks`), not the revision
/// counter or sequence allocator.
#[derive(Debug, Clone, Default)]
pub struct BoardSnapshot {
    pub(crate) revision: u64,
    pub(crate) boards: BTreeMap<BoardId, Board>,
    pub(crate) tasks: BTreeMap<TaskId, TaskEntry>,
    pub(crate) next_seq: u64,
}

impl PartialEq for BoardSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.boards == other.boards && self.tasks == other.tasks
    }
}

impl Eq for BoardSnapshot {}

impl BoardSnapshot {
    /// Number of content-changing patches committed before this snapshot.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn boards(&self) -> impl Iterator<Item = &Board> {
        self.boards.values()
    }

    pub fn board(&self, board_id: BoardId) -> Option<&Board> {
        self.boards.get(&board_id)
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id).map(|entry| &entry.task)
    }

    pub fn entry(&self, task_id: TaskId) -> Option<&TaskEntry> {
        self.tasks.get(&task_id)
    }

    pub fn contains_task(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks owned by one board in display order.
    pub fn tasks_of(&self, board_id: BoardId) -> Vec<&Task> {
        self.entries_of(board_id)
            .into_iter()
            .map(|entry| &entry.task)
            .collect()
    }

    /// Entries owned by one board in display order.
    pub fn entries_of(&self, board_id: BoardId) -> Vec<&TaskEntry> {
        let mut entries = self
            .tasks
            .values()
            .filter(|entry| entry.task.board_id == board_id)
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }

    /// Groups one board's tasks into the three status columns.
    pub fn board_view(&self, board_id: BoardId) -> Option<BoardView> {
        let board = self.boards.get(&board_id)?.clone();
        let tasks = self.tasks_of(board_id);
        let columns = TaskStatus::ALL
            .iter()
            .map(|status| ColumnView {
                status: *status,
                tasks: tasks
                    .iter()
                    .filter(|task| task.status == *status)
                    .map(|task| (*task).clone())
                    .collect(),
            })
            .collect();
        Some(BoardView { board, columns })
    }

    /// Verifies membership and keying invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (key, entry) in &self.tasks {
            if *key != entry.task.id {
                return Err(InvariantViolation::KeyMismatch {
                    key: *key,
                    task_id: entry.task.id,
                });
            }
            if !self.boards.contains_key(&entry.task.board_id) {
                return Err(InvariantViolation::OrphanTask {
                    task_id: entry.task.id,
                    board_id: entry.task.board_id,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// One board grouped by column, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardView {
    pub board: Board,
    /// Always three columns in `TaskStatus::ALL` order.
    pub columns: Vec<ColumnView>,
}

impl BoardView {
    pub fn column(&self, status: TaskStatus) -> &[Task] {
        self.columns
            .iter()
            .find(|column| column.status == status)
            .map(|column| column.tasks.as_slice())
            .unwrap_or(&[])
    }

    pub fn task_count(&self) -> usize {
        self.columns.iter().map(|column| column.tasks.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnView {
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

/// Structural inconsistency detected by `BoardSnapshot::check_invariants`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    OrphanTask { task_id: TaskId, board_id: BoardId },
    KeyMismatch { key: TaskId, task_id: TaskId },
}

impl Display for InvariantViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrphanTask { task_id, board_id } => {
                write!(f, "task {task_id} references missing board {board_id}")
            }
            Self::KeyMismatch { key, task_id } => {
                write!(f, "task {task_id} stored under key {key}")
            }
        }
    }
}

impl Error for InvariantViolation {}

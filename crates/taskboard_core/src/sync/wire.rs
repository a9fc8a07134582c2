//! Wire payloads of the board protocol.
//!
//! Field names follow the server schema. Ids arrive as numbers, floats or
//! numeric strings; `BoardId`/`TaskId` accept all three.

use crate::model::board::{Board, BoardId, Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
}

/// One entry of the `boards` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPayload {
    pub id: BoardId,
    pub title: String,
    #[serde(default)]
    pub tasks: Vec<TaskPayload>,
}

impl BoardPayload {
    /// Splits the nested payload into normalized board and task records.
    pub fn into_records(self) -> (Board, Vec<Task>) {
        let board_id = self.id;
        let tasks = self
            .tasks
            .into_iter()
            .map(|task| Task::new(task.id, board_id, task.title, task.status))
            .collect();
        (Board::new(board_id, self.title), tasks)
    }
}

/// Flattens a `boards` query result.
pub fn normalize_boards(payload: Vec<BoardPayload>) -> (Vec<Board>, Vec<Task>) {
    let mut boards = Vec::with_capacity(payload.len());
    let mut tasks = Vec::new();
    for board in payload {
        let (board, board_tasks) = board.into_records();
        boards.push(board);
        tasks.extend(board_tasks);
    }
    (boards, tasks)
}

/// `createTask` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTaskPayload {
    pub id: TaskId,
    pub title: String,
}

/// `createBoard` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedBoardPayload {
    pub id: BoardId,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::{normalize_boards, BoardPayload};
    use crate::model::board::{BoardId, TaskId, TaskStatus};
    use crate::model::event::TaskChanged;

    #[test]
    fn boards_payload_with_string_ids_normalizes() {
        let body = r#"[{"id":"1","title":"Sprint","tasks":[
            {"id":"7","title":"a","status":"TODO"},
            {"id":8,"title":"b","status":"IN_PROGRESS"}]},
            {"id":2.0,"title":"Empty"}]"#;
        let payload: Vec<BoardPayload> = serde_json::from_str(body).unwrap();
        let (boards, tasks) = normalize_boards(payload);
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[1].id, BoardId::new(2));
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].id, TaskId::new(8));
        assert_eq!(tasks[1].board_id, BoardId::new(1));
        assert_eq!(tasks[1].status, TaskStatus::InProgress);
    }

    #[test]
    fn unknown_status_fails_to_decode() {
        let body = r#"{"id":7,"title":"x","status":"BLOCKED"}"#;
        assert!(serde_json::from_str::<TaskChanged>(body).is_err());
        let body = r#"{"id":7,"title":"x","status":"DONE"}"#;
        let event: TaskChanged = serde_json::from_str(body).unwrap();
        assert_eq!(event.status, TaskStatus::Done);
    }
}

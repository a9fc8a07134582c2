//! In-process board server implementing `BoardTransport`.
//!
//! Backs the CLI demo and tests. Supports simulated remote actors and
//! fault injection for the next gated call (query, mutation or subscribe).

use crate::model::board::{BoardId, Task, TaskId, TaskStatus};
use crate::model::event::TaskChanged;
use crate::sync::transport::{BoardTransport, TaskChangedStream, TransportError, TransportResult};
use crate::sync::wire::{BoardPayload, CreatedBoardPayload, CreatedTaskPayload, TaskPayload};
use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Failure injected into the next gated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fails with `TransportError::Network`.
    Network,
    /// Server answers `false` (or rejects a create).
    Decline,
    /// Never answers; the caller's timeout fires.
    Hang,
}

#[derive(Debug, Clone)]
struct StoredTask {
    board_id: BoardId,
    title: String,
    status: TaskStatus,
}

struct ServerState {
    boards: BTreeMap<BoardId, String>,
    tasks: BTreeMap<TaskId, StoredTask>,
    next_board_id: i64,
    next_task_id: i64,
    faults: VecDeque<Fault>,
    latency: Duration,
    events: broadcast::Sender<(BoardId, TaskChanged)>,
}

impl ServerState {
    fn publish(&self, task_id: TaskId) {
        if let Some(task) = self.tasks.get(&task_id) {
            let event = TaskChanged {
                id: task_id,
                title: task.title.clone(),
                status: task.status,
            };
            // No subscribers is fine.
            let _ = self.events.send((task.board_id, event));
        }
    }
}

pub struct MemoryBoardServer {
    state: Mutex<ServerState>,
}

impl Default for MemoryBoardServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBoardServer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(ServerState {
                boards: BTreeMap::new(),
                tasks: BTreeMap::new(),
                next_board_id: 1,
                next_task_id: 1,
                faults: VecDeque::new(),
                latency: Duration::ZERO,
                events,
            }),
        }
    }

    pub fn add_board(&self, title: &str) -> BoardId {
        let mut state = self.lock();
        let id = BoardId::new(state.next_board_id);
        state.next_board_id += 1;
        state.boards.insert(id, title.to_string());
        id
    }

    /// Seeds a task without publishing an event.
    pub fn add_task(&self, board_id: BoardId, title: &str, status: TaskStatus) -> Option<TaskId> {
        let mut state = self.lock();
        insert_task(&mut state, board_id, title, status)
    }

    /// Another actor creates a task; subscribers of the board are notified.
    pub fn remote_create(&self, board_id: BoardId, title: &str) -> Option<TaskId> {
        let mut state = self.lock();
        let id = insert_task(&mut state, board_id, title, TaskStatus::Todo)?;
        state.publish(id);
        Some(id)
    }

    /// Another actor edits a task; subscribers of its board are notified.
    pub fn remote_update(&self, task_id: TaskId, title: Option<&str>, status: TaskStatus) -> bool {
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return false;
        };
        if let Some(title) = title {
            task.title = title.to_string();
        }
        task.status = status;
        state.publish(task_id);
        true
    }

    /// Another actor deletes a task. Deletions are never pushed.
    pub fn remote_delete(&self, task_id: TaskId) -> bool {
        self.lock().tasks.remove(&task_id).is_some()
    }

    /// Ends every open subscription stream.
    pub fn disconnect_subscribers(&self) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        self.lock().events = events;
    }

    /// Makes the next gated call fail with `fault`. Faults queue up in order.
    pub fn fail_next(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        self.lock()
            .tasks
            .get(&task_id)
            .map(|task| Task::new(task_id, task.board_id, task.title.clone(), task.status))
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn has_board(&self, board_id: BoardId) -> bool {
        self.lock().boards.contains_key(&board_id)
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies latency and the next queued fault.
    ///
    /// Returns `Ok(false)` when the call must be declined.
    async fn gate(&self, operation: &str) -> TransportResult<bool> {
        let (fault, latency) = {
            let mut state = self.lock();
            (state.faults.pop_front(), state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match fault {
            None => Ok(true),
            Some(Fault::Decline) => Ok(false),
            Some(Fault::Network) => {
                debug!("event=fault_injected module=memory_server op={operation} fault=network");
                Err(TransportError::Network(format!("{operation}: connection reset")))
            }
            Some(Fault::Hang) => {
                debug!("event=fault_injected module=memory_server op={operation} fault=hang");
                futures::future::pending().await
            }
        }
    }
}

fn insert_task(
    state: &mut ServerState,
    board_id: BoardId,
    title: &str,
    status: TaskStatus,
) -> Option<TaskId> {
    if !state.boards.contains_key(&board_id) {
        return None;
    }
    let id = TaskId::new(state.next_task_id);
    state.next_task_id += 1;
    state.tasks.insert(
        id,
        StoredTask {
            board_id,
            title: title.to_string(),
            status,
        },
    );
    Some(id)
}

#[async_trait]
impl BoardTransport for MemoryBoardServer {
    async fn fetch_boards(&self) -> TransportResult<Vec<BoardPayload>> {
        if !self.gate("boards").await? {
            return Err(TransportError::Rejected("boards query declined".to_string()));
        }
        let state = self.lock();
        Ok(state
            .boards
            .iter()
            .map(|(board_id, title)| BoardPayload {
                id: *board_id,
                title: title.clone(),
                tasks: state
                    .tasks
                    .iter()
                    .filter(|(_, task)| task.board_id == *board_id)
                    .map(|(id, task)| TaskPayload {
                        id: *id,
                        title: task.title.clone(),
                        status: task.status,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn create_task(
        &self,
        board_id: BoardId,
        title: &str,
    ) -> TransportResult<CreatedTaskPayload> {
        if !self.gate("create_task").await? {
            return Err(TransportError::Rejected("create_task declined".to_string()));
        }
        let mut state = self.lock();
        if title.trim().is_empty() {
            return Err(TransportError::Rejected("title must not be empty".to_string()));
        }
        let id = insert_task(&mut state, board_id, title, TaskStatus::Todo)
            .ok_or_else(|| TransportError::Rejected(format!("board {board_id} not found")))?;
        state.publish(id);
        Ok(CreatedTaskPayload {
            id,
            title: title.to_string(),
        })
    }

    async fn move_task(&self, task_id: TaskId, status: TaskStatus) -> TransportResult<bool> {
        if !self.gate("move_task").await? {
            return Ok(false);
        }
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Err(TransportError::Rejected(format!("task {task_id} not found")));
        };
        task.status = status;
        state.publish(task_id);
        Ok(true)
    }

    async fn delete_task(&self, task_id: TaskId) -> TransportResult<bool> {
        if !self.gate("delete_task").await? {
            return Ok(false);
        }
        Ok(self.lock().tasks.remove(&task_id).is_some())
    }

    async fn create_board(&self, title: &str) -> TransportResult<CreatedBoardPayload> {
        if !self.gate("create_board").await? {
            return Err(TransportError::Rejected("create_board declined".to_string()));
        }
        if title.trim().is_empty() {
            return Err(TransportError::Rejected("title must not be empty".to_string()));
        }
        let id = self.add_board(title);
        Ok(CreatedBoardPayload {
            id,
            title: title.to_string(),
        })
    }

    async fn delete_board(&self, board_id: BoardId) -> TransportResult<bool> {
        if !self.gate("delete_board").await? {
            return Ok(false);
        }
        let mut state = self.lock();
        if state.boards.remove(&board_id).is_none() {
            return Ok(false);
        }
        state.tasks.retain(|_, task| task.board_id != board_id);
        Ok(true)
    }

    async fn subscribe_task_changed(&self, board_id: BoardId) -> TransportResult<TaskChangedStream> {
        if !self.gate("subscribe").await? {
            return Err(TransportError::Rejected("subscription refused".to_string()));
        }
        let receiver = self.lock().events.subscribe();
        let stream = futures::stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok((scope, event)) if scope == board_id => return Some((Ok(event), receiver)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let error = TransportError::Network(format!(
                            "subscription lagged by {skipped} events"
                        ));
                        return Some((Err(error), receiver));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

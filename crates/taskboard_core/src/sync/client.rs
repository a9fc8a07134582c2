//! Async board client driver.
//!
//! # Responsibility
//! - Serialize every store change through one worker task fed by a bounded
//!   command queue.
//! - Run network calls off the worker and feed their results back as
//!   commands, so staging, settlement and event merging never interleave.
//! - Keep one subscription per watched board alive, resyncing after every
//!   (re)connect.
//! - Drop a watch whose first connection fails, so the next `watch_board`
//!   starts over.
//!
//! # Invariants
//! - The worker is the only owner of the `Reconciler`.
//! - Every mutation settles exactly once: with the server answer, with a
//!   transport error, or with `MutationError::Timeout`.
//! - A subscription is opened before the snapshot it is paired with is
//!   fetched, so no change falls between the two.

use crate::config::ClientConfig;
use crate::model::board::{BoardId, TaskId, TaskStatus};
use crate::model::event::TaskChanged;
use crate::model::mutation::{EntityId, IssuedMutation, MutationResponse, MutationToken};
use crate::service::drag::{DragError, DragStateMachine, MoveIntent};
use crate::service::mutation_applier::{MutationError, PendingKind, Settlement, StagedMove};
use crate::service::reconciler::Reconciler;
use crate::store::snapshot::{BoardSnapshot, BoardView};
use crate::sync::transport::{
    send_mutation, BoardTransport, TaskChangedStream, TransportError, TransportResult,
};
use crate::sync::wire::BoardPayload;
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Errors returned by `BoardClient` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    Mutation(MutationError),
    Transport(TransportError),
    Drag(DragError),
    /// Worker stopped before answering.
    Closed,
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mutation(err) => write!(f, "{err}"),
            Self::Transport(err) => write!(f, "{err}"),
            Self::Drag(err) => write!(f, "{err}"),
            Self::Closed => write!(f, "board client is closed"),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Mutation(err) => Some(err),
            Self::Transport(err) => Some(err),
            Self::Drag(err) => Some(err),
            Self::Closed => None,
        }
    }
}

impl From<MutationError> for ClientError {
    fn from(value: MutationError) -> Self {
        Self::Mutation(value)
    }
}

impl From<TransportError> for ClientError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<DragError> for ClientError {
    fn from(value: DragError) -> Self {
        Self::Drag(value)
    }
}

/// How a drag ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// Dropped outside any column; nothing was sent.
    Cancelled,
    /// Move confirmed by the server (or already in place).
    Moved { task_id: TaskId, status: TaskStatus },
}

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

enum Command {
    Load {
        reply: Reply<()>,
    },
    Loaded {
        result: TransportResult<Vec<BoardPayload>>,
        reply: Reply<()>,
    },
    /// Snapshot fetched right after a subscription opened, or the error that
    /// prevented the first connection.
    Connected {
        board_id: BoardId,
        result: TransportResult<Vec<BoardPayload>>,
    },
    Watch {
        board_id: BoardId,
        reply: Reply<()>,
    },
    Remote {
        board_id: BoardId,
        event: TaskChanged,
    },
    StreamEnded {
        board_id: BoardId,
        error: Option<TransportError>,
    },
    Create {
        board_id: BoardId,
        title: String,
        reply: Reply<TaskId>,
    },
    Move {
        task_id: TaskId,
        status: TaskStatus,
        reply: Reply<TaskId>,
    },
    Delete {
        task_id: TaskId,
        reply: Reply<TaskId>,
    },
    CreateBoard {
        title: String,
        reply: Reply<BoardId>,
    },
    DeleteBoard {
        board_id: BoardId,
        reply: Reply<BoardId>,
    },
    Settled {
        token: MutationToken,
        result: Result<MutationResponse, MutationError>,
    },
    DragBegin {
        task_id: TaskId,
        reply: Reply<()>,
    },
    DragDrop {
        target: Option<String>,
        reply: Reply<DropOutcome>,
    },
    DragCancel {
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Caller waiting on a mutation result.
enum Waiter {
    Task(Reply<TaskId>),
    Board(Reply<BoardId>),
    Dragged { intent: MoveIntent, reply: Reply<DropOutcome> },
}

impl Waiter {
    fn complete(self, result: Result<EntityId, MutationError>) {
        // A dropped receiver means the caller stopped waiting.
        match self {
            Self::Task(reply) => {
                let _ = reply.send(match result {
                    Ok(EntityId::Task(task_id)) => Ok(task_id),
                    Ok(other) => Err(unexpected_target(other)),
                    Err(err) => Err(err.into()),
                });
            }
            Self::Board(reply) => {
                let _ = reply.send(match result {
                    Ok(EntityId::Board(board_id)) => Ok(board_id),
                    Ok(other) => Err(unexpected_target(other)),
                    Err(err) => Err(err.into()),
                });
            }
            Self::Dragged { intent, reply } => {
                let _ = reply.send(
                    result
                        .map(|_| DropOutcome::Moved {
                            task_id: intent.task_id,
                            status: intent.to_status,
                        })
                        .map_err(ClientError::Mutation),
                );
            }
        }
    }
}

/// Handle to a running board client. Cheap to clone.
#[derive(Clone)]
pub struct BoardClient {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<BoardSnapshot>>,
}

impl BoardClient {
    /// Starts the worker on the current tokio runtime.
    ///
    /// The worker stops on `shutdown` or when every handle is dropped.
    pub fn spawn(
        transport: Arc<dyn BoardTransport>,
        config: ClientConfig,
    ) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(config.command_queue_capacity);
        let reconciler = Reconciler::new();
        let snapshots = reconciler.subscribe();
        let worker = Worker {
            transport,
            config,
            reconciler,
            drag: DragStateMachine::new(),
            waiters: HashMap::new(),
            subscriptions: HashMap::new(),
            feedback: commands.downgrade(),
        };
        let handle = tokio::spawn(worker.run(receiver));
        (
            Self {
                commands,
                snapshots,
            },
            handle,
        )
    }

    /// Latest committed snapshot.
    pub fn snapshot(&self) -> Arc<BoardSnapshot> {
        let current = self.snapshots.borrow();
        Arc::clone(&*current)
    }

    pub fn board_view(&self, board_id: BoardId) -> Option<BoardView> {
        self.snapshot().board_view(board_id)
    }

    /// Receiver notified on every committed snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BoardSnapshot>> {
        self.snapshots.clone()
    }

    /// Fetches all boards and replaces local content.
    pub async fn load(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Load { reply }).await
    }

    /// Subscribes to `board_id` and resolves once the paired snapshot is merged.
    ///
    /// Concurrent calls for one board share the subscription and all wait for
    /// its first snapshot. When the first connection fails every caller gets
    /// the error and nothing stays registered.
    pub async fn watch_board(&self, board_id: BoardId) -> Result<(), ClientError> {
        self.request(|reply| Command::Watch { board_id, reply })
            .await
    }

    /// Creates a task and returns its server id.
    pub async fn create_task(&self, board_id: BoardId, title: &str) -> Result<TaskId, ClientError> {
        let title = title.to_string();
        self.request(|reply| Command::Create {
            board_id,
            title,
            reply,
        })
        .await
    }

    pub async fn move_task(&self, task_id: TaskId, status: TaskStatus) -> Result<TaskId, ClientError> {
        self.request(|reply| Command::Move {
            task_id,
            status,
            reply,
        })
        .await
    }

    /// `move_task` with a status name such as `"IN_PROGRESS"`.
    pub async fn move_task_named(&self, task_id: TaskId, status: &str) -> Result<TaskId, ClientError> {
        let status = TaskStatus::parse(status).map_err(MutationError::from)?;
        self.move_task(task_id, status).await
    }

    pub async fn delete_task(&self, task_id: TaskId) -> Result<TaskId, ClientError> {
        self.request(|reply| Command::Delete { task_id, reply })
            .await
    }

    /// Creates a board and returns its server id. Nothing is shown before
    /// the server answers.
    pub async fn create_board(&self, title: &str) -> Result<BoardId, ClientError> {
        let title = title.to_string();
        self.request(|reply| Command::CreateBoard { title, reply })
            .await
    }

    /// Deletes a board with its tasks, optimistically.
    pub async fn delete_board(&self, board_id: BoardId) -> Result<BoardId, ClientError> {
        self.request(|reply| Command::DeleteBoard { board_id, reply })
            .await
    }

    pub async fn drag_begin(&self, task_id: TaskId) -> Result<(), ClientError> {
        self.request(|reply| Command::DragBegin { task_id, reply })
            .await
    }

    /// Ends the active drag over `target` and waits for the resulting move.
    pub async fn drag_drop(&self, target: Option<&str>) -> Result<DropOutcome, ClientError> {
        let target = target.map(str::to_string);
        self.request(|reply| Command::DragDrop { target, reply })
            .await
    }

    pub async fn drag_cancel(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::DragCancel { reply }).await
    }

    /// Stops the worker. Outstanding callers receive `ClientError::Closed`.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| ClientError::Closed)?;
        receiver.await.map_err(|_| ClientError::Closed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ClientError::Closed)?;
        receiver.await.map_err(|_| ClientError::Closed)?
    }
}

/// Live subscription task of one watched board.
struct Subscription {
    handle: JoinHandle<()>,
    /// Set once the first paired snapshot was merged.
    connected: bool,
    /// `watch_board` callers waiting for that snapshot.
    waiting: Vec<Reply<()>>,
}

struct Worker {
    transport: Arc<dyn BoardTransport>,
    config: ClientConfig,
    reconciler: Reconciler,
    drag: DragStateMachine,
    waiters: HashMap<MutationToken, Vec<Waiter>>,
    subscriptions: HashMap<BoardId, Subscription>,
    feedback: mpsc::WeakSender<Command>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        info!(
            "event=client_start module=client status=ok queue_capacity={} timeout_ms={}",
            self.config.command_queue_capacity,
            self.config.mutation_timeout.as_millis()
        );
        while let Some(command) = receiver.recv().await {
            if let Command::Shutdown { reply } = command {
                let _ = reply.send(());
                break;
            }
            self.handle(command);
        }
        for (_, subscription) in self.subscriptions.drain() {
            subscription.handle.abort();
        }
        info!(
            "event=client_stop module=client status=ok pending={} waiters={}",
            self.reconciler.pending_count(),
            self.waiters.len()
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Load { reply } => self.spawn_load(reply),
            Command::Loaded { result, reply } => self.on_loaded(result, reply),
            Command::Connected { board_id, result } => self.on_connected(board_id, result),
            Command::Watch { board_id, reply } => self.watch(board_id, reply),
            Command::Remote { board_id, event } => {
                let outcome = self.reconciler.merge_event(board_id, event);
                debug!("event=remote_event module=client status=ok board_id={board_id} outcome={outcome:?}");
            }
            Command::StreamEnded { board_id, error } => match error {
                Some(err) => warn!(
                    "event=subscription_end module=client status=error board_id={board_id} error={err}"
                ),
                None => info!("event=subscription_end module=client status=closed board_id={board_id}"),
            },
            Command::Create {
                board_id,
                title,
                reply,
            } => match self.reconciler.create_task(board_id, &title) {
                Ok(issued) => self.dispatch(issued, Waiter::Task(reply)),
                Err(err) => {
                    let _ = reply.send(Err(err.into()));
                }
            },
            Command::Move {
                task_id,
                status,
                reply,
            } => match self.reconciler.move_task(task_id, status) {
                Ok(staged) => self.track_move(task_id, staged, Waiter::Task(reply)),
                Err(err) => {
                    let _ = reply.send(Err(err.into()));
                }
            },
            Command::Delete { task_id, reply } => match self.reconciler.delete_task(task_id) {
                Ok(issued) => self.dispatch(issued, Waiter::Task(reply)),
                Err(err) => {
                    let _ = reply.send(Err(err.into()));
                }
            },
            Command::CreateBoard { title, reply } => match self.reconciler.create_board(&title) {
                Ok(issued) => self.dispatch(issued, Waiter::Board(reply)),
                Err(err) => {
                    let _ = reply.send(Err(err.into()));
                }
            },
            Command::DeleteBoard { board_id, reply } => {
                match self.reconciler.delete_board(board_id) {
                    Ok(issued) => self.dispatch(issued, Waiter::Board(reply)),
                    Err(err) => {
                        let _ = reply.send(Err(err.into()));
                    }
                }
            }
            Command::Settled { token, result } => self.settle(token, result),
            Command::DragBegin { task_id, reply } => {
                let _ = reply.send(self.drag.begin(task_id).map_err(ClientError::from));
            }
            Command::DragDrop { target, reply } => self.drag_drop(target, reply),
            Command::DragCancel { reply } => {
                let _ = reply.send(self.drag.cancel().map_err(ClientError::from));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn drag_drop(&mut self, target: Option<String>, reply: Reply<DropOutcome>) {
        let reconciler = &mut self.reconciler;
        let resolved = self.drag.drop(target.as_deref(), |intent| {
            reconciler
                .move_task(intent.task_id, intent.to_status)
                .map(|staged| (intent, staged))
        });
        match resolved {
            Err(err) => {
                let _ = reply.send(Err(err.into()));
            }
            Ok(None) => {
                let _ = reply.send(Ok(DropOutcome::Cancelled));
            }
            Ok(Some(Err(err))) => {
                let _ = reply.send(Err(err.into()));
            }
            Ok(Some(Ok((intent, staged)))) => {
                self.track_move(intent.task_id, staged, Waiter::Dragged { intent, reply });
            }
        }
    }

    fn track_move(&mut self, task_id: TaskId, staged: StagedMove, waiter: Waiter) {
        match staged {
            StagedMove::Unchanged => waiter.complete(Ok(EntityId::Task(task_id))),
            StagedMove::Issued(issued) => {
                if let Some(previous) = issued.supersedes {
                    // Earlier callers now wait on the re-targeted move.
                    if let Some(earlier) = self.waiters.remove(&previous) {
                        self.waiters.entry(issued.token).or_default().extend(earlier);
                    }
                }
                self.dispatch(issued, waiter);
            }
        }
    }

    fn dispatch(&mut self, issued: IssuedMutation, waiter: Waiter) {
        self.waiters.entry(issued.token).or_default().push(waiter);

        let transport = Arc::clone(&self.transport);
        let feedback = self.feedback.clone();
        let timeout = self.config.mutation_timeout;
        tokio::spawn(async move {
            let token = issued.token;
            let result =
                match tokio::time::timeout(timeout, send_mutation(transport.as_ref(), &issued.request))
                    .await
                {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(err)) => Err(MutationError::from(err)),
                    Err(_) => Err(MutationError::Timeout {
                        elapsed_ms: millis(timeout),
                    }),
                };
            forward(&feedback, Command::Settled { token, result }).await;
        });
    }

    fn settle(&mut self, token: MutationToken, result: Result<MutationResponse, MutationError>) {
        match self.reconciler.settle(token, result) {
            Settlement::Committed {
                token,
                target,
                kind,
                ..
            } => {
                if let PendingKind::DeleteBoard { board_id } = kind {
                    self.unwatch(board_id);
                }
                self.complete(token, Ok(target));
            }
            Settlement::RolledBack { token, error, .. } => self.complete(token, Err(error)),
            Settlement::Superseded { .. } | Settlement::Unknown { .. } => {}
        }
    }

    fn complete(&mut self, token: MutationToken, result: Result<EntityId, MutationError>) {
        for waiter in self.waiters.remove(&token).unwrap_or_default() {
            waiter.complete(result.clone());
        }
    }

    fn spawn_load(&self, reply: Reply<()>) {
        let transport = Arc::clone(&self.transport);
        let feedback = self.feedback.clone();
        let timeout = self.config.mutation_timeout;
        tokio::spawn(async move {
            let result = fetch_with_timeout(transport.as_ref(), timeout).await;
            forward(&feedback, Command::Loaded { result, reply }).await;
        });
    }

    fn on_loaded(&mut self, result: TransportResult<Vec<BoardPayload>>, reply: Reply<()>) {
        let result = match result {
            Ok(payload) => {
                let effect = self.reconciler.load_payload(payload);
                debug!("event=load module=client status=ok changed={}", effect.is_changed());
                Ok(())
            }
            Err(err) => {
                warn!("event=load module=client status=error error={err}");
                Err(ClientError::Transport(err))
            }
        };
        let _ = reply.send(result);
    }

    fn on_connected(&mut self, board_id: BoardId, result: TransportResult<Vec<BoardPayload>>) {
        let Some(subscription) = self.subscriptions.get_mut(&board_id) else {
            debug!("event=watch module=client status=stale board_id={board_id}");
            return;
        };
        match result {
            Ok(payload) => {
                let effect = self.reconciler.load_payload(payload);
                subscription.connected = true;
                info!(
                    "event=watch module=client status=connected board_id={board_id} changed={}",
                    effect.is_changed()
                );
                for reply in subscription.waiting.drain(..) {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(err) if subscription.connected => {
                warn!("event=watch module=client status=refetch_error board_id={board_id} error={err}");
            }
            Err(err) => {
                warn!("event=watch module=client status=error board_id={board_id} error={err}");
                if let Some(subscription) = self.subscriptions.remove(&board_id) {
                    subscription.handle.abort();
                    for reply in subscription.waiting {
                        let _ = reply.send(Err(ClientError::Transport(err.clone())));
                    }
                }
            }
        }
    }

    fn watch(&mut self, board_id: BoardId, reply: Reply<()>) {
        if let Some(existing) = self.subscriptions.get_mut(&board_id) {
            if !existing.handle.is_finished() {
                if existing.connected {
                    let _ = reply.send(Ok(()));
                } else {
                    existing.waiting.push(reply);
                }
                return;
            }
        }
        info!("event=watch module=client status=start board_id={board_id}");
        let handle = tokio::spawn(run_subscription(
            Arc::clone(&self.transport),
            board_id,
            self.feedback.clone(),
            self.config.mutation_timeout,
            self.config.reconnect_delay,
        ));
        self.subscriptions.insert(
            board_id,
            Subscription {
                handle,
                connected: false,
                waiting: vec![reply],
            },
        );
    }

    /// Stops the subscription of a board that no longer exists.
    fn unwatch(&mut self, board_id: BoardId) {
        if let Some(subscription) = self.subscriptions.remove(&board_id) {
            subscription.handle.abort();
            for reply in subscription.waiting {
                let _ = reply.send(Err(MutationError::BoardNotFound(board_id).into()));
            }
            info!("event=watch module=client status=stopped board_id={board_id}");
        }
    }
}

/// Subscribe, fetch, forward events; on stream end wait and start over.
///
/// A failure before the first snapshot ends the task; later failures retry.
async fn run_subscription(
    transport: Arc<dyn BoardTransport>,
    board_id: BoardId,
    feedback: mpsc::WeakSender<Command>,
    timeout: Duration,
    reconnect_delay: Duration,
) {
    let mut connected = false;
    loop {
        let ended = match subscribe_with_timeout(transport.as_ref(), board_id, timeout).await {
            Ok(mut stream) => {
                let result = fetch_with_timeout(transport.as_ref(), timeout).await;
                let fetched = result.is_ok();
                if !forward(&feedback, Command::Connected { board_id, result }).await {
                    return;
                }
                if !connected && !fetched {
                    return;
                }
                connected = true;
                let mut error = None;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            if !forward(&feedback, Command::Remote { board_id, event }).await {
                                return;
                            }
                        }
                        Err(err) => {
                            error = Some(err);
                            break;
                        }
                    }
                }
                Command::StreamEnded { board_id, error }
            }
            Err(err) if !connected => {
                forward(&feedback, Command::Connected { board_id, result: Err(err) }).await;
                return;
            }
            Err(err) => Command::StreamEnded {
                board_id,
                error: Some(err),
            },
        };
        if !forward(&feedback, ended).await {
            return;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn subscribe_with_timeout(
    transport: &dyn BoardTransport,
    board_id: BoardId,
    timeout: Duration,
) -> TransportResult<TaskChangedStream> {
    match tokio::time::timeout(timeout, transport.subscribe_task_changed(board_id)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Network(format!(
            "subscription to board {board_id} timed out after {} ms",
            millis(timeout)
        ))),
    }
}

async fn fetch_with_timeout(
    transport: &dyn BoardTransport,
    timeout: Duration,
) -> TransportResult<Vec<BoardPayload>> {
    match tokio::time::timeout(timeout, transport.fetch_boards()).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Network(format!(
            "boards query timed out after {} ms",
            millis(timeout)
        ))),
    }
}

/// Sends `command` to the worker; `false` once the worker is gone.
async fn forward(feedback: &mpsc::WeakSender<Command>, command: Command) -> bool {
    match feedback.upgrade() {
        Some(sender) => sender.send(command).await.is_ok(),
        None => false,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn unexpected_target(target: EntityId) -> ClientError {
    ClientError::Mutation(MutationError::Rejected(format!(
        "unexpected mutation result {target}"
    )))
}

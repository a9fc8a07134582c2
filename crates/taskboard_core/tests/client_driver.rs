use std::sync::Arc;
use std::time::Duration;
use taskboard_core::{
    BoardClient, BoardId, BoardSnapshot, BoardTransport, ClientConfig, ClientError, DragError,
    DropOutcome, Fault, MemoryBoardServer, MutationError, TaskId, TaskStatus,
    TaskValidationError, TransportError,
};

struct Harness {
    server: Arc<MemoryBoardServer>,
    board: BoardId,
    task: TaskId,
    client: BoardClient,
}

fn harness() -> Harness {
    let server = Arc::new(MemoryBoardServer::new());
    let board = server.add_board("Sprint");
    let task = server
        .add_task(board, "Write docs", TaskStatus::Todo)
        .expect("seeded task");
    let transport: Arc<dyn BoardTransport> = server.clone();
    let (client, _worker) = BoardClient::spawn(transport, ClientConfig::default());
    Harness {
        server,
        board,
        task,
        client,
    }
}

async fn watched_harness() -> Harness {
    let h = harness();
    h.client.watch_board(h.board).await.expect("watch");
    h
}

async fn wait_for(
    client: &BoardClient,
    predicate: impl Fn(&BoardSnapshot) -> bool,
) -> Arc<BoardSnapshot> {
    let mut receiver = client.subscribe();
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let current = Arc::clone(&*receiver.borrow_and_update());
            if predicate(&current) {
                return current;
            }
            receiver.changed().await.expect("client worker alive");
        }
    })
    .await
    .expect("condition reached before timeout")
}

fn status_of(client: &BoardClient, task: TaskId) -> Option<TaskStatus> {
    client.snapshot().task(task).map(|task| task.status)
}

#[tokio::test(start_paused = true)]
async fn watch_loads_snapshot_and_merges_remote_updates() {
    let h = watched_harness().await;
    let view = h.client.board_view(h.board).expect("board loaded");
    assert_eq!(view.column(TaskStatus::Todo).len(), 1);

    assert!(h.server.remote_update(h.task, Some("Docs v2"), TaskStatus::InProgress));
    let snapshot = wait_for(&h.client, |snapshot| {
        snapshot.task(h.task).map(|task| task.status) == Some(TaskStatus::InProgress)
    })
    .await;
    assert_eq!(snapshot.task(h.task).unwrap().title, "Docs v2");
}

#[tokio::test(start_paused = true)]
async fn create_returns_server_id_without_duplicates() {
    let h = watched_harness().await;
    let id = h.client.create_task(h.board, "Ship it").await.unwrap();
    assert!(!id.is_placeholder());

    // Let the pushed echo of the create reach the worker.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = h.client.snapshot();
    assert_eq!(snapshot.task_count(), 2);
    assert!(snapshot.tasks_of(h.board).iter().all(|task| !task.id.is_placeholder()));
    assert_eq!(snapshot.task(id).unwrap().status, TaskStatus::Todo);
    snapshot.check_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn optimistic_move_is_visible_before_confirmation() {
    let h = watched_harness().await;
    h.server.set_latency(Duration::from_secs(2));

    let mover = h.client.clone();
    let task = h.task;
    let pending = tokio::spawn(async move { mover.move_task(task, TaskStatus::Done).await });

    wait_for(&h.client, |snapshot| {
        snapshot.task(task).map(|task| task.status) == Some(TaskStatus::Done)
    })
    .await;
    assert_eq!(h.server.task(task).unwrap().status, TaskStatus::Todo);

    assert_eq!(pending.await.unwrap(), Ok(task));
    assert_eq!(h.server.task(task).unwrap().status, TaskStatus::Done);
    assert_eq!(status_of(&h.client, task), Some(TaskStatus::Done));
}

#[tokio::test(start_paused = true)]
async fn network_failure_rolls_back_move() {
    let h = watched_harness().await;
    h.server.fail_next(Fault::Network);

    let err = h
        .client
        .move_task_named(h.task, "DONE")
        .await
        .expect_err("move must fail");
    assert!(matches!(err, ClientError::Mutation(MutationError::Network(_))));
    assert_eq!(status_of(&h.client, h.task), Some(TaskStatus::Todo));
}

#[tokio::test(start_paused = true)]
async fn declined_move_is_rejected_and_rolled_back() {
    let h = watched_harness().await;
    h.server.fail_next(Fault::Decline);

    let err = h.client.move_task(h.task, TaskStatus::InProgress).await.unwrap_err();
    assert!(matches!(err, ClientError::Mutation(MutationError::Rejected(_))));
    assert_eq!(status_of(&h.client, h.task), Some(TaskStatus::Todo));
}

#[tokio::test(start_paused = true)]
async fn hung_delete_times_out_and_restores_task() {
    let h = watched_harness().await;
    h.server.fail_next(Fault::Hang);
    let before = h.client.snapshot();

    let err = h.client.delete_task(h.task).await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Mutation(MutationError::Timeout { elapsed_ms: 10_000 })
    );
    assert_eq!(*h.client.snapshot(), *before);
    assert!(h.server.task(h.task).is_some());
}

#[tokio::test(start_paused = true)]
async fn invalid_create_never_reaches_the_server() {
    let h = watched_harness().await;
    let err = h.client.create_task(h.board, "   ").await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Mutation(MutationError::Validation(TaskValidationError::EmptyTitle))
    );
    assert_eq!(h.server.task_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn drag_drop_moves_or_cancels() {
    let h = watched_harness().await;

    assert_eq!(
        h.client.drag_drop(Some("DONE")).await,
        Err(ClientError::Drag(DragError::NotDragging))
    );

    h.client.drag_begin(h.task).await.unwrap();
    assert_eq!(
        h.client.drag_begin(h.task).await,
        Err(ClientError::Drag(DragError::AlreadyDragging(h.task)))
    );
    let outcome = h.client.drag_drop(Some("Archive")).await.unwrap();
    assert_eq!(outcome, DropOutcome::Cancelled);
    assert_eq!(status_of(&h.client, h.task), Some(TaskStatus::Todo));

    h.client.drag_begin(h.task).await.unwrap();
    let outcome = h.client.drag_drop(Some("IN_PROGRESS")).await.unwrap();
    assert_eq!(
        outcome,
        DropOutcome::Moved {
            task_id: h.task,
            status: TaskStatus::InProgress,
        }
    );
    assert_eq!(h.server.task(h.task).unwrap().status, TaskStatus::InProgress);
}

#[tokio::test(start_paused = true)]
async fn reconnect_resyncs_missed_deletes() {
    let h = watched_harness().await;
    let other = h
        .server
        .add_task(h.board, "Other", TaskStatus::Done)
        .expect("seeded task");

    h.server.disconnect_subscribers();
    assert!(h.server.remote_delete(h.task));

    let snapshot = wait_for(&h.client, |snapshot| {
        !snapshot.contains_task(h.task) && snapshot.contains_task(other)
    })
    .await;
    assert_eq!(snapshot.task_count(), 1);

    // The new subscription keeps delivering events.
    h.server.remote_update(other, None, TaskStatus::Todo);
    wait_for(&h.client, |snapshot| {
        snapshot.task(other).map(|task| task.status) == Some(TaskStatus::Todo)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn failed_first_watch_can_be_retried() {
    let h = harness();
    h.server.fail_next(Fault::Network);

    let err = h.client.watch_board(h.board).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::Network(_))));
    assert!(h.client.board_view(h.board).is_none());

    h.client.watch_board(h.board).await.unwrap();
    assert_eq!(status_of(&h.client, h.task), Some(TaskStatus::Todo));

    h.server.remote_update(h.task, None, TaskStatus::Done);
    wait_for(&h.client, |snapshot| {
        snapshot.task(h.task).map(|task| task.status) == Some(TaskStatus::Done)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_watches_share_the_first_snapshot() {
    let h = harness();
    h.server.set_latency(Duration::from_secs(1));
    h.server.fail_next(Fault::Network);

    let (first, second) = tokio::join!(
        h.client.watch_board(h.board),
        h.client.watch_board(h.board)
    );
    assert!(matches!(first, Err(ClientError::Transport(TransportError::Network(_)))));
    assert_eq!(first, second);

    let (first, second) = tokio::join!(
        h.client.watch_board(h.board),
        h.client.watch_board(h.board)
    );
    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
    assert_eq!(status_of(&h.client, h.task), Some(TaskStatus::Todo));
}

#[tokio::test(start_paused = true)]
async fn remote_create_during_local_create_keeps_both() {
    let h = watched_harness().await;
    h.server.set_latency(Duration::from_secs(2));

    let creator = h.client.clone();
    let board = h.board;
    let pending = tokio::spawn(async move { creator.create_task(board, "Local").await });
    wait_for(&h.client, |snapshot| {
        snapshot
            .tasks_of(board)
            .iter()
            .any(|task| task.id.is_placeholder())
    })
    .await;

    let remote = h.server.remote_create(board, "Remote").expect("board exists");
    let created = pending.await.unwrap().unwrap();
    assert_ne!(created, remote);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = wait_for(&h.client, |snapshot| {
        snapshot.contains_task(remote) && snapshot.contains_task(created)
    })
    .await;
    assert_eq!(snapshot.task_count(), 3);
    assert!(snapshot.tasks_of(board).iter().all(|task| !task.id.is_placeholder()));
    snapshot.check_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn board_create_and_delete_reach_the_server() {
    let h = watched_harness().await;

    let backlog = h.client.create_board("  Backlog ").await.unwrap();
    assert!(h.server.has_board(backlog));
    assert_eq!(h.client.board_view(backlog).unwrap().board.title, "Backlog");

    h.client.delete_board(h.board).await.unwrap();
    assert!(!h.server.has_board(h.board));
    assert!(h.server.task(h.task).is_none());
    let snapshot = h.client.snapshot();
    assert!(snapshot.board(h.board).is_none());
    assert!(!snapshot.contains_task(h.task));
    assert!(snapshot.board(backlog).is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_board_mutations_leave_the_store_as_it_was() {
    let h = watched_harness().await;
    let before = h.client.snapshot();

    h.server.fail_next(Fault::Decline);
    let err = h.client.create_board("Backlog").await.unwrap_err();
    assert!(matches!(err, ClientError::Mutation(MutationError::Rejected(_))));

    h.server.fail_next(Fault::Network);
    let err = h.client.delete_board(h.board).await.unwrap_err();
    assert!(matches!(err, ClientError::Mutation(MutationError::Network(_))));

    assert_eq!(*h.client.snapshot(), *before);
    assert!(h.server.has_board(h.board));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_client() {
    let h = watched_harness().await;
    h.client.shutdown().await.unwrap();
    assert_eq!(h.client.load().await, Err(ClientError::Closed));
}

//! CLI demo entry point.
//!
//! # Responsibility
//! - Run a scripted board session against the in-process server.
//! - Print the board after each step so ordering rules can be eyeballed.

use log::warn;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use taskboard_core::{
    init_logging, BoardClient, BoardId, BoardTransport, ClientConfig, ClientError, Fault,
    LogTarget, MemoryBoardServer, TaskStatus,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    println!("taskboard_core version={}", taskboard_core::core_version());

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };
    if let Err(err) = init_logging(LogTarget::Stderr, config.log_level) {
        eprintln!("logging disabled: {err}");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("session failed: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ClientConfig) -> Result<(), ClientError> {
    let server = Arc::new(MemoryBoardServer::new());
    let board = server.add_board("Launch");
    for (title, status) in [
        ("Draft release notes", TaskStatus::Todo),
        ("Fix flaky test", TaskStatus::InProgress),
        ("Tag v0.1", TaskStatus::Done),
    ] {
        server.add_task(board, title, status);
    }

    let transport: Arc<dyn BoardTransport> = server.clone();
    let (client, worker) = BoardClient::spawn(transport, config);

    client.watch_board(board).await?;
    print_board(&client, board, "loaded");

    let created = client.create_task(board, "Announce   on the blog").await?;
    print_board(&client, board, &format!("created task {created}"));

    client.drag_begin(created).await?;
    client.drag_drop(Some("IN_PROGRESS")).await?;
    print_board(&client, board, &format!("dragged task {created} to IN_PROGRESS"));

    let mut changes = client.subscribe();
    changes.borrow_and_update();
    server.remote_update(created, Some("Announce on the blog and forum"), TaskStatus::Done);
    if tokio::time::timeout(Duration::from_secs(1), changes.changed())
        .await
        .is_err()
    {
        warn!("event=demo_wait module=cli status=timeout step=remote_update");
    }
    print_board(&client, board, "remote actor finished the announcement");

    client.delete_task(created).await?;
    print_board(&client, board, &format!("deleted task {created}"));

    let archive = client.create_board("Archive").await?;
    print_board(&client, archive, &format!("created board {archive}"));
    client.delete_board(archive).await?;
    print_board(&client, archive, &format!("deleted board {archive}"));

    if let Some(task) = client.snapshot().tasks_of(board).first().map(|task| task.id) {
        server.fail_next(Fault::Network);
        match client.move_task(task, TaskStatus::Done).await {
            Ok(_) => println!("unexpected success moving task {task}"),
            Err(err) => println!("move of task {task} failed: {err}"),
        }
        print_board(&client, board, "after rollback");
    }

    client.shutdown().await?;
    // Worker exit after shutdown is not an error for the demo.
    let _ = worker.await;
    Ok(())
}

fn print_board(client: &BoardClient, board: BoardId, step: &str) {
    println!("== {step}");
    let Some(view) = client.board_view(board) else {
        println!("   (board {board} not loaded)");
        return;
    };
    println!("   {}", view.board.title);
    for column in &view.columns {
        let titles = column
            .tasks
            .iter()
            .map(|task| format!("#{} {}", task.id, task.title))
            .collect::<Vec<_>>();
        println!("   [{}] {}", column.status, titles.join(" | "));
    }
}

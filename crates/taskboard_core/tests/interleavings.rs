//! Property tests over random interleavings of staging, settlement, pushed
//! events and refreshes.

use std::collections::BTreeMap;

use proptest::prelude::*;

use taskboard_core::sync::wire::{BoardPayload, TaskPayload};
use taskboard_core::{
    BoardId, IssuedMutation, MutationError, MutationRequest, MutationResponse, Reconciler,
    Settlement, StagedMove, TaskChanged, TaskId, TaskStatus,
};

// ─── Server model ───────────────────────────────────────────────────────────

struct ServerModel {
    boards: BTreeMap<BoardId, String>,
    tasks: BTreeMap<TaskId, (BoardId, String, TaskStatus)>,
    next_id: i64,
}

impl ServerModel {
    fn seeded() -> Self {
        let mut boards = BTreeMap::new();
        boards.insert(BoardId::new(1), "Sprint".to_string());
        boards.insert(BoardId::new(2), "Backlog".to_string());
        let mut tasks = BTreeMap::new();
        for (id, board) in [(1, 1), (2, 1), (3, 2), (4, 2)] {
            tasks.insert(
                TaskId::new(id),
                (BoardId::new(board), format!("task {id}"), TaskStatus::Todo),
            );
        }
        Self {
            boards,
            tasks,
            next_id: 100,
        }
    }

    fn payload(&self) -> Vec<BoardPayload> {
        self.boards
            .iter()
            .map(|(board_id, title)| BoardPayload {
                id: *board_id,
                title: title.clone(),
                tasks: self
                    .tasks
                    .iter()
                    .filter(|(_, (owner, _, _))| owner == board_id)
                    .map(|(id, (_, title, status))| TaskPayload {
                        id: *id,
                        title: title.clone(),
                        status: *status,
                    })
                    .collect(),
            })
            .collect()
    }

    fn answer(&mut self, request: &MutationRequest) -> Result<MutationResponse, MutationError> {
        match request {
            MutationRequest::CreateTask { board_id, title } => {
                if !self.boards.contains_key(board_id) {
                    return Err(MutationError::Rejected("board not found".to_string()));
                }
                let id = TaskId::new(self.next_id);
                self.next_id += 1;
                self.tasks
                    .insert(id, (*board_id, title.clone(), TaskStatus::Todo));
                Ok(MutationResponse::Created {
                    id,
                    title: title.clone(),
                })
            }
            MutationRequest::MoveTask { task_id, status } => match self.tasks.get_mut(task_id) {
                Some(task) => {
                    task.2 = *status;
                    Ok(MutationResponse::Acknowledged(true))
                }
                None => Err(MutationError::Rejected("task not found".to_string())),
            },
            MutationRequest::DeleteTask { task_id } => Ok(MutationResponse::Acknowledged(
                self.tasks.remove(task_id).is_some(),
            )),
            MutationRequest::CreateBoard { title } => {
                let id = BoardId::new(self.next_id);
                self.next_id += 1;
                self.boards.insert(id, title.clone());
                Ok(MutationResponse::BoardCreated {
                    id,
                    title: title.clone(),
                })
            }
            MutationRequest::DeleteBoard { board_id } => {
                let existed = self.boards.remove(board_id).is_some();
                self.tasks.retain(|_, (owner, _, _)| owner != board_id);
                Ok(MutationResponse::Acknowledged(existed))
            }
        }
    }
}

// ─── Steps ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    Create { board: usize },
    Move { task: usize, status: TaskStatus },
    Delete { task: usize },
    DeleteBoard { board: usize },
    Settle { pick: usize, ok: bool },
    Event { task: usize, status: TaskStatus },
    Resync,
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(vec![TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done])
}

fn arb_local_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => (0..2usize).prop_map(|board| Step::Create { board }),
        4 => (0..8usize, arb_status()).prop_map(|(task, status)| Step::Move { task, status }),
        2 => (0..8usize).prop_map(|task| Step::Delete { task }),
        1 => (0..2usize).prop_map(|board| Step::DeleteBoard { board }),
        4 => (0..8usize).prop_map(|pick| Step::Settle { pick, ok: false }),
    ]
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => (0..2usize).prop_map(|board| Step::Create { board }),
        4 => (0..8usize, arb_status()).prop_map(|(task, status)| Step::Move { task, status }),
        2 => (0..8usize).prop_map(|task| Step::Delete { task }),
        1 => (0..2usize).prop_map(|board| Step::DeleteBoard { board }),
        5 => (0..8usize, any::<bool>()).prop_map(|(pick, ok)| Step::Settle { pick, ok }),
        3 => (0..8usize, arb_status()).prop_map(|(task, status)| Step::Event { task, status }),
        1 => Just(Step::Resync),
    ]
}

// ─── Harness ────────────────────────────────────────────────────────────────

struct World {
    reconciler: Reconciler,
    server: ServerModel,
    outstanding: Vec<IssuedMutation>,
    confirmed_placeholders: Vec<TaskId>,
}

impl World {
    fn new() -> Self {
        let server = ServerModel::seeded();
        let mut reconciler = Reconciler::new();
        reconciler.load_payload(server.payload());
        Self {
            reconciler,
            server,
            outstanding: Vec::new(),
            confirmed_placeholders: Vec::new(),
        }
    }

    fn visible_tasks(&self) -> Vec<TaskId> {
        let snapshot = self.reconciler.read();
        snapshot
            .boards()
            .flat_map(|board| snapshot.tasks_of(board.id))
            .map(|task| task.id)
            .filter(|id| !id.is_placeholder())
            .collect()
    }

    fn apply(&mut self, step: Step) -> Result<(), TestCaseError> {
        match step {
            Step::Create { board } => {
                let board_id = BoardId::new(board as i64 + 1);
                if let Ok(issued) = self.reconciler.create_task(board_id, "draft") {
                    self.outstanding.push(issued);
                }
            }
            Step::Move { task, status } => {
                let visible = self.visible_tasks();
                if let Some(id) = pick(&visible, task) {
                    if let Ok(StagedMove::Issued(issued)) = self.reconciler.move_task(id, status) {
                        self.outstanding.push(issued);
                    }
                }
            }
            Step::Delete { task } => {
                let visible = self.visible_tasks();
                if let Some(id) = pick(&visible, task) {
                    if let Ok(issued) = self.reconciler.delete_task(id) {
                        self.outstanding.push(issued);
                    }
                }
            }
            Step::DeleteBoard { board } => {
                if let Ok(issued) = self.reconciler.delete_board(BoardId::new(board as i64 + 1)) {
                    self.outstanding.push(issued);
                }
            }
            Step::Settle { pick: index, ok } => {
                if !self.outstanding.is_empty() {
                    let issued = self.outstanding.remove(index % self.outstanding.len());
                    self.settle(issued, ok);
                }
            }
            Step::Event { task, status } => {
                let known = self.server.tasks.keys().copied().collect::<Vec<_>>();
                if let Some(id) = pick(&known, task) {
                    let Some(entry) = self.server.tasks.get_mut(&id) else {
                        return Ok(());
                    };
                    entry.2 = status;
                    let (board_id, title, _) = entry.clone();
                    let event = TaskChanged { id, title, status };

                    self.reconciler.merge_event(board_id, event.clone());
                    let once = self.reconciler.read();
                    self.reconciler.merge_event(board_id, event);
                    prop_assert_eq!(&*self.reconciler.read(), &*once);
                }
            }
            Step::Resync => {
                self.reconciler.load_payload(self.server.payload());
            }
        }
        Ok(())
    }

    fn settle(&mut self, issued: IssuedMutation, ok: bool) {
        let result = if ok {
            self.server.answer(&issued.request)
        } else {
            Err(MutationError::Timeout { elapsed_ms: 10 })
        };
        let settlement = self.reconciler.settle(issued.token, result);
        if let (Some(placeholder), Settlement::Committed { .. }) = (issued.placeholder, &settlement) {
            self.confirmed_placeholders.push(placeholder);
        }
    }

    fn check(&self) -> Result<(), TestCaseError> {
        let snapshot = self.reconciler.read();
        prop_assert_eq!(snapshot.check_invariants(), Ok(()));
        for placeholder in &self.confirmed_placeholders {
            prop_assert!(
                !snapshot.contains_task(*placeholder),
                "confirmed placeholder {} still visible",
                placeholder
            );
        }
        Ok(())
    }
}

fn pick(ids: &[TaskId], index: usize) -> Option<TaskId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[index % ids.len()])
    }
}

// ─── Properties ─────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Membership holds after every step, confirmed placeholders never come
    /// back, and once everything settles no event is left waiting.
    #[test]
    fn interleavings_keep_the_store_consistent(
        steps in prop::collection::vec(arb_step(), 1..60),
        drain_seed in any::<usize>(),
    ) {
        let mut world = World::new();
        for step in steps {
            world.apply(step)?;
            world.check()?;
        }
        while !world.outstanding.is_empty() {
            let issued = world.outstanding.remove(drain_seed % world.outstanding.len());
            world.settle(issued, true);
            world.check()?;
        }
        prop_assert_eq!(world.reconciler.pending_count(), 0);
        prop_assert_eq!(world.reconciler.queued_events(), 0);
    }

    /// Without remote input, failing every mutation in any order leaves the
    /// store exactly as loaded.
    #[test]
    fn failures_in_any_order_restore_the_loaded_store(
        steps in prop::collection::vec(arb_local_step(), 1..40),
        drain_seed in any::<usize>(),
    ) {
        let mut world = World::new();
        let loaded = world.reconciler.read();
        for step in steps {
            world.apply(step)?;
            world.check()?;
        }
        while !world.outstanding.is_empty() {
            let issued = world.outstanding.remove(drain_seed % world.outstanding.len());
            world.settle(issued, false);
        }
        prop_assert_eq!(world.reconciler.pending_count(), 0);
        prop_assert_eq!(&*world.reconciler.read(), &*loaded);
    }
}

//! Drag interaction state machine.
//!
//! Collapses gesture callbacks into begin/drop/cancel and emits at most one
//! move intent per drag.

use crate::model::board::{TaskId, TaskStatus};
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging(TaskId),
    Resolving(TaskId, TaskStatus),
}

/// Intent handed to the mutation applier when a drag lands on a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveIntent {
    pub task_id: TaskId,
    pub to_status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragError {
    /// `begin` while another drag is active.
    AlreadyDragging(TaskId),
    /// `drop`/`cancel` without an active drag.
    NotDragging,
}

impl Display for DragError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyDragging(id) => write!(f, "task {id} is already being dragged"),
            Self::NotDragging => write!(f, "no drag in progress"),
        }
    }
}

impl Error for DragError {}

#[derive(Debug, Default)]
pub struct DragStateMachine {
    state: DragState,
}

impl DragStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn begin(&mut self, task_id: TaskId) -> Result<(), DragError> {
        match self.state {
            DragState::Idle => {
                self.state = DragState::Dragging(task_id);
                debug!("event=drag_begin module=drag status=ok task_id={task_id}");
                Ok(())
            }
            DragState::Dragging(active) | DragState::Resolving(active, _) => {
                Err(DragError::AlreadyDragging(active))
            }
        }
    }

    /// Ends the drag over `target`, the column identifier reported by the
    /// gesture layer, and hands the move intent to `resolve` while in
    /// `Resolving`.
    ///
    /// An absent or unrecognized target is the same as `cancel` and returns
    /// `None` without calling `resolve`.
    pub fn drop<R>(
        &mut self,
        target: Option<&str>,
        resolve: impl FnOnce(MoveIntent) -> R,
    ) -> Result<Option<R>, DragError> {
        let DragState::Dragging(task_id) = self.state else {
            return Err(DragError::NotDragging);
        };
        let Some(to_status) = target.and_then(|value| TaskStatus::parse(value).ok()) else {
            self.cancel()?;
            return Ok(None);
        };

        self.state = DragState::Resolving(task_id, to_status);
        debug!("event=drag_drop module=drag status=resolving task_id={task_id} to={to_status}");
        let resolved = resolve(MoveIntent { task_id, to_status });
        self.state = DragState::Idle;
        Ok(Some(resolved))
    }

    pub fn cancel(&mut self) -> Result<(), DragError> {
        match self.state {
            DragState::Idle => Err(DragError::NotDragging),
            DragState::Dragging(task_id) | DragState::Resolving(task_id, _) => {
                self.state = DragState::Idle;
                debug!("event=drag_cancel module=drag status=ok task_id={task_id}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DragError, DragState, DragStateMachine, MoveIntent};
    use crate::model::board::{TaskId, TaskStatus};

    #[test]
    fn drop_on_column_emits_intent_and_returns_to_idle() {
        let mut machine = DragStateMachine::new();
        machine.begin(TaskId::new(7)).unwrap();
        assert_eq!(machine.state(), DragState::Dragging(TaskId::new(7)));

        let mut observed = None;
        let intent = machine
            .drop(Some("DONE"), |intent| {
                observed = Some(intent);
                intent
            })
            .unwrap();
        assert_eq!(
            intent,
            Some(MoveIntent {
                task_id: TaskId::new(7),
                to_status: TaskStatus::Done,
            })
        );
        assert_eq!(observed, intent);
        assert_eq!(machine.state(), DragState::Idle);
    }

    #[test]
    fn drop_outside_columns_cancels() {
        let mut machine = DragStateMachine::new();
        machine.begin(TaskId::new(7)).unwrap();
        assert_eq!(machine.drop(None, |intent| intent).unwrap(), None);
        assert_eq!(machine.state(), DragState::Idle);

        machine.begin(TaskId::new(7)).unwrap();
        assert_eq!(machine.drop(Some("trash"), |intent| intent).unwrap(), None);
        assert_eq!(machine.state(), DragState::Idle);
    }

    #[test]
    fn second_begin_is_rejected() {
        let mut machine = DragStateMachine::new();
        machine.begin(TaskId::new(1)).unwrap();
        assert_eq!(
            machine.begin(TaskId::new(2)),
            Err(DragError::AlreadyDragging(TaskId::new(1)))
        );
        assert_eq!(machine.state(), DragState::Dragging(TaskId::new(1)));
    }

    #[test]
    fn drop_or_cancel_while_idle_is_rejected() {
        let mut machine = DragStateMachine::new();
        assert_eq!(machine.drop(Some("TODO"), |intent| intent), Err(DragError::NotDragging));
        assert_eq!(machine.cancel(), Err(DragError::NotDragging));
    }
}

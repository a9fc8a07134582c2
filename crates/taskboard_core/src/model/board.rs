//! Board and task records.
//!
//! # Responsibility
//! - Provide typed ids that tolerate the wire's number-or-string encoding.
//! - Provide the three-column `TaskStatus` enum and title normalization.
//!
//! # Invariants
//! - `TaskId::is_placeholder` is true only for ids minted by the local applier.
//! - `normalize_title` never returns an empty string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

static WHITESPACE_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Stable identifier of one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BoardId(i64);

/// Stable identifier of one task, unique across all boards.
///
/// Negative values are local placeholders for tasks whose create mutation
/// has not been confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl BoardId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl TaskId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns whether this id was minted locally and is unknown to the server.
    pub const fn is_placeholder(self) -> bool {
        self.0 < 0
    }
}

impl Display for BoardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for BoardId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_wire_id(deserializer).map(Self)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_wire_id(deserializer).map(Self)
    }
}

/// Ids arrive as integers, integral floats or numeric strings depending on
/// the server's scalar mapping.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Int(i64),
    Float(f64),
    Text(String),
}

fn deserialize_wire_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match WireId::deserialize(deserializer)? {
        WireId::Int(value) => Ok(value),
        WireId::Float(value) => {
            if value.fract() == 0.0 && value.is_finite() && value.abs() < i64::MAX as f64 {
                Ok(value as i64)
            } else {
                Err(de::Error::custom(format!("id must be integral, got {value}")))
            }
        }
        WireId::Text(value) => value
            .trim()
            .parse::<i64>()
            .map_err(|_| de::Error::custom(format!("id must be numeric, got `{value}`"))),
    }
}

/// Column a task is displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Columns in display order.
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done];

    /// Wire/column identifier (`TODO|IN_PROGRESS|DONE`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        }
    }

    /// Parses a column identifier, case-insensitively.
    pub fn parse(value: &str) -> Result<Self, TaskValidationError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TODO" => Ok(Self::Todo),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "DONE" => Ok(Self::Done),
            _ => Err(TaskValidationError::UnknownStatus(value.to_string())),
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Input validation failures rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    /// Title is blank after normalization.
    EmptyTitle,
    /// Status is not one of the three columns.
    UnknownStatus(String),
    /// Task still carries a local placeholder id.
    PlaceholderTask(TaskId),
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "task title must not be blank"),
            Self::UnknownStatus(value) => write!(
                f,
                "unknown task status `{value}`; expected TODO|IN_PROGRESS|DONE"
            ),
            Self::PlaceholderTask(id) => {
                write!(f, "task {id} is not confirmed by the server yet")
            }
        }
    }
}

impl Error for TaskValidationError {}

/// Trims a title and collapses internal whitespace runs.
pub fn normalize_title(raw: &str) -> Result<String, TaskValidationError> {
    let collapsed = WHITESPACE_RUN_RE.replace_all(raw.trim(), " ");
    if collapsed.is_empty() {
        return Err(TaskValidationError::EmptyTitle);
    }
    Ok(collapsed.into_owned())
}

/// Board header record. Task membership lives on `Task::board_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub title: String,
}

impl Board {
    pub fn new(id: BoardId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }
}

/// One task card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    /// Owning board; exactly one per task.
    pub board_id: BoardId,
}

impl Task {
    pub fn new(id: TaskId, board_id: BoardId, title: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id,
            title: title.into(),
            status,
            board_id,
        }
    }
}

//! Priority classes and the per-queue priority assignment policy.
//!
//! Lower numbers run first. A class maps to a base priority; successive
//! submissions of the same class while the queue is busy get increasing
//! offsets so they run in submission order. The counter resets once the
//! queue drains, which keeps offsets small over long editing sessions.

use serde::{Deserialize, Serialize};

/// Concrete priority of a queued item (lower runs first).
pub type Priority = i64;

/// Coarse urgency bucket of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// The user is editing and waiting for the result.
    Edit,
    /// Background processing of the whole project.
    #[default]
    Sequence,
}

impl PriorityClass {
    pub const ALL: [PriorityClass; 2] = [Self::Edit, Self::Sequence];

    /// Base priority of the class.
    ///
    /// The gap between classes leaves room for the tie-break counter so an
    /// `Edit` item never sorts at or after a `Sequence` item.
    pub fn base(&self) -> Priority {
        match self {
            Self::Edit => 1,
            Self::Sequence => 900_000,
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Edit => 0,
            Self::Sequence => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Sequence => "sequence",
        }
    }
}

impl std::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tie-break counters of one queue, one slot per priority class.
#[derive(Debug, Clone, Default)]
pub struct PriorityCounters {
    slots: [Option<Priority>; PriorityClass::ALL.len()],
}

impl PriorityCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the priority for a new submission of `class`.
    ///
    /// `queue_len` is the number of items currently queued or running.
    pub fn next(&mut self, class: PriorityClass, queue_len: usize) -> Priority {
        let slot = &mut self.slots[class.index()];
        match *slot {
            Some(counter) if queue_len > 0 => {
                *slot = Some(counter + 1);
                class.base() + counter + 1
            }
            _ => {
                *slot = Some(0);
                class.base()
            }
        }
    }

    /// Current counter value of a class, if it has been used.
    pub fn counter(&self, class: PriorityClass) -> Option<Priority> {
        self.slots[class.index()]
    }
}

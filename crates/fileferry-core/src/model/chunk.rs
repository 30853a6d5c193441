//! Chunk bookkeeping for chunked transfers.
//!
//! A chunk only moves forward: `pending -> in_flight -> {done | failed}`.
//! A failed chunk is retried by deriving a fresh pending task from it, which
//! carries the attempt count and last error forward.

use serde::{Deserialize, Serialize};

use crate::error::ChunkTransitionError;

/// Lifecycle of one chunk attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Waiting for a worker.
    Pending,
    /// A worker is moving the bytes.
    InFlight,
    /// Bytes written at the chunk offset.
    Done,
    /// The attempt failed.
    Failed,
}

impl ChunkStatus {
    /// Lowercase status label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Done | Self::Failed)
        )
    }
}

/// One byte range of a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTask {
    index: u64,
    offset: u64,
    length: u64,
    attempt_count: u32,
    last_error: Option<String>,
    status: ChunkStatus,
}

impl ChunkTask {
    /// Pending task for the given range.
    #[must_use]
    pub const fn new(index: u64, offset: u64, length: u64) -> Self {
        Self {
            index,
            offset,
            length,
            attempt_count: 0,
            last_error: None,
            status: ChunkStatus::Pending,
        }
    }

    /// Split `size_bytes` into `ceil(size / chunk_size)` pending tasks.
    ///
    /// A zero `chunk_size` yields a single task covering the whole range.
    #[must_use]
    pub fn partition(size_bytes: u64, chunk_size: u64) -> Vec<Self> {
        if size_bytes == 0 {
            return Vec::new();
        }
        let chunk_size = if chunk_size == 0 { size_bytes } else { chunk_size };
        let count = size_bytes.div_ceil(chunk_size);
        (0..count)
            .map(|index| {
                let offset = index * chunk_size;
                let length = chunk_size.min(size_bytes - offset);
                Self::new(index, offset, length)
            })
            .collect()
    }

    /// Sequence number of the chunk.
    #[must_use]
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// Starting byte offset.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes covered.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Attempts started so far, including the current one.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Error recorded by the most recent failed attempt.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ChunkStatus {
        self.status
    }

    /// Move `pending -> in_flight` and count the attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkTransitionError`] when the task is not pending.
    pub fn begin_attempt(&mut self) -> Result<(), ChunkTransitionError> {
        self.advance(ChunkStatus::InFlight)?;
        self.attempt_count = self.attempt_count.saturating_add(1);
        Ok(())
    }

    /// Move `in_flight -> done`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkTransitionError`] when the task is not in flight.
    pub fn complete(&mut self) -> Result<(), ChunkTransitionError> {
        self.advance(ChunkStatus::Done)
    }

    /// Move `in_flight -> failed`, recording the error.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkTransitionError`] when the task is not in flight.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), ChunkTransitionError> {
        self.advance(ChunkStatus::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Derive the next attempt for a failed chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkTransitionError`] unless the task has failed.
    pub fn retry(&self) -> Result<Self, ChunkTransitionError> {
        if self.status != ChunkStatus::Failed {
            return Err(ChunkTransitionError {
                offset: self.offset,
                from: self.status,
                to: ChunkStatus::Pending,
            });
        }
        Ok(Self {
            status: ChunkStatus::Pending,
            ..self.clone()
        })
    }

    fn advance(&mut self, next: ChunkStatus) -> Result<(), ChunkTransitionError> {
        if !self.status.can_advance_to(next) {
            return Err(ChunkTransitionError {
                offset: self.offset,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_range_without_gaps() {
        let tasks = ChunkTask::partition(25, 10);
        let ranges: Vec<(u64, u64)> = tasks
            .iter()
            .map(|task| (task.offset(), task.length()))
            .collect();
        assert_eq!(ranges, vec![(0, 10), (10, 10), (20, 5)]);
        assert_eq!(tasks[2].index(), 2);
    }

    #[test]
    fn partition_of_empty_range_is_empty() {
        assert!(ChunkTask::partition(0, 10).is_empty());
        assert_eq!(ChunkTask::partition(7, 0).len(), 1);
    }

    #[test]
    fn transitions_only_move_forward() {
        let mut task = ChunkTask::new(0, 0, 4);
        assert!(task.complete().is_err());
        task.begin_attempt().expect("pending -> in_flight");
        assert_eq!(task.attempt_count(), 1);
        task.complete().expect("in_flight -> done");
        let err = task.begin_attempt().expect_err("done is terminal");
        assert_eq!(err.from, ChunkStatus::Done);
        assert_eq!(err.to, ChunkStatus::InFlight);
    }

    #[test]
    fn retry_derives_pending_task_from_failure() {
        let mut task = ChunkTask::new(1, 10, 10);
        assert!(task.retry().is_err());
        task.begin_attempt().expect("begin");
        task.fail("reset by peer").expect("fail");
        let mut next = task.retry().expect("retry from failed");
        assert_eq!(next.status(), ChunkStatus::Pending);
        assert_eq!(next.attempt_count(), 1);
        assert_eq!(next.last_error(), Some("reset by peer"));
        next.begin_attempt().expect("begin second attempt");
        assert_eq!(next.attempt_count(), 2);
        assert_eq!(task.status(), ChunkStatus::Failed);
    }
}

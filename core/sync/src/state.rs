//! Transfer state tracking per data type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fhirlink_common::{Error, Result, Timestamp};

use crate::catalog::DataType;
use crate::checkpoint::Checkpoint;

/// Where a data type stands within a session.
///
/// There is no failed state: an error leaves the type where it was, with the
/// last acknowledged checkpoint as the resumption point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TransferState {
    /// Not started yet.
    Pending { checkpoint: Timestamp },
    /// At least one batch acknowledged, more may follow.
    Transferring { offset: usize, checkpoint: Timestamp },
    /// An empty page came back.
    Done { checkpoint: Timestamp },
}

impl TransferState {
    /// Last acknowledged checkpoint.
    pub fn checkpoint(&self) -> Timestamp {
        match *self {
            TransferState::Pending { checkpoint }
            | TransferState::Transferring { checkpoint, .. }
            | TransferState::Done { checkpoint } => checkpoint,
        }
    }

    /// Offset of the next page to request.
    pub fn offset(&self) -> usize {
        match *self {
            TransferState::Transferring { offset, .. } => offset,
            TransferState::Pending { .. } | TransferState::Done { .. } => 0,
        }
    }
}

/// Progress of one data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEntry {
    /// Resource type name.
    pub data_type: String,
    /// Position in the session's sync sequence.
    pub order: u32,
    /// Checkpoint the session's page queries start from.
    pub query_from: Timestamp,
    /// Current state.
    pub state: TransferState,
    /// Acknowledged batches.
    pub batches: u32,
    /// Resources put on the wire.
    pub sent: u64,
    /// Resources applied on the receiving side.
    pub applied: u64,
    /// Resources skipped by the sender or rejected by the receiver.
    pub failed: u64,
    /// Last error message if a batch failed.
    pub last_error: Option<String>,
}

impl TransferEntry {
    /// Create a pending entry starting from `checkpoint`.
    pub fn new(data_type: &DataType, checkpoint: Timestamp) -> Self {
        Self {
            data_type: data_type.name().to_string(),
            order: data_type.order(),
            query_from: checkpoint,
            state: TransferState::Pending { checkpoint },
            batches: 0,
            sent: 0,
            applied: 0,
            failed: 0,
            last_error: None,
        }
    }

    /// Record an acknowledged batch.
    ///
    /// `consumed` is the page length the sender read, `sent` how many of
    /// those went out, `checkpoint` the mark saved after the receiver applied
    /// them.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if the type is already done or the checkpoint
    ///   would move backwards
    pub fn record_batch(
        &mut self,
        consumed: usize,
        sent: u64,
        checkpoint: Timestamp,
        applied: u64,
        failed: u64,
    ) -> Result<()> {
        if self.is_done() {
            return Err(Error::InvalidInput(format!(
                "{} transfer is already done",
                self.data_type
            )));
        }
        if checkpoint < self.state.checkpoint() {
            return Err(Error::InvalidInput(format!(
                "{} checkpoint cannot move back from {} to {}",
                self.data_type,
                self.state.checkpoint(),
                checkpoint
            )));
        }

        self.state = TransferState::Transferring {
            offset: self.state.offset() + consumed,
            checkpoint,
        };
        self.batches += 1;
        self.sent += sent;
        self.applied += applied;
        self.failed += failed;
        self.last_error = None;
        Ok(())
    }

    /// Mark the type as fully transferred.
    pub fn mark_done(&mut self) {
        self.state = TransferState::Done {
            checkpoint: self.state.checkpoint(),
        };
    }

    /// Record an error without changing state.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Check if the type is done.
    pub fn is_done(&self) -> bool {
        matches!(self.state, TransferState::Done { .. })
    }
}

/// Progress of a whole session, in sync order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    entries: Vec<TransferEntry>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the last data type finished.
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferProgress {
    /// Create pending entries for `data_types` from `checkpoint`.
    pub fn new<'a>(
        data_types: impl IntoIterator<Item = &'a DataType>,
        checkpoint: &Checkpoint,
    ) -> Self {
        Self {
            entries: data_types
                .into_iter()
                .map(|t| TransferEntry::new(t, checkpoint.get(t.name())))
                .collect(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Get the entry for a data type.
    pub fn get(&self, data_type: &str) -> Option<&TransferEntry> {
        self.entries.iter().find(|e| e.data_type == data_type)
    }

    /// Get the mutable entry for a data type.
    pub fn get_mut(&mut self, data_type: &str) -> Option<&mut TransferEntry> {
        self.entries.iter_mut().find(|e| e.data_type == data_type)
    }

    /// All entries in sync order.
    pub fn entries(&self) -> impl Iterator<Item = &TransferEntry> {
        self.entries.iter()
    }

    /// Check if every data type is done.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(TransferEntry::is_done)
    }

    /// Stamp the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Resources applied across all types.
    pub fn total_applied(&self) -> u64 {
        self.entries.iter().map(|e| e.applied).sum()
    }

    /// Resources sent across all types.
    pub fn total_sent(&self) -> u64 {
        self.entries.iter().map(|e| e.sent).sum()
    }

    /// Resources that failed across all types.
    pub fn total_failed(&self) -> u64 {
        self.entries.iter().map(|e| e.failed).sum()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

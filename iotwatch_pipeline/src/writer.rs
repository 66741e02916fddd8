use std::fmt;

use clap::ValueEnum;
use tracing::{error, info};

use crate::record::PersistedRecord;
use crate::store::DocumentStore;

/// What the writer does after an upsert fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum WriteFailurePolicy {
    /// Stop at the first failure; the rest of the batch is not attempted.
    Abort,
    /// Attempt every record and collect the failures.
    #[default]
    Continue,
}

impl fmt::Display for WriteFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Records handed to the writer.
    pub total: usize,
    /// Records for which an upsert was issued.
    pub attempted: usize,
    pub written: usize,
    pub failures: Vec<WriteFailure>,
}

impl WriteOutcome {
    pub fn is_complete(&self) -> bool {
        self.written == self.total
    }

    /// Records never attempted because the writer aborted.
    pub fn skipped(&self) -> usize {
        self.total - self.attempted
    }
}

/// Upserts the records one after the other. Never fails; failures are logged
/// and reported in the outcome.
pub async fn write_all(
    store: &dyn DocumentStore,
    records: &[PersistedRecord],
    policy: WriteFailurePolicy,
) -> WriteOutcome {
    let mut outcome = WriteOutcome {
        total: records.len(),
        ..Default::default()
    };

    for record in records {
        outcome.attempted += 1;
        match store.upsert(record).await {
            Ok(()) => outcome.written += 1,
            Err(err) => {
                error!(id = %record.id, error = %err, "Failed to write record");
                outcome.failures.push(WriteFailure {
                    id: record.id.clone(),
                    error: err.to_string(),
                });

                if policy == WriteFailurePolicy::Abort {
                    break;
                }
            }
        }
    }

    if outcome.is_complete() {
        info!(written = outcome.written, "Wrote records");
    } else {
        error!(
            written = outcome.written,
            failed = outcome.failures.len(),
            skipped = outcome.skipped(),
            %policy,
            "Batch write incomplete"
        );
    }

    outcome
}

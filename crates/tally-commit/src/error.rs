use tally_intake::IntakeError;
use tally_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// The batch transaction failed; every event in it was nacked.
    #[error("durable write of {rows} rows failed: {source}")]
    DurableWriteFailure {
        rows: usize,
        #[source]
        source: StoreError,
    },

    #[error("intake queue error: {0}")]
    Intake(#[from] IntakeError),

    #[error("committer task failed: {0}")]
    Task(String),
}

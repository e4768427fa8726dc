use tally_ledger::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type CacheResult<T> = Result<T, CacheError>;

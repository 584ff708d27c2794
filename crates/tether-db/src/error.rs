use thiserror::Error;

/// Store and ledger failures. Callers match on the validation variants;
/// everything else is infrastructure and surfaces as a 500 at the rim.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message content must not be empty")]
    EmptyContent,

    #[error("sender and receiver must be distinct users")]
    SelfReference,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

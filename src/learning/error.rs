use crate::mapping::error::StoreError;
use thiserror::Error;

/// Fehler beim Anlernen eines Mappings
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LearningError {
    #[error("No learning session is active")]
    NotLearning,

    /// Standard-Session ohne ausgewähltes Control
    #[error("No control selected for the learning session")]
    NoControlSelected,

    /// Quick-Learning wartet noch auf eine Eingabe
    #[error("Quick learning is still waiting for controller input")]
    AwaitingInput,

    #[error("Operation requires a standard learning session")]
    NotStandard,

    #[error(transparent)]
    Store(#[from] StoreError),
}

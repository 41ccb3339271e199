//! Fehlerdefinitionen für das Mapping-Modul

use thiserror::Error;

/// Validierungsfehler eines einzelnen Mappings
///
/// Ein ungültiges Mapping wird bei der Verarbeitung übersprungen, alle anderen
/// Mappings desselben Events laufen weiter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingError {
    #[error("Control has no device id")]
    MissingDeviceId,

    #[error("Control has no control id")]
    MissingControlId,

    #[error("Input range is not finite: [{min}, {max}]")]
    InvalidInputRange { min: f64, max: f64 },

    #[error("Step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),

    #[error("Target range is not finite: [{min}, {max}]")]
    InvalidTargetRange { min: f64, max: f64 },

    /// Ziel ohne Kennung (Node, Widget, Command oder Element)
    #[error("Target is missing its {0}")]
    IncompleteTarget(&'static str),
}

/// Konsistenzfehler im Mapping-Store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Eine Mapping-ID existiert bereits, das neue Mapping wird verworfen
    #[error("Mapping with id {0} already exists")]
    DuplicateId(String),

    #[error("Mapping with id {0} not found")]
    NotFound(String),
}

/// Fehler, die von Ziel- oder Command-Adaptern gemeldet werden
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("No handler registered for command {0}")]
    UnknownCommand(String),

    #[error("Target {target} rejected value: {reason}")]
    WriteRejected { target: String, reason: String },

    #[error("Command {command_id} failed: {reason}")]
    CommandFailed { command_id: String, reason: String },
}

/// Fehler der Engine-Task und ihrer Kanäle
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// Fehler bei der Kommunikation über Kanäle
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Fehler bei der Task-Verwaltung
    #[error("Task error: {0}")]
    TaskError(String),

    /// Speichern der Session fehlgeschlagen
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Learning(#[from] crate::learning::LearningError),
}

//! Learning mode
//!
//! Binds controls to targets by example: the user opens a session for a
//! target, moves a control, and the session turns that gesture into a
//! mapping.
//!
//! 1. [`state_machine`] - Idle / Standard / Quick sessions
//! 2. [`defaults`] - Default settings and mapping type detection
//! 3. [`error`] - Learning errors
//!
//! The state machine only ever observes an input after the engine has
//! dispatched it, so a control that is already mapped keeps working while
//! it is being learned for another target.

pub mod defaults;
pub mod error;
pub mod state_machine;

pub use defaults::{default_settings_for_widget, detect_mapping_type, DefaultSettings};
pub use error::LearningError;
pub use state_machine::{
    CompletionOptions, LearnKind, LearningSession, LearningState, LearningStateMachine,
};

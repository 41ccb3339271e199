//! Maps physical controller inputs (MIDI, gamepads) onto host parameters,
//! commands and UI elements through user-defined, profile-scoped mappings.
//!
//! ```text
//! ControlInput ──► normalize ──► pipeline (per mapping) ──► adapters
//!                                     │
//!                              learning (after dispatch)
//! ```

pub mod config;
pub mod controller;
pub mod events;
pub mod learning;
pub mod mapping;
pub mod persistence;

pub use controller::{Control, ControlInput, ControlType};
pub use events::{EngineEvent, Notifier};
pub use mapping::{Mapping, MappingEngine, MappingEngineHandle, MappingType, Target};

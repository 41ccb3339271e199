//! Controller input model
//!
//! Describes physical controls and the raw readings they produce, and turns
//! those readings into normalized values:
//!
//! 1. [`control`] - Control identity, control types and raw input events
//! 2. [`normalizer`] - Raw value to unit interval conversion
//!
//! # Architecture
//!
//! ```text
//! Device source ──► ControlInput ──► normalize() ──► unit ∈ [0,1]
//!                   (raw, range)
//! ```
//!
//! Device enumeration and protocol decoding live outside this crate; any
//! source that can produce a [`ControlInput`] can drive the engine.

pub mod control;
pub mod normalizer;

pub use control::{Control, ControlInput, ControlParseError, ControlType};
pub use normalizer::{normalize, threshold};

//! Modul für die Umwandlung von Controller-Eingaben in Zielwerte und Befehle.
//!
//! Dieses Modul enthält die Mapping Engine: das Profil-basierte Mapping-Store,
//! die Transformations-Pipeline pro Mapping-Typ und die Task, die alle
//! Zugriffe serialisiert.
//!
//! 1. [`types`] - Mapping records, targets, transforms
//! 2. [`pipeline`] - Raw value to target value per mapping type
//! 3. [`store`] - Profile-scoped store with shared widget ranges
//! 4. [`engine`] - Dispatch and mapping management
//! 5. [`manager`] - Engine plus learning mode
//! 6. [`handle`] - Tokio task and its handle
//! 7. [`adapter`] - Target and command collaborators

pub mod adapter;
pub mod engine;
pub mod error;
pub mod handle;
pub mod manager;
pub mod pipeline;
pub mod store;
pub mod types;

// Re-exports für einfacheren Zugriff
pub use adapter::{CommandAdapter, CommandRegistry, InMemoryTargets, TargetAdapter, TargetReader};
pub use engine::{DispatchReport, MappingEngine};
pub use error::{AdapterError, HandleError, MappingError, StoreError};
pub use handle::{EngineOptions, MappingEdit, MappingEngineHandle};
pub use manager::MappingEngineManager;
pub use store::{MappingStore, DEFAULT_PROFILE};
pub use types::{
    Mapping, MappingId, MappingPatch, MappingType, RuntimeState, Target, TargetBounds,
    TargetValue, Transform, WidgetKind, WidgetTarget,
};

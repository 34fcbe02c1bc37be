//! Core types, criteria, and storage contracts for the segmentation engine.

pub mod criteria;
pub mod error;
pub mod model;
pub mod retention;
pub mod store;

pub use criteria::*;
pub use error::{DataSource, DefinitionKind, Error, Result};
pub use model::*;
pub use retention::*;
pub use store::*;

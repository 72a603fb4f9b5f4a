//! Domain entities and business logic
//!
//! This module contains the core domain types for SideKeep:
//! - Store-relative path newtype
//! - Derivative kinds, relationships and orphan classification
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod relationship;

// Re-export commonly used types
pub use errors::DomainError;
pub use newtypes::StorePath;
pub use relationship::{
    DerivativeInfo, DerivativeKind, MainState, Orphan, OrphanBatch, OrphanReason, Relationship,
};

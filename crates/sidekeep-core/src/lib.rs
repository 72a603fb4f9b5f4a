//! SideKeep Core - Path rules, relationship index and ports
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `StorePath`, `DerivativeKind`, `Relationship`, `OrphanBatch`
//! - **Path rules** - derivative naming (`derive`/`parse`) and folder scope
//! - **Relationship index** - bidirectional main ↔ derivative lookup
//! - **Port definitions** - `IFileStore`, `INotificationService`,
//!   `IOrphanConfirmation`, `IIdentityRepository`
//! - **Configuration** - YAML config with validation
//!
//! # Architecture
//!
//! The domain, rules and index modules are pure and never touch the disk.
//! Ports define trait interfaces that adapter crates implement; the sync
//! crate drives them.

pub mod config;
pub mod domain;
pub mod index;
pub mod ports;
pub mod rules;

pub use index::{RelationshipIndex, SharedIndex};
pub use rules::PathRules;

//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the engine depends
//! on, but whose implementations live in adapter crates or binaries.
//!
//! ## Ports Overview
//!
//! - [`IFileStore`] - File store inspection and mutation
//! - [`INotificationService`] - Transient notices and view refreshes
//! - [`IOrphanConfirmation`] - User approval of orphan deletion
//! - [`IIdentityRepository`] - Persisted path → stable identity map

pub mod confirmation;
pub mod file_store;
pub mod identity_repository;
pub mod notification;

pub use confirmation::IOrphanConfirmation;
pub use file_store::{FileSystemState, IFileStore, StoreError};
pub use identity_repository::IIdentityRepository;
pub use notification::{INotificationService, Notification, NotificationPriority};

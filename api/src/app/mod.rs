//! Application layer
//!
//! Services coordinate between domain entities, ports, and external
//! systems: the access projector, the reconciliation controller, and the
//! workspace provisioner.

pub mod access_service;
pub mod sync;
pub mod workspace_service;

pub use access_service::AccessService;
pub use sync::{SyncOptions, SyncService};
pub use workspace_service::{WorkspaceOptions, WorkspaceService, IDE_PORT};

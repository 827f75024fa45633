//! Adapters layer
//!
//! Implementations of port traits for external systems.

pub mod gitea;
pub mod kube;
pub mod ldap;

pub use gitea::GiteaClientImpl;
pub use kube::KubeClusterClient;
pub use ldap::{LdapDirectoryStore, LdapPool};

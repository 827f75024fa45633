//! Cluster client port trait
//!
//! The slice of the Kubernetes API surface the workspace provisioner
//! needs: volumes, pods, services, the mesh's virtual-route resource, and
//! exec into a running pod.

use async_trait::async_trait;

use crate::domain::entities::PodState;
use crate::error::ClusterError;

/// Everything the adapter needs to build a workspace pod.
///
/// The clone URL carries the user's token in its authority; it is written
/// into the volume with 0600 permissions by the clone step and never
/// logged.
#[derive(Debug, Clone)]
pub struct WorkspacePodSpec {
    pub pod_name: String,
    pub volume_name: String,
    /// Sanitized uid label value for selectors
    pub uid_label: String,
    pub image: String,
    pub clone_url: String,
    /// Normalized `owner/name`; the clone directory is derived from `name`
    pub repo_full_name: String,
    pub branch: String,
    pub git_user_name: String,
    pub git_user_email: String,
    /// IDE extensions pre-installed into the volume by the second init step
    pub extensions: Vec<String>,
    /// Container port the IDE listens on
    pub ide_port: u16,
    pub cpu_request: String,
    pub mem_request: String,
    pub cpu_limit: String,
    pub mem_limit: String,
}

/// Port trait for cluster operations
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get-or-create the workspace volume. Returns true when a new claim
    /// was created, false when an existing one is reused.
    async fn ensure_volume(
        &self,
        name: &str,
        uid_label: &str,
        size: &str,
        storage_class: Option<&str>,
    ) -> Result<bool, ClusterError>;

    async fn delete_volume(&self, name: &str) -> Result<(), ClusterError>;

    async fn volume_exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// Observe a pod; absent pods report a default state with no phase.
    async fn pod_state(&self, name: &str) -> Result<PodState, ClusterError>;

    /// Observe every workspace pod, keyed by pod name.
    async fn list_workspace_pods(&self) -> Result<Vec<(String, PodState)>, ClusterError>;

    async fn create_workspace_pod(&self, spec: &WorkspacePodSpec) -> Result<(), ClusterError>;

    /// Delete is idempotent: deleting an absent pod succeeds.
    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError>;

    /// Get-or-create the ClusterIP service routing to the IDE port.
    async fn ensure_service(
        &self,
        name: &str,
        uid_label: &str,
        port: u16,
    ) -> Result<(), ClusterError>;

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError>;

    /// Whether a mesh route client is available in this deployment.
    fn routes_available(&self) -> bool;

    /// Get-or-create the per-user virtual route onto the service.
    async fn ensure_route(
        &self,
        name: &str,
        hostname: &str,
        service: &str,
        port: u16,
    ) -> Result<(), ClusterError>;

    async fn delete_route(&self, name: &str) -> Result<(), ClusterError>;

    /// Run a command in the named container, returning combined output.
    async fn exec(
        &self,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<String, ClusterError>;
}

//! Gitea client port trait
//!
//! The consumed contract of the git server: the subset of its REST API the
//! reconciliation controller, the workspace provisioner and the admin
//! surface reach. Repository ownership is centralized under a single
//! administrative org; per-user access goes through teams.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GiteaError;

/// Gitea user representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaUser {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub full_name: Option<String>,
}

/// Gitea organization representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaOrg {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Gitea repository representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaRepo {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub clone_url: String,
    pub html_url: String,
    pub default_branch: String,
    pub private: bool,
}

/// Gitea branch representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaBranch {
    pub name: String,
    pub commit: GiteaCommit,
}

/// Gitea commit representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaCommit {
    pub id: String,
    pub message: String,
}

/// Gitea org team representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaTeam {
    pub id: i64,
    pub name: String,
    pub permission: String,
}

/// Gitea webhook representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaHook {
    pub id: i64,
    pub url: String,
    pub active: bool,
    pub events: Vec<String>,
}

/// Source kind accepted by Gitea's repository migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationService {
    Github,
    Gitlab,
    Gitea,
    Gogs,
}

impl MigrationService {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationService::Github => "github",
            MigrationService::Gitlab => "gitlab",
            MigrationService::Gitea => "gitea",
            MigrationService::Gogs => "gogs",
        }
    }
}

/// Port trait for Gitea API operations
#[async_trait]
pub trait GiteaClient: Send + Sync {
    // User management

    async fn get_user(&self, username: &str) -> Result<GiteaUser, GiteaError>;

    async fn search_users(&self, query: &str) -> Result<Vec<GiteaUser>, GiteaError>;

    /// Create a user via the admin endpoint
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<GiteaUser, GiteaError>;

    /// Update a user's profile fields; each is independently optional
    async fn update_user(
        &self,
        username: &str,
        email: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<(), GiteaError>;

    async fn delete_user(&self, username: &str) -> Result<(), GiteaError>;

    /// Mint an access token on behalf of a user (admin sudo)
    async fn create_user_token(
        &self,
        username: &str,
        token_name: &str,
    ) -> Result<String, GiteaError>;

    // Organization management

    async fn get_org(&self, name: &str) -> Result<GiteaOrg, GiteaError>;

    async fn create_org(&self, name: &str, description: Option<&str>)
        -> Result<GiteaOrg, GiteaError>;

    // Repository management

    async fn get_repo(&self, owner: &str, name: &str) -> Result<GiteaRepo, GiteaError>;

    async fn list_org_repos(&self, org: &str) -> Result<Vec<GiteaRepo>, GiteaError>;

    async fn create_org_repo(
        &self,
        org: &str,
        name: &str,
        description: Option<&str>,
        private: bool,
    ) -> Result<GiteaRepo, GiteaError>;

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<(), GiteaError>;

    async fn fork_repo(
        &self,
        owner: &str,
        repo: &str,
        to_org: &str,
    ) -> Result<GiteaRepo, GiteaError>;

    /// Start a migration from an external service; mirroring and
    /// scheduling are Gitea's own concern.
    async fn migrate_repo(
        &self,
        clone_addr: &str,
        owner: &str,
        name: &str,
        service: MigrationService,
        mirror: bool,
    ) -> Result<GiteaRepo, GiteaError>;

    // Branch management

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<GiteaBranch>, GiteaError>;

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        new_branch: &str,
        old_ref: Option<&str>,
    ) -> Result<GiteaBranch, GiteaError>;

    async fn delete_branch(&self, owner: &str, repo: &str, branch: &str)
        -> Result<(), GiteaError>;

    // Team management

    async fn list_teams(&self, org: &str) -> Result<Vec<GiteaTeam>, GiteaError>;

    async fn create_team(
        &self,
        org: &str,
        name: &str,
        description: Option<&str>,
        permission: &str,
    ) -> Result<GiteaTeam, GiteaError>;

    async fn list_team_members(&self, team_id: i64) -> Result<Vec<GiteaUser>, GiteaError>;

    async fn add_team_member(&self, team_id: i64, username: &str) -> Result<(), GiteaError>;

    async fn remove_team_member(&self, team_id: i64, username: &str) -> Result<(), GiteaError>;

    async fn add_team_repo(
        &self,
        team_id: i64,
        owner: &str,
        repo: &str,
    ) -> Result<(), GiteaError>;

    // Webhook management

    async fn list_org_hooks(&self, org: &str) -> Result<Vec<GiteaHook>, GiteaError>;

    async fn create_org_hook(
        &self,
        org: &str,
        url: &str,
        events: Vec<String>,
        secret: Option<&str>,
    ) -> Result<i64, GiteaError>;

    // Health

    /// Server version; used by the readiness probe
    async fn version(&self) -> Result<String, GiteaError>;
}

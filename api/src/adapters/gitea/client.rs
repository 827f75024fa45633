//! Gitea API client implementation

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use urlencoding::encode;

use crate::domain::ports::{
    GiteaBranch, GiteaClient, GiteaCommit, GiteaHook, GiteaOrg, GiteaRepo, GiteaTeam, GiteaUser,
    MigrationService,
};
use crate::error::GiteaError;

/// Implementation of the Gitea API client
pub struct GiteaClientImpl {
    http: Client,
    base_url: String,
    admin_token: String,
}

impl GiteaClientImpl {
    pub fn new(base_url: String, admin_token: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn auth_header(&self) -> String {
        format!("token {}", self.admin_token)
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GiteaError> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| GiteaError::Deserialization(e.to_string()))
        } else if status.as_u16() == 401 {
            Err(GiteaError::Unauthorized)
        } else if status.as_u16() == 429 {
            Err(GiteaError::RateLimited)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(GiteaError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<(), GiteaError> {
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else if status.as_u16() == 401 {
            Err(GiteaError::Unauthorized)
        } else if status.as_u16() == 429 {
            Err(GiteaError::RateLimited)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(GiteaError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Request types for the Gitea API
#[derive(Serialize)]
struct CreateUserRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
    must_change_password: bool,
}

#[derive(Serialize)]
struct UpdateUserRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_name: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateTokenRequest<'a> {
    name: &'a str,
    scopes: Vec<&'a str>,
}

#[derive(Deserialize)]
struct CreateTokenResponse {
    sha1: String,
}

#[derive(Serialize)]
struct CreateOrgRequest<'a> {
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    private: bool,
    auto_init: bool,
}

#[derive(Serialize)]
struct ForkRepoRequest<'a> {
    organization: &'a str,
}

#[derive(Serialize)]
struct MigrateRepoRequest<'a> {
    clone_addr: &'a str,
    repo_owner: &'a str,
    repo_name: &'a str,
    service: &'a str,
    mirror: bool,
}

#[derive(Serialize)]
struct CreateBranchRequest<'a> {
    new_branch_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_ref_name: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateTeamRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    permission: &'a str,
    includes_all_repositories: bool,
    /// Required by Gitea - list of units the team has access to
    units: Vec<&'a str>,
}

#[derive(Serialize)]
struct CreateHookRequest<'a> {
    #[serde(rename = "type")]
    hook_type: &'a str,
    config: HookConfig<'a>,
    events: Vec<String>,
    active: bool,
}

#[derive(Serialize)]
struct HookConfig<'a> {
    url: &'a str,
    content_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<&'a str>,
}

/// Response types from the Gitea API
#[derive(Deserialize)]
struct GiteaUserResponse {
    id: i64,
    login: String,
    email: String,
    full_name: Option<String>,
}

impl From<GiteaUserResponse> for GiteaUser {
    fn from(r: GiteaUserResponse) -> Self {
        GiteaUser {
            id: r.id,
            login: r.login,
            email: r.email,
            full_name: r.full_name,
        }
    }
}

#[derive(Deserialize)]
struct SearchUsersResponse {
    data: Vec<GiteaUserResponse>,
}

#[derive(Deserialize)]
struct GiteaOrgResponse {
    id: i64,
    name: String,
    description: Option<String>,
}

impl From<GiteaOrgResponse> for GiteaOrg {
    fn from(r: GiteaOrgResponse) -> Self {
        GiteaOrg {
            id: r.id,
            name: r.name,
            description: r.description,
        }
    }
}

#[derive(Deserialize)]
struct GiteaRepoResponse {
    id: i64,
    name: String,
    full_name: String,
    description: Option<String>,
    clone_url: String,
    html_url: String,
    default_branch: String,
    private: bool,
}

impl From<GiteaRepoResponse> for GiteaRepo {
    fn from(r: GiteaRepoResponse) -> Self {
        GiteaRepo {
            id: r.id,
            name: r.name,
            full_name: r.full_name,
            description: r.description,
            clone_url: r.clone_url,
            html_url: r.html_url,
            default_branch: r.default_branch,
            private: r.private,
        }
    }
}

#[derive(Deserialize)]
struct GiteaBranchResponse {
    name: String,
    commit: GiteaCommitResponse,
}

#[derive(Deserialize)]
struct GiteaCommitResponse {
    id: String,
    message: String,
}

impl From<GiteaBranchResponse> for GiteaBranch {
    fn from(r: GiteaBranchResponse) -> Self {
        GiteaBranch {
            name: r.name,
            commit: GiteaCommit {
                id: r.commit.id,
                message: r.commit.message,
            },
        }
    }
}

#[derive(Deserialize)]
struct GiteaTeamResponse {
    id: i64,
    name: String,
    permission: String,
}

impl From<GiteaTeamResponse> for GiteaTeam {
    fn from(r: GiteaTeamResponse) -> Self {
        GiteaTeam {
            id: r.id,
            name: r.name,
            permission: r.permission,
        }
    }
}

#[derive(Deserialize)]
struct GiteaHookResponse {
    id: i64,
    config: GiteaHookConfigResponse,
    active: bool,
    #[serde(default)]
    events: Vec<String>,
}

#[derive(Deserialize)]
struct GiteaHookConfigResponse {
    #[serde(default)]
    url: String,
}

impl From<GiteaHookResponse> for GiteaHook {
    fn from(r: GiteaHookResponse) -> Self {
        GiteaHook {
            id: r.id,
            url: r.config.url,
            active: r.active,
            events: r.events,
        }
    }
}

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

#[async_trait]
impl GiteaClient for GiteaClientImpl {
    async fn get_user(&self, username: &str) -> Result<GiteaUser, GiteaError> {
        let resp = self
            .http
            .get(self.api_url(&format!("/users/{}", encode(username))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(GiteaError::UserNotFound(username.to_string()));
        }

        let user: GiteaUserResponse = self.handle_response(resp).await?;
        Ok(user.into())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<GiteaUser>, GiteaError> {
        let resp = self
            .http
            .get(self.api_url("/users/search"))
            .query(&[("q", query)])
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let found: SearchUsersResponse = self.handle_response(resp).await?;
        Ok(found.data.into_iter().map(|u| u.into()).collect())
    }

    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<GiteaUser, GiteaError> {
        let resp = self
            .http
            .post(self.api_url("/admin/users"))
            .header("Authorization", self.auth_header())
            .json(&CreateUserRequest {
                username,
                email,
                password,
                must_change_password: false,
            })
            .send()
            .await?;

        let user: GiteaUserResponse = self.handle_response(resp).await?;
        Ok(user.into())
    }

    async fn update_user(
        &self,
        username: &str,
        email: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<(), GiteaError> {
        let resp = self
            .http
            .patch(self.api_url(&format!("/admin/users/{}", encode(username))))
            .header("Authorization", self.auth_header())
            .json(&UpdateUserRequest { email, full_name })
            .send()
            .await?;

        self.handle_empty_response(resp).await
    }

    async fn delete_user(&self, username: &str) -> Result<(), GiteaError> {
        let resp = self
            .http
            .delete(self.api_url(&format!("/admin/users/{}", encode(username))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(GiteaError::UserNotFound(username.to_string()));
        }

        self.handle_empty_response(resp).await
    }

    async fn create_user_token(
        &self,
        username: &str,
        token_name: &str,
    ) -> Result<String, GiteaError> {
        // Admin sudo: mint the token on the user's behalf without their
        // password.
        let resp = self
            .http
            .post(self.api_url(&format!("/users/{}/tokens", encode(username))))
            .header("Authorization", self.auth_header())
            .header("Sudo", username)
            .json(&CreateTokenRequest {
                name: token_name,
                scopes: vec!["read:repository", "write:repository", "read:user"],
            })
            .send()
            .await?;

        let token: CreateTokenResponse = self.handle_response(resp).await?;
        Ok(token.sha1)
    }

    async fn get_org(&self, name: &str) -> Result<GiteaOrg, GiteaError> {
        let resp = self
            .http
            .get(self.api_url(&format!("/orgs/{}", encode(name))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(GiteaError::OrgNotFound(name.to_string()));
        }

        let org: GiteaOrgResponse = self.handle_response(resp).await?;
        Ok(org.into())
    }

    async fn create_org(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<GiteaOrg, GiteaError> {
        let resp = self
            .http
            .post(self.api_url("/orgs"))
            .header("Authorization", self.auth_header())
            .json(&CreateOrgRequest {
                username: name,
                description,
            })
            .send()
            .await?;

        let org: GiteaOrgResponse = self.handle_response(resp).await?;
        Ok(org.into())
    }

    async fn get_repo(&self, owner: &str, name: &str) -> Result<GiteaRepo, GiteaError> {
        let resp = self
            .http
            .get(self.api_url(&format!("/repos/{}/{}", encode(owner), encode(name))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(GiteaError::RepoNotFound {
                owner: owner.to_string(),
                repo: name.to_string(),
            });
        }

        let repo: GiteaRepoResponse = self.handle_response(resp).await?;
        Ok(repo.into())
    }

    async fn list_org_repos(&self, org: &str) -> Result<Vec<GiteaRepo>, GiteaError> {
        let resp = self
            .http
            .get(self.api_url(&format!("/orgs/{}/repos", encode(org))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let repos: Vec<GiteaRepoResponse> = self.handle_response(resp).await?;
        Ok(repos.into_iter().map(|r| r.into()).collect())
    }

    async fn create_org_repo(
        &self,
        org: &str,
        name: &str,
        description: Option<&str>,
        private: bool,
    ) -> Result<GiteaRepo, GiteaError> {
        let resp = self
            .http
            .post(self.api_url(&format!("/orgs/{}/repos", encode(org))))
            .header("Authorization", self.auth_header())
            .json(&CreateRepoRequest {
                name,
                description,
                private,
                auto_init: true,
            })
            .send()
            .await?;

        let repo: GiteaRepoResponse = self.handle_response(resp).await?;
        Ok(repo.into())
    }

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<(), GiteaError> {
        let resp = self
            .http
            .delete(self.api_url(&format!("/repos/{}/{}", encode(owner), encode(name))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(GiteaError::RepoNotFound {
                owner: owner.to_string(),
                repo: name.to_string(),
            });
        }

        self.handle_empty_response(resp).await
    }

    async fn fork_repo(
        &self,
        owner: &str,
        repo: &str,
        to_org: &str,
    ) -> Result<GiteaRepo, GiteaError> {
        let resp = self
            .http
            .post(self.api_url(&format!("/repos/{}/{}/forks", encode(owner), encode(repo))))
            .header("Authorization", self.auth_header())
            .json(&ForkRepoRequest {
                organization: to_org,
            })
            .send()
            .await?;

        let forked: GiteaRepoResponse = self.handle_response(resp).await?;
        Ok(forked.into())
    }

    async fn migrate_repo(
        &self,
        clone_addr: &str,
        owner: &str,
        name: &str,
        service: MigrationService,
        mirror: bool,
    ) -> Result<GiteaRepo, GiteaError> {
        let resp = self
            .http
            .post(self.api_url("/repos/migrate"))
            .header("Authorization", self.auth_header())
            .json(&MigrateRepoRequest {
                clone_addr,
                repo_owner: owner,
                repo_name: name,
                service: service.as_str(),
                mirror,
            })
            .send()
            .await?;

        let repo: GiteaRepoResponse = self.handle_response(resp).await?;
        Ok(repo.into())
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<GiteaBranch>, GiteaError> {
        let resp = self
            .http
            .get(self.api_url(&format!(
                "/repos/{}/{}/branches",
                encode(owner),
                encode(repo)
            )))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let branches: Vec<GiteaBranchResponse> = self.handle_response(resp).await?;
        Ok(branches.into_iter().map(|b| b.into()).collect())
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        new_branch: &str,
        old_ref: Option<&str>,
    ) -> Result<GiteaBranch, GiteaError> {
        let resp = self
            .http
            .post(self.api_url(&format!(
                "/repos/{}/{}/branches",
                encode(owner),
                encode(repo)
            )))
            .header("Authorization", self.auth_header())
            .json(&CreateBranchRequest {
                new_branch_name: new_branch,
                old_ref_name: old_ref,
            })
            .send()
            .await?;

        let branch: GiteaBranchResponse = self.handle_response(resp).await?;
        Ok(branch.into())
    }

    async fn delete_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), GiteaError> {
        let resp = self
            .http
            .delete(self.api_url(&format!(
                "/repos/{}/{}/branches/{}",
                encode(owner),
                encode(repo),
                encode(branch)
            )))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        self.handle_empty_response(resp).await
    }

    async fn list_teams(&self, org: &str) -> Result<Vec<GiteaTeam>, GiteaError> {
        let resp = self
            .http
            .get(self.api_url(&format!("/orgs/{}/teams", encode(org))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(GiteaError::OrgNotFound(org.to_string()));
        }

        let teams: Vec<GiteaTeamResponse> = self.handle_response(resp).await?;
        Ok(teams.into_iter().map(|t| t.into()).collect())
    }

    async fn create_team(
        &self,
        org: &str,
        name: &str,
        description: Option<&str>,
        permission: &str,
    ) -> Result<GiteaTeam, GiteaError> {
        // Standard repository units for team access
        let units = vec![
            "repo.code",
            "repo.issues",
            "repo.pulls",
            "repo.releases",
            "repo.wiki",
            "repo.projects",
        ];

        let resp = self
            .http
            .post(self.api_url(&format!("/orgs/{}/teams", encode(org))))
            .header("Authorization", self.auth_header())
            .json(&CreateTeamRequest {
                name,
                description,
                permission,
                includes_all_repositories: false,
                units,
            })
            .send()
            .await?;

        let team: GiteaTeamResponse = self.handle_response(resp).await?;
        Ok(team.into())
    }

    async fn list_team_members(&self, team_id: i64) -> Result<Vec<GiteaUser>, GiteaError> {
        let resp = self
            .http
            .get(self.api_url(&format!("/teams/{}/members", team_id)))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let members: Vec<GiteaUserResponse> = self.handle_response(resp).await?;
        Ok(members.into_iter().map(|m| m.into()).collect())
    }

    async fn add_team_member(&self, team_id: i64, username: &str) -> Result<(), GiteaError> {
        let resp = self
            .http
            .put(self.api_url(&format!("/teams/{}/members/{}", team_id, encode(username))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        self.handle_empty_response(resp).await
    }

    async fn remove_team_member(&self, team_id: i64, username: &str) -> Result<(), GiteaError> {
        let resp = self
            .http
            .delete(self.api_url(&format!("/teams/{}/members/{}", team_id, encode(username))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        self.handle_empty_response(resp).await
    }

    async fn add_team_repo(&self, team_id: i64, owner: &str, repo: &str) -> Result<(), GiteaError> {
        let resp = self
            .http
            .put(self.api_url(&format!(
                "/teams/{}/repos/{}/{}",
                team_id,
                encode(owner),
                encode(repo)
            )))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        self.handle_empty_response(resp).await
    }

    async fn list_org_hooks(&self, org: &str) -> Result<Vec<GiteaHook>, GiteaError> {
        let resp = self
            .http
            .get(self.api_url(&format!("/orgs/{}/hooks", encode(org))))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let hooks: Vec<GiteaHookResponse> = self.handle_response(resp).await?;
        Ok(hooks.into_iter().map(|h| h.into()).collect())
    }

    async fn create_org_hook(
        &self,
        org: &str,
        url: &str,
        events: Vec<String>,
        secret: Option<&str>,
    ) -> Result<i64, GiteaError> {
        let resp = self
            .http
            .post(self.api_url(&format!("/orgs/{}/hooks", encode(org))))
            .header("Authorization", self.auth_header())
            .json(&CreateHookRequest {
                hook_type: "gitea",
                config: HookConfig {
                    url,
                    content_type: "json",
                    secret,
                },
                events,
                active: true,
            })
            .send()
            .await?;

        let hook: GiteaHookResponse = self.handle_response(resp).await?;
        Ok(hook.id)
    }

    async fn version(&self) -> Result<String, GiteaError> {
        let resp = self
            .http
            .get(self.api_url("/version"))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let version: VersionResponse = self.handle_response(resp).await?;
        Ok(version.version)
    }
}

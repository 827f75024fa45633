//! Reconciliation controller
//!
//! Keeps Gitea's users, teams, memberships and repository ownership
//! aligned with the directory. Three cooperating strategies: the
//! event-driven webhook path (see the webhook handler), a periodic full
//! reconcile, and a persistent retry queue for failed work; a fourth
//! cadence keeps the org webhook itself registered.
//!
//! Gitea is never treated as a source of entitlement: every sync derives
//! the target state from the directory projection and overwrites.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::access_service::AccessService;
use crate::app::sync::retry::{RetryQueue, DEFAULT_CAPACITY};
use crate::app::sync::state::{StateStore, SyncState};
use crate::auth::TokenClient;
use crate::domain::entities::{Group, RepoRef};
use crate::domain::ports::{DirectoryStore, GiteaClient, GiteaTeam};
use crate::domain::Deadline;
use crate::error::{ApiError, DirectoryError, GiteaError};

/// Delay before the first full reconcile after process start
const RECONCILE_INITIAL_DELAY: Duration = Duration::from_secs(30);
/// Overall deadline for one full reconcile tick
const RECONCILE_TICK_DEADLINE: Duration = Duration::from_secs(120);
/// Deadline for one per-user sync (webhook- or retry-driven)
const PER_USER_SYNC_DEADLINE: Duration = Duration::from_secs(30);
/// Delay before the first webhook-health check
const WEBHOOK_HEALTH_INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Controller settings taken from process configuration
#[derive(Clone)]
pub struct SyncOptions {
    pub default_owner: String,
    pub webhook_url: String,
    pub webhook_secret: Option<String>,
    pub reconcile_interval: Duration,
    pub group_sync_interval: Duration,
    pub webhook_health_interval: Duration,
    pub retry_interval: Duration,
}

/// State shared between loops and the webhook path.
///
/// The mutex is never held across network I/O: ready work is copied out
/// under the lock and processed outside it.
struct Shared {
    queue: RetryQueue,
    last_reconcile_success: Option<DateTime<Utc>>,
}

/// Service for keeping Gitea aligned with the directory
pub struct SyncService<D, G>
where
    D: DirectoryStore,
    G: GiteaClient,
{
    directory: Arc<D>,
    gitea: Arc<G>,
    access: Arc<AccessService<D>>,
    token_client: Option<TokenClient>,
    opts: SyncOptions,
    shared: Mutex<Shared>,
    state_store: StateStore,
}

fn generated_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

impl<D, G> SyncService<D, G>
where
    D: DirectoryStore + 'static,
    G: GiteaClient + 'static,
{
    pub fn new(
        directory: Arc<D>,
        gitea: Arc<G>,
        access: Arc<AccessService<D>>,
        token_client: Option<TokenClient>,
        opts: SyncOptions,
        state_store: StateStore,
        initial_state: SyncState,
    ) -> Self {
        SyncService {
            directory,
            gitea,
            access,
            token_client,
            opts,
            shared: Mutex::new(Shared {
                queue: RetryQueue::from_items(initial_state.retry_items, DEFAULT_CAPACITY),
                last_reconcile_success: initial_state.last_reconcile_success,
            }),
            state_store,
        }
    }

    pub fn retry_queue_len(&self) -> usize {
        self.shared.lock().expect("sync lock poisoned").queue.len()
    }

    pub fn last_reconcile_success(&self) -> Option<DateTime<Utc>> {
        self.shared
            .lock()
            .expect("sync lock poisoned")
            .last_reconcile_success
    }

    /// Flush queue + timestamp with a write-then-rename.
    async fn persist(&self) {
        let state = {
            let shared = self.shared.lock().expect("sync lock poisoned");
            SyncState {
                retry_items: shared.queue.items(),
                last_reconcile_success: shared.last_reconcile_success,
            }
        };
        if let Err(e) = self.state_store.save(&state).await {
            tracing::error!(error = %e, "Failed to persist controller state");
        }
    }

    /// Queue a failed per-user sync for retry. Double-enqueue of the
    /// same uid is a no-op.
    pub async fn enqueue_retry(&self, uid: &str) {
        let added = {
            self.shared
                .lock()
                .expect("sync lock poisoned")
                .queue
                .enqueue(uid, Utc::now())
        };
        if added {
            counter!("retry_enqueued_total").increment(1);
            tracing::info!(uid = %uid, "Queued sync retry");
            self.persist().await;
        }
    }

    async fn ensure_owner_org(&self) -> Result<(), ApiError> {
        match self.gitea.get_org(&self.opts.default_owner).await {
            Ok(_) => Ok(()),
            Err(GiteaError::OrgNotFound(_)) => {
                self.gitea
                    .create_org(
                        &self.opts.default_owner,
                        Some("Centrally managed repositories"),
                    )
                    .await?;
                tracing::info!(org = %self.opts.default_owner, "Created owner organization");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Make sure a Gitea account exists for the directory user.
    async fn ensure_gitea_user(&self, uid: &str, deadline: Deadline) -> Result<(), ApiError> {
        let user = self.directory.get_user(uid, deadline).await?;
        let email = user
            .email
            .clone()
            .unwrap_or_else(|| format!("{}@users.noreply.local", uid));
        let full_name = user.display_name.clone();

        match self.gitea.get_user(uid).await {
            Ok(existing) => {
                let email_drift = user.email.is_some() && existing.email != email;
                let name_drift = full_name.is_some() && existing.full_name != full_name;
                if email_drift || name_drift {
                    self.gitea
                        .update_user(
                            uid,
                            email_drift.then_some(email.as_str()),
                            if name_drift {
                                full_name.as_deref()
                            } else {
                                None
                            },
                        )
                        .await?;
                }
                Ok(())
            }
            Err(GiteaError::UserNotFound(_)) => {
                // The generated password is never surfaced; users reach
                // git through minted tokens.
                self.gitea
                    .create_user(uid, &email, &generated_password())
                    .await?;
                tracing::info!(uid = %uid, "Created Gitea user");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_repo(&self, name: &str) -> Result<(), ApiError> {
        match self.gitea.get_repo(&self.opts.default_owner, name).await {
            Ok(_) => Ok(()),
            Err(GiteaError::RepoNotFound { .. }) => {
                self.gitea
                    .create_org_repo(&self.opts.default_owner, name, None, true)
                    .await?;
                tracing::info!(owner = %self.opts.default_owner, repo = %name, "Created repository");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_team(&self, name: &str, permission: &str) -> Result<GiteaTeam, ApiError> {
        let teams = self.gitea.list_teams(&self.opts.default_owner).await?;
        if let Some(team) = teams.into_iter().find(|t| t.name == name) {
            return Ok(team);
        }
        let team = self
            .gitea
            .create_team(&self.opts.default_owner, name, None, permission)
            .await?;
        tracing::info!(team = %name, "Created Gitea team");
        Ok(team)
    }

    /// Align one user: account, personal team, effective repositories.
    /// Individually idempotent, so webhook- and tick-driven syncs of
    /// the same uid converge. The caller's deadline bounds the directory
    /// work and is re-checked between git-server steps.
    pub async fn sync_user(&self, uid: &str, deadline: Deadline) -> Result<(), ApiError> {
        self.ensure_gitea_user(uid, deadline).await?;

        let repos = self.access.effective_repositories(uid, deadline).await?;

        deadline.check()?;
        let team = self.ensure_team(&format!("user-{}", uid), "write").await?;
        self.gitea.add_team_member(team.id, uid).await?;

        for repo in &repos {
            deadline.check()?;
            if repo.owner != self.opts.default_owner {
                // Ownership is centralized; refs into foreign owners are
                // projected but not materialized here.
                tracing::debug!(uid = %uid, repo = %repo, "Skipping foreign-owner repository");
                continue;
            }
            self.ensure_repo(&repo.name).await?;
            self.gitea
                .add_team_repo(team.id, &repo.owner, &repo.name)
                .await?;
        }

        counter!("user_syncs_total").increment(1);
        tracing::debug!(uid = %uid, repos = repos.len(), "Synced user");
        Ok(())
    }

    /// One full-reconciliation tick over every directory user.
    pub async fn reconcile_all(&self) -> Result<(), ApiError> {
        counter!("reconcile_ticks_total").increment(1);

        // Tick-scoped machine credential; acquisition failure means the
        // identity provider is down and the tick is abandoned.
        if let Some(token_client) = &self.token_client {
            token_client.client_credentials_token().await?;
            tracing::debug!("Acquired machine token for reconcile tick");
        }

        self.ensure_owner_org().await?;

        // One deadline for the whole tick; each user additionally gets
        // the per-user bound, whichever is tighter.
        let tick = Deadline::after(RECONCILE_TICK_DEADLINE);
        let users = self.directory.list_users(tick).await?;
        let mut failed: Vec<String> = Vec::new();
        for user in &users {
            let per_user = Deadline::after(PER_USER_SYNC_DEADLINE).min(tick);
            match tokio::time::timeout(
                PER_USER_SYNC_DEADLINE,
                self.sync_user(&user.uid, per_user),
            )
            .await
            {
                Ok(Ok(())) => {}
                // The supplied deadline ran out mid-operation: distinct
                // from a sync that failed on its own.
                Ok(Err(ApiError::Directory(DirectoryError::Cancelled))) => {
                    tracing::warn!(uid = %user.uid, "Sync deadline elapsed during directory work");
                    failed.push(user.uid.clone());
                }
                Ok(Err(e)) => {
                    tracing::warn!(uid = %user.uid, error = %e, "User sync failed during reconcile");
                    failed.push(user.uid.clone());
                }
                Err(_) => {
                    tracing::warn!(uid = %user.uid, "User sync timed out during reconcile");
                    failed.push(user.uid.clone());
                }
            }
        }

        if !failed.is_empty() {
            counter!("reconcile_user_failures_total").increment(failed.len() as u64);
            let now = Utc::now();
            let mut shared = self.shared.lock().expect("sync lock poisoned");
            for uid in &failed {
                shared.queue.enqueue(uid, now);
            }
        }

        {
            let mut shared = self.shared.lock().expect("sync lock poisoned");
            shared.last_reconcile_success = Some(Utc::now());
        }
        self.persist().await;

        tracing::info!(
            users = users.len(),
            failed = failed.len(),
            "Full reconcile tick complete"
        );
        Ok(())
    }

    async fn sync_group_team(
        &self,
        group: &Group,
        members: &[String],
        deadline: Deadline,
    ) -> Result<(), ApiError> {
        let team = self.ensure_team(&group.cn, "write").await?;

        let current: Vec<String> = self
            .gitea
            .list_team_members(team.id)
            .await?
            .into_iter()
            .map(|u| u.login)
            .collect();

        for uid in members {
            if !current.iter().any(|c| c == uid) {
                self.ensure_gitea_user(uid, deadline).await?;
                self.gitea.add_team_member(team.id, uid).await?;
            }
        }
        // Team members absent from the directory projection are removed.
        for login in &current {
            if !members.iter().any(|m| m == login) {
                self.gitea.remove_team_member(team.id, login).await?;
                tracing::info!(team = %group.cn, uid = %login, "Removed stale team member");
            }
        }

        for raw in &group.repositories {
            let Ok(repo) = RepoRef::parse(raw, &self.opts.default_owner) else {
                tracing::warn!(group = %group.cn, raw = %raw, "Unparseable repository ref on group");
                continue;
            };
            if repo.owner != self.opts.default_owner {
                continue;
            }
            self.ensure_repo(&repo.name).await?;
            self.gitea
                .add_team_repo(team.id, &repo.owner, &repo.name)
                .await?;
        }
        Ok(())
    }

    /// Align every directory group (collab groups resolved dynamically)
    /// with a Gitea team of the same name. The pass itself has no
    /// specified bound, so directory lookups run unbounded.
    pub async fn sync_groups(&self) -> Result<(), ApiError> {
        self.ensure_owner_org().await?;

        let groups = self.directory.list_groups(Deadline::none()).await?;
        for group in &groups {
            let members = if group.is_collab() {
                match self
                    .directory
                    .resolve_collab_members(&group.cn, Deadline::none())
                    .await
                {
                    Ok(members) => members,
                    Err(e) => {
                        tracing::warn!(cn = %group.cn, error = %e, "Collab resolution failed");
                        continue;
                    }
                }
            } else {
                group.members.clone()
            };

            if let Err(e) = self
                .sync_group_team(group, &members, Deadline::none())
                .await
            {
                tracing::warn!(cn = %group.cn, error = %e, "Group team sync failed");
            }
        }
        tracing::debug!(groups = groups.len(), "Group team sync pass complete");
        Ok(())
    }

    /// Idempotently register this controller's webhook on the owner org:
    /// list, check URL equality, create only if missing. Returns true
    /// when a hook was created.
    pub async fn ensure_webhook(&self) -> Result<bool, ApiError> {
        let hooks = self.gitea.list_org_hooks(&self.opts.default_owner).await?;
        if hooks.iter().any(|h| h.url == self.opts.webhook_url) {
            return Ok(false);
        }
        self.gitea
            .create_org_hook(
                &self.opts.default_owner,
                &self.opts.webhook_url,
                vec!["repository".to_string()],
                self.opts.webhook_secret.as_deref(),
            )
            .await?;
        tracing::info!(url = %self.opts.webhook_url, "Registered Gitea webhook");
        Ok(true)
    }

    /// Process every retry item whose time has come. Items are split off
    /// under the queue lock and processed lock-free.
    pub async fn process_retries(&self) {
        let ready = {
            self.shared
                .lock()
                .expect("sync lock poisoned")
                .queue
                .take_ready(Utc::now())
        };
        if ready.is_empty() {
            return;
        }

        for item in ready {
            let attempt = item.attempts + 1;
            let deadline = Deadline::after(PER_USER_SYNC_DEADLINE);
            let outcome = tokio::time::timeout(
                PER_USER_SYNC_DEADLINE,
                self.sync_user(&item.uid, deadline),
            )
            .await;
            match outcome {
                Ok(Ok(())) => {
                    counter!("retry_success_total").increment(1);
                    tracing::info!(uid = %item.uid, attempt, "Retry succeeded");
                }
                Ok(Err(ApiError::Directory(DirectoryError::Cancelled))) => {
                    tracing::warn!(uid = %item.uid, attempt, "Retry deadline elapsed during directory work");
                    self.reschedule(item);
                }
                Ok(Err(e)) => {
                    tracing::warn!(uid = %item.uid, attempt, error = %e, "Retry failed");
                    self.reschedule(item);
                }
                Err(_) => {
                    tracing::warn!(uid = %item.uid, attempt, "Retry timed out");
                    self.reschedule(item);
                }
            }
        }
        self.persist().await;
    }

    fn reschedule(&self, item: crate::app::sync::retry::RetryItem) {
        let kept = self
            .shared
            .lock()
            .expect("sync lock poisoned")
            .queue
            .reschedule(item, Utc::now());
        if !kept {
            counter!("retry_dropped_total").increment(1);
        }
    }

    /// Spawn the four controller loops. Each exits at its next wait
    /// point once the shutdown channel fires; callers join the handles
    /// to gate process exit.
    pub fn spawn_loops(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Self::reconcile_loop(self.clone(), shutdown.clone())),
            tokio::spawn(Self::group_sync_loop(self.clone(), shutdown.clone())),
            tokio::spawn(Self::retry_loop(self.clone(), shutdown.clone())),
            tokio::spawn(Self::webhook_health_loop(self.clone(), shutdown)),
        ]
    }

    async fn reconcile_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if wait_or_shutdown(RECONCILE_INITIAL_DELAY, &mut shutdown).await {
            return;
        }
        loop {
            let tick = tokio::time::timeout(RECONCILE_TICK_DEADLINE, self.reconcile_all());
            tokio::select! {
                result = tick => match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "Full reconcile tick failed"),
                    Err(_) => {
                        counter!("reconcile_timeouts_total").increment(1);
                        tracing::warn!("Full reconcile tick exceeded deadline; next tick retries");
                    }
                },
                _ = shutdown.changed() => return,
            }
            if wait_or_shutdown(self.opts.reconcile_interval, &mut shutdown).await {
                return;
            }
        }
    }

    async fn group_sync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if wait_or_shutdown(RECONCILE_INITIAL_DELAY, &mut shutdown).await {
            return;
        }
        loop {
            tokio::select! {
                result = self.sync_groups() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Group sync pass failed");
                    }
                }
                _ = shutdown.changed() => return,
            }
            if wait_or_shutdown(self.opts.group_sync_interval, &mut shutdown).await {
                return;
            }
        }
    }

    async fn retry_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if wait_or_shutdown(self.opts.retry_interval, &mut shutdown).await {
                return;
            }
            tokio::select! {
                _ = self.process_retries() => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn webhook_health_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if wait_or_shutdown(WEBHOOK_HEALTH_INITIAL_DELAY, &mut shutdown).await {
            return;
        }
        loop {
            tokio::select! {
                result = self.ensure_webhook() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Webhook health check failed");
                    }
                }
                _ = shutdown.changed() => return,
            }
            if wait_or_shutdown(self.opts.webhook_health_interval, &mut shutdown).await {
                return;
            }
        }
    }
}

/// Sleep, returning true when the shutdown signal arrived instead.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

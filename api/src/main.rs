//! forgeplane API server
//!
//! Identity-driven control plane binding an LDAP directory, a Gitea git
//! server and Kubernetes-backed IDE workspaces. The directory is the
//! single source of truth; git entitlement and workspaces are derived
//! from it. Uses hexagonal (ports & adapters) architecture for clean
//! separation of concerns.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod adapters;
mod app;
mod auth;
mod config;
mod domain;
mod error;
mod handlers;
mod observability;

#[cfg(test)]
mod test_utils;

use adapters::{GiteaClientImpl, KubeClusterClient, LdapDirectoryStore, LdapPool};
use app::sync::{StateStore, SyncOptions, SyncService};
use app::{AccessService, WorkspaceOptions, WorkspaceService};
use auth::TokenClient;
use config::Config;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<LdapDirectoryStore>,
    pub gitea: Arc<GiteaClientImpl>,
    pub access: Arc<AccessService<LdapDirectoryStore>>,
    pub sync: Arc<SyncService<LdapDirectoryStore, GiteaClientImpl>>,
    pub workspaces:
        Arc<WorkspaceService<LdapDirectoryStore, GiteaClientImpl, KubeClusterClient>>,
    pub config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,forgeplane_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting forgeplane API...");

    // Load configuration
    let config = Config::from_env();

    let metrics_handle = observability::init_metrics();

    // Directory: bounded admin session pool + store
    let pool = LdapPool::new(
        config.ldap_url.clone(),
        config.ldap_bind_dn.clone(),
        config.ldap_bind_password.clone(),
        config.pool_capacity,
        config.pool_timeout,
        config.ldap_conn_timeout,
    );
    let directory = Arc::new(LdapDirectoryStore::new(
        pool,
        config.ldap_base_dn.clone(),
        config.starting_uid,
        config.starting_gid,
    ));

    let gitea = Arc::new(GiteaClientImpl::new(
        config.gitea_url.clone(),
        config.gitea_admin_token.clone(),
    ));

    // Cluster client; the mesh route client rides along only when a
    // per-user base domain is configured.
    let gateway = config
        .base_domain
        .as_ref()
        .map(|_| config.mesh_gateway.clone());
    let cluster = KubeClusterClient::connect(config.kube_namespace.clone(), gateway)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Kubernetes: {}", e))?;
    tracing::info!(namespace = %config.kube_namespace, "Kubernetes client ready");

    let access = Arc::new(AccessService::new(
        directory.clone(),
        config.default_owner.clone(),
    ));

    let token_client = if config.oidc_enabled() {
        Some(TokenClient::new(
            config.oidc_token_url.clone().unwrap(),
            config.oidc_client_id.clone().unwrap(),
            config.oidc_client_secret.clone().unwrap(),
        ))
    } else {
        tracing::warn!("Client-credentials grant not configured; reconcile runs without it");
        None
    };

    // Resume persisted controller state before the loops start.
    let state_store = StateStore::new(&config.data_dir);
    let initial_state = state_store.load().await;
    if !initial_state.retry_items.is_empty() {
        tracing::info!(
            queued = initial_state.retry_items.len(),
            "Resuming persisted retry queue"
        );
    }

    let sync = Arc::new(SyncService::new(
        directory.clone(),
        gitea.clone(),
        access.clone(),
        token_client,
        SyncOptions {
            default_owner: config.default_owner.clone(),
            webhook_url: config.webhook_url.clone(),
            webhook_secret: config.webhook_secret.clone(),
            reconcile_interval: config.reconcile_interval,
            group_sync_interval: config.group_sync_interval,
            webhook_health_interval: config.webhook_health_interval,
            retry_interval: config.retry_interval,
        },
        state_store,
        initial_state,
    ));

    let workspaces = Arc::new(WorkspaceService::new(
        directory.clone(),
        gitea.clone(),
        Arc::new(cluster),
        access.clone(),
        WorkspaceOptions {
            image: config.codeserver_image.clone(),
            pvc_size: config.pvc_size.clone(),
            pvc_storage_class: config.pvc_storage_class.clone(),
            cpu_request: config.codeserver_cpu.clone(),
            mem_request: config.codeserver_mem.clone(),
            cpu_limit: config.codeserver_cpu_max.clone(),
            mem_limit: config.codeserver_mem_max.clone(),
            base_domain: config.base_domain.clone(),
            gitea_url: config.gitea_url.clone(),
            default_owner: config.default_owner.clone(),
        },
    ));

    let state = AppState {
        directory: directory.clone(),
        gitea,
        access,
        sync: sync.clone(),
        workspaces,
        config: config.clone(),
    };

    // One broadcast shutdown signal; every loop exits at its next wait
    // point and process exit waits on all of them.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handles = sync.clone().spawn_loops(shutdown_rx);

    // Routes requiring a forwarded identity
    let identified_routes = Router::new()
        // Directory administration
        .route("/users", post(handlers::create_user).get(handlers::search_users))
        .route(
            "/users/:uid",
            get(handlers::get_user)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route("/users/:uid/authenticate", post(handlers::authenticate_user))
        .route(
            "/users/:uid/repositories",
            put(handlers::assign_user_repositories),
        )
        .route("/groups", post(handlers::create_group).get(handlers::list_groups))
        .route("/groups/collab", post(handlers::create_collab_group))
        .route(
            "/groups/:cn",
            get(handlers::get_group).delete(handlers::delete_group),
        )
        .route("/groups/:cn/members", post(handlers::add_member))
        .route("/groups/:cn/members/:uid", delete(handlers::remove_member))
        .route(
            "/groups/:cn/repositories",
            put(handlers::assign_group_repositories),
        )
        .route("/groups/:cn/resolved", get(handlers::resolve_collab_members))
        .route(
            "/departments",
            post(handlers::create_department).get(handlers::list_departments),
        )
        .route(
            "/departments/:ou",
            get(handlers::get_department).delete(handlers::delete_department),
        )
        .route(
            "/departments/:ou/repositories",
            put(handlers::assign_department_repositories),
        )
        .route("/departments/:ou/members", get(handlers::department_members))
        // Repository administration (centralized owner)
        .route("/repos", post(handlers::create_repo).get(handlers::list_repos))
        .route("/repos/fork", post(handlers::fork_repo))
        .route("/repos/migrate", post(handlers::migrate_repo))
        .route(
            "/repos/:name",
            get(handlers::get_repo).delete(handlers::delete_repo),
        )
        .route(
            "/repos/:name/branches",
            get(handlers::list_branches).post(handlers::create_branch),
        )
        .route(
            "/repos/:name/branches/:branch",
            delete(handlers::delete_branch),
        )
        // Access projection
        .route("/access/:uid", get(handlers::get_projection))
        .route("/access/:uid/check", get(handlers::check_access))
        // Workspaces
        .route(
            "/workspaces",
            post(handlers::provision).get(handlers::list_workspaces),
        )
        .route(
            "/workspaces/me",
            get(handlers::get_my_workspace).delete(handlers::delete_my_workspace),
        )
        .route("/workspaces/me/stop", post(handlers::stop_my_workspace))
        .route("/workspaces/me/restart", post(handlers::restart_my_workspace))
        .route("/workspaces/me/sync", post(handlers::sync_my_workspace))
        .route_layer(middleware::from_fn(auth::identity_middleware));

    // Build router
    let app = Router::new()
        // Health surface (no identity)
        .route("/health", get(observability::health))
        .route("/ready", get(observability::ready))
        // Webhook (no identity, uses signature verification)
        .route("/webhook/gitea", post(handlers::gitea_webhook))
        .merge(identified_routes)
        // Middleware
        .layer(middleware::from_fn(observability::track_metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Metrics on its own port
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let metrics_app = observability::metrics_router(metrics_handle);
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(metrics_addr)
            .await
            .expect("Failed to bind metrics listener");
        tracing::info!("Metrics listening on {}", metrics_addr);
        if let Err(e) = axum::serve(listener, metrics_app).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the controller loops and wait for each to exit before
    // closing the directory pool.
    tracing::info!("Shutting down controller loops...");
    let _ = shutdown_tx.send(true);
    for handle in loop_handles {
        let _ = handle.await;
    }
    directory.pool().close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

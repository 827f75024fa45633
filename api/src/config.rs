//! Process configuration
//!
//! Everything is read once at startup from the environment and is immutable
//! for the process lifetime. Cross-process settings (webhook secret, admin
//! credentials, default owner, base domain) have no reload path.

use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    // Directory
    pub ldap_url: String,
    pub ldap_base_dn: String,
    pub ldap_bind_dn: String,
    pub ldap_bind_password: String,
    pub pool_capacity: usize,
    pub pool_timeout: Duration,
    /// Per-connection dial and operation timeout
    pub ldap_conn_timeout: Duration,
    pub starting_uid: u32,
    pub starting_gid: u32,

    // Git server
    pub gitea_url: String,
    pub gitea_admin_token: String,
    /// Centralized owner org for all managed repositories
    pub default_owner: String,

    // Webhook
    /// Webhook secret for verifying Gitea webhooks (HMAC-SHA256)
    pub webhook_secret: Option<String>,
    /// Externally visible URL Gitea should deliver webhooks to
    pub webhook_url: String,

    // Reconciliation loop cadences
    pub reconcile_interval: Duration,
    pub group_sync_interval: Duration,
    pub webhook_health_interval: Duration,
    pub retry_interval: Duration,
    /// Parent directory of the persisted controller state file
    pub data_dir: String,

    // Identity provider (client-credentials grant)
    pub oidc_token_url: Option<String>,
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret: Option<String>,

    // Workspaces
    pub kube_namespace: String,
    pub codeserver_image: String,
    pub pvc_size: String,
    pub pvc_storage_class: Option<String>,
    pub codeserver_cpu: String,
    pub codeserver_mem: String,
    pub codeserver_cpu_max: String,
    pub codeserver_mem_max: String,
    /// Per-user hostname suffix; workspace routes are disabled when unset
    pub base_domain: Option<String>,
    /// Mesh gateway virtual routes bind to
    pub mesh_gateway: String,

    // Listeners
    pub port: u16,
    pub metrics_port: u16,
    pub api_base_url: String,
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_base_url = env::var("API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());

        Self {
            ldap_url: env::var("LDAP_URL").unwrap_or_else(|_| "ldap://localhost:389".to_string()),
            ldap_base_dn: env::var("LDAP_BASE_DN")
                .unwrap_or_else(|_| "dc=example,dc=org".to_string()),
            ldap_bind_dn: env::var("LDAP_BIND_DN").expect("LDAP_BIND_DN must be set"),
            ldap_bind_password: env::var("LDAP_BIND_PASSWORD")
                .expect("LDAP_BIND_PASSWORD must be set"),
            pool_capacity: env_parse("POOL_CAPACITY", 10),
            pool_timeout: env_secs("POOL_TIMEOUT", 5),
            ldap_conn_timeout: env_secs("LDAP_CONN_TIMEOUT", 10),
            starting_uid: env_parse("STARTING_UID", 10000),
            starting_gid: env_parse("STARTING_GID", 10000),

            gitea_url: env::var("GITEA_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            gitea_admin_token: env::var("GITEA_ADMIN_TOKEN")
                .expect("GITEA_ADMIN_TOKEN must be set"),
            default_owner: env::var("DEFAULT_OWNER").unwrap_or_else(|_| "platform".to_string()),

            webhook_secret: env::var("WEBHOOK_SECRET").ok(),
            webhook_url: env::var("WEBHOOK_URL")
                .unwrap_or_else(|_| format!("{}/webhook/gitea", api_base_url)),

            reconcile_interval: env_secs("RECONCILE_INTERVAL", 300),
            group_sync_interval: env_secs("GROUP_SYNC_INTERVAL", 300),
            webhook_health_interval: env_secs("WEBHOOK_HEALTH_INTERVAL", 300),
            retry_interval: env_secs("RETRY_INTERVAL", 5),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "/var/lib/forgeplane".to_string()),

            oidc_token_url: env::var("OIDC_TOKEN_URL").ok(),
            oidc_client_id: env::var("OIDC_CLIENT_ID").ok(),
            oidc_client_secret: env::var("OIDC_CLIENT_SECRET").ok(),

            kube_namespace: env::var("KUBE_NAMESPACE")
                .unwrap_or_else(|_| "workspaces".to_string()),
            codeserver_image: env::var("CODESERVER_IMAGE")
                .unwrap_or_else(|_| "codercom/code-server:latest".to_string()),
            pvc_size: env::var("PVC_SIZE").unwrap_or_else(|_| "10Gi".to_string()),
            pvc_storage_class: env::var("PVC_STORAGE_CLASS").ok(),
            codeserver_cpu: env::var("CODESERVER_CPU").unwrap_or_else(|_| "250m".to_string()),
            codeserver_mem: env::var("CODESERVER_MEM").unwrap_or_else(|_| "512Mi".to_string()),
            codeserver_cpu_max: env::var("CODESERVER_CPU_MAX").unwrap_or_else(|_| "1".to_string()),
            codeserver_mem_max: env::var("CODESERVER_MEM_MAX")
                .unwrap_or_else(|_| "2Gi".to_string()),
            base_domain: env::var("BASE_DOMAIN").ok(),
            mesh_gateway: env::var("MESH_GATEWAY")
                .unwrap_or_else(|_| "istio-system/ingressgateway".to_string()),

            port: env_parse("PORT", 8080),
            metrics_port: env_parse("METRICS_PORT", 9090),
            api_base_url,
        }
    }

    /// Check if the client-credentials grant is configured
    pub fn oidc_enabled(&self) -> bool {
        self.oidc_token_url.is_some()
            && self.oidc_client_id.is_some()
            && self.oidc_client_secret.is_some()
    }
}

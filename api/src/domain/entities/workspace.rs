//! Workspace entities
//!
//! A workspace is a per-user pod + volume + route hosting an IDE rooted in
//! a cloned repository. At most one workspace exists per uid; the volume
//! outlives pod deletions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kubernetes resource names derived from a uid.
///
/// Derivation is deterministic and idempotent: sanitizing a sanitized
/// name yields it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceNames {
    pub pod: String,
    pub volume: String,
    pub service: String,
    pub route: String,
}

/// Sanitize an identifier into a DNS-1123 label: lowercase, `.`/`_`/`@`
/// mapped to `-`, other non-alphanumerics dropped, dashes trimmed at both
/// ends, truncated to 63 characters.
pub fn sanitize_label(raw: &str) -> String {
    let mut out: String = raw
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => Some(c),
            '.' | '_' | '@' => Some('-'),
            _ => None,
        })
        .collect();
    out.truncate(63);
    out.trim_matches('-').to_string()
}

impl WorkspaceNames {
    pub fn for_uid(uid: &str) -> Self {
        let base = sanitize_label(uid);
        let bounded = |name: String| {
            let mut n = name;
            n.truncate(63);
            n.trim_matches('-').to_string()
        };
        WorkspaceNames {
            pod: bounded(format!("ws-{}", base)),
            volume: bounded(format!("ws-{}-data", base)),
            service: bounded(format!("ws-{}", base)),
            route: bounded(format!("ws-{}", base)),
        }
    }

    /// Per-user hostname under the configured base domain.
    pub fn hostname(&self, base_domain: &str) -> String {
        format!("{}.{}", self.route, base_domain)
    }
}

/// Workspace status projected from pod state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Pending,
    Starting,
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceStatus::Pending => write!(f, "pending"),
            WorkspaceStatus::Starting => write!(f, "starting"),
            WorkspaceStatus::Running => write!(f, "running"),
            WorkspaceStatus::Stopped => write!(f, "stopped"),
            WorkspaceStatus::Error => write!(f, "error"),
        }
    }
}

/// Raw pod observation reported by the cluster adapter
#[derive(Debug, Clone, Default)]
pub struct PodState {
    /// Pod phase string, `None` when the pod is absent
    pub phase: Option<String>,
    /// Any container in a waiting state
    pub any_waiting: bool,
    /// All containers passing their readiness probes
    pub all_ready: bool,
    pub created_at: Option<DateTime<Utc>>,
    /// Owning uid, from the pod's uid label
    pub uid: Option<String>,
    /// Cloned repository, from the pod's annotations
    pub repository: Option<String>,
    pub branch: Option<String>,
}

/// Map an observed pod state onto the workspace status surface.
pub fn project_status(state: &PodState) -> WorkspaceStatus {
    match state.phase.as_deref() {
        None | Some("Succeeded") => WorkspaceStatus::Stopped,
        Some("Failed") => WorkspaceStatus::Error,
        Some("Running") => {
            if state.all_ready {
                WorkspaceStatus::Running
            } else {
                WorkspaceStatus::Starting
            }
        }
        Some("Pending") => {
            if state.any_waiting {
                WorkspaceStatus::Starting
            } else {
                WorkspaceStatus::Pending
            }
        }
        Some(_) => WorkspaceStatus::Error,
    }
}

/// A provisioned (or observed) workspace
#[derive(Debug, Clone, Serialize)]
pub struct Workspace {
    pub uid: String,
    /// Normalized `owner/name` of the cloned repository
    pub repository: String,
    pub branch: String,
    pub status: WorkspaceStatus,
    pub pod_name: String,
    pub volume_name: String,
    pub service_name: String,
    /// Per-user hostname; absent when no mesh route is configured
    pub hostname: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Result of a provision call
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionOutcome {
    pub workspace: Workspace,
    /// False when an existing pod was reused
    pub is_new: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_maps_separators() {
        assert_eq!(sanitize_label("jane.doe"), "jane-doe");
        assert_eq!(sanitize_label("jane_doe@corp"), "jane-doe-corp");
    }

    #[test]
    fn sanitize_lowercases_and_trims_dashes() {
        assert_eq!(sanitize_label(".Jane.Doe."), "jane-doe");
        assert_eq!(sanitize_label("--x--"), "x");
    }

    #[test]
    fn sanitize_drops_unknown_chars() {
        assert_eq!(sanitize_label("jane doe#1"), "janedoe1");
    }

    #[test]
    fn sanitize_truncates_to_63() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_label(&long).len(), 63);
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["jane.doe", "J_ane@Corp", "--ws--", &"b".repeat(90)] {
            let once = sanitize_label(raw);
            assert_eq!(sanitize_label(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn names_are_stable() {
        let a = WorkspaceNames::for_uid("jane.doe");
        let b = WorkspaceNames::for_uid("jane.doe");
        assert_eq!(a, b);
        assert_eq!(a.pod, "ws-jane-doe");
        assert_eq!(a.volume, "ws-jane-doe-data");
    }

    #[test]
    fn hostname_uses_base_domain() {
        let names = WorkspaceNames::for_uid("jane.doe");
        assert_eq!(names.hostname("ide.example.org"), "ws-jane-doe.ide.example.org");
    }

    #[test]
    fn status_projection() {
        let absent = PodState::default();
        assert_eq!(project_status(&absent), WorkspaceStatus::Stopped);

        let running_ready = PodState {
            phase: Some("Running".into()),
            all_ready: true,
            ..Default::default()
        };
        assert_eq!(project_status(&running_ready), WorkspaceStatus::Running);

        let running_not_ready = PodState {
            phase: Some("Running".into()),
            ..Default::default()
        };
        assert_eq!(project_status(&running_not_ready), WorkspaceStatus::Starting);

        let pending_waiting = PodState {
            phase: Some("Pending".into()),
            any_waiting: true,
            ..Default::default()
        };
        assert_eq!(project_status(&pending_waiting), WorkspaceStatus::Starting);

        let pending = PodState {
            phase: Some("Pending".into()),
            ..Default::default()
        };
        assert_eq!(project_status(&pending), WorkspaceStatus::Pending);

        let failed = PodState {
            phase: Some("Failed".into()),
            ..Default::default()
        };
        assert_eq!(project_status(&failed), WorkspaceStatus::Error);

        let weird = PodState {
            phase: Some("Unknown".into()),
            ..Default::default()
        };
        assert_eq!(project_status(&weird), WorkspaceStatus::Error);
    }
}

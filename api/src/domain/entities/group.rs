//! Group directory entities
//!
//! Groups hold member uids as plain strings, never handles to users; the
//! reverse direction ("which groups contain u") is answered by a filtered
//! directory search. Collab groups resolve their membership dynamically
//! from a base department plus an extra-member list.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Placeholder member uid kept on every group so the directory schema's
/// minimum-one-member constraint is always satisfied. Filtered from all
/// public member lists; never part of cascade targets.
pub const PLACEHOLDER_UID: &str = "placeholder";

/// Prefix marking a group as dynamically resolved
pub const COLLAB_PREFIX: &str = "collab-";

/// A directory group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub cn: String,
    pub description: Option<String>,
    pub gid_number: u32,
    /// Member uids, placeholder excluded
    pub members: Vec<String>,
    /// Raw assigned repository refs
    pub repositories: BTreeSet<String>,
}

impl Group {
    pub fn is_collab(&self) -> bool {
        is_collab_cn(&self.cn)
    }
}

/// Data needed to create a group
#[derive(Debug, Clone, Deserialize)]
pub struct NewGroup {
    pub cn: String,
    pub description: Option<String>,
    #[serde(default)]
    pub repositories: BTreeSet<String>,
}

/// A collab group: membership resolved at read time as
/// `members(base_department) ∪ extra_members`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabGroup {
    pub cn: String,
    pub base_department: String,
    /// Explicit members beyond the department, placeholder excluded
    pub extra_members: Vec<String>,
    pub repositories: BTreeSet<String>,
}

/// Data needed to create a collab group. The `collab-` prefix is applied
/// by the store if absent.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCollabGroup {
    pub cn: String,
    pub base_department: String,
    #[serde(default)]
    pub extra_members: Vec<String>,
    #[serde(default)]
    pub repositories: BTreeSet<String>,
}

pub fn is_collab_cn(cn: &str) -> bool {
    cn.starts_with(COLLAB_PREFIX)
}

/// Union of department members and extra members, deduplicated with the
/// placeholder removed.
pub fn resolve_collab_members(
    department_members: &[String],
    extra_members: &[String],
) -> Vec<String> {
    let mut set: BTreeSet<&str> = department_members
        .iter()
        .map(|s| s.as_str())
        .chain(extra_members.iter().map(|s| s.as_str()))
        .filter(|uid| *uid != PLACEHOLDER_UID)
        .collect();
    set.remove("");
    set.into_iter().map(|s| s.to_string()).collect()
}

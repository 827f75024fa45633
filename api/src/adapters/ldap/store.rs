//! LDAP directory store implementation
//!
//! Maps the directory's attribute-level schema onto the domain entities:
//! users under `ou=users`, groups under `ou=groups`, departments under
//! `ou=departments`. Repository assignments live in the multi-valued
//! `giteaRepository` attribute carried by the auxiliary `giteaAccount`
//! object class.
//!
//! Group mutations cascade into member entries within the same pooled
//! session. The triggering write is never rolled back on cascade failure;
//! the reconcile loop repairs any drift.
//!
//! The caller's deadline rides through every operation: it bounds the
//! pool acquisition (cancelled when it elapses first) and clamps each
//! per-operation timeout to whatever time remains.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{dn_escape, ldap_escape, Ldap, Mod, Scope, SearchEntry};
use metrics::counter;

use crate::adapters::ldap::pool::LdapPool;
use crate::domain::entities::{
    is_collab_cn, resolve_collab_members, validate_uid, CollabGroup, Department, Group,
    NewCollabGroup, NewDepartment, NewGroup, NewUser, User, UserQuery, UserUpdate, COLLAB_PREFIX,
    PLACEHOLDER_UID,
};
use crate::domain::ports::{CascadeReport, DirectoryStore};
use crate::domain::Deadline;
use crate::error::DirectoryError;

/// Custom multi-valued attribute holding raw repository refs
const REPO_ATTR: &str = "giteaRepository";
/// Auxiliary object class permitting [`REPO_ATTR`] (and `manager` on OUs)
const REPO_CLASS: &str = "giteaAccount";

const USER_ATTRS: &[&str] = &[
    "uid",
    "cn",
    "displayName",
    "sn",
    "givenName",
    "mail",
    "departmentNumber",
    "uidNumber",
    "gidNumber",
    "homeDirectory",
    REPO_ATTR,
];

const GROUP_ATTRS: &[&str] = &[
    "cn",
    "description",
    "gidNumber",
    "member",
    "ou",
    "objectClass",
    REPO_ATTR,
];

const DEPT_ATTRS: &[&str] = &["ou", "description", "manager", "objectClass", REPO_ATTR];

/// Directory store over the pooled LDAP client
pub struct LdapDirectoryStore {
    pool: LdapPool,
    base_dn: String,
    next_uid: AtomicU32,
    next_gid: AtomicU32,
}

impl LdapDirectoryStore {
    pub fn new(pool: LdapPool, base_dn: String, starting_uid: u32, starting_gid: u32) -> Self {
        LdapDirectoryStore {
            pool,
            base_dn,
            next_uid: AtomicU32::new(starting_uid),
            next_gid: AtomicU32::new(starting_gid),
        }
    }

    pub fn pool(&self) -> &LdapPool {
        &self.pool
    }

    // Counters are process-local and never reuse a value within a
    // process lifetime.
    fn alloc_uid_number(&self) -> u32 {
        self.next_uid.fetch_add(1, Ordering::Relaxed)
    }

    fn alloc_gid_number(&self) -> u32 {
        self.next_gid.fetch_add(1, Ordering::Relaxed)
    }

    /// Per-operation timeout: the connection timeout clamped to the time
    /// left on the caller's deadline.
    fn op_timeout(&self, deadline: Deadline) -> Duration {
        deadline.clamp(self.pool.conn_timeout())
    }

    fn users_base(&self) -> String {
        format!("ou=users,{}", self.base_dn)
    }

    fn groups_base(&self) -> String {
        format!("ou=groups,{}", self.base_dn)
    }

    fn departments_base(&self) -> String {
        format!("ou=departments,{}", self.base_dn)
    }

    fn user_dn(&self, uid: &str) -> String {
        format!("uid={},{}", dn_escape(uid), self.users_base())
    }

    fn group_dn(&self, cn: &str) -> String {
        format!("cn={},{}", dn_escape(cn), self.groups_base())
    }

    fn department_dn(&self, ou: &str) -> String {
        format!("ou={},{}", dn_escape(ou), self.departments_base())
    }

    fn placeholder_dn(&self) -> String {
        self.user_dn(PLACEHOLDER_UID)
    }

    async fn search_one(
        &self,
        ldap: &mut Ldap,
        dn: &str,
        filter: &str,
        attrs: &[&str],
        what: &str,
        deadline: Deadline,
    ) -> Result<SearchEntry, DirectoryError> {
        deadline.check()?;
        let (entries, _) = ldap
            .with_timeout(self.op_timeout(deadline))
            .search(dn, Scope::Base, filter, attrs.to_vec())
            .await?
            .success()
            .map_err(|e| map_result_err(e, what))?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::NotFound(what.to_string()))?;
        Ok(SearchEntry::construct(entry))
    }

    async fn search_subtree(
        &self,
        ldap: &mut Ldap,
        base: &str,
        filter: &str,
        attrs: &[&str],
        deadline: Deadline,
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        deadline.check()?;
        let (entries, _) = ldap
            .with_timeout(self.op_timeout(deadline))
            .search(base, Scope::OneLevel, filter, attrs.to_vec())
            .await?
            .success()
            .map_err(|e| map_result_err(e, base))?;
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    /// Groups listing the user as a member, looked up by a filtered
    /// search on the member attribute within the given session.
    async fn groups_of_user_in(
        &self,
        ldap: &mut Ldap,
        uid: &str,
        deadline: Deadline,
    ) -> Result<Vec<Group>, DirectoryError> {
        let filter = format!(
            "(&(objectClass=groupOfNames)(member={}))",
            ldap_escape(&self.user_dn(uid))
        );
        let entries = self
            .search_subtree(ldap, &self.groups_base(), &filter, GROUP_ATTRS, deadline)
            .await?;
        Ok(entries.iter().map(group_from_entry).collect())
    }

    /// Recompute one member's repository attribute as the union over
    /// their still-current group memberships, and overwrite it.
    ///
    /// Runs inside the caller's session to avoid pool exhaustion during
    /// wide cascades. Every write is a full replace, so each step is
    /// independently idempotent.
    async fn cascade_user(
        &self,
        ldap: &mut Ldap,
        uid: &str,
        deadline: Deadline,
    ) -> Result<(), DirectoryError> {
        let groups = self.groups_of_user_in(ldap, uid, deadline).await?;
        let union: HashSet<String> = groups
            .into_iter()
            .flat_map(|g| g.repositories.into_iter())
            .collect();

        deadline.check()?;
        let timeout = self.op_timeout(deadline);
        let dn = self.user_dn(uid);
        let mods = vec![Mod::Replace(REPO_ATTR.to_string(), union.clone())];
        let outcome = ldap
            .with_timeout(timeout)
            .modify(&dn, mods)
            .await?
            .success();

        match outcome {
            Ok(_) => Ok(()),
            // Object-class violation: the entry predates the custom
            // schema. Extend it and retry once.
            Err(e) if result_rc(&e) == Some(65) => {
                ldap.with_timeout(timeout)
                    .modify(
                        &dn,
                        vec![Mod::Add(
                            "objectClass".to_string(),
                            HashSet::from([REPO_CLASS.to_string()]),
                        )],
                    )
                    .await?
                    .success()
                    .map_err(|e| map_result_err(e, uid))?;
                ldap.with_timeout(timeout)
                    .modify(&dn, vec![Mod::Replace(REPO_ATTR.to_string(), union)])
                    .await?
                    .success()
                    .map_err(|e| map_result_err(e, uid))?;
                Ok(())
            }
            Err(e) => Err(map_result_err(e, uid)),
        }
    }

    /// Run the cascade for a set of members, collecting per-member
    /// failures instead of aborting. The triggering mutation stays
    /// durable either way.
    async fn cascade_members(
        &self,
        ldap: &mut Ldap,
        members: &[String],
        deadline: Deadline,
    ) -> CascadeReport {
        let mut report = CascadeReport::default();
        for uid in members {
            if uid == PLACEHOLDER_UID {
                continue;
            }
            match self.cascade_user(ldap, uid, deadline).await {
                Ok(()) => report.updated.push(uid.clone()),
                Err(e) => {
                    counter!("cascade_failures_total").increment(1);
                    tracing::warn!(uid = %uid, error = %e, "Cascade step failed; reconcile will repair");
                    report.failed.push((uid.clone(), e.to_string()));
                }
            }
        }
        report
    }

    /// Reject an email already used by a different user.
    async fn check_email_free(
        &self,
        ldap: &mut Ldap,
        email: &str,
        exclude_uid: Option<&str>,
        deadline: Deadline,
    ) -> Result<(), DirectoryError> {
        let filter = format!(
            "(&(objectClass=inetOrgPerson)(mail={}))",
            ldap_escape(email)
        );
        let entries = self
            .search_subtree(ldap, &self.users_base(), &filter, &["uid"], deadline)
            .await?;
        for entry in entries {
            let uid = attr_first(&entry, "uid").unwrap_or_default();
            if Some(uid.as_str()) != exclude_uid {
                return Err(DirectoryError::AlreadyExists(format!(
                    "email already in use: {}",
                    email
                )));
            }
        }
        Ok(())
    }
}

fn attr_first(entry: &SearchEntry, name: &str) -> Option<String> {
    entry.attrs.get(name).and_then(|v| v.first()).cloned()
}

fn attr_all(entry: &SearchEntry, name: &str) -> Vec<String> {
    entry.attrs.get(name).cloned().unwrap_or_default()
}

fn attr_u32(entry: &SearchEntry, name: &str) -> u32 {
    attr_first(entry, name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// First RDN value of a member DN, when it names a uid.
fn uid_from_dn(dn: &str) -> Option<String> {
    let rdn = dn.split(',').next()?;
    let (attr, value) = rdn.split_once('=')?;
    if attr.trim().eq_ignore_ascii_case("uid") {
        Some(value.trim().to_string())
    } else {
        None
    }
}

fn has_class(entry: &SearchEntry, class: &str) -> bool {
    attr_all(entry, "objectClass")
        .iter()
        .any(|c| c.eq_ignore_ascii_case(class))
}

fn user_from_entry(entry: &SearchEntry) -> User {
    User {
        uid: attr_first(entry, "uid").unwrap_or_default(),
        display_name: attr_first(entry, "displayName").or_else(|| attr_first(entry, "cn")),
        surname: attr_first(entry, "sn"),
        given_name: attr_first(entry, "givenName"),
        email: attr_first(entry, "mail"),
        department: attr_first(entry, "departmentNumber"),
        uid_number: attr_u32(entry, "uidNumber"),
        gid_number: attr_u32(entry, "gidNumber"),
        home_directory: attr_first(entry, "homeDirectory").unwrap_or_default(),
        repositories: attr_all(entry, REPO_ATTR).into_iter().collect(),
    }
}

fn group_from_entry(entry: &SearchEntry) -> Group {
    let members = attr_all(entry, "member")
        .iter()
        .filter_map(|dn| uid_from_dn(dn))
        .filter(|uid| uid != PLACEHOLDER_UID)
        .collect();
    Group {
        cn: attr_first(entry, "cn").unwrap_or_default(),
        description: attr_first(entry, "description"),
        gid_number: attr_u32(entry, "gidNumber"),
        members,
        repositories: attr_all(entry, REPO_ATTR).into_iter().collect(),
    }
}

fn department_from_entry(entry: &SearchEntry) -> Department {
    Department {
        ou: attr_first(entry, "ou").unwrap_or_default(),
        description: attr_first(entry, "description"),
        manager: attr_first(entry, "manager").and_then(|dn| uid_from_dn(&dn)),
        repositories: attr_all(entry, REPO_ATTR).into_iter().collect(),
    }
}

fn result_rc(err: &ldap3::LdapError) -> Option<u32> {
    match err {
        ldap3::LdapError::LdapResult { result } => Some(result.rc),
        _ => None,
    }
}

/// Translate a directory result code into the error taxonomy.
fn map_result_err(err: ldap3::LdapError, what: &str) -> DirectoryError {
    match result_rc(&err) {
        Some(3) => DirectoryError::Timeout,
        Some(32) => DirectoryError::NotFound(what.to_string()),
        Some(68) => DirectoryError::AlreadyExists(what.to_string()),
        Some(17) | Some(65) => DirectoryError::Schema(format!("{}: {}", what, err)),
        Some(21) | Some(34) => DirectoryError::Invalid(format!("{}: {}", what, err)),
        Some(88) => DirectoryError::Cancelled,
        _ => DirectoryError::Protocol(err),
    }
}

/// Substring assertion on an escaped value
fn substring(field: &str, value: &str) -> String {
    format!("({}=*{}*)", field, ldap_escape(value))
}

/// Equality assertion on an escaped value
fn exact(field: &str, value: &str) -> String {
    format!("({}={})", field, ldap_escape(value))
}

/// Conjunctive user search filter; every user-supplied value is escaped
/// before concatenation.
fn user_filter(query: &UserQuery) -> String {
    let mut parts = vec![
        "(objectClass=inetOrgPerson)".to_string(),
        format!("(!(uid={}))", PLACEHOLDER_UID),
    ];
    if let Some(v) = &query.uid {
        parts.push(substring("uid", v));
    }
    if let Some(v) = &query.display_name {
        parts.push(substring("displayName", v));
    }
    if let Some(v) = &query.surname {
        parts.push(substring("sn", v));
    }
    if let Some(v) = &query.given_name {
        parts.push(substring("givenName", v));
    }
    if let Some(v) = &query.email {
        parts.push(substring("mail", v));
    }
    if let Some(v) = &query.department {
        parts.push(exact("departmentNumber", v));
    }
    if let Some(v) = &query.uid_number {
        parts.push(format!("(uidNumber={})", v));
    }
    if let Some(v) = &query.gid_number {
        parts.push(format!("(gidNumber={})", v));
    }
    if let Some(v) = &query.repository {
        // Best-effort: substring indexing on this attribute varies
        // across directory servers.
        parts.push(substring(REPO_ATTR, v));
    }
    format!("(&{})", parts.concat())
}

fn string_set<I: IntoIterator<Item = String>>(values: I) -> HashSet<String> {
    values.into_iter().collect()
}

#[async_trait]
impl DirectoryStore for LdapDirectoryStore {
    async fn create_user(
        &self,
        new: &NewUser,
        deadline: Deadline,
    ) -> Result<User, DirectoryError> {
        validate_uid(&new.uid).map_err(DirectoryError::Invalid)?;

        let mut conn = self.pool.acquire(deadline).await?;
        if let Some(email) = &new.email {
            self.check_email_free(&mut conn, email, None, deadline)
                .await?;
        }

        let uid_number = self.alloc_uid_number();
        let cn = new
            .display_name
            .clone()
            .unwrap_or_else(|| new.uid.clone());
        let sn = new.surname.clone().unwrap_or_else(|| new.uid.clone());
        let home = format!("/home/{}", new.uid);

        let mut attrs: Vec<(String, HashSet<String>)> = vec![
            (
                "objectClass".to_string(),
                string_set([
                    "inetOrgPerson".to_string(),
                    "posixAccount".to_string(),
                    REPO_CLASS.to_string(),
                ]),
            ),
            ("uid".to_string(), string_set([new.uid.clone()])),
            ("cn".to_string(), string_set([cn.clone()])),
            ("sn".to_string(), string_set([sn.clone()])),
            ("displayName".to_string(), string_set([cn.clone()])),
            (
                "uidNumber".to_string(),
                string_set([uid_number.to_string()]),
            ),
            (
                // User-private group: gidNumber mirrors uidNumber.
                "gidNumber".to_string(),
                string_set([uid_number.to_string()]),
            ),
            ("homeDirectory".to_string(), string_set([home.clone()])),
        ];
        if let Some(v) = &new.given_name {
            attrs.push(("givenName".to_string(), string_set([v.clone()])));
        }
        if let Some(v) = &new.email {
            attrs.push(("mail".to_string(), string_set([v.clone()])));
        }
        if let Some(v) = &new.department {
            attrs.push(("departmentNumber".to_string(), string_set([v.clone()])));
        }
        if let Some(v) = &new.password {
            attrs.push(("userPassword".to_string(), string_set([v.clone()])));
        }
        if !new.repositories.is_empty() {
            attrs.push((
                REPO_ATTR.to_string(),
                string_set(new.repositories.iter().cloned()),
            ));
        }

        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .add(&self.user_dn(&new.uid), attrs)
            .await?
            .success()
            .map_err(|e| map_result_err(e, &new.uid))?;

        tracing::info!(uid = %new.uid, uid_number, "Created directory user");

        Ok(User {
            uid: new.uid.clone(),
            display_name: Some(cn),
            surname: Some(sn),
            given_name: new.given_name.clone(),
            email: new.email.clone(),
            department: new.department.clone(),
            uid_number,
            gid_number: uid_number,
            home_directory: home,
            repositories: new.repositories.clone(),
        })
    }

    async fn get_user(&self, uid: &str, deadline: Deadline) -> Result<User, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let entry = self
            .search_one(
                &mut conn,
                &self.user_dn(uid),
                "(objectClass=inetOrgPerson)",
                USER_ATTRS,
                uid,
                deadline,
            )
            .await?;
        Ok(user_from_entry(&entry))
    }

    async fn list_users(&self, deadline: Deadline) -> Result<Vec<User>, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let filter = format!(
            "(&(objectClass=inetOrgPerson)(!(uid={})))",
            PLACEHOLDER_UID
        );
        let entries = self
            .search_subtree(&mut conn, &self.users_base(), &filter, USER_ATTRS, deadline)
            .await?;
        Ok(entries.iter().map(user_from_entry).collect())
    }

    async fn search_users(
        &self,
        query: &UserQuery,
        deadline: Deadline,
    ) -> Result<Vec<User>, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let filter = user_filter(query);
        let entries = self
            .search_subtree(&mut conn, &self.users_base(), &filter, USER_ATTRS, deadline)
            .await?;
        Ok(entries.iter().map(user_from_entry).collect())
    }

    async fn update_user(
        &self,
        uid: &str,
        update: &UserUpdate,
        deadline: Deadline,
    ) -> Result<User, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        if let Some(email) = &update.email {
            self.check_email_free(&mut conn, email, Some(uid), deadline)
                .await?;
        }

        let mut mods: Vec<Mod<String>> = Vec::new();
        if let Some(v) = &update.display_name {
            mods.push(Mod::Replace(
                "displayName".to_string(),
                string_set([v.clone()]),
            ));
            mods.push(Mod::Replace("cn".to_string(), string_set([v.clone()])));
        }
        if let Some(v) = &update.surname {
            mods.push(Mod::Replace("sn".to_string(), string_set([v.clone()])));
        }
        if let Some(v) = &update.given_name {
            mods.push(Mod::Replace(
                "givenName".to_string(),
                string_set([v.clone()]),
            ));
        }
        if let Some(v) = &update.email {
            mods.push(Mod::Replace("mail".to_string(), string_set([v.clone()])));
        }
        if let Some(v) = &update.department {
            mods.push(Mod::Replace(
                "departmentNumber".to_string(),
                string_set([v.clone()]),
            ));
        }
        if let Some(v) = &update.password {
            mods.push(Mod::Replace(
                "userPassword".to_string(),
                string_set([v.clone()]),
            ));
        }
        if let Some(repos) = &update.repositories {
            // An empty set clears the attribute.
            mods.push(Mod::Replace(
                REPO_ATTR.to_string(),
                string_set(repos.iter().cloned()),
            ));
        }

        if !mods.is_empty() {
            deadline.check()?;
            conn.with_timeout(self.op_timeout(deadline))
                .modify(&self.user_dn(uid), mods)
                .await?
                .success()
                .map_err(|e| map_result_err(e, uid))?;
        }

        let entry = self
            .search_one(
                &mut conn,
                &self.user_dn(uid),
                "(objectClass=inetOrgPerson)",
                USER_ATTRS,
                uid,
                deadline,
            )
            .await?;
        Ok(user_from_entry(&entry))
    }

    async fn delete_user(&self, uid: &str, deadline: Deadline) -> Result<(), DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let timeout = self.op_timeout(deadline);

        // Drop membership references first so groups never point at a
        // missing entry. Best effort: a failure here leaves the member
        // value for the reconcile pass to clean up.
        let member_dn = self.user_dn(uid);
        match self.groups_of_user_in(&mut conn, uid, deadline).await {
            Ok(groups) => {
                for group in groups {
                    let res = conn
                        .with_timeout(timeout)
                        .modify(
                            &self.group_dn(&group.cn),
                            vec![Mod::Delete(
                                "member".to_string(),
                                string_set([member_dn.clone()]),
                            )],
                        )
                        .await
                        .and_then(|r| r.success());
                    if let Err(e) = res {
                        tracing::warn!(uid = %uid, group = %group.cn, error = %e,
                            "Failed to drop membership during user delete");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(uid = %uid, error = %e, "Membership lookup failed during user delete");
            }
        }

        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .delete(&self.user_dn(uid))
            .await?
            .success()
            .map_err(|e| map_result_err(e, uid))?;
        tracing::info!(uid = %uid, "Deleted directory user");
        Ok(())
    }

    async fn authenticate(
        &self,
        uid: &str,
        password: &str,
        deadline: Deadline,
    ) -> Result<bool, DirectoryError> {
        // An empty password would be an unauthenticated bind, which the
        // server reports as success.
        if password.is_empty() {
            return Ok(false);
        }
        deadline.check()?;

        // Dedicated session: authentication attempts must never consume
        // or rebind pooled admin sessions.
        let mut ldap = self.pool.dial_unbound().await?;
        let bound = ldap
            .with_timeout(self.op_timeout(deadline))
            .simple_bind(&self.user_dn(uid), password)
            .await?;
        let ok = bound.rc == 0;
        if let Err(e) = ldap.unbind().await {
            tracing::debug!(error = %e, "Unbind after authentication failed");
        }
        Ok(ok)
    }

    async fn create_group(
        &self,
        new: &NewGroup,
        deadline: Deadline,
    ) -> Result<Group, DirectoryError> {
        validate_uid(&new.cn).map_err(DirectoryError::Invalid)?;
        let mut conn = self.pool.acquire(deadline).await?;
        let gid_number = self.alloc_gid_number();

        let mut classes = vec!["groupOfNames".to_string(), "posixGroup".to_string()];
        if !new.repositories.is_empty() {
            classes.push(REPO_CLASS.to_string());
        }
        let mut attrs: Vec<(String, HashSet<String>)> = vec![
            ("objectClass".to_string(), string_set(classes)),
            ("cn".to_string(), string_set([new.cn.clone()])),
            (
                "gidNumber".to_string(),
                string_set([gid_number.to_string()]),
            ),
            // Placeholder satisfies the schema's minimum-one-member rule.
            ("member".to_string(), string_set([self.placeholder_dn()])),
        ];
        if let Some(v) = &new.description {
            attrs.push(("description".to_string(), string_set([v.clone()])));
        }
        if !new.repositories.is_empty() {
            attrs.push((
                REPO_ATTR.to_string(),
                string_set(new.repositories.iter().cloned()),
            ));
        }

        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .add(&self.group_dn(&new.cn), attrs)
            .await?
            .success()
            .map_err(|e| map_result_err(e, &new.cn))?;

        tracing::info!(cn = %new.cn, gid_number, "Created directory group");

        Ok(Group {
            cn: new.cn.clone(),
            description: new.description.clone(),
            gid_number,
            members: Vec::new(),
            repositories: new.repositories.clone(),
        })
    }

    async fn get_group(&self, cn: &str, deadline: Deadline) -> Result<Group, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let entry = self
            .search_one(
                &mut conn,
                &self.group_dn(cn),
                "(objectClass=groupOfNames)",
                GROUP_ATTRS,
                cn,
                deadline,
            )
            .await?;
        Ok(group_from_entry(&entry))
    }

    async fn list_groups(&self, deadline: Deadline) -> Result<Vec<Group>, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let entries = self
            .search_subtree(
                &mut conn,
                &self.groups_base(),
                "(objectClass=groupOfNames)",
                GROUP_ATTRS,
                deadline,
            )
            .await?;
        Ok(entries.iter().map(group_from_entry).collect())
    }

    async fn delete_group(
        &self,
        cn: &str,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let entry = self
            .search_one(
                &mut conn,
                &self.group_dn(cn),
                "(objectClass=groupOfNames)",
                GROUP_ATTRS,
                cn,
                deadline,
            )
            .await?;
        let group = group_from_entry(&entry);

        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .delete(&self.group_dn(cn))
            .await?
            .success()
            .map_err(|e| map_result_err(e, cn))?;

        // Former members lose this group's refs.
        let report = self
            .cascade_members(&mut conn, &group.members, deadline)
            .await;
        tracing::info!(cn = %cn, members = group.members.len(), "Deleted directory group");
        Ok(report)
    }

    async fn add_group_member(
        &self,
        cn: &str,
        uid: &str,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;

        // Member uids must reference existing users.
        self.search_one(
            &mut conn,
            &self.user_dn(uid),
            "(objectClass=inetOrgPerson)",
            &["uid"],
            uid,
            deadline,
        )
        .await?;

        deadline.check()?;
        let outcome = conn
            .with_timeout(self.op_timeout(deadline))
            .modify(
                &self.group_dn(cn),
                vec![Mod::Add(
                    "member".to_string(),
                    string_set([self.user_dn(uid)]),
                )],
            )
            .await?
            .success();
        match outcome {
            Ok(_) => {}
            // Already a member: idempotent no-op.
            Err(e) if result_rc(&e) == Some(20) => {}
            Err(e) => return Err(map_result_err(e, cn)),
        }

        Ok(self
            .cascade_members(&mut conn, &[uid.to_string()], deadline)
            .await)
    }

    async fn remove_group_member(
        &self,
        cn: &str,
        uid: &str,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        deadline.check()?;
        let outcome = conn
            .with_timeout(self.op_timeout(deadline))
            .modify(
                &self.group_dn(cn),
                vec![Mod::Delete(
                    "member".to_string(),
                    string_set([self.user_dn(uid)]),
                )],
            )
            .await?
            .success();
        match outcome {
            Ok(_) => {}
            // Not a member: idempotent no-op.
            Err(e) if result_rc(&e) == Some(16) => {}
            Err(e) => return Err(map_result_err(e, cn)),
        }

        Ok(self
            .cascade_members(&mut conn, &[uid.to_string()], deadline)
            .await)
    }

    async fn assign_group_repositories(
        &self,
        cn: &str,
        repositories: &BTreeSet<String>,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let entry = self
            .search_one(
                &mut conn,
                &self.group_dn(cn),
                "(objectClass=groupOfNames)",
                GROUP_ATTRS,
                cn,
                deadline,
            )
            .await?;
        let group = group_from_entry(&entry);

        // Extend the object class when the custom attribute is not yet
        // permitted, then replace the whole set in one modify.
        let mut mods: Vec<Mod<String>> = Vec::new();
        if !has_class(&entry, REPO_CLASS) {
            mods.push(Mod::Add(
                "objectClass".to_string(),
                string_set([REPO_CLASS.to_string()]),
            ));
        }
        mods.push(Mod::Replace(
            REPO_ATTR.to_string(),
            string_set(repositories.iter().cloned()),
        ));

        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .modify(&self.group_dn(cn), mods)
            .await?
            .success()
            .map_err(|e| map_result_err(e, cn))?;

        tracing::info!(cn = %cn, repositories = repositories.len(), "Assigned group repositories");

        Ok(self
            .cascade_members(&mut conn, &group.members, deadline)
            .await)
    }

    async fn groups_of_user(
        &self,
        uid: &str,
        deadline: Deadline,
    ) -> Result<Vec<Group>, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        self.groups_of_user_in(&mut conn, uid, deadline).await
    }

    async fn create_department(
        &self,
        new: &NewDepartment,
        deadline: Deadline,
    ) -> Result<Department, DirectoryError> {
        validate_uid(&new.ou).map_err(DirectoryError::Invalid)?;
        let mut conn = self.pool.acquire(deadline).await?;

        let mut classes = vec!["organizationalUnit".to_string()];
        if !new.repositories.is_empty() || new.manager.is_some() {
            classes.push(REPO_CLASS.to_string());
        }
        let mut attrs: Vec<(String, HashSet<String>)> = vec![
            ("objectClass".to_string(), string_set(classes)),
            ("ou".to_string(), string_set([new.ou.clone()])),
        ];
        if let Some(v) = &new.description {
            attrs.push(("description".to_string(), string_set([v.clone()])));
        }
        if let Some(v) = &new.manager {
            attrs.push(("manager".to_string(), string_set([self.user_dn(v)])));
        }
        if !new.repositories.is_empty() {
            attrs.push((
                REPO_ATTR.to_string(),
                string_set(new.repositories.iter().cloned()),
            ));
        }

        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .add(&self.department_dn(&new.ou), attrs)
            .await?
            .success()
            .map_err(|e| map_result_err(e, &new.ou))?;

        tracing::info!(ou = %new.ou, "Created directory department");

        Ok(Department {
            ou: new.ou.clone(),
            description: new.description.clone(),
            manager: new.manager.clone(),
            repositories: new.repositories.clone(),
        })
    }

    async fn get_department(
        &self,
        ou: &str,
        deadline: Deadline,
    ) -> Result<Department, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let entry = self
            .search_one(
                &mut conn,
                &self.department_dn(ou),
                "(objectClass=organizationalUnit)",
                DEPT_ATTRS,
                ou,
                deadline,
            )
            .await?;
        Ok(department_from_entry(&entry))
    }

    async fn list_departments(
        &self,
        deadline: Deadline,
    ) -> Result<Vec<Department>, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let entries = self
            .search_subtree(
                &mut conn,
                &self.departments_base(),
                "(objectClass=organizationalUnit)",
                DEPT_ATTRS,
                deadline,
            )
            .await?;
        Ok(entries.iter().map(department_from_entry).collect())
    }

    async fn delete_department(&self, ou: &str, deadline: Deadline) -> Result<(), DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .delete(&self.department_dn(ou))
            .await?
            .success()
            .map_err(|e| map_result_err(e, ou))?;
        tracing::info!(ou = %ou, "Deleted directory department");
        Ok(())
    }

    async fn assign_department_repositories(
        &self,
        ou: &str,
        repositories: &BTreeSet<String>,
        deadline: Deadline,
    ) -> Result<Department, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let entry = self
            .search_one(
                &mut conn,
                &self.department_dn(ou),
                "(objectClass=organizationalUnit)",
                DEPT_ATTRS,
                ou,
                deadline,
            )
            .await?;

        let mut mods: Vec<Mod<String>> = Vec::new();
        if !has_class(&entry, REPO_CLASS) {
            mods.push(Mod::Add(
                "objectClass".to_string(),
                string_set([REPO_CLASS.to_string()]),
            ));
        }
        mods.push(Mod::Replace(
            REPO_ATTR.to_string(),
            string_set(repositories.iter().cloned()),
        ));

        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .modify(&self.department_dn(ou), mods)
            .await?
            .success()
            .map_err(|e| map_result_err(e, ou))?;

        // No cascade: department membership is derived from the user's
        // department key, never from an explicit member list.
        let mut dept = department_from_entry(&entry);
        dept.repositories = repositories.clone();
        Ok(dept)
    }

    async fn department_members(
        &self,
        ou: &str,
        deadline: Deadline,
    ) -> Result<Vec<String>, DirectoryError> {
        let mut conn = self.pool.acquire(deadline).await?;
        let filter = format!(
            "(&(objectClass=inetOrgPerson)(departmentNumber={})(!(uid={})))",
            ldap_escape(ou),
            PLACEHOLDER_UID
        );
        let entries = self
            .search_subtree(&mut conn, &self.users_base(), &filter, &["uid"], deadline)
            .await?;
        Ok(entries
            .iter()
            .filter_map(|e| attr_first(e, "uid"))
            .collect())
    }

    async fn create_collab_group(
        &self,
        new: &NewCollabGroup,
        deadline: Deadline,
    ) -> Result<CollabGroup, DirectoryError> {
        let cn = if is_collab_cn(&new.cn) {
            new.cn.clone()
        } else {
            format!("{}{}", COLLAB_PREFIX, new.cn)
        };
        validate_uid(&cn).map_err(DirectoryError::Invalid)?;

        // The base department must exist; membership resolves against it.
        self.get_department(&new.base_department, deadline).await?;

        let mut conn = self.pool.acquire(deadline).await?;
        let gid_number = self.alloc_gid_number();

        let mut members: HashSet<String> = new
            .extra_members
            .iter()
            .map(|uid| self.user_dn(uid))
            .collect();
        members.insert(self.placeholder_dn());

        let mut classes = vec!["groupOfNames".to_string(), "posixGroup".to_string()];
        if !new.repositories.is_empty() {
            classes.push(REPO_CLASS.to_string());
        }
        let mut attrs: Vec<(String, HashSet<String>)> = vec![
            ("objectClass".to_string(), string_set(classes)),
            ("cn".to_string(), string_set([cn.clone()])),
            (
                "gidNumber".to_string(),
                string_set([gid_number.to_string()]),
            ),
            // Base department rides in the group's ou attribute.
            ("ou".to_string(), string_set([new.base_department.clone()])),
            ("member".to_string(), members),
        ];
        if !new.repositories.is_empty() {
            attrs.push((
                REPO_ATTR.to_string(),
                string_set(new.repositories.iter().cloned()),
            ));
        }

        deadline.check()?;
        conn.with_timeout(self.op_timeout(deadline))
            .add(&self.group_dn(&cn), attrs)
            .await?
            .success()
            .map_err(|e| map_result_err(e, &cn))?;

        tracing::info!(cn = %cn, base_department = %new.base_department, "Created collab group");

        Ok(CollabGroup {
            cn,
            base_department: new.base_department.clone(),
            extra_members: new.extra_members.clone(),
            repositories: new.repositories.clone(),
        })
    }

    async fn get_collab_group(
        &self,
        cn: &str,
        deadline: Deadline,
    ) -> Result<CollabGroup, DirectoryError> {
        if !is_collab_cn(cn) {
            return Err(DirectoryError::Invalid(format!(
                "not a collab group: {}",
                cn
            )));
        }
        let mut conn = self.pool.acquire(deadline).await?;
        let entry = self
            .search_one(
                &mut conn,
                &self.group_dn(cn),
                "(objectClass=groupOfNames)",
                GROUP_ATTRS,
                cn,
                deadline,
            )
            .await?;
        let group = group_from_entry(&entry);
        let base_department = attr_first(&entry, "ou").ok_or_else(|| {
            DirectoryError::Schema(format!("collab group {} lacks a base department", cn))
        })?;
        Ok(CollabGroup {
            cn: group.cn,
            base_department,
            extra_members: group.members,
            repositories: group.repositories,
        })
    }

    async fn resolve_collab_members(
        &self,
        cn: &str,
        deadline: Deadline,
    ) -> Result<Vec<String>, DirectoryError> {
        let collab = self.get_collab_group(cn, deadline).await?;
        let dept_members = self
            .department_members(&collab.base_department, deadline)
            .await?;
        Ok(resolve_collab_members(&dept_members, &collab.extra_members))
    }
}

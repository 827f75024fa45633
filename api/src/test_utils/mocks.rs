//! Mock implementations of port traits
//!
//! In-memory implementations that can be configured for testing. They
//! store data in memory and let tests verify behavior, including the
//! cascade semantics the real directory store guarantees.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::Deadline;
use crate::domain::entities::{
    is_collab_cn, resolve_collab_members, CollabGroup, Department, Group, NewCollabGroup,
    NewDepartment, NewGroup, NewUser, PodState, User, UserQuery, UserUpdate, COLLAB_PREFIX,
};
use crate::domain::ports::{
    CascadeReport, ClusterClient, DirectoryStore, GiteaBranch, GiteaClient, GiteaCommit,
    GiteaHook, GiteaOrg, GiteaRepo, GiteaTeam, GiteaUser, MigrationService, WorkspacePodSpec,
};
use crate::error::{ClusterError, DirectoryError, GiteaError};

// ============================================================================
// In-Memory Directory
// ============================================================================

#[derive(Debug, Clone)]
struct StoredGroup {
    group: Group,
    /// Present for collab groups
    base_department: Option<String>,
}

#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, User>>,
    groups: RwLock<BTreeMap<String, StoredGroup>>,
    departments: RwLock<HashMap<String, Department>>,
    passwords: RwLock<HashMap<String, String>>,
    next_uid: AtomicU32,
    next_gid: AtomicU32,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        let dir = Self::default();
        dir.next_uid.store(10000, Ordering::Relaxed);
        dir.next_gid.store(20000, Ordering::Relaxed);
        dir
    }

    fn insert_user(&self, user: User) {
        self.users.write().unwrap().insert(user.uid.clone(), user);
    }

    fn insert_group(&self, group: Group, base_department: Option<String>) {
        self.groups.write().unwrap().insert(
            group.cn.clone(),
            StoredGroup {
                group,
                base_department,
            },
        );
    }

    fn insert_department(&self, dept: Department) {
        self.departments
            .write()
            .unwrap()
            .insert(dept.ou.clone(), dept);
    }

    pub fn set_password(&self, uid: &str, password: &str) {
        self.passwords
            .write()
            .unwrap()
            .insert(uid.to_string(), password.to_string());
    }

    /// Rewrite one user's repository attribute as the union over the
    /// groups containing them, mirroring the real cascade.
    fn cascade(&self, uid: &str) -> Result<(), DirectoryError> {
        let union: BTreeSet<String> = {
            let groups = self.groups.read().unwrap();
            groups
                .values()
                .filter(|g| g.group.members.iter().any(|m| m == uid))
                .flat_map(|g| g.group.repositories.iter().cloned())
                .collect()
        };
        let mut users = self.users.write().unwrap();
        let user = users
            .get_mut(uid)
            .ok_or_else(|| DirectoryError::NotFound(uid.to_string()))?;
        user.repositories = union;
        Ok(())
    }

    fn cascade_all(&self, uids: &[String]) -> CascadeReport {
        let mut report = CascadeReport::default();
        for uid in uids {
            match self.cascade(uid) {
                Ok(()) => report.updated.push(uid.clone()),
                Err(e) => report.failed.push((uid.clone(), e.to_string())),
            }
        }
        report
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn create_user(&self, new: &NewUser, deadline: Deadline) -> Result<User, DirectoryError> {
        deadline.check()?;
        {
            let users = self.users.read().unwrap();
            if users.contains_key(&new.uid) {
                return Err(DirectoryError::AlreadyExists(new.uid.clone()));
            }
            if let Some(email) = &new.email {
                if users.values().any(|u| u.email.as_ref() == Some(email)) {
                    return Err(DirectoryError::AlreadyExists(format!(
                        "email already in use: {}",
                        email
                    )));
                }
            }
        }
        let uid_number = self.next_uid.fetch_add(1, Ordering::Relaxed);
        let user = User {
            uid: new.uid.clone(),
            display_name: new.display_name.clone().or_else(|| Some(new.uid.clone())),
            surname: new.surname.clone(),
            given_name: new.given_name.clone(),
            email: new.email.clone(),
            department: new.department.clone(),
            uid_number,
            gid_number: uid_number,
            home_directory: format!("/home/{}", new.uid),
            repositories: new.repositories.clone(),
        };
        if let Some(password) = &new.password {
            self.set_password(&new.uid, password);
        }
        self.insert_user(user.clone());
        Ok(user)
    }

    async fn get_user(&self, uid: &str, deadline: Deadline) -> Result<User, DirectoryError> {
        deadline.check()?;
        self.users
            .read()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(uid.to_string()))
    }

    async fn list_users(&self, deadline: Deadline) -> Result<Vec<User>, DirectoryError> {
        deadline.check()?;
        let mut users: Vec<User> = self.users.read().unwrap().values().cloned().collect();
        users.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(users)
    }

    async fn search_users(&self, query: &UserQuery, deadline: Deadline) -> Result<Vec<User>, DirectoryError> {
        deadline.check()?;
        let contains = |field: &Option<String>, needle: &Option<String>| match needle {
            None => true,
            Some(n) => field.as_ref().is_some_and(|f| f.contains(n.as_str())),
        };
        let mut matched: Vec<User> = self
            .users
            .read()
            .unwrap()
            .values()
            .filter(|u| match &query.uid {
                Some(n) => u.uid.contains(n.as_str()),
                None => true,
            })
            .filter(|u| contains(&u.display_name, &query.display_name))
            .filter(|u| contains(&u.surname, &query.surname))
            .filter(|u| contains(&u.given_name, &query.given_name))
            .filter(|u| contains(&u.email, &query.email))
            .filter(|u| match &query.department {
                Some(d) => u.department.as_deref() == Some(d.as_str()),
                None => true,
            })
            .filter(|u| query.uid_number.map_or(true, |n| u.uid_number == n))
            .filter(|u| query.gid_number.map_or(true, |n| u.gid_number == n))
            .filter(|u| match &query.repository {
                Some(r) => u.repositories.iter().any(|repo| repo.contains(r.as_str())),
                None => true,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(matched)
    }

    async fn update_user(&self, uid: &str, update: &UserUpdate, deadline: Deadline) -> Result<User, DirectoryError> {
        deadline.check()?;
        let mut users = self.users.write().unwrap();
        let user = users
            .get_mut(uid)
            .ok_or_else(|| DirectoryError::NotFound(uid.to_string()))?;
        if let Some(v) = &update.display_name {
            user.display_name = Some(v.clone());
        }
        if let Some(v) = &update.surname {
            user.surname = Some(v.clone());
        }
        if let Some(v) = &update.given_name {
            user.given_name = Some(v.clone());
        }
        if let Some(v) = &update.email {
            user.email = Some(v.clone());
        }
        if let Some(v) = &update.department {
            user.department = Some(v.clone());
        }
        if let Some(repos) = &update.repositories {
            user.repositories = repos.clone();
        }
        let updated = user.clone();
        drop(users);
        if let Some(password) = &update.password {
            self.set_password(uid, password);
        }
        Ok(updated)
    }

    async fn delete_user(&self, uid: &str, deadline: Deadline) -> Result<(), DirectoryError> {
        deadline.check()?;
        let removed = self.users.write().unwrap().remove(uid);
        if removed.is_none() {
            return Err(DirectoryError::NotFound(uid.to_string()));
        }
        let mut groups = self.groups.write().unwrap();
        for stored in groups.values_mut() {
            stored.group.members.retain(|m| m != uid);
        }
        Ok(())
    }

    async fn authenticate(&self, uid: &str, password: &str, deadline: Deadline) -> Result<bool, DirectoryError> {
        deadline.check()?;
        if password.is_empty() {
            return Ok(false);
        }
        Ok(self
            .passwords
            .read()
            .unwrap()
            .get(uid)
            .is_some_and(|p| p == password))
    }

    async fn create_group(&self, new: &NewGroup, deadline: Deadline) -> Result<Group, DirectoryError> {
        deadline.check()?;
        if self.groups.read().unwrap().contains_key(&new.cn) {
            return Err(DirectoryError::AlreadyExists(new.cn.clone()));
        }
        let group = Group {
            cn: new.cn.clone(),
            description: new.description.clone(),
            gid_number: self.next_gid.fetch_add(1, Ordering::Relaxed),
            members: Vec::new(),
            repositories: new.repositories.clone(),
        };
        self.insert_group(group.clone(), None);
        Ok(group)
    }

    async fn get_group(&self, cn: &str, deadline: Deadline) -> Result<Group, DirectoryError> {
        deadline.check()?;
        self.groups
            .read()
            .unwrap()
            .get(cn)
            .map(|s| s.group.clone())
            .ok_or_else(|| DirectoryError::NotFound(cn.to_string()))
    }

    async fn list_groups(&self, deadline: Deadline) -> Result<Vec<Group>, DirectoryError> {
        deadline.check()?;
        Ok(self
            .groups
            .read()
            .unwrap()
            .values()
            .map(|s| s.group.clone())
            .collect())
    }

    async fn delete_group(&self, cn: &str, deadline: Deadline) -> Result<CascadeReport, DirectoryError> {
        deadline.check()?;
        let removed = self
            .groups
            .write()
            .unwrap()
            .remove(cn)
            .ok_or_else(|| DirectoryError::NotFound(cn.to_string()))?;
        Ok(self.cascade_all(&removed.group.members))
    }

    async fn add_group_member(&self, cn: &str, uid: &str, deadline: Deadline) -> Result<CascadeReport, DirectoryError> {
        deadline.check()?;
        if !self.users.read().unwrap().contains_key(uid) {
            return Err(DirectoryError::NotFound(uid.to_string()));
        }
        {
            let mut groups = self.groups.write().unwrap();
            let stored = groups
                .get_mut(cn)
                .ok_or_else(|| DirectoryError::NotFound(cn.to_string()))?;
            if !stored.group.members.iter().any(|m| m == uid) {
                stored.group.members.push(uid.to_string());
            }
        }
        Ok(self.cascade_all(&[uid.to_string()]))
    }

    async fn remove_group_member(
        &self,
        cn: &str,
        uid: &str,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError> {
        deadline.check()?;
        {
            let mut groups = self.groups.write().unwrap();
            let stored = groups
                .get_mut(cn)
                .ok_or_else(|| DirectoryError::NotFound(cn.to_string()))?;
            stored.group.members.retain(|m| m != uid);
        }
        Ok(self.cascade_all(&[uid.to_string()]))
    }

    async fn assign_group_repositories(
        &self,
        cn: &str,
        repositories: &BTreeSet<String>,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError> {
        deadline.check()?;
        let members = {
            let mut groups = self.groups.write().unwrap();
            let stored = groups
                .get_mut(cn)
                .ok_or_else(|| DirectoryError::NotFound(cn.to_string()))?;
            stored.group.repositories = repositories.clone();
            stored.group.members.clone()
        };
        Ok(self.cascade_all(&members))
    }

    async fn groups_of_user(&self, uid: &str, deadline: Deadline) -> Result<Vec<Group>, DirectoryError> {
        deadline.check()?;
        Ok(self
            .groups
            .read()
            .unwrap()
            .values()
            .filter(|s| s.group.members.iter().any(|m| m == uid))
            .map(|s| s.group.clone())
            .collect())
    }

    async fn create_department(&self, new: &NewDepartment, deadline: Deadline) -> Result<Department, DirectoryError> {
        deadline.check()?;
        if self.departments.read().unwrap().contains_key(&new.ou) {
            return Err(DirectoryError::AlreadyExists(new.ou.clone()));
        }
        let dept = Department {
            ou: new.ou.clone(),
            description: new.description.clone(),
            manager: new.manager.clone(),
            repositories: new.repositories.clone(),
        };
        self.insert_department(dept.clone());
        Ok(dept)
    }

    async fn get_department(&self, ou: &str, deadline: Deadline) -> Result<Department, DirectoryError> {
        deadline.check()?;
        self.departments
            .read()
            .unwrap()
            .get(ou)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(ou.to_string()))
    }

    async fn list_departments(&self, deadline: Deadline) -> Result<Vec<Department>, DirectoryError> {
        deadline.check()?;
        Ok(self.departments.read().unwrap().values().cloned().collect())
    }

    async fn delete_department(&self, ou: &str, deadline: Deadline) -> Result<(), DirectoryError> {
        deadline.check()?;
        self.departments
            .write()
            .unwrap()
            .remove(ou)
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NotFound(ou.to_string()))
    }

    async fn assign_department_repositories(
        &self,
        ou: &str,
        repositories: &BTreeSet<String>,
        deadline: Deadline,
    ) -> Result<Department, DirectoryError> {
        deadline.check()?;
        let mut departments = self.departments.write().unwrap();
        let dept = departments
            .get_mut(ou)
            .ok_or_else(|| DirectoryError::NotFound(ou.to_string()))?;
        dept.repositories = repositories.clone();
        Ok(dept.clone())
    }

    async fn department_members(&self, ou: &str, deadline: Deadline) -> Result<Vec<String>, DirectoryError> {
        deadline.check()?;
        let mut members: Vec<String> = self
            .users
            .read()
            .unwrap()
            .values()
            .filter(|u| u.department.as_deref() == Some(ou))
            .map(|u| u.uid.clone())
            .collect();
        members.sort();
        Ok(members)
    }

    async fn create_collab_group(
        &self,
        new: &NewCollabGroup,
        deadline: Deadline,
    ) -> Result<CollabGroup, DirectoryError> {
        deadline.check()?;
        let cn = if is_collab_cn(&new.cn) {
            new.cn.clone()
        } else {
            format!("{}{}", COLLAB_PREFIX, new.cn)
        };
        if !self
            .departments
            .read()
            .unwrap()
            .contains_key(&new.base_department)
        {
            return Err(DirectoryError::NotFound(new.base_department.clone()));
        }
        if self.groups.read().unwrap().contains_key(&cn) {
            return Err(DirectoryError::AlreadyExists(cn));
        }
        let group = Group {
            cn: cn.clone(),
            description: None,
            gid_number: self.next_gid.fetch_add(1, Ordering::Relaxed),
            members: new.extra_members.clone(),
            repositories: new.repositories.clone(),
        };
        self.insert_group(group, Some(new.base_department.clone()));
        Ok(CollabGroup {
            cn,
            base_department: new.base_department.clone(),
            extra_members: new.extra_members.clone(),
            repositories: new.repositories.clone(),
        })
    }

    async fn get_collab_group(&self, cn: &str, deadline: Deadline) -> Result<CollabGroup, DirectoryError> {
        deadline.check()?;
        let groups = self.groups.read().unwrap();
        let stored = groups
            .get(cn)
            .ok_or_else(|| DirectoryError::NotFound(cn.to_string()))?;
        let base_department = stored
            .base_department
            .clone()
            .ok_or_else(|| DirectoryError::Invalid(format!("not a collab group: {}", cn)))?;
        Ok(CollabGroup {
            cn: stored.group.cn.clone(),
            base_department,
            extra_members: stored.group.members.clone(),
            repositories: stored.group.repositories.clone(),
        })
    }

    async fn resolve_collab_members(&self, cn: &str, deadline: Deadline) -> Result<Vec<String>, DirectoryError> {
        deadline.check()?;
        let collab = self.get_collab_group(cn, deadline).await?;
        let dept_members = self.department_members(&collab.base_department, deadline).await?;
        Ok(resolve_collab_members(&dept_members, &collab.extra_members))
    }
}

// ============================================================================
// Test directory builder
// ============================================================================

/// Seeds an [`InMemoryDirectory`] without going through create-time
/// validation, so tests can state arbitrary directory contents directly.
#[derive(Default)]
pub struct TestDirectoryBuilder {
    directory: Option<InMemoryDirectory>,
}

impl TestDirectoryBuilder {
    pub fn new() -> Self {
        TestDirectoryBuilder {
            directory: Some(InMemoryDirectory::new()),
        }
    }

    fn dir(&mut self) -> &InMemoryDirectory {
        self.directory.as_ref().expect("builder consumed")
    }

    pub fn user(mut self, uid: &str, department: Option<&str>, repos: &[&str]) -> Self {
        let uid_number = self.dir().next_uid.fetch_add(1, Ordering::Relaxed);
        let user = User {
            uid: uid.to_string(),
            display_name: Some(uid.to_string()),
            surname: None,
            given_name: None,
            email: Some(format!("{}@example.org", uid.replace('.', "-"))),
            department: department.map(|d| d.to_string()),
            uid_number,
            gid_number: uid_number,
            home_directory: format!("/home/{}", uid),
            repositories: repos.iter().map(|r| r.to_string()).collect(),
        };
        self.dir().insert_user(user);
        self
    }

    pub fn group(mut self, cn: &str, members: &[&str], repos: &[&str]) -> Self {
        let gid_number = self.dir().next_gid.fetch_add(1, Ordering::Relaxed);
        let group = Group {
            cn: cn.to_string(),
            description: None,
            gid_number,
            members: members.iter().map(|m| m.to_string()).collect(),
            repositories: repos.iter().map(|r| r.to_string()).collect(),
        };
        self.dir().insert_group(group, None);
        self
    }

    pub fn collab_group(
        mut self,
        cn: &str,
        base_department: &str,
        extra_members: &[&str],
        repos: &[&str],
    ) -> Self {
        let gid_number = self.dir().next_gid.fetch_add(1, Ordering::Relaxed);
        let group = Group {
            cn: cn.to_string(),
            description: None,
            gid_number,
            members: extra_members.iter().map(|m| m.to_string()).collect(),
            repositories: repos.iter().map(|r| r.to_string()).collect(),
        };
        self.dir()
            .insert_group(group, Some(base_department.to_string()));
        self
    }

    pub fn department(mut self, ou: &str, repos: &[&str]) -> Self {
        let dept = Department {
            ou: ou.to_string(),
            description: None,
            manager: None,
            repositories: repos.iter().map(|r| r.to_string()).collect(),
        };
        self.dir().insert_department(dept);
        self
    }

    pub fn build(mut self) -> InMemoryDirectory {
        self.directory.take().expect("builder consumed")
    }
}

// ============================================================================
// In-Memory Gitea
// ============================================================================

#[derive(Debug, Clone)]
struct MockTeam {
    team: GiteaTeam,
    org: String,
    members: BTreeSet<String>,
    repos: BTreeSet<String>,
}

#[derive(Default)]
struct GiteaState {
    users: HashMap<String, GiteaUser>,
    orgs: HashMap<String, GiteaOrg>,
    repos: HashMap<String, GiteaRepo>,
    teams: HashMap<i64, MockTeam>,
    hooks: HashMap<String, Vec<GiteaHook>>,
    fail_users: BTreeSet<String>,
}

#[derive(Default)]
pub struct InMemoryGitea {
    state: Mutex<GiteaState>,
    next_id: AtomicI64,
}

impl InMemoryGitea {
    pub fn new() -> Self {
        let gitea = Self::default();
        gitea.next_id.store(1, Ordering::Relaxed);
        gitea
    }

    fn id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Make every user-level operation for `uid` fail with a 500.
    pub fn fail_user(&self, uid: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_users
            .insert(uid.to_string());
    }

    pub fn has_user(&self, login: &str) -> bool {
        self.state.lock().unwrap().users.contains_key(login)
    }

    pub fn user_count(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }

    pub fn has_repo(&self, owner: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .repos
            .contains_key(&format!("{}/{}", owner, name))
    }

    pub fn repo_count(&self) -> usize {
        self.state.lock().unwrap().repos.len()
    }

    fn find_team(state: &GiteaState, name: &str) -> Option<MockTeam> {
        state.teams.values().find(|t| t.team.name == name).cloned()
    }

    pub fn team_has_member(&self, team: &str, login: &str) -> bool {
        let state = self.state.lock().unwrap();
        Self::find_team(&state, team).is_some_and(|t| t.members.contains(login))
    }

    pub fn team_member_count(&self, team: &str) -> usize {
        let state = self.state.lock().unwrap();
        Self::find_team(&state, team).map_or(0, |t| t.members.len())
    }

    pub fn team_has_repo(&self, team: &str, full_name: &str) -> bool {
        let state = self.state.lock().unwrap();
        Self::find_team(&state, team).is_some_and(|t| t.repos.contains(full_name))
    }

    pub fn hook_count(&self, org: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .hooks
            .get(org)
            .map_or(0, |h| h.len())
    }

    fn check_user_failure(state: &GiteaState, login: &str) -> Result<(), GiteaError> {
        if state.fail_users.contains(login) {
            return Err(GiteaError::Api {
                status: 500,
                message: format!("injected failure for {}", login),
            });
        }
        Ok(())
    }

    fn make_repo(&self, owner: &str, name: &str) -> GiteaRepo {
        GiteaRepo {
            id: self.id(),
            name: name.to_string(),
            full_name: format!("{}/{}", owner, name),
            description: None,
            clone_url: format!("http://gitea:3000/{}/{}.git", owner, name),
            html_url: format!("http://gitea:3000/{}/{}", owner, name),
            default_branch: "main".to_string(),
            private: true,
        }
    }
}

#[async_trait]
impl GiteaClient for InMemoryGitea {
    async fn get_user(&self, username: &str) -> Result<GiteaUser, GiteaError> {
        let state = self.state.lock().unwrap();
        Self::check_user_failure(&state, username)?;
        state
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| GiteaError::UserNotFound(username.to_string()))
    }

    async fn search_users(&self, query: &str) -> Result<Vec<GiteaUser>, GiteaError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .values()
            .filter(|u| u.login.contains(query))
            .cloned()
            .collect())
    }

    async fn create_user(
        &self,
        username: &str,
        email: &str,
        _password: &str,
    ) -> Result<GiteaUser, GiteaError> {
        let id = self.id();
        let mut state = self.state.lock().unwrap();
        Self::check_user_failure(&state, username)?;
        if state.users.contains_key(username) {
            return Err(GiteaError::Api {
                status: 422,
                message: format!("user already exists: {}", username),
            });
        }
        let user = GiteaUser {
            id,
            login: username.to_string(),
            email: email.to_string(),
            full_name: None,
        };
        state.users.insert(username.to_string(), user.clone());
        Ok(user)
    }

    async fn update_user(
        &self,
        username: &str,
        email: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<(), GiteaError> {
        let mut state = self.state.lock().unwrap();
        Self::check_user_failure(&state, username)?;
        let user = state
            .users
            .get_mut(username)
            .ok_or_else(|| GiteaError::UserNotFound(username.to_string()))?;
        if let Some(email) = email {
            user.email = email.to_string();
        }
        if let Some(full_name) = full_name {
            user.full_name = Some(full_name.to_string());
        }
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<(), GiteaError> {
        let mut state = self.state.lock().unwrap();
        state
            .users
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| GiteaError::UserNotFound(username.to_string()))
    }

    async fn create_user_token(
        &self,
        username: &str,
        token_name: &str,
    ) -> Result<String, GiteaError> {
        let state = self.state.lock().unwrap();
        Self::check_user_failure(&state, username)?;
        if !state.users.contains_key(username) {
            return Err(GiteaError::UserNotFound(username.to_string()));
        }
        Ok(format!("tok-{}-{}", username, token_name))
    }

    async fn get_org(&self, name: &str) -> Result<GiteaOrg, GiteaError> {
        self.state
            .lock()
            .unwrap()
            .orgs
            .get(name)
            .cloned()
            .ok_or_else(|| GiteaError::OrgNotFound(name.to_string()))
    }

    async fn create_org(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<GiteaOrg, GiteaError> {
        let id = self.id();
        let mut state = self.state.lock().unwrap();
        let org = GiteaOrg {
            id,
            name: name.to_string(),
            description: description.map(|d| d.to_string()),
        };
        state.orgs.insert(name.to_string(), org.clone());
        Ok(org)
    }

    async fn get_repo(&self, owner: &str, name: &str) -> Result<GiteaRepo, GiteaError> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(&format!("{}/{}", owner, name))
            .cloned()
            .ok_or_else(|| GiteaError::RepoNotFound {
                owner: owner.to_string(),
                repo: name.to_string(),
            })
    }

    async fn list_org_repos(&self, org: &str) -> Result<Vec<GiteaRepo>, GiteaError> {
        let prefix = format!("{}/", org);
        Ok(self
            .state
            .lock()
            .unwrap()
            .repos
            .values()
            .filter(|r| r.full_name.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn create_org_repo(
        &self,
        org: &str,
        name: &str,
        _description: Option<&str>,
        _private: bool,
    ) -> Result<GiteaRepo, GiteaError> {
        let repo = self.make_repo(org, name);
        let mut state = self.state.lock().unwrap();
        if state.repos.contains_key(&repo.full_name) {
            return Err(GiteaError::Api {
                status: 409,
                message: format!("repository already exists: {}", repo.full_name),
            });
        }
        state.repos.insert(repo.full_name.clone(), repo.clone());
        Ok(repo)
    }

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<(), GiteaError> {
        let mut state = self.state.lock().unwrap();
        state
            .repos
            .remove(&format!("{}/{}", owner, name))
            .map(|_| ())
            .ok_or_else(|| GiteaError::RepoNotFound {
                owner: owner.to_string(),
                repo: name.to_string(),
            })
    }

    async fn fork_repo(
        &self,
        owner: &str,
        repo: &str,
        to_org: &str,
    ) -> Result<GiteaRepo, GiteaError> {
        {
            let state = self.state.lock().unwrap();
            if !state.repos.contains_key(&format!("{}/{}", owner, repo)) {
                return Err(GiteaError::RepoNotFound {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                });
            }
        }
        let fork = self.make_repo(to_org, repo);
        self.state
            .lock()
            .unwrap()
            .repos
            .insert(fork.full_name.clone(), fork.clone());
        Ok(fork)
    }

    async fn migrate_repo(
        &self,
        _clone_addr: &str,
        owner: &str,
        name: &str,
        _service: MigrationService,
        _mirror: bool,
    ) -> Result<GiteaRepo, GiteaError> {
        let repo = self.make_repo(owner, name);
        self.state
            .lock()
            .unwrap()
            .repos
            .insert(repo.full_name.clone(), repo.clone());
        Ok(repo)
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<GiteaBranch>, GiteaError> {
        self.get_repo(owner, repo).await?;
        Ok(vec![GiteaBranch {
            name: "main".to_string(),
            commit: GiteaCommit {
                id: "0000000000000000000000000000000000000000".to_string(),
                message: "init".to_string(),
            },
        }])
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        new_branch: &str,
        _old_ref: Option<&str>,
    ) -> Result<GiteaBranch, GiteaError> {
        self.get_repo(owner, repo).await?;
        Ok(GiteaBranch {
            name: new_branch.to_string(),
            commit: GiteaCommit {
                id: "0000000000000000000000000000000000000000".to_string(),
                message: "init".to_string(),
            },
        })
    }

    async fn delete_branch(
        &self,
        owner: &str,
        repo: &str,
        _branch: &str,
    ) -> Result<(), GiteaError> {
        self.get_repo(owner, repo).await?;
        Ok(())
    }

    async fn list_teams(&self, org: &str) -> Result<Vec<GiteaTeam>, GiteaError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .teams
            .values()
            .filter(|t| t.org == org)
            .map(|t| t.team.clone())
            .collect())
    }

    async fn create_team(
        &self,
        org: &str,
        name: &str,
        _description: Option<&str>,
        permission: &str,
    ) -> Result<GiteaTeam, GiteaError> {
        let id = self.id();
        let team = GiteaTeam {
            id,
            name: name.to_string(),
            permission: permission.to_string(),
        };
        self.state.lock().unwrap().teams.insert(
            id,
            MockTeam {
                team: team.clone(),
                org: org.to_string(),
                members: BTreeSet::new(),
                repos: BTreeSet::new(),
            },
        );
        Ok(team)
    }

    async fn list_team_members(&self, team_id: i64) -> Result<Vec<GiteaUser>, GiteaError> {
        let state = self.state.lock().unwrap();
        let team = state.teams.get(&team_id).ok_or(GiteaError::Api {
            status: 404,
            message: format!("team {} not found", team_id),
        })?;
        Ok(team
            .members
            .iter()
            .filter_map(|login| state.users.get(login).cloned())
            .collect())
    }

    async fn add_team_member(&self, team_id: i64, username: &str) -> Result<(), GiteaError> {
        let mut state = self.state.lock().unwrap();
        if !state.users.contains_key(username) {
            return Err(GiteaError::Api {
                status: 422,
                message: format!("user does not exist: {}", username),
            });
        }
        let team = state.teams.get_mut(&team_id).ok_or(GiteaError::Api {
            status: 404,
            message: format!("team {} not found", team_id),
        })?;
        team.members.insert(username.to_string());
        Ok(())
    }

    async fn remove_team_member(&self, team_id: i64, username: &str) -> Result<(), GiteaError> {
        let mut state = self.state.lock().unwrap();
        let team = state.teams.get_mut(&team_id).ok_or(GiteaError::Api {
            status: 404,
            message: format!("team {} not found", team_id),
        })?;
        team.members.remove(username);
        Ok(())
    }

    async fn add_team_repo(&self, team_id: i64, owner: &str, repo: &str) -> Result<(), GiteaError> {
        let full_name = format!("{}/{}", owner, repo);
        let mut state = self.state.lock().unwrap();
        if !state.repos.contains_key(&full_name) {
            return Err(GiteaError::RepoNotFound {
                owner: owner.to_string(),
                repo: repo.to_string(),
            });
        }
        let team = state.teams.get_mut(&team_id).ok_or(GiteaError::Api {
            status: 404,
            message: format!("team {} not found", team_id),
        })?;
        team.repos.insert(full_name);
        Ok(())
    }

    async fn list_org_hooks(&self, org: &str) -> Result<Vec<GiteaHook>, GiteaError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .hooks
            .get(org)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_org_hook(
        &self,
        org: &str,
        url: &str,
        events: Vec<String>,
        _secret: Option<&str>,
    ) -> Result<i64, GiteaError> {
        let id = self.id();
        let hook = GiteaHook {
            id,
            url: url.to_string(),
            active: true,
            events,
        };
        self.state
            .lock()
            .unwrap()
            .hooks
            .entry(org.to_string())
            .or_default()
            .push(hook);
        Ok(id)
    }

    async fn version(&self) -> Result<String, GiteaError> {
        Ok("1.22.0".to_string())
    }
}

// ============================================================================
// In-Memory Cluster
// ============================================================================

#[derive(Debug, Clone)]
struct MockPod {
    spec: WorkspacePodSpec,
    ready: bool,
}

#[derive(Default)]
struct ClusterState {
    volumes: BTreeSet<String>,
    volume_creates: usize,
    pods: HashMap<String, MockPod>,
    services: BTreeSet<String>,
    routes: BTreeSet<String>,
}

/// Cluster mock; created pods come up Running and ready.
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().unwrap().volumes.len()
    }

    pub fn volume_create_count(&self) -> usize {
        self.state.lock().unwrap().volume_creates
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().unwrap().volumes.contains(name)
    }

    pub fn pod_count(&self) -> usize {
        self.state.lock().unwrap().pods.len()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.state.lock().unwrap().services.contains(name)
    }

    pub fn has_route(&self, name: &str) -> bool {
        self.state.lock().unwrap().routes.contains(name)
    }

    pub fn set_pod_unready(&self, name: &str) {
        if let Some(pod) = self.state.lock().unwrap().pods.get_mut(name) {
            pod.ready = false;
        }
    }

    fn state_of(pod: &MockPod) -> PodState {
        PodState {
            phase: Some("Running".to_string()),
            any_waiting: false,
            all_ready: pod.ready,
            created_at: Some(Utc::now()),
            uid: Some(pod.spec.uid_label.clone()),
            repository: Some(pod.spec.repo_full_name.clone()),
            branch: Some(pod.spec.branch.clone()),
        }
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn ensure_volume(
        &self,
        name: &str,
        _uid_label: &str,
        _size: &str,
        _storage_class: Option<&str>,
    ) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.volumes.contains(name) {
            return Ok(false);
        }
        state.volumes.insert(name.to_string());
        state.volume_creates += 1;
        Ok(true)
    }

    async fn delete_volume(&self, name: &str) -> Result<(), ClusterError> {
        self.state.lock().unwrap().volumes.remove(name);
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, ClusterError> {
        Ok(self.state.lock().unwrap().volumes.contains(name))
    }

    async fn pod_state(&self, name: &str) -> Result<PodState, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .get(name)
            .map(Self::state_of)
            .unwrap_or_default())
    }

    async fn list_workspace_pods(&self) -> Result<Vec<(String, PodState)>, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .map(|(name, pod)| (name.clone(), Self::state_of(pod)))
            .collect())
    }

    async fn create_workspace_pod(&self, spec: &WorkspacePodSpec) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.pods.entry(spec.pod_name.clone()).or_insert(MockPod {
            spec: spec.clone(),
            ready: true,
        });
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        self.state.lock().unwrap().pods.remove(name);
        Ok(())
    }

    async fn ensure_service(
        &self,
        name: &str,
        _uid_label: &str,
        _port: u16,
    ) -> Result<(), ClusterError> {
        self.state.lock().unwrap().services.insert(name.to_string());
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError> {
        self.state.lock().unwrap().services.remove(name);
        Ok(())
    }

    fn routes_available(&self) -> bool {
        true
    }

    async fn ensure_route(
        &self,
        name: &str,
        _hostname: &str,
        _service: &str,
        _port: u16,
    ) -> Result<(), ClusterError> {
        self.state.lock().unwrap().routes.insert(name.to_string());
        Ok(())
    }

    async fn delete_route(&self, name: &str) -> Result<(), ClusterError> {
        self.state.lock().unwrap().routes.remove(name);
        Ok(())
    }

    async fn exec(
        &self,
        pod: &str,
        _container: &str,
        command: &[String],
    ) -> Result<String, ClusterError> {
        let state = self.state.lock().unwrap();
        if !state.pods.contains_key(pod) {
            return Err(ClusterError::NotFound(pod.to_string()));
        }
        Ok(format!("executed: {}", command.join(" ")))
    }
}

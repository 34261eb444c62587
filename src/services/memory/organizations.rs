use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{MemoryBackend, MemoryState, OrgRecord};
use crate::database::Transaction;
use crate::middleware::pagination::{paginate, PaginationRequest, PaginationResult};
use crate::services::organizations::{
    CreateOrganization, OrgMember, Organization, OrganizationService, Team, UpdateOrganization, UpdateTeam,
    CreateTeam,
};
use crate::services::users::User;
use crate::services::{ServiceError, ServiceResult};

impl MemoryState {
    fn org_record(&self, name: &str) -> ServiceResult<&OrgRecord> {
        self.org(name)
            .ok_or_else(|| ServiceError::not_found(format!("Organization [{}] not found", name)))
    }

    fn admin_org_mut(&mut self, name: &str, user: &User) -> ServiceResult<&mut OrgRecord> {
        self.org_record(name)?;
        if !self.is_org_admin(name, user) {
            return Err(ServiceError::forbidden(format!("Not authorized to manage organization {}", name)));
        }
        self.org_mut(name)
            .ok_or_else(|| ServiceError::not_found(format!("Organization [{}] not found", name)))
    }

    /// Email is only disclosed to members
    fn org_view(&self, record: &OrgRecord, user: Option<&User>) -> Organization {
        let mut org = record.org.clone();
        let member = user
            .map(|u| u.is_admin || self.role_in(&org.name, &u.username).is_some())
            .unwrap_or(false);
        if !member {
            org.email = None;
        }
        org
    }
}

fn find_member<'a>(members: &'a BTreeMap<String, String>, username: &str) -> Option<&'a String> {
    members.keys().find(|m| m.eq_ignore_ascii_case(username))
}

#[async_trait]
impl OrganizationService for MemoryBackend {
    async fn create(
        &self,
        tx: &mut dyn Transaction,
        input: &CreateOrganization,
        user: &User,
    ) -> ServiceResult<Organization> {
        self.sync_user(&input.name).await?;
        let mut state = self.write(tx).await;
        let taken = state.user(&input.name).is_some()
            || state.removed_users.iter().any(|u| u.username.eq_ignore_ascii_case(&input.name))
            || state
                .organizations
                .iter()
                .any(|o| o.org.name.eq_ignore_ascii_case(&input.name));
        if taken {
            return Err(ServiceError::AlreadyExists(format!("Name [{}] is already taken", input.name)));
        }

        let org = Organization {
            name: input.name.clone(),
            description: input.description.clone(),
            email: input.email.clone(),
            private: false,
        };
        let mut members = BTreeMap::new();
        members.insert(user.username.clone(), "owner".to_string());
        state.organizations.push(OrgRecord {
            org: org.clone(),
            creator: user.username.clone(),
            members,
            teams: BTreeMap::new(),
            deleted: false,
        });
        tracing::info!("organization {} created by {}", org.name, user.username);
        Ok(org)
    }

    async fn list(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<Organization>, PaginationResult)> {
        let state = self.state.read().await;
        let orgs: Vec<Organization> = state
            .organizations
            .iter()
            .filter(|o| !o.deleted)
            .map(|o| state.org_view(o, user))
            .collect();
        Ok(paginate(orgs, page))
    }

    async fn get(&self, _tx: &mut dyn Transaction, name: &str, user: Option<&User>) -> ServiceResult<Organization> {
        let state = self.state.read().await;
        let record = state.org_record(name)?;
        Ok(state.org_view(record, user))
    }

    async fn update(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        input: &UpdateOrganization,
        user: &User,
    ) -> ServiceResult<Organization> {
        let mut state = self.write(tx).await;
        let record = state.admin_org_mut(name, user)?;
        if let Some(email) = &input.email {
            record.org.email = Some(email.clone());
        }
        if let Some(description) = &input.description {
            record.org.description = Some(description.clone());
        }
        Ok(record.org.clone())
    }

    async fn remove(&self, tx: &mut dyn Transaction, name: &str, user: &User) -> ServiceResult<Organization> {
        let mut state = self.write(tx).await;
        state.org_record(name)?;
        if !user.is_admin && state.role_in(name, &user.username) != Some("owner") {
            return Err(ServiceError::forbidden(format!("Only owners can remove organization {}", name)));
        }
        let record = state
            .org_mut(name)
            .ok_or_else(|| ServiceError::not_found(format!("Organization [{}] not found", name)))?;
        record.deleted = true;
        Ok(record.org.clone())
    }

    async fn members(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        name: &str,
        _user: Option<&User>,
    ) -> ServiceResult<(Vec<OrgMember>, PaginationResult)> {
        let state = self.state.read().await;
        let record = state.org_record(name)?;
        let members: Vec<OrgMember> = record
            .members
            .iter()
            .map(|(username, role)| OrgMember {
                username: username.clone(),
                name: state.user(username).and_then(|u| u.name.clone()),
                org_role: role.clone(),
            })
            .collect();
        Ok(paginate(members, page))
    }

    async fn memberships(
        &self,
        _tx: &mut dyn Transaction,
        username: &str,
    ) -> ServiceResult<BTreeMap<String, String>> {
        let state = self.state.read().await;
        Ok(state
            .organizations
            .iter()
            .filter(|o| !o.deleted)
            .filter_map(|o| {
                find_member(&o.members, username).map(|m| (o.org.name.clone(), o.members[m].clone()))
            })
            .collect())
    }

    async fn add_member(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        username: &str,
        role: &str,
        user: &User,
    ) -> ServiceResult<OrgMember> {
        self.sync_user(username).await?;
        let mut state = self.write(tx).await;
        let member = state
            .user(username)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("User [{}] not found", username)))?;
        if role == "owner" && !user.is_admin && state.role_in(name, &user.username) != Some("owner") {
            return Err(ServiceError::forbidden("Only owners can add other owners"));
        }
        let record = state.admin_org_mut(name, user)?;
        if find_member(&record.members, username).is_some() {
            return Err(ServiceError::AlreadyExists(format!(
                "User [{}] is already a member of {}",
                member.username, record.org.name
            )));
        }
        record.members.insert(member.username.clone(), role.to_string());
        Ok(OrgMember {
            username: member.username,
            name: member.name,
            org_role: role.to_string(),
        })
    }

    async fn remove_member(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        username: &str,
        user: &User,
    ) -> ServiceResult<OrgMember> {
        let mut state = self.write(tx).await;
        let record = state.admin_org_mut(name, user)?;
        let key = find_member(&record.members, username)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("User [{}] is not a member of {}", username, name)))?;
        if record.creator.eq_ignore_ascii_case(&key) {
            return Err(ServiceError::forbidden("The organization creator cannot be removed"));
        }
        let role = record.members.remove(&key).unwrap_or_default();
        for team in record.teams.values_mut() {
            team.usernames.retain(|u| !u.eq_ignore_ascii_case(&key));
        }
        Ok(OrgMember {
            username: key,
            name: None,
            org_role: role,
        })
    }

    async fn teams(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        name: &str,
        user: &User,
    ) -> ServiceResult<(Vec<Team>, PaginationResult)> {
        let state = self.state.read().await;
        let record = state.org_record(name)?;
        let admin = state.is_org_admin(name, user);
        if !admin && state.role_in(name, &user.username).is_none() {
            return Err(ServiceError::forbidden(format!("Not a member of organization {}", name)));
        }
        let teams: Vec<Team> = record
            .teams
            .values()
            .filter(|t| admin || t.visible || t.usernames.iter().any(|u| u.eq_ignore_ascii_case(&user.username)))
            .cloned()
            .collect();
        Ok(paginate(teams, page))
    }

    async fn create_team(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        input: &CreateTeam,
        user: &User,
    ) -> ServiceResult<Team> {
        let mut state = self.write(tx).await;
        let record = state.admin_org_mut(name, user)?;
        if record.teams.contains_key(&input.name) {
            return Err(ServiceError::AlreadyExists(format!("Team [{}] already exists", input.name)));
        }
        let team = Team {
            name: input.name.clone(),
            description: input.description.clone(),
            visible: input.visible.unwrap_or(false),
            usernames: Vec::new(),
        };
        record.teams.insert(team.name.clone(), team.clone());
        Ok(team)
    }

    async fn team(&self, _tx: &mut dyn Transaction, name: &str, team: &str, user: &User) -> ServiceResult<Team> {
        let state = self.state.read().await;
        let record = state.org_record(name)?;
        let found = record
            .teams
            .get(team)
            .ok_or_else(|| ServiceError::not_found(format!("Team [{}] not found", team)))?;
        let allowed = state.is_org_admin(name, user)
            || (found.visible && state.role_in(name, &user.username).is_some())
            || found.usernames.iter().any(|u| u.eq_ignore_ascii_case(&user.username));
        if !allowed {
            return Err(ServiceError::forbidden(format!("Not authorized to view team {}", team)));
        }
        Ok(found.clone())
    }

    async fn update_team(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        team: &str,
        input: &UpdateTeam,
        user: &User,
    ) -> ServiceResult<Team> {
        let mut state = self.write(tx).await;
        let record = state.admin_org_mut(name, user)?;
        for username in &input.new_users {
            if find_member(&record.members, username).is_none() {
                return Err(ServiceError::Invalid(format!(
                    "User [{}] is not a member of {}",
                    username, record.org.name
                )));
            }
        }
        let found = record
            .teams
            .get_mut(team)
            .ok_or_else(|| ServiceError::not_found(format!("Team [{}] not found", team)))?;
        if let Some(visible) = input.visible {
            found.visible = visible;
        }
        if let Some(description) = &input.description {
            found.description = Some(description.clone());
        }
        for username in &input.new_users {
            if !found.usernames.iter().any(|u| u.eq_ignore_ascii_case(username)) {
                found.usernames.push(username.clone());
            }
        }
        found
            .usernames
            .retain(|u| !input.rm_users.iter().any(|r| r.eq_ignore_ascii_case(u)));
        Ok(found.clone())
    }

    async fn remove_team(&self, tx: &mut dyn Transaction, name: &str, team: &str, user: &User) -> ServiceResult<Team> {
        let mut state = self.write(tx).await;
        let record = state.admin_org_mut(name, user)?;
        record
            .teams
            .remove(team)
            .ok_or_else(|| ServiceError::not_found(format!("Team [{}] not found", team)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, MemoryDatabase};
    use crate::services::memory::tests::backend;

    #[tokio::test]
    async fn members_and_roles() {
        let root = tempfile::tempdir().unwrap();
        let backend = backend(root.path());
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let alice = backend.add_user("alice", "auth0|alice").await;
        let bob = backend.add_user("bob", "auth0|bob").await;

        let input = CreateOrganization {
            name: "Robotics".to_string(),
            email: Some("team@example.org".to_string()),
            description: None,
        };
        backend.create(tx.as_mut(), &input, &alice).await.unwrap();
        assert!(matches!(
            backend.create(tx.as_mut(), &input, &bob).await.unwrap_err(),
            ServiceError::AlreadyExists(_)
        ));

        let public = backend.get(tx.as_mut(), "robotics", Some(&bob)).await.unwrap();
        assert!(public.email.is_none());

        let err = backend
            .add_member(tx.as_mut(), "Robotics", "alice", "member", &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        backend
            .add_member(tx.as_mut(), "Robotics", "bob", "member", &alice)
            .await
            .unwrap();
        let visible = backend.get(tx.as_mut(), "Robotics", Some(&bob)).await.unwrap();
        assert_eq!(visible.email.as_deref(), Some("team@example.org"));

        let err = backend.remove(tx.as_mut(), "Robotics", &bob).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        backend.remove(tx.as_mut(), "Robotics", &alice).await.unwrap();
        assert!(backend.get(tx.as_mut(), "Robotics", None).await.is_err());
    }

    #[tokio::test]
    async fn hidden_teams() {
        let root = tempfile::tempdir().unwrap();
        let backend = backend(root.path());
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let alice = backend.add_user("alice", "auth0|alice").await;
        let bob = backend.add_user("bob", "auth0|bob").await;
        let org = CreateOrganization {
            name: "Robotics".to_string(),
            email: None,
            description: None,
        };
        backend.create(tx.as_mut(), &org, &alice).await.unwrap();
        backend
            .add_member(tx.as_mut(), "Robotics", "bob", "member", &alice)
            .await
            .unwrap();

        let team = CreateTeam {
            name: "core".to_string(),
            visible: Some(false),
            description: None,
        };
        backend.create_team(tx.as_mut(), "Robotics", &team, &alice).await.unwrap();

        let page = PaginationRequest::new(1, 20);
        let (teams, _) = backend.teams(tx.as_mut(), &page, "Robotics", &bob).await.unwrap();
        assert!(teams.is_empty());

        let update = UpdateTeam {
            new_users: vec!["bob".to_string()],
            ..Default::default()
        };
        backend
            .update_team(tx.as_mut(), "Robotics", "core", &update, &alice)
            .await
            .unwrap();
        let (teams, _) = backend.teams(tx.as_mut(), &page, "Robotics", &bob).await.unwrap();
        assert_eq!(teams.len(), 1);
    }
}

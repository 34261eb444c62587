use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::users::User;
use super::ServiceResult;
use crate::database::Transaction;
use crate::middleware::binder::FormInput;
use crate::middleware::pagination::{PaginationRequest, PaginationResult};
use crate::middleware::validators::{alphanum, alphanum_space};

#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Only shown to members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub private: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgMember {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub org_role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Team {
    pub name: String,
    pub description: Option<String>,
    pub visible: bool,
    pub usernames: Vec<String>,
}

const ORG_ROLES: &[&str] = &["owner", "admin", "member"];

fn org_role(value: &str) -> Result<(), ValidationError> {
    if !ORG_ROLES.contains(&value) {
        let mut err = ValidationError::new("oneof");
        err.message = Some("must be one of owner, admin, member".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrganization {
    #[validate(length(min = 3), custom(function = "alphanum_space"))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    pub description: Option<String>,
}

impl FormInput for CreateOrganization {
    fn owner_names(&self) -> Vec<(&'static str, &str)> {
        vec![("name", self.name.as_str())]
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateOrganization {
    #[validate(email)]
    pub email: Option<String>,
    pub description: Option<String>,
}

impl UpdateOrganization {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.description.is_none()
    }
}

impl FormInput for UpdateOrganization {}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddUserToOrg {
    #[validate(length(min = 1), custom(function = "alphanum"))]
    pub username: String,
    #[validate(custom(function = "org_role"))]
    pub role: String,
}

impl FormInput for AddUserToOrg {}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTeam {
    #[validate(custom(function = "alphanum_space"))]
    pub name: String,
    #[validate(required)]
    pub visible: Option<bool>,
    pub description: Option<String>,
}

impl FormInput for CreateTeam {}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTeam {
    pub visible: Option<bool>,
    #[serde(default)]
    pub new_users: Vec<String>,
    #[serde(default)]
    pub rm_users: Vec<String>,
    pub description: Option<String>,
}

impl FormInput for UpdateTeam {}

#[async_trait]
pub trait OrganizationService: Send + Sync {
    async fn create(
        &self,
        tx: &mut dyn Transaction,
        input: &CreateOrganization,
        user: &User,
    ) -> ServiceResult<Organization>;

    async fn list(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<Organization>, PaginationResult)>;

    async fn get(&self, tx: &mut dyn Transaction, name: &str, user: Option<&User>) -> ServiceResult<Organization>;

    async fn update(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        input: &UpdateOrganization,
        user: &User,
    ) -> ServiceResult<Organization>;

    async fn remove(&self, tx: &mut dyn Transaction, name: &str, user: &User) -> ServiceResult<Organization>;

    async fn members(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        name: &str,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<OrgMember>, PaginationResult)>;

    /// Organization name to role, for every organization `username` belongs to
    async fn memberships(
        &self,
        tx: &mut dyn Transaction,
        username: &str,
    ) -> ServiceResult<BTreeMap<String, String>>;

    async fn add_member(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        username: &str,
        role: &str,
        user: &User,
    ) -> ServiceResult<OrgMember>;

    async fn remove_member(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        username: &str,
        user: &User,
    ) -> ServiceResult<OrgMember>;

    async fn teams(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        name: &str,
        user: &User,
    ) -> ServiceResult<(Vec<Team>, PaginationResult)>;

    async fn create_team(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        input: &CreateTeam,
        user: &User,
    ) -> ServiceResult<Team>;

    async fn team(&self, tx: &mut dyn Transaction, name: &str, team: &str, user: &User) -> ServiceResult<Team>;

    async fn update_team(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        team: &str,
        input: &UpdateTeam,
        user: &User,
    ) -> ServiceResult<Team>;

    async fn remove_team(&self, tx: &mut dyn Transaction, name: &str, team: &str, user: &User) -> ServiceResult<Team>;
}

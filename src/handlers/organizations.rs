// handlers/organizations.rs - /organizations, members and teams
use axum::Json;

use crate::error::ApiError;
use crate::middleware::params::read_name;
use crate::middleware::{commit, CommitKind, PaginationRequest, PaginationResult, RequestContext};
use crate::services::organizations::{
    AddUserToOrg, CreateOrganization, CreateTeam, OrgMember, Organization, Team, UpdateOrganization, UpdateTeam,
};

const ORG_PARAM: &str = "name";
const TEAM_PARAM: &str = "teamname";

/// POST /organizations
pub async fn create(mut ctx: RequestContext) -> Result<Json<Organization>, ApiError> {
    let user = ctx.authenticate().await?;
    let input: CreateOrganization = ctx.bind().await?;

    let org = ctx.state.organizations.create(ctx.tx.as_mut(), &input, &user).await?;
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!("Organization {} created by {}", org.name, user.username);
    Ok(Json(org))
}

/// GET /organizations
pub async fn list(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<Organization>, PaginationResult), ApiError> {
    Ok(ctx
        .state
        .organizations
        .list(ctx.tx.as_mut(), &pagination, ctx.user.as_ref())
        .await?)
}

/// GET /organizations/:name
pub async fn index(mut ctx: RequestContext, name: String) -> Result<Json<Organization>, ApiError> {
    let org = ctx
        .state
        .organizations
        .get(ctx.tx.as_mut(), &name, ctx.user.as_ref())
        .await?;
    Ok(Json(org))
}

/// PATCH /organizations/:name
pub async fn update(mut ctx: RequestContext, name: String) -> Result<Json<Organization>, ApiError> {
    let user = ctx.user()?.clone();
    let input: UpdateOrganization = ctx.bind().await?;
    if input.is_empty() {
        return Err(ApiError::invalid_form("Nothing to update", Vec::new()));
    }

    let org = ctx
        .state
        .organizations
        .update(ctx.tx.as_mut(), &name, &input, &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(org))
}

/// DELETE /organizations/:name
pub async fn remove(mut ctx: RequestContext, name: String) -> Result<Json<Organization>, ApiError> {
    let user = ctx.user()?.clone();
    let org = ctx.state.organizations.remove(ctx.tx.as_mut(), &name, &user).await?;
    commit(ctx.tx, CommitKind::Delete).await?;

    tracing::info!("Organization {} removed by {}", org.name, user.username);
    Ok(Json(org))
}

/// GET /organizations/:name/users
pub async fn members(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<OrgMember>, PaginationResult), ApiError> {
    let name = read_name(&ctx.params, ORG_PARAM)?;
    Ok(ctx
        .state
        .organizations
        .members(ctx.tx.as_mut(), &pagination, &name, ctx.user.as_ref())
        .await?)
}

/// POST /organizations/:name/users
pub async fn add_member(mut ctx: RequestContext, name: String) -> Result<Json<OrgMember>, ApiError> {
    let user = ctx.user()?.clone();
    let input: AddUserToOrg = ctx.bind().await?;

    let member = ctx
        .state
        .organizations
        .add_member(ctx.tx.as_mut(), &name, &input.username, &input.role, &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(member))
}

/// DELETE /organizations/:name/users/:username
pub async fn remove_member(mut ctx: RequestContext, name: String) -> Result<Json<OrgMember>, ApiError> {
    let user = ctx.user()?.clone();
    let username = read_name(&ctx.params, "username")?;

    let member = ctx
        .state
        .organizations
        .remove_member(ctx.tx.as_mut(), &name, &username, &user)
        .await?;
    commit(ctx.tx, CommitKind::Delete).await?;
    Ok(Json(member))
}

/// GET /organizations/:name/teams
pub async fn teams(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<Team>, PaginationResult), ApiError> {
    let user = ctx.user()?.clone();
    let name = read_name(&ctx.params, ORG_PARAM)?;
    Ok(ctx
        .state
        .organizations
        .teams(ctx.tx.as_mut(), &pagination, &name, &user)
        .await?)
}

/// POST /organizations/:name/teams
pub async fn create_team(mut ctx: RequestContext, name: String) -> Result<Json<Team>, ApiError> {
    let user = ctx.user()?.clone();
    let input: CreateTeam = ctx.bind().await?;

    let team = ctx
        .state
        .organizations
        .create_team(ctx.tx.as_mut(), &name, &input, &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(team))
}

/// GET /organizations/:name/teams/:teamname
pub async fn team(mut ctx: RequestContext, name: String) -> Result<Json<Team>, ApiError> {
    let user = ctx.user()?.clone();
    let team = read_name(&ctx.params, TEAM_PARAM)?;
    let team = ctx.state.organizations.team(ctx.tx.as_mut(), &name, &team, &user).await?;
    Ok(Json(team))
}

/// PATCH /organizations/:name/teams/:teamname
pub async fn update_team(mut ctx: RequestContext, name: String) -> Result<Json<Team>, ApiError> {
    let user = ctx.user()?.clone();
    let team = read_name(&ctx.params, TEAM_PARAM)?;
    let input: UpdateTeam = ctx.bind().await?;

    let team = ctx
        .state
        .organizations
        .update_team(ctx.tx.as_mut(), &name, &team, &input, &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(team))
}

/// DELETE /organizations/:name/teams/:teamname
pub async fn remove_team(mut ctx: RequestContext, name: String) -> Result<Json<Team>, ApiError> {
    let user = ctx.user()?.clone();
    let team = read_name(&ctx.params, TEAM_PARAM)?;

    let team = ctx
        .state
        .organizations
        .remove_team(ctx.tx.as_mut(), &name, &team, &user)
        .await?;
    commit(ctx.tx, CommitKind::Delete).await?;
    Ok(Json(team))
}

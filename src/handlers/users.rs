// handlers/users.rs - /login, /users, /profile and personal access tokens
use axum::Json;
use uuid::Uuid;

use crate::auth::{new_access_token, AuthFailure};
use crate::error::ApiError;
use crate::middleware::pagination::paginate;
use crate::middleware::params::read_name;
use crate::middleware::{commit, CommitKind, PaginationRequest, PaginationResult, RequestContext};
use crate::services::users::{
    AccessToken, CreateAccessToken, CreateUser, IssuedAccessToken, OwnerProfile, RevokeAccessToken, UpdateUser, User,
    UserResponse,
};

const USER_PARAM: &str = "username";

/// The user behind the bearer token. Account management never accepts a
/// personal access token.
async fn jwt_user(ctx: &RequestContext) -> Result<User, ApiError> {
    let identity = ctx.state.auth.bearer(ctx.headers())?;
    match ctx.state.users.by_identity(&identity).await? {
        Some(user) => Ok(user),
        None => Err(AuthFailure::UnknownUser(identity).into()),
    }
}

async fn find_user(ctx: &RequestContext, username: &str) -> Result<User, ApiError> {
    ctx.state
        .users
        .by_username(username)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User [{}] not found", username)))
}

/// `username` resolved and matched against the bearer token's user
async fn token_owner(ctx: &RequestContext, username: &str) -> Result<User, ApiError> {
    let jwt_user = jwt_user(ctx).await?;
    let user = find_user(ctx, username).await?;
    if user.id != jwt_user.id {
        return Err(ApiError::unauthorized("Access tokens can only be managed by their owner"));
    }
    Ok(user)
}

async fn respond_with(ctx: &mut RequestContext, user: &User, requester: Option<&User>) -> Result<UserResponse, ApiError> {
    let roles = ctx
        .state
        .organizations
        .memberships(ctx.tx.as_mut(), &user.username)
        .await?;
    Ok(UserResponse::new(user, roles, requester))
}

/// GET /login
pub async fn login(mut ctx: RequestContext) -> Result<Json<UserResponse>, ApiError> {
    let user = jwt_user(&ctx).await?;
    let response = respond_with(&mut ctx, &user, Some(&user)).await?;
    Ok(Json(response))
}

/// GET /users
pub async fn list(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<UserResponse>, PaginationResult), ApiError> {
    let requester = match &ctx.user {
        Some(user) if user.is_admin => user.clone(),
        _ => return Err(ApiError::unauthorized("Only system administrators can list users")),
    };

    let (users, page) = ctx.state.users.list_users(&pagination).await?;
    let mut responses = Vec::with_capacity(users.len());
    for user in &users {
        responses.push(respond_with(&mut ctx, user, Some(&requester)).await?);
    }
    Ok((responses, page))
}

/// POST /users
pub async fn create(mut ctx: RequestContext) -> Result<Json<UserResponse>, ApiError> {
    let identity = ctx.state.auth.bearer(ctx.headers())?;
    let input: CreateUser = ctx.bind().await?;

    if ctx.state.users.by_identity(&identity).await?.is_some() {
        return Err(ApiError::conflict("A user already exists for this identity"));
    }
    if ctx.state.users.owner_by_name(&input.username, true).await?.is_some() {
        return Err(ApiError::conflict(format!("Name [{}] is already taken", input.username)));
    }

    let user = User {
        id: Uuid::new_v4(),
        username: input.username,
        name: input.name,
        email: input.email,
        identity,
        is_admin: false,
    };
    ctx.state.users.insert_user(ctx.tx.as_mut(), &user).await?;
    let response = respond_with(&mut ctx, &user, Some(&user)).await?;
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!("User {} created", user.username);
    Ok(Json(response))
}

/// GET /users/:username
pub async fn index(mut ctx: RequestContext, username: String) -> Result<Json<UserResponse>, ApiError> {
    let user = find_user(&ctx, &username).await?;
    let requester = ctx.user.clone();
    Ok(Json(respond_with(&mut ctx, &user, requester.as_ref()).await?))
}

/// PATCH /users/:username
pub async fn update(mut ctx: RequestContext, username: String) -> Result<Json<UserResponse>, ApiError> {
    let requester = ctx.user()?.clone();
    let input: UpdateUser = ctx.bind().await?;
    if input.is_empty() {
        return Err(ApiError::invalid_form("Nothing to update", Vec::new()));
    }

    let mut user = find_user(&ctx, &username).await?;
    if user.id != requester.id {
        return Err(ApiError::unauthorized("Users can only update themselves"));
    }
    if let Some(name) = input.name {
        user.name = Some(name);
    }
    if let Some(email) = input.email {
        user.email = Some(email);
    }
    ctx.state.users.update_user(ctx.tx.as_mut(), &user).await?;
    let response = respond_with(&mut ctx, &user, Some(&requester)).await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(response))
}

/// DELETE /users/:username
pub async fn remove(mut ctx: RequestContext, username: String) -> Result<Json<UserResponse>, ApiError> {
    let requester = ctx.user()?.clone();
    let user = find_user(&ctx, &username).await?;
    if user.id != requester.id {
        return Err(ApiError::unauthorized("Users can only remove themselves"));
    }

    let response = respond_with(&mut ctx, &user, Some(&requester)).await?;
    ctx.state.users.remove_user(ctx.tx.as_mut(), &user).await?;
    commit(ctx.tx, CommitKind::Delete).await?;

    tracing::info!("User {} removed", user.username);
    Ok(Json(response))
}

/// GET /profile/:username
pub async fn profile(mut ctx: RequestContext, name: String) -> Result<Json<OwnerProfile>, ApiError> {
    let owner = ctx
        .state
        .users
        .owner_by_name(&name, false)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Owner [{}] not found", name)))?;
    let requester = ctx.user.clone();

    if ctx.state.users.is_organization(&owner).await? {
        let org = ctx
            .state
            .organizations
            .get(ctx.tx.as_mut(), &owner, requester.as_ref())
            .await?;
        return Ok(Json(OwnerProfile {
            owner_type: "organization",
            user: None,
            organization: Some(org),
        }));
    }

    let user = find_user(&ctx, &owner).await?;
    let response = respond_with(&mut ctx, &user, requester.as_ref()).await?;
    Ok(Json(OwnerProfile {
        owner_type: "user",
        user: Some(response),
        organization: None,
    }))
}

/// GET /users/:username/access-tokens
pub async fn access_tokens(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<AccessToken>, PaginationResult), ApiError> {
    let username = read_name(&ctx.params, USER_PARAM)?;
    let user = token_owner(&ctx, &username).await?;
    let tokens = ctx.state.tokens.tokens_for(ctx.tx.as_mut(), user.id).await?;
    Ok(paginate(tokens, &pagination))
}

/// POST /users/:username/access-tokens
pub async fn create_access_token(
    mut ctx: RequestContext,
    username: String,
) -> Result<Json<IssuedAccessToken>, ApiError> {
    let user = token_owner(&ctx, &username).await?;
    let input: CreateAccessToken = ctx.bind().await?;

    let (token, key) = new_access_token(user.id, &input.name, None);
    ctx.state.tokens.insert_token(ctx.tx.as_mut(), &token).await?;
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!("Access token {} ({}) issued to {}", token.name, token.prefix, user.username);
    Ok(Json(IssuedAccessToken {
        name: token.name,
        prefix: token.prefix,
        key,
        created: token.created,
        expires: token.expires,
    }))
}

/// POST /users/:username/access-tokens/revoke
pub async fn revoke_access_token(mut ctx: RequestContext, username: String) -> Result<(), ApiError> {
    let user = token_owner(&ctx, &username).await?;
    let input: RevokeAccessToken = ctx.bind().await?;

    let removed = ctx
        .state
        .tokens
        .delete_token(ctx.tx.as_mut(), user.id, &input.prefix, &input.name)
        .await?;
    if !removed {
        return Err(ApiError::db_delete(format!("Access token [{}] not found", input.name)));
    }
    commit(ctx.tx, CommitKind::Delete).await?;

    tracing::info!("Access token {} ({}) revoked by {}", input.name, input.prefix, user.username);
    Ok(())
}

// handlers/categories.rs - GET|POST /categories, PATCH|DELETE /categories/:slug
use axum::Json;

use crate::error::ApiError;
use crate::middleware::params::read_name;
use crate::middleware::{commit, CommitKind, RequestContext};
use crate::services::categories::{Category, CreateCategory, UpdateCategory};

/// Category changes are reserved to system administrators
async fn require_system_admin(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let user = ctx.authenticate().await?;
    if !ctx.state.permissions.is_system_admin(&user.username).await? {
        tracing::warn!("User {} attempted to modify categories", user.username);
        return Err(ApiError::unauthorized("Only system administrators can modify categories"));
    }
    Ok(())
}

/// GET /categories
pub async fn list(mut ctx: RequestContext) -> Result<Json<Vec<Category>>, ApiError> {
    let categories = ctx.state.categories.list(ctx.tx.as_mut()).await?;
    Ok(Json(categories))
}

/// POST /categories
pub async fn create(mut ctx: RequestContext) -> Result<Json<Category>, ApiError> {
    require_system_admin(&mut ctx).await?;
    let input: CreateCategory = ctx.bind().await?;

    let category = ctx.state.categories.create(ctx.tx.as_mut(), &input).await?;
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!("Category {} created", category.slug);
    Ok(Json(category))
}

/// PATCH /categories/:slug
pub async fn update(mut ctx: RequestContext) -> Result<Json<Category>, ApiError> {
    require_system_admin(&mut ctx).await?;
    let slug = read_name(&ctx.params, "slug")?;
    let input: UpdateCategory = ctx.bind().await?;

    let category = ctx.state.categories.update(ctx.tx.as_mut(), &slug, &input).await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(category))
}

/// DELETE /categories/:slug
pub async fn delete(mut ctx: RequestContext) -> Result<Json<Category>, ApiError> {
    require_system_admin(&mut ctx).await?;
    let slug = read_name(&ctx.params, "slug")?;

    let category = ctx.state.categories.delete(ctx.tx.as_mut(), &slug).await?;
    commit(ctx.tx, CommitKind::Delete).await?;

    tracing::info!("Category {} deleted", category.slug);
    Ok(Json(category))
}

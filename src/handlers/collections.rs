// handlers/collections.rs - collections and their model / world membership
use axum::response::Response;
use axum::Json;

use super::files;
use super::models_worlds::remove_location;
use crate::error::ApiError;
use crate::middleware::params::{query_bool, query_value};
use crate::middleware::{
    commit, CommitKind, PaginationRequest, PaginationResult, RequestContext, SearchArgs,
};
use crate::services::collections::{
    CloneCollection, Collection, CollectionAsset, CollectionListQuery, CreateCollection, NameOwnerPair,
    UpdateCollection,
};
use crate::types::AssetKind;

/// GET /collections, /:username/collections - `?extend=true` keeps only the
/// collections the caller can add assets to
pub async fn list(mut ctx: RequestContext, args: SearchArgs) -> Result<(Vec<Collection>, PaginationResult), ApiError> {
    let query = CollectionListQuery {
        pagination: args.pagination,
        owner: args.list.owner,
        order: args.list.order,
        search: args.list.search,
        extend: query_bool(ctx.query(), "extend"),
    };
    Ok(ctx.state.collections.list(ctx.tx.as_mut(), &query, ctx.user.as_ref()).await?)
}

/// GET /:username/collections/:collection
pub async fn index(mut ctx: RequestContext, owner: String, name: String) -> Result<Json<Collection>, ApiError> {
    let collection = ctx
        .state
        .collections
        .get(ctx.tx.as_mut(), &owner, &name, ctx.user.as_ref())
        .await?;
    Ok(Json(collection))
}

/// POST /collections
pub async fn create(mut ctx: RequestContext) -> Result<Json<Collection>, ApiError> {
    let user = ctx.authenticate().await?;
    let input: CreateCollection = ctx.bind().await?;

    let collection = ctx.state.collections.create(ctx.tx.as_mut(), &input, &user).await?;
    if let Err(e) = commit(ctx.tx, CommitKind::Save).await {
        remove_location(&collection.location).await;
        return Err(e);
    }

    tracing::info!(
        "A new collection has been created: name={} owner={} creator={}",
        collection.name,
        collection.owner,
        user.username
    );
    Ok(Json(collection))
}

/// POST /:username/collections/:collection/clone
pub async fn clone(mut ctx: RequestContext, owner: String, name: String) -> Result<Json<Collection>, ApiError> {
    let user = ctx.authenticate().await?;
    let input: CloneCollection = ctx.bind().await?;

    let collection = ctx
        .state
        .collections
        .clone_collection(ctx.tx.as_mut(), &owner, &name, &input, &user)
        .await?;
    if let Err(e) = commit(ctx.tx, CommitKind::Save).await {
        remove_location(&collection.location).await;
        return Err(e);
    }
    Ok(Json(collection))
}

/// PATCH /:username/collections/:collection - fields and optional logo /
/// banner files. Uploaded files keep their folder structure.
pub async fn update(mut ctx: RequestContext, owner: String, name: String) -> Result<Json<Collection>, ApiError> {
    let (input, uploads) = if ctx.is_multipart() {
        let form = ctx.multipart().await?;
        let input: UpdateCollection = ctx.state.binder.bind_form(form.fields())?;
        (input, form.files())
    } else {
        (ctx.bind::<UpdateCollection>().await?, Vec::new())
    };

    if input.is_empty() && uploads.is_empty() {
        return Err(ApiError::invalid_form("Nothing to update", Vec::new()));
    }

    let staged = match uploads.is_empty() {
        true => None,
        false => Some(ctx.state.stager.stage(uploads, false).await?),
    };

    let collection = ctx
        .state
        .collections
        .update(
            ctx.tx.as_mut(),
            &owner,
            &name,
            &input,
            staged.as_ref().map(|s| s.path()),
            ctx.user.as_ref(),
        )
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(collection))
}

/// DELETE /:username/collections/:collection
pub async fn remove(mut ctx: RequestContext, owner: String, name: String) -> Result<(), ApiError> {
    let user = ctx.user()?.clone();
    ctx.state.collections.remove(ctx.tx.as_mut(), &owner, &name, &user).await?;
    commit(ctx.tx, CommitKind::Delete).await?;
    tracing::info!("Collection {}/{} removed by {}", owner, name, user.username);
    Ok(())
}

/// GET /:username/collections/:collection/models
pub async fn assets(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
    owner: String,
    name: String,
    kind: AssetKind,
) -> Result<(Vec<CollectionAsset>, PaginationResult), ApiError> {
    Ok(ctx
        .state
        .collections
        .assets(ctx.tx.as_mut(), &pagination, &owner, &name, kind, ctx.user.as_ref())
        .await?)
}

/// POST /:username/collections/:collection/models
pub async fn add_asset(
    mut ctx: RequestContext,
    owner: String,
    name: String,
    kind: AssetKind,
) -> Result<Json<CollectionAsset>, ApiError> {
    let user = ctx.user()?.clone();
    let asset: NameOwnerPair = ctx.bind().await?;

    let added = ctx
        .state
        .collections
        .add_asset(ctx.tx.as_mut(), &owner, &name, &asset, kind, &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(added))
}

/// DELETE /:username/collections/:collection/models?o=<owner>&n=<name>
pub async fn remove_asset(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<(), ApiError> {
    let user = ctx.user()?.clone();
    let asset_owner = query_value(ctx.query(), "o").filter(|o| !o.is_empty());
    let asset_name = query_value(ctx.query(), "n").filter(|n| !n.is_empty());
    let asset = match (asset_owner, asset_name) {
        (Some(owner), Some(name)) => NameOwnerPair { name, owner },
        _ => {
            return Err(ApiError::missing_field(format!(
                "Missing {} owner (o) or name (n)",
                kind
            )))
        }
    };

    ctx.state
        .collections
        .remove_asset(ctx.tx.as_mut(), &owner, &name, &asset, kind, &user)
        .await?;
    commit(ctx.tx, CommitKind::Delete).await
}

/// GET /:username/models/:model/collections - collections containing the asset
pub async fn associated(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
    owner: String,
    name: String,
    kind: AssetKind,
) -> Result<(Vec<Collection>, PaginationResult), ApiError> {
    let asset = NameOwnerPair { name, owner };
    Ok(ctx
        .state
        .collections
        .associated(ctx.tx.as_mut(), &pagination, &asset, kind, ctx.user.as_ref())
        .await?)
}

/// GET /:username/collections/:collection/:version/files/*path
pub async fn file(mut ctx: RequestContext, owner: String, name: String) -> Result<Response, ApiError> {
    let (path, version) = files::file_request(&ctx)?;
    let (contents, version) = ctx
        .state
        .collections
        .get_file(ctx.tx.as_mut(), &owner, &name, &path, &version, ctx.user.as_ref())
        .await?;
    Ok(files::download(contents, &path, version))
}

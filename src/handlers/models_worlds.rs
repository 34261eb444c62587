// handlers/models_worlds.rs - models and worlds share every handler; the kind
// is fixed by the route table.
use std::path::Path;

use axum::response::Response;
use axum::Json;

use super::files;
use crate::error::ApiError;
use crate::middleware::params::{query_bool, query_values};
use crate::middleware::response::{self, with_version};
use crate::middleware::{commit, CommitKind, PaginationResult, RequestContext, SearchArgs};
use crate::services::assets::{
    Asset, AssetChanges, AssetListQuery, AssetMetadatum, CloneAsset, CreateAsset, CreateReport, ModelReference,
    UpdateAsset, ZipLocation,
};
use crate::services::collections::NameOwnerPair;
use crate::types::AssetKind;

/// GET /models, /:username/models - search, with `category` filters on models
pub async fn list(
    mut ctx: RequestContext,
    args: SearchArgs,
    kind: AssetKind,
) -> Result<(Vec<Asset>, PaginationResult), ApiError> {
    let categories = match kind {
        AssetKind::Model => query_values(ctx.query(), "category"),
        AssetKind::World => Vec::new(),
    };
    let query = AssetListQuery {
        pagination: args.pagination,
        owner: args.list.owner,
        order: args.list.order,
        search: args.list.search,
        liked_by: None,
        categories,
    };
    Ok(ctx.state.assets.list(ctx.tx.as_mut(), kind, &query, ctx.user.as_ref()).await?)
}

/// GET /:username/likes/models - assets liked by the owner
pub async fn liked(
    mut ctx: RequestContext,
    args: SearchArgs,
    kind: AssetKind,
) -> Result<(Vec<Asset>, PaginationResult), ApiError> {
    let liked_by = args.list.owner.ok_or_else(|| ApiError::not_found("User not found"))?;
    let query = AssetListQuery {
        pagination: args.pagination,
        owner: None,
        order: args.list.order,
        search: args.list.search,
        liked_by: Some(liked_by),
        categories: Vec::new(),
    };
    Ok(ctx.state.assets.list(ctx.tx.as_mut(), kind, &query, ctx.user.as_ref()).await?)
}

/// GET /:username/models/:model - `<name>.zip` downloads the tip archive
pub async fn index(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Response, ApiError> {
    if let Some(archive) = name.strip_suffix(".zip") {
        let archive = archive.to_string();
        return zip(ctx, owner, archive, kind).await;
    }
    let asset = ctx.state.assets.get(ctx.tx.as_mut(), kind, &owner, &name, ctx.user.as_ref()).await?;
    let version = asset.version;
    Ok(with_version(Json(asset), version))
}

/// GET /:username/models/:model/:version/:zipname - zip when the last segment
/// ends in `.zip`, the asset index otherwise
pub async fn versioned(ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Response, ApiError> {
    let wants_zip = ctx
        .params
        .get("zipname")
        .map(|z| z.ends_with(".zip"))
        .unwrap_or(false);
    if wants_zip {
        zip(ctx, owner, name, kind).await
    } else {
        index(ctx, owner, name, kind).await
    }
}

/// Zip archive of a version. `?link=true` answers with the download URL as
/// text instead of redirecting.
pub async fn zip(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Response, ApiError> {
    let version = ctx.params.get("version").cloned().unwrap_or_default();
    let link_only = query_bool(ctx.query(), "link");
    let user_agent = ctx.header("user-agent").map(str::to_string);

    let download = ctx
        .state
        .assets
        .download_zip(
            ctx.tx.as_mut(),
            kind,
            &owner,
            &name,
            &version,
            ctx.user.as_ref(),
            user_agent.as_deref(),
        )
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;

    match download.location {
        ZipLocation::Remote(url) if link_only => Ok(with_version(response::text(url), download.version)),
        ZipLocation::Remote(url) => Ok(with_version(response::redirect(&url)?, download.version)),
        ZipLocation::Local(path) => response::zip_file(&path, &download.uuid, download.version).await,
    }
}

/// GET /:username/models/:model/:version/files
pub async fn file_tree(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Response, ApiError> {
    let version = ctx.params.get("version").cloned().unwrap_or_default();
    let tree = ctx
        .state
        .assets
        .file_tree(ctx.tx.as_mut(), kind, &owner, &name, &version, ctx.user.as_ref())
        .await?;
    let version = tree.version;
    Ok(with_version(Json(tree), version))
}

/// GET /:username/models/:model/:version/files/*path
pub async fn file(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Response, ApiError> {
    let (path, version) = files::file_request(&ctx)?;
    let (contents, version) = ctx
        .state
        .assets
        .get_file(ctx.tx.as_mut(), kind, &owner, &name, &path, &version, ctx.user.as_ref())
        .await?;
    Ok(files::download(contents, &path, version))
}

/// POST /models - multipart upload. The common root folder of the submitted
/// files is flattened away.
pub async fn create(mut ctx: RequestContext, kind: AssetKind) -> Result<Json<Asset>, ApiError> {
    let user = ctx.authenticate().await?;
    let form = ctx.multipart().await?;
    let input: CreateAsset = ctx.state.binder.bind_form(form.fields())?;
    let metadata = AssetMetadatum::parse_lines(form.values("metadata"));

    let owner = match input.owner.as_deref().filter(|o| !o.is_empty()) {
        Some(requested) => ctx
            .state
            .users
            .owner_by_name(requested, true)
            .await?
            .ok_or_else(|| ApiError::not_found_with("Owner not found", requested))?,
        None => user.username.clone(),
    };

    let staged = ctx.state.stager.stage(form.files(), true).await?;
    let asset = ctx
        .state
        .assets
        .create(ctx.tx.as_mut(), kind, &owner, &input, metadata, staged.path(), &user)
        .await?;
    drop(staged);

    if let Err(e) = commit(ctx.tx, CommitKind::Save).await {
        remove_location(&asset.location).await;
        return Err(e);
    }

    tracing::info!(
        "A new {} has been created: name={} owner={} creator={} uuid={} tags={:?}",
        kind,
        asset.name,
        asset.owner,
        asset.creator,
        asset.uuid,
        asset.tags
    );
    Ok(Json(asset))
}

/// POST /:username/models/:model/clone
pub async fn clone(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Json<Asset>, ApiError> {
    let user = ctx.authenticate().await?;
    let input: CloneAsset = ctx.bind().await?;

    let asset = ctx
        .state
        .assets
        .clone_asset(ctx.tx.as_mut(), kind, &owner, &name, &input, &user)
        .await?;
    if let Err(e) = commit(ctx.tx, CommitKind::Save).await {
        remove_location(&asset.location).await;
        return Err(e);
    }

    tracing::info!("{} {}/{} cloned into {}/{}", kind, owner, name, asset.owner, asset.name);
    Ok(Json(asset))
}

/// PATCH /:username/models/:model - metadata fields, `metadata` lines and
/// optionally a new set of files that becomes the next version
pub async fn update(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Json<Asset>, ApiError> {
    let (fields, uploads, metadata) = if ctx.is_multipart() {
        let form = ctx.multipart().await?;
        let fields: UpdateAsset = ctx.state.binder.bind_form(form.fields())?;
        let lines = form.values("metadata");
        let metadata = (!lines.is_empty()).then(|| AssetMetadatum::parse_lines(lines));
        (fields, form.files(), metadata)
    } else {
        (ctx.bind::<UpdateAsset>().await?, Vec::new(), None)
    };

    if fields.is_empty() && uploads.is_empty() && metadata.is_none() {
        return Err(ApiError::invalid_form("Nothing to update", Vec::new()));
    }

    let staged = match uploads.is_empty() {
        true => None,
        false => Some(ctx.state.stager.stage(uploads, true).await?),
    };
    let changes = AssetChanges {
        fields,
        metadata,
        new_files: staged.as_ref().map(|s| s.path()),
    };

    let asset = ctx
        .state
        .assets
        .update(ctx.tx.as_mut(), kind, &owner, &name, changes, ctx.user.as_ref())
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!(
        "{} has been updated: name={} owner={} uuid={} version={}",
        kind.label(),
        asset.name,
        asset.owner,
        asset.uuid,
        asset.version
    );
    Ok(Json(asset))
}

/// DELETE /:username/models/:model - also drops the asset from every collection
pub async fn remove(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<(), ApiError> {
    let user = ctx.user()?.clone();
    let asset = ctx.state.assets.remove(ctx.tx.as_mut(), kind, &owner, &name, &user).await?;

    let pair = NameOwnerPair {
        name: asset.name.clone(),
        owner: asset.owner.clone(),
    };
    ctx.state
        .collections
        .remove_asset_from_all(ctx.tx.as_mut(), &pair, kind)
        .await
        .map_err(|e| {
            tracing::error!("Unable to remove {} {}/{} from collections: {}", kind, owner, name, e);
            ApiError::db_delete(e.to_string())
        })?;
    commit(ctx.tx, CommitKind::Delete).await?;

    tracing::info!("{} {}/{} removed by {}", kind.label(), asset.owner, asset.name, user.username);
    Ok(())
}

/// POST /:username/models/:model/likes - answers with the new like count
pub async fn like(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Response, ApiError> {
    let user = ctx.user()?.clone();
    let count = ctx.state.assets.like(ctx.tx.as_mut(), kind, &owner, &name, &user).await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(response::text(count.to_string()))
}

/// DELETE /:username/models/:model/likes
pub async fn unlike(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<Response, ApiError> {
    let user = ctx.user()?.clone();
    let count = ctx.state.assets.unlike(ctx.tx.as_mut(), kind, &owner, &name, &user).await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(response::text(count.to_string()))
}

/// POST /:username/models/:model/report
pub async fn report(mut ctx: RequestContext, owner: String, name: String, kind: AssetKind) -> Result<(), ApiError> {
    let input: CreateReport = ctx.bind().await?;
    ctx.state
        .assets
        .report(ctx.tx.as_mut(), kind, &owner, &name, &input.reason)
        .await?;
    commit(ctx.tx, CommitKind::Save).await
}

/// GET /:username/worlds/:world/:version/:zipname/modelrefs - models the world includes
pub async fn model_references(
    mut ctx: RequestContext,
    owner: String,
    name: String,
) -> Result<Json<Vec<ModelReference>>, ApiError> {
    let version = ctx.params.get("version").cloned().unwrap_or_default();
    let refs = ctx
        .state
        .assets
        .model_references(ctx.tx.as_mut(), &owner, &name, &version, ctx.user.as_ref())
        .await?;
    Ok(Json(refs))
}

/// Remove a resource directory whose record never made it to the database
pub(crate) async fn remove_location(location: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(location).await {
        tracing::error!("Unable to remove directory {}: {}", location.display(), e);
    }
}

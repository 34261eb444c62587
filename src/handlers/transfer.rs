// handlers/transfer.rs - POST /:username/{models,worlds,collections}/:name/transfer
//
// Ownership moves from a user to an organization the user can write to.
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::{commit, CommitKind, FormInput, RequestContext};
use crate::services::assets::Asset;
use crate::services::collections::Collection;
use crate::services::ServiceResult;
use crate::state::AppState;
use crate::types::{Action, AssetKind};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransferAsset {
    #[serde(rename = "destOwner")]
    #[validate(length(min = 1))]
    pub dest_owner: String,
}

impl FormInput for TransferAsset {}

/// Bind the request and check that `source_owner` may write to the
/// destination organization
async fn read_transfer(ctx: &mut RequestContext, source_owner: &str) -> Result<TransferAsset, ApiError> {
    let input: TransferAsset = ctx.bind().await?;

    if !ctx.state.users.is_organization(&input.dest_owner).await? {
        return Err(ApiError::not_found_with(
            "Organization not found",
            format!("Organization [{}] not found", input.dest_owner),
        ));
    }

    let authorized = ctx
        .state
        .permissions
        .is_authorized(source_owner, &input.dest_owner, Action::Write)
        .await?;
    if !authorized {
        return Err(ApiError::unauthorized(format!(
            "User [{}] is not authorized",
            source_owner
        )));
    }

    Ok(input)
}

/// Grant the destination owner read and write on the resource, then revoke
/// them from the source owner
async fn swap_permissions(state: &AppState, resource: &str, source: &str, dest: &str) -> ServiceResult<()> {
    let permissions = &state.permissions;
    permissions.add_permission(dest, resource, Action::Read).await?;
    permissions.add_permission(dest, resource, Action::Write).await?;
    permissions.remove_permission(source, resource, Action::Read).await?;
    permissions.remove_permission(source, resource, Action::Write).await?;
    Ok(())
}

pub async fn transfer_asset(
    mut ctx: RequestContext,
    owner: String,
    name: String,
    kind: AssetKind,
) -> Result<Json<Asset>, ApiError> {
    let input = read_transfer(&mut ctx, &owner).await?;
    let dest = input.dest_owner;

    let asset = ctx
        .state
        .assets
        .get(ctx.tx.as_mut(), kind, &owner, &name, ctx.user.as_ref())
        .await
        .map_err(|_| {
            ApiError::not_found_with(
                format!("{} not found", kind.label()),
                format!("{} [{}] not found", kind.label(), name),
            )
        })?;

    let moved = ctx.state.assets.move_to(ctx.tx.as_mut(), kind, &owner, &name, &dest).await?;

    if let Err(e) = swap_permissions(&ctx.state, &asset.uuid, &owner, &dest).await {
        tracing::error!("Permission update failed while transferring {} {}/{}: {}", kind, owner, name, e);
        if let Err(revert) = ctx.state.assets.move_to(ctx.tx.as_mut(), kind, &dest, &moved.name, &owner).await {
            tracing::error!("Unable to revert transfer of {} {}/{}: {}", kind, owner, name, revert);
        }
        return Err(ApiError::internal_server_error("Unable to update permissions"));
    }
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!("{} {}/{} transferred to {}", kind.label(), owner, name, dest);
    Ok(Json(moved))
}

pub async fn transfer_collection(
    mut ctx: RequestContext,
    owner: String,
    name: String,
) -> Result<Json<Collection>, ApiError> {
    let input = read_transfer(&mut ctx, &owner).await?;
    let dest = input.dest_owner;

    let collection = ctx
        .state
        .collections
        .get(ctx.tx.as_mut(), &owner, &name, ctx.user.as_ref())
        .await
        .map_err(|_| {
            ApiError::not_found_with("Collection not found", format!("Collection [{}] not found", name))
        })?;

    let moved = ctx.state.collections.move_to(ctx.tx.as_mut(), &owner, &name, &dest).await?;

    if let Err(e) = swap_permissions(&ctx.state, &collection.uuid, &owner, &dest).await {
        tracing::error!("Permission update failed while transferring collection {}/{}: {}", owner, name, e);
        if let Err(revert) = ctx.state.collections.move_to(ctx.tx.as_mut(), &dest, &moved.name, &owner).await {
            tracing::error!("Unable to revert transfer of collection {}/{}: {}", owner, name, revert);
        }
        return Err(ApiError::internal_server_error("Unable to update permissions"));
    }
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!("Collection {}/{} transferred to {}", owner, name, dest);
    Ok(Json(moved))
}

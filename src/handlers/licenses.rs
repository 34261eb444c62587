// handlers/licenses.rs - /licenses
use crate::error::ApiError;
use crate::middleware::{PaginationRequest, PaginationResult, RequestContext};
use crate::services::licenses::License;

/// GET /licenses
pub async fn list(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<License>, PaginationResult), ApiError> {
    Ok(ctx.state.licenses.list(ctx.tx.as_mut(), &pagination).await?)
}

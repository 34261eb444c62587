// handlers/competition.rs - /subt registrations, participants, log files and leaderboard
//
// Routes without a `:competition` segment act on the configured default
// competition.
use axum::response::Response;
use axum::Json;

use crate::error::ApiError;
use crate::middleware::params::{query_bool, query_value, read_id, read_owner, ParamError};
use crate::middleware::response;
use crate::middleware::{commit, CommitKind, PaginationRequest, PaginationResult, RequestContext};
use crate::services::competition::{
    LeaderboardEntry, LogFile, LogSubmission, Participant, Registration, RegistrationCreate, RegistrationStatus,
    RegistrationUpdate, SubmissionStatus, SubmissionUpdate,
};

const LOG_FILE_FIELD: &str = "file";

fn competition(ctx: &RequestContext) -> String {
    ctx.params
        .get("competition")
        .filter(|c| !c.is_empty())
        .cloned()
        .unwrap_or_else(|| ctx.state.config.competition.default_competition.clone())
}

/// `?status=` filter; absent means `default`, anything unknown is rejected
fn status_filter<S>(ctx: &RequestContext, default: S, parse: fn(&str) -> Option<S>) -> Result<S, ApiError> {
    match query_value(ctx.query(), "status") {
        None => Ok(default),
        Some(value) => parse(&value).ok_or_else(|| ApiError::missing_field(format!("Invalid status '{}'", value))),
    }
}

/// GET /subt/leaderboard?competition=&circuit=&owner=
pub async fn leaderboard(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<LeaderboardEntry>, PaginationResult), ApiError> {
    let competition = query_value(ctx.query(), "competition")
        .unwrap_or_else(|| ctx.state.config.competition.default_competition.clone());
    let circuit = query_value(ctx.query(), "circuit");
    let owner = query_value(ctx.query(), "owner");

    Ok(ctx
        .state
        .competition
        .leaderboard(
            ctx.tx.as_mut(),
            &pagination,
            &competition,
            circuit.as_deref(),
            owner.as_deref(),
        )
        .await?)
}

/// GET /subt/registrations?status=pending|done|rejected
pub async fn registrations(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<Registration>, PaginationResult), ApiError> {
    let user = ctx.user()?.clone();
    let status = status_filter(&ctx, RegistrationStatus::Pending, RegistrationStatus::from_query)?;
    let competition = competition(&ctx);

    Ok(ctx
        .state
        .competition
        .registrations(ctx.tx.as_mut(), &pagination, &competition, status, &user)
        .await?)
}

/// POST /subt/registrations
pub async fn apply(mut ctx: RequestContext) -> Result<Json<Registration>, ApiError> {
    let user = ctx.authenticate().await?;
    let input: RegistrationCreate = ctx.bind().await?;
    let competition = competition(&ctx);

    let registration = ctx
        .state
        .competition
        .apply(ctx.tx.as_mut(), &competition, &input.participant, &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!(
        "{} applied to {} for {}",
        user.username,
        registration.competition,
        registration.participant
    );
    Ok(Json(registration))
}

/// PATCH /subt/registrations/:competition/:name
pub async fn resolve(mut ctx: RequestContext, participant: String) -> Result<Json<Registration>, ApiError> {
    let user = ctx.user()?.clone();
    let input: RegistrationUpdate = ctx.bind().await?;
    let competition = competition(&ctx);

    let registration = ctx
        .state
        .competition
        .resolve(ctx.tx.as_mut(), &competition, &participant, input.status(), &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(registration))
}

/// DELETE /subt/registrations/:competition/:name
pub async fn delete_registration(mut ctx: RequestContext, participant: String) -> Result<Json<Registration>, ApiError> {
    let user = ctx.user()?.clone();
    let competition = competition(&ctx);

    let registration = ctx
        .state
        .competition
        .delete_registration(ctx.tx.as_mut(), &competition, &participant, &user)
        .await?;
    commit(ctx.tx, CommitKind::Delete).await?;
    Ok(Json(registration))
}

/// GET /subt/participants
pub async fn participants(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<Participant>, PaginationResult), ApiError> {
    let user = ctx.user()?.clone();
    let competition = competition(&ctx);
    Ok(ctx
        .state
        .competition
        .participants(ctx.tx.as_mut(), &pagination, &competition, &user)
        .await?)
}

/// DELETE /subt/participants/:competition/:name
pub async fn delete_participant(mut ctx: RequestContext, participant: String) -> Result<Json<Participant>, ApiError> {
    let user = ctx.user()?.clone();
    let competition = competition(&ctx);

    let removed = ctx
        .state
        .competition
        .delete_participant(ctx.tx.as_mut(), &competition, &participant, &user)
        .await?;
    commit(ctx.tx, CommitKind::Delete).await?;
    Ok(Json(removed))
}

/// POST /subt/logfiles - multipart with a single `file` part
pub async fn submit_log(mut ctx: RequestContext) -> Result<Json<LogFile>, ApiError> {
    let user = ctx.authenticate().await?;
    let form = ctx.multipart().await?;
    let submission: LogSubmission = ctx.state.binder.bind_form(form.fields())?;

    let files = form.files();
    let file = files
        .first()
        .ok_or_else(|| ApiError::MissingFiles(format!("Missing '{}' in form", LOG_FILE_FIELD)))?;
    let file_name = super::files::file_name(&file.path).to_string();
    let competition = competition(&ctx);

    let log = ctx
        .state
        .competition
        .create_log(ctx.tx.as_mut(), &competition, &submission, &file_name, &file.contents, &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;

    tracing::info!("Log file {} submitted by {} for {}", log.id, user.username, log.owner);
    Ok(Json(log))
}

/// PATCH /subt/logfiles/:id
pub async fn update_log(mut ctx: RequestContext) -> Result<Json<LogFile>, ApiError> {
    let user = ctx.authenticate().await?;
    let id = read_id(&ctx.params, "id")?;
    let input: SubmissionUpdate = ctx.bind().await?;
    let competition = competition(&ctx);

    let log = ctx
        .state
        .competition
        .update_log(ctx.tx.as_mut(), &competition, id, &input, &user)
        .await?;
    commit(ctx.tx, CommitKind::Save).await?;
    Ok(Json(log))
}

/// DELETE /subt/logfiles/:id
pub async fn remove_log(mut ctx: RequestContext) -> Result<Json<LogFile>, ApiError> {
    let user = ctx.authenticate().await?;
    let id = read_id(&ctx.params, "id")?;
    let competition = competition(&ctx);

    let log = ctx
        .state
        .competition
        .remove_log(ctx.tx.as_mut(), &competition, id, &user)
        .await?;
    commit(ctx.tx, CommitKind::Delete).await?;
    Ok(Json(log))
}

/// GET /subt/logfiles/:id
pub async fn get_log(mut ctx: RequestContext) -> Result<Json<LogFile>, ApiError> {
    let user = ctx.authenticate().await?;
    let id = read_id(&ctx.params, "id")?;
    let competition = competition(&ctx);

    let log = ctx.state.competition.get_log(ctx.tx.as_mut(), &competition, id, &user).await?;
    Ok(Json(log))
}

/// GET /subt/logfiles/:id/file - `?link=true` returns the URL instead of
/// redirecting to it
pub async fn download(mut ctx: RequestContext) -> Result<Response, ApiError> {
    let user = ctx.authenticate().await?;
    let id = read_id(&ctx.params, "id")?;
    let link_only = query_bool(ctx.query(), "link");
    let competition = competition(&ctx);

    let url = ctx
        .state
        .competition
        .log_download_url(ctx.tx.as_mut(), &competition, id, &user)
        .await?;
    if link_only {
        Ok(response::text(url))
    } else {
        response::redirect(&url)
    }
}

/// GET /subt/logfiles, /subt/participants/:competition/:name/logfiles
pub async fn logs(
    mut ctx: RequestContext,
    pagination: PaginationRequest,
) -> Result<(Vec<LogFile>, PaginationResult), ApiError> {
    let user = ctx.user()?.clone();
    let status = status_filter(&ctx, SubmissionStatus::ForReview, SubmissionStatus::from_query)?;
    let owner = match read_owner(&ctx.params, "name", ctx.state.users.as_ref()).await {
        Ok(owner) => Some(owner),
        Err(ParamError::NotInRequest(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let competition = competition(&ctx);

    Ok(ctx
        .state
        .competition
        .logs(
            ctx.tx.as_mut(),
            &pagination,
            &competition,
            owner.as_deref(),
            status,
            &user,
        )
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsers_share_query_words() {
        assert_eq!(RegistrationStatus::from_query("rejected"), Some(RegistrationStatus::Rejected));
        assert_eq!(SubmissionStatus::from_query("pending"), Some(SubmissionStatus::ForReview));
        assert!(SubmissionStatus::from_query("open").is_none());
    }
}

//! Route table. Every resource route lives under `/1.0`; competition routes
//! under `/1.0/subt`.

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::SecurityConfig;
use crate::handlers::{categories, collections, competition, licenses, models_worlds, organizations, transfer, users};
use crate::middleware::response::VERSION_HEADER;
use crate::middleware::{name, name_owner, name_owner_paged, no_result, paginated, plain, search};
use crate::state::AppState;
use crate::types::AssetKind;

pub const API_PREFIX: &str = "/1.0";

/// The complete application router
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.server.max_request_size_bytes;
    let cors = cors(&state.config.security);

    let api = Router::new()
        .route("/health", get(health))
        .merge(asset_routes(AssetKind::Model))
        .merge(asset_routes(AssetKind::World))
        .route(
            "/:username/worlds/:world/:version/:zipname/modelrefs",
            get(name_owner("world", false, "World not found", models_worlds::model_references)),
        )
        .merge(collection_routes())
        .merge(organization_routes())
        .merge(category_routes())
        .merge(user_routes())
        .route("/licenses", get(paginated(false, licenses::list)))
        .nest("/subt", competition_routes());

    Router::new()
        .nest(API_PREFIX, api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn not_found_message(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Model => "Model not found",
        AssetKind::World => "World not found",
    }
}

/// Routes shared by models and worlds, e.g. `/models` and
/// `/:username/models/:model/...`
fn asset_routes(kind: AssetKind) -> Router<AppState> {
    let plural = kind.plural();
    let key = kind.name_param();
    let missing = not_found_message(kind);
    let single = format!("/:username/{}/:{}", plural, key);

    Router::new()
        .route(
            &format!("/{}", plural),
            get(search(move |ctx, args| models_worlds::list(ctx, args, kind)))
                .post(plain(move |ctx| models_worlds::create(ctx, kind))),
        )
        .route(
            &format!("/:username/{}", plural),
            get(search(move |ctx, args| models_worlds::list(ctx, args, kind))),
        )
        .route(
            &format!("/:username/likes/{}", plural),
            get(search(move |ctx, args| models_worlds::liked(ctx, args, kind))),
        )
        .route(
            &single,
            get(name_owner(key, false, missing, move |ctx, o, n| {
                models_worlds::index(ctx, o, n, kind)
            }))
            .patch(name_owner(key, true, missing, move |ctx, o, n| {
                models_worlds::update(ctx, o, n, kind)
            }))
            .delete(no_result(name_owner(key, true, missing, move |ctx, o, n| {
                models_worlds::remove(ctx, o, n, kind)
            }))),
        )
        .route(
            &format!("{}/likes", single),
            post(name_owner(key, true, missing, move |ctx, o, n| {
                models_worlds::like(ctx, o, n, kind)
            }))
            .delete(name_owner(key, true, missing, move |ctx, o, n| {
                models_worlds::unlike(ctx, o, n, kind)
            })),
        )
        .route(
            &format!("{}/report", single),
            post(no_result(name_owner(key, false, missing, move |ctx, o, n| {
                models_worlds::report(ctx, o, n, kind)
            }))),
        )
        .route(
            &format!("{}/clone", single),
            post(name_owner(key, true, missing, move |ctx, o, n| {
                models_worlds::clone(ctx, o, n, kind)
            })),
        )
        .route(
            &format!("{}/transfer", single),
            post(name_owner(key, true, missing, move |ctx, o, n| {
                transfer::transfer_asset(ctx, o, n, kind)
            })),
        )
        .route(
            &format!("{}/collections", single),
            get(name_owner_paged(key, missing, move |ctx, p, o, n| {
                collections::associated(ctx, p, o, n, kind)
            })),
        )
        .route(
            &format!("{}/:version/files", single),
            get(name_owner(key, false, missing, move |ctx, o, n| {
                models_worlds::file_tree(ctx, o, n, kind)
            })),
        )
        .route(
            &format!("{}/:version/files/*path", single),
            get(name_owner(key, false, missing, move |ctx, o, n| {
                models_worlds::file(ctx, o, n, kind)
            })),
        )
        .route(
            &format!("{}/:version/:zipname", single),
            get(name_owner(key, false, missing, move |ctx, o, n| {
                models_worlds::versioned(ctx, o, n, kind)
            })),
        )
}

fn collection_routes() -> Router<AppState> {
    const KEY: &str = "collection";
    const MISSING: &str = "Collection not found";
    let mut router = Router::new()
        .route(
            "/collections",
            get(search(collections::list)).post(plain(collections::create)),
        )
        .route("/:username/collections", get(search(collections::list)))
        .route(
            "/:username/collections/:collection",
            get(name_owner(KEY, false, MISSING, collections::index))
                .patch(name_owner(KEY, true, MISSING, collections::update))
                .delete(no_result(name_owner(KEY, true, MISSING, collections::remove))),
        )
        .route(
            "/:username/collections/:collection/clone",
            post(name_owner(KEY, true, MISSING, collections::clone)),
        )
        .route(
            "/:username/collections/:collection/transfer",
            post(name_owner(KEY, true, MISSING, transfer::transfer_collection)),
        )
        .route(
            "/:username/collections/:collection/:version/files/*path",
            get(name_owner(KEY, false, MISSING, collections::file)),
        );

    for kind in [AssetKind::Model, AssetKind::World] {
        router = router.route(
            &format!("/:username/collections/:collection/{}", kind.plural()),
            get(name_owner_paged(KEY, MISSING, move |ctx, p, o, n| {
                collections::assets(ctx, p, o, n, kind)
            }))
            .post(name_owner(KEY, true, MISSING, move |ctx, o, n| {
                collections::add_asset(ctx, o, n, kind)
            }))
            .delete(no_result(name_owner(KEY, true, MISSING, move |ctx, o, n| {
                collections::remove_asset(ctx, o, n, kind)
            }))),
        );
    }
    router
}

fn organization_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/organizations",
            get(paginated(false, organizations::list)).post(plain(organizations::create)),
        )
        .route(
            "/organizations/:name",
            get(name("name", false, organizations::index))
                .patch(name("name", true, organizations::update))
                .delete(name("name", true, organizations::remove)),
        )
        .route(
            "/organizations/:name/users",
            get(paginated(false, organizations::members)).post(name("name", true, organizations::add_member)),
        )
        .route(
            "/organizations/:name/users/:username",
            axum::routing::delete(name("name", true, organizations::remove_member)),
        )
        .route(
            "/organizations/:name/teams",
            get(paginated(true, organizations::teams)).post(name("name", true, organizations::create_team)),
        )
        .route(
            "/organizations/:name/teams/:teamname",
            get(name("name", true, organizations::team))
                .patch(name("name", true, organizations::update_team))
                .delete(name("name", true, organizations::remove_team)),
        )
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(plain(users::login)))
        .route("/users", get(paginated(false, users::list)).post(plain(users::create)))
        .route(
            "/users/:username",
            get(name("username", false, users::index))
                .patch(name("username", true, users::update))
                .delete(name("username", true, users::remove)),
        )
        .route(
            "/users/:username/access-tokens",
            get(paginated(false, users::access_tokens)).post(name("username", false, users::create_access_token)),
        )
        .route(
            "/users/:username/access-tokens/revoke",
            post(no_result(name("username", false, users::revoke_access_token))),
        )
        .route("/profile/:username", get(name("username", false, users::profile)))
}

fn category_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/categories",
            get(plain(categories::list)).post(plain(categories::create)),
        )
        .route(
            "/categories/:slug",
            axum::routing::patch(plain(categories::update)).delete(plain(categories::delete)),
        )
}

fn competition_routes() -> Router<AppState> {
    Router::new()
        .route("/leaderboard", get(paginated(false, competition::leaderboard)))
        .route(
            "/registrations",
            get(paginated(true, competition::registrations)).post(plain(competition::apply)),
        )
        .route(
            "/registrations/:competition/:name",
            axum::routing::patch(name("name", true, competition::resolve))
                .delete(name("name", true, competition::delete_registration)),
        )
        .route("/participants", get(paginated(true, competition::participants)))
        .route(
            "/participants/:competition/:name",
            axum::routing::delete(name("name", true, competition::delete_participant)),
        )
        .route(
            "/participants/:competition/:name/logfiles",
            get(paginated(true, competition::logs)),
        )
        .route(
            "/logfiles",
            get(paginated(true, competition::logs)).post(plain(competition::submit_log)),
        )
        .route(
            "/logfiles/:id",
            get(plain(competition::get_log))
                .patch(plain(competition::update_log))
                .delete(plain(competition::remove_log)),
        )
        .route("/logfiles/:id/file", get(plain(competition::download)))
}

/// CORS from the security settings. Pagination and version headers are
/// exposed to browsers.
fn cors(security: &SecurityConfig) -> CorsLayer {
    if !security.enable_cors {
        return CorsLayer::new();
    }
    let exposed = [
        HeaderName::from_static("x-total-count"),
        HeaderName::from_static("link"),
        VERSION_HEADER,
    ];
    if security.cors_origins.is_empty() || security.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(exposed);
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin '{}': {}", o, e);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(exposed)
}

/// GET /1.0/health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "timestamp": now, "database": "ok" })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "timestamp": now, "database": "unavailable" })),
            )
        }
    }
}

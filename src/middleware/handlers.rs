//! Higher-order wrappers that turn resource handlers into axum handlers.
//!
//! Each wrapper resolves what its handlers have in common (pagination,
//! identity, owner and name parameters) before a transaction is begun. A
//! resolution failure is answered directly; the inner handler never runs.

use std::future::Future;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, FromRequestParts, Multipart, OriginalUri, Path, Request, State};
use axum::http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use serde::Serialize;

use super::binder::FormInput;
use super::multipart::MultipartForm;
use super::pagination::{PaginationRequest, PaginationResult};
use super::params::{read_name, read_owner, ListParams, ParamError, PathParams, OWNER_PARAM};
use crate::database::{DatabaseError, Transaction};
use crate::error::ApiError;
use crate::services::users::User;
use crate::state::AppState;

/// Everything an inner handler receives about its request.
///
/// The transaction is a public field so handlers can pass `ctx.tx.as_mut()`
/// to a service while borrowing `ctx.state`.
pub struct RequestContext {
    pub state: AppState,
    pub parts: Parts,
    pub params: PathParams,
    pub user: Option<User>,
    pub tx: Box<dyn Transaction>,
    body: std::sync::Mutex<Option<Body>>,
}

impl RequestContext {
    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// The resolved user, or the no-identity error for handlers that need one
    pub fn user(&self) -> Result<&User, ApiError> {
        self.user
            .as_ref()
            .ok_or_else(|| ApiError::NoIdentity("Unable to process JWT token".to_string()))
    }

    /// Resolve identity for handlers whose wrapper did not; anonymous is fatal
    pub async fn authenticate(&mut self) -> Result<User, ApiError> {
        if let Some(user) = &self.user {
            return Ok(user.clone());
        }
        let user = self.state.auth.resolve(&self.parts.headers).await?;
        self.user = Some(user.clone());
        Ok(user)
    }

    fn take_body(&mut self) -> Result<Body, ApiError> {
        self.body
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| ApiError::internal_server_error("Request body already consumed"))
    }

    pub async fn body_bytes(&mut self) -> Result<Bytes, ApiError> {
        let limit = self.state.config.server.max_request_size_bytes;
        let body = self.take_body()?;
        axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| ApiError::bad_request(format!("Unable to read request body: {}", e)))
    }

    pub async fn json<T: FormInput>(&mut self) -> Result<T, ApiError> {
        let bytes = self.body_bytes().await?;
        self.state.binder.bind_json(&bytes)
    }

    pub async fn form<T: FormInput>(&mut self) -> Result<T, ApiError> {
        let bytes = self.body_bytes().await?;
        self.state.binder.bind_urlencoded(&bytes)
    }

    fn content_type_is(&self, mime: &str) -> bool {
        self.header(header::CONTENT_TYPE.as_str())
            .map(|ct| ct.starts_with(mime))
            .unwrap_or(false)
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type_is("multipart/form-data")
    }

    /// Bind by content type: JSON, multipart text fields, or URL-encoded
    pub async fn bind<T: FormInput>(&mut self) -> Result<T, ApiError> {
        if self.content_type_is("application/json") {
            self.json().await
        } else if self.is_multipart() {
            let form = self.multipart().await?;
            self.state.binder.bind_form(form.fields())
        } else {
            self.form().await
        }
    }

    /// Buffer a `multipart/form-data` body
    pub async fn multipart(&mut self) -> Result<MultipartForm, ApiError> {
        let body = self.take_body()?;
        let mut req = axum::http::Request::new(body);
        *req.method_mut() = self.parts.method.clone();
        *req.uri_mut() = self.parts.uri.clone();
        *req.headers_mut() = self.parts.headers.clone();
        *req.extensions_mut() = self.parts.extensions.clone();

        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::invalid_form("Unable to read multipart form", vec![e.body_text()]))?;
        MultipartForm::read(multipart).await
    }
}

/// Arguments of a list endpoint
#[derive(Debug, Clone)]
pub struct SearchArgs {
    pub pagination: PaginationRequest,
    pub list: ListParams,
}

/// Resolve the acting user. Anonymous outcomes are tolerated unless `required`.
pub async fn identify(state: &AppState, headers: &HeaderMap, required: bool) -> Result<Option<User>, ApiError> {
    match state.auth.resolve(headers).await {
        Ok(user) => Ok(Some(user)),
        Err(failure) if !required && failure.is_anonymous() => {
            tracing::debug!("Continuing anonymously: {}", failure);
            Ok(None)
        }
        Err(failure) => Err(failure.into()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Save,
    Delete,
}

pub async fn begin(state: &AppState) -> Result<Box<dyn Transaction>, ApiError> {
    state.db.begin().await.map_err(|e| {
        tracing::error!("Unable to begin transaction: {}", e);
        ApiError::NoDatabase("Unable to access the database".to_string())
    })
}

/// Commit a handler's transaction, mapping failures to the save or delete error
pub async fn commit(tx: Box<dyn Transaction>, kind: CommitKind) -> Result<(), ApiError> {
    tx.commit().await.map_err(|e| {
        tracing::error!("Commit failed: {}", e);
        match (e, kind) {
            (DatabaseError::ConnectionError(_) | DatabaseError::ConfigMissing(_), _) => {
                ApiError::NoDatabase("Unable to access the database".to_string())
            }
            (other, CommitKind::Save) => ApiError::db_save(other.to_string()),
            (other, CommitKind::Delete) => ApiError::db_delete(other.to_string()),
        }
    })
}

async fn path_params(parts: &mut Parts, state: &AppState) -> PathParams {
    Path::<PathParams>::from_request_parts(parts, state)
        .await
        .map(|Path(params)| params)
        .unwrap_or_default()
}

/// Request split into the pieces the wrappers resolve from
struct Incoming {
    state: AppState,
    parts: Parts,
    params: PathParams,
    body: std::sync::Mutex<Body>,
}

impl Incoming {
    async fn new(state: AppState, req: Request) -> Self {
        let (mut parts, body) = req.into_parts();
        let params = path_params(&mut parts, &state).await;
        Self {
            state,
            parts,
            params,
            body: std::sync::Mutex::new(body),
        }
    }

    /// Canonical owner and resource name from the path
    async fn name_owner(&self, name_key: &str, not_found: &'static str) -> Result<(String, String), ApiError> {
        let owner = match read_owner(&self.params, OWNER_PARAM, self.state.users.as_ref()).await {
            Ok(owner) => owner,
            Err(ParamError::NotInRequest(_)) => return Err(ApiError::not_found(not_found)),
            Err(e) => return Err(e.into()),
        };
        let name = read_name(&self.params, name_key)?;
        Ok((owner, name))
    }

    async fn into_context(self, user: Option<User>) -> Result<RequestContext, ApiError> {
        let tx = begin(&self.state).await?;
        Ok(RequestContext {
            state: self.state,
            parts: self.parts,
            params: self.params,
            user,
            tx,
            body: std::sync::Mutex::new(Some(self.body.into_inner().unwrap_or_else(|e| e.into_inner()))),
        })
    }
}

fn respond(result: Result<Response, ApiError>) -> Response {
    result.unwrap_or_else(IntoResponse::into_response)
}

/// URI as the client sent it, before the router stripped the `/1.0` prefix
fn request_uri(parts: &Parts) -> &Uri {
    parts
        .extensions
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or(&parts.uri)
}

/// JSON array plus `X-Total-Count` / `Link` headers, or page-not-found
fn page_response<T: Serialize>(
    uri: &Uri,
    items: Vec<T>,
    page: PaginationResult,
) -> Result<Response, ApiError> {
    if !page.page_found {
        return Err(ApiError::PageNotFound(format!("Page {} not found", page.page)));
    }
    let mut response = Json(items).into_response();
    page.write_headers(uri, response.headers_mut())?;
    Ok(response)
}

/// List endpoint: pagination, optional identity and list parameters.
pub fn search<T, F, Fut>(
    inner: F,
) -> impl Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    T: Serialize + Send + 'static,
    F: Fn(RequestContext, SearchArgs) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(Vec<T>, PaginationResult), ApiError>> + Send + 'static,
{
    move |State(state): State<AppState>, req: Request| {
        let inner = inner.clone();
        Box::pin(async move {
            respond(
                async move {
                    let incoming = Incoming::new(state, req).await;
                    let pagination =
                        PaginationRequest::from_query(incoming.parts.uri.query(), &incoming.state.config.pagination)?;
                    let user = identify(&incoming.state, &incoming.parts.headers, false).await?;
                    let list =
                        ListParams::read(&incoming.params, incoming.parts.uri.query(), incoming.state.users.as_ref())
                            .await?;

                    let uri = request_uri(&incoming.parts).clone();
                    let ctx = incoming.into_context(user).await?;
                    let (items, page) = inner(ctx, SearchArgs { pagination, list }).await?;
                    page_response(&uri, items, page)
                }
                .await,
            )
        })
    }
}

/// Paginated endpoint without list parameters.
pub fn paginated<T, F, Fut>(
    fail_if_no_user: bool,
    inner: F,
) -> impl Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    T: Serialize + Send + 'static,
    F: Fn(RequestContext, PaginationRequest) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(Vec<T>, PaginationResult), ApiError>> + Send + 'static,
{
    move |State(state): State<AppState>, req: Request| {
        let inner = inner.clone();
        Box::pin(async move {
            respond(
                async move {
                    let incoming = Incoming::new(state, req).await;
                    let pagination =
                        PaginationRequest::from_query(incoming.parts.uri.query(), &incoming.state.config.pagination)?;
                    let user = identify(&incoming.state, &incoming.parts.headers, fail_if_no_user).await?;

                    let uri = request_uri(&incoming.parts).clone();
                    let ctx = incoming.into_context(user).await?;
                    let (items, page) = inner(ctx, pagination).await?;
                    page_response(&uri, items, page)
                }
                .await,
            )
        })
    }
}

/// Endpoint addressing `/:username/<kind>/:name_key`.
///
/// A missing owner parameter is reported with `not_found`, the message of
/// the resource kind the route serves.
pub fn name_owner<R, F, Fut>(
    name_key: &'static str,
    fail_if_no_user: bool,
    not_found: &'static str,
    inner: F,
) -> impl Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    R: IntoResponse + 'static,
    F: Fn(RequestContext, String, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
{
    move |State(state): State<AppState>, req: Request| {
        let inner = inner.clone();
        Box::pin(async move {
            respond(
                async move {
                    let incoming = Incoming::new(state, req).await;
                    let user = identify(&incoming.state, &incoming.parts.headers, fail_if_no_user).await?;
                    let (owner, name) = incoming.name_owner(name_key, not_found).await?;

                    let ctx = incoming.into_context(user).await?;
                    inner(ctx, owner, name).await.map(IntoResponse::into_response)
                }
                .await,
            )
        })
    }
}

/// Paginated listing under `/:username/<kind>/:name_key`.
pub fn name_owner_paged<T, F, Fut>(
    name_key: &'static str,
    not_found: &'static str,
    inner: F,
) -> impl Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    T: Serialize + Send + 'static,
    F: Fn(RequestContext, PaginationRequest, String, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(Vec<T>, PaginationResult), ApiError>> + Send + 'static,
{
    move |State(state): State<AppState>, req: Request| {
        let inner = inner.clone();
        Box::pin(async move {
            respond(
                async move {
                    let incoming = Incoming::new(state, req).await;
                    let pagination =
                        PaginationRequest::from_query(incoming.parts.uri.query(), &incoming.state.config.pagination)?;
                    let user = identify(&incoming.state, &incoming.parts.headers, false).await?;
                    let (owner, name) = incoming.name_owner(name_key, not_found).await?;

                    let uri = request_uri(&incoming.parts).clone();
                    let ctx = incoming.into_context(user).await?;
                    let (items, page) = inner(ctx, pagination, owner, name).await?;
                    page_response(&uri, items, page)
                }
                .await,
            )
        })
    }
}

/// Endpoint addressing a single named resource without an owner segment.
pub fn name<R, F, Fut>(
    name_key: &'static str,
    fail_if_no_user: bool,
    inner: F,
) -> impl Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    R: IntoResponse + 'static,
    F: Fn(RequestContext, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
{
    move |State(state): State<AppState>, req: Request| {
        let inner = inner.clone();
        Box::pin(async move {
            respond(
                async move {
                    let incoming = Incoming::new(state, req).await;
                    let user = identify(&incoming.state, &incoming.parts.headers, fail_if_no_user).await?;
                    let name = read_name(&incoming.params, name_key)?;

                    let ctx = incoming.into_context(user).await?;
                    inner(ctx, name).await.map(IntoResponse::into_response)
                }
                .await,
            )
        })
    }
}

/// Endpoint that resolves identity and parameters on its own.
pub fn plain<R, F, Fut>(
    inner: F,
) -> impl Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    R: IntoResponse + 'static,
    F: Fn(RequestContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
{
    move |State(state): State<AppState>, req: Request| {
        let inner = inner.clone();
        Box::pin(async move {
            respond(
                async move {
                    let ctx = Incoming::new(state, req).await.into_context(None).await?;
                    inner(ctx).await.map(IntoResponse::into_response)
                }
                .await,
            )
        })
    }
}

/// Discard a successful handler's body: 200, empty, JSON content type.
/// Error responses pass through untouched.
pub fn no_result<H>(
    handler: H,
) -> impl Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    H: Fn(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static,
{
    move |state: State<AppState>, req: Request| {
        let handler = handler.clone();
        Box::pin(async move {
            let response = handler(state, req).await;
            if !response.status().is_success() {
                return response;
            }
            empty_json()
        })
    }
}

fn empty_json() -> Response {
    let mut response = (StatusCode::OK, Body::empty()).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_jwt, Claims};
    use crate::config::AppConfig;
    use crate::database::{Database, MemoryDatabase};
    use crate::middleware::pagination::paginate;
    use crate::services::MemoryBackend;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    struct Fixture {
        state: AppState,
        db: MemoryDatabase,
        backend: MemoryBackend,
    }

    fn fixture() -> Fixture {
        let config = AppConfig::development();
        let backend = MemoryBackend::new(&config.storage, &config.competition);
        let db = MemoryDatabase::new();
        let state = AppState::in_memory(config, db.clone(), backend.clone()).unwrap();
        Fixture { state, db, backend }
    }

    fn bearer(state: &AppState, sub: &str) -> String {
        let jwt = generate_jwt(&Claims::new(sub, 1), &state.config.security.jwt_secret).unwrap();
        format!("Bearer {}", jwt)
    }

    async fn numbers(_ctx: RequestContext, args: SearchArgs) -> Result<(Vec<u32>, PaginationResult), ApiError> {
        Ok(paginate((1..=25).collect(), &args.pagination))
    }

    async fn whoami(ctx: RequestContext, owner: String, name: String) -> Result<String, ApiError> {
        let who = ctx.user.as_ref().map(|u| u.username.clone()).unwrap_or_default();
        Ok(format!("{}/{}/{}", owner, name, who))
    }

    #[tokio::test]
    async fn search_writes_pagination_headers() {
        let f = fixture();
        let app = Router::new().route("/numbers", get(search(numbers))).with_state(f.state);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/numbers?page=2&per_page=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-total-count"], "25");
        let link = response.headers()["link"].to_str().unwrap();
        assert!(link.contains("rel=\"next\""));
        assert!(link.contains("rel=\"prev\""));
    }

    #[tokio::test]
    async fn missing_page_and_bad_pagination_skip_the_transaction() {
        let f = fixture();
        let app = Router::new().route("/numbers", get(search(numbers))).with_state(f.state);

        let response = app
            .clone()
            .oneshot(HttpRequest::builder().uri("/numbers?page=0").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(f.db.begun(), 0);

        let response = app
            .oneshot(HttpRequest::builder().uri("/numbers?page=9").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(f.db.begun(), 1);
    }

    #[tokio::test]
    async fn fail_if_no_user_boundary() {
        let f = fixture();
        f.backend.add_user("alice", "auth0|alice").await;
        let app = Router::new()
            .route("/open/:username/models/:model", get(name_owner("model", false, "Model not found", whoami)))
            .route("/closed/:username/models/:model", get(name_owner("model", true, "Model not found", whoami)))
            .with_state(f.state.clone());

        let anonymous = app
            .clone()
            .oneshot(HttpRequest::builder().uri("/open/alice/models/rover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::OK);

        let rejected = app
            .clone()
            .oneshot(HttpRequest::builder().uri("/closed/alice/models/rover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let unknown_user = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/open/alice/models/rover")
                    .header("authorization", bearer(&f.state, "auth0|ghost"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unknown_user.status(), StatusCode::OK);

        let accepted = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/closed/alice/models/rover")
                    .header("authorization", bearer(&f.state, "auth0|alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);
        let body = axum::body::to_bytes(accepted.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"alice/rover/alice");
    }

    async fn owned_numbers(
        _ctx: RequestContext,
        pagination: PaginationRequest,
        owner: String,
        name: String,
    ) -> Result<(Vec<String>, PaginationResult), ApiError> {
        let items = (1..=5).map(|i| format!("{}/{}/{}", owner, name, i)).collect();
        Ok(paginate(items, &pagination))
    }

    #[tokio::test]
    async fn paged_owner_listing_checks_pagination_first() {
        let f = fixture();
        f.backend.add_user("alice", "auth0|alice").await;
        let app = Router::new()
            .route(
                "/:username/collections/:collection/models",
                get(name_owner_paged("collection", "Collection not found", owned_numbers)),
            )
            .with_state(f.state);

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/alice/collections/garage/models?per_page=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(f.db.begun(), 0);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/alice/collections/garage/models?per_page=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-total-count"], "5");
        assert_eq!(f.db.begun(), 1);
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let f = fixture();
        let app = Router::new()
            .route("/:username/models/:model", get(name_owner("model", false, "Model not found", whoami)))
            .with_state(f.state);

        let response = app
            .oneshot(HttpRequest::builder().uri("/nobody/models/rover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(f.db.begun(), 0);
    }

    #[tokio::test]
    async fn no_result_empties_success_only() {
        let f = fixture();
        f.backend.add_user("alice", "auth0|alice").await;
        let app = Router::new()
            .route(
                "/:username/models/:model",
                get(no_result(name_owner("model", true, "Model not found", whoami))),
            )
            .with_state(f.state.clone());

        let ok = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/alice/models/rover")
                    .header("authorization", bearer(&f.state, "auth0|alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()["content-type"], "application/json");
        let body = axum::body::to_bytes(ok.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());

        let failed = app
            .oneshot(HttpRequest::builder().uri("/alice/models/rover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(failed.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(failed.into_body(), 1024).await.unwrap();
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn commit_failures_map_by_kind() {
        let f = fixture();
        f.db.fail_commits(true);
        let tx = f.db.begin().await.unwrap();
        assert_eq!(commit(tx, CommitKind::Save).await.unwrap_err().error_code(), "DB_SAVE");
        let tx = f.db.begin().await.unwrap();
        assert_eq!(commit(tx, CommitKind::Delete).await.unwrap_err().error_code(), "DB_DELETE");
    }
}

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        FromRequest, FromRequestParts, Path, Query, Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::connections;
use crate::error::{ErrorKind, LibError};
use crate::models::{
    ConnectionQuery, CreateConnectionPayload, EnsureNodesPayload, FamilyCodePayload,
    FamilyTreeQuery, NodeQuery, RegisterMemberPayload, RemoveMemberQuery, SaveLayoutPayload, SearchNodesQuery,
    TransferRootPayload, UpdateConnectionPayload, UserId, VerificationPayload,
};
use crate::operations::FamilyTreeOperations;
use crate::permissions::Identity;
use crate::registry;
use crate::store::FamilyStore;
use crate::tree;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind {
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = ?self.0.kind, error = %self.0.source, "family tree request failed");
        } else {
            tracing::debug!(kind = ?self.0.kind, code = self.0.code, error = %self.0.source, "family tree request rejected");
        }
        let body = json!({
            "success": false,
            "error": self.0.public,
            "code": self.0.code,
        });
        (status, Json(body)).into_response()
    }
}

/// Success envelope shared by every route.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

pub trait HasStore {
    fn store(&self) -> Arc<dyn FamilyStore>;
}

/// Turns request headers into a trusted caller identity. Session handling
/// lives with the embedding application.
pub trait ResolvesIdentity {
    fn resolve_identity(
        &self,
        parts: &Parts,
    ) -> impl Future<Output = crate::error::Result<Identity>> + Send;
}

pub trait FamilyTreeApp: HasStore + ResolvesIdentity {
    fn operations(&self) -> FamilyTreeOperations {
        FamilyTreeOperations::new(self.store())
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: FamilyTreeApp + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(state.resolve_identity(parts).await?)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self(LibError::invalid_with_code(
            "invalid_body",
            rejection.body_text(),
            anyhow!("json body rejected with {}", rejection.status()),
        ))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self(LibError::invalid_with_code(
            "invalid_query",
            rejection.body_text(),
            anyhow!("query string rejected with {}", rejection.status()),
        ))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self(LibError::invalid_with_code(
            "invalid_path",
            rejection.body_text(),
            anyhow!("path parameters rejected with {}", rejection.status()),
        ))
    }
}

/// `Json` whose rejections use the error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// `Query` whose rejections use the error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// `Path` whose rejections use the error envelope.
#[derive(Debug, Clone, Copy)]
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Parses a JSON body that callers may leave empty.
fn optional_body<T>(body: &[u8]) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        AppError(LibError::invalid_with_code(
            "invalid_body",
            format!("Failed to parse the request body as JSON: {}", err),
            anyhow!(err),
        ))
    })
}

async fn get_tree_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiQuery(query): ApiQuery<FamilyTreeQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let view = tree::get_family_tree(app.store().as_ref(), &identity, query.family_code).await?;
    Ok(ok(view))
}

async fn save_layout_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiJson(payload): ApiJson<SaveLayoutPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let saved = tree::save_layout(app.store().as_ref(), &identity, payload).await?;
    Ok(ok(json!({ "saved": saved })))
}

async fn delete_node_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiQuery(query): ApiQuery<NodeQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let removal =
        connections::delete_node_with_connections(app.store().as_ref(), &identity, query.node_id)
            .await?;
    Ok(ok(removal))
}

async fn search_nodes_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiQuery(query): ApiQuery<SearchNodesQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let hits = tree::search_nodes(app.store().as_ref(), &identity, query).await?;
    Ok(ok(hits))
}

async fn create_connection_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiJson(payload): ApiJson<CreateConnectionPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let connection =
        connections::create_connection(app.store().as_ref(), &identity, payload).await?;
    Ok((StatusCode::CREATED, ok(connection)))
}

async fn update_connection_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiJson(payload): ApiJson<UpdateConnectionPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let connection =
        connections::update_connection(app.store().as_ref(), &identity, payload).await?;
    Ok(ok(connection))
}

async fn delete_connection_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiQuery(query): ApiQuery<ConnectionQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    connections::delete_connection(app.store().as_ref(), &identity, query.connection_id).await?;
    Ok(ok(json!({ "connectionId": query.connection_id })))
}

/// The family comes from the `{familyCode}` body, then the query string,
/// then the caller's own family.
async fn ensure_nodes_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiQuery(query): ApiQuery<FamilyTreeQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let payload: EnsureNodesPayload = optional_body(&body)?;
    let outcome = app
        .operations()
        .ensure_nodes(&identity, payload.family_code.or(query.family_code))
        .await?;
    Ok(ok(outcome))
}

async fn audit_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiQuery(query): ApiQuery<FamilyCodePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let violations = tree::audit_family(app.store().as_ref(), &identity, &query.family_code).await?;
    let issues: Vec<_> = violations
        .iter()
        .map(|violation| {
            json!({
                "code": violation.error_code(),
                "message": violation.public_message(),
                "repairable": violation.is_repairable(),
                "detail": violation,
            })
        })
        .collect();
    Ok(ok(json!({
        "familyCode": query.family_code,
        "consistent": issues.is_empty(),
        "violations": issues,
    })))
}

async fn register_member_handler<S>(
    State(app): State<S>,
    ApiJson(payload): ApiJson<RegisterMemberPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let registered = registry::register_member(app.store().as_ref(), payload).await?;
    Ok((StatusCode::CREATED, ok(registered)))
}

async fn leave_family_handler<S>(
    State(app): State<S>,
    identity: Identity,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let removal = registry::leave_family(app.store().as_ref(), &identity).await?;
    Ok(ok(removal))
}

async fn remove_member_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiQuery(query): ApiQuery<RemoveMemberQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let removal = registry::remove_member(
        app.store().as_ref(),
        &identity,
        &query.family_code,
        query.user_id,
    )
    .await?;
    Ok(ok(removal))
}

async fn member_snapshot_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiQuery(query): ApiQuery<FamilyCodePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let snapshot =
        tree::get_member_snapshot(app.store().as_ref(), &identity, &query.family_code).await?;
    Ok(ok(snapshot))
}

async fn transfer_root_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiJson(payload): ApiJson<TransferRootPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let family = registry::transfer_root(
        app.store().as_ref(),
        &identity,
        &payload.family_code,
        payload.new_root_user_id,
    )
    .await?;
    Ok(ok(family))
}

async fn verification_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiPath(user_id): ApiPath<UserId>,
    ApiJson(payload): ApiJson<VerificationPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    let user =
        registry::set_verification_status(app.store().as_ref(), &identity, user_id, payload.status)
            .await?;
    Ok(ok(user))
}

pub fn routes<S>() -> Router<S>
where
    S: FamilyTreeApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /family-tree [GET]");
    tracing::info!("Registering route /family-tree/nodes [POST,DELETE]");
    tracing::info!("Registering route /family-tree/nodes/search [GET]");
    tracing::info!("Registering route /family-tree/connections [POST,PUT,DELETE]");
    tracing::info!("Registering route /family-tree/ensure-nodes [POST]");
    tracing::info!("Registering route /family-tree/audit [GET]");
    tracing::info!("Registering route /members/register [POST]");
    tracing::info!("Registering route /family/leave [POST]");
    tracing::info!("Registering route /family/members [GET,DELETE]");
    tracing::info!("Registering route /family/root [POST]");
    tracing::info!("Registering route /admin/users/{{user_id}}/verification [POST]");

    Router::new()
        .route("/family-tree", get(get_tree_handler::<S>))
        .route(
            "/family-tree/nodes",
            post(save_layout_handler::<S>).delete(delete_node_handler::<S>),
        )
        .route("/family-tree/nodes/search", get(search_nodes_handler::<S>))
        .route(
            "/family-tree/connections",
            post(create_connection_handler::<S>)
                .put(update_connection_handler::<S>)
                .delete(delete_connection_handler::<S>),
        )
        .route("/family-tree/ensure-nodes", post(ensure_nodes_handler::<S>))
        .route("/family-tree/audit", get(audit_handler::<S>))
        .route("/members/register", post(register_member_handler::<S>))
        .route("/family/leave", post(leave_family_handler::<S>))
        .route(
            "/family/members",
            get(member_snapshot_handler::<S>).delete(remove_member_handler::<S>),
        )
        .route("/family/root", post(transfer_root_handler::<S>))
        .route(
            "/admin/users/{user_id}/verification",
            post(verification_handler::<S>),
        )
}

use std::{convert::Infallible, time::Duration};

use axum::{
	Json, Router,
	body::Bytes,
	extract::{
		DefaultBodyLimit, FromRequestParts, Path, Query, Request, State,
		rejection::{BytesRejection, JsonRejection, PathRejection, QueryRejection},
	},
	http::{HeaderMap, StatusCode, header, request::Parts},
	middleware::{self, Next},
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing::{delete, get, post},
};
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use benefits_domain::{access::UserContext, pricing::UsageStats, router::RouteDecision};
use benefits_service::{
	AnalyticsSummary, AuditEntryView, BenefitPlanView, ChatEvent, ChatRequest, ChatResponse,
	ClassifyRequest, ConversationView, DocumentAction, DocumentView, MessageView, RebuildReport,
	UploadRequest, UploadResponse,
};

pub const HEADER_USER_ID: &str = "x-benefits-user-id";
pub const HEADER_COMPANY_ID: &str = "x-benefits-company-id";

const SSE_KEEP_ALIVE_SECONDS: u64 = 15;

pub fn router(state: AppState) -> Router {
	let upload_limit =
		usize::try_from(state.service.cfg.ingestion.max_document_bytes).unwrap_or(usize::MAX);

	Router::new()
		.route("/v1/chat", post(chat))
		.route("/v1/chat/stream", post(chat_stream))
		.route("/v1/conversations", get(list_conversations))
		.route("/v1/conversations/{conversation_id}", delete(delete_conversation))
		.route("/v1/conversations/{conversation_id}/messages", get(conversation_messages))
		.route(
			"/v1/documents",
			get(list_documents).post(upload_document).layer(DefaultBodyLimit::max(upload_limit)),
		)
		.route("/v1/documents/{document_id}", get(get_document).delete(delete_document))
		.route("/v1/documents/{document_id}/reindex", post(reindex_document))
		.route("/v1/benefit-plans", get(benefit_plans))
		.route("/v1/analytics/summary", get(analytics_summary))
		.route("/v1/audit", get(audit_log))
		.route_layer(middleware::from_fn_with_state(state.clone(), api_auth))
		.route("/health", get(health))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/router/stats", get(router_stats))
		.route("/v1/admin/router/classify", post(classify))
		.route("/v1/admin/index/rebuild", post(rebuild_index))
		.route_layer(middleware::from_fn_with_state(state.clone(), admin_auth))
		.with_state(state)
}

/// The caller named by the identity headers, resolved against the user table.
pub struct Identity {
	pub user: UserContext,
	/// Explicit company scope; only platform admins may name a company other than their own.
	pub company_id: Option<Uuid>,
}
impl FromRequestParts<AppState> for Identity {
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
		let user_id = read_user_id(&parts.headers)?;
		let company_id = read_company_id(&parts.headers)?;
		let user = state.service.resolve_user(user_id).await?;

		Ok(Self { user, company_id })
	}
}

#[derive(Debug, Deserialize)]
struct UploadParams {
	file_name: Option<String>,
	title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
	days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AuditParams {
	limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct HealthBody {
	status: &'static str,
}

async fn health() -> Json<HealthBody> {
	Json(HealthBody { status: "ok" })
}

async fn chat(
	State(state): State<AppState>,
	identity: Identity,
	payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
	let request = json_body(payload)?;
	let response = state.service.complete_chat(&identity.user, request).await?;

	Ok(Json(response))
}

async fn chat_stream(
	State(state): State<AppState>,
	identity: Identity,
	payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
	let request = json_body(payload)?;
	let rx = state.service.stream_chat(&identity.user, request).await?;
	let events = stream::unfold(rx, |mut rx| async move {
		let event = rx.recv().await?;

		Some((Ok::<_, Infallible>(sse_event(&event)), rx))
	});

	Ok(Sse::new(events)
		.keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECONDS))))
}

async fn list_conversations(
	State(state): State<AppState>,
	identity: Identity,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
	Ok(Json(state.service.list_conversations(&identity.user).await?))
}

async fn conversation_messages(
	State(state): State<AppState>,
	conversation_id: Result<Path<Uuid>, PathRejection>,
	identity: Identity,
) -> Result<Json<Vec<MessageView>>, ApiError> {
	let conversation_id = path_id(conversation_id, "conversation_id")?;
	let messages = state.service.conversation_messages(&identity.user, conversation_id).await?;

	Ok(Json(messages))
}

async fn delete_conversation(
	State(state): State<AppState>,
	conversation_id: Result<Path<Uuid>, PathRejection>,
	identity: Identity,
) -> Result<StatusCode, ApiError> {
	let conversation_id = path_id(conversation_id, "conversation_id")?;

	state.service.delete_conversation(&identity.user, conversation_id).await?;

	Ok(StatusCode::NO_CONTENT)
}

async fn upload_document(
	State(state): State<AppState>,
	identity: Identity,
	headers: HeaderMap,
	params: Result<Query<UploadParams>, QueryRejection>,
	body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
	let Query(params) = params.map_err(|err| ApiError::invalid(err.body_text(), None))?;
	let file_name = params.file_name.filter(|name| !name.trim().is_empty()).ok_or_else(|| {
		ApiError::invalid("file_name query parameter is required.", Some(vec!["file_name"]))
	})?;
	let bytes = body.map_err(|err| {
		if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
			ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", err.body_text(), None)
		} else {
			ApiError::invalid(err.body_text(), None)
		}
	})?;
	let content_type = headers
		.get(header::CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
	let request = UploadRequest {
		company_id: identity.company_id,
		title: params.title,
		file_name,
		content_type,
		bytes: bytes.to_vec(),
	};
	let response = state.service.upload_document(&identity.user, request).await?;
	let status = if response.duplicate { StatusCode::OK } else { StatusCode::CREATED };

	Ok((status, Json(response)))
}

async fn list_documents(
	State(state): State<AppState>,
	identity: Identity,
) -> Result<Json<Vec<DocumentView>>, ApiError> {
	Ok(Json(state.service.list_documents(&identity.user, identity.company_id).await?))
}

async fn get_document(
	State(state): State<AppState>,
	document_id: Result<Path<Uuid>, PathRejection>,
	identity: Identity,
) -> Result<Json<DocumentView>, ApiError> {
	let document_id = path_id(document_id, "document_id")?;
	let document =
		state.service.get_document(&identity.user, identity.company_id, document_id).await?;

	Ok(Json(document))
}

async fn delete_document(
	State(state): State<AppState>,
	document_id: Result<Path<Uuid>, PathRejection>,
	identity: Identity,
) -> Result<Json<DocumentAction>, ApiError> {
	let document_id = path_id(document_id, "document_id")?;
	let action =
		state.service.delete_document(&identity.user, identity.company_id, document_id).await?;

	Ok(Json(action))
}

async fn reindex_document(
	State(state): State<AppState>,
	document_id: Result<Path<Uuid>, PathRejection>,
	identity: Identity,
) -> Result<(StatusCode, Json<DocumentAction>), ApiError> {
	let document_id = path_id(document_id, "document_id")?;
	let action =
		state.service.reindex_document(&identity.user, identity.company_id, document_id).await?;

	Ok((StatusCode::ACCEPTED, Json(action)))
}

async fn benefit_plans(
	State(state): State<AppState>,
	identity: Identity,
) -> Result<Json<Vec<BenefitPlanView>>, ApiError> {
	Ok(Json(state.service.benefit_plans(&identity.user, identity.company_id).await?))
}

async fn analytics_summary(
	State(state): State<AppState>,
	identity: Identity,
	params: Result<Query<SummaryParams>, QueryRejection>,
) -> Result<Json<AnalyticsSummary>, ApiError> {
	let Query(params) =
		params.map_err(|err| ApiError::invalid(err.body_text(), Some(vec!["days"])))?;
	let summary =
		state.service.analytics_summary(&identity.user, identity.company_id, params.days).await?;

	Ok(Json(summary))
}

async fn audit_log(
	State(state): State<AppState>,
	identity: Identity,
	params: Result<Query<AuditParams>, QueryRejection>,
) -> Result<Json<Vec<AuditEntryView>>, ApiError> {
	let Query(params) =
		params.map_err(|err| ApiError::invalid(err.body_text(), Some(vec!["limit"])))?;
	let entries = state.service.audit_log(&identity.user, identity.company_id, params.limit).await?;

	Ok(Json(entries))
}

async fn router_stats(State(state): State<AppState>) -> Json<UsageStats> {
	Json(state.service.usage_stats())
}

async fn classify(
	State(state): State<AppState>,
	payload: Result<Json<ClassifyRequest>, JsonRejection>,
) -> Result<Json<RouteDecision>, ApiError> {
	let request = json_body(payload)?;

	Ok(Json(state.service.classify_query(request).await?))
}

async fn rebuild_index(State(state): State<AppState>) -> Result<Json<RebuildReport>, ApiError> {
	Ok(Json(state.service.rebuild_index().await?))
}

async fn api_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
	let expected = state.service.cfg.security.api_auth_token.as_deref();

	if !is_authorized(req.headers(), expected) {
		return ApiError::unauthenticated("A valid Bearer token is required.").into_response();
	}

	next.run(req).await
}

async fn admin_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
	let expected = state.service.cfg.security.admin_auth_token.as_deref();

	if !is_authorized(req.headers(), expected) {
		return ApiError::unauthenticated("A valid admin Bearer token is required.").into_response();
	}

	next.run(req).await
}

/// With no token configured every request passes.
fn is_authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
	match expected {
		None => true,
		Some(expected) => read_bearer_token(headers).is_some_and(|token| token == expected),
	}
}

fn read_bearer_token(headers: &HeaderMap) -> Option<&str> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
	let token = value.strip_prefix("Bearer ")?.trim();

	if token.is_empty() { None } else { Some(token) }
}

fn read_user_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
	let raw = headers
		.get(HEADER_USER_ID)
		.and_then(|value| value.to_str().ok())
		.map(str::trim)
		.filter(|value| !value.is_empty())
		.ok_or_else(|| ApiError::unauthenticated("X-Benefits-User-Id header is required."))?;

	Uuid::parse_str(raw)
		.map_err(|_| ApiError::unauthenticated("X-Benefits-User-Id header must be a UUID."))
}

fn read_company_id(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
	let Some(value) = headers.get(HEADER_COMPANY_ID) else {
		return Ok(None);
	};
	let parsed = value.to_str().ok().and_then(|raw| Uuid::parse_str(raw.trim()).ok());

	match parsed {
		Some(company_id) => Ok(Some(company_id)),
		None => Err(ApiError::invalid(
			"X-Benefits-Company-Id header must be a UUID.",
			Some(vec!["X-Benefits-Company-Id"]),
		)),
	}
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
	payload.map(|Json(value)| value).map_err(|err| ApiError::invalid(err.body_text(), None))
}

fn path_id(raw: Result<Path<Uuid>, PathRejection>, field: &'static str) -> Result<Uuid, ApiError> {
	raw.map(|Path(id)| id)
		.map_err(|_| ApiError::invalid(format!("{field} must be a UUID."), Some(vec![field])))
}

fn sse_event(event: &ChatEvent) -> Event {
	Event::default().event(event.name()).data(event.data().to_string())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: &'static str,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: &'static str,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: &'static str,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code, message: message.into(), fields }
	}

	fn invalid(message: impl Into<String>, fields: Option<Vec<&str>>) -> Self {
		let fields = fields.map(|fields| fields.into_iter().map(str::to_string).collect());

		Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message, fields)
	}

	fn unauthenticated(message: impl Into<String>) -> Self {
		Self::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message, None)
	}
}
impl From<benefits_service::Error> for ApiError {
	fn from(err: benefits_service::Error) -> Self {
		use benefits_service::Error;

		let (status, error_code, message) = match err {
			Error::InvalidRequest { message } =>
				(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message),
			Error::Unauthenticated { message } =>
				(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message),
			Error::Forbidden { message } => (StatusCode::FORBIDDEN, "FORBIDDEN", message),
			Error::NotFound { message } => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
			Error::Conflict { message } => (StatusCode::CONFLICT, "CONFLICT", message),
			Error::PayloadTooLarge { message } =>
				(StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", message),
			Error::UnsupportedMedia { message } =>
				(StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE", message),
			Error::Provider { message } => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message),
			Error::Storage { message } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", message),
			Error::Qdrant { message } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "QDRANT_ERROR", message),
		};

		if status.is_server_error() {
			tracing::error!(error_code, error = %message, "Request failed.");
		}

		Self::new(status, error_code, message, None)
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use axum::http::HeaderValue;

	use super::*;

	fn headers_with(name: &'static str, value: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();

		headers.insert(name, HeaderValue::from_str(value).expect("valid header"));

		headers
	}

	#[test]
	fn no_configured_token_allows_requests() {
		assert!(is_authorized(&HeaderMap::new(), None));
	}

	#[test]
	fn configured_token_requires_matching_bearer() {
		let ok = headers_with("authorization", "Bearer s3cret");
		let wrong = headers_with("authorization", "Bearer other");
		let scheme = headers_with("authorization", "Basic s3cret");

		assert!(is_authorized(&ok, Some("s3cret")));
		assert!(!is_authorized(&wrong, Some("s3cret")));
		assert!(!is_authorized(&scheme, Some("s3cret")));
		assert!(!is_authorized(&HeaderMap::new(), Some("s3cret")));
	}

	#[test]
	fn user_header_must_be_a_uuid() {
		let id = Uuid::new_v4();

		assert_eq!(read_user_id(&headers_with(HEADER_USER_ID, &id.to_string())).ok(), Some(id));
		assert!(read_user_id(&headers_with(HEADER_USER_ID, "alice")).is_err());
		assert!(read_user_id(&HeaderMap::new()).is_err());
	}

	#[test]
	fn company_header_is_optional() {
		let id = Uuid::new_v4();

		assert_eq!(read_company_id(&HeaderMap::new()).ok(), Some(None));
		assert_eq!(
			read_company_id(&headers_with(HEADER_COMPANY_ID, &id.to_string())).ok(),
			Some(Some(id))
		);
		assert!(read_company_id(&headers_with(HEADER_COMPANY_ID, "acme")).is_err());
	}

	#[test]
	fn service_errors_map_to_status_codes() {
		use benefits_service::Error;

		let cases = [
			(Error::Forbidden { message: String::new() }, StatusCode::FORBIDDEN),
			(Error::PayloadTooLarge { message: String::new() }, StatusCode::PAYLOAD_TOO_LARGE),
			(Error::UnsupportedMedia { message: String::new() }, StatusCode::UNSUPPORTED_MEDIA_TYPE),
			(Error::Provider { message: String::new() }, StatusCode::BAD_GATEWAY),
			(Error::Qdrant { message: String::new() }, StatusCode::INTERNAL_SERVER_ERROR),
		];

		for (err, status) in cases {
			assert_eq!(ApiError::from(err).status, status);
		}
	}
}

//! Route handlers.
//!
//! Detection and chat answer every failure in-band as `{"error": ...}` with
//! status 200; the browser client reads `data.error`. Only session saving
//! rejects bad input with a 422.

use super::AppState;
use crate::detection::DetectionError;
use crate::models::{ChatRequest, SessionRecord};
use crate::observability::{REQUEST_ID_HEADER, RequestContext, scope_request_context};
use crate::Error;
use axum::Json;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Form, FromRequest, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Instrument;

/// Liveness payload for `GET /`.
pub const LIVENESS_MESSAGE: &str = "Backend is running successfully!";

/// Multipart field carrying the image.
pub const UPLOAD_FIELD: &str = "file";

/// Success payload or an in-band error.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InBand<T> {
    /// Operation succeeded.
    Ok(T),
    /// Operation failed; still HTTP 200.
    Error {
        /// Human-readable message.
        error: String,
    },
}

impl<T> InBand<T> {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Form fields for `POST /save_session`, before validation.
#[derive(Debug, Default, Deserialize)]
pub struct SessionForm {
    name: Option<String>,
    emotion: Option<String>,
    stress_score: Option<String>,
}

impl SessionForm {
    fn set(&mut self, field: &str, value: String) {
        match field {
            "name" => self.name = Some(value),
            "emotion" => self.emotion = Some(value),
            "stress_score" => self.stress_score = Some(value),
            _ => {},
        }
    }

    fn into_record(self) -> Result<SessionRecord, String> {
        let name = self.name.ok_or("missing field: name")?;
        let emotion = self.emotion.ok_or("missing field: emotion")?;
        let raw = self.stress_score.ok_or("missing field: stress_score")?;
        let stress_score = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("stress_score must be a number, got '{raw}'"))?;
        Ok(SessionRecord::new(name, emotion, stress_score))
    }
}

/// Scopes a request id over the handler and echoes it back.
pub async fn propagate_request_id(request: Request, next: Next) -> Response {
    let context = RequestContext::from_header(
        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
    );
    let request_id = context.request_id().to_string();
    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    let mut response = scope_request_context(context, next.run(request).instrument(span)).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// `GET /`
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": LIVENESS_MESSAGE }))
}

/// `POST /detect_emotion`
pub async fn detect_emotion(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<InBand<crate::models::DetectionResult>> {
    let image = match read_upload(multipart).await {
        Ok(image) => image,
        Err(err) => {
            tracing::warn!(error = %err, "Could not read upload");
            metrics::counter!("detection_requests_total", "status" => err.kind()).increment(1);
            return Json(InBand::error(err.to_string()));
        },
    };

    match state.detector.detect(image).await {
        Ok(result) => Json(InBand::Ok(result)),
        Err(err) => Json(InBand::error(err.to_string())),
    }
}

/// Reads the image from field `file`, else the first field with a file
/// name, else the first field.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<u8>, DetectionError> {
    let mut multipart = multipart.map_err(|e| DetectionError::UploadRead(e.body_text()))?;
    let mut first_file: Option<Vec<u8>> = None;
    let mut first_any: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectionError::UploadRead(e.body_text()))?
    {
        let is_upload_field = field.name() == Some(UPLOAD_FIELD);
        let has_file_name = field.file_name().is_some();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DetectionError::UploadRead(e.body_text()))?
            .to_vec();

        if is_upload_field {
            return Ok(bytes);
        }
        if has_file_name && first_file.is_none() {
            first_file = Some(bytes.clone());
        }
        if first_any.is_none() {
            first_any = Some(bytes);
        }
    }

    first_file
        .or(first_any)
        .ok_or_else(|| DetectionError::UploadRead("multipart body has no fields".to_string()))
}

/// `POST /save_session`, urlencoded or multipart.
pub async fn save_session(State(state): State<AppState>, request: Request) -> Response {
    let form = match read_session_form(request).await {
        Ok(form) => form,
        Err(message) => return unprocessable(message),
    };

    match form.into_record() {
        Ok(record) => {
            let total = state.sessions.append(record);
            tracing::info!(total_sessions = total, "Session saved");
            Json(json!({ "status": "saved", "total_sessions": total })).into_response()
        },
        Err(message) => unprocessable(message),
    }
}

async fn read_session_form(request: Request) -> Result<SessionForm, String> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        return Form::<SessionForm>::from_request(request, &())
            .await
            .map(|Form(form)| form)
            .map_err(|e| e.body_text());
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| e.body_text())?;
    let mut form = SessionForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field.text().await.map_err(|e| e.body_text())?;
        form.set(&name, value);
    }
    Ok(form)
}

fn unprocessable(message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::warn!(error = %message, "Rejected session form");
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// `GET /get_sessions`
pub async fn get_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "sessions": state.sessions.list() }))
}

/// `POST /chat`
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Json<InBand<crate::models::ChatReply>> {
    tracing::info!("Received chat request");
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "Malformed chat request");
            return Json(InBand::error(rejection.body_text()));
        },
    };

    match state.responder.respond(&request) {
        Ok(reply) => Json(InBand::Ok(reply)),
        Err(Error::InvalidInput(message)) => Json(InBand::error(message)),
        Err(other) => {
            tracing::error!(error = %other, "Chat failed");
            Json(InBand::error(other.to_string()))
        },
    }
}

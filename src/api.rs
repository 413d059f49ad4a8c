//! REST front end: job submission, status and cancellation.

use axum::extract::{Form, FromRequest, Json as JsonBody, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::engine::JobEngine;
use crate::error::Wf2RoError;
use crate::job::{ExtractFolders, JobRequest, JobStatus};

#[derive(Clone)]
pub struct AppState {
    engine: JobEngine,
    public_base_url: Option<Url>,
}

impl AppState {
    pub fn new(engine: JobEngine, public_base_url: Option<Url>) -> Self {
        Self {
            engine,
            public_base_url,
        }
    }

    fn jobs_uri(&self) -> String {
        self.resolve("jobs")
    }

    fn job_uri(&self, id: Uuid) -> String {
        self.resolve(&format!("jobs/{id}"))
    }

    fn resolve(&self, path: &str) -> String {
        self.public_base_url
            .as_ref()
            .and_then(|base| base.join(path).ok())
            .map(String::from)
            .unwrap_or_else(|| format!("/{path}"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(job_status).delete(delete_job))
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": state.jobs_uri(),
    }))
}

async fn create_job(
    State(state): State<AppState>,
    form: JobForm,
) -> Result<impl IntoResponse, ApiError> {
    let request = form.into_request()?;
    let id = state.engine.submit(request)?;
    let location = state.job_uri(id);
    let status: Option<JobStatus> = state.engine.status(id).ok();
    Ok((StatusCode::CREATED, [(LOCATION, location)], Json(status)))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.engine.status(id)?))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_job_id(&id)?;
    state.engine.cancel(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// A malformed id can't name a job, so it is reported like an unknown one.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(raw.to_string()))
}

#[derive(Debug, Default, Deserialize)]
struct ExtractFields {
    main: Option<String>,
    nested: Option<String>,
    scripts: Option<String>,
    services: Option<String>,
}

/// Job submission fields, accepted as JSON, URL-encoded form or multipart.
/// JSON carries the folders in a nested `extract` object, forms carry them
/// as `extract_<category>` fields.
#[derive(Debug, Default, Deserialize)]
pub struct JobForm {
    resource: Option<String>,
    format: Option<String>,
    ro: Option<String>,
    token: Option<String>,
    #[serde(default)]
    extract: Option<ExtractFields>,
    extract_main: Option<String>,
    extract_nested: Option<String>,
    extract_scripts: Option<String>,
    extract_services: Option<String>,
}

impl JobForm {
    fn set(&mut self, name: &str, value: String) {
        let slot = match name {
            "resource" => &mut self.resource,
            "format" => &mut self.format,
            "ro" => &mut self.ro,
            "token" => &mut self.token,
            "extract_main" => &mut self.extract_main,
            "extract_nested" => &mut self.extract_nested,
            "extract_scripts" => &mut self.extract_scripts,
            "extract_services" => &mut self.extract_services,
            other => {
                debug!(field = other, "ignoring unknown job field");
                return;
            }
        };
        *slot = Some(value);
    }

    pub fn into_request(self) -> Result<JobRequest, Wf2RoError> {
        let nested = self.extract.unwrap_or_default();
        let extract = ExtractFolders {
            main: optional_uri(self.extract_main.or(nested.main))?,
            nested: optional_uri(self.extract_nested.or(nested.nested))?,
            scripts: optional_uri(self.extract_scripts.or(nested.scripts))?,
            services: optional_uri(self.extract_services.or(nested.services))?,
        };
        Ok(JobRequest {
            resource: parse_uri(required(self.resource, "resource")?)?,
            format: required(self.format, "format")?,
            ro: parse_uri(required(self.ro, "ro")?)?,
            token: required(self.token, "token")?,
            extract,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, Wf2RoError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(Wf2RoError::MissingField(field))
}

fn parse_uri(value: String) -> Result<Url, Wf2RoError> {
    Url::parse(&value).map_err(|err| Wf2RoError::invalid_uri(value, err))
}

fn optional_uri(value: Option<String>) -> Result<Option<Url>, Wf2RoError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(parse_uri)
        .transpose()
}

impl<S> FromRequest<S> for JobForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let JsonBody(form) = JsonBody::<JobForm>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
            Ok(form)
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(form) = Form::<JobForm>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
            Ok(form)
        } else if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
            let mut form = JobForm::default();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|err| ApiError::BadRequest(err.body_text()))?
            {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(err.body_text()))?;
                form.set(&name, value);
            }
            Ok(form)
        } else {
            Err(ApiError::BadRequest(format!(
                "unsupported content type {content_type:?}"
            )))
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Service(Wf2RoError),
}

impl From<Wf2RoError> for ApiError {
    fn from(err: Wf2RoError) -> Self {
        ApiError::Service(err)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Service(err) => match err {
                Wf2RoError::MissingField(_) | Wf2RoError::InvalidUri { .. } => {
                    StatusCode::BAD_REQUEST
                }
                Wf2RoError::JobNotFound(_) => StatusCode::NOT_FOUND,
                Wf2RoError::JobCancelled(_) => StatusCode::GONE,
                Wf2RoError::ServiceBusy { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::NotFound(id) => format!("job not found: {id}"),
            ApiError::Service(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#![allow(
    unused_crate_dependencies,
    reason = "Package shares dependencies across lib/bin/test targets; some are bin-only."
)]

use std::{error::Error as StdError, sync::Arc};

// Ensure package-level unused dependency lint stays satisfied when building the library target.
#[allow(
    unused_imports,
    reason = "Binary-only dependencies are declared at package level."
)]
use anyhow as _;
#[allow(
    unused_imports,
    reason = "Binary-only dependencies are declared at package level."
)]
use dotenvy as _;
#[allow(
    unused_imports,
    reason = "Binary-only dependencies are declared at package level."
)]
use tracing_subscriber as _;

use placeholder_image::{DEFAULT_PROMPT, PlaceholderRenderer, RenderError};
use poem::{
    Endpoint, EndpointExt, IntoResponse, Response, Route,
    endpoint::make_sync,
    error::{ResponseError, SizedLimitError},
    get,
    http::StatusCode,
    middleware::{SizeLimit, Tracing},
    web::Json as PoemJson,
};
use poem_openapi::{
    Object, OpenApi, OpenApiService,
    error::{ContentTypeError, ParseRequestPayloadError},
    payload::Json as OpenApiJson,
    types::{Any, MaybeUndefined},
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task;
use tracing::{debug, error};

pub const HEALTHY_STATUS: &str = "healthy";
/// The only error text clients ever see.
pub const FAILURE_MESSAGE: &str = "Failed to process request";

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub renderer: Arc<PlaceholderRenderer>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub state: AppState,
    /// Request body cap in bytes; bodies are unbounded when unset.
    pub max_body_size: Option<usize>,
    pub server_base_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state: AppState::default(),
            max_body_size: None,
            server_base_url: None,
        }
    }
}

#[must_use]
pub fn create_app(config: &AppConfig) -> impl Endpoint<Output = Response> + use<> {
    let config = config.clone();
    let api = Txt2ImgApi::new(config.state.clone());
    let mut api_service =
        OpenApiService::new(api, "Placeholder Image API", env!("CARGO_PKG_VERSION"));
    if let Some(server) = &config.server_base_url {
        api_service = api_service.server(server.clone());
    }

    let swagger = api_service.swagger_ui();
    let spec = api_service.spec_endpoint();
    let spec_alias = api_service.spec_endpoint();
    let api = match config.max_body_size {
        Some(limit) => api_service.with(SizeLimit::new(limit)).boxed(),
        None => api_service.boxed(),
    };
    let api = api
        .catch_error(|err: ParseRequestPayloadError| async move { reject_request(&err) })
        .catch_error(|err: ContentTypeError| async move { reject_request(&err) })
        .catch_error(|err: SizedLimitError| async move { reject_request(&err) });

    Route::new()
        .at("/health", get(make_sync(|_| PoemJson(HealthResponse::healthy()))))
        .nest("/", api)
        .nest("/swagger", swagger)
        .nest("/spec", spec)
        .nest("/api/spec", spec_alias)
        .with(Tracing)
}

#[derive(Debug, Clone)]
struct Txt2ImgApi {
    state: AppState,
}

impl Txt2ImgApi {
    fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl Txt2ImgApi {
    /// Stand-in for AUTOMATIC1111's txt2img: draws the prompt onto a placeholder PNG.
    #[oai(path = "/sdapi/v1/txt2img", method = "post")]
    async fn txt2img(
        &self,
        req: OpenApiJson<Txt2ImgRequest>,
    ) -> ApiResult<OpenApiJson<Txt2ImgResponse>> {
        let prompt = prompt_text(req.0.prompt).inspect_err(|err| {
            error!(%err, "error reading txt2img request");
        })?;
        debug!(%prompt, "rendering placeholder");

        let renderer = Arc::clone(&self.state.renderer);
        let image = task::spawn_blocking(move || renderer.render_base64(&prompt))
            .await
            .map_err(|err| {
                error!(%err, "render task join error");
                ApiError::task("render task failed")
            })?
            .map_err(|err| {
                error!(error = ?err, "error generating placeholder image");
                ApiError::from(err)
            })?;

        Ok(OpenApiJson(Txt2ImgResponse {
            images: vec![image],
            parameters: Any(Value::Object(Map::new())),
            info: String::new(),
        }))
    }
}

/// txt2img request body. Only `prompt` is read; every other
/// AUTOMATIC1111 field (`seed`, `steps`, `sampler_name`, ...) is ignored.
#[derive(Object, Debug)]
pub struct Txt2ImgRequest {
    /// Text drawn onto the placeholder; must be a string. Defaults to
    /// "No prompt provided" when the field is left out.
    pub prompt: MaybeUndefined<Any<Value>>,
}

/// Only an absent prompt falls back to the default; `null` and non-string
/// values are rejected instead of being stringified.
fn prompt_text(prompt: MaybeUndefined<Any<Value>>) -> Result<String, ApiError> {
    match prompt {
        MaybeUndefined::Undefined => Ok(DEFAULT_PROMPT.to_owned()),
        MaybeUndefined::Value(Any(Value::String(text))) => Ok(text),
        MaybeUndefined::Null | MaybeUndefined::Value(Any(Value::Null)) => {
            Err(ApiError::Request("prompt must be a string, got null".to_owned()))
        }
        MaybeUndefined::Value(Any(other)) => Err(ApiError::Request(format!(
            "prompt must be a string, got {other}"
        ))),
    }
}

#[derive(Object, Debug)]
pub struct Txt2ImgResponse {
    /// Exactly one base64-encoded PNG.
    pub images: Vec<String>,
    /// Always an empty object.
    pub parameters: Any<Value>,
    /// Always empty.
    pub info: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

impl HealthResponse {
    fn healthy() -> Self {
        Self {
            status: HEALTHY_STATUS,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid txt2img request: {0}")]
    Request(String),
    #[error("rendering failed")]
    Render(#[from] RenderError),
    #[error("render task failed: {0}")]
    Task(String),
}

pub type ApiResult<T> = poem::Result<T>;

impl ApiError {
    fn task(message: impl Into<String>) -> Self {
        Self::Task(message.into())
    }
}

impl ResponseError for ApiError {
    // No distinction between error kinds is made towards the client.
    fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn as_response(&self) -> Response {
        let payload = PoemJson(ErrorBody {
            error: FAILURE_MESSAGE,
        });
        let mut response = payload.into_response();
        response.set_status(self.status());
        response
    }
}

fn reject_request(err: &dyn StdError) -> Response {
    error!(%err, "error reading txt2img request");
    ApiError::Request(err.to_string()).as_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_api_error_is_a_500() {
        let errors = [
            ApiError::Request("bad json".to_owned()),
            ApiError::task("join"),
            ApiError::Render(RenderError::CanvasSize {
                width: 1,
                height: 1,
            }),
        ];
        for err in &errors {
            let response = err.as_response();
            assert_eq!(
                response.status(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "{err} should map to 500"
            );
        }
    }

    #[test]
    fn absent_prompt_uses_default_text() {
        let prompt = prompt_text(MaybeUndefined::Undefined).ok();
        assert_eq!(prompt.as_deref(), Some(DEFAULT_PROMPT), "absent prompt");
    }

    #[test]
    fn string_prompt_is_used_verbatim() {
        let prompt = prompt_text(MaybeUndefined::Value(Any(Value::from("a cat")))).ok();
        assert_eq!(prompt.as_deref(), Some("a cat"), "string prompt");
    }

    #[test]
    fn null_and_non_string_prompts_are_rejected() {
        let rejected = [
            MaybeUndefined::Null,
            MaybeUndefined::Value(Any(Value::Null)),
            MaybeUndefined::Value(Any(Value::from(42))),
            MaybeUndefined::Value(Any(Value::from(1.5))),
            MaybeUndefined::Value(Any(Value::from(true))),
            MaybeUndefined::Value(Any(Value::Array(vec![Value::from(1)]))),
        ];
        for prompt in rejected {
            let shown = format!("{prompt:?}");
            assert!(
                matches!(prompt_text(prompt), Err(ApiError::Request(_))),
                "{shown} should be rejected"
            );
        }
    }
}

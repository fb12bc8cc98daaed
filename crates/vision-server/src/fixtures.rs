//! Static JSON fixture API.
//!
//! `GET {prefix}/<resource>` answers with the raw contents of
//! `<data_dir>/<resource>.json`. A missing or unreadable resource still
//! answers `200` with `{"message": ..., "status": 404}` in the body.

use std::path::{Path, PathBuf};
use std::time::Instant;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::error::FixtureError;

/// Content type of every fixture response.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Header carrying the handling time of each response.
pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

const DEVTOOLS_PROBE_SUFFIX: &str = "com.chrome.devtools.json";
const NOT_FOUND_MESSAGE: &str = "failed to read fixture, resource does not exist";

/// Directory of `<resource>.json` files.
#[derive(Clone, Debug)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    /// Store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Fixture directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a resource name to its file. Segments must be non-empty and made
    /// of `[A-Za-z0-9_-]`; leading and trailing slashes are ignored.
    pub fn resolve(&self, resource: &str) -> Result<PathBuf, FixtureError> {
        let trimmed = resource.trim_matches('/');
        let valid = !trimmed.is_empty()
            && trimmed.split('/').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            });
        if !valid {
            return Err(FixtureError::InvalidName(resource.to_owned()));
        }

        let mut path = self.root.clone();
        for segment in trimmed.split('/') {
            path.push(segment);
        }
        let _ = path.set_extension("json");
        Ok(path)
    }

    /// Read a fixture document.
    pub async fn read(&self, resource: &str) -> Result<String, FixtureError> {
        let path = self.resolve(resource)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| FixtureError::Unreadable {
                resource: resource.to_owned(),
                source,
            })
    }
}

/// Body returned for a missing resource.
pub fn not_found_body() -> String {
    serde_json::json!({ "message": NOT_FOUND_MESSAGE, "status": 404 }).to_string()
}

#[derive(Clone)]
struct FixtureApi {
    store: FixtureStore,
    prefix: String,
}

/// Fixture routes. Every path not claimed by another route is treated as a
/// fixture lookup.
pub fn router(store: FixtureStore, api_prefix: &str) -> Router {
    let api = FixtureApi {
        store,
        prefix: api_prefix.trim_end_matches('/').to_owned(),
    };
    Router::new().fallback(serve_fixture).with_state(api)
}

/// Apply the response-time stamp and permissive CORS to `router`.
pub fn layered(router: Router) -> Router {
    router
        .layer(middleware::from_fn(response_time))
        .layer(cors_layer())
}

/// `Access-Control-Allow-Origin: *` with the fixture API's method set.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods([
        Method::OPTIONS,
        Method::GET,
        Method::PUT,
        Method::POST,
        Method::DELETE,
    ])
}

/// Stamp `X-Response-Time: <ms>ms` on every response.
pub async fn response_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = started.elapsed().as_millis();
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed}ms")) {
        let _ = response.headers_mut().insert(X_RESPONSE_TIME, value);
    }
    response
}

async fn serve_fixture(State(api): State<FixtureApi>, uri: Uri) -> Response {
    let path = uri.path();
    if path.ends_with(DEVTOOLS_PROBE_SUFFIX) {
        return StatusCode::NO_CONTENT.into_response();
    }

    let resource = path
        .strip_prefix(api.prefix.as_str())
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(path);

    let body = match api.store.read(resource).await {
        Ok(document) => document,
        Err(e) => {
            debug!(path, error = %e, "fixture not served");
            not_found_body()
        }
    };
    ([(CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response()
}

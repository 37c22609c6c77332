//! In-process stand-in for the course backend, used by tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};

use super::types::{
    BatchRequest, BatchResponse, CourseResponse, CourseVersion, RefreshRequest, TokenPair,
};
use super::{ApiClient, AuthSession, Credentials};
use crate::course::Hole;
use crate::geo::LatLng;

pub(crate) struct MockState {
    pub refresh_calls: AtomicUsize,
    pub refresh_ok: AtomicBool,
    /// Every batch request answers 503.
    pub fail_batches: AtomicBool,
    /// Batch requests answer 503 once this many have been accepted.
    pub accept_batches: Mutex<Option<usize>>,
    pub batches: Mutex<Vec<BatchRequest>>,
    pub course_version: AtomicU64,
    pub course_fetches: AtomicUsize,
    token: Mutex<String>,
}

impl MockState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.token.lock().unwrap());
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected)
    }
}

pub(crate) struct MockBackend {
    pub state: Arc<MockState>,
    pub base_url: String,
}

impl MockBackend {
    /// Serves on an ephemeral port. The only valid access token is `valid-0`
    /// until a refresh hands out `valid-1`, `valid-2` and so on.
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            refresh_calls: AtomicUsize::new(0),
            refresh_ok: AtomicBool::new(true),
            fail_batches: AtomicBool::new(false),
            accept_batches: Mutex::new(None),
            batches: Mutex::new(Vec::new()),
            course_version: AtomicU64::new(7),
            course_fetches: AtomicUsize::new(0),
            token: Mutex::new("valid-0".into()),
        });

        let app = Router::new()
            .route("/positions/batch", post(post_batch))
            .route("/auth/refresh", post(refresh))
            .route("/courses/{slug}", get(course))
            .route("/courses/{slug}/version", get(course_version))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{}", addr),
        }
    }

    pub fn client(&self, access_token: &str) -> ApiClient {
        let auth = Arc::new(AuthSession::new(Credentials {
            access_token: access_token.into(),
            refresh_token: "refresh-0".into(),
        }));
        ApiClient::new(&self.base_url, auth, Duration::from_secs(5)).unwrap()
    }
}

async fn post_batch(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(batch): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if state.fail_batches.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let mut batches = state.batches.lock().unwrap();
    if let Some(limit) = *state.accept_batches.lock().unwrap() {
        if batches.len() >= limit {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    }
    let inserted = batch.positions.len();
    batches.push(batch);
    Ok(Json(BatchResponse { inserted }))
}

async fn refresh(
    State(state): State<Arc<MockState>>,
    Json(_request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, StatusCode> {
    let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !state.refresh_ok.load(Ordering::SeqCst) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    // give concurrent callers a chance to pile up behind the refresh lock
    tokio::time::sleep(Duration::from_millis(20)).await;
    let access_token = format!("valid-{}", n);
    *state.token.lock().unwrap() = access_token.clone();
    Ok(Json(TokenPair {
        access_token,
        refresh_token: format!("refresh-{}", n),
    }))
}

async fn course(
    State(state): State<Arc<MockState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CourseResponse>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if slug != "links" {
        return Err(StatusCode::NOT_FOUND);
    }
    state.course_fetches.fetch_add(1, Ordering::SeqCst);
    Ok(Json(CourseResponse {
        slug,
        data_version: state.course_version.load(Ordering::SeqCst),
        holes: vec![Hole::new(
            1,
            Some(LatLng::new(52.0, 4.0)),
            Some(LatLng::new(52.003, 4.001)),
        )],
        boundary: None,
    }))
}

async fn course_version(
    State(state): State<Arc<MockState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CourseVersion>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if slug != "links" {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(CourseVersion {
        data_version: state.course_version.load(Ordering::SeqCst),
    }))
}

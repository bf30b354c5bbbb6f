//! JSON and SSE endpoints.
//!
//! Every JSON response is an envelope: `{"ok": true, "data": ...}` on success,
//! `{"ok": false, "error": "<code>", "message": "..."}` otherwise.

use crate::ai::{connect, test_connection, ApiOptions, PRESETS};
use crate::config::{ApiConfig, ConfigError, Schedule, DEFAULT_RETENTION_DAYS};
use crate::feeds::sources::default_feeds;
use crate::models::FeedSource;
use crate::orchestrator::{Orchestrator, RunError};
use crate::scheduler::Scheduler;
use crate::state::GenerationState;
use crate::storage::{Store, StoreError, DEFAULT_LIST_LIMIT};
use crate::translate::{TranslateEvent, TranslateItem};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const TRANSLATE_KEEP_ALIVE: Duration = Duration::from_secs(15);
const STATUS_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    config_path: Arc<PathBuf>,
    /// Key given on the command line; wins over the stored one.
    api_key_override: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        scheduler: Arc<Scheduler>,
        config_path: PathBuf,
        api_key_override: Option<String>,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            config_path: Arc::new(config_path),
            api_key_override: api_key_override
                .filter(|k| !k.trim().is_empty())
                .map(Arc::from),
        }
    }

    fn store(&self) -> &Store {
        self.orchestrator.store()
    }

    fn config(&self) -> Result<Option<ApiConfig>, ConfigError> {
        ApiConfig::load(&self.config_path)
    }

    /// Key and backend options for server-initiated AI calls.
    fn credentials(&self) -> Result<Option<(String, ApiOptions)>, ConfigError> {
        let config = self.config()?;
        let opts = config.as_ref().map(ApiConfig::api_options).unwrap_or_default();
        let key = self
            .api_key_override
            .as_deref()
            .map(str::to_string)
            .or_else(|| config.map(|c| c.api_key))
            .filter(|k| !k.trim().is_empty());
        Ok(key.map(|k| (k, opts)))
    }
}

// ── Envelope ──

fn ok<T: serde::Serialize>(data: T) -> Response {
    Json(json!({ "ok": true, "data": data })).into_response()
}

fn ok_message(message: &str) -> Response {
    Json(json!({ "ok": true, "message": message })).into_response()
}

fn fail(status: StatusCode, error: &str, message: impl std::fmt::Display) -> Response {
    (
        status,
        Json(json!({ "ok": false, "error": error, "message": message.to_string() })),
    )
        .into_response()
}

/// Internal failures surfaced as `500 internal_error`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self, "Request failed");
        fail(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", self)
    }
}

type ApiResult = Result<Response, ApiError>;

// ── Router ──

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/digest/latest", get(latest_digest))
        .route("/api/digest/generate", post(generate))
        .route("/api/digest/share", post(share_digest))
        .route("/api/digest/{date}", get(digest_by_date))
        .route("/api/digests", get(list_digests))
        .route("/api/stats", get(stats))
        .route("/api/status", get(status))
        .route("/api/status/stream", get(status_stream))
        .route("/api/share/{token}", get(shared_digest))
        .route("/api/article/translations/status", post(translation_status))
        .route("/api/article/translate", get(translate))
        .route("/api/article/translate/stream", get(translate_stream))
        .route("/api/article/retranslate", post(retranslate))
        .route("/api/translate/progress", get(translate_progress))
        .route("/api/rss-sources", get(rss_sources).post(save_rss_sources))
        .route("/api/rss-sources/test", post(test_rss_source))
        .route("/api/config", get(get_config).post(save_config))
        .route("/api/presets", get(presets))
        .route("/api/test-connection", post(test_api_connection))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState, port: u16) -> Result<(), Box<dyn Error>> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

// ── Digests ──

async fn latest_digest(State(state): State<AppState>) -> ApiResult {
    Ok(match state.store().latest_digest()? {
        Some(digest) => ok(digest),
        None => fail(StatusCode::OK, "no_digest", "no digest has been generated yet"),
    })
}

async fn digest_by_date(State(state): State<AppState>, Path(date): Path<String>) -> ApiResult {
    Ok(match state.store().get_digest(&date)? {
        Some(digest) => ok(digest),
        None => fail(StatusCode::OK, "not_found", format!("no digest for {date}")),
    })
}

async fn list_digests(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.store().list_digests(DEFAULT_LIST_LIMIT)?))
}

async fn stats(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.store().stats()?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GenerateRequest {
    api_key: Option<String>,
    preset: Option<String>,
    #[serde(rename = "baseURL")]
    base_url: Option<String>,
    model: Option<String>,
    hours: Option<u32>,
    top_n: Option<usize>,
}

#[instrument(level = "info", skip_all)]
async fn generate(State(state): State<AppState>, body: Option<Json<GenerateRequest>>) -> ApiResult {
    let Json(req) = body.unwrap_or_default();
    let config = state.config()?.unwrap_or_default();
    let pick = |over: &Option<String>, base: &str| {
        over.clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| base.to_string())
    };
    let api_key = req
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| state.api_key_override.as_deref().map(str::to_string))
        .unwrap_or_else(|| config.api_key.clone());
    if api_key.trim().is_empty() {
        return Ok(fail(StatusCode::OK, "no_api_key", "an API key is required; configure one in settings"));
    }
    let opts = ApiOptions::new(
        &pick(&req.preset, &config.preset),
        &pick(&req.base_url, &config.base_url),
        &pick(&req.model, &config.model),
    );
    let defaults = Schedule::default();
    let hours = req.hours.filter(|h| *h > 0).unwrap_or(defaults.hours);
    let top_n = req.top_n.filter(|n| *n > 0).unwrap_or(defaults.top_n);

    match state.orchestrator.start_digest_generation(&api_key, &opts, hours, top_n) {
        Ok(_) => {
            info!(hours, top_n, "Generation started");
            Ok(ok_message("digest generation started"))
        }
        Err(RunError::AlreadyRunning(_)) => Ok(fail(
            StatusCode::OK,
            "already_running",
            "a digest is already being generated",
        )),
        Err(e) => Ok(fail(StatusCode::OK, "generation_failed", e)),
    }
}

async fn status(State(state): State<AppState>) -> Response {
    ok(state.orchestrator.generation().snapshot())
}

/// Current state first, then every change.
fn state_events(
    initial: GenerationState,
    rx: tokio::sync::broadcast::Receiver<GenerationState>,
) -> impl Stream<Item = GenerationState> + Send + 'static {
    let updates = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(s) => return Some((s, rx)),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Status subscriber lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    stream::once(async move { initial }).chain(updates)
}

async fn status_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (initial, rx) = state.orchestrator.generation().subscribe();
    let events = state_events(initial, rx).map(|s| Event::default().json_data(s));
    Sse::new(events).keep_alive(KeepAlive::new().interval(STATUS_KEEP_ALIVE))
}

// ── Sharing ──

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShareRequest {
    date: String,
}

async fn share_digest(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<ShareRequest>) -> ApiResult {
    if req.date.trim().is_empty() {
        return Ok(fail(StatusCode::BAD_REQUEST, "missing_date", "date is required"));
    }
    let Some(token) = state.store().create_share_token(&req.date)? else {
        return Ok(fail(StatusCode::NOT_FOUND, "digest_not_found", format!("no digest for {}", req.date)));
    };
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let host = header("host").unwrap_or("localhost");
    let proto = header("x-forwarded-proto").unwrap_or("http");
    let url = format!("{proto}://{host}/share/{token}");
    Ok(Json(json!({ "ok": true, "token": token, "url": url })).into_response())
}

async fn shared_digest(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult {
    Ok(match state.store().digest_by_share_token(&token)? {
        Some(mut digest) => {
            digest.share_token = None;
            ok(digest)
        }
        None => fail(StatusCode::NOT_FOUND, "not_found", "unknown share link"),
    })
}

// ── Translation ──

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UrlsRequest {
    urls: Vec<String>,
}

async fn translation_status(State(state): State<AppState>, Json(req): Json<UrlsRequest>) -> ApiResult {
    let map = state.store().translation_map(&req.urls)?;
    let status: HashMap<String, Value> = map
        .into_iter()
        .map(|(url, t)| {
            let entry = json!({
                "ok": true,
                "ready": true,
                "url": url,
                "titleZh": t.title_zh,
                "summary": t.summary,
                "content": t.content,
            });
            (url, entry)
        })
        .collect();
    Ok(ok(status))
}

fn translation_request(item: &TranslateItem, state: &AppState) -> Result<Result<(String, ApiOptions), Response>, ApiError> {
    if item.url.trim().is_empty() {
        return Ok(Err(fail(StatusCode::BAD_REQUEST, "missing_url", "url is required")));
    }
    match state.credentials()? {
        Some(creds) => Ok(Ok(creds)),
        None => Ok(Err(fail(
            StatusCode::BAD_REQUEST,
            "no_api_key",
            "configure an API key in settings first",
        ))),
    }
}

fn translation_response(result: Result<crate::models::Translation, crate::translate::TranslateError>) -> Response {
    match result {
        Ok(t) => Json(json!({
            "ok": true,
            "url": t.url,
            "titleZh": t.title_zh,
            "summary": t.summary,
            "content": t.content,
        }))
        .into_response(),
        Err(e) => Json(json!({ "ok": false, "error": e.to_string() })).into_response(),
    }
}

async fn translate(State(state): State<AppState>, Query(item): Query<TranslateItem>) -> ApiResult {
    let (key, opts) = match translation_request(&item, &state)? {
        Ok(creds) => creds,
        Err(response) => return Ok(response),
    };
    let ai = match connect(&key, &opts) {
        Ok(ai) => ai,
        Err(e) => return Ok(translation_response(Err(e.into()))),
    };
    let result = state.orchestrator.translator().translate(ai.as_ref(), &item).await;
    Ok(translation_response(result))
}

async fn retranslate(State(state): State<AppState>, Json(item): Json<TranslateItem>) -> ApiResult {
    let (key, opts) = match translation_request(&item, &state)? {
        Ok(creds) => creds,
        Err(response) => return Ok(response),
    };
    let ai = match connect(&key, &opts) {
        Ok(ai) => ai,
        Err(e) => return Ok(translation_response(Err(e.into()))),
    };
    let result = state.orchestrator.translator().retranslate(ai.as_ref(), &item).await;
    Ok(translation_response(result))
}

fn sse_event(event: &TranslateEvent) -> Event {
    Event::default().event(event.name()).data(event.data().to_string())
}

async fn translate_stream(State(state): State<AppState>, Query(item): Query<TranslateItem>) -> Response {
    if item.url.trim().is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let rx = match state.credentials() {
        Ok(Some((key, opts))) => match connect(&key, &opts) {
            Ok(ai) => Some(Arc::clone(state.orchestrator.translator()).translate_stream(ai, item)),
            Err(e) => {
                warn!(error = %e, "Cannot stream translation");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            error!(error = %e, "Config unreadable");
            None
        }
    };

    let Some(rx) = rx else {
        let event = TranslateEvent::Error("configure an API key in settings first".to_string());
        let once = stream::once(async move { Ok::<_, Infallible>(sse_event(&event)) });
        return Sse::new(once).into_response();
    };

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(sse_event(&event)), rx))
    });
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(TRANSLATE_KEEP_ALIVE).text("ping"))
        .into_response()
}

async fn translate_progress(State(state): State<AppState>) -> Response {
    ok(state.orchestrator.translator().progress())
}

// ── Feed sources ──

async fn rss_sources(State(state): State<AppState>) -> ApiResult {
    let custom = state.store().rss_sources()?.unwrap_or_default();
    Ok(ok(json!({ "default": default_feeds(), "custom": custom })))
}

fn valid_source(s: &FeedSource) -> bool {
    !s.name.trim().is_empty() && Url::parse(s.xml_url.trim()).is_ok()
}

async fn save_rss_sources(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult {
    let Some(raw) = body.get("sources").filter(|v| v.is_array()) else {
        return Ok(fail(StatusCode::BAD_REQUEST, "invalid_sources", "sources must be an array"));
    };
    let sources: Vec<FeedSource> = match serde_json::from_value(raw.clone()) {
        Ok(s) => s,
        Err(e) => return Ok(fail(StatusCode::BAD_REQUEST, "invalid_source_format", e)),
    };
    if let Some(bad) = sources.iter().find(|s| !valid_source(s)) {
        return Ok(fail(
            StatusCode::BAD_REQUEST,
            "invalid_source_format",
            format!("source {:?} needs a name and a valid xmlUrl", bad.name),
        ));
    }
    state.store().save_rss_sources(&sources)?;
    info!(count = sources.len(), "Saved custom feed sources");
    Ok(ok_message("feed sources saved"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProbeRequest {
    xml_url: String,
}

async fn test_rss_source(State(state): State<AppState>, Json(req): Json<ProbeRequest>) -> Response {
    if req.xml_url.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "missing_url", "xmlUrl is required");
    }
    match state.orchestrator.fetcher().probe(req.xml_url.trim()).await {
        Ok(()) => ok_message("feed is reachable"),
        Err(e) => Json(json!({ "ok": false, "error": e.to_string() })).into_response(),
    }
}

// ── Configuration ──

async fn get_config(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.config()?.map(|c| c.masked())))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigRequest {
    preset: String,
    api_key: String,
    #[serde(rename = "baseURL")]
    base_url: String,
    model: String,
    schedules: Vec<Schedule>,
    translation_retention_days: Option<u32>,
}

async fn save_config(State(state): State<AppState>, Json(req): Json<ConfigRequest>) -> ApiResult {
    if req.api_key.trim().is_empty() {
        return Ok(fail(StatusCode::BAD_REQUEST, "missing_api_key", "apiKey is required"));
    }
    let config = ApiConfig {
        preset: if req.preset.trim().is_empty() { "auto".to_string() } else { req.preset },
        api_key: req.api_key.trim().to_string(),
        base_url: req.base_url,
        model: req.model,
        schedules: req.schedules,
        translation_retention_days: req.translation_retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
    };
    config.save(&state.config_path)?;
    state.scheduler.arm(&config);
    Ok(ok_message("configuration saved"))
}

async fn presets() -> Response {
    ok(PRESETS)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConnectionRequest {
    preset: String,
    api_key: String,
    #[serde(rename = "baseURL")]
    base_url: String,
    model: String,
}

async fn test_api_connection(Json(req): Json<ConnectionRequest>) -> Response {
    if req.api_key.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "missing_api_key", "apiKey is required");
    }
    let opts = ApiOptions::new(&req.preset, &req.base_url, &req.model);
    let result = match connect(&req.api_key, &opts) {
        Ok(ai) => test_connection(ai.as_ref()).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ok_message("connection successful"),
        Err(e) => Json(json!({ "ok": false, "error": e.to_string() })).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::FeedFetcher;
    use crate::models::{Digest, Translation};
    use crate::translate::TranslationService;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Harness {
        base: String,
        http: reqwest::Client,
        store: Store,
        orchestrator: Arc<Orchestrator>,
        _dir: TempDir,
    }

    impl Harness {
        async fn get(&self, path: &str) -> Value {
            self.http
                .get(format!("{}{path}", self.base))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }

        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .http
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }
    }

    async fn start() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Store::in_memory();
        let translator = Arc::new(TranslationService::new(store.clone()).unwrap());
        let fetcher = FeedFetcher::new().unwrap();
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), fetcher, translator).with_prewarm(false));
        let config_path = dir.path().join("config.yaml");
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&orchestrator), config_path.clone()));
        let state = AppState::new(Arc::clone(&orchestrator), scheduler, config_path, None);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        Harness {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            store,
            orchestrator,
            _dir: dir,
        }
    }

    fn done_digest(date: &str) -> Digest {
        let mut d = Digest::placeholder(date, 48, 3, Utc::now());
        d.status = crate::models::DigestStatus::Done;
        d
    }

    #[tokio::test]
    async fn test_health() {
        let h = start().await;
        let body = h.http.get(format!("{}/health", h.base)).send().await.unwrap().text().await.unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_digest_routes() {
        let h = start().await;
        assert_eq!(h.get("/api/digest/latest").await["error"], "no_digest");

        h.store.finish_digest(done_digest("2025-05-05")).unwrap();
        h.store.finish_digest(done_digest("2025-05-06")).unwrap();

        let latest = h.get("/api/digest/latest").await;
        assert_eq!(latest["ok"], true);
        assert_eq!(latest["data"]["date"], "2025-05-06");
        assert_eq!(h.get("/api/digest/2025-05-05").await["data"]["status"], "done");
        assert_eq!(h.get("/api/digest/2024-01-01").await["error"], "not_found");

        let list = h.get("/api/digests").await;
        assert_eq!(list["data"][0]["date"], "2025-05-06");
        assert_eq!(h.get("/api/stats").await["data"]["totalDigests"], 2);
    }

    #[tokio::test]
    async fn test_share_flow_hides_token() {
        let h = start().await;
        h.store.finish_digest(done_digest("2025-05-06")).unwrap();

        let (status, body) = h.post("/api/digest/share", json!({"date": "2025-05-06"})).await;
        assert_eq!(status, 200);
        let token = body["token"].as_str().unwrap().to_string();
        assert!(body["url"].as_str().unwrap().ends_with(&format!("/share/{token}")));

        let (_, again) = h.post("/api/digest/share", json!({"date": "2025-05-06"})).await;
        assert_eq!(again["token"], token.as_str());

        let shared = h.get(&format!("/api/share/{token}")).await;
        assert_eq!(shared["data"]["date"], "2025-05-06");
        assert!(shared["data"].get("shareToken").is_none());

        let (status, _) = h.post("/api/digest/share", json!({"date": "1999-01-01"})).await;
        assert_eq!(status, 404);
        let (status, _) = h.post("/api/digest/share", json!({})).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_generate_rejections() {
        let h = start().await;
        let (_, body) = h.post("/api/digest/generate", json!({})).await;
        assert_eq!(body["error"], "no_api_key");

        h.orchestrator.generation().try_begin(Utc::now(), "busy").unwrap();
        let (_, body) = h.post("/api/digest/generate", json!({"apiKey": "sk-x"})).await;
        assert_eq!(body["error"], "already_running");
        assert_eq!(h.get("/api/status").await["data"]["progress"], "busy");
    }

    #[tokio::test]
    async fn test_config_round_trip_masks_key() {
        let h = start().await;
        assert_eq!(h.get("/api/config").await["data"], Value::Null);

        let (status, _) = h.post("/api/config", json!({"preset": "gemini"})).await;
        assert_eq!(status, 400);

        let (status, _) = h
            .post(
                "/api/config",
                json!({"preset": "gemini", "apiKey": "AIzaSyFAKEFAKE1234", "schedules": [{"hour": 7}]}),
            )
            .await;
        assert_eq!(status, 200);

        let config = h.get("/api/config").await;
        assert_eq!(config["data"]["apiKeyMasked"], "AIzaSy***1234");
        assert!(config["data"].get("apiKey").is_none());
        assert_eq!(config["data"]["schedules"][0]["hour"], 7);
        assert_eq!(config["data"]["schedules"][0]["enabled"], true);

        let presets = h.get("/api/presets").await;
        assert_eq!(presets["data"][0]["id"], "gemini");
    }

    #[tokio::test]
    async fn test_rss_source_validation() {
        let h = start().await;
        let sources = h.get("/api/rss-sources").await;
        assert!(!sources["data"]["default"].as_array().unwrap().is_empty());
        assert_eq!(sources["data"]["custom"], json!([]));

        let (status, body) = h
            .post("/api/rss-sources", json!({"sources": [{"name": "", "xmlUrl": "https://a.test/feed"}]}))
            .await;
        assert_eq!((status, body["error"].as_str()), (400, Some("invalid_source_format")));
        let (status, _) = h.post("/api/rss-sources", json!({"sources": "nope"})).await;
        assert_eq!(status, 400);

        let (status, _) = h
            .post("/api/rss-sources", json!({"sources": [{"name": "A", "xmlUrl": "https://a.test/feed"}]}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(h.get("/api/rss-sources").await["data"]["custom"][0]["name"], "A");
    }

    #[tokio::test]
    async fn test_translation_status_and_missing_key() {
        let h = start().await;
        h.store
            .save_translation(&Translation {
                title_zh: "标题".to_string(),
                summary: "摘要".to_string(),
                content: "正文".to_string(),
                url: "https://a.test/1".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();

        let (_, body) = h
            .post(
                "/api/article/translations/status",
                json!({"urls": ["https://a.test/1", "https://a.test/2"]}),
            )
            .await;
        assert_eq!(body["data"]["https://a.test/1"]["ready"], true);
        assert!(body["data"].get("https://a.test/2").is_none());

        let resp = h
            .http
            .get(format!("{}/api/article/translate?url=https%3A%2F%2Fa.test%2F1", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);

        let stream = h
            .http
            .get(format!("{}/api/article/translate/stream?url=https%3A%2F%2Fa.test%2F1", h.base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(stream.starts_with("event: error\n"));

        assert_eq!(h.get("/api/translate/progress").await["data"]["running"], false);
    }

    #[tokio::test]
    async fn test_status_stream_sends_current_state() {
        let h = start().await;
        let resp = h
            .http
            .get(format!("{}/api/status/stream", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        let mut body = resp.bytes_stream();
        let first = body.next().await.unwrap().unwrap();
        let text = String::from_utf8_lossy(&first);
        assert!(text.starts_with("data: {"));
        assert!(text.contains("\"step\":\"idle\""));
    }
}

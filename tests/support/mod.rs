//! In-process fake of the file-sharing server, recording every request.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chunkwise::prelude::*;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const UPLOAD_ID: &str = "session-1";

#[derive(Debug, Clone, Default)]
pub enum InitMode {
    #[default]
    Normal,
    Status(u16),
    Body(Value),
}

/// How the fake server misbehaves.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub init: InitMode,
    /// Status codes returned on successive PUTs of a chunk index before succeeding.
    pub chunk_failures: HashMap<usize, VecDeque<u16>>,
    pub chunk_delay: Duration,
    pub complete_status: Option<u16>,
    pub legacy_status: Option<u16>,
    pub settings: Option<Value>,
    pub files: Vec<String>,
    /// Stored file served under `/download/{name}`.
    pub download: Option<(String, Vec<u8>)>,
    pub accept_ranges: bool,
    /// Respond 200 with the whole body to every ranged GET.
    pub ignore_ranges: bool,
    /// Range start -> (number of truncated 206 responses to send first, truncated length).
    pub short_ranges: HashMap<u64, (usize, usize)>,
    /// Range start -> status codes for successive GETs.
    pub range_failures: HashMap<u64, VecDeque<u16>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPut {
    pub upload_id: String,
    pub index: usize,
    pub offset: u64,
    pub len: usize,
    pub status: u16,
}

#[derive(Debug, Clone, Default)]
pub struct Log {
    pub init_requests: Vec<Value>,
    pub chunk_puts: Vec<ChunkPut>,
    pub completes: Vec<String>,
    pub aborts: Vec<String>,
    pub legacy_uploads: Vec<Vec<u8>>,
    pub heads: usize,
    /// `Range` header of every download GET, `None` for whole-file requests.
    pub gets: Vec<Option<String>>,
    /// Accepted chunk bodies by offset.
    pub received: HashMap<u64, Vec<u8>>,
}

impl Log {
    pub fn puts_for(&self, index: usize) -> usize {
        self.chunk_puts.iter().filter(|p| p.index == index).count()
    }

    /// Reassembles the accepted chunks in offset order.
    pub fn assembled(&self) -> Vec<u8> {
        let mut offsets: Vec<_> = self.received.keys().copied().collect();
        offsets.sort_unstable();
        offsets
            .into_iter()
            .flat_map(|o| self.received[&o].clone())
            .collect()
    }
}

#[derive(Default)]
struct ServerState {
    behavior: Behavior,
    log: Log,
}

type Shared = Arc<Mutex<ServerState>>;

pub struct FakeServer {
    pub url: String,
    state: Shared,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start(behavior: Behavior) -> Self {
        let state: Shared = Arc::new(Mutex::new(ServerState {
            behavior,
            log: Log::default(),
        }));
        let app = Router::new()
            .route("/upload/chunked/init", post(init))
            .route("/upload/chunked/chunk", put(chunk))
            .route("/upload/chunked/complete", post(complete))
            .route("/upload/chunked/abort", post(abort))
            .route("/upload/", post(legacy_upload))
            .route("/settings/", get(settings))
            .route("/files/", get(files))
            .route("/download/{name}", get(download))
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{addr}/"),
            state,
            handle,
        }
    }

    pub fn client(&self, config: TransferConfig) -> TransferClient {
        TransferClient::with_config(
            TransferClient::http_client().unwrap(),
            Endpoint::parse(&self.url).unwrap(),
            config,
        )
    }

    pub fn log(&self) -> Log {
        self.state.lock().unwrap().log.clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Small limits so tests exercise many chunks with little data.
pub fn small_config(chunk: u64, parallel: usize) -> TransferConfig {
    TransferConfig {
        parallel_chunks: parallel,
        chunk_size_bytes: chunk,
        max_file_size_bytes: 1024 * 1024 * 1024,
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Drains every event published so far.
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Folds events into the signals a UI would render.
pub fn signals(events: Vec<ProgressEvent>) -> Vec<ProgressSignal> {
    let mut agg = ProgressAggregator::new();
    events.into_iter().flat_map(|e| agg.apply(e)).collect()
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn init(State(state): State<Shared>, Json(req): Json<Value>) -> Response {
    let mut st = state.lock().unwrap();
    st.log.init_requests.push(req.clone());
    match st.behavior.init.clone() {
        InitMode::Status(code) => status(code).into_response(),
        InitMode::Body(body) => (StatusCode::CREATED, Json(body)).into_response(),
        InitMode::Normal => {
            let size = req["size"].as_u64().unwrap();
            let chunk = req["chunk_size"].as_u64().unwrap();
            let body = json!({
                "upload_id": UPLOAD_ID,
                "filename": req["filename"],
                "size": size,
                "chunk_size": chunk,
                "total_chunks": size.div_ceil(chunk),
            });
            (StatusCode::CREATED, Json(body)).into_response()
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn chunk(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let delay = state.lock().unwrap().behavior.chunk_delay;
    tokio::time::sleep(delay).await;

    let upload_id = header_str(&headers, "x-upload-id");
    let index: usize = header_str(&headers, "x-chunk-index").parse().unwrap();
    let offset: u64 = header_str(&headers, "x-chunk-offset").parse().unwrap();

    let mut st = state.lock().unwrap();
    let code = st
        .behavior
        .chunk_failures
        .get_mut(&index)
        .and_then(|q| q.pop_front())
        .unwrap_or(200);
    st.log.chunk_puts.push(ChunkPut {
        upload_id,
        index,
        offset,
        len: body.len(),
        status: code,
    });
    if code == 200 {
        st.log.received.insert(offset, body.to_vec());
    }
    status(code)
}

async fn complete(State(state): State<Shared>, Json(req): Json<Value>) -> StatusCode {
    let mut st = state.lock().unwrap();
    st.log.completes.push(req["upload_id"].as_str().unwrap_or_default().to_string());
    status(st.behavior.complete_status.unwrap_or(201))
}

async fn abort(State(state): State<Shared>, Json(req): Json<Value>) -> StatusCode {
    let mut st = state.lock().unwrap();
    st.log.aborts.push(req["upload_id"].as_str().unwrap_or_default().to_string());
    StatusCode::OK
}

async fn legacy_upload(State(state): State<Shared>, body: Bytes) -> StatusCode {
    let mut st = state.lock().unwrap();
    st.log.legacy_uploads.push(body.to_vec());
    status(st.behavior.legacy_status.unwrap_or(201))
}

async fn settings(State(state): State<Shared>) -> Response {
    match state.lock().unwrap().behavior.settings.clone() {
        Some(doc) => Json(doc).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn files(State(state): State<Shared>) -> Json<Value> {
    Json(json!({ "files": state.lock().unwrap().behavior.files }))
}

/// HEAD requests are routed through the GET handler; axum strips the body
/// and keeps the length.
fn probe(st: &mut ServerState, name: &str) -> Response {
    st.log.heads += 1;
    let Some((stored, data)) = st.behavior.download.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if stored != name {
        return StatusCode::NOT_FOUND.into_response();
    }
    let mut headers = HeaderMap::new();
    if st.behavior.accept_ranges {
        headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    }
    (StatusCode::OK, headers, data).into_response()
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn download(
    State(state): State<Shared>,
    method: Method,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut st = state.lock().unwrap();
    if method == Method::HEAD {
        return probe(&mut st, &name);
    }
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    st.log.gets.push(range.clone());

    let Some((stored, data)) = st.behavior.download.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if stored != name {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some((start, end)) = range.as_deref().and_then(parse_range) else {
        return (StatusCode::OK, data).into_response();
    };
    if st.behavior.ignore_ranges {
        return (StatusCode::OK, data).into_response();
    }
    if let Some(code) = st.behavior.range_failures.get_mut(&start).and_then(|q| q.pop_front()) {
        return status(code).into_response();
    }

    let end = end.min(data.len() as u64 - 1);
    let mut slice = data[start as usize..=end as usize].to_vec();
    if let Some((remaining, len)) = st.behavior.short_ranges.get_mut(&start) {
        if *remaining > 0 {
            *remaining -= 1;
            slice.truncate(*len);
        }
    }
    let content_range = format!("bytes {start}-{end}/{}", data.len());
    (
        StatusCode::PARTIAL_CONTENT,
        [(header::CONTENT_RANGE, content_range)],
        slice,
    )
        .into_response()
}

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use warrant_edge::settings::{self, Reconnect, UpdateStrategy};

pub const API_KEY: &str = "test-api-key";

/// `Some((kind, data))` is sent as one event; `None` ends every open stream.
type Frame = Option<(String, String)>;

struct UpstreamState {
    snapshot: Mutex<Value>,
    fail_status: Mutex<Option<StatusCode>>,
    expand_calls: AtomicUsize,
    subscriptions: AtomicUsize,
    hang_up: AtomicBool,
    events: broadcast::Sender<Frame>,
}

/// In-process stand-in for the warrant API and its event stream.
pub struct FakeUpstream {
    addr: SocketAddr,
    state: Arc<UpstreamState>,
    server: JoinHandle<()>,
}

impl FakeUpstream {
    pub async fn start(snapshot: Value) -> Self {
        let (events, _) = broadcast::channel(64);
        let state = Arc::new(UpstreamState {
            snapshot: Mutex::new(snapshot),
            fail_status: Mutex::new(None),
            expand_calls: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            hang_up: AtomicBool::new(false),
            events,
        });

        let app = Router::new()
            .route("/v2/expand", get(expand))
            .route("/events", get(stream_events))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake upstream");
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Upstream settings pointed at this server, with a fast reconnect policy.
    pub fn settings(&self, strategy: UpdateStrategy) -> settings::Upstream {
        settings::Upstream {
            api_key: API_KEY.into(),
            api_endpoint: self.url(),
            streaming_endpoint: self.url(),
            update_strategy: strategy,
            polling_frequency: 10,
            reconnect: Reconnect {
                max_attempts: 2,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                multiplier: 2.0,
                jitter: false,
            },
        }
    }

    pub fn set_snapshot(&self, snapshot: Value) {
        *self.state.snapshot.lock() = snapshot;
    }

    /// Makes `/v2/expand` answer with `status` until cleared with `None`.
    pub fn fail_with(&self, status: Option<StatusCode>) {
        *self.state.fail_status.lock() = status;
    }

    pub fn expand_calls(&self) -> usize {
        self.state.expand_calls.load(Ordering::SeqCst)
    }

    pub fn send(&self, kind: &str, data: &str) {
        let _ = self
            .state
            .events
            .send(Some((kind.to_string(), data.to_string())));
    }

    /// Ends every open event stream.
    pub fn disconnect(&self) {
        let _ = self.state.events.send(None);
    }

    /// Accept new event streams but end them before any event is sent.
    pub fn hang_up_on_subscribe(&self, hang_up: bool) {
        self.state.hang_up.store(hang_up, Ordering::SeqCst);
    }

    /// Event streams opened so far, including closed ones.
    pub fn subscriptions(&self) -> usize {
        self.state.subscriptions.load(Ordering::SeqCst)
    }

    pub async fn wait_for_subscriptions(&self, count: usize) {
        eventually(|| self.subscriptions() >= count).await;
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("ApiKey {API_KEY}"))
}

async fn expand(State(state): State<Arc<UpstreamState>>, headers: HeaderMap) -> Response {
    state.expand_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = *state.fail_status.lock() {
        return (status, "upstream unavailable").into_response();
    }
    Json(state.snapshot.lock().clone()).into_response()
}

async fn stream_events(
    State(state): State<Arc<UpstreamState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) || query.get("stream").map(String::as_str) != Some(API_KEY) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let receiver = state.events.subscribe();
    state.subscriptions.fetch_add(1, Ordering::SeqCst);
    if state.hang_up.load(Ordering::SeqCst) {
        return Sse::new(tokio_stream::empty::<Result<Event, Infallible>>()).into_response();
    }

    let frames = BroadcastStream::new(receiver).map_while(|frame| match frame {
        Ok(Some((kind, data))) => Some(Ok::<_, Infallible>(Event::default().event(kind).data(data))),
        _ => None,
    });
    Sse::new(frames).into_response()
}

/// Polls `cond` until it holds, panicking after five seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within timeout"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

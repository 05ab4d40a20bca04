//! `GET /sse`: connection acknowledgement followed by periodic heartbeats.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt as _};
use serde_json::json;
use std::convert::Infallible;
use std::time::{Duration, Instant};

use super::http::HttpState;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub async fn sse_handler(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("SSE client connected");

    let connected = futures::stream::once(async {
        Ok(Event::default().data(json!({"type": "connection", "status": "connected"}).to_string()))
    });

    let started = state.started;
    let interval = tokio::time::interval(state.heartbeat);
    let heartbeats = futures::stream::unfold(interval, move |mut interval| async move {
        interval.tick().await;
        let event = heartbeat_event(started);
        Some((Ok(event), interval))
    });

    Sse::new(connected.chain(heartbeats)).keep_alive(KeepAlive::default())
}

fn heartbeat_event(started: Instant) -> Event {
    Event::default().data(
        json!({"type": "heartbeat", "timestamp": started.elapsed().as_secs_f64()}).to_string(),
    )
}

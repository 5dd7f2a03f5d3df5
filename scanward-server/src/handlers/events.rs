use axum::{
    extract::State,
    response::{
        Sse,
        sse::{Event, KeepAlive},
    },
};
use futures_util::{Stream, StreamExt};
use std::{convert::Infallible, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use scanward_core::ScanEvent;

use crate::infra::app_state::AppState;

pub const SCAN_UPDATE_EVENT: &str = "scan_update";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Live feed of state changes. Nothing is replayed; a client that falls
/// behind skips the events it missed. Streams end when the service shuts
/// down so open connections do not hold up graceful shutdown.
pub async fn scan_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.orchestrator().subscribe();
    let shutdown = state.orchestrator().shutdown_token();

    let stream = BroadcastStream::new(receiver)
        .filter_map(|item| async move {
            match item {
                Ok(event) => scan_event_to_sse(&event).map(Ok),
                Err(err) => {
                    warn!("scan event subscriber lagged: {err}");
                    None
                }
            }
        })
        .take_until(shutdown.cancelled_owned());

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

fn scan_event_to_sse(event: &ScanEvent) -> Option<Event> {
    match Event::default()
        .event(SCAN_UPDATE_EVENT)
        .id(event.sequence.to_string())
        .json_data(event)
    {
        Ok(sse) => Some(sse),
        Err(err) => {
            warn!(job_id = %event.id, error = %err, "failed to encode scan event");
            None
        }
    }
}

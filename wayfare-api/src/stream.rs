use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use wayfare_shared::TripId;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/trips/{id}/stream", get(trip_stream))
}

/// Live event feed for a single trip. Subscribers joining late only see
/// events published after the subscription; the bus keeps no history.
async fn trip_stream(
    State(state): State<AppState>,
    Path(trip_id): Path<TripId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |msg| async move {
        // Lagged receivers drop missed events and continue.
        let event = msg.ok()?;
        if event.trip_id() != Some(trip_id) {
            return None;
        }
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(event.kind()).data(data)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use smartpark_core::{collections, ChangeKind};
use smartpark_shared::ParkingLot;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/lots", get(list_lots))
        .route("/v1/lots/{id}", get(get_lot))
        .route("/v1/lots/{id}/stream", get(stream_lot))
}

/// GET /v1/lots
async fn list_lots(State(state): State<AppState>) -> Result<Json<Vec<ParkingLot>>, AppError> {
    Ok(Json(state.lots.list().await?))
}

/// GET /v1/lots/{id}
async fn get_lot(State(state): State<AppState>, Path(lot_id): Path<String>) -> Result<Json<ParkingLot>, AppError> {
    Ok(Json(state.lots.get(&lot_id).await?))
}

/// GET /v1/lots/{id}/stream
/// Server-sent events carrying the full lot document after every change
async fn stream_lot(
    State(state): State<AppState>,
    Path(lot_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Subscribe before the snapshot so no change falls between the two
    let rx = state.store.subscribe();
    let snapshot = state.lots.get(&lot_id).await?;
    let initial = Event::default().event("lot").json_data(&snapshot).ok();

    let changes = BroadcastStream::new(rx).filter_map(move |result| {
        let lot_id = lot_id.clone();
        async move {
            match result {
                Ok(change) if change.collection == collections::PARKING_LOTS && change.id == lot_id => {
                    match change.kind {
                        ChangeKind::Upserted => change.data.and_then(|doc| Event::default().event("lot").json_data(doc).ok()),
                        ChangeKind::Deleted => Some(Event::default().event("deleted").data(lot_id)),
                    }
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Lot stream lagged");
                    None
                }
            }
        }
    });

    let stream = futures_util::stream::iter(initial).chain(changes).map(Ok);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

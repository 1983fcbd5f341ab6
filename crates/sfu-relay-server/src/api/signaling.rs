//! Offer/answer signaling over plain HTTP
//!
//! The relay never pushes. After an outbound track is added, the client
//! picks up the new offer from `/renegotiate/{peer_id}` and replies on
//! `/answer/{peer_id}`.

use crate::error::Result;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sfu_relay_protocol::{OfferResponse, PeerId, SessionDescription};

pub async fn offer(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SessionDescription>, JsonRejection>,
) -> Result<Json<OfferResponse>> {
    // Registered before the body is read; a bad offer leaves the entry behind
    let participant = state.router.open_participant().await?;
    let Json(offer) = payload?;

    let answer = state.router.accept_offer(&participant, offer).await?;

    Ok(Json(OfferResponse {
        sdp: answer,
        peer_id: participant.id().clone(),
    }))
}

pub async fn renegotiate(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
) -> Result<Response> {
    let peer_id = PeerId::new(peer_id);

    let response = match state.router.poll_renegotiation(&peer_id).await? {
        Some(offer) => {
            tracing::info!("Delivered renegotiation offer to peer {}", peer_id);
            Json(offer).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    };

    Ok(response)
}

pub async fn answer(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    payload: std::result::Result<Json<SessionDescription>, JsonRejection>,
) -> Result<StatusCode> {
    let participant = state.router.lookup(&PeerId::new(peer_id)).await?;
    let Json(answer) = payload?;

    state.router.apply_answer(&participant, answer).await?;
    Ok(StatusCode::OK)
}

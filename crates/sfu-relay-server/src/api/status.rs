use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{extract::State, Json};
use sfu_relay_protocol::{IceServer, IceServersResponse, PeerView, RegistrySlotView};

pub async fn ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    let mut ice_servers = vec![];

    for stun_url in &state.config.stun_servers {
        ice_servers.push(IceServer {
            urls: vec![stun_url.clone()],
            username: None,
            credential: None,
        });
    }

    for turn in &state.config.turn_servers {
        ice_servers.push(IceServer {
            urls: vec![turn.url.clone()],
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
    }

    Json(IceServersResponse { ice_servers })
}

pub async fn peers(State(state): State<AppState>) -> Json<Vec<PeerView>> {
    Json(state.router.peers().await)
}

pub async fn registry(State(state): State<AppState>) -> Result<Json<Vec<RegistrySlotView>>> {
    let kernel = state
        .router
        .kernel()
        .ok_or_else(|| AppError::NotFound("Kernel participant registry is disabled".to_string()))?;

    let slots = kernel.slots().map_err(anyhow::Error::from)?;
    Ok(Json(slots))
}

//! Repository of every active participant

use sfu_relay_protocol::PeerId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::Participant;
use crate::transport::TransportSession;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("participant {0} already exists")]
    DuplicateIdentity(PeerId),

    #[error("participant {0} not found")]
    NotFound(PeerId),
}

/// Participants keyed by identity.
///
/// Entries are never removed, so a snapshot taken for iteration stays valid
/// for as long as the caller holds it.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<Participant>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        id: PeerId,
        session: Arc<dyn TransportSession>,
    ) -> Result<Arc<Participant>, RegistryError> {
        let mut peers = self.peers.write().await;

        match peers.entry(id) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateIdentity(entry.key().clone())),
            Entry::Vacant(entry) => {
                let participant = Arc::new(Participant::new(entry.key().clone(), session));
                entry.insert(participant.clone());
                tracing::info!("Registered participant {}", participant.id());
                Ok(participant)
            }
        }
    }

    pub async fn lookup(&self, id: &PeerId) -> Result<Arc<Participant>, RegistryError> {
        self.peers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Current participants. Insertions after the call are not reflected.
    pub async fn snapshot(&self) -> Vec<Arc<Participant>> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Apply `visitor` to every participant. The registry lock is released
    /// before the first call, so visitors may run alongside insertions.
    pub async fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<Participant>),
    {
        for participant in self.snapshot().await {
            visitor(&participant);
        }
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

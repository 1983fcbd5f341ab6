//! Kernel participant registry sync
//!
//! Mirrors each connected participant's selected remote address into a
//! fixed-size table read by an in-kernel packet classifier. The table is a
//! best-effort side channel: nothing here can block or fail a media session.

mod allocator;
#[cfg(target_os = "linux")]
mod pinned;
mod table;

pub use allocator::{AllocatorError, IndexAllocator};
#[cfg(target_os = "linux")]
pub use pinned::PinnedMapTable;
pub use table::{InMemoryTable, ParticipantTable, SlotRecord, TableError};

use sfu_relay_protocol::{PeerId, RegistrySlotView};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::transport::{ConnectivityState, TransportSession};

/// Open the classifier's pinned table
#[cfg(target_os = "linux")]
pub fn open_pinned_table(path: &Path) -> Result<Arc<dyn ParticipantTable>, TableError> {
    Ok(Arc::new(PinnedMapTable::open(path)?))
}

#[cfg(not(target_os = "linux"))]
pub fn open_pinned_table(path: &Path) -> Result<Arc<dyn ParticipantTable>, TableError> {
    Err(TableError::NotFound {
        path: path.display().to_string(),
        reason: "pinned BPF maps are only available on Linux".to_string(),
    })
}

enum WriteCommand {
    /// Zero every slot below `slots`
    Clear { slots: u32 },
    Put {
        peer: PeerId,
        index: u32,
        record: SlotRecord,
    },
    Flush(oneshot::Sender<()>),
}

/// Drives slot allocation and table writes from connectivity changes.
///
/// Table writes are queued to a single writer task, so a slot cleared on
/// disconnect is always cleared before a later owner's address lands in it.
/// The whole table is zeroed on attach; records left by an earlier run have
/// no owner.
pub struct KernelRegistrySync {
    allocator: IndexAllocator,
    table: Arc<dyn ParticipantTable>,
    writes: mpsc::UnboundedSender<WriteCommand>,
}

impl KernelRegistrySync {
    /// Must be called inside a tokio runtime; spawns the writer task
    pub fn new(table: Arc<dyn ParticipantTable>, slots: u32) -> Self {
        let capacity = table.capacity();
        if slots > capacity {
            tracing::warn!(
                "Requested {} registry slots but the table only holds {}",
                slots,
                capacity
            );
        }

        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(table.clone(), rx));
        if writes.send(WriteCommand::Clear { slots: capacity }).is_err() {
            tracing::error!("Kernel registry writer has stopped; table not cleared");
        }

        Self {
            allocator: IndexAllocator::new(slots.min(capacity)),
            table,
            writes,
        }
    }

    pub fn allocator(&self) -> &IndexAllocator {
        &self.allocator
    }

    pub fn index_of(&self, peer: &PeerId) -> Option<u32> {
        self.allocator.index_of(peer)
    }

    /// React to one connectivity transition of `peer`'s session
    pub async fn on_connectivity_change(
        &self,
        peer: &PeerId,
        session: &dyn TransportSession,
        state: ConnectivityState,
    ) {
        match state {
            ConnectivityState::Connected => self.register(peer, session).await,
            ConnectivityState::Disconnected => self.deregister(peer),
            _ => {}
        }
    }

    async fn register(&self, peer: &PeerId, session: &dyn TransportSession) {
        let Some(addr) = session.selected_remote_address().await else {
            tracing::debug!("[{}] No selected candidate pair yet, skipping registry", peer);
            return;
        };

        let index = match self.allocator.assign(peer) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("[{}] Not added to kernel registry: {}", peer, e);
                return;
            }
        };

        tracing::info!("Peer {} connected from {}, registry slot {}", peer, addr, index);
        self.enqueue(peer.clone(), index, SlotRecord::from_addr(addr));
    }

    fn deregister(&self, peer: &PeerId) {
        let Some(index) = self.allocator.index_of(peer) else {
            tracing::debug!("[{}] No registry slot assigned, skipping delete", peer);
            return;
        };

        self.enqueue(peer.clone(), index, SlotRecord::EMPTY);
        self.allocator.release(peer);
    }

    fn enqueue(&self, peer: PeerId, index: u32, record: SlotRecord) {
        if self
            .writes
            .send(WriteCommand::Put {
                peer,
                index,
                record,
            })
            .is_err()
        {
            tracing::error!("Kernel registry writer has stopped; dropping write to slot {}", index);
        }
    }

    /// Wait until every write queued so far has been applied
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(WriteCommand::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Occupied slots, decoded for display
    pub fn slots(&self) -> Result<Vec<RegistrySlotView>, TableError> {
        Ok(self
            .table
            .occupied()?
            .into_iter()
            .map(|(index, record)| {
                let addr = record.to_addr();
                RegistrySlotView {
                    index,
                    address: addr.ip().to_string(),
                    port: addr.port(),
                }
            })
            .collect())
    }

    /// Log every occupied slot
    pub fn dump(&self) {
        match self.slots() {
            Ok(slots) if slots.is_empty() => tracing::info!("Kernel registry is empty"),
            Ok(slots) => {
                for slot in slots {
                    tracing::info!(
                        "Registry slot {}: participant {}:{}",
                        slot.index,
                        slot.address,
                        slot.port
                    );
                }
            }
            Err(e) => tracing::warn!("Failed to read kernel registry: {}", e),
        }
    }

    /// Re-log the table contents every `interval`
    pub fn spawn_dump_task(self: &Arc<Self>, interval: Duration) {
        let sync = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(sync) = sync.upgrade() else {
                    return;
                };
                sync.dump();
            }
        });
    }
}

async fn run_writer(
    table: Arc<dyn ParticipantTable>,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Put {
                peer,
                index,
                record,
            } => {
                let table = table.clone();
                let result = tokio::task::spawn_blocking(move || table.put(index, record)).await;

                match result {
                    Ok(Ok(())) if record.is_empty() => {
                        tracing::info!("[{}] Removed from kernel registry at slot {}", peer, index)
                    }
                    Ok(Ok(())) => {
                        tracing::info!("[{}] Added to kernel registry at slot {}", peer, index)
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("[{}] Failed to update registry slot {}: {}", peer, index, e)
                    }
                    Err(e) => tracing::error!("Registry write task failed: {}", e),
                }
            }
            WriteCommand::Clear { slots } => {
                let table = table.clone();
                let result = tokio::task::spawn_blocking(move || {
                    (0..slots).try_for_each(|index| table.put(index, SlotRecord::EMPTY))
                })
                .await;

                match result {
                    Ok(Ok(())) => tracing::info!("Cleared {} kernel registry slots", slots),
                    Ok(Err(e)) => tracing::warn!("Failed to clear kernel registry: {}", e),
                    Err(e) => tracing::error!("Registry write task failed: {}", e),
                }
            }
            WriteCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

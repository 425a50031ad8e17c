//! Board hub — per-board actor coordinating subscribers and writes.
//!
//! ARCHITECTURE
//! ============
//! Every active board has exactly one hub task. The hub subscribes once to
//! the store's `objects` and `presence` feeds, holds the set of live client
//! senders, and fans every change batch out to all of them. Mutations are
//! sent to the hub as commands and applied in arrival order on the hub task,
//! which is the serialization point for the board: there is no intra-board
//! reordering under load.
//!
//! A new subscriber's first delivery is the full current object set as
//! `Added` events, assembled from the hub's own cache on the hub task, so it
//! can never interleave with a concurrent commit. Per-object order then
//! follows the store's commit order.
//!
//! Deleting an object cascades to connectors whose endpoint references it.
//! The cascade is best-effort: a connector that survives a failed cascade is
//! hidden at read time because one endpoint is missing.
//!
//! LIFECYCLE
//! =========
//! Hubs are created lazily by the registry and exit when the last subscriber
//! leaves (evicting the board from store memory when it is clean). A command
//! sent to a dead hub fails the send; the registry then recreates the hub.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PresenceConfig;
use crate::model::{self, Fields};
use crate::presence;
use crate::store::{
    BoardId, ChangeEvent, ChangeKind, Collection, DocId, Store, StoreError, Subscription, WriteMode,
};

/// Outbound capacity per subscriber. A client that falls this far behind is
/// disconnected rather than given reordered or dropped events.
const SUBSCRIBER_QUEUE: usize = 256;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("board hub unavailable")]
    Unavailable,
}

impl crate::frame::ErrorCode for HubError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Store(_) => "E_DATABASE",
            Self::Unavailable => "E_HUB_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// One fan-out delivery to a board subscriber.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    Objects(Vec<ChangeEvent>),
    Presence(Vec<ChangeEvent>),
}

/// A serialized object write routed through the hub.
#[derive(Debug)]
pub struct ApplyWrite {
    pub doc_id: DocId,
    pub fields: Fields,
    pub mode: WriteMode,
    pub by: String,
}

enum HubCommand {
    Subscribe {
        client_id: Uuid,
        tx: mpsc::Sender<BoardEvent>,
        ack: oneshot::Sender<()>,
    },
    Unsubscribe {
        client_id: Uuid,
    },
    Apply {
        write: ApplyWrite,
        reply: oneshot::Sender<Result<Fields, StoreError>>,
    },
    DeleteObject {
        doc_id: DocId,
        by: String,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

#[derive(Clone)]
struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Lazily-created map of board hubs. Cheap to clone.
#[derive(Clone)]
pub struct HubRegistry {
    hubs: std::sync::Arc<tokio::sync::RwLock<HashMap<BoardId, HubHandle>>>,
    store: Store,
    presence_cfg: PresenceConfig,
}

impl HubRegistry {
    #[must_use]
    pub fn new(store: Store, presence_cfg: PresenceConfig) -> Self {
        Self { hubs: std::sync::Arc::default(), store, presence_cfg }
    }

    /// Register a client on a board. The client's first delivery on `tx` is
    /// the full object snapshot.
    ///
    /// # Errors
    ///
    /// Fails when the hub cannot be started (store hydration failure).
    pub async fn subscribe(
        &self,
        board_id: BoardId,
        client_id: Uuid,
        tx: mpsc::Sender<BoardEvent>,
    ) -> Result<(), HubError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(board_id, HubCommand::Subscribe { client_id, tx, ack: ack_tx })
            .await?;
        ack_rx.await.map_err(|_| HubError::Unavailable)
    }

    /// Remove a client from a board. No-op when the hub is already gone.
    pub async fn unsubscribe(&self, board_id: BoardId, client_id: Uuid) {
        let handle = {
            let hubs = self.hubs.read().await;
            hubs.get(&board_id).cloned()
        };
        if let Some(handle) = handle {
            let _ = handle.tx.send(HubCommand::Unsubscribe { client_id }).await;
        }
    }

    /// Apply a create/update write on the board's serialization point.
    ///
    /// # Errors
    ///
    /// Propagates store failures; `Unavailable` when the hub cannot start.
    pub async fn apply(&self, board_id: BoardId, write: ApplyWrite) -> Result<Fields, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(board_id, HubCommand::Apply { write, reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| HubError::Unavailable)?.map_err(HubError::from)
    }

    /// Delete an object and cascade to connectors referencing it.
    ///
    /// # Errors
    ///
    /// Propagates store failures; `Unavailable` when the hub cannot start.
    pub async fn delete_object(&self, board_id: BoardId, doc_id: &str, by: &str) -> Result<(), HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(
            board_id,
            HubCommand::DeleteObject { doc_id: doc_id.to_owned(), by: by.to_owned(), reply: reply_tx },
        )
        .await?;
        reply_rx.await.map_err(|_| HubError::Unavailable)?.map_err(HubError::from)
    }

    async fn send(&self, board_id: BoardId, command: HubCommand) -> Result<(), HubError> {
        // Fast path: existing live hub.
        let existing = {
            let hubs = self.hubs.read().await;
            hubs.get(&board_id).cloned()
        };
        let command = match existing {
            Some(handle) => match handle.tx.send(command).await {
                Ok(()) => return Ok(()),
                // Hub exited between lookup and send; fall through to recreate.
                Err(mpsc::error::SendError(cmd)) => cmd,
            },
            None => command,
        };

        let mut hubs = self.hubs.write().await;
        // Re-check under the write lock; another caller may have recreated it.
        if let Some(handle) = hubs.get(&board_id) {
            if handle.tx.send(command).await.is_ok() {
                return Ok(());
            }
            hubs.remove(&board_id);
            return Err(HubError::Unavailable);
        }

        let handle = spawn_hub(self.clone(), board_id).await?;
        handle
            .tx
            .send(command)
            .await
            .map_err(|_| HubError::Unavailable)?;
        hubs.insert(board_id, handle);
        Ok(())
    }

    async fn remove_handle(&self, board_id: BoardId) {
        let mut hubs = self.hubs.write().await;
        hubs.remove(&board_id);
    }

    /// Number of live hubs, for observability and tests.
    pub async fn active_boards(&self) -> usize {
        self.hubs.read().await.len()
    }
}

// =============================================================================
// HUB TASK
// =============================================================================

async fn spawn_hub(registry: HubRegistry, board_id: BoardId) -> Result<HubHandle, HubError> {
    let objects_sub = registry.store.subscribe(board_id, Collection::Objects).await?;
    let presence_sub = registry.store.subscribe(board_id, Collection::Presence).await?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_hub(registry, board_id, rx, objects_sub, presence_sub));
    info!(%board_id, "hub started");
    Ok(HubHandle { tx })
}

async fn run_hub(
    registry: HubRegistry,
    board_id: BoardId,
    mut commands: mpsc::Receiver<HubCommand>,
    mut objects_sub: Subscription,
    mut presence_sub: Subscription,
) {
    let store = registry.store.clone();
    let presence_cfg = registry.presence_cfg;

    let mut subscribers: HashMap<Uuid, mpsc::Sender<BoardEvent>> = HashMap::new();
    // The hub's own view of the object set, maintained from its store feed.
    // Used for new-subscriber snapshots and the connector cascade scan.
    let mut objects: HashMap<DocId, Fields> = HashMap::new();
    let mut presence_docs: HashMap<DocId, Fields> = HashMap::new();
    let mut started = false;

    // The store queues the initial snapshot before returning a subscription;
    // drain both snapshots into the caches before accepting any command so a
    // subscriber that races hub startup still sees the full object set.
    if let Some(events) = objects_sub.rx.recv().await {
        for event in events {
            objects.insert(event.doc_id, event.fields);
        }
    }
    if let Some(events) = presence_sub.rx.recv().await {
        for event in events {
            presence_docs.insert(event.doc_id, event.fields);
        }
    }

    let mut reap = tokio::time::interval(presence_cfg.reap_interval);
    reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    HubCommand::Subscribe { client_id, tx, ack } => {
                        // Read-time hiding: a connector whose endpoint is gone
                        // (failed cascade) is withheld from the snapshot.
                        let snapshot: Vec<ChangeEvent> = objects
                            .iter()
                            .filter(|(_, fields)| {
                                !model::connector_is_dangling(fields, |id| objects.contains_key(id))
                            })
                            .map(|(doc_id, fields)| ChangeEvent {
                                kind: ChangeKind::Added,
                                doc_id: doc_id.clone(),
                                fields: fields.clone(),
                            })
                            .collect();
                        let fresh: Vec<ChangeEvent> = presence_docs
                            .iter()
                            .filter(|(_, fields)| presence::is_fresh(fields, &presence_cfg))
                            .map(|(doc_id, fields)| ChangeEvent {
                                kind: ChangeKind::Added,
                                doc_id: doc_id.clone(),
                                fields: fields.clone(),
                            })
                            .collect();
                        let _ = tx.send(BoardEvent::Objects(snapshot)).await;
                        if !fresh.is_empty() {
                            let _ = tx.send(BoardEvent::Presence(fresh)).await;
                        }
                        subscribers.insert(client_id, tx);
                        started = true;
                        let _ = ack.send(());
                        info!(%board_id, %client_id, clients = subscribers.len(), "client joined board");
                    }
                    HubCommand::Unsubscribe { client_id } => {
                        subscribers.remove(&client_id);
                        info!(%board_id, %client_id, remaining = subscribers.len(), "client left board");
                        if started && subscribers.is_empty() {
                            break;
                        }
                    }
                    HubCommand::Apply { write, reply } => {
                        let result = store
                            .put(board_id, Collection::Objects, &write.doc_id, write.fields, write.mode, &write.by)
                            .await;
                        let _ = reply.send(result);
                    }
                    HubCommand::DeleteObject { doc_id, by, reply } => {
                        let result = store.delete(board_id, Collection::Objects, &doc_id).await;
                        if result.is_ok() {
                            // Scan the store, not the hub cache: events queued
                            // but not yet drained must still be visible here.
                            match store.snapshot(board_id, Collection::Objects).await {
                                Ok(snapshot) => cascade_connectors(&store, board_id, snapshot, &doc_id, &by).await,
                                Err(e) => warn!(error = %e, %board_id, doc_id, "cascade scan failed"),
                            }
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            batch = objects_sub.rx.recv() => {
                let Some(events) = batch else { break };
                for event in &events {
                    match event.kind {
                        ChangeKind::Removed => { objects.remove(&event.doc_id); }
                        ChangeKind::Added | ChangeKind::Modified => {
                            objects.insert(event.doc_id.clone(), event.fields.clone());
                        }
                    }
                }
                if !events.is_empty() {
                    fan_out(&mut subscribers, BoardEvent::Objects(events));
                }
            }
            batch = presence_sub.rx.recv() => {
                let Some(events) = batch else { break };
                for event in &events {
                    match event.kind {
                        ChangeKind::Removed => { presence_docs.remove(&event.doc_id); }
                        ChangeKind::Added | ChangeKind::Modified => {
                            presence_docs.insert(event.doc_id.clone(), event.fields.clone());
                        }
                    }
                }
                if !events.is_empty() {
                    fan_out(&mut subscribers, BoardEvent::Presence(events));
                }
            }
            _ = reap.tick() => {
                presence::reap_stale(&store, board_id, &presence_docs, &presence_cfg).await;
            }
        }
    }

    // Teardown: release the store feeds, drop the registry entry, and evict
    // the board from memory when nothing is waiting to flush.
    store.unsubscribe(board_id, objects_sub.id).await;
    store.unsubscribe(board_id, presence_sub.id).await;
    registry.remove_handle(board_id).await;
    store.evict_if_idle(board_id).await;
    info!(%board_id, "hub stopped");
}

/// Forward one delivery to every subscriber. A subscriber whose queue is
/// full is disconnected: closing its channel beats delivering out of order.
fn fan_out(subscribers: &mut HashMap<Uuid, mpsc::Sender<BoardEvent>>, event: BoardEvent) {
    let mut gone = Vec::new();
    for (client_id, tx) in subscribers.iter() {
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%client_id, "subscriber queue full; disconnecting");
                gone.push(*client_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*client_id),
        }
    }
    for client_id in gone {
        subscribers.remove(&client_id);
    }
}

/// Delete every connector with an endpoint on `deleted_id`. Failures are
/// logged and left for read-time hiding.
async fn cascade_connectors(
    store: &Store,
    board_id: BoardId,
    objects: Vec<(DocId, Fields)>,
    deleted_id: &str,
    by: &str,
) {
    let victims: Vec<DocId> = objects
        .into_iter()
        .filter(|(doc_id, _)| doc_id != deleted_id)
        .filter_map(|(doc_id, fields)| {
            let (from, to) = model::connector_endpoints(&fields)?;
            (from == deleted_id || to == deleted_id).then_some(doc_id)
        })
        .collect();

    for connector_id in victims {
        if let Err(e) = store.delete(board_id, Collection::Objects, &connector_id).await {
            warn!(error = %e, %board_id, connector_id, by, "connector cascade delete failed");
        }
    }
}

/// Subscriber queue capacity, shared with the WS layer.
#[must_use]
pub fn subscriber_queue_capacity() -> usize {
    SUBSCRIBER_QUEUE
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;

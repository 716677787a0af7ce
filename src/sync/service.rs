//! Anti-entropy sync service
//!
//! Serves the inbound protocol, keeps the peer table and runs the monitor loop:
//! every tick computes the local fingerprint once, then visits peers one by one in
//! id order, pinging each and reconciling any peer left in `Mismatch` before moving
//! on to the next.

use super::client::{Connector, PeerClient, Registration};
use super::peer::{Peer, PeerInfo, PeerStatus, PeerView, PingOutcome};
use crate::error::ApiError;
use crate::state::SharedState;
use crate::transport::{RemoteError, Request, Response};
use crate::types::Hash;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Sync timing
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between monitor ticks
    pub interval: Duration,
    /// Bound on every outbound call
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one reconciliation against one peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub state_fetched: bool,
    pub buckets_updated: usize,
    pub items_stored: usize,
    /// Fetched items dropped because the local copy was newer
    pub items_skipped: usize,
    /// Remote buckets that could not be mirrored, e.g. over a claimed canonical path
    pub buckets_skipped: usize,
    pub failures: usize,
}

impl ReconcileReport {
    /// The peer's state was fetched and every correction applied
    pub fn is_complete(&self) -> bool {
        self.state_fetched && self.failures == 0 && self.buckets_skipped == 0
    }
}

/// What happened to one peer during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerVisit {
    pub peer_id: String,
    /// Status right after the ping
    pub after_ping: PeerStatus,
    pub reconciliation: Option<ReconcileReport>,
    /// Status at the end of the visit
    pub status: PeerStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub visits: Vec<PeerVisit>,
    /// Shutdown was requested before every peer was visited
    pub interrupted: bool,
}

impl TickReport {
    pub fn visit(&self, peer_id: &str) -> Option<&PeerVisit> {
        self.visits.iter().find(|v| v.peer_id == peer_id)
    }
}

pub struct SyncService {
    me: PeerInfo,
    state: SharedState,
    connector: Arc<dyn Connector>,
    peers: RwLock<BTreeMap<String, Peer>>,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(
        me: PeerInfo,
        state: SharedState,
        connector: Arc<dyn Connector>,
        config: SyncConfig,
    ) -> Self {
        Self {
            me,
            state,
            connector,
            peers: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.me.id
    }

    pub fn address(&self) -> &str {
        &self.me.address
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Known peers in id order
    pub fn peers(&self) -> Vec<PeerView> {
        self.peers.read().values().map(PeerView::from).collect()
    }

    pub fn peer_status(&self, peer_id: &str) -> Option<PeerStatus> {
        self.peers.read().get(peer_id).map(|p| p.status)
    }

    // Inbound

    /// Serve one inbound request; failures become `Response::Error`
    pub async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Ping => {
                let fingerprint = self.state.read().fingerprint();
                fingerprint.map(|fingerprint| Response::Pong { fingerprint })
            }
            Request::Register(caller) => self
                .handle_register(caller)
                .await
                .map(|r| Response::Registered {
                    id: r.id,
                    peers: r.peers,
                }),
            Request::GetState => {
                let snapshot = self.state.read().snapshot();
                Ok(Response::State {
                    buckets: snapshot.buckets,
                })
            }
            Request::GetPeers => Ok(Response::Peers(self.peers())),
            Request::GetItem { bucket_id, item_id } => {
                let item = self.state.read().get_item(&bucket_id, &item_id);
                item.map(Response::Item)
            }
        };

        result.unwrap_or_else(|e| {
            debug!(error = %e, "Request failed");
            Response::Error(RemoteError::from(&e))
        })
    }

    /// Add the caller unless it is this node or already known; reply with this node's
    /// id and the peers known before the call, minus the caller
    pub async fn handle_register(&self, caller: PeerInfo) -> Result<Registration, ApiError> {
        let known: Vec<PeerInfo> = self
            .peers
            .read()
            .values()
            .filter(|p| p.info.id != caller.id)
            .map(|p| p.info.clone())
            .collect();

        if caller.id != self.me.id && !self.is_known(&caller.id) {
            let client = self.connector.connect(&caller.address).await?;
            self.add_peer(caller, client);
        }

        Ok(Registration {
            id: self.me.id.clone(),
            peers: known,
        })
    }

    // Membership

    /// Register with `address`, then with every peer it reports that this node does
    /// not know yet
    ///
    /// Only a failure against `address` itself is returned; failures on the addresses
    /// learned along the way are logged. Returns the number of peers added.
    pub async fn register(&self, address: &str) -> Result<usize, ApiError> {
        let mut queue = VecDeque::from([address.to_string()]);
        let mut visited = HashSet::new();
        let mut added = 0;

        while let Some(next) = queue.pop_front() {
            if next == self.me.address || !visited.insert(next.clone()) {
                continue;
            }
            let primary = next == address;

            match self.register_with(&next).await {
                Ok((registration, is_new)) => {
                    if is_new {
                        added += 1;
                    }
                    for peer in registration.peers {
                        if peer.id != self.me.id && !self.is_known(&peer.id) {
                            queue.push_back(peer.address);
                        }
                    }
                }
                Err(e) if primary => return Err(e),
                Err(e) => {
                    warn!(address = %next, error = %e, "Failed to register with gossiped peer");
                }
            }
        }

        Ok(added)
    }

    async fn register_with(&self, address: &str) -> Result<(Registration, bool), ApiError> {
        let client = self.connector.connect(address).await?;
        let registration = self
            .bounded(client.register(self.me.clone()))
            .await?;

        if registration.id == self.me.id {
            return Ok((registration, false));
        }
        let info = PeerInfo::new(registration.id.clone(), address);
        let is_new = self.add_peer(info, client);
        Ok((registration, is_new))
    }

    fn add_peer(&self, info: PeerInfo, client: Arc<dyn PeerClient>) -> bool {
        let mut peers = self.peers.write();
        if peers.contains_key(&info.id) {
            return false;
        }
        info!(peer_id = %info.id, address = %info.address, "Added peer");
        peers.insert(info.id.clone(), Peer::new(info, client));
        true
    }

    fn is_known(&self, peer_id: &str) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    fn set_status(&self, peer_id: &str, status: PeerStatus) {
        if let Some(peer) = self.peers.write().get_mut(peer_id) {
            peer.status = status;
        }
    }

    // Monitor

    /// Run one monitor tick over every known peer
    pub async fn tick(&self) -> TickReport {
        self.run_tick(None).await
    }

    /// Run one tick that stops before the next peer once `stop` reads `true`
    ///
    /// This is the tick the monitor loop runs; the peer being visited when `stop` flips
    /// is always finished.
    pub async fn tick_until(&self, stop: &watch::Receiver<bool>) -> TickReport {
        self.run_tick(Some(stop)).await
    }

    /// Spawn the monitor loop
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(receiver).await });
        MonitorHandle { shutdown, task }
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let stop = shutdown.clone();
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            node_id = %self.me.id,
            interval_ms = self.config.interval.as_millis() as u64,
            "Sync monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_tick(Some(&stop)).await;
                    if report.interrupted {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(node_id = %self.me.id, "Sync monitor stopped");
    }

    async fn run_tick(&self, stop: Option<&watch::Receiver<bool>>) -> TickReport {
        let mut report = TickReport::default();

        let fingerprint = self.state.read().fingerprint();
        let local = match fingerprint {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!(error = %e, "Failed to compute local fingerprint; skipping tick");
                return report;
            }
        };

        let peers: Vec<Peer> = self.peers.read().values().cloned().collect();
        for peer in peers {
            if stop.map_or(false, |s| *s.borrow()) {
                report.interrupted = true;
                break;
            }
            report.visits.push(self.visit(&peer, &local).await);
        }

        debug!(peers = report.visits.len(), "Sync tick finished");
        report
    }

    async fn visit(&self, peer: &Peer, local: &Hash) -> PeerVisit {
        let outcome = match self.bounded(peer.client.ping()).await {
            Ok(remote) if &remote == local => PingOutcome::Matched,
            Ok(_) => PingOutcome::Mismatched,
            Err(e) => {
                debug!(peer_id = %peer.info.id, address = %peer.info.address, error = %e, "Ping failed");
                PingOutcome::Failed
            }
        };

        let previous = self.peer_status(&peer.info.id).unwrap_or(peer.status);
        let after_ping = previous.after_ping(outcome);
        log_transition(peer, previous, after_ping);
        self.set_status(&peer.info.id, after_ping);

        let mut visit = PeerVisit {
            peer_id: peer.info.id.clone(),
            after_ping,
            reconciliation: None,
            status: after_ping,
        };

        if after_ping == PeerStatus::Mismatch {
            let reconciliation = self.reconcile(peer).await;
            if reconciliation.is_complete() {
                visit.status = PeerStatus::Ok;
                self.set_status(&peer.info.id, PeerStatus::Ok);
                debug!(peer_id = %peer.info.id, "Reconciliation complete");
            } else {
                warn!(
                    peer_id = %peer.info.id,
                    failures = reconciliation.failures,
                    buckets_skipped = reconciliation.buckets_skipped,
                    "Reconciliation incomplete; retrying next tick"
                );
            }
            visit.reconciliation = Some(reconciliation);
        }

        visit
    }

    /// Pull the peer's state and apply every correction it implies
    ///
    /// Failures are counted per bucket or item and never stop the remaining work.
    pub async fn reconcile(&self, peer: &Peer) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let remote = match self.bounded(peer.client.get_state()).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(peer_id = %peer.info.id, address = %peer.info.address, error = %e, "Failed to fetch peer state");
                report.failures += 1;
                return report;
            }
        };
        report.state_fetched = true;

        let diffs = self.state.write().diff(&remote);
        let diffs = match diffs {
            Ok(diffs) => diffs,
            Err(e) => {
                warn!(peer_id = %peer.info.id, error = %e, "Failed to diff against peer state");
                report.failures += 1;
                return report;
            }
        };

        report.buckets_skipped = diffs.skipped.len();
        for (bucket_id, diff) in diffs.buckets {
            if let Some(record) = diff.metadata {
                let applied = self.state.write().apply_bucket_metadata(&record);
                match applied {
                    Ok(()) => report.buckets_updated += 1,
                    Err(e) => {
                        warn!(peer_id = %peer.info.id, bucket_id = %bucket_id, error = %e, "Failed to apply bucket metadata");
                        report.failures += 1;
                    }
                }
            }

            for summary in diff.content {
                let item_id = match String::from_utf8(summary.id) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(peer_id = %peer.info.id, bucket_id = %bucket_id, error = %e, "Skipping item with non-utf8 id");
                        report.failures += 1;
                        continue;
                    }
                };

                let fetched = self
                    .bounded(peer.client.get_item(&bucket_id, &item_id))
                    .await
                    .and_then(|item| {
                        if item.id == item_id {
                            Ok(item)
                        } else {
                            Err(ApiError::Transport(format!(
                                "asked for item {}, peer sent {}",
                                item_id, item.id
                            )))
                        }
                    });
                let stored = fetched.and_then(|item| self.state.write().store_remote_item(&bucket_id, &item));
                match stored {
                    Ok(true) => report.items_stored += 1,
                    Ok(false) => report.items_skipped += 1,
                    Err(e) => {
                        warn!(
                            peer_id = %peer.info.id,
                            bucket_id = %bucket_id,
                            item_id = %item_id,
                            error = %e,
                            "Failed to reconcile item"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        info!(
            peer_id = %peer.info.id,
            buckets_updated = report.buckets_updated,
            items_stored = report.items_stored,
            buckets_skipped = report.buckets_skipped,
            failures = report.failures,
            "Reconciled with peer"
        );
        report
    }

    /// Bound an outbound call by the request timeout
    async fn bounded<T, F>(&self, call: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        timeout(self.config.request_timeout, call)
            .await
            .map_err(|_| {
                ApiError::Transport(format!(
                    "call timed out after {:?}",
                    self.config.request_timeout
                ))
            })?
    }
}

fn log_transition(peer: &Peer, from: PeerStatus, to: PeerStatus) {
    match (from, to) {
        (PeerStatus::Down, PeerStatus::Down) => {}
        (_, PeerStatus::Down) => {
            info!(peer_id = %peer.info.id, address = %peer.info.address, "Peer is down");
        }
        (PeerStatus::Down, _) => {
            info!(peer_id = %peer.info.id, address = %peer.info.address, status = %to, "Peer is back up");
        }
        (PeerStatus::Ok, PeerStatus::Mismatch) => {
            info!(peer_id = %peer.info.id, "Peer state differs; reconciling");
        }
        _ => {}
    }
}

/// Handle to a running monitor loop
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop and wait for it; the loop stops after the peer it is visiting
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync monitor task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

//! Inbound dispatch, gossip and catch-up.
//!
//! Every exchange is one frame on a fresh connection: connect, send, close.
//! Inbound connections are served by a bounded set of tasks; all chain
//! mutations go through the [`Engine`] lock.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::message::{read_frame, write_frame, Envelope, Message};
use super::peers::PeerDirectory;
use crate::blockchain::{Block, Transaction};
use crate::config::NetworkConfig;
use crate::consensus::{BlockOutcome, Engine};
use crate::error::{AdmissionError, ConsensusError, NetError};

/// Blocks buffered per peer while assembling a competing chain.
const MAX_FORK_BUFFER: usize = 10_000;
/// Blocks held until their parent arrives.
const MAX_ORPHANS: usize = 1_024;

pub struct Node {
    engine: Arc<Engine>,
    peers: PeerDirectory,
    config: NetworkConfig,
    advertised: String,
    workers: Arc<Semaphore>,
    forks: Mutex<HashMap<String, BTreeMap<u64, Block>>>,
    orphans: Mutex<BTreeMap<u64, Block>>,
    /// Start index and time of the last `getblocks` sent to each peer.
    catch_ups: DashMap<String, (u64, Instant)>,
}

impl Node {
    /// Binds the listener and seeds the directory with bootstrap peers. The
    /// advertised endpoint defaults to the bound address.
    pub async fn bind(
        engine: Arc<Engine>,
        config: NetworkConfig,
    ) -> Result<(Arc<Self>, TcpListener), NetError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let local = listener.local_addr()?;
        let advertised = config.advertised(local);

        let peers = PeerDirectory::new(advertised.clone(), &config);
        for peer in &config.bootstrap_peers {
            if let Err(e) = peers.add_peer(peer) {
                tracing::warn!(peer = %peer, error = %e, "skipping bootstrap peer");
            }
        }

        tracing::info!(listen = %local, advertised = %advertised, "node listening");
        let node = Arc::new(Self {
            engine,
            peers,
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            advertised,
            forks: Mutex::new(HashMap::new()),
            orphans: Mutex::new(BTreeMap::new()),
            catch_ups: DashMap::new(),
        });
        Ok((node, listener))
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    pub fn advertised(&self) -> &str {
        &self.advertised
    }

    /// Accept loop. Runs until the worker semaphore is closed.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
                return;
            };
            let (stream, remote) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let node = Arc::clone(&self);
            tokio::spawn(async move {
                node.handle_connection(stream, remote).await;
                drop(permit);
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, remote: SocketAddr) {
        let frame = timeout(
            self.config.io_timeout(),
            read_frame(&mut stream, self.config.max_frame_bytes),
        )
        .await;
        match frame {
            Ok(Ok(envelope)) => self.dispatch(envelope, remote).await,
            Ok(Err(e)) => tracing::warn!(remote = %remote, error = %e, "dropping inbound frame"),
            Err(_) => tracing::warn!(remote = %remote, "timed out reading inbound frame"),
        }
    }

    /// Handles one decoded message received over a connection from `remote`.
    ///
    /// `envelope.from` is only trusted once its host resolves to the
    /// connection's source address; bans, rate limits and replies are all
    /// keyed on it.
    pub async fn dispatch(&self, envelope: Envelope, remote: SocketAddr) {
        let Envelope {
            from,
            height,
            message,
        } = envelope;
        if from == self.advertised {
            return;
        }
        if !self.is_origin(&from, remote).await {
            tracing::warn!(peer = %from, remote = %remote, kind = message.kind(), "sender does not match connection origin");
            return;
        }
        if self.peers.is_blocked(&from) {
            tracing::warn!(peer = %from, kind = message.kind(), "refusing message from blocked peer");
            return;
        }
        if let Err(e) = self.peers.check_rate(&from) {
            tracing::warn!(peer = %from, error = %e, "dropping message");
            self.peers.report_misbehavior(&from, "rate limit exceeded");
            return;
        }
        tracing::debug!(peer = %from, kind = message.kind(), height, "message received");

        match message {
            Message::Tx { tx } => self.on_transaction(&from, tx).await,
            Message::Block { block } => self.on_block(&from, block, height).await,
            Message::Peers { peers } => self.on_peers(&from, peers),
            Message::GetPeers => {
                let peers = self.peer_list();
                self.send_logged(&from, Message::Peers { peers }).await;
            }
            Message::GetBlocks { from_index } => self.send_blocks(&from, from_index).await,
        }

        let next = self.catch_up_index(&from);
        if height > next {
            self.request_blocks(&from, next).await;
        }
    }

    async fn is_origin(&self, from: &str, remote: SocketAddr) -> bool {
        let source = remote.ip().to_canonical();
        match timeout(self.config.io_timeout(), tokio::net::lookup_host(from)).await {
            Ok(Ok(mut addrs)) => addrs.any(|addr| addr.ip().to_canonical() == source),
            _ => false,
        }
    }

    async fn on_transaction(&self, from: &str, tx: Transaction) {
        match self.engine.submit_transaction(tx.clone()) {
            Ok(id) => {
                tracing::debug!(peer = %from, id = %id, "relayed transaction admitted");
                self.peers.reward_peer(from);
                self.broadcast(Message::Tx { tx }, Some(from)).await;
            }
            Err(AdmissionError::Duplicate(_)) => {}
            Err(e @ (AdmissionError::InvalidSignature(_) | AdmissionError::AddressMismatch { .. })) => {
                tracing::warn!(peer = %from, error = %e, "forged transaction");
                self.peers.report_misbehavior(from, "forged transaction");
            }
            Err(e) => tracing::debug!(peer = %from, error = %e, "relayed transaction refused"),
        }
    }

    async fn on_block(&self, from: &str, block: Block, height: u64) {
        let index = block.index;
        match self.engine.accept_block(block.clone()) {
            Ok(BlockOutcome::Appended) => {
                self.peers.reward_peer(from);
                self.broadcast(Message::Block { block }, Some(from)).await;
                self.connect_orphans();
            }
            Ok(BlockOutcome::Known) => {}
            Ok(BlockOutcome::Ahead { local_height }) => {
                tracing::debug!(peer = %from, index, local_height, "block ahead of tip");
                if self.has_fork(from) {
                    self.absorb_fork_block(from, block.clone(), height).await;
                }
                // The peer may have rejoined our chain since its fork.
                self.stash_orphan(block);
            }
            Ok(BlockOutcome::Forked) => self.absorb_fork_block(from, block, height).await,
            Err(e @ (ConsensusError::Validation(_) | ConsensusError::Settlement(_))) => {
                tracing::warn!(peer = %from, index, error = %e, "rejected block");
                self.peers.report_misbehavior(from, "invalid block");
            }
            Err(e) => tracing::warn!(peer = %from, index, error = %e, "could not apply block"),
        }
    }

    fn on_peers(&self, from: &str, peers: Vec<String>) {
        for peer in peers {
            match self.peers.add_peer(&peer) {
                Ok(true) => tracing::debug!(peer = %peer, via = %from, "learned peer"),
                Ok(false) => {}
                Err(e) => tracing::debug!(peer = %peer, via = %from, error = %e, "ignored advertised peer"),
            }
        }
    }

    fn stash_orphan(&self, block: Block) {
        let mut orphans = self.orphans.lock();
        if orphans.len() >= MAX_ORPHANS && !orphans.contains_key(&block.index) {
            return;
        }
        orphans.insert(block.index, block);
    }

    /// Appends held blocks that now extend the tip.
    fn connect_orphans(&self) {
        loop {
            let next = {
                let mut orphans = self.orphans.lock();
                let height = self.engine.height();
                orphans.retain(|index, _| *index >= height);
                orphans.remove(&height)
            };
            let Some(block) = next else {
                return;
            };
            let index = block.index;
            match self.engine.accept_block(block) {
                Ok(BlockOutcome::Appended) => tracing::debug!(index, "orphan connected"),
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!(index, error = %e, "discarding orphan");
                    return;
                }
            }
        }
    }

    fn has_fork(&self, peer: &str) -> bool {
        self.forks.lock().contains_key(peer)
    }

    /// Buffers a block from a competing chain and retries fork choice with
    /// the longest contiguous run the buffer now holds.
    async fn absorb_fork_block(&self, peer: &str, block: Block, peer_height: u64) {
        let (walk_back, candidate) = {
            let mut forks = self.forks.lock();
            let buffer = forks.entry(peer.to_string()).or_default();
            let fresh = buffer.is_empty();
            buffer.insert(block.index, block);
            if buffer.len() > MAX_FORK_BUFFER {
                forks.remove(peer);
                tracing::warn!(peer = %peer, "fork buffer overflow, discarding");
                return;
            }
            (fresh && !self.grafts(buffer), self.assemble_fork(buffer))
        };

        if walk_back {
            // The common ancestor lies below the first buffered block.
            self.request_blocks(peer, 1).await;
        }

        match self.engine.resolve_fork(candidate) {
            Ok(true) => {
                self.forks.lock().remove(peer);
                self.peers.reward_peer(peer);
                tracing::info!(peer = %peer, height = self.engine.height(), "switched to peer chain");
                self.connect_orphans();
            }
            Ok(false) => self.retire_declined_fork(peer, peer_height),
            Err(e) => {
                self.forks.lock().remove(peer);
                tracing::warn!(peer = %peer, error = %e, "peer chain could not be replayed");
                if matches!(e, ConsensusError::Validation(_) | ConsensusError::Settlement(_)) {
                    self.peers.report_misbehavior(peer, "invalid fork");
                }
            }
        }
    }

    /// Drops a buffered chain that attaches to ours, already runs up to the
    /// peer's advertised height and still lost fork choice.
    fn retire_declined_fork(&self, peer: &str, peer_height: u64) {
        let mut forks = self.forks.lock();
        let complete = forks
            .get(peer)
            .is_some_and(|buffer| self.grafts(buffer) && frontier(buffer) >= peer_height);
        if complete {
            forks.remove(peer);
            tracing::debug!(peer = %peer, peer_height, "peer chain declined, buffer dropped");
        }
    }

    /// Whether the lowest buffered block links to the local block below it.
    fn grafts(&self, buffer: &BTreeMap<u64, Block>) -> bool {
        let Some((&first, block)) = buffer.iter().next() else {
            return false;
        };
        first
            .checked_sub(1)
            .and_then(|parent| self.engine.hash_at(parent))
            .is_some_and(|hash| hash == block.previous_hash)
    }

    fn assemble_fork(&self, buffer: &BTreeMap<u64, Block>) -> Vec<Block> {
        let Some(&first) = buffer.keys().next() else {
            return Vec::new();
        };
        let mut chain = self.engine.chain_from(0);
        chain.truncate(usize::try_from(first).unwrap_or(usize::MAX));
        for (expected, (index, block)) in (first..).zip(buffer) {
            if *index != expected {
                break;
            }
            chain.push(block.clone());
        }
        chain
    }

    /// Where the next `getblocks` to `peer` should start: past the buffered
    /// run of its fork, from the first block when that run does not yet
    /// attach to our chain, or at our own tip.
    fn catch_up_index(&self, peer: &str) -> u64 {
        let forks = self.forks.lock();
        match forks.get(peer) {
            Some(buffer) if self.grafts(buffer) => frontier(buffer),
            Some(_) => 1,
            None => self.engine.height(),
        }
    }

    async fn request_blocks(&self, peer: &str, from_index: u64) {
        let now = Instant::now();
        let cooldown = self.config.io_timeout();
        // A recent request from a lower index already covers this one.
        let recent = self.catch_ups.get(peer).is_some_and(|last| {
            let (index, at) = *last;
            index <= from_index && now.duration_since(at) < cooldown
        });
        if recent {
            return;
        }
        self.catch_ups.insert(peer.to_string(), (from_index, now));
        tracing::info!(peer = %peer, from_index, "requesting catch-up");
        self.send_logged(peer, Message::GetBlocks { from_index }).await;
    }

    async fn send_blocks(&self, peer: &str, from_index: u64) {
        let blocks = self.engine.chain_from(from_index);
        tracing::debug!(peer = %peer, from_index, count = blocks.len(), "serving blocks");
        for block in blocks {
            if let Err(e) = self.send_to(peer, Message::Block { block }).await {
                tracing::warn!(peer = %peer, error = %e, "catch-up transfer aborted");
                break;
            }
        }
    }

    fn peer_list(&self) -> Vec<String> {
        let mut peers = self.peers.list();
        peers.push(self.advertised.clone());
        peers
    }

    /// One connect-send-close exchange, bounded by the configured timeouts.
    pub async fn send_to(&self, peer: &str, message: Message) -> Result<(), NetError> {
        let envelope = Envelope {
            from: self.advertised.clone(),
            height: self.engine.height(),
            message,
        };
        let mut stream = timeout(self.config.connect_timeout(), TcpStream::connect(peer))
            .await
            .map_err(|_| NetError::Timeout(peer.to_string()))??;
        timeout(
            self.config.io_timeout(),
            write_frame(&mut stream, &envelope, self.config.max_frame_bytes),
        )
        .await
        .map_err(|_| NetError::Timeout(peer.to_string()))??;
        stream.shutdown().await?;
        Ok(())
    }

    async fn send_logged(&self, peer: &str, message: Message) {
        let kind = message.kind();
        if let Err(e) = self.send_to(peer, message).await {
            tracing::warn!(peer = %peer, kind, error = %e, "send failed");
        }
    }

    /// Sends `message` to every active peer except `except`. Returns the
    /// number of peers reached.
    pub async fn broadcast(&self, message: Message, except: Option<&str>) -> usize {
        let targets: Vec<String> = self
            .peers
            .list()
            .into_iter()
            .filter(|peer| Some(peer.as_str()) != except)
            .collect();
        let results = join_all(targets.iter().map(|peer| self.send_to(peer, message.clone()))).await;

        let mut delivered = 0;
        for (peer, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(peer = %peer, kind = message.kind(), error = %e, "gossip failed"),
            }
        }
        delivered
    }

    /// Admits a locally submitted transaction and gossips it.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<String, AdmissionError> {
        let id = self.engine.submit_transaction(tx.clone())?;
        self.broadcast(Message::Tx { tx }, None).await;
        Ok(id)
    }

    pub async fn announce_block(&self, block: Block) -> usize {
        tracing::info!(index = block.index, hash = %block.hash, "announcing block");
        self.broadcast(Message::Block { block }, None).await
    }

    /// Shares our peer list and asks every peer for theirs.
    pub async fn discover_peers(&self) {
        let peers = self.peer_list();
        self.broadcast(Message::Peers { peers }, None).await;
        self.broadcast(Message::GetPeers, None).await;
    }

    pub async fn run_discovery(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.discovery_interval_secs.max(1)));
        loop {
            ticker.tick().await;
            self.discover_peers().await;
        }
    }

    /// Produces a block whenever the mempool has work, every `every`.
    pub async fn run_producer(self: Arc<Self>, miner: String, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if !self.engine.has_pending() {
                continue;
            }
            let engine = Arc::clone(&self.engine);
            let miner = miner.clone();
            match tokio::task::spawn_blocking(move || engine.produce_block(&miner)).await {
                Ok(Ok(block)) => {
                    self.announce_block(block).await;
                }
                Ok(Err(e)) => tracing::info!(error = %e, "block production skipped"),
                Err(e) => tracing::error!(error = %e, "producer task failed"),
            }
        }
    }
}

/// First index past the contiguous run that starts at the lowest buffered
/// block.
fn frontier(buffer: &BTreeMap<u64, Block>) -> u64 {
    let Some(&first) = buffer.keys().next() else {
        return 0;
    };
    let mut next = first;
    while buffer.contains_key(&next) {
        next += 1;
    }
    next
}

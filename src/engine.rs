//! The DHT engine.
//!
//! An [`Engine`] owns the transport, the routing table, the value store and
//! the response router, and wires them into a node: inbound datagrams are
//! decoded and dispatched, `save`/`load` run the iterative protocol walks,
//! and `bootstrap` joins an existing network through one known peer.
//!
//! # Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//! use rkad::{Engine, EngineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(
//!     Engine::bind(EngineConfig {
//!         initial_peer: Some("bootstrap.example.net:27980".into()),
//!         ..Default::default()
//!     })
//!     .await?,
//! );
//!
//! // Drive reception, then join the network.
//! let runner = {
//!     let engine = engine.clone();
//!     tokio::spawn(async move { engine.run().await })
//! };
//! engine.bootstrap().await?;
//!
//! engine.save(b"greeting", b"hello").await?;
//! let value = engine.load(b"greeting").await?;
//! assert_eq!(&value[..], b"hello");
//!
//! engine.abort();
//! runner.await?.ok();
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::Error;
use crate::id::Id;
use crate::message::{
    encode_datagram, Body, FindPeerRequest, FindPeerResponse, FindValueRequest, FindValueResponse,
    Header, MessageKind, PingResponse, StoreRequest,
};
use crate::router::{Reply, ResponseRouter};
use crate::routing::{RoutingTable, K};
use crate::store::ValueStore;
use crate::task;
use crate::transport::{self, Transport, MAX_DATAGRAM_SIZE};

/// Default UDP port of the protocol.
pub const DEFAULT_PORT: u16 = 27980;

/// Configuration for [`Engine::bind`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// IPv4 listen endpoint as `"host:port"`.
    pub listen_v4: String,
    /// IPv6 listen endpoint as `"host:port"`.
    pub listen_v6: String,
    /// Peer to join the network through. `None` starts a standalone node
    /// that only serves inbound traffic until peers contact it.
    pub initial_peer: Option<String>,
    /// Fixed local identifier; random when `None`.
    pub id: Option<Id>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_v4: format!("0.0.0.0:{DEFAULT_PORT}"),
            listen_v6: format!("[::]:{DEFAULT_PORT}"),
            initial_peer: None,
            id: None,
        }
    }
}

/// State shared between the receive loop and the protocol walks.
pub(crate) struct Shared {
    id: Id,
    pub(crate) transport: Transport,
    pub(crate) router: ResponseRouter,
    pub(crate) table: RoutingTable,
    pub(crate) store: ValueStore,
    local_v4: SocketAddr,
    local_v6: SocketAddr,
}

impl Shared {
    /// This node's own endpoints; iterative walks skip candidates that
    /// advertise one of them.
    pub(crate) fn local_addrs(&self) -> Vec<SocketAddr> {
        vec![self.local_v4, self.local_v6]
    }

    /// Sends a request with a fresh token and waits up to `ttl` for the
    /// matching response.
    pub(crate) async fn send_request<B: Body>(
        &self,
        body: &B,
        to: SocketAddr,
        ttl: Duration,
    ) -> Result<Reply, Error> {
        let token = Id::random();
        let pending = self.router.register(token);

        let datagram = encode_datagram(&self.id, &token, body);
        self.transport.send(&datagram, to).await?;

        pending.wait(ttl).await
    }

    /// Sends a request nobody waits on; STORE has no acknowledgement.
    pub(crate) async fn send_notification<B: Body>(
        &self,
        body: &B,
        to: SocketAddr,
    ) -> std::io::Result<()> {
        let token = Id::random();
        let datagram = encode_datagram(&self.id, &token, body);
        self.transport.send(&datagram, to).await
    }

    async fn send_response<B: Body>(&self, token: &Id, body: &B, to: SocketAddr) {
        let datagram = encode_datagram(&self.id, token, body);
        if let Err(e) = self.transport.send(&datagram, to).await {
            debug!("failed to send {:?} to '{}': {}", B::KIND, to, e);
        }
    }

    pub(crate) async fn handle_datagram(&self, datagram: &[u8], sender: SocketAddr) {
        let mut input = datagram;
        let header = match Header::decode(&mut input) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping malformed datagram from '{}': {}", sender, e);
                return;
            }
        };

        // Whoever spoke to us is a live peer worth routing through.
        self.table.push(header.source, sender);

        match header.kind {
            MessageKind::PingRequest => {
                debug!("handling ping request from '{}'", sender);
                self.send_response(&header.token, &PingResponse, sender).await;
            }
            MessageKind::StoreRequest => self.handle_store_request(input, sender),
            MessageKind::FindPeerRequest => {
                self.handle_find_peer_request(&header, input, sender).await
            }
            MessageKind::FindValueRequest => {
                self.handle_find_value_request(&header, input, sender).await
            }
            MessageKind::PingResponse
            | MessageKind::FindPeerResponse
            | MessageKind::FindValueResponse => {
                let _ = self
                    .router
                    .dispatch(sender, header, Bytes::copy_from_slice(input));
            }
        }
    }

    fn handle_store_request(&self, mut input: &[u8], sender: SocketAddr) {
        match StoreRequest::decode(&mut input) {
            Ok(request) => {
                debug!("storing '{}' for '{}'", request.key, sender);
                self.store.put(request.key, request.value);
            }
            Err(e) => debug!("failed to decode store request: {}", e),
        }
    }

    async fn handle_find_peer_request(&self, header: &Header, mut input: &[u8], sender: SocketAddr) {
        let request = match FindPeerRequest::decode(&mut input) {
            Ok(request) => request,
            Err(e) => {
                debug!("failed to decode find peer request: {}", e);
                return;
            }
        };
        self.send_closest_peers(header, &request.target, sender).await;
    }

    async fn handle_find_value_request(
        &self,
        header: &Header,
        mut input: &[u8],
        sender: SocketAddr,
    ) {
        let request = match FindValueRequest::decode(&mut input) {
            Ok(request) => request,
            Err(e) => {
                debug!("failed to decode find value request: {}", e);
                return;
            }
        };

        match self.store.get(&request.target) {
            Some(value) => {
                debug!("serving value '{}' to '{}'", request.target, sender);
                self.send_response(&header.token, &FindValueResponse { value }, sender)
                    .await;
            }
            None => self.send_closest_peers(header, &request.target, sender).await,
        }
    }

    /// Answers with up to K peers closest to `target`, never including the
    /// requester itself.
    async fn send_closest_peers(&self, header: &Header, target: &Id, sender: SocketAddr) {
        let mut peers = self.table.find(target);
        peers.retain(|p| p.id != header.source);
        peers.truncate(K);

        debug!("answering '{}' with {} peer(s)", sender, peers.len());
        self.send_response(&header.token, &FindPeerResponse { peers }, sender)
            .await;
    }
}

/// A DHT node.
///
/// Construction [binds](Engine::bind) the sockets; [`run`](Engine::run)
/// must be driven (typically on its own task) for any traffic to flow.
/// A node configured with an initial peer holds `save`/`load` callers
/// until [`bootstrap`](Engine::bootstrap) has completed.
pub struct Engine {
    shared: Arc<Shared>,
    initial_peer: Option<String>,
    abort_tx: watch::Sender<bool>,
    initialized_tx: watch::Sender<bool>,
}

impl Engine {
    /// Resolves the listen endpoints and binds both sockets.
    pub async fn bind(config: EngineConfig) -> Result<Self, Error> {
        let v4 = transport::resolve_v4(&config.listen_v4).await?;
        let v6 = transport::resolve_v6(&config.listen_v6).await?;
        let transport = Transport::bind(v4, v6)?;

        let id = config.id.unwrap_or_else(Id::random);
        let local_v4 = transport.local_v4()?;
        let local_v6 = transport.local_v6()?;

        info!(
            "node '{}' listening on '{}' and '{}'",
            id, local_v4, local_v6
        );

        let (abort_tx, _) = watch::channel(false);
        let (initialized_tx, _) = watch::channel(config.initial_peer.is_none());

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                transport,
                router: ResponseRouter::new(),
                table: RoutingTable::new(id),
                store: ValueStore::new(),
                local_v4,
                local_v6,
            }),
            initial_peer: config.initial_peer,
            abort_tx,
            initialized_tx,
        })
    }

    pub fn id(&self) -> &Id {
        &self.shared.id
    }

    pub fn local_v4(&self) -> SocketAddr {
        self.shared.local_v4
    }

    pub fn local_v6(&self) -> SocketAddr {
        self.shared.local_v6
    }

    pub fn peer_count(&self) -> usize {
        self.shared.table.peer_count()
    }

    /// Whether `save`/`load` may proceed; true from the start for a
    /// standalone node, true after [`bootstrap`](Engine::bootstrap)
    /// completes otherwise.
    pub fn is_initialized(&self) -> bool {
        *self.initialized_tx.borrow()
    }

    /// Receives and dispatches datagrams until [`abort`](Engine::abort).
    ///
    /// Returns `RunAborted` on a clean stop; transport failures other than
    /// connection resets end the loop with their error.
    pub async fn run(&self) -> Result<(), Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut abort = self.abort_tx.subscribe();

        loop {
            if *abort.borrow() {
                return Err(Error::RunAborted);
            }

            tokio::select! {
                _ = abort.changed() => {}
                result = self.shared.transport.recv(&mut buf) => {
                    let (len, sender) = result?;
                    self.shared.handle_datagram(&buf[..len], sender).await;
                }
            }
        }
    }

    /// Stops the receive loop; [`run`](Engine::run) resolves with
    /// `RunAborted`.
    pub fn abort(&self) {
        self.abort_tx.send_replace(true);
    }

    /// Joins the network through the configured initial peer: asks it for
    /// our neighborhood, then walks every occupied bucket so its peers
    /// learn about us. Unblocks `save`/`load` on success.
    ///
    /// A standalone node resolves immediately. The receive loop must be
    /// running.
    pub async fn bootstrap(&self) -> Result<(), Error> {
        let Some(initial_peer) = &self.initial_peer else {
            return Ok(());
        };

        let endpoints = transport::resolve(initial_peer).await?;
        info!(
            "bootstrapping from '{}' ({} endpoint(s))",
            initial_peer,
            endpoints.len()
        );
        task::discover::run(&self.shared, endpoints).await?;

        // Make this node known to the peers of every occupied bucket.
        let walks: Vec<_> = self
            .shared
            .table
            .occupied_buckets()
            .into_iter()
            .map(|bucket| {
                let target = task::notify::refresh_target(&self.shared.id, bucket);
                task::notify::run(&self.shared, target)
            })
            .collect();
        futures::future::join_all(walks).await;

        self.initialized_tx.send_replace(true);
        info!("bootstrap complete, {} peer(s) known", self.peer_count());
        Ok(())
    }

    /// Stores `value` under `key`: locally, and replicated onto the
    /// network peers closest to the key's identifier.
    pub async fn save(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.wait_initialized().await?;

        let key = Id::from_key(key);
        let value = Bytes::copy_from_slice(value);

        // The originating node always serves its own writes.
        self.shared.store.put(key, value.clone());

        task::store_value::run(&self.shared, key, value).await
    }

    /// Loads the value stored under `key`, from the local store when
    /// possible, otherwise from the network.
    pub async fn load(&self, key: &[u8]) -> Result<Bytes, Error> {
        self.wait_initialized().await?;

        let key = Id::from_key(key);
        if let Some(value) = self.shared.store.get(&key) {
            return Ok(value);
        }

        task::find_value::run(&self.shared, key).await
    }

    async fn wait_initialized(&self) -> Result<(), Error> {
        let mut initialized = self.initialized_tx.subscribe();
        while !*initialized.borrow_and_update() {
            debug!("waiting for bootstrap before serving");
            initialized
                .changed()
                .await
                .map_err(|_| Error::RunAborted)?;
        }
        Ok(())
    }
}

//! rkad - a Kademlia distributed hash table
//!
//! This library implements a peer-to-peer DHT node speaking the Kademlia
//! protocol over UDP. Each node owns a local key/value store and cooperates
//! with the network to offer two operations: [`save`](Engine::save) and
//! [`load`](Engine::load). Keys and values are opaque byte sequences; the
//! network routes storage and retrieval to the nodes whose 160-bit
//! identifiers are XOR-closest to the key's hash.
//!
//! # Modules
//!
//! - [`id`] - 160-bit identifiers and the XOR distance metric
//! - [`message`] - The binary wire codec
//! - [`transport`] - Dual IPv4/IPv6 UDP sockets and endpoint resolution
//! - [`router`] - Correlation of responses to pending requests
//! - [`routing`] - The k-bucket routing table
//! - [`store`] - The local value store
//! - [`lookup`] - Candidate bookkeeping for iterative lookups
//! - [`engine`] - The node engine tying everything together
//!
//! # Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//! use rkad::{Engine, EngineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Join an existing network through one known peer.
//! let engine = Arc::new(
//!     Engine::bind(EngineConfig {
//!         initial_peer: Some("bootstrap.example.net:27980".into()),
//!         ..Default::default()
//!     })
//!     .await?,
//! );
//!
//! let runner = {
//!     let engine = engine.clone();
//!     tokio::spawn(async move { engine.run().await })
//! };
//! engine.bootstrap().await?;
//!
//! engine.save(b"key", b"value").await?;
//! assert_eq!(&engine.load(b"key").await?[..], b"value");
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod id;
pub mod lookup;
pub mod message;
pub mod router;
pub mod routing;
pub mod store;
mod task;
pub mod transport;

pub use engine::{Engine, EngineConfig, DEFAULT_PORT};
pub use error::Error;
pub use id::Id;
pub use message::{Header, MessageKind};
pub use router::ResponseRouter;
pub use routing::{Peer, RoutingTable, K};
pub use store::ValueStore;
pub use transport::Transport;

#[cfg(test)]
mod tests;

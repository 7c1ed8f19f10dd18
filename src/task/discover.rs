//! Bootstrap probe of the initial peer.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::engine::Shared;
use crate::error::Error;
use crate::message::{Body as _, FindPeerRequest, FindPeerResponse, MessageKind};

/// Deadline for each endpoint of the initial peer.
pub const INITIAL_CONTACT_TIMEOUT: Duration = Duration::from_secs(1);

/// Asks the initial peer which peers are close to our own id, trying its
/// resolved endpoints from the tail until one produces a usable response.
/// Populates the routing table on success.
pub(crate) async fn run(shared: &Shared, mut endpoints: Vec<SocketAddr>) -> Result<(), Error> {
    while let Some(endpoint) = endpoints.pop() {
        debug!("querying initial peer endpoint '{}'", endpoint);

        let request = FindPeerRequest {
            target: *shared.table.local_id(),
        };
        let (_, header, body) =
            match shared.send_request(&request, endpoint, INITIAL_CONTACT_TIMEOUT).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!("initial peer endpoint '{}' failed: {}", endpoint, e);
                    continue;
                }
            };

        if header.kind != MessageKind::FindPeerResponse {
            debug!("unexpected initial contact response ({:?})", header.kind);
            continue;
        }

        let Ok(response) = FindPeerResponse::decode(&mut &body[..]) else {
            debug!("failed to decode initial contact response");
            continue;
        };

        for peer in &response.peers {
            shared.table.push(peer.id, peer.addr);
        }
        debug!("added {} initial peer(s)", response.peers.len());

        return Ok(());
    }

    Err(Error::InitialPeerFailedToRespond)
}

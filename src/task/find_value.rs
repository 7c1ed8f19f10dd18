//! Iterative FIND_VALUE walk.

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt as _};
use tracing::debug;

use super::{ALPHA, LOOKUP_TIMEOUT};
use crate::engine::Shared;
use crate::error::Error;
use crate::id::Id;
use crate::lookup::CandidateSet;
use crate::message::{Body as _, FindPeerResponse, FindValueRequest, FindValueResponse, MessageKind};

/// Walks toward `key` until some peer returns its value.
///
/// Peers that don't hold the value answer with their closest peers, which
/// join the candidate set; the walk ends with `ValueNotFound` once no
/// closer candidate is left to ask and no request is in flight.
pub(crate) async fn run(shared: &Shared, key: Id) -> Result<Bytes, Error> {
    let mut set = CandidateSet::new(key, shared.table.find(&key), shared.local_addrs());
    let mut pending = FuturesUnordered::new();

    loop {
        for peer in set.select_new_closest(ALPHA) {
            debug!("asking '{}' for value '{}'", peer.addr, key);
            pending.push(async move {
                let request = FindValueRequest { target: key };
                let outcome = shared
                    .send_request(&request, peer.addr, LOOKUP_TIMEOUT)
                    .await;
                (peer, outcome)
            });
        }

        // Nothing in flight and nobody left to ask.
        let Some((peer, outcome)) = pending.next().await else {
            return Err(Error::ValueNotFound);
        };

        let (_, header, body) = match outcome {
            Ok(reply) => reply,
            Err(_) => {
                set.flag_invalid(&peer.id);
                continue;
            }
        };

        set.flag_valid(&peer.id);

        match header.kind {
            MessageKind::FindPeerResponse => {
                // The peer didn't know the value but named closer peers.
                if let Ok(response) = FindPeerResponse::decode(&mut &body[..]) {
                    set.add_candidates(response.peers);
                } else {
                    debug!("dropping undecodable peer list from '{}'", peer.addr);
                }
            }
            MessageKind::FindValueResponse => {
                if let Ok(response) = FindValueResponse::decode(&mut &body[..]) {
                    debug!("found value '{}' at '{}'", key, peer.addr);
                    return Ok(response.value);
                }
                debug!("dropping undecodable value from '{}'", peer.addr);
            }
            kind => debug!("dropping unexpected response kind {:?}", kind),
        }
    }
}

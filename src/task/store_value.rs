//! Iterative FIND_PEER walk followed by a STORE fan-out.

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt as _};
use tracing::debug;

use super::{ALPHA, LOOKUP_TIMEOUT};
use crate::engine::Shared;
use crate::error::Error;
use crate::id::Id;
use crate::lookup::CandidateSet;
use crate::message::{Body as _, FindPeerRequest, FindPeerResponse, MessageKind, StoreRequest};

/// Replicas placed per stored value.
pub const REDUNDANT_SAVE_COUNT: usize = 3;

/// Locates the peers closest to `key` and sends each a STORE of `value`.
///
/// Phase one is a plain FIND_PEER walk; anything but a decodable
/// FIND_PEER_RESPONSE flags the candidate invalid. Phase two replicates
/// onto the closest responsive peers, fire-and-forget: a STORE has no
/// acknowledgement at this layer.
pub(crate) async fn run(shared: &Shared, key: Id, value: Bytes) -> Result<(), Error> {
    let mut set = CandidateSet::new(key, shared.table.find(&key), shared.local_addrs());
    let mut pending = FuturesUnordered::new();

    loop {
        for peer in set.select_new_closest(ALPHA) {
            debug!("asking '{}' for peers near '{}'", peer.addr, key);
            pending.push(async move {
                let request = FindPeerRequest { target: key };
                let outcome = shared
                    .send_request(&request, peer.addr, LOOKUP_TIMEOUT)
                    .await;
                (peer, outcome)
            });
        }

        // The nearest candidates have stopped changing.
        let Some((peer, outcome)) = pending.next().await else {
            break;
        };

        match outcome {
            Ok((_, header, body)) if header.kind == MessageKind::FindPeerResponse => {
                match FindPeerResponse::decode(&mut &body[..]) {
                    Ok(response) => {
                        set.flag_valid(&peer.id);
                        set.add_candidates(response.peers);
                    }
                    Err(e) => {
                        debug!("undecodable peer list from '{}': {}", peer.addr, e);
                        set.flag_invalid(&peer.id);
                    }
                }
            }
            Ok((_, header, _)) => {
                debug!("unexpected response kind {:?} from '{}'", header.kind, peer.addr);
                set.flag_invalid(&peer.id);
            }
            Err(_) => set.flag_invalid(&peer.id),
        }
    }

    let targets = set.select_closest_valid(REDUNDANT_SAVE_COUNT);
    if targets.is_empty() {
        return Err(Error::MissingPeers);
    }

    debug!("storing '{}' on {} peer(s)", key, targets.len());
    for peer in targets {
        let request = StoreRequest {
            key,
            value: value.clone(),
        };
        if let Err(e) = shared.send_notification(&request, peer.addr).await {
            debug!("failed to send store request to '{}': {}", peer.addr, e);
        }
    }

    Ok(())
}

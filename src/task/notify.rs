//! Bucket-refresh walk.
//!
//! After bootstrap the node is known only to the peers it spoke to. For
//! each occupied bucket the engine walks toward a synthetic target inside
//! that bucket's distance range; the FIND_PEER requests of the walk carry
//! our id, so every peer contacted learns about us.

use futures::stream::{FuturesUnordered, StreamExt as _};
use rand::Rng as _;
use tracing::debug;

use super::{ALPHA, LOOKUP_TIMEOUT};
use crate::engine::Shared;
use crate::id::Id;
use crate::lookup::CandidateSet;
use crate::message::{Body as _, FindPeerRequest, FindPeerResponse, MessageKind};

/// A target inside bucket `bucket` of `local`: differs from the local id
/// at that bucket's bit, matches above it, random below.
pub(crate) fn refresh_target(local: &Id, bucket: usize) -> Id {
    let mut bytes = local.flip(bucket).0;

    let byte_idx = bucket / 8;
    let bit_idx = 7 - bucket % 8;
    if bit_idx > 0 {
        let random: u8 = rand::rng().random();
        let mask = (1u8 << bit_idx) - 1;
        bytes[byte_idx] = bytes[byte_idx] & !mask | random & mask;
    }
    rand::rng().fill(&mut bytes[byte_idx + 1..]);

    Id(bytes)
}

/// Walks toward `target` purely to make this node known to the peers
/// along the way. Completes when every request has resolved.
pub(crate) async fn run(shared: &Shared, target: Id) {
    let mut set = CandidateSet::new(target, shared.table.find(&target), shared.local_addrs());
    let mut pending = FuturesUnordered::new();

    loop {
        for peer in set.select_new_closest(ALPHA) {
            debug!("notifying '{}' via lookup of '{}'", peer.addr, target);
            pending.push(async move {
                let request = FindPeerRequest { target };
                let outcome = shared
                    .send_request(&request, peer.addr, LOOKUP_TIMEOUT)
                    .await;
                (peer, outcome)
            });
        }

        let Some((peer, outcome)) = pending.next().await else {
            return;
        };

        match outcome {
            Ok((_, header, body)) => {
                // Any answer proves the peer is alive and now knows us.
                set.flag_valid(&peer.id);
                if header.kind == MessageKind::FindPeerResponse {
                    if let Ok(response) = FindPeerResponse::decode(&mut &body[..]) {
                        set.add_candidates(response.peers);
                    }
                }
            }
            Err(_) => set.flag_invalid(&peer.id),
        }
    }
}

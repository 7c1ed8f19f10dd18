//! Correlates inbound responses with pending requests.
//!
//! Every outbound request carries a fresh 160-bit random token; the peer
//! echoes it in its response. A pending request registers its token here
//! and waits, bounded by a per-request deadline. The token map is the
//! arbiter of the race between a late response and the deadline: whichever
//! side removes the entry first wins, so each registration resolves exactly
//! once — with the reply or with a timeout, never both.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use crate::error::Error;
use crate::id::Id;
use crate::message::Header;

/// A routed response: the peer that sent it, its decoded header, and the
/// raw body bytes. The requester decodes the body kind it expects.
pub type Reply = (SocketAddr, Header, Bytes);

/// Token-keyed map of requests still waiting for their response.
#[derive(Default)]
pub struct ResponseRouter {
    pending: Mutex<HashMap<Id, oneshot::Sender<Reply>>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in a token. Tokens are single-use; registering
    /// one twice while the first registration is live is a logic error.
    pub fn register(&self, token: Id) -> PendingReply<'_> {
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().insert(token, tx);
        debug_assert!(previous.is_none(), "a token can't be registered twice");

        PendingReply {
            router: self,
            token,
            rx,
        }
    }

    /// Removes a pending entry; returns whether it was still present.
    pub fn forget(&self, token: &Id) -> bool {
        self.pending.lock().remove(token).is_some()
    }

    /// Hands a response to the requester awaiting its token.
    pub fn dispatch(&self, sender: SocketAddr, header: Header, body: Bytes) -> Result<(), Error> {
        let Some(tx) = self.pending.lock().remove(&header.token) else {
            debug!("dropping unknown response from {}", sender);
            return Err(Error::UnassociatedMessageId);
        };

        // The requester only stops listening once it has removed the entry
        // itself, so this send can't be observed to fail.
        let _ = tx.send((sender, header, body));
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// A registered request waiting for its response.
///
/// Dropping it without waiting deregisters the token, so an abandoned
/// request can't leak its entry.
pub struct PendingReply<'a> {
    router: &'a ResponseRouter,
    token: Id,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply<'_> {
    /// Waits for the response, up to `ttl`.
    ///
    /// On deadline, the entry is removed and `Timeout` returned — unless a
    /// response removed it first, in which case the response wins.
    pub async fn wait(mut self, ttl: Duration) -> Result<Reply, Error> {
        match timeout(ttl, &mut self.rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::RunAborted),
            Err(_) => {
                if self.router.forget(&self.token) {
                    Err(Error::Timeout)
                } else {
                    // A response claimed the entry right at the deadline;
                    // its send is imminent or already delivered.
                    (&mut self.rx).await.map_err(|_| Error::Timeout)
                }
            }
        }
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.router.forget(&self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn reply_from(token: Id) -> (SocketAddr, Header, Bytes) {
        let header = Header {
            kind: MessageKind::PingResponse,
            source: Id::random(),
            token,
        };
        ("127.0.0.1:27980".parse().unwrap(), header, Bytes::new())
    }

    #[tokio::test]
    async fn test_dispatch_reaches_waiter() {
        let router = ResponseRouter::new();
        let token = Id::random();
        let pending = router.register(token);

        let (sender, header, body) = reply_from(token);
        router.dispatch(sender, header, body).unwrap();

        let (from, header, _) = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(from, sender);
        assert_eq!(header.token, token);
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unassociated_token_is_rejected() {
        let router = ResponseRouter::new();
        let (sender, header, body) = reply_from(Id::random());
        assert!(matches!(
            router.dispatch(sender, header, body),
            Err(Error::UnassociatedMessageId)
        ));
    }

    #[tokio::test]
    async fn test_zero_ttl_times_out_then_unassociates() {
        let router = ResponseRouter::new();
        let token = Id::random();

        let pending = router.register(token);
        assert!(matches!(
            pending.wait(Duration::ZERO).await,
            Err(Error::Timeout)
        ));
        assert_eq!(router.pending_count(), 0);

        // A matching datagram arriving after the deadline is dropped.
        let (sender, header, body) = reply_from(token);
        assert!(matches!(
            router.dispatch(sender, header, body),
            Err(Error::UnassociatedMessageId)
        ));
    }

    #[tokio::test]
    async fn test_dropped_registration_deregisters() {
        let router = ResponseRouter::new();
        let token = Id::random();
        drop(router.register(token));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_and_timeout_resolve_exactly_once() {
        let router = ResponseRouter::new();
        let token = Id::random();
        let pending = router.register(token);

        let (sender, header, body) = reply_from(token);
        router.dispatch(sender, header, body).unwrap();

        // Even with an already-expired deadline the delivered response wins,
        // because dispatch removed the entry first.
        assert!(pending.wait(Duration::ZERO).await.is_ok());

        let (sender, header, body) = reply_from(token);
        assert!(matches!(
            router.dispatch(sender, header, body),
            Err(Error::UnassociatedMessageId)
        ));
    }
}

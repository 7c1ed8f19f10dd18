use thiserror::Error;

/// Errors surfaced by the DHT engine and its components.
#[derive(Debug, Error)]
pub enum Error {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine's run loop was stopped via [`abort`](crate::Engine::abort).
    #[error("run aborted")]
    RunAborted,

    /// None of the initial peer's endpoints answered during bootstrap.
    #[error("initial peer failed to respond")]
    InitialPeerFailedToRespond,

    /// The listen endpoint did not resolve to an IPv4 address.
    #[error("invalid IPv4 address")]
    InvalidIpv4Address,

    /// The listen endpoint did not resolve to an IPv6 address.
    #[error("invalid IPv6 address")]
    InvalidIpv6Address,

    /// No peer in the network holds the requested key.
    #[error("value not found")]
    ValueNotFound,

    /// No responsive peer was available to replicate a value onto.
    #[error("missing peers")]
    MissingPeers,

    /// Datagram ended before a complete header could be read.
    #[error("truncated header")]
    TruncatedHeader,

    /// Datagram ended inside a 160-bit identifier.
    #[error("truncated id")]
    TruncatedId,

    /// Datagram ended inside a length prefix.
    #[error("truncated size")]
    TruncatedSize,

    /// Datagram ended inside an address, or carried an unknown address tag.
    #[error("truncated address")]
    TruncatedAddress,

    /// A length prefix pointed past the end of the datagram.
    #[error("corrupted body")]
    CorruptedBody,

    /// The header's version nibble is not the supported protocol version.
    #[error("unknown protocol version")]
    UnknownProtocolVersion,

    /// The header's type nibble names no known message kind.
    #[error("unknown message kind")]
    UnknownMessageKind,

    /// A response token matched no pending request.
    #[error("unassociated message id")]
    UnassociatedMessageId,

    /// The runtime timer failed; unrecoverable.
    #[error("timer malfunction")]
    TimerMalfunction,

    /// Reserved for protocol operations this node does not implement.
    #[error("unimplemented")]
    Unimplemented,

    /// A request received no response within its deadline.
    #[error("timed out")]
    Timeout,
}

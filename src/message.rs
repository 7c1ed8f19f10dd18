//! Wire protocol codec.
//!
//! Every datagram is a 41-byte header followed by a message-kind specific
//! body. The first header byte packs the protocol version in its low nibble
//! and the message kind in its high nibble; the sender's identifier and the
//! 160-bit correlation token follow as raw bytes.
//!
//! Multi-byte integers are little-endian. Variable-length byte sequences
//! and peer lists carry a `u64` length prefix. An address is one tag byte
//! (`1` = IPv4, `2` = IPv6) followed by the raw address bytes; a peer record
//! is its identifier, a `u16` port, then its address.
//!
//! Decoding consumes from a `&[u8]` cursor and fails with a distinct error
//! per malformation. A failure leaves the cursor position unspecified;
//! callers drop the datagram.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;

use crate::error::Error;
use crate::id::{Id, ID_BYTES};
use crate::routing::Peer;

/// The only protocol version this node speaks.
pub const PROTOCOL_VERSION: u8 = 1;

const ADDR_TAG_V4: u8 = 1;
const ADDR_TAG_V6: u8 = 2;

/// Discriminates the seven message kinds of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    PingRequest,
    PingResponse,
    StoreRequest,
    FindPeerRequest,
    FindPeerResponse,
    FindValueRequest,
    FindValueResponse,
}

impl MessageKind {
    fn from_nibble(nibble: u8) -> Result<Self, Error> {
        match nibble {
            0 => Ok(Self::PingRequest),
            1 => Ok(Self::PingResponse),
            2 => Ok(Self::StoreRequest),
            3 => Ok(Self::FindPeerRequest),
            4 => Ok(Self::FindPeerResponse),
            5 => Ok(Self::FindValueRequest),
            6 => Ok(Self::FindValueResponse),
            _ => Err(Error::UnknownMessageKind),
        }
    }

    fn as_nibble(self) -> u8 {
        match self {
            Self::PingRequest => 0,
            Self::PingResponse => 1,
            Self::StoreRequest => 2,
            Self::FindPeerRequest => 3,
            Self::FindPeerResponse => 4,
            Self::FindValueRequest => 5,
            Self::FindValueResponse => 6,
        }
    }

    /// True for the kinds that answer a pending request.
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::PingResponse | Self::FindPeerResponse | Self::FindValueResponse
        )
    }
}

/// The fixed-size prefix of every datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: MessageKind,
    /// Identifier of the sending node.
    pub source: Id,
    /// Correlates a response with its request; fresh random for requests.
    pub token: Id,
}

impl Header {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(PROTOCOL_VERSION | self.kind.as_nibble() << 4);
        out.extend_from_slice(self.source.as_bytes());
        out.extend_from_slice(self.token.as_bytes());
    }

    pub fn decode(input: &mut &[u8]) -> Result<Self, Error> {
        let Some((&first, rest)) = input.split_first() else {
            return Err(Error::TruncatedHeader);
        };

        if first & 0x0f != PROTOCOL_VERSION {
            return Err(Error::UnknownProtocolVersion);
        }
        let kind = MessageKind::from_nibble(first >> 4)?;
        *input = rest;

        let source = read_id(input)?;
        let token = read_id(input)?;
        Ok(Self { kind, source, token })
    }
}

/// A message body that can be framed behind a [`Header`] of its kind.
pub trait Body: Sized {
    const KIND: MessageKind;

    fn encode(&self, out: &mut Vec<u8>);
    fn decode(input: &mut &[u8]) -> Result<Self, Error>;
}

/// Builds a complete datagram: header of `B::KIND`, then the body.
pub fn encode_datagram<B: Body>(source: &Id, token: &Id, body: &B) -> Bytes {
    let mut out = Vec::with_capacity(64);
    Header {
        kind: B::KIND,
        source: *source,
        token: *token,
    }
    .encode(&mut out);
    body.encode(&mut out);
    Bytes::from(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PingRequest;

impl Body for PingRequest {
    const KIND: MessageKind = MessageKind::PingRequest;

    fn encode(&self, _out: &mut Vec<u8>) {}

    fn decode(_input: &mut &[u8]) -> Result<Self, Error> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PingResponse;

impl Body for PingResponse {
    const KIND: MessageKind = MessageKind::PingResponse;

    fn encode(&self, _out: &mut Vec<u8>) {}

    fn decode(_input: &mut &[u8]) -> Result<Self, Error> {
        Ok(Self)
    }
}

/// Asks the receiver to store `value` under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    pub key: Id,
    pub value: Bytes,
}

impl Body for StoreRequest {
    const KIND: MessageKind = MessageKind::StoreRequest;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.key.as_bytes());
        write_bytes(&self.value, out);
    }

    fn decode(input: &mut &[u8]) -> Result<Self, Error> {
        let key = read_id(input)?;
        let value = read_bytes(input)?;
        Ok(Self { key, value })
    }
}

/// Asks the receiver for its peers closest to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindPeerRequest {
    pub target: Id,
}

impl Body for FindPeerRequest {
    const KIND: MessageKind = MessageKind::FindPeerRequest;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.target.as_bytes());
    }

    fn decode(input: &mut &[u8]) -> Result<Self, Error> {
        Ok(Self {
            target: read_id(input)?,
        })
    }
}

/// The peers a node knows closest to a requested identifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindPeerResponse {
    pub peers: Vec<Peer>,
}

impl Body for FindPeerResponse {
    const KIND: MessageKind = MessageKind::FindPeerResponse;

    fn encode(&self, out: &mut Vec<u8>) {
        write_u64(self.peers.len() as u64, out);
        for peer in &self.peers {
            write_peer(peer, out);
        }
    }

    fn decode(input: &mut &[u8]) -> Result<Self, Error> {
        let count = read_u64(input)?;
        let mut peers = Vec::new();
        for _ in 0..count {
            peers.push(read_peer(input)?);
        }
        Ok(Self { peers })
    }
}

/// Asks the receiver for the value stored under `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindValueRequest {
    pub target: Id,
}

impl Body for FindValueRequest {
    const KIND: MessageKind = MessageKind::FindValueRequest;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.target.as_bytes());
    }

    fn decode(input: &mut &[u8]) -> Result<Self, Error> {
        Ok(Self {
            target: read_id(input)?,
        })
    }
}

/// A value found by its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindValueResponse {
    pub value: Bytes,
}

impl Body for FindValueResponse {
    const KIND: MessageKind = MessageKind::FindValueResponse;

    fn encode(&self, out: &mut Vec<u8>) {
        write_bytes(&self.value, out);
    }

    fn decode(input: &mut &[u8]) -> Result<Self, Error> {
        Ok(Self {
            value: read_bytes(input)?,
        })
    }
}

fn write_u16(value: u16, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn read_u16(input: &mut &[u8]) -> Result<u16, Error> {
    let Some((bytes, rest)) = input.split_first_chunk::<2>() else {
        return Err(Error::TruncatedSize);
    };
    *input = rest;
    Ok(u16::from_le_bytes(*bytes))
}

fn write_u64(value: u64, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn read_u64(input: &mut &[u8]) -> Result<u64, Error> {
    let Some((bytes, rest)) = input.split_first_chunk::<8>() else {
        return Err(Error::TruncatedSize);
    };
    *input = rest;
    Ok(u64::from_le_bytes(*bytes))
}

fn write_bytes(data: &[u8], out: &mut Vec<u8>) {
    write_u64(data.len() as u64, out);
    out.extend_from_slice(data);
}

fn read_bytes(input: &mut &[u8]) -> Result<Bytes, Error> {
    let len = read_u64(input)?;
    if len > input.len() as u64 {
        return Err(Error::CorruptedBody);
    }
    let (data, rest) = input.split_at(len as usize);
    *input = rest;
    Ok(Bytes::copy_from_slice(data))
}

fn read_id(input: &mut &[u8]) -> Result<Id, Error> {
    let Some((bytes, rest)) = input.split_first_chunk::<ID_BYTES>() else {
        return Err(Error::TruncatedId);
    };
    *input = rest;
    Ok(Id(*bytes))
}

fn write_addr(addr: &IpAddr, out: &mut Vec<u8>) {
    match addr {
        IpAddr::V4(v4) => {
            out.push(ADDR_TAG_V4);
            out.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            out.push(ADDR_TAG_V6);
            out.extend_from_slice(&v6.octets());
        }
    }
}

fn read_addr(input: &mut &[u8]) -> Result<IpAddr, Error> {
    let Some((&tag, rest)) = input.split_first() else {
        return Err(Error::TruncatedAddress);
    };
    *input = rest;

    match tag {
        ADDR_TAG_V4 => {
            let Some((bytes, rest)) = input.split_first_chunk::<4>() else {
                return Err(Error::TruncatedAddress);
            };
            *input = rest;
            Ok(IpAddr::V4(Ipv4Addr::from(*bytes)))
        }
        ADDR_TAG_V6 => {
            let Some((bytes, rest)) = input.split_first_chunk::<16>() else {
                return Err(Error::TruncatedAddress);
            };
            *input = rest;
            Ok(IpAddr::V6(Ipv6Addr::from(*bytes)))
        }
        _ => Err(Error::TruncatedAddress),
    }
}

fn write_peer(peer: &Peer, out: &mut Vec<u8>) {
    out.extend_from_slice(peer.id.as_bytes());
    write_u16(peer.addr.port(), out);
    write_addr(&peer.addr.ip(), out);
}

fn read_peer(input: &mut &[u8]) -> Result<Peer, Error> {
    let id = read_id(input)?;
    let port = read_u16(input)?;
    let ip = read_addr(input)?;
    Ok(Peer::new(id, SocketAddr::new(ip, port)))
}

// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Connection-oriented transports and the errors they produce.
//!
//! A [`Transport`] turns multiaddresses into raw connections. The
//! [`upgrade::TransportUpgrade`] wrapper then promotes those raw
//! connections through the configured layer, security and muxer stages.

pub mod memory;
pub mod upgrade;

use async_trait::async_trait;
use std::{error::Error, fmt, io};

use crate::multistream::NegotiationError;
use crate::muxing::IStreamMuxer;
use crate::{Multiaddr, PeerId};

/// The local and remote addresses of an established connection.
///
/// Implemented by every connection layer, so address information survives
/// each upgrade step.
pub trait ConnectionInfo {
    fn local_multiaddr(&self) -> Multiaddr;
    fn remote_multiaddr(&self) -> Multiaddr;
}

/// A transport provides connection-oriented communication between two
/// peers: dialing a remote address, and listening on a local one.
#[async_trait]
pub trait Transport: Send {
    /// The connection this transport produces.
    type Output: ConnectionInfo + Send;
    /// The listener produced by [`Transport::listen_on`].
    type Listener: TransportListener<Output = Self::Output>;

    /// Binds to the given multiaddr and starts accepting connections.
    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError>;

    /// Establishes a connection to the given multiaddr.
    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError>;

    /// Whether this transport understands the given multiaddr.
    fn can_dial(&self, addr: &Multiaddr) -> bool;
}

/// The listening side of a [`Transport`].
#[async_trait]
pub trait TransportListener: Send {
    type Output: ConnectionInfo + Send;

    /// Waits for the next inbound connection.
    async fn accept(&mut self) -> Result<Self::Output, TransportError>;

    /// The multiaddr this listener is bound to.
    fn multi_addr(&self) -> Multiaddr;
}

/// The object-safe transport surface used by the swarm: every connection
/// has already gone through the full upgrade by the time it is handed out.
#[async_trait]
pub trait TransportEx: Send + Sync {
    async fn dial(&mut self, addr: Multiaddr) -> Result<IStreamMuxer, TransportError>;

    fn listen_on(&mut self, addr: Multiaddr) -> Result<IListenerEx, TransportError>;

    fn can_dial(&self, addr: &Multiaddr) -> bool;

    fn box_clone(&self) -> ITransportEx;
}

pub type ITransportEx = Box<dyn TransportEx>;

impl Clone for ITransportEx {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Object-safe listener handing out fully upgraded connections.
#[async_trait]
pub trait TransportListenerEx: Send {
    async fn accept(&mut self) -> Result<IStreamMuxer, TransportError>;

    fn multi_addr(&self) -> Multiaddr;
}

pub type IListenerEx = Box<dyn TransportListenerEx>;

/// The stage of the upgrade pipeline a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStage {
    Layer,
    Security,
    Muxer,
}

impl fmt::Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpgradeStage::Layer => f.write_str("layer"),
            UpgradeStage::Security => f.write_str("security"),
            UpgradeStage::Muxer => f.write_str("muxer"),
        }
    }
}

/// Errors produced while establishing or upgrading a connection.
#[derive(Debug)]
pub enum TransportError {
    /// The multiaddr is not supported by any configured transport.
    MultiaddrNotSupported(Multiaddr),
    /// No listener is bound at the dialed address.
    Unreachable(Multiaddr),
    /// An I/O error on the underlying socket.
    IoError(io::Error),
    /// The deadline for the operation elapsed.
    Timeout,
    /// Protocol negotiation failed.
    Negotiation(NegotiationError),
    /// One of the upgrade stages failed.
    UpgradeFailed(UpgradeStage, Box<dyn Error + Send + Sync>),
    /// The dial expected one peer but the handshake authenticated another.
    PeerIdMismatch { expected: PeerId, got: PeerId },
    /// An error raised by the stream muxer.
    StreamMuxerError(Box<dyn Error + Send + Sync>),
    /// The connection is gone.
    ConnectionClosed,
    /// A catch-all for internal consistency errors.
    Internal(&'static str),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportError::MultiaddrNotSupported(a) => {
                write!(f, "multiaddr not supported: {}", a)
            }
            TransportError::Unreachable(a) => write!(f, "no listener at {}", a),
            TransportError::IoError(e) => write!(f, "i/o error: {}", e),
            TransportError::Timeout => f.write_str("operation timed out"),
            TransportError::Negotiation(e) => write!(f, "negotiation error: {}", e),
            TransportError::UpgradeFailed(stage, e) => {
                write!(f, "upgrade failed at {} stage: {}", stage, e)
            }
            TransportError::PeerIdMismatch { expected, got } => {
                write!(f, "peer id mismatch: expected {}, got {}", expected, got)
            }
            TransportError::StreamMuxerError(e) => write!(f, "stream muxer error: {}", e),
            TransportError::ConnectionClosed => f.write_str("connection closed"),
            TransportError::Internal(what) => write!(f, "internal error: {}", what),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::IoError(e) => Some(e),
            TransportError::Negotiation(e) => Some(e),
            TransportError::UpgradeFailed(_, e) => Some(&**e),
            TransportError::StreamMuxerError(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::IoError(e)
    }
}

impl From<NegotiationError> for TransportError {
    fn from(e: NegotiationError) -> Self {
        TransportError::Negotiation(e)
    }
}

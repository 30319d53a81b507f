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

use crate::identity::Keypair;
use crate::{PeerId, PublicKey};

/// Identity information attached to a connection once the security stage of
/// the upgrade has completed.
///
/// Everything above the security layer (the muxer, the swarm) reads peer
/// identities through this trait instead of caring which security adaptor
/// produced them.
pub trait SecureInfo {
    /// The peer on our side of the connection.
    fn local_peer(&self) -> PeerId;

    /// The peer on the remote side, as authenticated by the handshake.
    fn remote_peer(&self) -> PeerId;

    /// The local keypair.
    fn local_priv_key(&self) -> Keypair;

    /// The public key presented by the remote.
    fn remote_pub_key(&self) -> PublicKey;
}

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

use multihash::{Code, Multihash, Sha2_256};
use std::{cmp, fmt, hash, str::FromStr};

use crate::identity::PublicKey;

/// Public keys whose serialization is at most this long are inlined into
/// the PeerId verbatim (identity multihash) instead of being hashed.
const MAX_INLINE_KEY_LENGTH: usize = 42;

/// The identity of a peer on the network.
///
/// A `PeerId` is the multihash of the canonical serialization of the peer's
/// public key. It is immutable; equality, ordering and hashing are pure
/// byte comparisons of the underlying multihash.
#[derive(Clone, Eq)]
pub struct PeerId {
    multihash: Multihash,
}

impl PeerId {
    /// Builds the `PeerId` owning the given public key.
    pub fn from_public_key(key: &PublicKey) -> PeerId {
        let key_enc = key.marshal();
        let multihash = if key_enc.len() <= MAX_INLINE_KEY_LENGTH {
            multihash::wrap(Code::Identity, &key_enc)
        } else {
            Sha2_256::digest(&key_enc)
        };
        PeerId { multihash }
    }

    /// Parses a `PeerId` from its binary multihash form.
    pub fn from_bytes(data: Vec<u8>) -> Result<PeerId, Vec<u8>> {
        match Multihash::from_bytes(data) {
            Ok(multihash) => {
                if multihash.algorithm() == Code::Sha2_256
                    || multihash.algorithm() == Code::Identity
                {
                    Ok(PeerId { multihash })
                } else {
                    Err(multihash.into_bytes())
                }
            }
            Err(err) => Err(err.data),
        }
    }

    /// Generates a random peer id. Test helper.
    pub fn random() -> PeerId {
        let bytes: Vec<u8> = (0..32).map(|_| rand::random::<u8>()).collect();
        PeerId {
            multihash: multihash::wrap(Code::Identity, &bytes),
        }
    }

    /// The binary multihash form.
    pub fn into_bytes(self) -> Vec<u8> {
        self.multihash.into_bytes()
    }

    /// A view of the binary multihash form.
    pub fn as_bytes(&self) -> &[u8] {
        self.multihash.as_bytes()
    }

    /// The base58btc rendering, e.g. `QmYyQSo1c1Ym7orWxLYvCrM2EmxFTANf8wXmmE7DWjhx5N`.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.multihash.as_bytes()).into_string()
    }

    /// Checks whether the given public key would derive to this `PeerId`.
    ///
    /// Returns `None` when the id is a non-inline hash of a different
    /// length, in which case no statement can be made.
    pub fn is_public_key(&self, key: &PublicKey) -> Option<bool> {
        let other = PeerId::from_public_key(key);
        if self.multihash.algorithm() == other.multihash.algorithm() {
            Some(self == &other)
        } else {
            None
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_base58()).finish()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_base58().fmt(f)
    }
}

impl hash::Hash for PeerId {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.multihash.as_bytes().hash(state)
    }
}

impl PartialEq for PeerId {
    fn eq(&self, other: &PeerId) -> bool {
        self.multihash.as_bytes() == other.multihash.as_bytes()
    }
}

impl PartialOrd for PeerId {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerId {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.multihash.as_bytes().cmp(other.multihash.as_bytes())
    }
}

/// An error when parsing the textual form of a peer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Base58,
    MultihashUnsupported,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Base58 => f.write_str("base58 decode error"),
            ParseError::MultihashUnsupported => f.write_str("unsupported multihash"),
        }
    }
}

impl std::error::Error for ParseError {}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec().map_err(|_| ParseError::Base58)?;
        PeerId::from_bytes(bytes).map_err(|_| ParseError::MultihashUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    #[test]
    fn peer_id_is_public_key() {
        let key = Keypair::generate_ed25519().public();
        let peer_id = key.to_peer_id();
        assert_eq!(peer_id.is_public_key(&key), Some(true));
    }

    #[test]
    fn base58_roundtrip() {
        let peer_id = Keypair::generate_ed25519().public().to_peer_id();
        let other: PeerId = peer_id.to_base58().parse().unwrap();
        assert_eq!(peer_id, other);
    }

    #[test]
    fn bytes_roundtrip() {
        let peer_id = PeerId::random();
        let other = PeerId::from_bytes(peer_id.clone().into_bytes()).unwrap();
        assert_eq!(peer_id, other);
    }

    #[test]
    fn distinct_keys_distinct_ids() {
        let a = Keypair::generate_ed25519().public().to_peer_id();
        let b = Keypair::generate_ed25519().public().to_peer_id();
        assert_ne!(a, b);
    }
}

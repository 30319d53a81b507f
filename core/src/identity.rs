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

//! Node identities.
//!
//! The core treats keys as opaque byte strings: key generation, signing and
//! verification belong to the security adaptors sitting behind the
//! [`SecurityUpgrader`](crate::upgrade) seam. What the core does need is a
//! canonical serialization of public keys, because the [`PeerId`] of a node
//! is content-addressed from exactly those bytes.

use std::fmt;

use crate::PeerId;

/// Supported key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Ed25519,
    Secp256k1,
    Rsa,
}

impl KeyType {
    fn code(self) -> u8 {
        match self {
            KeyType::Rsa => 0,
            KeyType::Ed25519 => 1,
            KeyType::Secp256k1 => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(KeyType::Rsa),
            1 => Some(KeyType::Ed25519),
            2 => Some(KeyType::Secp256k1),
            _ => None,
        }
    }
}

/// The public key of a node, treated as opaque bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key_type: KeyType,
    bytes: Vec<u8>,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("type", &self.key_type)
            .field("peer", &self.to_peer_id())
            .finish()
    }
}

impl PublicKey {
    pub fn new(key_type: KeyType, bytes: Vec<u8>) -> Self {
        PublicKey { key_type, bytes }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The canonical serialization: one key-type byte followed by the raw
    /// key bytes. PeerIds hash exactly this form.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.bytes.len());
        out.push(self.key_type.code());
        out.extend_from_slice(&self.bytes);
        out
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, DecodingError> {
        let (code, key) = bytes.split_first().ok_or(DecodingError::Empty)?;
        let key_type = KeyType::from_code(*code).ok_or(DecodingError::UnknownKeyType(*code))?;
        if key.is_empty() {
            return Err(DecodingError::Empty);
        }
        Ok(PublicKey {
            key_type,
            bytes: key.to_vec(),
        })
    }

    /// Derives the [`PeerId`] of the node holding this key.
    pub fn to_peer_id(&self) -> PeerId {
        PeerId::from_public_key(self)
    }
}

/// A keypair as far as the core is concerned: the public half, plus the
/// knowledge that the private half exists somewhere behind a security
/// adaptor.
#[derive(Debug, Clone)]
pub struct Keypair {
    public: PublicKey,
}

impl Keypair {
    pub fn from_public(public: PublicKey) -> Self {
        Keypair { public }
    }

    /// Generates a fresh random Ed25519-shaped identity.
    ///
    /// No actual key derivation happens here; the bytes are only ever used
    /// for identification, which is all the core needs.
    pub fn generate_ed25519() -> Self {
        let bytes: Vec<u8> = (0..32).map(|_| rand::random::<u8>()).collect();
        Keypair {
            public: PublicKey::new(KeyType::Ed25519, bytes),
        }
    }

    pub fn public(&self) -> PublicKey {
        self.public.clone()
    }
}

/// Serializes and deserializes public keys for the wire.
///
/// Implemented by security adaptors that exchange keys during their
/// handshake. The default marshaller is the canonical serialization used by
/// [`PublicKey::marshal`].
pub trait KeyMarshaller: Send + Sync {
    fn marshal(&self, key: &PublicKey) -> Vec<u8>;
    fn unmarshal(&self, bytes: &[u8]) -> Result<PublicKey, DecodingError>;
}

/// The built-in marshaller: canonical tag-prefixed bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalKeyMarshaller;

impl KeyMarshaller for CanonicalKeyMarshaller {
    fn marshal(&self, key: &PublicKey) -> Vec<u8> {
        key.marshal()
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<PublicKey, DecodingError> {
        PublicKey::unmarshal(bytes)
    }
}

/// An error during decoding of key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodingError {
    /// The input held no key bytes.
    Empty,
    /// The key-type tag is not among the supported ones.
    UnknownKeyType(u8),
}

impl fmt::Display for DecodingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodingError::Empty => f.write_str("empty key material"),
            DecodingError::UnknownKeyType(t) => write!(f, "unknown key type {}", t),
        }
    }
}

impl std::error::Error for DecodingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marshal_roundtrip() {
        let kp = Keypair::generate_ed25519();
        let bytes = kp.public().marshal();
        let back = PublicKey::unmarshal(&bytes).unwrap();
        assert_eq!(back, kp.public());
    }

    #[test]
    fn unmarshal_rejects_garbage() {
        assert_eq!(PublicKey::unmarshal(&[]), Err(DecodingError::Empty));
        assert_eq!(
            PublicKey::unmarshal(&[9, 1, 2]),
            Err(DecodingError::UnknownKeyType(9))
        );
        assert_eq!(PublicKey::unmarshal(&[1]), Err(DecodingError::Empty));
    }
}

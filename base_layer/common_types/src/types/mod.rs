// Copyright 2024. The Murmur Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{
    convert::TryFrom,
    fmt,
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{amount::Satoshi, serializers};

/// A 32-byte hash used for transaction and round identities.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FixedHash(#[serde(with = "serializers::hex")] [u8; 32]);

#[derive(Debug, Error)]
#[error("Invalid size")]
pub struct FixedHashSizeError;

impl FixedHash {
    pub const fn byte_size() -> usize {
        32
    }

    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, FixedHashSizeError> {
        let bytes = hex::decode(s).map_err(|_| FixedHashSizeError)?;
        Self::try_from(bytes.as_slice())
    }
}

impl From<[u8; 32]> for FixedHash {
    fn from(hash: [u8; 32]) -> Self {
        Self(hash)
    }
}

impl TryFrom<&[u8]> for FixedHash {
    type Error = FixedHashSizeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != Self::byte_size() {
            return Err(FixedHashSizeError);
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }
}

impl TryFrom<Vec<u8>> for FixedHash {
    type Error = FixedHashSizeError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::try_from(bytes.as_slice())
    }
}

impl AsRef<[u8]> for FixedHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for FixedHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FixedHash({})", self.to_hex())
    }
}

impl Display for FixedHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The identity of a ledger transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize, Deserialize)]
pub struct TxId(FixedHash);

impl TxId {
    pub fn new(hash: FixedHash) -> Self {
        Self(hash)
    }

    pub fn as_hash(&self) -> &FixedHash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl From<[u8; 32]> for TxId {
    fn from(hash: [u8; 32]) -> Self {
        Self(hash.into())
    }
}

impl From<FixedHash> for TxId {
    fn from(hash: FixedHash) -> Self {
        Self(hash)
    }
}

impl Display for TxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a single output of a transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, index: u32) -> Self {
        Self { txid, index }
    }
}

impl Display for OutPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// The raw locking script of an output. Equality on this type identifies address reuse.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ScriptPubkey(#[serde(with = "serializers::hex")] Vec<u8>);

impl ScriptPubkey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl TryFrom<Vec<u8>> for ScriptPubkey {
    type Error = std::convert::Infallible;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for ScriptPubkey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ScriptPubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptPubkey({})", self.to_hex())
    }
}

impl Display for ScriptPubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The standard script template of an output. Determines the serialized size an input or output
/// contributes to a transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum ScriptType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

impl ScriptType {
    /// Virtual size contributed by spending an output of this type, including the outpoint,
    /// sequence and the witness/scriptSig discount.
    pub fn input_vsize(self) -> u64 {
        match self {
            ScriptType::P2pkh => 148,
            ScriptType::P2sh => 91,
            ScriptType::P2wpkh => 68,
            ScriptType::P2wsh => 105,
            ScriptType::P2tr => 58,
        }
    }

    /// Virtual size contributed by creating an output of this type.
    pub fn output_vsize(self) -> u64 {
        match self {
            ScriptType::P2pkh => 34,
            ScriptType::P2sh => 32,
            ScriptType::P2wpkh => 31,
            ScriptType::P2wsh => 43,
            ScriptType::P2tr => 43,
        }
    }
}

impl Display for ScriptType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScriptType::P2pkh => "p2pkh",
            ScriptType::P2sh => "p2sh",
            ScriptType::P2wpkh => "p2wpkh",
            ScriptType::P2wsh => "p2wsh",
            ScriptType::P2tr => "p2tr",
        };
        write!(f, "{}", s)
    }
}

/// A mining fee rate in satoshi per virtual byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize, Deserialize)]
pub struct FeeRate(pub u64);

impl FeeRate {
    pub fn fee_for_vsize(self, vsize: u64) -> Satoshi {
        Satoshi(self.0 * vsize)
    }
}

impl From<u64> for FeeRate {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Display for FeeRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/vB", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hash_of(byte: u8) -> FixedHash {
        FixedHash::from([byte; 32])
    }

    #[test]
    fn fixed_hash_hex_round_trip() {
        let hash = hash_of(0xab);
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(FixedHash::from_hex(&hex).unwrap(), hash);
        assert!(FixedHash::from_hex("abcd").is_err());
    }

    #[test]
    fn outpoint_display() {
        let op = OutPoint::new(TxId::from([0x11; 32]), 7);
        let s = op.to_string();
        assert!(s.ends_with(":7"));
        assert!(s.starts_with("11"));
    }

    #[test]
    fn fee_for_vsize() {
        let rate = FeeRate(5);
        assert_eq!(rate.fee_for_vsize(ScriptType::P2wpkh.input_vsize()), Satoshi(340));
    }

    #[test]
    fn serde_human_readable_is_hex() {
        let op = OutPoint::new(TxId::from([0x22; 32]), 0);
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(&"22".repeat(32)));
        let back: OutPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}

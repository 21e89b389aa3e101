//! Wire blobs exchanged through the engine contract
//!
//! The protocol layer treats all of these as opaque bytes. They are
//! bitcode-encoded and carry enough context (secret id, version, channel)
//! for the engine to reject blobs that were routed to the wrong place.

use bitcode::{Decode, Encode};

use crate::error::Result;

macro_rules! impl_blob_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Serialize to bytes
                pub fn to_bytes(&self) -> Vec<u8> {
                    bitcode::encode(self)
                }

                /// Deserialize from bytes
                pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
                    Ok(bitcode::decode(bytes)?)
                }
            }
        )*
    };
}

/// Contact message opening a pairing on one channel
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ContactBlob {
    pub channel_id: u64,
    pub transport_uri: String,
    pub nonce: [u8; 16],
}

/// One Shamir share bound to a secret and version
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ShareBlob {
    /// Blob format version
    pub format: u8,
    pub secret_id: Vec<u8>,
    pub secret_version: u32,
    /// Shares needed to reconstruct
    pub threshold: u8,
    /// Evaluation point of this share
    pub x: u8,
    /// Evaluations over the salted secret
    pub y: Vec<u8>,
    /// SHA-256 commitment checked after reconstruction
    pub commitment: [u8; 32],
}

impl ShareBlob {
    /// Current blob format
    pub const FORMAT: u8 = 1;
}

/// Owner's request for the share held on a channel
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ShareRequestBlob {
    pub channel_id: u64,
    pub secret_id: Vec<u8>,
    pub secret_version: u32,
    pub nonce: [u8; 16],
}

/// Helper's answer to a share request
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ShareResponseBlob {
    pub secret_id: Vec<u8>,
    pub channel_id: u64,
    pub secret_version: u32,
    /// The encoded [`ShareBlob`]
    pub share: Vec<u8>,
}

/// Possession challenge
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct VerificationRequestBlob {
    pub secret_id: Vec<u8>,
    pub secret_version: u32,
    pub nonce: [u8; 32],
}

/// Possession proof: a digest over the challenge nonce and the share
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct VerificationResponseBlob {
    pub secret_id: Vec<u8>,
    pub channel_id: u64,
    pub secret_version: u32,
    pub nonce: [u8; 32],
    pub digest: [u8; 32],
}

impl_blob_codec!(
    ContactBlob,
    ShareBlob,
    ShareRequestBlob,
    ShareResponseBlob,
    VerificationRequestBlob,
    VerificationResponseBlob,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CryptoError;

    #[test]
    fn test_share_blob_bytes() {
        let blob = ShareBlob {
            format: ShareBlob::FORMAT,
            secret_id: vec![1, 2, 3],
            secret_version: 4,
            threshold: 2,
            x: 1,
            y: vec![9; 20],
            commitment: [7u8; 32],
        };
        let decoded = ShareBlob::from_bytes(&blob.to_bytes()).unwrap();
        assert_eq!(decoded, blob);
    }

    #[test]
    fn test_garbage_is_deserialization_error() {
        let err = ShareBlob::from_bytes(b"not a blob").unwrap_err();
        assert!(matches!(err, CryptoError::Deserialization(_)));
    }
}

//! Reference secret-sharing engine
//!
//! Splits `salt || plaintext` with byte-wise Shamir sharing. Every share
//! carries a SHA-256 commitment over the secret id, version and salted
//! plaintext so a reconstruction from mixed or corrupted shares is caught.
//! The salt keeps a helper from testing plaintext guesses against the
//! commitment in its own share.

use std::collections::BTreeSet;
use std::sync::Mutex;

use derec_core::ChannelId;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

use crate::blobs::{
    ContactBlob, ShareBlob, ShareRequestBlob, ShareResponseBlob, VerificationRequestBlob,
    VerificationResponseBlob,
};
use crate::error::{CryptoError, Result};
use crate::shamir::{self, RawShare};
use crate::traits::{SecretSharingEngine, ShareMap};

/// Length of the random salt prepended to every secret before splitting
const SALT_LEN: usize = 16;

const COMMITMENT_DOMAIN: &[u8] = b"derec-commit-v1";
const VERIFICATION_DOMAIN: &[u8] = b"derec-verify-v1";

/// Shamir secret sharing over GF(2^8)
pub struct ShamirEngine {
    rng: Mutex<ChaCha20Rng>,
}

impl ShamirEngine {
    /// Create an engine seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_entropy()),
        }
    }

    /// Create a deterministic engine (tests and simulations)
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut ChaCha20Rng) -> T) -> Result<T> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| CryptoError::Internal("rng lock poisoned".to_string()))?;
        Ok(f(&mut rng))
    }

    fn random_bytes<const N: usize>(&self) -> Result<[u8; N]> {
        self.with_rng(|rng| {
            let mut bytes = [0u8; N];
            rng.fill_bytes(&mut bytes);
            bytes
        })
    }
}

impl Default for ShamirEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn commitment(secret_id: &[u8], version: u32, salted: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update((secret_id.len() as u32).to_le_bytes());
    hasher.update(secret_id);
    hasher.update(version.to_le_bytes());
    hasher.update(salted);
    hasher.finalize().into()
}

fn possession_digest(nonce: &[u8; 32], share: &ShareBlob) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(VERIFICATION_DOMAIN);
    hasher.update(nonce);
    hasher.update((share.secret_id.len() as u32).to_le_bytes());
    hasher.update(&share.secret_id);
    hasher.update(share.secret_version.to_le_bytes());
    hasher.update([share.x]);
    hasher.update(&share.y);
    hasher.finalize().into()
}

/// Decode a share and check it belongs to `secret_id`
fn decode_share(secret_id: &[u8], share: &[u8]) -> Result<ShareBlob> {
    let share = ShareBlob::from_bytes(share)?;
    if share.secret_id != secret_id {
        return Err(CryptoError::Mismatch("share belongs to another secret".to_string()));
    }
    Ok(share)
}

impl SecretSharingEngine for ShamirEngine {
    fn create_contact_message(&self, channel: ChannelId, transport_uri: &str) -> Result<Vec<u8>> {
        let blob = ContactBlob {
            channel_id: channel.get(),
            transport_uri: transport_uri.to_string(),
            nonce: self.random_bytes()?,
        };
        Ok(blob.to_bytes())
    }

    fn protect_secret(
        &self,
        secret_id: &[u8],
        plaintext: &[u8],
        channels: &[ChannelId],
        threshold: usize,
        version: u32,
    ) -> Result<ShareMap> {
        let mut seen = BTreeSet::new();
        for channel in channels {
            if !seen.insert(*channel) {
                return Err(CryptoError::DuplicateChannel(*channel));
            }
        }

        let salt: [u8; SALT_LEN] = self.random_bytes()?;
        let mut salted = Zeroizing::new(Vec::with_capacity(SALT_LEN + plaintext.len()));
        salted.extend_from_slice(&salt);
        salted.extend_from_slice(plaintext);

        let raw = self.with_rng(|rng| shamir::split(&salted, threshold, channels.len(), rng))??;
        let commitment = commitment(secret_id, version, &salted);

        let shares = channels
            .iter()
            .zip(raw)
            .map(|(channel, share)| {
                let blob = ShareBlob {
                    format: ShareBlob::FORMAT,
                    secret_id: secret_id.to_vec(),
                    secret_version: version,
                    threshold: threshold as u8,
                    x: share.x,
                    y: share.ys,
                    commitment,
                };
                (*channel, blob.to_bytes())
            })
            .collect();

        debug!(
            "Split secret into {} shares (threshold {}, version {})",
            channels.len(),
            threshold,
            version
        );
        Ok(shares)
    }

    fn generate_share_request(
        &self,
        channel: ChannelId,
        secret_id: &[u8],
        version: u32,
    ) -> Result<Vec<u8>> {
        let blob = ShareRequestBlob {
            channel_id: channel.get(),
            secret_id: secret_id.to_vec(),
            secret_version: version,
            nonce: self.random_bytes()?,
        };
        Ok(blob.to_bytes())
    }

    fn generate_share_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        request: &[u8],
    ) -> Result<Vec<u8>> {
        let request = ShareRequestBlob::from_bytes(request)?;
        if request.secret_id != secret_id {
            return Err(CryptoError::Mismatch("request is for another secret".to_string()));
        }
        if request.channel_id != channel.get() {
            return Err(CryptoError::Mismatch(format!(
                "request addressed to channel {}, answered on {}",
                request.channel_id, channel
            )));
        }

        let stored = decode_share(secret_id, share)?;
        if stored.secret_version != request.secret_version {
            return Err(CryptoError::Mismatch(format!(
                "requested version {}, holding version {}",
                request.secret_version, stored.secret_version
            )));
        }

        let blob = ShareResponseBlob {
            secret_id: secret_id.to_vec(),
            channel_id: channel.get(),
            secret_version: stored.secret_version,
            share: share.to_vec(),
        };
        Ok(blob.to_bytes())
    }

    fn recover_from_share_responses(
        &self,
        responses: &ShareMap,
        secret_id: &[u8],
        version: u32,
    ) -> Result<Vec<u8>> {
        let mut shares = Vec::with_capacity(responses.len());
        for (channel, bytes) in responses {
            let response = ShareResponseBlob::from_bytes(bytes)?;
            if response.channel_id != channel.get() {
                return Err(CryptoError::Mismatch(format!(
                    "response from channel {} filed under {}",
                    response.channel_id, channel
                )));
            }
            if response.secret_id != secret_id || response.secret_version != version {
                return Err(CryptoError::Mismatch(
                    "response is for another secret or version".to_string(),
                ));
            }
            let share = decode_share(secret_id, &response.share)?;
            if share.secret_version != version {
                return Err(CryptoError::Mismatch(format!(
                    "share version {} does not match {}",
                    share.secret_version, version
                )));
            }
            shares.push(share);
        }

        let first = shares.first().ok_or(CryptoError::InsufficientShares { need: 1, got: 0 })?;
        let threshold = first.threshold as usize;
        let expected_commitment = first.commitment;
        if shares
            .iter()
            .any(|s| s.threshold as usize != threshold || s.commitment != expected_commitment)
        {
            return Err(CryptoError::Mismatch("shares come from different splits".to_string()));
        }
        if shares.len() < threshold {
            return Err(CryptoError::InsufficientShares {
                need: threshold,
                got: shares.len(),
            });
        }

        let raw: Vec<RawShare> = shares
            .into_iter()
            .map(|s| RawShare { x: s.x, ys: s.y })
            .collect();
        let salted = shamir::combine(&raw)?;
        if salted.len() < SALT_LEN {
            return Err(CryptoError::CommitmentMismatch);
        }
        if commitment(secret_id, version, &salted) != expected_commitment {
            return Err(CryptoError::CommitmentMismatch);
        }

        Ok(salted[SALT_LEN..].to_vec())
    }

    fn generate_verification_request(&self, secret_id: &[u8], version: u32) -> Result<Vec<u8>> {
        let blob = VerificationRequestBlob {
            secret_id: secret_id.to_vec(),
            secret_version: version,
            nonce: self.random_bytes()?,
        };
        Ok(blob.to_bytes())
    }

    fn generate_verification_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        request: &[u8],
    ) -> Result<Vec<u8>> {
        let request = VerificationRequestBlob::from_bytes(request)?;
        if request.secret_id != secret_id {
            return Err(CryptoError::Mismatch("challenge is for another secret".to_string()));
        }
        let stored = decode_share(secret_id, share)?;
        if stored.secret_version != request.secret_version {
            return Err(CryptoError::Mismatch(format!(
                "challenged version {}, holding version {}",
                request.secret_version, stored.secret_version
            )));
        }

        let blob = VerificationResponseBlob {
            secret_id: secret_id.to_vec(),
            channel_id: channel.get(),
            secret_version: stored.secret_version,
            nonce: request.nonce,
            digest: possession_digest(&request.nonce, &stored),
        };
        Ok(blob.to_bytes())
    }

    fn verify_share_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        response: &[u8],
    ) -> Result<bool> {
        let response = VerificationResponseBlob::from_bytes(response)?;
        let share = ShareBlob::from_bytes(share)?;

        if response.secret_id != secret_id
            || share.secret_id != secret_id
            || response.channel_id != channel.get()
            || response.secret_version != share.secret_version
        {
            return Ok(false);
        }
        Ok(possession_digest(&response.nonce, &share) == response.digest)
    }
}

//! The secret-sharing engine contract consumed by the protocol roles

use std::collections::BTreeMap;

use derec_core::ChannelId;

use crate::Result;

/// Opaque blobs keyed by the channel they belong to
pub type ShareMap = BTreeMap<ChannelId, Vec<u8>>;

/// Pure, synchronous secret-sharing operations
///
/// Every operation is total over well-formed inputs and fails with a
/// [`crate::CryptoError`] on malformed ones.
pub trait SecretSharingEngine: Send + Sync {
    /// Create the contact blob that opens a pairing on `channel`
    fn create_contact_message(&self, channel: ChannelId, transport_uri: &str) -> Result<Vec<u8>>;

    /// Split `plaintext` into one share per channel
    ///
    /// # Arguments
    /// * `secret_id` - Identifier the shares are bound to
    /// * `plaintext` - The secret
    /// * `channels` - Non-empty list of recipient channels
    /// * `threshold` - Shares required to reconstruct (`<= channels.len()`)
    /// * `version` - Secret version the shares are bound to
    fn protect_secret(
        &self,
        secret_id: &[u8],
        plaintext: &[u8],
        channels: &[ChannelId],
        threshold: usize,
        version: u32,
    ) -> Result<ShareMap>;

    /// Create a request asking the holder of `channel`'s share to return it
    fn generate_share_request(
        &self,
        channel: ChannelId,
        secret_id: &[u8],
        version: u32,
    ) -> Result<Vec<u8>>;

    /// Answer a share request with the stored share
    fn generate_share_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        request: &[u8],
    ) -> Result<Vec<u8>>;

    /// Rebuild the plaintext from a quorum of share responses
    ///
    /// Must not be called with fewer responses than the threshold used at
    /// protect time; the engine rejects it if it is.
    fn recover_from_share_responses(
        &self,
        responses: &ShareMap,
        secret_id: &[u8],
        version: u32,
    ) -> Result<Vec<u8>>;

    /// Create a possession challenge for `secret_id` at `version`
    fn generate_verification_request(&self, secret_id: &[u8], version: u32) -> Result<Vec<u8>>;

    /// Answer a possession challenge with the stored share
    fn generate_verification_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        request: &[u8],
    ) -> Result<Vec<u8>>;

    /// Check a possession answer against a known share
    fn verify_share_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        response: &[u8],
    ) -> Result<bool>;
}

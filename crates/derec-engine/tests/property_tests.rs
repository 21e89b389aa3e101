//! Property-based tests for derec-engine using proptest

use proptest::prelude::*;
use derec_core::ChannelId;
use derec_engine::{CryptoError, SecretSharingEngine, ShamirEngine, ShareMap};

// ============================================
// Helpers
// ============================================

fn channels(n: usize) -> Vec<ChannelId> {
    (1..=n as u64).map(ChannelId::new).collect()
}

/// Run the request/response exchange for the chosen channels
fn collect_responses(
    engine: &ShamirEngine,
    shares: &ShareMap,
    chosen: &[ChannelId],
    secret_id: &[u8],
    version: u32,
) -> ShareMap {
    chosen
        .iter()
        .map(|channel| {
            let request = engine.generate_share_request(*channel, secret_id, version).unwrap();
            let response = engine
                .generate_share_response(secret_id, *channel, &shares[channel], &request)
                .unwrap();
            (*channel, response)
        })
        .collect()
}

// ============================================
// Round trip
// ============================================

proptest! {
    /// Any subset of at least `threshold` responses reconstructs the plaintext
    #[test]
    fn prop_quorum_recovers_plaintext(
        plaintext in prop::collection::vec(any::<u8>(), 1..64),
        secret_id in prop::collection::vec(any::<u8>(), 1..24),
        (count, threshold, subset) in (1usize..=8)
            .prop_flat_map(|n| (Just(n), 1..=n))
            .prop_flat_map(|(n, t)| (Just(n), Just(t), proptest::sample::subsequence((1..=n).collect::<Vec<_>>(), t..=n))),
        version in 1u32..10,
        seed in any::<u64>(),
    ) {
        let engine = ShamirEngine::from_seed(seed);
        let shares = engine
            .protect_secret(&secret_id, &plaintext, &channels(count), threshold, version)
            .unwrap();
        prop_assert_eq!(shares.len(), count);

        let chosen: Vec<ChannelId> = subset.iter().map(|c| ChannelId::new(*c as u64)).collect();
        let responses = collect_responses(&engine, &shares, &chosen, &secret_id, version);
        let recovered = engine.recover_from_share_responses(&responses, &secret_id, version).unwrap();
        prop_assert_eq!(recovered, plaintext);
    }

    /// Fewer than `threshold` responses is always refused
    #[test]
    fn prop_below_threshold_is_refused(
        plaintext in prop::collection::vec(any::<u8>(), 1..32),
        (count, threshold) in (2usize..=8).prop_flat_map(|n| (Just(n), 2..=n)),
        seed in any::<u64>(),
    ) {
        let engine = ShamirEngine::from_seed(seed);
        let shares = engine.protect_secret(b"secret", &plaintext, &channels(count), threshold, 1).unwrap();

        let chosen = channels(threshold - 1);
        let responses = collect_responses(&engine, &shares, &chosen, b"secret", 1);
        let result = engine.recover_from_share_responses(&responses, b"secret", 1);
        let is_insufficient = matches!(result, Err(CryptoError::InsufficientShares { .. }));
        prop_assert!(is_insufficient);
    }

    /// A helper can always prove possession of the share it was given
    #[test]
    fn prop_verification_accepts_own_share(
        plaintext in prop::collection::vec(any::<u8>(), 1..32),
        holder in 1u64..=3,
        seed in any::<u64>(),
    ) {
        let engine = ShamirEngine::from_seed(seed);
        let shares = engine.protect_secret(b"secret", &plaintext, &channels(3), 2, 1).unwrap();
        let channel = ChannelId::new(holder);

        let request = engine.generate_verification_request(b"secret", 1).unwrap();
        let response = engine
            .generate_verification_response(b"secret", channel, &shares[&channel], &request)
            .unwrap();
        prop_assert!(engine.verify_share_response(b"secret", channel, &shares[&channel], &response).unwrap());
    }
}

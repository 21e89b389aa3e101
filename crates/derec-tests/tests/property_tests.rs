//! Property-based tests for the owner's protocol invariants
//!
//! These cover replay idempotence, threshold gating of reconstruction,
//! and helper liveness.

use std::sync::Arc;

use derec_core::{Envelope, Message, ParticipantId};
use derec_node::NodeConfig;
use derec_tests::{helper_id, CountingEngine, Network};
use proptest::prelude::*;

fn from_helper(n: u8, message: Message, now: u64) -> Envelope {
    Envelope::direct(helper_id(n).into(), ParticipantId::Owner, message, now)
}

// ============ Replay idempotence ============

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Replayed pairing responses and acknowledgements never duplicate helpers
    #[test]
    fn prop_replays_do_not_duplicate_helpers(
        replays in prop::collection::vec((1u8..=3, any::<bool>()), 1..20)
    ) {
        let mut net = Network::paired();
        let id = net.protect("pw", "s3cret").unwrap();

        for (n, pairing) in replays {
            let message = if pairing {
                Message::PairingResponse {
                    channel_id: helper_id(n).channel_id(),
                    response_data: Vec::new(),
                    accepted: true,
                    existing_secret_count: Some(1),
                }
            } else {
                Message::ShareAck {
                    secret_id: id.clone(),
                    received: true,
                }
            };
            let envelope = from_helper(n, message, net.now());
            net.inject(envelope);
        }

        prop_assert_eq!(net.owner().paired_count(), 3);
        prop_assert_eq!(net.owner().helpers().all().count(), 3);
        prop_assert_eq!(net.owner().helpers().with_share().count(), 3);
        prop_assert_eq!(net.owner().secrets().len(), 1);
        prop_assert!(net.owner().workflow().is_idle());
    }
}

// ============ Threshold gating ============

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Reconstruction waits for the threshold and then runs exactly once
    #[test]
    fn prop_reconstruction_runs_once_at_threshold(
        order in Just(vec![1u8, 2, 3]).prop_shuffle(),
        delivered in 1usize..=3,
    ) {
        let engine = Arc::new(CountingEngine::new(11));
        let mut net = Network::with_engine(NodeConfig::default(), engine.clone());
        net.start();
        net.pair_all().unwrap();
        let id = net.protect("pw", "s3cret").unwrap();

        // Collect every helper's answer without routing it
        let now = net.now();
        let requests = net.owner_mut().recover_secret(&id, now).unwrap();
        prop_assert_eq!(requests.len(), 3);
        let mut responses = Vec::new();
        for request in &requests {
            let n = request.to.and_then(|to| to.helper_id()).unwrap().get();
            responses.push((n, net.helper_mut(n).handle_message(request, now)));
        }

        for (i, n) in order.iter().take(delivered).enumerate() {
            let (_, out) = responses.iter().find(|(m, _)| m == n).unwrap();
            prop_assert_eq!(out.len(), 1);
            net.owner_mut().handle_message(&out[0], now);

            let seen = i + 1;
            let expected = usize::from(seen >= 2);
            prop_assert_eq!(engine.recoveries(), expected);
            prop_assert_eq!(net.owner().recovered().is_some(), seen >= 2);
        }

        if delivered >= 2 {
            prop_assert_eq!(&net.owner().recovered().unwrap().value, "s3cret");
            prop_assert_eq!(net.owner().pending_recovery_shares(&id), 0);
        } else {
            prop_assert_eq!(net.owner().pending_recovery_shares(&id), delivered);
        }
    }
}

// ============ Liveness ============

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// A silent helper stays online up to the threshold and is dropped
    /// within one sweep interval after it
    #[test]
    fn prop_silent_helper_goes_offline(silence in 0u64..30_000) {
        let mut net = Network::new();
        net.start();
        net.disconnect(helper_id(1).into());

        net.advance(silence);

        let config = net.config();
        let threshold = config.offline_threshold_ms;
        let sweep = config.liveness_check_interval_ms;
        if silence <= threshold {
            prop_assert!(net.owner().is_online(helper_id(1)));
        } else if silence >= threshold + sweep {
            prop_assert!(!net.owner().is_online(helper_id(1)));
        }
        prop_assert!(net.owner().is_online(helper_id(2)));
    }
}

#![no_main]

use arbitrary::Arbitrary;
use derec_core::ChannelId;
use derec_engine::{SecretSharingEngine, ShamirEngine};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    seed: u64,
    secret: Vec<u8>,
    channels: u8,
    threshold: u8,
    version: u32,
}

fuzz_target!(|input: Input| {
    let engine = ShamirEngine::from_seed(input.seed);
    let count = usize::from(input.channels % 8) + 1;
    let threshold = usize::from(input.threshold) % count + 1;
    let channels: Vec<ChannelId> = (1..=count as u64).map(ChannelId::new).collect();
    let secret_id = input.seed.to_le_bytes();

    let Ok(shares) =
        engine.protect_secret(&secret_id, &input.secret, &channels, threshold, input.version)
    else {
        return;
    };
    assert_eq!(shares.len(), count);

    // Any `threshold` consecutive holders must rebuild the secret
    let mut responses = derec_engine::ShareMap::new();
    for (channel, share) in shares.iter().take(threshold) {
        let request = engine
            .generate_share_request(*channel, &secret_id, input.version)
            .unwrap();
        let response = engine
            .generate_share_response(&secret_id, *channel, share, &request)
            .unwrap();
        responses.insert(*channel, response);
    }
    let recovered = engine
        .recover_from_share_responses(&responses, &secret_id, input.version)
        .unwrap();
    assert_eq!(recovered, input.secret);
});

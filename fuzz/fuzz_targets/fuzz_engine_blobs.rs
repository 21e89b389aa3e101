#![no_main]

use arbitrary::Arbitrary;
use derec_core::ChannelId;
use derec_engine::{SecretSharingEngine, ShamirEngine};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    channel: u8,
    version: u32,
    secret_id: Vec<u8>,
    share: Vec<u8>,
    request: Vec<u8>,
    responses: Vec<(u8, Vec<u8>)>,
}

fuzz_target!(|input: Input| {
    let engine = ShamirEngine::from_seed(0);
    let channel = ChannelId::new(u64::from(input.channel));

    // Helper-side operations on untrusted blobs must fail cleanly
    let _ = engine.generate_share_response(&input.secret_id, channel, &input.share, &input.request);
    let _ = engine.generate_verification_response(
        &input.secret_id,
        channel,
        &input.share,
        &input.request,
    );
    let _ = engine.verify_share_response(&input.secret_id, channel, &input.share, &input.request);

    // Owner-side reconstruction from arbitrary responses
    let responses = input
        .responses
        .into_iter()
        .map(|(c, blob)| (ChannelId::new(u64::from(c)), blob))
        .collect();
    let _ = engine.recover_from_share_responses(&responses, &input.secret_id, input.version);
});

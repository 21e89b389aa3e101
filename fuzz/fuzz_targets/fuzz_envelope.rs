#![no_main]

use derec_core::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(envelope) = Envelope::from_json(frame) {
        // Anything accepted must survive re-encoding unchanged
        let reencoded = envelope.to_json().unwrap();
        let again = Envelope::from_json(&reencoded).unwrap();
        assert_eq!(envelope, again);

        // Addressing never lets a sender hear itself
        assert!(!envelope.is_for(envelope.from));
    }
});

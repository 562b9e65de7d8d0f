#![no_main]

use latchkey_core::master::ExportEnvelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Import accepts a pasted string from anywhere; it must never panic
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(envelope) = ExportEnvelope::decode(text) {
            // Decode already shape-checked these
            assert!(!envelope.version.is_empty());
            assert!(!envelope.config.is_empty());

            // Round-trip preserves the sealed payload
            let reencoded = envelope.encode().unwrap();
            let envelope2 = ExportEnvelope::decode(&reencoded).unwrap();
            assert_eq!(envelope.version, envelope2.version);
            assert_eq!(envelope.config, envelope2.config);
        }
    }
});

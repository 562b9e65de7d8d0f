#![no_main]

use latchkey_core::crypto::SealedBlob;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // A store file is attacker-writable input; parsing must never panic
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(blob) = SealedBlob::decode(text) {
            // Opening a tampered blob fails closed, it does not panic
            let _ = blob.open("fuzz-passphrase");

            // Accepted blobs round-trip
            let reencoded = blob.encode().unwrap();
            let blob2 = SealedBlob::decode(&reencoded).unwrap();
            assert_eq!(blob.salt, blob2.salt);
            assert_eq!(blob.iv, blob2.iv);
            assert_eq!(blob.auth_tag, blob2.auth_tag);
            assert_eq!(blob.encrypted, blob2.encrypted);
        }
    }
});

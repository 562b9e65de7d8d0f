//! Property-based tests for latchkey-core using proptest
//!
//! These tests verify invariants that should hold for all valid inputs.

use chrono::{Duration, TimeZone, Utc};
use latchkey_core::{
    crypto::{self, SealedBlob},
    error::CoreError,
    policy::UserPolicy,
    types::UserId,
};
use proptest::prelude::*;

// ============================================
// Arbitrary Implementations
// ============================================

fn arb_passphrase() -> impl Strategy<Value = String> {
    "[ -~]{1,40}"
}

fn arb_plaintext() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

fn arb_numbers() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[ ]{0,2}[+0-9]{0,12}[ ]{0,2}", 0..5)
}

fn arb_policy() -> impl Strategy<Value = UserPolicy> {
    ("[0-9]{1,6}", arb_numbers(), 1u32..=10_080).prop_map(|(uid, numbers, skip)| {
        UserPolicy::new(UserId::new(uid), numbers, skip)
    })
}

// ============================================
// Property Tests
// ============================================

proptest! {
    // ----------------------------------------
    // Sealed Blob Properties
    // ----------------------------------------

    #[test]
    fn sealed_blob_roundtrip(plaintext in arb_plaintext(), passphrase in arb_passphrase()) {
        let sealed = crypto::seal(&plaintext, &passphrase).unwrap();
        let opened = crypto::open(&sealed, &passphrase).unwrap();
        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn sealed_blob_wrong_passphrase_always_fails(
        plaintext in arb_plaintext(),
        passphrase in arb_passphrase(),
        other in arb_passphrase(),
    ) {
        prop_assume!(passphrase != other);
        let sealed = crypto::seal(&plaintext, &passphrase).unwrap();
        let result = crypto::open(&sealed, &other);
        prop_assert!(matches!(result, Err(CoreError::DecryptionFailed)));
    }

    #[test]
    fn sealed_blob_any_ciphertext_flip_fails(
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        passphrase in arb_passphrase(),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut blob = SealedBlob::seal(&plaintext, &passphrase).unwrap();
        let i = index.index(blob.encrypted.len());
        blob.encrypted[i] ^= 1 << bit;
        prop_assert!(matches!(blob.open(&passphrase), Err(CoreError::DecryptionFailed)));
    }

    #[test]
    fn sealed_blob_encoding_roundtrip(plaintext in arb_plaintext(), passphrase in arb_passphrase()) {
        let blob = SealedBlob::seal(&plaintext, &passphrase).unwrap();
        let decoded = SealedBlob::decode(&blob.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded.salt, blob.salt);
        prop_assert_eq!(decoded.iv, blob.iv);
        prop_assert_eq!(decoded.auth_tag, blob.auth_tag);
        prop_assert_eq!(decoded.encrypted, blob.encrypted);
    }

    // ----------------------------------------
    // Password Hash Properties
    // ----------------------------------------

    #[test]
    fn password_hash_verifies_original_only(
        password in arb_passphrase(),
        other in arb_passphrase(),
    ) {
        let stored = crypto::hash_password(&password);
        prop_assert!(crypto::verify_password(&password, &stored));
        if password != other {
            prop_assert!(!crypto::verify_password(&other, &stored));
        }
    }

    // ----------------------------------------
    // Skip Window Properties
    // ----------------------------------------

    #[test]
    fn skip_window_boundary(skip_minutes in 1u32..=1440, offset_secs in 0i64..=120) {
        let mut policy = UserPolicy::new(
            UserId::new("1000"),
            vec!["+15550100".to_string()],
            skip_minutes,
        );
        let verified = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        policy.mark_verified(verified);

        let window = Duration::minutes(i64::from(skip_minutes));

        // Inside the window: never required
        let inside = verified + window - Duration::seconds(offset_secs + 1);
        if inside > verified {
            prop_assert!(!policy.otp_required(inside));
        }

        // On or past the boundary: always required
        let at_or_past = verified + window + Duration::seconds(offset_secs);
        prop_assert!(policy.otp_required(at_or_past));
    }

    #[test]
    fn unverified_policy_always_requires_otp(policy in arb_policy(), secs in 0i64..=1_000_000) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(secs);
        prop_assert!(policy.otp_required(now));
    }

    // ----------------------------------------
    // Normalization Properties
    // ----------------------------------------

    #[test]
    fn normalize_is_idempotent_and_clean(policy in arb_policy()) {
        let mut once = policy.clone();
        once.normalize();
        for number in &once.mobile_numbers {
            prop_assert!(!number.is_empty());
            prop_assert_eq!(number.trim(), number.as_str());
        }

        let mut twice = once.clone();
        twice.normalize();
        prop_assert_eq!(once.mobile_numbers, twice.mobile_numbers);
    }
}

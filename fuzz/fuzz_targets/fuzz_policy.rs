#![no_main]

use arbitrary::Arbitrary;
use chrono::Utc;
use latchkey_core::{UserId, UserPolicy};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct PolicyInput {
    user_id: String,
    mobile_numbers: Vec<String>,
    skip_duration_minutes: u32,
    enabled: bool,
    verified: bool,
}

fuzz_target!(|input: PolicyInput| {
    let mut policy = UserPolicy::new(
        UserId::new(input.user_id),
        input.mobile_numbers,
        input.skip_duration_minutes,
    );
    policy.enabled = input.enabled;
    if input.verified {
        policy.mark_verified(Utc::now());
    }

    policy.normalize();
    let _ = policy.validate();

    // Normalized numbers carry no surrounding whitespace and no empties
    assert!(policy
        .mobile_numbers
        .iter()
        .all(|n| !n.is_empty() && n.trim() == n.as_str()));

    // A second pass changes nothing
    let once = policy.mobile_numbers.clone();
    policy.normalize();
    assert_eq!(policy.mobile_numbers, once);

    // Window math holds for every configurable duration
    let _ = policy.otp_required(Utc::now());
    let _ = policy.skip_expires_at();
});

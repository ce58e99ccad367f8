#![no_main]

use ftui_regtest::{NormalizeContext, Normalizer, TestIdentity};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Cap length to keep fuzzing fast.
    if text.len() > 4096 {
        return;
    }

    let identity = TestIdentity::new("fuzz.rs::normalize");
    let context = NormalizeContext::new(&identity, None);

    // Lenient normalization must never fail or panic.
    let lenient = Normalizer::new(false);
    let once = lenient
        .normalize(text, &context)
        .expect("lenient normalization is infallible");

    // Normalizing twice changes nothing.
    let twice = lenient
        .normalize(&once, &context)
        .expect("lenient normalization is infallible");
    assert_eq!(once, twice, "normalization is not idempotent");

    // Strict mode only rejects; when it accepts it agrees with lenient mode.
    if let Ok(strict) = Normalizer::new(true).normalize(text, &context) {
        assert_eq!(strict, once);
    }
});

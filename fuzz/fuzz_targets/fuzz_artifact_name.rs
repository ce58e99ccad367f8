#![no_main]

use ftui_regtest::identity::{HASHED_TEST_PART_LEN, MAX_TEST_PART_LEN};
use ftui_regtest::resolve;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if text.len() > 1024 {
        return;
    }

    // Optional sub identifier after the first NUL.
    let (qualified, sub) = match text.split_once('\0') {
        Some((qualified, sub)) => (qualified, Some(sub)),
        None => (text, None),
    };

    let name = resolve(qualified, sub);
    assert_eq!(name, resolve(qualified, sub), "naming is not deterministic");
    assert!(name.as_str().ends_with(".out"));
    assert!(
        !name.as_str().contains(['/', '\\']),
        "path separator in artifact name {name}"
    );

    // A long test part is hashed down to a fixed length.
    if let Some((_, test_part)) = qualified.split_once("::") {
        let escaped = test_part.replace(['/', '\\'], "--");
        if escaped.chars().count() > MAX_TEST_PART_LEN && sub.is_none() {
            let hashed = name
                .as_str()
                .strip_suffix(".out")
                .and_then(|rest| rest.rsplit_once('.'))
                .map(|(_, hash)| hash)
                .expect("hashed test part");
            assert_eq!(hashed.len(), HASHED_TEST_PART_LEN);
        }
    }
});

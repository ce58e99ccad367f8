#![no_main]

use arbitrary::Arbitrary;
use ftui_regtest::compare;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    current: &'a str,
    golden: &'a str,
    ignore_trailing_whitespace: bool,
}

fuzz_target!(|input: Input<'_>| {
    // Cap length to keep the LCS table small.
    if input.current.len() > 2048 || input.golden.len() > 2048 {
        return;
    }

    let result = compare(input.current, input.golden, input.ignore_trailing_whitespace);
    assert_eq!(result.equal, result.diff_lines.is_empty());
    assert_eq!(result.equal, result.current_lines == result.golden_lines);

    if !result.equal {
        assert_eq!(result.diff_lines[0], "--- current");
        assert_eq!(result.diff_lines[1], "+++ golden");
        // Every body line carries a diff marker.
        for line in &result.diff_lines[2..] {
            assert!(
                line.starts_with("@@ ")
                    || line.starts_with(' ')
                    || line.starts_with('-')
                    || line.starts_with('+'),
                "unmarked diff line {line:?}"
            );
        }
    }

    // Comparing with itself is always equal.
    assert!(compare(input.current, input.current, input.ignore_trailing_whitespace).equal);
});

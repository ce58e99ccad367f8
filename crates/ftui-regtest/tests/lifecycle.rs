//! End-to-end lifecycle of regression tests against a scratch source tree.
//!
//! Each test builds its own [`RunContext`] so the process environment
//! (`FTUI_REGTEST_RESET`, `BLESS`) cannot change the outcome.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use ftui_regtest::config::ResetScope;
use ftui_regtest::normalize::{
    FIXTURE_TMPDIR_PLACEHOLDER, MANAGED_TMPDIR_PLACEHOLDER, PROCESS_TMPDIR_PLACEHOLDER,
};
use ftui_regtest::report::DIFF_LINE_PREFIX;
use ftui_regtest::{
    BodyStatus, CaptureBuffer, ConverterRule, Invocation, Mode, OutcomeStatus, RegtestConfig,
    RegtestError, RunContext, StdoutRedirect, TestIdentity, regtest_println, run_regtest,
};
use tempfile::tempdir;

fn source_file(root: &Path) -> PathBuf {
    root.join("tests").join("widgets.rs")
}

fn invocation(root: &Path, test: &str) -> Invocation {
    Invocation::new(
        TestIdentity::new(format!("tests/widgets.rs::{test}")),
        source_file(root),
    )
}

fn compare_ctx() -> RunContext {
    RunContext::new(RegtestConfig::default())
}

fn reset_ctx() -> RunContext {
    RunContext::new(RegtestConfig {
        reset: ResetScope::All,
        ..RegtestConfig::default()
    })
}

fn run_text(ctx: &RunContext, inv: Invocation, text: &str) -> ftui_regtest::RegtestOutcome {
    let mut rt = ctx.begin(inv);
    rt.write(text);
    ctx.finish(rt, BodyStatus::Passed).expect("finish")
}

#[test]
fn first_run_without_golden_reports_mismatch() {
    let temp = tempdir().expect("tempdir");
    let ctx = compare_ctx();
    let outcome = run_text(&ctx, invocation(temp.path(), "first"), "hello\n");

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    let comparison = outcome.comparison.expect("compared");
    assert!(!comparison.equal);
    assert_eq!(comparison.golden_lines, vec![""]);
    assert!(!outcome.golden_path.exists(), "compare mode never writes");
    assert!(outcome.report.contains("FTUI_REGTEST_RESET=1"));
}

#[test]
fn reset_records_and_next_run_passes() {
    let temp = tempdir().expect("tempdir");

    let recorded = run_text(&reset_ctx(), invocation(temp.path(), "greets"), "hello\n");
    assert_eq!(recorded.mode, Mode::Reset);
    assert_eq!(
        recorded.golden_path,
        temp.path()
            .join("tests")
            .join("_regtest_outputs")
            .join("widgets.greets.out")
    );
    assert_eq!(
        fs::read_to_string(&recorded.golden_path).expect("golden"),
        "hello\n"
    );

    let ctx = compare_ctx();
    let outcome = run_text(&ctx, invocation(temp.path(), "greets"), "hello\n");
    assert_eq!(outcome.status, OutcomeStatus::Passed);
    assert!(outcome.report.is_empty());
    assert_eq!(ctx.summary().tally.passed, 1);
}

#[test]
fn scoped_reset_only_records_matching_tests() {
    let temp = tempdir().expect("tempdir");
    let ctx = RunContext::new(RegtestConfig {
        reset: ResetScope::Matching(vec!["::table".into()]),
        ..RegtestConfig::default()
    });

    let table = run_text(&ctx, invocation(temp.path(), "table"), "rows\n");
    let list = run_text(&ctx, invocation(temp.path(), "list"), "items\n");
    assert_eq!(table.mode, Mode::Reset);
    assert!(table.golden_path.exists());
    assert_eq!(list.mode, Mode::Compare);
    assert_eq!(list.status, OutcomeStatus::Failed);
    assert_eq!(ctx.summary().tally.recorded, 1);
}

#[test]
fn temp_paths_normalize_identically_across_machines() {
    let project = tempdir().expect("tempdir");
    let normalized: Vec<String> = (0..2)
        .map(|_| {
            let scratch = tempdir().expect("scratch");
            let ctx = reset_ctx();
            let mut rt = ctx.begin(invocation(project.path(), "paths"));
            rt.set_tmpdir(scratch.path());
            writeln!(rt, "wrote {}", scratch.path().join("out.txt").display()).expect("write");
            ctx.finish(rt, BodyStatus::Passed)
                .expect("finish")
                .normalized
        })
        .collect();

    assert_eq!(normalized[0], normalized[1]);
    assert_eq!(
        normalized[0],
        format!("wrote {FIXTURE_TMPDIR_PLACEHOLDER}/out.txt\n")
    );
}

#[test]
fn unmanaged_temp_paths_fall_back_to_env_placeholders() {
    let project = tempdir().expect("tempdir");
    let scratch = tempdir().expect("scratch");
    let ctx = reset_ctx();
    let mut rt = ctx.begin(invocation(project.path(), "env_paths"));
    writeln!(rt, "{}", scratch.path().join("log").display()).expect("write");
    writeln!(rt, "{}", std::env::temp_dir().join("cache").display()).expect("write");
    let outcome = ctx.finish(rt, BodyStatus::Passed).expect("finish");

    assert_eq!(
        outcome.normalized,
        format!("{MANAGED_TMPDIR_PLACEHOLDER}/log\n{PROCESS_TMPDIR_PLACEHOLDER}/cache\n")
    );
}

#[test]
fn object_addresses_are_masked() {
    let temp = tempdir().expect("tempdir");
    let ctx = reset_ctx();
    let outcome = run_text(
        &ctx,
        invocation(temp.path(), "addresses"),
        "<Widget at 0x7ffd5e8c1a20>\nflags=0x1\n",
    );
    assert_eq!(outcome.normalized, "<Widget at 0x?????????>\nflags=0x1\n");
}

#[test]
fn expected_failure_with_mismatch_is_skipped() {
    let temp = tempdir().expect("tempdir");
    let ctx = compare_ctx();
    let inv = invocation(temp.path(), "known_bad").expect_fail(true);
    let outcome = run_regtest(&ctx, inv, |rt| {
        rt.write("not what the golden says\n");
        assert_eq!(1 + 1, 3, "known arithmetic bug");
    })
    .expect("finish");

    assert_eq!(outcome.status, OutcomeStatus::Skipped);
    assert!(outcome.is_mismatch());
    assert_eq!(ctx.summary().tally.skipped, 1);
    assert_eq!(ctx.summary().tally.failed, 0);
}

#[test]
fn sub_identifiers_have_independent_golden_files() {
    let temp = tempdir().expect("tempdir");
    let record = |sub: &str, text: &str| {
        let ctx = reset_ctx();
        let mut rt = ctx.begin(invocation(temp.path(), "themes"));
        rt.set_identifier(sub);
        rt.write(text);
        ctx.finish(rt, BodyStatus::Passed).expect("record")
    };
    let a = record("a", "light\n");
    let b = record("b", "dark\n");
    assert_ne!(a.golden_path, b.golden_path);
    assert!(a.golden_path.ends_with("widgets.themes__a.out"));
    assert!(b.golden_path.ends_with("widgets.themes__b.out"));

    let ctx = compare_ctx();
    let check = |sub: &str, text: &str| {
        let mut rt = ctx.begin(invocation(temp.path(), "themes"));
        rt.set_identifier(sub);
        rt.write(text);
        ctx.finish(rt, BodyStatus::Passed).expect("compare")
    };
    assert_eq!(check("a", "light\n").status, OutcomeStatus::Passed);
    assert_eq!(check("b", "changed\n").status, OutcomeStatus::Failed);

    let summary = ctx.summary();
    assert_eq!(summary.mismatches.len(), 1);
    assert_eq!(summary.mismatches[0].identity, "tests/widgets.rs::themes[b]");
}

#[test]
fn stdout_redirect_feeds_the_fixture() {
    let temp = tempdir().expect("tempdir");
    let ctx = reset_ctx();
    let outcome = run_regtest(&ctx, invocation(temp.path(), "printing"), |rt| {
        rt.write("direct\n");
        {
            let _redirect = rt.capture_stdout().expect("redirect");
            regtest_println!("via stdout {}", 42);
        }
        rt.write("after\n");
    })
    .expect("finish");
    assert_eq!(outcome.normalized, "direct\nvia stdout 42\nafter\n");
}

#[test]
fn nested_redirect_is_rejected() {
    let mut outer = CaptureBuffer::new();
    let mut inner = CaptureBuffer::new();
    let _guard = StdoutRedirect::install(&mut outer).expect("first redirect");
    let err = StdoutRedirect::install(&mut inner).expect_err("second redirect");
    assert!(matches!(err, RegtestError::RedirectActive));
}

#[test]
fn converter_hooks_wrap_the_standard_stage() {
    let temp = tempdir().expect("tempdir");
    let ctx = reset_ctx();
    ctx.register_converter_pre(
        ConverterRule::pattern("timestamps", r"\d{2}:\d{2}:\d{2}", "HH:MM:SS")
            .expect("valid pattern"),
    );
    ctx.register_converter_post(ConverterRule::text_only("sort-lines", |text| {
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort_unstable();
        lines.join("\n")
    }));

    let outcome = run_text(
        &ctx,
        invocation(temp.path(), "hooks"),
        "zeta 12:00:01\nalpha 09:15:33\n",
    );
    assert_eq!(outcome.normalized, "alpha HH:MM:SS\nzeta HH:MM:SS");
}

#[test]
fn trailing_whitespace_is_ignored_unless_requested() {
    let temp = tempdir().expect("tempdir");
    run_text(&reset_ctx(), invocation(temp.path(), "spaces"), "cell\n");

    let lenient = run_text(&compare_ctx(), invocation(temp.path(), "spaces"), "cell   \n");
    assert_eq!(lenient.status, OutcomeStatus::Passed);

    let exact = RunContext::new(RegtestConfig {
        regard_line_endings: true,
        ..RegtestConfig::default()
    });
    let strict = run_text(&exact, invocation(temp.path(), "spaces"), "cell   \n");
    assert_eq!(strict.status, OutcomeStatus::Failed);
}

#[test]
fn lenient_printable_accepts_control_characters() {
    let temp = tempdir().expect("tempdir");
    let ctx = RunContext::new(RegtestConfig {
        reset: ResetScope::All,
        strict_printable: false,
        ..RegtestConfig::default()
    });
    let outcome = run_text(&ctx, invocation(temp.path(), "bell"), "ding\u{7}\n");
    assert_eq!(outcome.normalized, "ding\u{7}\n");

    let strict = reset_ctx();
    let mut rt = strict.begin(invocation(temp.path(), "bell"));
    rt.write("ding\u{7}\n");
    let err = strict
        .finish(rt, BodyStatus::Passed)
        .expect_err("control character");
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn tee_echoes_normalized_output_in_both_modes() {
    let temp = tempdir().expect("tempdir");
    let tee_ctx = |reset| {
        RunContext::new(RegtestConfig {
            reset,
            tee: true,
            ..RegtestConfig::default()
        })
    };
    let expected = "--- regtest output of tests/widgets.rs::teed ---\nat 0x?????????\n---\n";

    for (reset, mode) in [(ResetScope::All, Mode::Reset), (ResetScope::Off, Mode::Compare)] {
        let ctx = tee_ctx(reset);
        let mut rt = ctx.begin(invocation(temp.path(), "teed"));
        rt.write("at 0xbeef\n");

        let mut echoed = CaptureBuffer::new();
        let outcome = {
            let _redirect = StdoutRedirect::install(&mut echoed).expect("redirect");
            ctx.finish(rt, BodyStatus::Passed).expect("finish")
        };
        assert_eq!(outcome.mode, mode);
        assert_eq!(outcome.status, OutcomeStatus::Passed);
        assert_eq!(echoed.current_contents(), expected);
    }
}

#[test]
fn nodiff_hides_the_listing_but_still_fails() {
    let temp = tempdir().expect("tempdir");
    let ctx = RunContext::new(RegtestConfig {
        nodiff: true,
        ..RegtestConfig::default()
    });
    let outcome = run_text(&ctx, invocation(temp.path(), "quiet"), "unrecorded\n");

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(outcome.is_mismatch());
    assert!(!outcome.report.contains(DIFF_LINE_PREFIX));
    assert!(outcome.report.contains("--regtest-nodiff"));
    let record = ctx.failure(&outcome.identity).expect("ledger entry");
    assert!(!record.diff_lines.is_empty());
}

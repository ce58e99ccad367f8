//! Per-test lifecycle.
//!
//! ```text
//! Idle -> Capturing -> Normalizing -> Persisting (reset)  -> Reported
//!                                  \-> Comparing (default) -/
//! ```
//!
//! Normalization runs whatever the body's own result was, so output is still
//! recorded or compared for a test whose assertions failed.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError, RwLock};

use serde::Serialize;
use tracing::{info_span, trace, warn};

use crate::capture::{self, CaptureBuffer, StdoutRedirect};
use crate::compare::{ComparisonResult, compare};
use crate::config::RegtestConfig;
use crate::error::Result;
use crate::identity::TestIdentity;
use crate::normalize::{ConverterRule, NormalizeContext, Normalizer};
use crate::report::{
    FailureLedger, FailureRecord, RunSummary, Tally, render_failure, render_recorded, render_tee,
};
use crate::store::GoldenStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Capturing,
    Normalizing,
    Persisting,
    Comparing,
    Reported,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Normalizing => "normalizing",
            Self::Persisting => "persisting",
            Self::Comparing => "comparing",
            Self::Reported => "reported",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Reset,
    Compare,
}

/// How the test body itself ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStatus {
    Passed,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Skipped,
}

/// Static facts about a test, known before its body runs.
#[derive(Debug, Clone)]
pub struct Invocation {
    identity: TestIdentity,
    source_file: PathBuf,
    expect_fail: bool,
}

impl Invocation {
    pub fn new(identity: TestIdentity, source_file: impl Into<PathBuf>) -> Self {
        Self {
            identity,
            source_file: source_file.into(),
            expect_fail: false,
        }
    }

    /// Mark the test as expected to fail; a failing body or a mismatch then
    /// ends as [`OutcomeStatus::Skipped`].
    #[must_use]
    pub fn expect_fail(mut self, expect_fail: bool) -> Self {
        self.expect_fail = expect_fail;
        self
    }

    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn is_expect_fail(&self) -> bool {
        self.expect_fail
    }
}

/// The fixture handed to a test body.
#[derive(Debug)]
pub struct Regtest {
    invocation: Invocation,
    identifier: Option<String>,
    tmpdir: Option<PathBuf>,
    buffer: CaptureBuffer,
    phase: Phase,
}

impl Regtest {
    fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            identifier: None,
            tmpdir: None,
            buffer: CaptureBuffer::new(),
            phase: Phase::Idle,
        }
    }

    pub fn write(&mut self, text: &str) {
        self.buffer.append(text);
    }

    /// Select one of several golden files for this test function.
    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = Some(identifier.into());
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Declare the temp directory this test writes into; its path is
    /// normalized to a placeholder.
    pub fn set_tmpdir(&mut self, path: impl Into<PathBuf>) {
        self.tmpdir = Some(path.into());
    }

    pub fn tmpdir(&self) -> Option<&Path> {
        self.tmpdir.as_deref()
    }

    /// Capture [`regtest_println!`](crate::regtest_println) output until the
    /// returned guard is dropped.
    pub fn capture_stdout(&mut self) -> Result<StdoutRedirect<'_>> {
        StdoutRedirect::install(&mut self.buffer)
    }

    pub fn contents(&self) -> String {
        self.buffer.current_contents()
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Identity including the sub identifier chosen so far.
    pub fn identity(&self) -> TestIdentity {
        let base = self.invocation.identity.clone();
        match &self.identifier {
            Some(sub) => base.with_sub_identifier(sub.clone()),
            None => base,
        }
    }
}

impl fmt::Write for Regtest {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buffer.append(s);
        Ok(())
    }
}

impl io::Write for Regtest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.buffer, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RegtestOutcome {
    pub identity: TestIdentity,
    pub mode: Mode,
    pub status: OutcomeStatus,
    pub body: BodyStatus,
    pub golden_path: PathBuf,
    pub normalized: String,
    /// `None` in reset mode.
    pub comparison: Option<ComparisonResult>,
    /// Text for the user: the failure report or the recording notice.
    pub report: String,
}

impl RegtestOutcome {
    pub fn is_mismatch(&self) -> bool {
        self.comparison.as_ref().is_some_and(|c| !c.equal)
    }

    /// Turn the outcome into a libtest result: panic when it failed.
    pub fn enforce(self) {
        match self.status {
            OutcomeStatus::Passed => {}
            OutcomeStatus::Skipped => {
                capture::print_fmt(format_args!("skipped (expected failure): {}\n", self.identity));
            }
            OutcomeStatus::Failed => match &self.body {
                BodyStatus::Failed(message) => {
                    panic!("{message}\n{}", self.report)
                }
                BodyStatus::Passed => panic!("{}", self.report),
            },
        }
    }
}

/// State shared by all tests of one run: configuration, hooks, mismatches.
#[derive(Debug)]
pub struct RunContext {
    config: RegtestConfig,
    normalizer: RwLock<Normalizer>,
    ledger: Mutex<FailureLedger>,
    tally: Mutex<Tally>,
}

impl RunContext {
    pub fn new(config: RegtestConfig) -> Self {
        let normalizer = Normalizer::new(config.strict_printable);
        Self {
            config,
            normalizer: RwLock::new(normalizer),
            ledger: Mutex::new(FailureLedger::default()),
            tally: Mutex::new(Tally::default()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(RegtestConfig::from_env())
    }

    /// Context of this test process, configured from the environment.
    ///
    /// Only the [`regtest!`](crate::regtest) macro needs it; code that can
    /// pass a context around should own one instead.
    pub fn shared() -> &'static Self {
        static SHARED: OnceLock<RunContext> = OnceLock::new();
        SHARED.get_or_init(Self::from_env)
    }

    pub fn config(&self) -> &RegtestConfig {
        &self.config
    }

    /// Returns `false` if a rule with the same name was already registered.
    pub fn register_converter_pre(&self, rule: ConverterRule) -> bool {
        self.normalizer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_pre(rule)
    }

    /// Returns `false` if a rule with the same name was already registered.
    pub fn register_converter_post(&self, rule: ConverterRule) -> bool {
        self.normalizer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_post(rule)
    }

    pub fn normalize(&self, raw: &str, context: &NormalizeContext<'_>) -> Result<String> {
        self.normalizer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .normalize(raw, context)
    }

    pub fn begin(&self, invocation: Invocation) -> Regtest {
        let mut regtest = Regtest::new(invocation);
        advance(&mut regtest.phase, Phase::Capturing);
        regtest
    }

    /// Run the end-of-test pipeline for a finished body.
    ///
    /// # Errors
    ///
    /// Unprintable output and storage failures propagate; a mismatch does not,
    /// it is reported through the returned outcome and the failure ledger.
    pub fn finish(&self, regtest: Regtest, body: BodyStatus) -> Result<RegtestOutcome> {
        let identity = regtest.identity();
        let Regtest {
            invocation,
            tmpdir,
            buffer,
            mut phase,
            ..
        } = regtest;
        let mode = if self.config.reset.applies_to(identity.qualified_name()) {
            Mode::Reset
        } else {
            Mode::Compare
        };
        let _span = info_span!(
            "regtest.finish",
            identity = %identity,
            mode = ?mode
        )
        .entered();

        advance(&mut phase, Phase::Normalizing);
        let raw = buffer.into_text(self.config.strict_printable, &identity)?;
        let normalized = self.normalize(&raw, &NormalizeContext::new(&identity, tmpdir.as_deref()))?;
        if self.config.tee {
            capture::print_fmt(format_args!("{}", render_tee(&identity, &normalized)));
        }

        let store = GoldenStore::for_source_file(invocation.source_file());
        let name = identity.artifact_name();
        let golden_path = store.path_for(&name);
        let body_outcome = body_outcome(&body, invocation.is_expect_fail());

        let (status, comparison, report) = match mode {
            Mode::Reset => {
                advance(&mut phase, Phase::Persisting);
                let path = store.save(&name, &normalized)?;
                (body_outcome, None, render_recorded(&identity, &path))
            }
            Mode::Compare => {
                advance(&mut phase, Phase::Comparing);
                let golden = store.load(&name)?;
                let comparison = compare(
                    &normalized,
                    &golden,
                    self.config.ignore_trailing_whitespace(),
                );
                if comparison.equal {
                    (body_outcome, Some(comparison), String::new())
                } else {
                    let record = FailureRecord {
                        identity: identity.to_string(),
                        golden_path: golden_path.clone(),
                        current_lines: comparison.current_lines.clone(),
                        golden_lines: comparison.golden_lines.clone(),
                        diff_lines: comparison.diff_lines.clone(),
                    };
                    warn!(
                        identity = %identity,
                        golden = %golden_path.display(),
                        diff_lines = record.diff_lines.len(),
                        "regression output mismatch"
                    );
                    let report = render_failure(&record, self.config.nodiff);
                    self.ledger
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .record(record);
                    let status = if invocation.is_expect_fail() {
                        OutcomeStatus::Skipped
                    } else {
                        OutcomeStatus::Failed
                    };
                    (status, Some(comparison), report)
                }
            }
        };

        advance(&mut phase, Phase::Reported);
        self.count(status, mode);
        Ok(RegtestOutcome {
            identity,
            mode,
            status,
            body,
            golden_path,
            normalized,
            comparison,
            report,
        })
    }

    /// Mismatch recorded for `identity` during this run, if any.
    pub fn failure(&self, identity: &TestIdentity) -> Option<FailureRecord> {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn summary(&self) -> RunSummary {
        let tally = *self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        RunSummary::new(tally, &ledger)
    }

    fn count(&self, status: OutcomeStatus, mode: Mode) {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        match status {
            OutcomeStatus::Passed => tally.passed += 1,
            OutcomeStatus::Failed => tally.failed += 1,
            OutcomeStatus::Skipped => tally.skipped += 1,
        }
        if mode == Mode::Reset {
            tally.recorded += 1;
        }
    }
}

/// Outcome from the body alone. An expected failure that fails is skipped;
/// one that passes counts as passed.
fn body_outcome(body: &BodyStatus, expect_fail: bool) -> OutcomeStatus {
    match (body, expect_fail) {
        (BodyStatus::Passed, _) => OutcomeStatus::Passed,
        (BodyStatus::Failed(_), false) => OutcomeStatus::Failed,
        (BodyStatus::Failed(_), true) => OutcomeStatus::Skipped,
    }
}

fn advance(phase: &mut Phase, next: Phase) {
    trace!(from = phase.as_str(), to = next.as_str(), "regtest phase");
    *phase = next;
}

/// Run `body` as one regression test and finish it.
///
/// A panicking body is caught so its output is still processed, then the
/// panic is resumed unless the invocation expects failure.
pub fn run_regtest<F>(ctx: &RunContext, invocation: Invocation, body: F) -> Result<RegtestOutcome>
where
    F: FnOnce(&mut Regtest),
{
    let expect_fail = invocation.is_expect_fail();
    let mut regtest = ctx.begin(invocation);
    let (status, payload) = match catch_unwind(AssertUnwindSafe(|| body(&mut regtest))) {
        Ok(()) => (BodyStatus::Passed, None),
        Err(payload) => (BodyStatus::Failed(panic_message(payload.as_ref())), Some(payload)),
    };

    let finished = ctx.finish(regtest, status);
    if let Some(payload) = payload {
        if !expect_fail {
            if let Err(err) = &finished {
                warn!(error = %err, "regtest could not finish after the body panicked");
            }
            resume_unwind(payload);
        }
    }
    finished
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test body panicked".to_string()
    }
}

/// Path of the enclosing function, as `std::any::type_name` spells it.
#[macro_export]
macro_rules! function_path {
    () => {{
        fn __regtest_marker() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = type_name_of(__regtest_marker);
        name.strip_suffix("::__regtest_marker").unwrap_or(name)
    }};
}

/// Run the block as a regression test of the enclosing `#[test]` function.
///
/// ```ignore
/// #[test]
/// fn renders_table() {
///     ftui_regtest::regtest!(|rt| {
///         writeln!(rt, "{}", render_table()).unwrap();
///     });
/// }
/// ```
///
/// `regtest!(expect_fail, |rt| { .. })` marks the test as expected to fail.
/// `regtest!(in &ctx, ..)` runs against `ctx` instead of the shared,
/// environment-configured context.
#[macro_export]
macro_rules! regtest {
    (in $ctx:expr, expect_fail, |$rt:ident| $body:block) => {
        $crate::regtest!(@run $ctx, true, |$rt| $body)
    };
    (in $ctx:expr, |$rt:ident| $body:block) => {
        $crate::regtest!(@run $ctx, false, |$rt| $body)
    };
    (expect_fail, |$rt:ident| $body:block) => {
        $crate::regtest!(@run $crate::RunContext::shared(), true, |$rt| $body)
    };
    (|$rt:ident| $body:block) => {
        $crate::regtest!(@run $crate::RunContext::shared(), false, |$rt| $body)
    };
    (@run $ctx:expr, $expect_fail:expr, |$rt:ident| $body:block) => {{
        let invocation = $crate::Invocation::new(
            $crate::TestIdentity::from_function_path(::std::file!(), $crate::function_path!()),
            $crate::store::resolve_source_file(
                ::std::path::Path::new(::std::env!("CARGO_MANIFEST_DIR")),
                ::std::path::Path::new(::std::file!()),
            ),
        )
        .expect_fail($expect_fail);
        match $crate::run_regtest($ctx, invocation, |$rt: &mut $crate::Regtest| $body) {
            Ok(outcome) => outcome.enforce(),
            Err(err) => panic!("regtest could not finish: {err}"),
        }
    }};
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use tempfile::tempdir;

    use super::*;
    use crate::config::ResetScope;
    use crate::error::RegtestError;

    fn invocation(root: &Path, name: &str) -> Invocation {
        Invocation::new(
            TestIdentity::new(format!("tests/unit.rs::{name}")),
            root.join("tests").join("unit.rs"),
        )
    }

    fn reset_config() -> RegtestConfig {
        RegtestConfig {
            reset: ResetScope::All,
            ..RegtestConfig::default()
        }
    }

    #[test]
    fn begin_enters_capturing() {
        let ctx = RunContext::new(RegtestConfig::default());
        let rt = ctx.begin(invocation(Path::new("/x"), "case"));
        assert_eq!(rt.phase(), Phase::Capturing);
        assert!(rt.identifier().is_none());
    }

    #[test]
    fn identifier_changes_the_identity() {
        let ctx = RunContext::new(RegtestConfig::default());
        let mut rt = ctx.begin(invocation(Path::new("/x"), "case"));
        rt.set_identifier("dev");
        assert_eq!(rt.identity().to_string(), "tests/unit.rs::case[dev]");
    }

    #[test]
    fn first_run_mismatches_and_is_recorded_in_the_ledger() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(RegtestConfig::default());
        let mut rt = ctx.begin(invocation(temp.path(), "first"));
        rt.write("hello\n");
        let outcome = ctx.finish(rt, BodyStatus::Passed).expect("finish");

        assert_eq!(outcome.mode, Mode::Compare);
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.is_mismatch());
        assert!(outcome.report.contains("    > -hello"));
        let record = ctx.failure(&outcome.identity).expect("ledger entry");
        assert_eq!(record.current_lines, vec!["hello"]);
        assert_eq!(record.golden_lines, vec![""]);
        assert!(!outcome.golden_path.exists());
    }

    #[test]
    fn reset_then_compare_passes() {
        let temp = tempdir().expect("tempdir");
        let reset = RunContext::new(reset_config());
        let mut rt = reset.begin(invocation(temp.path(), "round_trip"));
        rt.write("hello\n");
        let recorded = reset.finish(rt, BodyStatus::Passed).expect("record");
        assert_eq!(recorded.mode, Mode::Reset);
        assert_eq!(recorded.status, OutcomeStatus::Passed);
        assert!(recorded.comparison.is_none());
        assert_eq!(
            std::fs::read_to_string(&recorded.golden_path).expect("golden"),
            "hello\n"
        );

        let compare = RunContext::new(RegtestConfig::default());
        let mut rt = compare.begin(invocation(temp.path(), "round_trip"));
        rt.write("hello\n");
        let outcome = compare.finish(rt, BodyStatus::Passed).expect("compare");
        assert_eq!(outcome.status, OutcomeStatus::Passed);
        assert!(compare.summary().mismatches.is_empty());
    }

    #[test]
    fn reset_keeps_the_body_failure() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(reset_config());
        let mut rt = ctx.begin(invocation(temp.path(), "body_fails"));
        rt.write("partial\n");
        let outcome = ctx
            .finish(rt, BodyStatus::Failed("assertion failed".into()))
            .expect("finish");
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.golden_path.exists());
    }

    #[test]
    fn expected_failure_with_mismatch_is_skipped() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(RegtestConfig::default());
        let inv = invocation(temp.path(), "xfail").expect_fail(true);
        let mut rt = ctx.begin(inv);
        rt.write("drift\n");
        let outcome = ctx
            .finish(rt, BodyStatus::Failed("1 != 2".into()))
            .expect("finish");
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(ctx.failure(&outcome.identity).is_some());
    }

    #[test]
    fn unprintable_output_aborts_finish() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(RegtestConfig::default());
        let mut rt = ctx.begin(invocation(temp.path(), "binary"));
        rt.write("\u{0}\u{1}");
        let err = ctx.finish(rt, BodyStatus::Passed).expect_err("unprintable");
        assert!(matches!(err, RegtestError::UnprintableOutput { .. }));
    }

    #[test]
    fn registered_hooks_apply_once() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(reset_config());
        let upper = || ConverterRule::text_only("upper", str::to_uppercase);
        assert!(ctx.register_converter_post(upper()));
        assert!(!ctx.register_converter_post(upper()));
        let mut rt = ctx.begin(invocation(temp.path(), "hooks"));
        write!(rt, "shout").expect("write");
        let outcome = ctx.finish(rt, BodyStatus::Passed).expect("finish");
        assert_eq!(outcome.normalized, "SHOUT");
    }

    #[test]
    fn run_regtest_resumes_body_panics() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(reset_config());
        let inv = invocation(temp.path(), "panics");
        let golden = GoldenStore::for_source_file(inv.source_file())
            .path_for(&inv.identity().artifact_name());
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_regtest(&ctx, inv, |rt| {
                rt.write("before panic\n");
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        assert_eq!(
            std::fs::read_to_string(golden).expect("recorded despite panic"),
            "before panic\n"
        );
    }

    #[test]
    fn run_regtest_resumes_the_panic_when_finish_fails() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(reset_config());
        let inv = invocation(temp.path(), "panics_with_binary");
        let golden = GoldenStore::for_source_file(inv.source_file())
            .path_for(&inv.identity().artifact_name());
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_regtest(&ctx, inv, |rt| {
                rt.write("\u{0}");
                panic!("boom");
            })
        }));
        let payload = result.expect_err("body panic is resumed");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        assert!(!golden.exists());
        assert_eq!(ctx.summary().total, 0);
    }

    #[test]
    fn run_regtest_swallows_expected_panics() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(reset_config());
        let inv = invocation(temp.path(), "xfail_panics").expect_fail(true);
        let outcome = run_regtest(&ctx, inv, |_| panic!("expected")).expect("finish");
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert_eq!(outcome.body, BodyStatus::Failed("expected".into()));
    }

    #[test]
    fn summary_tallies_outcomes() {
        let temp = tempdir().expect("tempdir");
        let ctx = RunContext::new(RegtestConfig::default());
        for name in ["a", "b"] {
            let mut rt = ctx.begin(invocation(temp.path(), name));
            rt.write(name);
            ctx.finish(rt, BodyStatus::Passed).expect("finish");
        }
        let rt = ctx.begin(invocation(temp.path(), "empty"));
        ctx.finish(rt, BodyStatus::Passed).expect("finish");

        let summary = ctx.summary();
        assert_eq!(summary.tally.failed, 2);
        assert_eq!(summary.tally.passed, 1);
        assert_eq!(summary.mismatches.len(), 2);
    }

    #[test]
    fn function_path_names_the_enclosing_fn() {
        let path = crate::function_path!();
        assert!(
            path.ends_with("controller::tests::function_path_names_the_enclosing_fn"),
            "{path}"
        );
    }
}

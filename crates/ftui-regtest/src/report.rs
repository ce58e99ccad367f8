//! Failure ledger and user-facing report rendering.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::identity::TestIdentity;

/// Prefix of every diff line in a failure report.
pub const DIFF_LINE_PREFIX: &str = "    > ";

/// A mismatch kept for report time. Lines are already normalized and split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub identity: String,
    pub golden_path: PathBuf,
    pub current_lines: Vec<String>,
    pub golden_lines: Vec<String>,
    pub diff_lines: Vec<String>,
}

/// Mismatches of one run, keyed by the identity's display form.
#[derive(Debug, Default)]
pub struct FailureLedger {
    entries: BTreeMap<String, FailureRecord>,
}

impl FailureLedger {
    pub fn record(&mut self, record: FailureRecord) {
        self.entries.insert(record.identity.clone(), record);
    }

    pub fn get(&self, identity: &TestIdentity) -> Option<&FailureRecord> {
        self.entries.get(&identity.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailureRecord> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-status counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub recorded: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    #[serde(flatten)]
    pub tally: Tally,
    pub mismatches: Vec<FailureRecord>,
}

impl RunSummary {
    pub fn new(tally: Tally, ledger: &FailureLedger) -> Self {
        Self {
            total: tally.total(),
            tally,
            mismatches: ledger.iter().cloned().collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render(&self, nodiff: bool) -> String {
        let mut out = format!(
            "regtest: {} passed, {} failed, {} skipped, {} recorded\n",
            self.tally.passed, self.tally.failed, self.tally.skipped, self.tally.recorded
        );
        for record in &self.mismatches {
            out.push('\n');
            out.push_str(&render_failure(record, nodiff));
        }
        out
    }
}

pub fn render_failure(record: &FailureRecord, nodiff: bool) -> String {
    let mut out = format!(
        "regression test output differs for {}\ngolden file: {}\n",
        record.identity,
        record.golden_path.display()
    );
    if nodiff {
        out.push_str("(diff suppressed; run without --regtest-nodiff to see it)\n");
    } else {
        for line in &record.diff_lines {
            out.push_str(DIFF_LINE_PREFIX);
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str("rerun with FTUI_REGTEST_RESET=1 or --regtest-reset to accept the current output\n");
    out
}

pub fn render_recorded(identity: &TestIdentity, path: &Path) -> String {
    format!("recorded output of {identity} to {}\n", path.display())
}

/// Normalized output framed for the tee option.
pub fn render_tee(identity: &TestIdentity, text: &str) -> String {
    let mut out = format!("--- regtest output of {identity} ---\n{text}");
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n");
    out
}

//! Run configuration.
//!
//! Precedence, lowest first: defaults, environment, command-line flags.
//! `cargo test` hands argv to libtest, so test binaries read the environment:
//!
//! ```sh
//! FTUI_REGTEST_RESET=1 cargo test -p my-crate          # re-record everything
//! FTUI_REGTEST_RESET=render,layout cargo test          # only matching tests
//! BLESS=1 cargo test                                   # same as RESET=1
//! ```

use clap::Args;
use serde::Serialize;

pub const ENV_RESET: &str = "FTUI_REGTEST_RESET";
pub const ENV_BLESS: &str = "BLESS";
pub const ENV_TEE: &str = "FTUI_REGTEST_TEE";
pub const ENV_REGARD_LINE_ENDINGS: &str = "FTUI_REGTEST_REGARD_LINE_ENDINGS";
pub const ENV_NODIFF: &str = "FTUI_REGTEST_NODIFF";
pub const ENV_LENIENT_PRINTABLE: &str = "FTUI_REGTEST_LENIENT_PRINTABLE";

/// Which tests record instead of compare.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    #[default]
    Off,
    All,
    /// Tests whose qualified name contains any of these substrings.
    Matching(Vec<String>),
}

impl ResetScope {
    pub fn applies_to(&self, qualified_name: &str) -> bool {
        match self {
            Self::Off => false,
            Self::All => true,
            Self::Matching(filters) => filters
                .iter()
                .any(|filter| qualified_name.contains(filter.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegtestConfig {
    pub reset: ResetScope,
    /// Echo normalized output of every test.
    pub tee: bool,
    /// Compare lines exactly instead of right-trimming them.
    pub regard_line_endings: bool,
    /// Omit diff listings from failure reports.
    pub nodiff: bool,
    /// Fail on control characters or invalid UTF-8 in captured output.
    pub strict_printable: bool,
}

impl Default for RegtestConfig {
    fn default() -> Self {
        Self {
            reset: ResetScope::Off,
            tee: false,
            regard_line_endings: false,
            nodiff: false,
            strict_printable: true,
        }
    }
}

impl RegtestConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).is_some_and(|value| is_truthy(&value));

        let mut reset = lookup(ENV_RESET)
            .map(|value| parse_reset(&value))
            .unwrap_or_default();
        if flag(ENV_BLESS) {
            reset = ResetScope::All;
        }

        Self {
            reset,
            tee: flag(ENV_TEE),
            regard_line_endings: flag(ENV_REGARD_LINE_ENDINGS),
            nodiff: flag(ENV_NODIFF),
            strict_printable: !flag(ENV_LENIENT_PRINTABLE),
        }
    }

    /// Overlay command-line flags; a flag can only switch a setting on.
    #[must_use]
    pub fn with_flags(mut self, flags: &RegtestFlags) -> Self {
        match &flags.regtest_reset {
            None => {}
            Some(filters) if filters.is_empty() => self.reset = ResetScope::All,
            Some(filters) => self.reset = ResetScope::Matching(filters.clone()),
        }
        self.tee |= flags.regtest_tee;
        self.regard_line_endings |= flags.regtest_regard_line_endings;
        self.nodiff |= flags.regtest_nodiff;
        if flags.regtest_lenient_printable {
            self.strict_printable = false;
        }
        self
    }

    pub fn ignore_trailing_whitespace(&self) -> bool {
        !self.regard_line_endings
    }
}

/// Command-line switches shared by every subcommand of the CLI adapter.
#[derive(Debug, Clone, Default, Args)]
pub struct RegtestFlags {
    /// Record current output as golden instead of comparing. With values,
    /// only tests whose name contains one of them are reset.
    #[arg(
        long = "regtest-reset",
        value_name = "FILTER",
        num_args = 0..=1,
        require_equals = true,
        value_delimiter = ','
    )]
    pub regtest_reset: Option<Vec<String>>,

    /// Echo normalized output.
    #[arg(long = "regtest-tee")]
    pub regtest_tee: bool,

    /// Do not right-trim lines before comparing.
    #[arg(long = "regtest-regard-line-endings")]
    pub regtest_regard_line_endings: bool,

    /// Report mismatches without the diff listing.
    #[arg(long = "regtest-nodiff")]
    pub regtest_nodiff: bool,

    /// Accept control characters and invalid UTF-8 in captured output.
    #[arg(long = "regtest-lenient-printable")]
    pub regtest_lenient_printable: bool,
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn is_falsey(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

fn parse_reset(value: &str) -> ResetScope {
    if is_truthy(value) {
        return ResetScope::All;
    }
    if is_falsey(value) {
        return ResetScope::Off;
    }
    let filters: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|filter| !filter.is_empty())
        .map(str::to_string)
        .collect();
    if filters.is_empty() {
        ResetScope::Off
    } else {
        ResetScope::Matching(filters)
    }
}

#![forbid(unsafe_code)]

//! Golden-output regression testing.
//!
//! A test writes text into a [`Regtest`] fixture. When the test ends the text
//! is normalized (temp paths and object addresses become placeholders), then
//! either recorded as the golden file or compared against it:
//!
//! ```ignore
//! use std::fmt::Write as _;
//!
//! #[test]
//! fn prints_report() {
//!     ftui_regtest::regtest!(|rt| {
//!         writeln!(rt, "{}", build_report()).unwrap();
//!     });
//! }
//! ```
//!
//! Golden files live in `_regtest_outputs/` beside the test source. Run with
//! `FTUI_REGTEST_RESET=1` (or `BLESS=1`) to accept new output.

pub mod capture;
pub mod cli;
pub mod compare;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod normalize;
pub mod report;
pub mod store;

pub use capture::{CaptureBuffer, StdoutRedirect};
pub use cli::run_from_env;
pub use compare::{ComparisonResult, compare};
pub use config::{RegtestConfig, RegtestFlags, ResetScope};
pub use controller::{
    BodyStatus, Invocation, Mode, OutcomeStatus, Phase, Regtest, RegtestOutcome, RunContext,
    run_regtest,
};
pub use error::{RegtestError, Result};
pub use identity::{ArtifactName, TestIdentity, resolve};
pub use normalize::{ConverterRule, NormalizeContext, Normalizer};
pub use report::{FailureLedger, FailureRecord, RunSummary};
pub use store::GoldenStore;

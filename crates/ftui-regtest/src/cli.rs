use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::capture::CaptureBuffer;
use crate::config::{RegtestConfig, RegtestFlags};
use crate::controller::{BodyStatus, Invocation, OutcomeStatus, RunContext};
use crate::error::{RegtestError, Result};
use crate::identity::{TEST_PART_SEPARATOR, TestIdentity};
use crate::normalize::NormalizeContext;
use crate::store::GoldenStore;

#[derive(Debug, Parser)]
#[command(
    name = "ftui-regtest",
    about = "Record and compare golden regression-test output",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Normalize captured output and compare it with, or record it as, the golden file.
    Check(CheckArgs),

    /// Print the golden file path of a test.
    Path(TargetArgs),

    /// Print normalized output without touching golden files.
    Normalize(NormalizeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Test source file; golden files live in `_regtest_outputs/` beside it.
    #[arg(long)]
    pub source: PathBuf,

    /// Test path inside the source file, e.g. `layout::wraps`.
    #[arg(long)]
    pub test: String,

    /// Sub identifier selecting one of several golden files of the test.
    #[arg(long = "id")]
    pub id: Option<String>,
}

impl TargetArgs {
    fn identity(&self) -> Result<TestIdentity> {
        if self.test.trim().is_empty() {
            return Err(RegtestError::invalid("--test must name a test"));
        }
        if self.id.as_deref().is_some_and(str::is_empty) {
            return Err(RegtestError::invalid("--id must not be empty"));
        }
        Ok(TestIdentity::new(format!(
            "{}{TEST_PART_SEPARATOR}{}",
            self.source.display(),
            self.test
        )))
    }
}

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Captured output; stdin when omitted.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Temp directory used by the test, replaced by a placeholder.
    #[arg(long)]
    pub tmpdir: Option<PathBuf>,

    /// Treat a mismatch as an expected failure (skipped, exit 0).
    #[arg(long)]
    pub expect_fail: bool,

    /// Print the run summary as JSON instead of the text report.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub flags: RegtestFlags,
}

#[derive(Debug, Clone, Args)]
pub struct NormalizeArgs {
    /// Captured output; stdin when omitted.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Temp directory used by the test, replaced by a placeholder.
    #[arg(long)]
    pub tmpdir: Option<PathBuf>,

    #[command(flatten)]
    pub flags: RegtestFlags,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    run(cli, &mut io::stdout().lock())
}

pub fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    match cli.command {
        Commands::Check(args) => run_check(&args, out),
        Commands::Path(args) => run_path(&args, out),
        Commands::Normalize(args) => run_normalize(&args, out),
    }
}

fn run_check(args: &CheckArgs, out: &mut dyn Write) -> Result<()> {
    let ctx = RunContext::new(RegtestConfig::from_env().with_flags(&args.flags));
    let input = read_input(args.input.as_deref())?;

    let invocation = Invocation::new(args.target.identity()?, &args.target.source)
        .expect_fail(args.expect_fail);
    let mut regtest = ctx.begin(invocation);
    if let Some(id) = &args.target.id {
        regtest.set_identifier(id.clone());
    }
    if let Some(dir) = &args.tmpdir {
        regtest.set_tmpdir(dir.clone());
    }
    regtest.write_all(&input)?;

    let outcome = ctx.finish(regtest, BodyStatus::Passed)?;
    if args.json {
        writeln!(out, "{}", ctx.summary().to_json()?)?;
    } else if outcome.report.is_empty() {
        writeln!(out, "ok: {}", outcome.identity)?;
    } else {
        write!(out, "{}", outcome.report)?;
    }

    match outcome.status {
        OutcomeStatus::Failed => Err(RegtestError::Mismatch {
            identity: outcome.identity.to_string(),
        }),
        OutcomeStatus::Passed | OutcomeStatus::Skipped => Ok(()),
    }
}

fn run_path(args: &TargetArgs, out: &mut dyn Write) -> Result<()> {
    let mut identity = args.identity()?;
    if let Some(id) = &args.id {
        identity = identity.with_sub_identifier(id.clone());
    }
    let path = GoldenStore::for_source_file(&args.source).path_for(&identity.artifact_name());
    writeln!(out, "{}", path.display())?;
    Ok(())
}

fn run_normalize(args: &NormalizeArgs, out: &mut dyn Write) -> Result<()> {
    let ctx = RunContext::new(RegtestConfig::from_env().with_flags(&args.flags));
    let identity = TestIdentity::new("<input>");
    let mut buffer = CaptureBuffer::new();
    buffer.write_all(&read_input(args.input.as_deref())?)?;
    let raw = buffer.into_text(ctx.config().strict_printable, &identity)?;
    let normalized = ctx.normalize(
        &raw,
        &NormalizeContext::new(&identity, args.tmpdir.as_deref()),
    )?;
    write!(out, "{normalized}")?;
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => Ok(fs::read(path)?),
        None => {
            let mut bytes = Vec::new();
            io::stdin().lock().read_to_end(&mut bytes)?;
            Ok(bytes)
        }
    }
}

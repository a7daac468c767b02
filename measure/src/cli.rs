use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use lanzaboote_measure::digest::{select_banks, DigestAlgorithm, RustCryptoDigests};
use lanzaboote_measure::platform::Platform;
use lanzaboote_measure::report::MeasurementReport;
use lanzaboote_measure::run::{self, PcrSource};
use lanzaboote_measure::section::{SectionPaths, UnifiedSection};

/// The default log level.
///
/// 2 corresponds to the level INFO.
const DEFAULT_LOG_LEVEL: usize = 2;

/// Pre-calculate PCR hash for kernel image.
#[derive(Parser)]
#[command(version)]
pub struct Cli {
    /// Silence all output
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Verbose mode (-v, -vv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[clap(subcommand)]
    commands: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current PCR values
    Status(StatusCommand),
    /// Calculate expected PCR values
    Calculate(CalculateCommand),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum JsonMode {
    Off,
    Short,
    Pretty,
}

#[derive(Args, Default)]
struct OutputArgs {
    /// Select TPM bank (SHA1, SHA256, SHA384, SHA512)
    #[arg(long = "bank", value_name = "DIGEST")]
    banks: Vec<String>,

    /// Output as JSON
    #[arg(long, value_name = "MODE")]
    json: Option<JsonMode>,

    /// Same as --json=pretty on tty, --json=short otherwise
    #[arg(short = 'j', conflicts_with = "json")]
    json_auto: bool,
}

#[derive(Parser, Default)]
struct StatusCommand {
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Parser)]
struct CalculateCommand {
    /// Path to Linux kernel ELF image
    #[arg(long)]
    linux: Option<PathBuf>,

    /// Path to os-release file
    #[arg(long)]
    osrel: Option<PathBuf>,

    /// Path to file with kernel command line
    #[arg(long)]
    cmdline: Option<PathBuf>,

    /// Path to initrd image
    #[arg(long)]
    initrd: Option<PathBuf>,

    /// Path to splash bitmap
    #[arg(long)]
    splash: Option<PathBuf>,

    /// Path to Devicetree file
    #[arg(long)]
    dtb: Option<PathBuf>,

    /// Path to 'uname -r' file
    #[arg(long)]
    uname: Option<PathBuf>,

    /// Path to SBAT file
    #[arg(long)]
    sbat: Option<PathBuf>,

    /// Path to public key for PCR signatures in DER format
    #[arg(long)]
    pcrpkey: Option<PathBuf>,

    /// Use current PCR values
    #[arg(short, long)]
    current: bool,

    #[command(flatten)]
    output: OutputArgs,
}

impl Cli {
    pub fn call(self, module: &str) {
        stderrlog::new()
            .module(module)
            .module("lanzaboote_measure")
            .show_level(false)
            .quiet(self.quiet)
            .verbosity(DEFAULT_LOG_LEVEL + usize::from(self.verbose))
            .init()
            .expect("Failed to setup logger.");

        let commands = self
            .commands
            .unwrap_or_else(|| Commands::Status(StatusCommand::default()));

        if let Err(e) = commands.call() {
            log::error!("{e:#}");
            std::process::exit(1);
        };
    }
}

impl Commands {
    pub fn call(self) -> Result<()> {
        match self {
            Commands::Status(args) => status(args),
            Commands::Calculate(args) => calculate(args),
        }
    }
}

impl OutputArgs {
    fn algorithms(&self) -> Result<Vec<DigestAlgorithm>> {
        select_banks(&RustCryptoDigests, &self.banks)
    }

    fn json_mode(&self) -> JsonMode {
        if self.json_auto {
            if io::stdout().is_terminal() {
                JsonMode::Pretty
            } else {
                JsonMode::Short
            }
        } else {
            self.json.unwrap_or(JsonMode::Off)
        }
    }

    /// Print the JSON form of the report, returns false if JSON output is disabled.
    fn print_json(&self, report: &MeasurementReport) -> Result<bool> {
        let json = report.to_json()?;
        let rendered = match self.json_mode() {
            JsonMode::Off => return Ok(false),
            JsonMode::Short => serde_json::to_string(&json)?,
            JsonMode::Pretty => serde_json::to_string_pretty(&json)?,
        };
        writeln!(io::stdout(), "{rendered}").context("Failed to write to stdout")?;
        Ok(true)
    }
}

impl CalculateCommand {
    fn sections(&self) -> SectionPaths {
        let mut sections = SectionPaths::new();
        for (section, path) in [
            (UnifiedSection::Linux, &self.linux),
            (UnifiedSection::OsRel, &self.osrel),
            (UnifiedSection::CmdLine, &self.cmdline),
            (UnifiedSection::Initrd, &self.initrd),
            (UnifiedSection::Splash, &self.splash),
            (UnifiedSection::Dtb, &self.dtb),
            (UnifiedSection::Uname, &self.uname),
            (UnifiedSection::Sbat, &self.sbat),
            (UnifiedSection::PcrPkey, &self.pcrpkey),
        ] {
            if let Some(path) = path {
                sections.set(section, path);
            }
        }
        sections
    }
}

fn calculate(args: CalculateCommand) -> Result<()> {
    let algorithms = args.output.algorithms()?;
    let current = args.current.then(Platform::from_env);
    let source = PcrSource::new(args.sections(), current)?;

    let report = run::calculate(&algorithms, &source)?;

    if !args.output.print_json(&report)? {
        write!(io::stdout(), "{}", report.to_lines()).context("Failed to write to stdout")?;
    }

    Ok(())
}

fn status(args: StatusCommand) -> Result<()> {
    let algorithms = args.output.algorithms()?;
    let platform = Platform::from_env();

    let status = run::status(&platform, &algorithms)?;

    if !args.output.print_json(&status.report)? {
        print_annotated_lines(&status.report)?;
    }

    if !status.failed_banks.is_empty() {
        bail!(
            "Failed to read PCR banks: {}",
            status.failed_banks.join(", ")
        );
    }

    Ok(())
}

/// Print the report, with a description of each PCR on stderr.
///
/// The primary content goes to stdout so that it can be consumed by scripts, the descriptions
/// are only there for humans.
fn print_annotated_lines(report: &MeasurementReport) -> Result<()> {
    let mut stdout = io::stdout().lock();
    let mut previous = None;

    for record in report.records() {
        if previous != Some(record.index) {
            stdout.flush()?;
            eprintln!(
                "# PCR[{}] {}{}",
                record.index.nr(),
                record.index.description(),
                if record.is_unset() { " (NOT SET!)" } else { "" }
            );
            previous = Some(record.index);
        }

        writeln!(stdout, "{}", record.to_line())?;
    }

    stdout.flush()?;
    Ok(())
}

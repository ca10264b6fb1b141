use crate::core::overlay::OverlaySide;
use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

/// Find the New Hampshire House representatives for an address, floterial
/// seats included.
#[derive(Parser, Debug)]
#[command(name = "nh-rep-finder", version, about, propagate_version = true)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "NH_REP_FINDER_CONFIG", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve an address (or coordinates) to districts and legislators
    Lookup(LookupArgs),

    /// List the current members of one district, e.g. "Sullivan 2" or "SU02"
    District { label: String },

    /// Load the floterial overlay and print its counts and key samples
    OverlayStats,

    /// Check the header row of an overlay CSV
    ValidateCsv(ValidateCsvArgs),

    /// Print the parsed key-vote table
    VoteMap,

    /// Print the key-vote CSV as served
    VotesCsv,

    /// Find the Open States page for a bill, e.g. "HB 1234" or "SB12 (2024)"
    BillLink {
        bill: String,

        /// Legislative session year, when not part of the bill text
        #[arg(long)]
        year: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Street address, e.g. "667 NH RT 120, Cornish, NH 03745"
    #[arg(required_unless_present = "lat", conflicts_with = "lat")]
    pub address: Option<String>,

    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
pub enum CsvKind {
    Base,
    Town,
}

impl From<CsvKind> for OverlaySide {
    fn from(kind: CsvKind) -> Self {
        match kind {
            CsvKind::Base => OverlaySide::Base,
            CsvKind::Town => OverlaySide::Town,
        }
    }
}

#[derive(Args, Debug)]
pub struct ValidateCsvArgs {
    #[arg(long, value_enum)]
    pub kind: CsvKind,

    /// URL, file:// URL or path of the CSV
    pub path: String,
}

use clap::{Parser, Subcommand};
use sceneforged_extractor::ParameterValue;
use sceneforged_demux::config::parse_parameter_value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sceneforged-demux")]
#[command(author, version, about = "Media container demultiplexer")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Format selection and parameter overrides shared by the extraction commands.
#[derive(clap::Args, Debug, Clone)]
pub struct SessionArgs {
    /// Media file to read
    #[arg(required = true)]
    pub file: PathBuf,

    /// Use this format instead of sniffing
    #[arg(short, long)]
    pub format: Option<String>,

    /// Set a parser parameter, e.g. -p ts.mode=hls
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_parameter)]
    pub parameters: Vec<(String, ParameterValue)>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered formats
    Formats {
        /// Only formats handling this mime type
        #[arg(long)]
        mime: Option<String>,
    },

    /// Show the tracks, seek map and sample count of a file
    Probe {
        #[command(flatten)]
        session: SessionArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print one line per extracted sample
    Dump {
        #[command(flatten)]
        session: SessionArgs,

        /// Stop after this many samples
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Extract a file, seek and report what follows the seek point
    Seek {
        #[command(flatten)]
        session: SessionArgs,

        /// Target time in microseconds
        #[arg(long)]
        time_us: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

fn parse_parameter(raw: &str) -> Result<(String, ParameterValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    Ok((name.to_string(), parse_parameter_value(value)))
}

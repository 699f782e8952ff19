//! Command-line interface.

use crate::config::VideoMode;
use clap::Parser;
use std::path::PathBuf;

/// Storyboard - script-to-scene pipeline.
///
/// Turns `PROJECTS/{CODE}/{CODE}.srt` into `{CODE}_prompts.xlsx`, the
/// scene workbook consumed by downstream image/video generation.
#[derive(Debug, Parser)]
#[command(name = "storyboard")]
#[command(about = "Turn an SRT script into a scene workbook", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Run one project by code and exit
    #[arg(long, conflicts_with = "loop_mode")]
    pub project: Option<String>,

    /// Keep scanning the inbox for new projects
    #[arg(long = "loop", conflicts_with = "project")]
    pub loop_mode: bool,

    /// Video note policy (overrides configuration)
    #[arg(long, value_enum)]
    pub mode: Option<VideoMode>,

    /// Explicit configuration file (default: ./storyboard.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments from the environment.
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }
}

use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Inspection video (path or file:// URI)
    #[arg(short, long)]
    pub input: String,

    /// Output directory for run metadata
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Allowed defect codes (comma-separated list)
    #[arg(long, value_delimiter = ',')]
    pub codes: Option<Vec<String>>,

    /// JSON code catalog file
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Pipe section identifier passed to the code mapper
    #[arg(long)]
    pub section_id: Option<String>,

    /// Sampling interval in seconds (overrides config when set)
    #[arg(long)]
    pub frame_step: Option<f64>,

    /// Consecutive missed frames before a finding closes (overrides config when set)
    #[arg(long)]
    pub dedup_window: Option<u32>,

    /// Minimum severity kept, 1-5 (overrides config when set)
    #[arg(long)]
    pub min_severity: Option<u8>,

    /// Number of frame worker threads; 0 uses every CPU
    #[arg(long)]
    pub workers: Option<usize>,

    /// Skip the catalog plausibility check on code suggestions
    #[arg(long)]
    pub no_plausibility: bool,

    /// Run without writing any output files
    #[arg(long)]
    pub dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}

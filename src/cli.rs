use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::io_utils::parse_delimiter;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Capture Brazilian public-health extracts into a typed warehouse",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Capture every pending schedule entry of the configured operations
    Run(RunArgs),
    /// Capture one dataset for one UF and competence, outside the schedule
    Capture(CaptureArgs),
    /// Check a sample extract's header against a dataset descriptor
    Validate(ValidateArgs),
    /// Print a dataset descriptor's mapping and type table
    Describe(DescribeArgs),
    /// Create bookkeeping tables and, optionally, a dataset's destination table
    Init(InitArgs),
}

#[derive(Debug, Args)]
pub struct DatasetSource {
    /// Dataset name from the built-in catalog or a --descriptor file
    #[arg(short = 'd', long = "dataset")]
    pub dataset: Option<String>,
    /// Additional descriptor YAML files to register
    #[arg(long = "descriptor", action = clap::ArgAction::Append)]
    pub descriptors: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run configuration (YAML)
    #[arg(short, long, env = "DATASUS_ETL_CONFIG")]
    pub config: PathBuf,
    /// SQLite database (overrides the configuration)
    #[arg(long, env = "DATASUS_ETL_DATABASE")]
    pub database: Option<PathBuf>,
    /// Rows per extraction batch (overrides the configuration)
    #[arg(long = "batch-size", env = "DATASUS_ETL_BATCH_SIZE")]
    pub batch_size: Option<usize>,
    /// Restrict the run to these operation ids
    #[arg(long = "operation", action = clap::ArgAction::Append)]
    pub operations: Vec<String>,
    /// Capture only the first pending entry and roll everything back
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub source: DatasetSource,
    /// UF abbreviation, e.g. SE
    #[arg(long = "uf")]
    pub uf_sigla: String,
    /// Competence as YYYY-MM
    #[arg(long = "period")]
    pub period: String,
    /// Destination table, optionally schema-qualified
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// Directory, file:// or http(s):// base holding the extracts
    #[arg(long = "source-root", default_value = ".")]
    pub source_root: String,
    /// SQLite database
    #[arg(long, env = "DATASUS_ETL_DATABASE")]
    pub database: PathBuf,
    /// Rows per extraction batch
    #[arg(long = "batch-size", env = "DATASUS_ETL_BATCH_SIZE", default_value_t = crate::pipeline::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// Raw-row conditions such as `MUNIC_MOV == 280030`
    #[arg(long = "where", action = clap::ArgAction::Append)]
    pub conditions: Vec<String>,
    /// Extra `name=value` template parameters
    #[arg(long = "param", action = clap::ArgAction::Append)]
    pub params: Vec<String>,
    /// Load at most the dry-run row limit and roll back
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Create the destination table when missing
    #[arg(long = "create-table")]
    pub create_table: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub source: DatasetSource,
    /// Sample extract whose header is checked
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Delimiter of the sample (defaults to the descriptor's)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Encoding of the sample (defaults to the descriptor's)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DescribeFormat {
    Table,
    Yaml,
}

#[derive(Debug, Args)]
pub struct DescribeArgs {
    #[command(flatten)]
    pub source: DatasetSource,
    /// Output format
    #[arg(long, value_enum, default_value_t = DescribeFormat::Table)]
    pub format: DescribeFormat,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// SQLite database to create or update
    #[arg(long, env = "DATASUS_ETL_DATABASE")]
    pub database: PathBuf,
    #[command(flatten)]
    pub source: DatasetSource,
    /// Destination table to create for --dataset
    #[arg(short = 't', long = "table", requires = "dataset")]
    pub table: Option<String>,
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "finclusion",
    version,
    about = "Event-impact attribution and forecasting for financial-inclusion indicators"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    Validate(ValidateArgs),
    Series(SeriesArgs),
    Impact(ImpactArgs),
    Forecast(ForecastArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/finclusion")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// JSON array of unified record rows.
    #[arg(long)]
    pub records: PathBuf,

    /// Optional enrichment batch appended after the base table.
    #[arg(long)]
    pub enrichment: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = ".cache/finclusion")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SeriesArgs {
    #[arg(long, default_value = ".cache/finclusion")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub indicator: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ImpactArgs {
    #[arg(long, default_value = ".cache/finclusion")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Restrict impact rows to one related indicator.
    #[arg(long)]
    pub indicator: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ForecastArgs {
    #[arg(long, default_value = ".cache/finclusion")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long = "indicator")]
    pub indicators: Vec<String>,

    #[arg(long = "year")]
    pub years: Vec<i32>,

    #[arg(long)]
    pub confidence_level: Option<f64>,

    #[arg(long)]
    pub scenario_fraction: Option<f64>,

    #[arg(long, default_value_t = false)]
    pub no_events: bool,

    #[arg(long, value_enum, default_value_t = TrendMode::Linear)]
    pub trend_method: TrendMode,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TrendMode {
    Linear,
    Last,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/finclusion")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

use clap::{Args, Parser, Subcommand};
use imgserve_inference::Override;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "imgserve")]
#[command(
    author,
    version,
    about = "Image classification inference over a directory or Redis pub/sub"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify images dropped into a directory
    Poll(PollArgs),

    /// Classify images received over Redis pub/sub
    Redis(RedisArgs),

    /// Export an inference config with updated values
    ExportConfig(ExportConfigArgs),
}

/// Model and inference configuration
#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Inference config (YAML)
    #[arg(long)]
    pub config: PathBuf,

    /// Model weights: local path or hf://owner/repo[@revision]/file
    #[arg(long)]
    pub model_path: Option<String>,

    /// Label map file ('N LABEL' per line, N starting at 0)
    #[arg(long)]
    pub class_id_map_file: Option<PathBuf>,

    /// Device to run on: cpu, gpu, gpu:N, cuda:N, metal
    #[arg(long)]
    pub device: Option<String>,

    /// Override a config value; PATH is dot-notation, list elements comma-separated
    #[arg(long = "set", value_name = "PATH:VALUE", value_parser = parse_override)]
    pub overrides: Vec<Override>,
}

/// Logging and metrics
#[derive(Args, Debug)]
pub struct RuntimeArgs {
    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct PollArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Directory to read images from
    #[arg(long)]
    pub prediction_in: PathBuf,

    /// Directory to write results (and processed images) to
    #[arg(long)]
    pub prediction_out: PathBuf,

    /// Directory to stage result files in before moving them to the output
    #[arg(long)]
    pub prediction_tmp: Option<PathBuf>,

    /// Seconds to wait between sweeps
    #[arg(long, default_value = "1.0", value_parser = parse_seconds)]
    pub poll_wait: Duration,

    /// Keep polling instead of processing the input once
    #[arg(long)]
    pub continuous: bool,

    /// React to filesystem events instead of fixed-interval sweeps
    #[arg(long)]
    pub use_watchdog: bool,

    /// Seconds between fallback sweeps in watchdog mode
    #[arg(long, default_value = "10.0", value_parser = parse_seconds)]
    pub watchdog_check_interval: Duration,

    /// Delete images after processing instead of moving them to the output
    #[arg(long)]
    pub delete_input: bool,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

#[derive(Args, Debug)]
pub struct RedisArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, default_value = "localhost")]
    pub redis_host: String,

    #[arg(long, default_value = "6379")]
    pub redis_port: u16,

    #[arg(long, default_value = "0")]
    pub redis_db: i64,

    /// Channel to receive images on
    #[arg(long)]
    pub channel_in: String,

    /// Channel to publish results on
    #[arg(long)]
    pub channel_out: String,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

#[derive(Args, Debug)]
pub struct ExportConfigArgs {
    /// Config template to export
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// File to store the exported config in
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Label map file to reference from the config
    #[arg(short, long, value_name = "FILE")]
    pub label_map: Option<PathBuf>,

    /// Number of classes in the dataset
    #[arg(short = 'c', long, value_name = "NUM")]
    pub num_classes: Option<usize>,

    /// Values to set
    #[arg(short, long, value_name = "PATH:VALUE", num_args = 1.., value_parser = parse_override)]
    pub additional: Vec<Override>,

    /// Values to remove
    #[arg(short, long, value_name = "PATH", num_args = 1..)]
    pub remove: Vec<String>,

    /// Do not append a ToCHWImage transform when missing
    #[arg(long)]
    pub no_force_chw: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_override(s: &str) -> Result<Override, String> {
    s.parse().map_err(|e: imgserve_core::Error| e.to_string())
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("not a number of seconds: {}", s))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration {}: {}", s, e))
}

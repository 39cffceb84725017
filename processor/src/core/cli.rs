use clap::Parser;

use std::path::PathBuf;

use super::constants::{APP_NAME_LOWER, ENV_ATTRIBUTE_KEY, ENV_CONFIG, ENV_INPUT};

#[derive(Parser)]
#[command(name = APP_NAME_LOWER)]
#[command(version, about = "Regroup and transform OTLP metric batches", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// OTLP metrics export to replay (JSON or JSON lines; protobuf for .pb files)
    #[arg(long, short = 'i', env = ENV_INPUT)]
    pub input: PathBuf,

    /// Split output batches by this resource attribute (overrides config)
    #[arg(long, short = 'k', env = ENV_ATTRIBUTE_KEY)]
    pub attribute_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub input: PathBuf,
    pub attribute_key: Option<String>,
}

pub fn parse() -> CliConfig {
    let cli = Cli::parse();
    CliConfig {
        config: cli.config,
        input: cli.input,
        attribute_key: cli.attribute_key,
    }
}

//! Core application

use std::fs;
use std::io;

use anyhow::{Context, Result};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;

use crate::core::cli::{self, CliConfig};
use crate::core::config::ReshapeConfig;
use crate::core::constants::{CRATE_NAME, ENV_LOG};
use crate::data::{Consumer, JsonLinesConsumer};
use crate::domain::{BatchPerResourceAttr, MetricsTransformProcessor, TransformConsumer};
use crate::utils::encoding::{OtlpEncoding, decode_batches};

pub struct CoreApp {
    pub config: ReshapeConfig,
    pub processor: MetricsTransformProcessor,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let cli_config = cli::parse();
        let app = Self::init(&cli_config)?;
        app.replay()
    }

    fn init(cli: &CliConfig) -> Result<Self> {
        let config = ReshapeConfig::load(cli)?;
        Ok(Self::new(config))
    }

    pub fn new(config: ReshapeConfig) -> Self {
        let processor = MetricsTransformProcessor::new(config.transforms.clone());
        Self { config, processor }
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", CRATE_NAME);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        // stdout carries the reshaped batches
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    /// Decode the input export and write every reshaped batch to stdout
    fn replay(self) -> Result<()> {
        let path = &self.config.input;
        let body = fs::read(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        let batches: Vec<ExportMetricsServiceRequest> =
            decode_batches(&body, OtlpEncoding::from_path(path))
                .with_context(|| format!("Failed to decode input file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            batches = batches.len(),
            transforms = self.processor.transforms().len(),
            "Replaying metrics export"
        );

        let delivered = self.deliver(batches, JsonLinesConsumer::new(io::stdout()))?;
        tracing::info!(batches = delivered, "Replay complete");
        Ok(())
    }

    /// Transform every batch and hand it to `sink`, split per resource
    /// attribute when one is configured. Returns the number of input batches.
    pub fn deliver<C>(&self, batches: Vec<ExportMetricsServiceRequest>, sink: C) -> Result<usize>
    where
        C: Consumer<ExportMetricsServiceRequest>,
    {
        match &self.config.attribute_key {
            Some(key) => {
                tracing::debug!(attribute_key = %key, "Splitting output by resource attribute");
                let consumer = TransformConsumer::new(
                    self.processor.clone(),
                    BatchPerResourceAttr::new(key.as_str(), sink),
                );
                feed(&consumer, batches)
            }
            None => feed(&TransformConsumer::new(self.processor.clone(), sink), batches),
        }
    }
}

fn feed<C>(consumer: &C, batches: Vec<ExportMetricsServiceRequest>) -> Result<usize>
where
    C: Consumer<ExportMetricsServiceRequest>,
{
    let mut count = 0;
    for batch in batches {
        consumer
            .consume(batch)
            .with_context(|| format!("Failed to deliver batch {}", count + 1))?;
        count += 1;
    }
    Ok(count)
}

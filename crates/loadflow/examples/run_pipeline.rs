//! Normalize and load whatever is staged for one pipeline.
//!
//! Configuration comes from the environment, for example:
//!
//! ```text
//! PIPELINE__PIPELINE_NAME=events
//! PIPELINE__DESTINATION=filesystem
//! DESTINATION__DATASET_NAME=raw
//! DESTINATION__FILESYSTEM__BUCKET_URL=/tmp/bucket
//! LOADFLOW_VERBOSE=1
//! ```

use anyhow::{Context, Result};
use loadflow::logging::{init_logging, LogConfig};
use loadflow::{DestinationRegistry, EnvironmentProvider, Pipeline, PipelineConfig};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let verbose = std::env::var_os("LOADFLOW_VERBOSE").is_some();
    let log_config = LogConfig::new("loadflow").verbose(verbose);
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Pipeline run failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let provider = EnvironmentProvider::new();
    let config = PipelineConfig::resolve(&[&provider]).context("Invalid pipeline configuration")?;
    let mut pipeline = Pipeline::new(config, &DestinationRegistry::with_builtin(), &[&provider])?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let report = runtime.block_on(pipeline.run())?;

    info!(
        packages = report.load.packages.len(),
        jobs = report.load.job_count(),
        malformed = report.normalize.malformed_files.len(),
        failed = report.normalize.failed_files.len(),
        "Run finished"
    );
    println!(
        "Loaded {} package(s), {} job(s)",
        report.load.packages.len(),
        report.load.job_count()
    );
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use cql_connect_bench::config::{CliArgs, RunConfig};
use cql_connect_bench::credentials;
use cql_connect_bench::driver::DriverBuilder;
use cql_connect_bench::harness::{self, HarnessConfig};
use cql_connect_bench::logging;
use cql_connect_bench::output::{OutputWriter, ReportFormat};
use cql_connect_bench::report::Reporter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let cfg = RunConfig::load(cli).await?;

    // Initialize logging
    logging::init(&cfg.log_level)?;
    tracing::info!(run_id = %cfg.run_id, driver = %cfg.driver, "cql-connect-bench starting");

    let factory = DriverBuilder::factory(cfg.driver, cfg.driver_options.clone())
        .with_context(|| format!("initialising {} driver", cfg.driver))?;

    // Resolution failures end the run before any worker exists
    let conn = credentials::resolve(&cfg, factory.as_ref()).await?;
    tracing::info!(mode = %conn.kind(), cluster = %conn.describe(), "credentials resolved");

    if cfg.format == ReportFormat::Text && cfg.output.is_none() {
        println!("number of workers: {}", cfg.workers);
    }

    let report = harness::run(&conn, &HarnessConfig::from(&cfg)).await?;

    let reporter = Reporter {
        format: cfg.format,
        run_id: cfg.run_id.clone(),
        auth: conn.kind(),
        target: conn.describe(),
        query: cfg.query.clone(),
    };
    let body = reporter.render(&report).context("rendering report")?;
    let mut out = OutputWriter::open(cfg.output.as_deref()).await?;
    out.write_report(&body).await?;

    let failed = report.open_failures();
    if failed > 0 {
        anyhow::bail!("{failed} of {} workers failed to connect", report.results.len());
    }
    Ok(())
}

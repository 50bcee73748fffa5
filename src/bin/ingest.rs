//! One-shot ingestion of the log directory into the pipeline
//!
//! Usage: `log-vault-ingest [transactions|errors|fraud|performance|user_behavior]`

use std::str::FromStr;
use std::sync::Arc;

use log_vault::config::Config;
use log_vault::ingest::IngestionOrchestrator;
use log_vault::models::{report_totals, IngestionReport, LogType};
use log_vault::shipper::{HttpLogSink, LogShipper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    log_vault::init_tracing("log_vault=info", config.json_logs);

    let only = std::env::args()
        .nth(1)
        .map(|arg| LogType::from_str(&arg))
        .transpose()?;

    let sink = HttpLogSink::new(config.logstash_url.clone(), config.delivery_timeout)?;
    let shipper = LogShipper::new(Arc::new(sink)).with_concurrency(config.ship_concurrency);
    let report = IngestionOrchestrator::new(&config.logs_dir, shipper)
        .run(only)
        .await;

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &IngestionReport) {
    println!("{:<16} {:>10} {:>10} {:>10}", "TYPE", "TOTAL", "SUCCESS", "FAILED");
    for (log_type, tally) in report {
        println!(
            "{:<16} {:>10} {:>10} {:>10}",
            log_type.as_str(),
            tally.total,
            tally.success,
            tally.failed
        );
    }
    let totals = report_totals(report);
    println!(
        "{:<16} {:>10} {:>10} {:>10}",
        "all", totals.total, totals.success, totals.failed
    );
}

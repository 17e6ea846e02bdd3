use carbon_pipeline::{IngestOutcome, Ingestor, PartitionStore, Transport};
use indicatif::{ProgressBar, ProgressStyle};
use log::error;

pub const DEFAULT_ZONES: [&str; 6] = [
    "US-FLA-FPL",
    "US-GA-GA",
    "US-CA-CISO",
    "US-NY-NYIS",
    "FR",
    "BR",
];
pub const DEFAULT_YEARS: [i32; 4] = [2021, 2022, 2023, 2024];

/// Tally of one batch run over (zone, month) units.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchSummary {
    pub ingested: usize,
    pub empty: usize,
    pub rows: usize,
    pub failures: Vec<String>,
}

impl BatchSummary {
    pub fn units(&self) -> usize {
        self.ingested + self.empty + self.failures.len()
    }
}

/// Ingest every (zone, year, month) unit in order. A failing unit is logged
/// and counted; the batch moves on to the next one.
pub fn run_batch<T: Transport, S: PartitionStore>(
    ingestor: &Ingestor<'_, T, S>,
    zones: &[String],
    years: &[i32],
    months: &[u32],
) -> BatchSummary {
    let total = (zones.len() * years.len() * months.len()) as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut summary = BatchSummary::default();
    for zone in zones {
        for &year in years {
            for &month in months {
                pb.set_message(format!("{} {}-{:02}", zone, year, month));
                match ingestor.ingest_period(zone, year, month) {
                    Ok(IngestOutcome::Ingested { rows, .. }) => {
                        summary.ingested += 1;
                        summary.rows += rows;
                    }
                    Ok(IngestOutcome::NoData) => summary.empty += 1,
                    Err(e) => {
                        let line = format!("Failed {} {}-{:02}: {}", zone, year, month, e);
                        error!("{}", line);
                        summary.failures.push(line);
                    }
                }
                pb.inc(1);
            }
        }
    }
    pb.finish_with_message("done");

    summary
}

use anyhow::{Context, Result};
use carbon_pipeline::{
    aggregate, aggregate_to, zone_quickcheck, Granularity, HttpTransport, Ingestor, ParquetStore,
    PipelineConfig, WindowedFetcher,
};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

mod runner;

use runner::{run_batch, DEFAULT_YEARS, DEFAULT_ZONES};

#[derive(Parser)]
#[command(name = "carbon_ingest")]
#[command(about = "Ingest hourly carbon-intensity history into partitioned Parquet and build aggregates")]
struct Args {
    /// Root directory of the partitioned store
    #[arg(long, default_value = "data", global = true)]
    data_dir: PathBuf,

    /// Override the API endpoint (otherwise EM_API_URL or the built-in default)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and store hourly data for every zone/month, then aggregate
    Ingest {
        /// Zones to ingest (defaults to the comparison set)
        #[arg(long, num_args = 1..)]
        zones: Vec<String>,

        /// Years to ingest (defaults to 2021-2024)
        #[arg(long, num_args = 1..)]
        years: Vec<i32>,

        /// Months to ingest (defaults to 1-12)
        #[arg(long, num_args = 1.., value_parser = clap::value_parser!(u32).range(1..=12))]
        months: Vec<u32>,

        /// Skip rebuilding daily/monthly/yearly partitions afterwards
        #[arg(long)]
        skip_aggregate: bool,
    },
    /// Rebuild daily/monthly/yearly partitions from stored hourly data
    Aggregate {
        /// Granularities to rebuild (defaults to daily, monthly and yearly)
        #[arg(long, num_args = 1..)]
        granularity: Vec<Granularity>,
    },
    /// Request a short window per zone and report reachability
    Quickcheck {
        #[arg(long, num_args = 1..)]
        zones: Vec<String>,
    },
}

fn zones_or_default(zones: Vec<String>) -> Vec<String> {
    if zones.is_empty() {
        DEFAULT_ZONES.iter().map(|z| z.to_string()).collect()
    } else {
        zones
    }
}

fn years_or_default(years: Vec<i32>) -> Vec<i32> {
    if years.is_empty() {
        DEFAULT_YEARS.to_vec()
    } else {
        years
    }
}

fn months_or_default(months: Vec<u32>) -> Vec<u32> {
    if months.is_empty() {
        (1..=12).collect()
    } else {
        months
    }
}

fn load_config(data_dir: &Path, api_url: Option<&str>) -> Result<PipelineConfig> {
    // A missing .env file is fine; the variable may come from the shell.
    dotenvy::dotenv().ok();
    let config = PipelineConfig::from_env()
        .context("Cannot start without API credentials")?
        .with_data_dir(data_dir);
    Ok(match api_url {
        Some(url) => config.with_api_url(url),
        None => config,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Ingest {
            zones,
            years,
            months,
            skip_aggregate,
        } => {
            let config = load_config(&args.data_dir, args.api_url.as_deref())?;
            let zones = zones_or_default(zones);
            let years = years_or_default(years);
            let months = months_or_default(months);

            println!("🚀 Carbon Intensity Ingestion");
            println!("{}", "=".repeat(60));
            println!("Zones: {:?}", zones);
            println!("Years: {:?}", years);
            println!("Store: {}", config.data_dir.display());

            let store = ParquetStore::new(&config.data_dir);
            let fetcher =
                WindowedFetcher::from_config(&config).context("Failed to build HTTP client")?;
            let ingestor = Ingestor::new(&fetcher, &store, config.window_days);

            let start = std::time::Instant::now();
            let summary = run_batch(&ingestor, &zones, &years, &months);

            println!("\n📊 Units: {}", summary.units());
            println!("  ✅ Ingested: {} ({} rows)", summary.ingested, summary.rows);
            println!("  ⏭️  No data: {}", summary.empty);
            println!("  ❌ Failed: {}", summary.failures.len());
            for failure in &summary.failures {
                println!("     {}", failure);
            }

            if !skip_aggregate {
                aggregate(&store).context("Aggregation failed")?;
            }

            println!("\n✅ Done in {:?}", start.elapsed());
        }
        Command::Aggregate { granularity } => {
            let store = ParquetStore::new(&args.data_dir);
            info!("Aggregating hourly data under {}", store.root().display());
            let targets = if granularity.is_empty() {
                Granularity::AGGREGATES.to_vec()
            } else {
                granularity
            };
            let written = aggregate_to(&store, &targets).context("Aggregation failed")?;
            for (granularity, rows) in written {
                println!("  📦 {}: {} rows", granularity, rows);
            }
        }
        Command::Quickcheck { zones } => {
            let config = load_config(&args.data_dir, args.api_url.as_deref())?;
            let transport = HttpTransport::new(&config).context("Failed to build HTTP client")?;
            let report = zone_quickcheck(&transport, &zones_or_default(zones));
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_defaults_cover_full_comparison_set() {
        let args = Args::try_parse_from(["carbon_ingest", "ingest"]).unwrap();
        assert_eq!(args.data_dir, PathBuf::from("data"));
        let Command::Ingest {
            zones,
            years,
            months,
            skip_aggregate,
        } = args.command
        else {
            panic!("expected ingest");
        };
        assert!(!skip_aggregate);
        assert_eq!(zones_or_default(zones).len(), 6);
        assert_eq!(years_or_default(years), vec![2021, 2022, 2023, 2024]);
        assert_eq!(months_or_default(months), (1..=12).collect::<Vec<u32>>());
    }

    #[test]
    fn test_explicit_ingest_arguments() {
        let args = Args::try_parse_from([
            "carbon_ingest",
            "ingest",
            "--zones",
            "FR",
            "BR",
            "--months",
            "1",
            "12",
            "--data-dir",
            "/tmp/store",
        ])
        .unwrap();
        assert_eq!(args.data_dir, PathBuf::from("/tmp/store"));
        let Command::Ingest { zones, months, .. } = args.command else {
            panic!("expected ingest");
        };
        assert_eq!(zones_or_default(zones), vec!["FR", "BR"]);
        assert_eq!(months_or_default(months), vec![1, 12]);
    }

    #[test]
    fn test_months_outside_calendar_rejected() {
        for bad in ["0", "13"] {
            assert!(Args::try_parse_from(["carbon_ingest", "ingest", "--months", bad]).is_err());
        }
    }

    #[test]
    fn test_aggregate_granularity_parsing() {
        let args =
            Args::try_parse_from(["carbon_ingest", "aggregate", "--granularity", "daily", "Yearly"])
                .unwrap();
        let Command::Aggregate { granularity } = args.command else {
            panic!("expected aggregate");
        };
        assert_eq!(granularity, vec![Granularity::Daily, Granularity::Yearly]);

        assert!(
            Args::try_parse_from(["carbon_ingest", "aggregate", "--granularity", "weekly"])
                .is_err()
        );
    }
}

/// `DashCrab` - Multi-signal anomaly scoring for dashcam events
///
/// Copyright (C) 2025 Daniel Freiermuth
///
/// This program is free software: you can redistribute it and/or modify
/// it under the terms of the GNU General Public License as published by
/// the Free Software Foundation, either version 3 of the License, or
/// (at your option) any later version.
///
/// This program is distributed in the hope that it will be useful,
/// but WITHOUT ANY WARRANTY; without even the implied warranty of
/// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
/// GNU General Public License for more details.
///
/// You should have received a copy of the GNU General Public License
/// along with this program.  If not, see <https://www.gnu.org/licenses/>.
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dashcrab::core::StatisticsReport;
use dashcrab::dataset::load_batch;
use dashcrab::{Detector, DetectorConfig};
use std::path::{Path, PathBuf};

#[cfg(feature = "ram-profiling")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

#[derive(Parser, Debug)]
#[command(name = "dashcrab")]
#[command(author = "DashCrab Team")]
#[command(version = VERSION)]
#[command(about = "Score dashcam event descriptions for anomalies and explain why")]
#[command(long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path for the DHAT heap profiling output (only used when built with --features ram-profiling)
    #[cfg(feature = "ram-profiling")]
    #[arg(
        long = "profile-output",
        value_name = "PROFILE_FILE",
        default_value = "dhat-heap.json",
        global = true
    )]
    profile_output: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run detection over a record batch and save the results
    Detect {
        /// Records as a JSON array or JSON lines
        #[arg(long, value_name = "FILE")]
        records: PathBuf,

        /// Embeddings as a list of rows, or `{video_ids, embeddings}`
        #[arg(long, value_name = "FILE")]
        embeddings: PathBuf,

        /// Where to write the results
        #[arg(long, value_name = "FILE", default_value = "data/anomalies.json")]
        output: PathBuf,

        /// Detector config; defaults to the user config directory
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the expected anomaly fraction
        #[arg(long)]
        contamination: Option<f64>,

        /// Number of top anomalies to print
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },

    /// List the highest scoring records of a saved run
    Top {
        #[arg(long, value_name = "FILE")]
        results: PathBuf,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long, default_value_t = 0.0)]
        min_score: f64,
    },

    /// Print the explanation of one record as JSON
    Explain {
        #[arg(long, value_name = "FILE")]
        results: PathBuf,

        /// Video id of the record
        id: String,
    },

    /// Print summary statistics of a saved run as JSON
    Stats {
        #[arg(long, value_name = "FILE")]
        results: PathBuf,
    },

    /// Write the default detector configuration
    Config {
        #[arg(long, value_name = "FILE")]
        write: PathBuf,
    },
}

fn init_tracing() {
    // Set RUST_LOG environment variable to override (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_results(path: &Path) -> anyhow::Result<Detector> {
    let detector = Detector::new(DetectorConfig::default())?;
    detector
        .load(path)
        .with_context(|| format!("Failed to open results {}", path.display()))?;
    Ok(detector)
}

fn print_statistics(report: &StatisticsReport) {
    match report {
        StatisticsReport::Summary(stats) => {
            println!("Anomaly Detection Results:");
            println!("  Total videos: {}", stats.total);
            println!("  High anomalies: {}", stats.high);
            println!("  Medium anomalies: {}", stats.medium);
            println!("  Low anomalies: {}", stats.low);
            println!("  Anomaly rate: {:.1}%", stats.anomaly_rate * 100.0);
            println!("  Mean score: {:.3}", stats.mean);
            println!("  Max score: {:.3}", stats.max);
        }
        StatisticsReport::NoData { error } => println!("{error}"),
    }
}

fn print_top(
    detector: &Detector,
    limit: usize,
    min_score: f64,
    reasons: usize,
) -> anyhow::Result<()> {
    for (i, anomaly) in detector.top_anomalies(limit, min_score)?.iter().enumerate() {
        println!("{}. Video {} (score: {:.3})", i + 1, anomaly.video_id, anomaly.score);
        for reason in anomaly.reasons.iter().take(reasons) {
            println!("   - {reason}");
        }
        println!();
    }
    Ok(())
}

fn detect(
    records: &Path,
    embeddings: &Path,
    output: &Path,
    config: Option<&Path>,
    contamination: Option<f64>,
    top_k: usize,
) -> anyhow::Result<()> {
    let mut config = DetectorConfig::load_or_default(config)?;
    if let Some(contamination) = contamination {
        config.contamination = contamination;
    }
    let detector = Detector::new(config)?;

    let batch = load_batch(records, embeddings, detector.config().embedding_dimension)
        .context("Failed to load record batch")?;
    let report = detector.detect(&batch)?;
    for (kind, error) in &report.degradations {
        tracing::warn!("{kind} signal contributed no scores: {error}");
    }
    detector.persist(output)?;

    print_statistics(&detector.statistics()?);
    println!("\nTop {top_k} Anomalies:");
    print_top(&detector, top_k, 0.0, 2)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("DashCrab starting up (version {VERSION})");

    let args = Args::parse();

    #[cfg(feature = "ram-profiling")]
    let _profiler = {
        tracing::info!("RAM profiling enabled, output: {:?}", args.profile_output);
        dhat::Profiler::builder()
            .file_name(args.profile_output.clone())
            .build()
    };

    #[cfg(feature = "cpu-profiling")]
    {
        tracing::info!("CPU profiling enabled with Tracy - run Tracy profiler to connect");
    }

    match args.command {
        Command::Detect {
            records,
            embeddings,
            output,
            config,
            contamination,
            top_k,
        } => detect(
            &records,
            &embeddings,
            &output,
            config.as_deref(),
            contamination,
            top_k,
        ),
        Command::Top {
            results,
            limit,
            min_score,
        } => {
            let detector = open_results(&results)?;
            print_top(&detector, limit, min_score, usize::MAX)
        }
        Command::Explain { results, id } => {
            let detector = open_results(&results)?;
            let Some(explanation) = detector.explanation(&id)? else {
                bail!("No explanation for video {id} in {}", results.display());
            };
            println!("{}", serde_json::to_string_pretty(&explanation)?);
            Ok(())
        }
        Command::Stats { results } => {
            let detector = open_results(&results)?;
            println!("{}", serde_json::to_string_pretty(&detector.statistics()?)?);
            Ok(())
        }
        Command::Config { write } => {
            DetectorConfig::default().save(&write)?;
            println!("Wrote default configuration to {}", write.display());
            Ok(())
        }
    }
}

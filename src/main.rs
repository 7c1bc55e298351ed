//! pcap-metrics command-line interface.
//!
//! `analyze` prints the traffic report of a capture file (text, JSON or
//! JSON Lines) and can open a terminal chart view; `generate-config` prints
//! a default configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use pcap_metrics::analyzer::analyze_capture;
use pcap_metrics::config::Config;
use pcap_metrics::decoder::ByteAccounting;
use pcap_metrics::export::{export_analysis, OutputFormat};
use pcap_metrics::ui::run_ui;

/// pcap-metrics: traffic statistics from packet capture files.
#[derive(Parser, Debug)]
#[command(name = "pcap-metrics")]
#[command(version = "0.1.0")]
#[command(about = "Volume, throughput, inter-arrival timing and flows of a capture file")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a pcap/pcapng capture file.
    Analyze {
        /// Path to the capture file (.pcap, .pcapng, optionally gzipped).
        file: PathBuf,

        /// Output format: text, json, jsonl.
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Write the report to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration file (TOML).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Open the terminal chart view after the analysis.
        #[arg(long)]
        chart: bool,

        /// Count on-wire frame lengths instead of captured bytes.
        #[arg(long)]
        wire_length: bool,

        /// Count IPv6 frames too (only IPv4 is counted by default).
        #[arg(long)]
        ipv6: bool,

        /// Stop after this many frames (0 = unlimited).
        #[arg(long)]
        max_frames: Option<usize>,

        /// Enable verbose logging (writes to stderr).
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a default configuration file.
    GenerateConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            file,
            format,
            output,
            config,
            chart,
            wire_length,
            ipv6,
            max_frames,
            verbose,
        } => {
            // A named config file must load
            let mut settings = match config.as_deref() {
                Some(path) => Config::load(path)?,
                None => Config::default(),
            };

            // CLI flags override file settings
            if let Some(format) = format {
                settings.output.format = format;
            }
            if let Some(output) = output {
                settings.output.file = Some(output.display().to_string());
            }
            if let Some(max_frames) = max_frames {
                settings.capture.max_frames = max_frames;
            }
            if wire_length {
                settings.capture.byte_accounting = ByteAccounting::Wire;
            }
            settings.capture.include_ipv6 |= ipv6;
            settings.output.chart |= chart;
            settings.output.verbose |= verbose;
            settings.validate()?;

            init_logging(settings.output.verbose)?;
            run_analysis(&file, &settings)
        }

        Commands::GenerateConfig => {
            print!("{}", Config::generate_default());
            Ok(())
        }
    }
}

/// Installs the stderr subscriber; stdout is reserved for the report.
fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::WARN };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn run_analysis(file: &Path, settings: &Config) -> Result<()> {
    let analyzer_config = settings.analyzer_config();
    debug!("Analyzer config: {:?}", analyzer_config);

    let analysis = analyze_capture(file, &analyzer_config)
        .with_context(|| format!("Failed to analyze capture: {}", file.display()))?;

    let rendered = export_analysis(&analysis, settings.output.format);

    match &settings.output.file {
        Some(path) => {
            std::fs::write(path, format!("{}\n", rendered))
                .with_context(|| format!("Failed to write report: {}", path))?;
            debug!("Report written to {}", path);
        }
        None => {
            if settings.output.chart {
                // The chart view takes over the terminal; print the report after it
                run_ui(analysis)?;
            }
            println!("{}", rendered);
        }
    }

    Ok(())
}

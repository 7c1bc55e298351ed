//! Capture Analysis Pipeline
//!
//! Drives one analysis run: frames are streamed from a [`CaptureReader`],
//! decoded by a [`FrameDecoder`] and accumulated by a [`MetricsEngine`].
//! Frames that carry no IP header are counted and skipped; container errors
//! abort the run without producing a partial result.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::capture::{CaptureFormat, CaptureReader, LinkType, RawFrame};
use crate::decoder::{ByteAccounting, FrameDecoder};
use crate::error::CaptureError;
use crate::metrics::{MetricsEngine, Report};

/// Configuration for an analysis run.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    /// Maximum frames to read (0 = unlimited)
    pub max_frames: usize,
    /// How frame sizes are counted
    pub byte_accounting: ByteAccounting,
    /// Count IPv6 frames as IP records (IPv4 only otherwise)
    pub include_ipv6: bool,
}

/// Frame-level bookkeeping for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub frames_read: u64,
    pub ip_frames: u64,
    pub skipped_frames: u64,
    /// Reading stopped at `max_frames`
    pub truncated_by_limit: bool,
    pub duration_ms: u64,
}

/// Result of analyzing one capture.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub source: String,
    pub format: CaptureFormat,
    pub compressed: bool,
    /// Distinct link types seen across all frames.
    pub link_types: Vec<LinkType>,
    pub report: Report,
    pub stats: DecodeStats,
}

/// Incremental frame -> report accumulator.
#[derive(Debug)]
pub struct CaptureAnalyzer {
    config: AnalyzerConfig,
    decoder: FrameDecoder,
    engine: MetricsEngine,
    stats: DecodeStats,
    link_types: BTreeSet<LinkType>,
}

impl CaptureAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config.byte_accounting).with_ipv6(config.include_ipv6),
            config,
            engine: MetricsEngine::new(),
            stats: DecodeStats::default(),
            link_types: BTreeSet::new(),
        }
    }

    /// Process a single frame.
    pub fn process_frame(&mut self, frame: &RawFrame) {
        self.stats.frames_read += 1;
        self.link_types.insert(frame.link_type);

        match self.decoder.decode(frame) {
            Some(record) => {
                trace!(
                    "Frame {}: {} ({} bytes)",
                    frame.frame_number,
                    record.flow_key(),
                    record.total_length
                );
                self.engine.push(&record);
                self.stats.ip_frames += 1;
            }
            None => self.stats.skipped_frames += 1,
        }
    }

    /// True once `max_frames` frames have been processed.
    pub fn limit_reached(&self) -> bool {
        self.config.max_frames > 0 && self.stats.frames_read >= self.config.max_frames as u64
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn finish(self) -> (Report, DecodeStats, Vec<LinkType>) {
        (
            self.engine.finish(),
            self.stats,
            self.link_types.into_iter().collect(),
        )
    }
}

/// Analyzes the capture file at `path`.
pub fn analyze_capture<P: AsRef<Path>>(
    path: P,
    config: &AnalyzerConfig,
) -> Result<Analysis, CaptureError> {
    let path = path.as_ref();
    let reader = CaptureReader::open(path)?;
    analyze_reader(reader, path.display().to_string(), config)
}

/// Runs the pipeline over an already opened reader.
pub fn analyze_reader(
    mut reader: CaptureReader,
    source: impl Into<String>,
    config: &AnalyzerConfig,
) -> Result<Analysis, CaptureError> {
    let source = source.into();
    let start_time = Instant::now();
    let format = reader.format();
    let compressed = reader.is_compressed();

    debug!(
        "Analyzing {} ({}{}), accounting: {}, IPv6: {}",
        source,
        format,
        if compressed { ", gzip" } else { "" },
        config.byte_accounting,
        config.include_ipv6
    );

    let mut analyzer = CaptureAnalyzer::new(config.clone());
    let mut truncated_by_limit = false;

    loop {
        if analyzer.limit_reached() {
            info!("Reached max frames limit: {}", config.max_frames);
            truncated_by_limit = true;
            break;
        }
        match reader.next_frame()? {
            Some(frame) => analyzer.process_frame(&frame),
            None => break,
        }
    }

    let (report, mut stats, link_types) = analyzer.finish();
    stats.truncated_by_limit = truncated_by_limit;
    stats.duration_ms = start_time.elapsed().as_millis() as u64;

    info!(
        "Analysis complete: {} frames read, {} IP frames, {} skipped in {}ms",
        stats.frames_read, stats.ip_frames, stats.skipped_frames, stats.duration_ms
    );

    Ok(Analysis {
        source,
        format,
        compressed,
        link_types,
        report,
        stats,
    })
}

//! pcap-metrics: traffic statistics from packet capture files.
//!
//! Reads a pcap or pcapng file (optionally gzip-compressed), extracts the
//! IP layer of every frame and derives packet/byte counts, capture duration,
//! throughput, inter-arrival timing and the set of source -> destination
//! flows.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐     ┌──────────────┐     ┌───────────────┐     ┌────────┐
//! │ CaptureReader │────>│ FrameDecoder │────>│ MetricsEngine │────>│ Report │
//! │ (pcap/pcapng) │     │ (IP header)  │     │ (single pass) │     │        │
//! └───────────────┘     └──────────────┘     └───────────────┘     └────────┘
//! ```
//!
//! - **CaptureReader**: lazy, single-pass iterator over raw frames
//! - **FrameDecoder**: best-effort IP extraction; non-IP frames are skipped
//! - **MetricsEngine**: aggregate statistics and per-packet series
//!
//! [`analyzer::analyze_capture`] wires the three together.

pub mod analyzer;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod error;
pub mod export;
pub mod metrics;
pub mod ui;

pub use analyzer::{analyze_capture, Analysis, AnalyzerConfig, DecodeStats};
pub use capture::{CaptureFormat, CaptureReader, LinkType, RawFrame};
pub use decoder::{ByteAccounting, FlowKey, FrameDecoder, IpRecord};
pub use error::CaptureError;
pub use metrics::{MetricsEngine, Report};

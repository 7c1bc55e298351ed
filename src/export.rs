//! Export Module
//!
//! Renders an [`Analysis`] as console text, pretty JSON, or JSON Lines with
//! one object per packet for external plotting.

use serde::Serialize;

use crate::analyzer::Analysis;
use crate::decoder::FlowKey;
use crate::metrics::IntervalStatistics;

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonLines, // One JSON object per line (JSONL)
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
        }
    }
}

/// JSON-serializable analysis report
#[derive(Serialize)]
pub struct JsonReport<'a> {
    pub version: &'static str,
    pub source: &'a str,
    pub format: String,
    pub compressed: bool,
    pub link_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    pub frames_read: u64,
    pub ip_frames: u64,
    pub skipped_frames: u64,
    pub truncated_by_limit: bool,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub duration_seconds: f64,
    pub throughput_bits_per_second: f64,
    pub throughput_kbps: f64,
    pub mean_inter_arrival_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inter_arrival_stats: Option<&'a IntervalStatistics>,
    pub flows: Vec<JsonFlow>,
    pub cumulative_bytes_series: &'a [u64],
    pub inter_arrival_series: &'a [f64],
    pub relative_times: &'a [f64],
}

impl<'a> From<&'a Analysis> for JsonReport<'a> {
    fn from(analysis: &'a Analysis) -> Self {
        let report = &analysis.report;
        Self {
            version: "1.0",
            source: &analysis.source,
            format: analysis.format.to_string(),
            compressed: analysis.compressed,
            link_types: analysis.link_types.iter().map(|l| l.to_string()).collect(),
            start_time: report.start_time().map(|t| t.to_rfc3339()),
            frames_read: analysis.stats.frames_read,
            ip_frames: analysis.stats.ip_frames,
            skipped_frames: analysis.stats.skipped_frames,
            truncated_by_limit: analysis.stats.truncated_by_limit,
            total_packets: report.total_packets,
            total_bytes: report.total_bytes,
            duration_seconds: report.duration_seconds,
            throughput_bits_per_second: report.throughput_bits_per_second,
            throughput_kbps: report.throughput_kbps(),
            mean_inter_arrival_seconds: report.mean_inter_arrival_seconds,
            inter_arrival_stats: report.inter_arrival_stats.as_ref(),
            flows: report.flows.iter().map(JsonFlow::from).collect(),
            cumulative_bytes_series: &report.cumulative_bytes_series,
            inter_arrival_series: &report.inter_arrival_series,
            relative_times: &report.relative_times,
        }
    }
}

/// JSON-serializable flow
#[derive(Serialize)]
pub struct JsonFlow {
    pub src_ip: String,
    pub dst_ip: String,
}

impl From<&FlowKey> for JsonFlow {
    fn from(flow: &FlowKey) -> Self {
        Self {
            src_ip: flow.src_ip.to_string(),
            dst_ip: flow.dst_ip.to_string(),
        }
    }
}

/// One packet row of the JSON Lines export.
#[derive(Serialize)]
pub struct JsonPacket {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub index: usize,
    pub relative_time: f64,
    pub cumulative_bytes: u64,
    /// Gap to the previous packet; absent for the first packet.
    pub inter_arrival: Option<f64>,
}

/// Exports an analysis in the specified format
pub fn export_analysis(analysis: &Analysis, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => export_text(analysis),
        OutputFormat::Json => export_json(analysis),
        OutputFormat::JsonLines => export_jsonl(analysis),
    }
}

/// Exports analysis as pretty-printed JSON
pub fn export_json(analysis: &Analysis) -> String {
    let json_report = JsonReport::from(analysis);
    serde_json::to_string_pretty(&json_report)
        .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Exports analysis as JSON Lines (summary line, then one line per packet)
pub fn export_jsonl(analysis: &Analysis) -> String {
    let report = &analysis.report;
    let mut lines = Vec::with_capacity(report.cumulative_bytes_series.len() + 1);

    // First line is the summary
    let summary = serde_json::json!({
        "type": "summary",
        "source": analysis.source,
        "total_packets": report.total_packets,
        "total_bytes": report.total_bytes,
        "duration_seconds": report.duration_seconds,
        "throughput_bits_per_second": report.throughput_bits_per_second,
        "mean_inter_arrival_seconds": report.mean_inter_arrival_seconds,
        "flows": report.flows.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
    });
    lines.push(serde_json::to_string(&summary).unwrap_or_default());

    for (index, (&cumulative_bytes, &relative_time)) in report
        .cumulative_bytes_series
        .iter()
        .zip(&report.relative_times)
        .enumerate()
    {
        let packet = JsonPacket {
            kind: "packet",
            index,
            relative_time,
            cumulative_bytes,
            inter_arrival: index
                .checked_sub(1)
                .and_then(|i| report.inter_arrival_series.get(i).copied()),
        };
        if let Ok(line) = serde_json::to_string(&packet) {
            lines.push(line);
        }
    }

    lines.join("\n")
}

/// Exports analysis as formatted text
pub fn export_text(analysis: &Analysis) -> String {
    let report = &analysis.report;
    let mut output = String::new();

    output.push_str(&format!(
        "Packet count (total)                  : {}\n",
        report.total_packets
    ));
    output.push_str(&format!(
        "Byte count (total)                    : {} B\n",
        report.total_bytes
    ));
    output.push_str(&format!(
        "Capture duration                      : {:.3} s\n",
        report.duration_seconds
    ));
    output.push_str(&format!(
        "Mean throughput                       : {:.3} kbit/s\n",
        report.throughput_kbps()
    ));
    output.push_str(&format!(
        "Mean inter-arrival time               : {:.3} ms\n",
        report.mean_inter_arrival_ms()
    ));

    output.push_str("\nIP addresses: source -> destination:\n");
    for flow in &report.flows {
        output.push_str(&format!("    - {}\n", flow));
    }

    if analysis.stats.truncated_by_limit {
        output.push_str(&format!(
            "\n(stopped after {} frames: frame limit reached)\n",
            analysis.stats.frames_read
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DecodeStats;
    use crate::capture::{CaptureFormat, LinkType};
    use crate::decoder::IpRecord;
    use crate::metrics::MetricsEngine;

    fn analysis() -> Analysis {
        let records = vec![
            IpRecord::new(0.0, 100, "10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()),
            IpRecord::new(1.0, 200, "10.0.0.2".parse().unwrap(), "10.0.0.1".parse().unwrap()),
            IpRecord::new(3.0, 300, "10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()),
        ];
        Analysis {
            source: "test.pcap".to_string(),
            format: CaptureFormat::Pcap,
            compressed: false,
            link_types: vec![LinkType::ETHERNET],
            report: MetricsEngine::compute(records),
            stats: DecodeStats {
                frames_read: 4,
                ip_frames: 3,
                skipped_frames: 1,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "jsonl".parse::<OutputFormat>().unwrap(),
            OutputFormat::JsonLines
        );
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Text.to_string(), "text");
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::JsonLines.to_string(), "jsonl");
    }

    #[test]
    fn test_export_text() {
        let text = export_text(&analysis());

        assert!(text.contains("Packet count (total)                  : 3\n"));
        assert!(text.contains(": 600 B"));
        assert!(text.contains(": 3.000 s"));
        assert!(text.contains(": 1.600 kbit/s"));
        assert!(text.contains(": 1500.000 ms"));

        let first = text.find("- 10.0.0.1 -> 10.0.0.2").unwrap();
        let second = text.find("- 10.0.0.2 -> 10.0.0.1").unwrap();
        assert!(first < second);
        assert!(!text.contains("frame limit"));
    }

    #[test]
    fn test_export_json() {
        let json = export_json(&analysis());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["total_packets"], 3);
        assert_eq!(value["total_bytes"], 600);
        assert_eq!(value["format"], "pcap");
        assert_eq!(value["skipped_frames"], 1);
        assert_eq!(value["flows"].as_array().unwrap().len(), 2);
        assert_eq!(value["flows"][0]["src_ip"], "10.0.0.1");
        assert_eq!(value["cumulative_bytes_series"][2], 600);
        assert_eq!(value["inter_arrival_stats"]["median"], 1.5);
    }

    #[test]
    fn test_export_jsonl() {
        let jsonl = export_jsonl(&analysis());
        let lines: Vec<serde_json::Value> = jsonl
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["type"], "summary");
        assert_eq!(lines[1]["type"], "packet");
        assert!(lines[1]["inter_arrival"].is_null());
        assert_eq!(lines[3]["index"], 2);
        assert_eq!(lines[3]["relative_time"], 3.0);
        assert_eq!(lines[3]["cumulative_bytes"], 600);
        assert_eq!(lines[3]["inter_arrival"], 2.0);
    }

    #[test]
    fn test_export_empty_analysis() {
        let mut empty = analysis();
        empty.report = MetricsEngine::compute(Vec::new());

        let text = export_text(&empty);
        assert!(text.contains(": 0 B"));
        assert!(text.contains(": 0.000 kbit/s"));

        let jsonl = export_jsonl(&empty);
        assert_eq!(jsonl.lines().count(), 1);
    }
}

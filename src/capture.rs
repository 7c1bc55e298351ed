//! Capture file reader - the producer end of the analysis pipeline.
//!
//! Sniffs the container (classic pcap, pcapng, optionally gzip-compressed),
//! hands block parsing to `pcap_parser` and yields raw link-layer frames
//! lazily, one record at a time, in on-disk order. The reader is
//! single-pass: to read a file again, open it again.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::iter::FusedIterator;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use pcap_parser::pcapng::Block;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::CaptureError;

/// Buffer size for reading capture files (64KB).
const BUFFER_SIZE: usize = 65536;

/// Parser buffer size. A whole block must fit, so this stays well above the
/// largest snaplen in common use (262144).
const PARSER_BUFFER_SIZE: usize = 1 << 20;

/// Gzip magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Classic pcap global header length.
const PCAP_HEADER_LEN: usize = 24;

/// Smallest possible pcapng Section Header Block.
const PCAPNG_SHB_MIN_LEN: usize = 28;

/// Link-layer header type as declared by the capture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LinkType(pub u32);

impl LinkType {
    pub const NULL: Self = Self(0);
    pub const ETHERNET: Self = Self(1);
    pub const RAW_OPENBSD: Self = Self(12);
    pub const RAW_BSDOS: Self = Self(14);
    pub const RAW: Self = Self(101);
    pub const LOOP: Self = Self(108);
    pub const LINUX_SLL: Self = Self(113);
    pub const IPV4: Self = Self(228);
    pub const IPV6: Self = Self(229);
    pub const LINUX_SLL2: Self = Self(276);

    /// Returns a short name for well-known link types.
    pub fn name(&self) -> &'static str {
        match *self {
            Self::NULL => "NULL",
            Self::ETHERNET => "EN10MB",
            Self::RAW | Self::RAW_OPENBSD | Self::RAW_BSDOS => "RAW",
            Self::LOOP => "LOOP",
            Self::LINUX_SLL => "LINUX_SLL",
            Self::IPV4 => "IPV4",
            Self::IPV6 => "IPV6",
            Self::LINUX_SLL2 => "LINUX_SLL2",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Container format detected from the file magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    Pcap,
    PcapNg,
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcap => write!(f, "pcap"),
            Self::PcapNg => write!(f, "pcapng"),
        }
    }
}

/// One link-layer frame as recorded in the capture.
///
/// The timestamp is kept exactly as stored: whole seconds plus a fraction
/// expressed in `ts_units` per second (10^6 or 10^9 for classic pcap, the
/// interface resolution for pcapng).
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame number (1-indexed).
    pub frame_number: u64,
    pub ts_sec: u64,
    pub ts_frac: u64,
    pub ts_units: u64,
    /// Bytes present in the capture.
    pub captured_len: u32,
    /// Length of the frame on the wire.
    pub original_len: u32,
    pub link_type: LinkType,
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Capture timestamp in fractional seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.ts_sec as f64 + self.ts_frac as f64 / self.ts_units as f64
    }

    /// Capture timestamp as a UTC date-time, if representable.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        let nanos = (u128::from(self.ts_frac) * 1_000_000_000 / u128::from(self.ts_units)) as u64;
        let secs = self.ts_sec.checked_add(nanos / 1_000_000_000)?;
        DateTime::from_timestamp(i64::try_from(secs).ok()?, (nanos % 1_000_000_000) as u32)
    }

    /// Check if the frame was truncated during capture.
    pub fn is_truncated(&self) -> bool {
        self.captured_len < self.original_len
    }
}

/// An interface declared by a pcapng Interface Description Block.
#[derive(Debug, Clone, Copy)]
struct Interface {
    link_type: LinkType,
    /// 0 means unlimited.
    snaplen: u32,
    /// Timestamp units per second.
    ts_units: u64,
}

/// Read bookkeeping shared with the byte source the parser owns.
#[derive(Debug, Default)]
struct Progress {
    bytes: AtomicU64,
    exhausted: AtomicBool,
    error: Mutex<Option<io::Error>>,
}

impl Progress {
    fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    fn take_error(&self) -> Option<io::Error> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Byte source handed to the container parser.
///
/// Every read fills the caller's buffer as far as the stream allows, so the
/// parser always sees a complete container header on its first read. Byte
/// counts and I/O errors are recorded in the shared [`Progress`] because the
/// parser only reports that a read failed.
struct Source {
    inner: BufReader<Box<dyn Read + Send>>,
    progress: Arc<Progress>,
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match read_fully(&mut self.inner, buf) {
            Ok(n) => {
                self.progress.bytes.fetch_add(n as u64, Ordering::Relaxed);
                if n < buf.len() {
                    self.progress.exhausted.store(true, Ordering::Relaxed);
                }
                Ok(n)
            }
            Err(e) => {
                let kind = e.kind();
                if let Ok(mut slot) = self.progress.error.lock() {
                    *slot = Some(e);
                }
                Err(io::Error::from(kind))
            }
        }
    }
}

/// Outcome of one parse attempt on the buffered input.
enum Step {
    /// A block of `len` bytes was consumed; packet blocks also yield a frame.
    Block { len: usize, frame: Option<RawFrame> },
    /// More input is needed (`needed` bytes, 0 if unknown).
    Incomplete { needed: usize },
    /// The stream ended in the middle of a block.
    UnexpectedEof,
    Eof,
}

enum Container {
    Legacy {
        reader: LegacyPcapReader<Source>,
        ts_units: u64,
        link_type: Option<LinkType>,
    },
    PcapNg {
        reader: PcapNGReader<Source>,
        interfaces: Vec<Interface>,
    },
}

impl Container {
    fn step(&mut self) -> Result<Step, CaptureError> {
        match self {
            Self::Legacy {
                reader,
                ts_units,
                link_type,
            } => match reader.next() {
                Ok((len, block)) => {
                    let frame = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            if header.version_major != 2 {
                                warn!(
                                    "Unexpected pcap version {}.{}, continuing",
                                    header.version_major, header.version_minor
                                );
                            }
                            // Upper bits of the network field carry FCS information
                            *link_type = Some(LinkType(header.network.0 as u32 & 0xFFFF));
                            None
                        }
                        PcapBlockOwned::Legacy(packet) => {
                            let link_type = (*link_type).ok_or_else(|| {
                                CaptureError::format("Packet record before the pcap header")
                            })?;
                            Some(RawFrame {
                                frame_number: 0,
                                ts_sec: u64::from(packet.ts_sec),
                                ts_frac: u64::from(packet.ts_usec),
                                ts_units: *ts_units,
                                captured_len: packet.caplen,
                                original_len: packet.origlen,
                                link_type,
                                data: packet.data.to_vec(),
                            })
                        }
                        PcapBlockOwned::NG(_) => None,
                    };
                    reader.consume(len);
                    Ok(Step::Block { len, frame })
                }
                Err(e) => classify(e),
            },
            Self::PcapNg { reader, interfaces } => match reader.next() {
                Ok((len, block)) => {
                    let frame = match block {
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            // Interface ids are scoped to their section
                            interfaces.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            let interface = Interface {
                                link_type: LinkType(idb.linktype.0 as u32 & 0xFFFF),
                                snaplen: idb.snaplen,
                                ts_units: ts_units_from_resolution(idb.if_tsresol)?,
                            };
                            trace!(
                                "Interface {}: {}, {} units/s",
                                interfaces.len(),
                                interface.link_type,
                                interface.ts_units
                            );
                            interfaces.push(interface);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let interface = lookup_interface(interfaces, epb.if_id)?;
                            let ts = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                            Some(RawFrame {
                                frame_number: 0,
                                ts_sec: ts / interface.ts_units,
                                ts_frac: ts % interface.ts_units,
                                ts_units: interface.ts_units,
                                captured_len: epb.caplen,
                                original_len: epb.origlen,
                                link_type: interface.link_type,
                                data: epb.packet_data().to_vec(),
                            })
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            // No interface id and no timestamp: interface 0, time 0
                            let interface = lookup_interface(interfaces, 0)?;
                            let mut captured = spb.packet_data().len().min(spb.origlen as usize);
                            if interface.snaplen > 0 {
                                captured = captured.min(interface.snaplen as usize);
                            }
                            let data = spb.packet_data()[..captured].to_vec();
                            Some(RawFrame {
                                frame_number: 0,
                                ts_sec: 0,
                                ts_frac: 0,
                                ts_units: interface.ts_units,
                                captured_len: captured as u32,
                                original_len: spb.origlen,
                                link_type: interface.link_type,
                                data,
                            })
                        }
                        _ => None,
                    };
                    reader.consume(len);
                    Ok(Step::Block { len, frame })
                }
                Err(e) => classify(e),
            },
        }
    }

    /// Refill the parser buffer; `Ok(false)` when the stream ended mid-block.
    fn refill(&mut self) -> Result<bool, String> {
        let result = match self {
            Self::Legacy { reader, .. } => reader.refill(),
            Self::PcapNg { reader, .. } => reader.refill(),
        };
        match result {
            Ok(()) => Ok(true),
            Err(PcapError::UnexpectedEof) => Ok(false),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn classify(error: PcapError<&[u8]>) -> Result<Step, CaptureError> {
    match error {
        PcapError::Eof => Ok(Step::Eof),
        PcapError::Incomplete(needed) => Ok(Step::Incomplete { needed }),
        PcapError::UnexpectedEof => Ok(Step::UnexpectedEof),
        e => Err(CaptureError::format(format!("Malformed capture data: {e}"))),
    }
}

fn lookup_interface(interfaces: &[Interface], id: u32) -> Result<Interface, CaptureError> {
    interfaces.get(id as usize).copied().ok_or_else(|| {
        CaptureError::format(format!(
            "Packet references undeclared interface {id} ({} declared)",
            interfaces.len()
        ))
    })
}

/// Decode an `if_tsresol` value into units per second.
fn ts_units_from_resolution(resolution: u8) -> Result<u64, CaptureError> {
    let exponent = u32::from(resolution & 0x7f);
    let units = if resolution & 0x80 == 0 {
        10u64.checked_pow(exponent)
    } else {
        2u64.checked_pow(exponent)
    };
    units.filter(|&u| u > 0).ok_or_else(|| {
        CaptureError::format(format!("Unsupported timestamp resolution {resolution:#04x}"))
    })
}

/// Map a header parse failure, preferring the underlying I/O error.
fn header_error(progress: &Progress, format: CaptureFormat, error: PcapError<&[u8]>) -> CaptureError {
    match progress.take_error() {
        Some(e) => CaptureError::Io(e),
        None => CaptureError::format(format!("Failed to parse {format} header: {error}")),
    }
}

/// Streaming reader for pcap and pcapng capture files.
///
/// Iterating yields `Result<RawFrame, CaptureError>`; after the first error
/// the iterator is exhausted.
pub struct CaptureReader {
    container: Container,
    progress: Arc<Progress>,
    format: CaptureFormat,
    compressed: bool,
    /// Bytes consumed by parsed blocks.
    offset: u64,
    frame_number: u64,
    finished: bool,
}

impl CaptureReader {
    /// Open a capture file for reading.
    ///
    /// Automatically detects and decompresses gzipped files. Fails with
    /// `CaptureError::Format` when the magic number is not recognized.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!("Opening capture file: {}", path.display());
        Self::from_reader(file)
    }

    /// Build a reader over any byte stream (file, socket, in-memory buffer).
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Result<Self, CaptureError> {
        let mut reader: Box<dyn Read + Send> = Box::new(reader);

        let mut magic = [0u8; 4];
        let mut read = read_fully(&mut reader, &mut magic)?;

        let compressed = read >= GZIP_MAGIC.len() && magic[..2] == GZIP_MAGIC;
        if compressed {
            debug!("Gzip stream detected, decompressing transparently");
            let prefix = Cursor::new(magic[..read].to_vec());
            reader = Box::new(GzDecoder::new(prefix.chain(reader)));
            read = read_fully(&mut reader, &mut magic)?;
        }

        if read < magic.len() {
            return Err(CaptureError::format(format!(
                "File too short to read magic number ({read} bytes)"
            )));
        }

        let (format, header_len) = match magic {
            [0xd4, 0xc3, 0xb2, 0xa1]
            | [0xa1, 0xb2, 0xc3, 0xd4]
            | [0x4d, 0x3c, 0xb2, 0xa1]
            | [0xa1, 0xb2, 0x3c, 0x4d] => (CaptureFormat::Pcap, PCAP_HEADER_LEN),
            [0x0a, 0x0d, 0x0d, 0x0a] => (CaptureFormat::PcapNg, PCAPNG_SHB_MIN_LEN),
            _ => {
                return Err(CaptureError::format(format!(
                    "Unknown magic number: {magic:02x?}"
                )))
            }
        };

        // A cut-off container header is a truncation, not a format problem
        let mut header = vec![0u8; header_len];
        header[..magic.len()].copy_from_slice(&magic);
        let available = magic.len() + read_fully(&mut reader, &mut header[magic.len()..])?;
        if available < header_len {
            return Err(CaptureError::Truncated {
                frame: 0,
                offset: 0,
                expected: header_len as u64,
                available: available as u64,
            });
        }

        // Nanosecond-resolution magics, either byte order
        let ts_units = match magic {
            [0x4d, 0x3c, 0xb2, 0xa1] | [0xa1, 0xb2, 0x3c, 0x4d] => 1_000_000_000,
            _ => 1_000_000,
        };

        // Put the header back in front of the stream so parsing starts at offset 0
        let stream: Box<dyn Read + Send> = Box::new(Cursor::new(header).chain(reader));
        let progress = Arc::new(Progress::default());
        let source = Source {
            inner: BufReader::with_capacity(BUFFER_SIZE, stream),
            progress: Arc::clone(&progress),
        };

        let container = match format {
            CaptureFormat::Pcap => Container::Legacy {
                reader: LegacyPcapReader::new(PARSER_BUFFER_SIZE, source)
                    .map_err(|e| header_error(&progress, format, e))?,
                ts_units,
                link_type: None,
            },
            CaptureFormat::PcapNg => Container::PcapNg {
                reader: PcapNGReader::new(PARSER_BUFFER_SIZE, source)
                    .map_err(|e| header_error(&progress, format, e))?,
                interfaces: Vec::new(),
            },
        };

        debug!(
            "Capture format: {}{}",
            format,
            if compressed { " (gzip)" } else { "" }
        );

        Ok(Self {
            container,
            progress,
            format,
            compressed,
            offset: 0,
            frame_number: 0,
            finished: false,
        })
    }

    /// Container format of the capture.
    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    /// Whether the capture was gzip-compressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Link type of the capture, once its header block has been read.
    ///
    /// For pcapng this is the link type of the first interface declared so
    /// far; individual frames carry their own interface's link type.
    pub fn link_type(&self) -> Option<LinkType> {
        match &self.container {
            Container::Legacy { link_type, .. } => *link_type,
            Container::PcapNg { interfaces, .. } => interfaces.first().map(|i| i.link_type),
        }
    }

    /// Number of frames read so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_number
    }

    /// Read the next frame, `Ok(None)` at end of file.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let mut needed = 0;
        loop {
            match self.container.step()? {
                Step::Block { len, frame } => {
                    self.offset += len as u64;
                    if let Some(mut frame) = frame {
                        self.frame_number += 1;
                        frame.frame_number = self.frame_number;
                        trace!(
                            "Frame {}: {} bytes captured, {} on wire",
                            frame.frame_number,
                            frame.captured_len,
                            frame.original_len
                        );
                        return Ok(Some(frame));
                    }
                }
                Step::Eof => return Ok(None),
                Step::UnexpectedEof => return self.end_of_stream(needed),
                Step::Incomplete { needed: more } => {
                    needed = more;
                    let before = self.progress.bytes();
                    let refilled = match self.container.refill() {
                        Ok(refilled) => refilled,
                        Err(reason) => return Err(self.read_failure(reason)),
                    };
                    if !refilled || self.progress.bytes() == before {
                        if self.progress.is_exhausted() {
                            return self.end_of_stream(needed);
                        }
                        return Err(CaptureError::format(format!(
                            "Block at offset {} does not fit the {} byte read buffer",
                            self.offset, PARSER_BUFFER_SIZE
                        )));
                    }
                }
            }
        }
    }

    /// The stream is exhausted: clean end if nothing is left over,
    /// otherwise the pending block was cut short.
    fn end_of_stream(&self, needed: usize) -> Result<Option<RawFrame>, CaptureError> {
        let available = self.progress.bytes().saturating_sub(self.offset);
        if available == 0 {
            return Ok(None);
        }
        Err(CaptureError::Truncated {
            frame: self.frame_number + 1,
            offset: self.offset,
            expected: available + needed.max(1) as u64,
            available,
        })
    }

    fn read_failure(&self, reason: String) -> CaptureError {
        match self.progress.take_error() {
            Some(e) => CaptureError::Io(e),
            None => CaptureError::format(format!("Failed to refill read buffer: {reason}")),
        }
    }
}

impl Iterator for CaptureReader {
    type Item = Result<RawFrame, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for CaptureReader {}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_fully<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

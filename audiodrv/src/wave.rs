//! RIFF/WAVE reading and writing

use crate::error::{Error, Result};
use crate::format::BitDepth;
use crate::sample::{SampleBuffer, Samples};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Samples converted and written per batch
pub const BATCH_SAMPLES: usize = 2048;

/// Sample rate used when a buffer carries none
pub const DEFAULT_RATE: u32 = 44100;

const FORMAT_PCM: u16 = 1;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;
const FMT_LEN: u32 = 16;
/// Bytes of RIFF length that precede the sample data in a canonical file
const HEADER_OVERHEAD: u32 = 36;

/// Contents of a "fmt " chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    /// Format tag, 1 for integer PCM
    pub format_tag: u16,
    /// Interleaved channel count
    pub channels: u16,
    /// Frames per second
    pub sample_rate: u32,
    /// Bytes per second
    pub byte_rate: u32,
    /// Bytes per frame
    pub block_align: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl WaveFormat {
    /// Canonical integer PCM format. A frame is `bits / 8 * channels` bytes.
    ///
    /// Fails when the byte rate does not fit the header's 32-bit field.
    pub fn pcm(channels: u16, sample_rate: u32, depth: BitDepth) -> Result<Self> {
        let block_align = (depth.bytes() as u16)
            .checked_mul(channels)
            .ok_or_else(|| Error::FormatUnsupported(format!("{} channels", channels)))?;
        let byte_rate = sample_rate.checked_mul(block_align as u32).ok_or_else(|| {
            Error::FormatUnsupported(format!(
                "byte rate of {} Hz with {} byte frames exceeds 32 bits",
                sample_rate, block_align
            ))
        })?;
        Ok(Self {
            format_tag: FORMAT_PCM,
            channels,
            sample_rate,
            byte_rate,
            block_align,
            bits_per_sample: depth.bits(),
        })
    }

    fn parse(b: &[u8; 16]) -> Self {
        Self {
            format_tag: u16::from_le_bytes([b[0], b[1]]),
            channels: u16::from_le_bytes([b[2], b[3]]),
            sample_rate: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            byte_rate: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            block_align: u16::from_le_bytes([b[12], b[13]]),
            bits_per_sample: u16::from_le_bytes([b[14], b[15]]),
        }
    }

    fn to_bytes(self) -> [u8; 16] {
        let mut b = [0u8; 16];
        b[0..2].copy_from_slice(&self.format_tag.to_le_bytes());
        b[2..4].copy_from_slice(&self.channels.to_le_bytes());
        b[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        b[8..12].copy_from_slice(&self.byte_rate.to_le_bytes());
        b[12..14].copy_from_slice(&self.block_align.to_le_bytes());
        b[14..16].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        b
    }
}

fn incomplete(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::CorruptFile("incomplete file".to_string())
    } else {
        Error::Io(e)
    }
}

/// Load a WAVE file into a floating point buffer.
///
/// The result carries the file's sample rate and bit depth, and the 2-row
/// layout when the file is stereo. Buffers are mono or stereo only, so
/// files with more channels fail with [`Error::FormatUnsupported`].
pub fn load<P: AsRef<Path>>(path: P) -> Result<SampleBuffer> {
    let file = File::open(path.as_ref())?;
    read_from(BufReader::new(file))
}

/// Read a WAVE stream
pub fn read_from<R: Read + Seek>(mut reader: R) -> Result<SampleBuffer> {
    let mut header = [0u8; 12];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => Error::CorruptFile("unable to read RIFF header".to_string()),
        _ => Error::Io(e),
    })?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(Error::CorruptFile("not a WAVE file".to_string()));
    }

    let mut to_go = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
    // the "WAVE" tag counts towards the RIFF length
    to_go = to_go.saturating_sub(4);

    let mut format: Option<WaveFormat> = None;
    let mut samples: Option<Vec<f64>> = None;

    while to_go >= 8 {
        let mut chunk = [0u8; 8];
        if let Err(e) = reader.read_exact(&mut chunk) {
            // tolerate an overstated RIFF length once the samples are in
            if e.kind() == ErrorKind::UnexpectedEof && samples.is_some() {
                log::debug!("RIFF length exceeds file, {} bytes unaccounted", to_go);
                break;
            }
            return Err(incomplete(e));
        }
        to_go -= 8;
        let len = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as u64;
        let pad = len & 1;

        match &chunk[0..4] {
            b"fmt " => {
                if len < FMT_LEN as u64 || to_go < FMT_LEN as u64 {
                    return Err(Error::CorruptFile("truncated format chunk".to_string()));
                }
                let mut body = [0u8; 16];
                reader.read_exact(&mut body).map_err(incomplete)?;
                let parsed = WaveFormat::parse(&body);
                let extra = len - FMT_LEN as u64 + pad;
                if extra > 0 {
                    reader
                        .seek(SeekFrom::Current(extra as i64))
                        .map_err(incomplete)?;
                }
                to_go = to_go.saturating_sub(len + pad);
                format = Some(parsed);
            }
            b"data" => {
                let fmt = format.ok_or_else(|| {
                    Error::CorruptFile("data chunk without preceding format chunk".to_string())
                })?;
                if fmt.format_tag != FORMAT_PCM && fmt.format_tag != FORMAT_EXTENSIBLE {
                    return Err(Error::FormatUnsupported(format!(
                        "format tag {:#06x}, only integer PCM is supported",
                        fmt.format_tag
                    )));
                }
                let depth = BitDepth::from_bits(fmt.bits_per_sample)?;
                let width = depth.bytes() as u64;
                let wanted = len - len % width;

                let mut raw = Vec::new();
                reader.by_ref().take(wanted).read_to_end(&mut raw)?;
                if (raw.len() as u64) < wanted {
                    return Err(Error::CorruptFile("incomplete file".to_string()));
                }

                let mut decoded = Vec::new();
                decoded
                    .try_reserve_exact(raw.len() / width as usize)
                    .map_err(|_| Error::OutOfMemory)?;
                decoded.extend(raw.chunks_exact(width as usize).map(|b| depth.decode(b)));

                let rest = len - wanted + pad;
                if rest > 0 {
                    reader
                        .seek(SeekFrom::Current(rest as i64))
                        .map_err(incomplete)?;
                }
                to_go = to_go.saturating_sub(len + pad);
                samples = Some(decoded);
            }
            _ => {
                if len > to_go {
                    return Err(Error::CorruptFile("incomplete file".to_string()));
                }
                let skip = (len + pad).min(to_go);
                reader
                    .seek(SeekFrom::Current(skip as i64))
                    .map_err(incomplete)?;
                to_go -= skip;
            }
        }
    }

    let fmt = format.ok_or_else(|| Error::CorruptFile("missing format chunk".to_string()))?;
    let mut samples =
        samples.ok_or_else(|| Error::CorruptFile("missing data chunk".to_string()))?;

    let rows = match fmt.channels {
        0 | 1 => 1,
        2 => 2,
        n => {
            return Err(Error::FormatUnsupported(format!(
                "{}-channel layout is not supported, buffers hold 1 or 2 rows",
                n
            )))
        }
    };
    samples.truncate(samples.len() - samples.len() % rows);

    Ok(SampleBuffer::from_f64(samples)
        .with_rows(rows)?
        .with_rate(fmt.sample_rate)
        .with_bits(fmt.bits_per_sample))
}

/// Save a floating point buffer as a WAVE file.
///
/// Stereo iff the buffer has 2 rows; bit depth from the buffer's metadata
/// when it is 8 or 32, otherwise 16; rate from metadata, otherwise 44100.
/// A failed write leaves a partial file behind.
pub fn save<P: AsRef<Path>>(path: P, buffer: &SampleBuffer) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_to(&mut writer, buffer)?;
    writer.flush()?;
    Ok(())
}

/// Write a buffer as a WAVE stream
pub fn write_to<W: Write + ?Sized>(writer: &mut W, buffer: &SampleBuffer) -> Result<()> {
    let samples = buffer.read();
    let data = match &*samples {
        Samples::Float(v) => v,
        Samples::Int(_) => {
            return Err(Error::FormatUnsupported(
                "only floating point buffers can be saved".to_string(),
            ))
        }
    };

    let depth = output_depth(buffer);
    let channels = if buffer.is_stereo() { 2 } else { 1 };
    let format = WaveFormat::pcm(channels, buffer.rate().unwrap_or(DEFAULT_RATE), depth)?;
    let data_len = data
        .len()
        .checked_mul(depth.bytes())
        .and_then(|n| u32::try_from(n).ok())
        .filter(|&n| n <= u32::MAX - HEADER_OVERHEAD)
        .ok_or_else(|| {
            Error::FormatUnsupported("buffer too large for a WAVE file".to_string())
        })?;

    write_header(writer, &format, data_len)?;
    let mut batch = Vec::with_capacity(BATCH_SAMPLES * depth.bytes());
    for chunk in data.chunks(BATCH_SAMPLES) {
        encode_batch(depth, chunk, &mut batch);
        writer.write_all(&batch)?;
    }
    Ok(())
}

/// Bit depth a buffer is written with
pub(crate) fn output_depth(buffer: &SampleBuffer) -> BitDepth {
    match buffer.bits() {
        Some(8) => BitDepth::Eight,
        Some(32) => BitDepth::ThirtyTwo,
        _ => BitDepth::Sixteen,
    }
}

/// Write the RIFF header, "fmt " chunk and "data" chunk header
pub fn write_header<W: Write + ?Sized>(
    writer: &mut W,
    format: &WaveFormat,
    data_len: u32,
) -> Result<()> {
    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&data_len.saturating_add(HEADER_OVERHEAD).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&FMT_LEN.to_le_bytes());
    header.extend_from_slice(&format.to_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_len.to_le_bytes());
    writer.write_all(&header)?;
    Ok(())
}

/// Encode `samples` into `out`, replacing its contents
pub(crate) fn encode_batch(depth: BitDepth, samples: &[f64], out: &mut Vec<u8>) {
    out.clear();
    for &x in samples {
        depth.encode(x, out);
    }
}

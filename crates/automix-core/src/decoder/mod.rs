//! Audio decoding contract
//!
//! The engine consumes decoded audio as interleaved stereo f32 plus a
//! sample rate. Hosts with richer codec needs plug in their own
//! [`AudioDecoder`]; the bundled [`WavDecoder`] covers RIFF/WAVE input
//! (16/24-bit PCM, 32-bit PCM, 32-bit float) so the engine is usable out
//! of the box.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::types::{AudioBuffer, Sample, StereoBuffer, StereoSample};

/// Decodes an audio file into interleaved stereo f32
pub trait AudioDecoder: Send + Sync {
    /// Decode the file at `path`
    ///
    /// The returned buffer satisfies `sample_rate > 0` and holds whole
    /// stereo frames.
    fn decode(&self, path: &str) -> EngineResult<AudioBuffer>;
}

/// RIFF/WAVE format description from the fmt chunk
#[derive(Debug, Clone)]
struct WavFormat {
    /// 1 = integer PCM, 3 = IEEE float
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    block_align: u16,
}

/// WAV file decoder
///
/// Accepts mono (widened to stereo) and stereo files at any sample rate;
/// other channel counts are rejected as unsupported.
#[derive(Debug, Default)]
pub struct WavDecoder;

impl WavDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }

    fn io_err(e: std::io::Error) -> EngineError {
        EngineError::LoadFailed(format!("IO error: {}", e))
    }

    fn read_fmt_chunk(reader: &mut BufReader<File>, size: u32) -> EngineResult<WavFormat> {
        if size < 16 {
            return Err(EngineError::LoadFailed("fmt chunk too small".into()));
        }

        let mut fmt_data = vec![0u8; size as usize];
        reader.read_exact(&mut fmt_data).map_err(Self::io_err)?;

        Ok(WavFormat {
            format_tag: u16::from_le_bytes([fmt_data[0], fmt_data[1]]),
            channels: u16::from_le_bytes([fmt_data[2], fmt_data[3]]),
            sample_rate: u32::from_le_bytes([
                fmt_data[4], fmt_data[5], fmt_data[6], fmt_data[7],
            ]),
            block_align: u16::from_le_bytes([fmt_data[12], fmt_data[13]]),
            bits_per_sample: u16::from_le_bytes([fmt_data[14], fmt_data[15]]),
        })
    }

    /// Convert one frame of raw bytes to a stereo sample
    fn decode_frame(frame: &[u8], format: &WavFormat) -> EngineResult<StereoSample> {
        let bytes_per_sample = (format.bits_per_sample / 8) as usize;

        let sample_at = |ch: usize| -> EngineResult<Sample> {
            let off = ch * bytes_per_sample;
            let b = &frame[off..off + bytes_per_sample];
            match (format.format_tag, format.bits_per_sample) {
                (1, 16) => Ok(i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0),
                (1, 24) => {
                    let mut v = (b[0] as i32) | ((b[1] as i32) << 8) | ((b[2] as i32) << 16);
                    if v & 0x80_0000 != 0 {
                        v |= !0xFF_FFFF; // sign extend
                    }
                    Ok(v as f32 / 8_388_608.0)
                }
                (1, 32) => Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32
                    / 2_147_483_648.0),
                (3, 32) => Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                (tag, bits) => Err(EngineError::LoadFailed(format!(
                    "unsupported sample format: tag {} at {} bits",
                    tag, bits
                ))),
            }
        };

        let left = sample_at(0)?;
        let right = if format.channels >= 2 { sample_at(1)? } else { left };
        Ok(StereoSample::new(left, right))
    }
}

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &str) -> EngineResult<AudioBuffer> {
        if path.is_empty() {
            return Err(EngineError::InvalidArgument("empty path".into()));
        }

        let file = File::open(Path::new(path)).map_err(Self::io_err)?;
        let mut reader = BufReader::new(file);

        // RIFF header
        let mut header = [0u8; 12];
        reader.read_exact(&mut header).map_err(Self::io_err)?;
        if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
            return Err(EngineError::LoadFailed(format!(
                "{}: not a RIFF/WAVE file",
                path
            )));
        }

        // Walk chunks to locate fmt and data
        let mut format: Option<WavFormat> = None;
        let mut data: Option<(u64, u32)> = None; // offset, size

        loop {
            let mut chunk_id = [0u8; 4];
            if reader.read_exact(&mut chunk_id).is_err() {
                break;
            }

            let mut size_bytes = [0u8; 4];
            reader.read_exact(&mut size_bytes).map_err(Self::io_err)?;
            let chunk_size = u32::from_le_bytes(size_bytes);

            match &chunk_id {
                b"fmt " => {
                    format = Some(Self::read_fmt_chunk(&mut reader, chunk_size)?);
                }
                b"data" => {
                    let offset = reader.stream_position().map_err(Self::io_err)?;
                    data = Some((offset, chunk_size));
                    reader
                        .seek(SeekFrom::Current(chunk_size as i64))
                        .map_err(Self::io_err)?;
                }
                _ => {
                    reader
                        .seek(SeekFrom::Current(chunk_size as i64))
                        .map_err(Self::io_err)?;
                }
            }

            // Chunks are word-aligned
            if chunk_size % 2 != 0 {
                reader.seek(SeekFrom::Current(1)).map_err(Self::io_err)?;
            }
        }

        let format = format
            .ok_or_else(|| EngineError::LoadFailed(format!("{}: missing fmt chunk", path)))?;
        let (data_offset, data_size) = data
            .ok_or_else(|| EngineError::LoadFailed(format!("{}: missing data chunk", path)))?;

        if format.channels == 0 || format.channels > 2 {
            return Err(EngineError::LoadFailed(format!(
                "{}: unsupported channel count {}",
                path, format.channels
            )));
        }
        if format.sample_rate == 0 || format.block_align == 0 {
            return Err(EngineError::LoadFailed(format!(
                "{}: corrupt fmt chunk",
                path
            )));
        }

        let frame_count = (data_size / format.block_align as u32) as usize;
        let bytes_per_frame = format.block_align as usize;

        reader
            .seek(SeekFrom::Start(data_offset))
            .map_err(Self::io_err)?;

        let mut samples = StereoBuffer::silence(frame_count);
        let mut frame = vec![0u8; bytes_per_frame];
        for i in 0..frame_count {
            reader.read_exact(&mut frame).map_err(Self::io_err)?;
            samples.as_mut_slice()[i] = Self::decode_frame(&frame, &format)?;
        }

        Ok(AudioBuffer {
            samples,
            sample_rate: format.sample_rate,
        })
    }
}

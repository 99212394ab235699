//! Wire frames for the audio stream.
//!
//! One incoming [`AudioFrame`] per block (audio + MIDI + transport), one
//! outgoing [`AudioReply`] (processed audio + MIDI + latency). Frames travel
//! as bincode payloads behind a `u32` big-endian length prefix over any
//! blocking byte stream; both codec directions report the bytes moved so the
//! worker can feed its meters.

use crate::buffer::AudioBuffer;
use crate::{Result, ServerError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use smallvec::SmallVec;
use std::io::{Read, Write};

const MIDI_STACK_CAPACITY: usize = 256;

/// Reject frames larger than this before allocating for them.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

pub type MidiEventVec = SmallVec<[MidiEvent; MIDI_STACK_CAPACITY]>;

/// Wire-serializable MIDI event (raw bytes, block-relative offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    pub frame_offset: u32,
    pub data: [u8; 3],
    pub len: u8,
}

impl MidiEvent {
    pub fn from_bytes(frame_offset: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            frame_offset,
            data,
            len: len as u8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Processing precision of a block or a plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    Float32,
    Float64,
}

/// Transport state accompanying each block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportInfo {
    pub playing: bool,
    pub recording: bool,
    pub cycle_active: bool,
    pub tempo: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    pub position_samples: i64,
    pub position_quarters: f64,
    pub cycle_start_quarters: f64,
    pub cycle_end_quarters: f64,
}

impl Default for TransportInfo {
    fn default() -> Self {
        Self {
            playing: false,
            recording: false,
            cycle_active: false,
            tempo: 120.0,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
            position_samples: 0,
            position_quarters: 0.0,
            cycle_start_quarters: 0.0,
            cycle_end_quarters: 0.0,
        }
    }
}

/// Audio payload; the variant is the frame's precision tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FramePayload {
    F32(AudioBuffer<f32>),
    F64(AudioBuffer<f64>),
}

impl FramePayload {
    pub fn format(&self) -> SampleFormat {
        match self {
            FramePayload::F32(_) => SampleFormat::Float32,
            FramePayload::F64(_) => SampleFormat::Float64,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            FramePayload::F32(b) => b.channels(),
            FramePayload::F64(b) => b.channels(),
        }
    }

    pub fn samples(&self) -> usize {
        match self {
            FramePayload::F32(b) => b.samples(),
            FramePayload::F64(b) => b.samples(),
        }
    }
}

/// One block from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub payload: FramePayload,
    pub midi: MidiEventVec,
    pub transport: TransportInfo,
}

/// One processed block back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioReply {
    pub payload: FramePayload,
    pub midi: MidiEventVec,
    pub latency_samples: usize,
    pub channels: usize,
}

/// Write a length-prefixed frame. Returns the total bytes written.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<usize> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ServerError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(payload.len() + 4)
}

/// Read a length-prefixed frame. Returns the frame and the total bytes read.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<(T, usize)> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ServerError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let msg = bincode::deserialize(&payload)?;
    Ok((msg, len + 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = AudioBuffer::<f32>::new(2, 4);
        buf.channel_mut(0).copy_from_slice(&[0.1, 0.2, 0.3, 0.4]);
        let mut midi = MidiEventVec::new();
        midi.push(MidiEvent::from_bytes(3, &[0x90, 60, 100]));

        let frame = AudioFrame {
            payload: FramePayload::F32(buf),
            midi,
            transport: TransportInfo::default(),
        };

        let mut wire = Vec::new();
        let written = write_frame(&mut wire, &frame).unwrap();
        assert_eq!(written, wire.len());

        let mut cursor = Cursor::new(wire);
        let (decoded, read): (AudioFrame, usize) = read_frame(&mut cursor).unwrap();
        assert_eq!(read, written);
        assert_eq!(decoded, frame);
        assert_eq!(decoded.payload.format(), SampleFormat::Float32);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&(MAX_FRAME_BYTES as u32 + 1).to_be_bytes());
        let mut cursor = Cursor::new(wire);
        let result: Result<(AudioFrame, usize)> = read_frame(&mut cursor);
        assert!(matches!(result, Err(ServerError::FrameTooLarge(_))));
    }

    #[test]
    fn test_midi_event_truncates_to_three_bytes() {
        let event = MidiEvent::from_bytes(0, &[0xf0, 1, 2, 3, 4]);
        assert_eq!(event.as_bytes(), &[0xf0, 1, 2]);
    }
}

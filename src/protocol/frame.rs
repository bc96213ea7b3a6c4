use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::commands::*;
use super::crc::{checksum, crc16_xmodem_le};

/// Payload size of a parameter write: block id, 3 pad, offset, pad, count, pad, value(2).
const PAYLOAD_LEN: usize = 10;

/// A subwoofer control parameter that can be written over MEMWRITE.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    /// Output level, in dB of attenuation.
    Volume,
    /// Phase delay, in degrees.
    Phase,
}

impl Parameter {
    pub fn all() -> &'static [Parameter] {
        &[Parameter::Volume, Parameter::Phase]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Phase => "phase",
        }
    }

    /// Memory offset of this parameter inside the DSP block.
    pub fn offset(&self) -> u8 {
        match self {
            Self::Volume => OFFSET_VOLUME,
            Self::Phase => OFFSET_PHASE,
        }
    }

    pub fn from_offset(offset: u8) -> Option<Self> {
        match offset {
            OFFSET_VOLUME => Some(Self::Volume),
            OFFSET_PHASE => Some(Self::Phase),
            _ => None,
        }
    }

    /// Range the device accepts. Callers clamp before encoding.
    pub fn range(&self) -> RangeInclusive<f64> {
        match self {
            Self::Volume => -60.0..=0.0,
            Self::Phase => -180.0..=180.0,
        }
    }

    pub fn clamp_value(&self, value: f64) -> f64 {
        let range = self.range();
        value.clamp(*range.start(), *range.end())
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("{parameter} value {value} does not fit a 16-bit word after scaling")]
    ValueOutOfRange { parameter: Parameter, value: f64 },
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("invalid preamble: 0x{0:02X}")]
    BadPreamble(u8),
    #[error("unexpected opcode {0:02X}{1:02X}")]
    BadOpcode(u8, u8),
    #[error("length field {field} does not match frame size {actual}")]
    LengthMismatch { field: usize, actual: usize },
    #[error("CRC mismatch: computed {computed:04X}, frame carries {carried:04X}")]
    ChecksumMismatch { computed: u16, carried: u16 },
    #[error("malformed memory-write payload")]
    BadPayload,
}

/// A complete, checksummed MEMWRITE frame.
///
/// Wire format:
/// ```text
/// [0xAA] [0xF0 0x1F] [length: 2 bytes LE] [payload] [CRC16: 2 bytes LE]
/// ```
///
/// `length` counts the whole frame (payload + 7). The CRC covers every byte before it.
/// Payload of a parameter write:
/// ```text
/// [block_id] [0 0 0] [offset] [0] [byte_count] [0] [value: i16 LE]
/// ```
/// where `value` is the parameter scaled by 10.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Build the MEMWRITE frame that sets `parameter` to `value`.
    ///
    /// The value is scaled by 10 and floored, so negative fractions round
    /// away from zero (-0.05 becomes -1). No clamping happens here.
    pub fn encode(parameter: Parameter, value: f64) -> Result<Self, FrameError> {
        let scaled = (value * 10.0).floor();
        if !scaled.is_finite() || scaled < i16::MIN as f64 || scaled > i16::MAX as f64 {
            return Err(FrameError::ValueOutOfRange { parameter, value });
        }
        let word = (scaled as i16).to_le_bytes();

        let payload: [u8; PAYLOAD_LEN] = [
            PARAM_ID_DSP,
            0,
            0,
            0,
            parameter.offset(),
            0,
            VALUE_BYTE_COUNT,
            0,
            word[0],
            word[1],
        ];
        Ok(Self::memwrite(&payload))
    }

    /// Wrap an arbitrary payload in a MEMWRITE frame.
    fn memwrite(payload: &[u8]) -> Self {
        let length = (payload.len() + FRAME_OVERHEAD) as u16;
        let mut bytes = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
        bytes.push(PREAMBLE);
        bytes.extend_from_slice(&CMD_MEMWRITE);
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes.extend_from_slice(payload);

        let crc = crc16_xmodem_le(&bytes);
        bytes.extend_from_slice(&crc);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Value of the LENGTH field.
    #[cfg(test)]
    pub fn length_field(&self) -> u16 {
        u16::from_le_bytes([self.bytes[3], self.bytes[4]])
    }

    /// Parse a frame with CRC validation.
    pub fn decode(data: &[u8]) -> Result<MemoryWrite, FrameError> {
        if data.len() < FRAME_OVERHEAD {
            return Err(FrameError::TooShort(data.len()));
        }
        if data[0] != PREAMBLE {
            return Err(FrameError::BadPreamble(data[0]));
        }
        if [data[1], data[2]] != CMD_MEMWRITE {
            return Err(FrameError::BadOpcode(data[1], data[2]));
        }

        let field = u16::from_le_bytes([data[3], data[4]]) as usize;
        if field != data.len() {
            return Err(FrameError::LengthMismatch {
                field,
                actual: data.len(),
            });
        }

        let (body, tail) = data.split_at(data.len() - 2);
        let computed = checksum(body);
        let carried = u16::from_le_bytes([tail[0], tail[1]]);
        if computed != carried {
            return Err(FrameError::ChecksumMismatch { computed, carried });
        }

        let payload = &body[5..];
        if payload.len() != PAYLOAD_LEN || payload[6] != VALUE_BYTE_COUNT {
            return Err(FrameError::BadPayload);
        }

        Ok(MemoryWrite {
            block_id: payload[0],
            offset: payload[4],
            raw: i16::from_le_bytes([payload[8], payload[9]]),
        })
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.bytes {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Decoded content of a parameter write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWrite {
    pub block_id: u8,
    pub offset: u8,
    /// Value as sent (parameter × 10).
    pub raw: i16,
}

impl MemoryWrite {
    pub fn parameter(&self) -> Option<Parameter> {
        Parameter::from_offset(self.offset)
    }

    pub fn value(&self) -> f64 {
        self.raw as f64 / 10.0
    }
}

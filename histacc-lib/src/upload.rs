//! Reassembly of the upload byte stream into 16-bit bin values.
//!
//! An upload of `n` bins arrives as `2n + 1` bytes: each bin as a low byte
//! followed by a high byte, then one trailing terminator. The stream carries
//! no other framing, so its length is the only thing that can be checked.
//! The terminator is dropped without looking at it since bin data may
//! legitimately contain `0xFF`.

use crate::bins::{BinAddress, BinCount};
use crate::error::HistError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bytes exactly as received from one START_UPLOAD transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUpload {
    bytes: Bytes,
}

impl RawUpload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode into `bin_count` samples.
    ///
    /// The length must be exactly `1 + 2 * bin_count`; anything else is reported
    /// as [`HistError::MalformedUpload`] rather than truncated or padded.
    pub fn decode(&self, bin_count: BinCount) -> Result<Vec<u16>, HistError> {
        let expected = bin_count.expected_upload_len();
        if self.bytes.len() != expected {
            return Err(HistError::MalformedUpload {
                expected,
                actual: self.bytes.len(),
            });
        }
        decode_samples(&self.bytes[..expected - 1])
    }
}

/// Pair `(low, high)` bytes into samples. The terminator must already be removed.
pub fn decode_samples(payload: &[u8]) -> Result<Vec<u16>, HistError> {
    if payload.len() % 2 != 0 {
        return Err(HistError::OddPayload { len: payload.len() });
    }
    Ok(payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// One decoded upload: `samples[i]` is the count of bin `start + i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    pub start: BinAddress,
    pub samples: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub raw: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub elapsed: Option<Duration>,
}

impl Histogram {
    pub fn new(start: BinAddress, samples: Vec<u16>) -> Self {
        Self {
            start,
            samples,
            raw: None,
            elapsed: None,
        }
    }

    pub fn from_raw(raw: &RawUpload, bin_count: BinCount, start: BinAddress) -> Result<Self, HistError> {
        Ok(Self::new(start, raw.decode(bin_count)?))
    }

    /// Keep a copy of the undecoded bytes alongside the samples.
    pub fn with_raw(mut self, raw: &RawUpload) -> Self {
        self.raw = Some(raw.as_bytes().to_vec());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn bin_count(&self) -> usize {
        self.samples.len()
    }

    pub fn total_counts(&self) -> u64 {
        self.samples.iter().map(|&s| s as u64).sum()
    }

    /// `(bin index, count)` pairs, suitable for plotting against bin index.
    pub fn points(&self) -> impl Iterator<Item = (u32, u16)> + '_ {
        let start = self.start.get() as u32;
        self.samples
            .iter()
            .enumerate()
            .map(move |(i, &count)| (start + i as u32, count))
    }

    /// Bin with the highest count; the lowest such bin wins ties.
    pub fn peak(&self) -> Option<(u32, u16)> {
        self.points().fold(None, |best, p| match best {
            Some((_, c)) if c >= p.1 => best,
            _ => Some(p),
        })
    }
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

const US_PER_SECOND: u64 = 1_000_000;

/// PCM layout of a port: rate, sample width and channel count.
///
/// All byte quantities derived from a format are per channel unless the
/// method name says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MediaFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub num_channels: u16,
}

impl MediaFormat {
    pub const fn new(sample_rate: u32, bits_per_sample: u16, num_channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            num_channels,
        }
    }

    /// 48 kHz, 16-bit, stereo.
    pub const fn pcm_48k_stereo_16() -> Self {
        Self::new(48_000, 16, 2)
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0
            && self.num_channels > 0
            && self.bits_per_sample > 0
            && self.bits_per_sample % 8 == 0
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    pub fn channels(&self) -> usize {
        usize::from(self.num_channels)
    }

    /// Samples per channel covering `us`. Rounds down; negative spans are empty.
    pub fn us_to_samples(&self, us: i64) -> usize {
        if us <= 0 {
            return 0;
        }
        (us as u64 * u64::from(self.sample_rate) / US_PER_SECOND) as usize
    }

    pub fn samples_to_us(&self, samples: usize) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (samples as u64 * US_PER_SECOND / u64::from(self.sample_rate)) as i64
    }

    pub fn bytes_to_samples(&self, bytes: usize) -> usize {
        match self.bytes_per_sample() {
            0 => 0,
            bps => bytes / bps,
        }
    }

    pub fn samples_to_bytes(&self, samples: usize) -> usize {
        samples * self.bytes_per_sample()
    }

    pub fn bytes_to_us(&self, bytes: usize) -> i64 {
        self.samples_to_us(self.bytes_to_samples(bytes))
    }

    pub fn us_to_bytes(&self, us: i64) -> usize {
        self.samples_to_bytes(self.us_to_samples(us))
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz/{}bit/{}ch",
            self.sample_rate, self.bits_per_sample, self.num_channels
        )
    }
}

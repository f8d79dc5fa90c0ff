//! # Telephony Audio Codec
//!
//! Converts between the two audio formats the bridge sits between:
//! - **Telephony leg**: 8kHz, 8-bit G.711 μ-law (one byte per sample)
//! - **Realtime AI leg**: 24kHz, 16-bit signed PCM, little-endian
//!
//! ## Key Functions:
//! - **Companding**: `ulaw_to_linear` / `linear_to_ulaw` work on single samples
//! - **Rate conversion**: `Transcoder` repeats or drops samples by an integer ratio
//! - **Byte packing**: `samples_to_le_bytes` / `le_bytes_to_samples` for the wire format
//!
//! ## Fidelity:
//! Upsampling is sample-and-hold and downsampling is plain decimation. Both alias,
//! which speech recognition and telephone playback tolerate. Every function here is
//! total over its input domain; the only error is building a `Transcoder` from rates
//! that do not divide evenly.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Sample rate of the telephony media stream (Hz).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Sample rate of the realtime AI session (Hz).
pub const REALTIME_SAMPLE_RATE: u32 = 24_000;

/// μ-law bias on the 16-bit scale.
const BIAS: i32 = 0x84;

/// Largest magnitude on the 14-bit scale before the bias is added.
const CLIP: i32 = 8159;

/// Upper bound of each exponent segment on the biased 14-bit scale.
const SEGMENT_END: [i32; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

/// The μ-law code for digital silence (positive zero).
pub const ULAW_SILENCE: u8 = 0xFF;

/// Errors raised when a transcoder is configured with unusable rates.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("sample rates must be non-zero (telephony {telephony}, realtime {realtime})")]
    ZeroRate { telephony: u32, realtime: u32 },

    #[error("realtime rate {realtime} is not a whole multiple of telephony rate {telephony}")]
    UnevenRatio { telephony: u32, realtime: u32 },
}

/// Expand one μ-law byte to a 16-bit linear sample.
///
/// The byte is complemented, split into sign, 3-bit exponent and 4-bit mantissa,
/// and rebuilt as `((mantissa << 3) + bias) << exponent - bias`.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;

    let magnitude = (((mantissa as i32) << 3) + BIAS) << exponent;
    let sample = magnitude - BIAS;

    if sign != 0 {
        -sample as i16
    } else {
        sample as i16
    }
}

/// Compress one 16-bit linear sample to a μ-law byte.
///
/// Works on the 14-bit scale of G.711: the absolute value is shifted down by two,
/// clamped to 8159, biased, and placed in the smallest segment that holds it.
/// The assembled byte is complemented before it goes on the wire.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let magnitude = (sample as i32).abs() >> 2;
    let mask = if sample < 0 { 0x7F } else { 0xFF };

    let biased = magnitude.min(CLIP) + (BIAS >> 2);

    match SEGMENT_END.iter().position(|&end| biased <= end) {
        Some(segment) => {
            let mantissa = (biased >> (segment + 1)) & 0x0F;
            let code = ((segment as i32) << 4) | mantissa;
            (code ^ mask) as u8
        }
        // Past the last segment: saturate at the largest magnitude code
        None => (0x7F ^ mask) as u8,
    }
}

/// Sample-rate aware converter between the two legs of a call.
///
/// ## Rust Concepts:
/// - **Copy**: the struct is two integers, so it's passed around by value
/// - **Result constructor**: invalid rate pairs are rejected once, up front,
///   so the per-frame methods never need to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transcoder {
    realtime_rate: u32,
    ratio: usize,
}

impl Transcoder {
    /// Build a transcoder for the given rates.
    ///
    /// The realtime rate must be a whole multiple of the telephony rate,
    /// e.g. 24000 / 8000 = 3.
    pub fn new(telephony_rate: u32, realtime_rate: u32) -> Result<Self, CodecError> {
        if telephony_rate == 0 || realtime_rate == 0 {
            return Err(CodecError::ZeroRate {
                telephony: telephony_rate,
                realtime: realtime_rate,
            });
        }

        if realtime_rate % telephony_rate != 0 {
            return Err(CodecError::UnevenRatio {
                telephony: telephony_rate,
                realtime: realtime_rate,
            });
        }

        Ok(Self {
            realtime_rate,
            ratio: (realtime_rate / telephony_rate) as usize,
        })
    }

    /// How many realtime samples correspond to one telephony sample.
    pub fn ratio(&self) -> usize {
        self.ratio
    }

    pub fn realtime_rate(&self) -> u32 {
        self.realtime_rate
    }

    /// Decode μ-law bytes and upsample to the realtime rate.
    ///
    /// Each decoded sample is repeated `ratio` times, so N input bytes always
    /// produce exactly `ratio × N` samples.
    pub fn decode_companded_to_linear(&self, frame: &[u8]) -> Vec<i16> {
        let mut samples = Vec::with_capacity(frame.len() * self.ratio);
        for &byte in frame {
            let sample = ulaw_to_linear(byte);
            samples.extend(std::iter::repeat(sample).take(self.ratio));
        }
        samples
    }

    /// Downsample to the telephony rate and encode as μ-law.
    ///
    /// Only the first sample of every group of `ratio` is kept. A trailing
    /// partial group is dropped, so the output is `floor(len / ratio)` bytes.
    pub fn encode_linear_to_companded(&self, samples: &[i16]) -> Vec<u8> {
        samples
            .chunks_exact(self.ratio)
            .map(|group| linear_to_ulaw(group[0]))
            .collect()
    }
}

impl Default for Transcoder {
    fn default() -> Self {
        Self {
            realtime_rate: REALTIME_SAMPLE_RATE,
            ratio: (REALTIME_SAMPLE_RATE / TELEPHONY_SAMPLE_RATE) as usize,
        }
    }
}

/// Pack 16-bit samples as little-endian bytes.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

/// Unpack little-endian bytes into 16-bit samples. A trailing odd byte is ignored.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    let even = bytes.len() & !1;
    let mut samples = vec![0i16; even / 2];
    LittleEndian::read_i16_into(&bytes[..even], &mut samples);
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponent_of(code: u8) -> u32 {
        ((!code >> 4) & 0x07) as u32
    }

    #[test]
    fn test_silence_decodes_to_zero() {
        assert_eq!(ulaw_to_linear(ULAW_SILENCE), 0);
        assert_eq!(linear_to_ulaw(0), ULAW_SILENCE);
    }

    #[test]
    fn test_extremes_saturate() {
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
        assert_eq!(ulaw_to_linear(0x80), 32124);
        assert_eq!(ulaw_to_linear(0x00), -32124);
    }

    #[test]
    fn test_encoding_is_sign_symmetric() {
        for s in 1..=i16::MAX {
            let positive = linear_to_ulaw(s);
            let negative = linear_to_ulaw(-s);
            assert_eq!(positive & 0x7F, negative & 0x7F, "sample ±{}", s);
            assert_eq!(positive & 0x80, 0x80);
            assert_eq!(negative & 0x80, 0x00);
        }

        assert_eq!(linear_to_ulaw(9), 0xFE);
        assert_eq!(linear_to_ulaw(-9), 0x7E);
        assert_eq!(ulaw_to_linear(linear_to_ulaw(-9)), -8);
    }

    #[test]
    fn test_every_code_survives_a_round_trip() {
        for code in 0..=255u8 {
            let decoded = ulaw_to_linear(code);
            let reencoded = linear_to_ulaw(decoded);
            if code == 0x7F {
                // Negative zero collapses onto positive zero
                assert_eq!(reencoded, ULAW_SILENCE);
            } else {
                assert_eq!(reencoded, code, "code {:#04x} decoded to {}", code, decoded);
            }
        }
    }

    #[test]
    fn test_reencoding_is_idempotent_after_first_round() {
        let transcoder = Transcoder::default();
        for code in 0..=255u8 {
            let once = transcoder.encode_linear_to_companded(&transcoder.decode_companded_to_linear(&[code]));
            let twice = transcoder.encode_linear_to_companded(&transcoder.decode_companded_to_linear(&once));
            assert_eq!(once, twice, "code {:#04x}", code);
        }
    }

    #[test]
    fn test_tone_round_trip_stays_within_segment_step() {
        let transcoder = Transcoder::default();
        // 1kHz tone at half scale, 10ms at 24kHz
        let tone: Vec<i16> = (0..240)
            .map(|n| {
                let t = n as f64 / REALTIME_SAMPLE_RATE as f64;
                (16_000.0 * (2.0 * std::f64::consts::PI * 1_000.0 * t).sin()) as i16
            })
            .collect();

        let encoded = transcoder.encode_linear_to_companded(&tone);
        let decoded = transcoder.decode_companded_to_linear(&encoded);
        assert_eq!(encoded.len(), 80);
        assert_eq!(decoded.len(), 240);

        for (i, &code) in encoded.iter().enumerate() {
            let original = tone[i * 3] as i32;
            let restored = decoded[i * 3] as i32;
            // Half a step on the 14-bit scale, plus the bits lost to the shift
            let bound = (4i32 << exponent_of(code)) + 3;
            assert!(
                (original - restored).abs() <= bound,
                "sample {}: {} vs {} (bound {})",
                i,
                original,
                restored,
                bound
            );
        }
    }

    #[test]
    fn test_decode_upsamples_by_repetition() {
        let transcoder = Transcoder::default();
        let frame = [0x00, 0x7F, 0x80, 0xFF, 0x35];
        let samples = transcoder.decode_companded_to_linear(&frame);

        assert_eq!(samples.len(), frame.len() * 3);
        for (group, &byte) in samples.chunks(3).zip(frame.iter()) {
            let expected = ulaw_to_linear(byte);
            assert!(group.iter().all(|&s| s == expected));
        }
    }

    #[test]
    fn test_encode_decimates_without_averaging() {
        let transcoder = Transcoder::default();
        let kept = [1000i16, -2000, 30000, 0];
        let mut samples = Vec::new();
        for &value in &kept {
            // Positions 1 and 2 of each group carry values that must be ignored
            samples.extend_from_slice(&[value, i16::MAX, i16::MIN]);
        }

        let encoded = transcoder.encode_linear_to_companded(&samples);
        let expected: Vec<u8> = kept.iter().map(|&s| linear_to_ulaw(s)).collect();
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_encode_drops_partial_group() {
        let transcoder = Transcoder::default();
        assert_eq!(transcoder.encode_linear_to_companded(&[0; 7]).len(), 2);
        assert!(transcoder.encode_linear_to_companded(&[5, 5]).is_empty());
    }

    #[test]
    fn test_ratio_follows_configured_rates() {
        let wideband = Transcoder::new(8_000, 16_000).unwrap();
        assert_eq!(wideband.ratio(), 2);
        assert_eq!(wideband.decode_companded_to_linear(&[0xFF; 10]).len(), 20);

        assert_eq!(
            Transcoder::new(8_000, 22_050),
            Err(CodecError::UnevenRatio { telephony: 8_000, realtime: 22_050 })
        );
        assert!(Transcoder::new(0, 24_000).is_err());
    }

    #[test]
    fn test_le_packing() {
        let samples = [0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = samples_to_le_bytes(&samples);
        assert_eq!(&bytes[..6], &[0x00, 0x00, 0x01, 0x00, 0xFF, 0xFF]);
        assert_eq!(le_bytes_to_samples(&bytes), samples);

        // Odd trailing byte is ignored
        assert_eq!(le_bytes_to_samples(&[0x01, 0x00, 0x7F]), vec![1]);
    }
}

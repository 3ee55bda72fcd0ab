//! Audio codec bridge
//!
//! Conversion between 8kHz G.711 mu-law (the telephony wire format) and
//! 16-bit little-endian linear PCM, plus linear-interpolation resampling.
//! Everything here is a pure function over byte buffers.

use serde::{Deserialize, Serialize};

/// Bias added before companding
const BIAS: i32 = 0x84;

/// Largest magnitude representable before companding
const CLIP: i32 = 32635;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    #[default]
    Hz8000,
    /// 16kHz - Standard speech recognition
    Hz16000,
    /// 22.05kHz - TTS output
    Hz22050,
    /// 24kHz - TTS output
    Hz24000,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - Professional audio
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    pub fn from_u32(hz: u32) -> Option<Self> {
        match hz {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            22050 => Some(SampleRate::Hz22050),
            24000 => Some(SampleRate::Hz24000),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    /// Get frame size for 20ms chunk
    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }
}

/// Audio encodings that cross the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// G.711 mu-law, one byte per sample
    #[default]
    Mulaw,
    /// 16-bit signed PCM (little-endian)
    Linear16,
}

impl AudioEncoding {
    /// Name used in upstream query strings
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Mulaw => "mulaw",
            AudioEncoding::Linear16 => "linear16",
        }
    }
}

/// Encoding plus sample rate, e.g. `ulaw_8000` or `pcm_16000`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: SampleRate,
}

impl AudioFormat {
    /// The format Twilio media streams carry in both directions
    pub const TELEPHONY: AudioFormat = AudioFormat {
        encoding: AudioEncoding::Mulaw,
        sample_rate: SampleRate::Hz8000,
    };

    /// Parse a vendor output format name (`ulaw_8000`, `pcm_16000`, ...)
    pub fn parse(name: &str) -> Option<Self> {
        let (kind, rate) = name.split_once('_')?;
        let sample_rate = SampleRate::from_u32(rate.parse().ok()?)?;
        let encoding = match kind {
            "ulaw" | "mulaw" => AudioEncoding::Mulaw,
            "pcm" | "linear16" => AudioEncoding::Linear16,
            _ => return None,
        };
        Some(Self {
            encoding,
            sample_rate,
        })
    }

    pub fn is_telephony(&self) -> bool {
        *self == Self::TELEPHONY
    }

    /// Convert a chunk in this format into 8kHz mu-law
    pub fn to_telephony(&self, bytes: &[u8]) -> Vec<u8> {
        match self.encoding {
            AudioEncoding::Mulaw if self.sample_rate == SampleRate::Hz8000 => bytes.to_vec(),
            AudioEncoding::Mulaw => {
                let pcm = decode(bytes);
                encode(&resample(&pcm, self.sample_rate.as_u32(), 8000))
            }
            AudioEncoding::Linear16 => {
                encode(&resample(bytes, self.sample_rate.as_u32(), 8000))
            }
        }
    }
}

const fn decode_sample(byte: u8) -> i16 {
    let b = !byte;
    let sign = b & 0x80;
    let exponent = ((b >> 4) & 0x07) as i32;
    let mantissa = (b & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

const fn build_decode_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = decode_sample(i as u8);
        i += 1;
    }
    table
}

static DECODE_TABLE: [i16; 256] = build_decode_table();

/// Expand one mu-law byte to a linear sample
#[inline]
pub fn mulaw_to_linear(byte: u8) -> i16 {
    DECODE_TABLE[byte as usize]
}

/// Compress one linear sample to mu-law, clipping to the companding range
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    magnitude = magnitude.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decode mu-law bytes into 16-bit little-endian PCM bytes
pub fn decode(mulaw: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(mulaw.len() * 2);
    for &byte in mulaw {
        pcm.extend_from_slice(&mulaw_to_linear(byte).to_le_bytes());
    }
    pcm
}

/// Encode 16-bit little-endian PCM bytes as mu-law. A trailing odd byte is dropped.
pub fn encode(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|pair| linear_to_mulaw(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Resample 16-bit PCM by linear interpolation between neighbouring samples.
///
/// Not band-limited; good enough for speech. Equal rates return the input as-is.
pub fn resample(pcm: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return pcm.to_vec();
    }

    let samples = pcm_samples(pcm);
    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len * 2);
    for i in 0..out_len {
        let position = i as f64 * ratio;
        let index = position as usize;
        let value = if index >= last {
            samples[last] as f64
        } else {
            let frac = position - index as f64;
            let a = samples[index] as f64;
            let b = samples[index + 1] as f64;
            a + (b - a) * frac
        };
        let clamped = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

/// View PCM bytes as samples, dropping a trailing odd byte
pub fn pcm_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Pack samples back into little-endian bytes
pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Silence in mu-law for the given duration at 8kHz
pub fn mulaw_silence(ms: u32) -> Vec<u8> {
    vec![linear_to_mulaw(0); (8 * ms) as usize]
}

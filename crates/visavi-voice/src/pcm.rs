//! PCM16 encoding and the self-describing WAV container for the wire.
//!
//! This is the only place sample-rate information is threaded through;
//! transport and orchestration are otherwise rate-agnostic.

/// One encoded frame: little-endian signed 16-bit PCM plus the rate it was
/// captured at.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
}

/// Encode one frame of f32 samples to little-endian signed 16-bit PCM.
///
/// Samples are clamped to [-1, 1] and scaled asymmetrically (negatives by
/// 32768, non-negatives by 32767) so both -1.0 and 1.0 map onto the exact
/// i16 limits.
pub fn encode(frame: &[f32], sample_rate: u32) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        let s = sample.clamp(-1.0, 1.0);
        let v = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    EncodedChunk { bytes, sample_rate }
}

/// Concatenate chunks in order into one PCM byte sequence.
pub fn concat(chunks: &[EncodedChunk]) -> Vec<u8> {
    let total: usize = chunks.iter().map(|c| c.bytes.len()).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(&chunk.bytes);
    }
    out
}

/// Wrap raw PCM16 bytes in a minimal RIFF/WAVE header (PCM format tag, mono,
/// sample rate, byte rate, block alignment, payload length) so any standard
/// player can decode the clip without external metadata.
pub fn to_wire_audio_format(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate = sample_rate * 2; // mono, 2 bytes per sample
    let mut buf = Vec::with_capacity(44 + pcm.len());
    // RIFF chunk descriptor
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    buf.extend_from_slice(pcm);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_i16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn extremes_hit_exact_i16_limits() {
        let chunk = encode(&[1.0, -1.0, 0.0], 16_000);
        assert_eq!(decode_i16(&chunk.bytes), vec![32767, -32768, 0]);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let chunk = encode(&[2.5, -7.0], 16_000);
        assert_eq!(decode_i16(&chunk.bytes), vec![32767, -32768]);
    }

    #[test]
    fn every_encoded_value_is_in_i16_range() {
        let samples: Vec<f32> = (-100..=100).map(|i| i as f32 / 100.0).collect();
        let chunk = encode(&samples, 16_000);
        for v in decode_i16(&chunk.bytes) {
            assert!((-32768..=32767).contains(&(v as i32)));
        }
    }

    #[test]
    fn asymmetric_scaling() {
        let chunk = encode(&[0.5, -0.5], 16_000);
        assert_eq!(decode_i16(&chunk.bytes), vec![16383, -16384]);
    }

    #[test]
    fn concat_preserves_chunk_order() {
        let a = encode(&[1.0], 16_000);
        let b = encode(&[-1.0], 16_000);
        let joined = concat(&[a, b]);
        assert_eq!(decode_i16(&joined), vec![32767, -32768]);
    }

    #[test]
    fn wav_header_fields() {
        let pcm = vec![0u8; 960];
        let wav = to_wire_audio_format(&pcm, 16_000);
        assert_eq!(wav.len(), 44 + 960);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // format tag = PCM, channels = 1
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        // sample rate and byte rate
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16_000);
        assert_eq!(u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]), 32_000);
        // block align, bits per sample
        assert_eq!(u16::from_le_bytes([wav[32], wav[33]]), 2);
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);
        // data length
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 960);
    }
}

//! Mix math and reusable buffers.
//!
//! One tick produces at most [`MIX_FRAMES`] frames. Voice contributions are
//! S16 samples summed into an i32 accumulator so simultaneous near-peak
//! voices cannot wrap; master volume is applied as a float multiply during
//! the final saturate down to i16.

/// Upper bound on frames produced per mixer tick.
pub const MIX_FRAMES: usize = 1024;

/// Scratch buffers reused across ticks.
///
/// Resized up to `MIX_FRAMES * channels` on demand and never shrunk.
#[derive(Default)]
pub(crate) struct MixBuffers {
    /// i32 accumulator, one slot per sample.
    pub accum: Vec<i32>,
    /// One voice's S16 contribution, as bytes.
    pub temp: Vec<u8>,
    /// Post-volume saturated S16 output, as bytes.
    pub output: Vec<u8>,
}

impl MixBuffers {
    /// Zero the accumulator and size the scratch buffers for `sample_count`
    /// S16 samples.
    pub fn prepare(&mut self, sample_count: usize) {
        self.accum.clear();
        self.accum.resize(sample_count, 0);
        if self.temp.len() < sample_count * 2 {
            self.temp.resize(sample_count * 2, 0);
        }
    }

    pub fn release(&mut self) {
        self.accum = Vec::new();
        self.temp = Vec::new();
        self.output = Vec::new();
    }
}

/// Sum `bytes.len() / 2` S16 samples into the accumulator.
pub(crate) fn accumulate_s16(accum: &mut [i32], bytes: &[u8]) {
    for (slot, pair) in accum.iter_mut().zip(bytes.chunks_exact(2)) {
        *slot += i32::from(i16::from_le_bytes([pair[0], pair[1]]));
    }
}

/// Apply master volume and saturate the accumulator into S16 output bytes.
///
/// Each sample becomes `round(s * volume)` clamped to `[-32768, 32767]`.
pub(crate) fn apply_volume_and_saturate(accum: &[i32], volume: f32, out: &mut Vec<u8>) {
    out.clear();
    for &s in accum {
        let scaled = (s as f32 * volume).round();
        let v = scaled.clamp(-32_768.0, 32_767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn accumulate_sums_multiple_voices() {
        let mut accum = vec![0i32; 2];
        let a: Vec<u8> = [1_000i16, -2_000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let b: Vec<u8> = [500i16, 500].iter().flat_map(|s| s.to_le_bytes()).collect();

        accumulate_s16(&mut accum, &a);
        accumulate_s16(&mut accum, &b);
        assert_eq!(accum, vec![1_500, -1_500]);
    }

    #[test]
    fn accumulate_ignores_a_trailing_odd_byte() {
        let mut accum = vec![0i32; 2];
        accumulate_s16(&mut accum, &[0x10, 0x00, 0xff]);
        assert_eq!(accum, vec![0x10, 0]);
    }

    #[test]
    fn saturate_clamps_summed_peaks() {
        let accum = vec![40_000, -40_000, 20_000];
        let mut out = Vec::new();
        apply_volume_and_saturate(&accum, 1.0, &mut out);
        assert_eq!(to_samples(&out), vec![32_767, -32_768, 20_000]);
    }

    #[test]
    fn half_volume_rounds_to_nearest() {
        let accum = vec![32_767, -32_767, 101];
        let mut out = Vec::new();
        apply_volume_and_saturate(&accum, 0.5, &mut out);
        // round(16383.5) -> 16384 away from zero, round(50.5) -> 51
        assert_eq!(to_samples(&out), vec![16_384, -16_384, 51]);
    }

    #[test]
    fn prepare_never_shrinks_the_temp_buffer() {
        let mut buffers = MixBuffers::default();
        buffers.prepare(2_048);
        let big = buffers.temp.len();
        buffers.prepare(64);
        assert_eq!(buffers.temp.len(), big);
    }
}

//! Nearest-sample rate reduction.
//!
//! Output sample `i` is source sample `floor(i * from / to)`. There is no
//! low-pass stage, so content above the target Nyquist frequency aliases.
//! That is accepted in exchange for zero added latency.

/// Number of output samples produced for `len` input samples.
pub fn downsampled_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    (len as u64 * to_rate as u64 / from_rate as u64) as usize
}

/// Point-sample `samples` from `from_rate` down to `to_rate`.
pub fn downsample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let out_len = downsampled_len(samples.len(), from_rate, to_rate);
    (0..out_len)
        .map(|i| {
            let src = (i as u64 * from_rate as u64 / to_rate as u64) as usize;
            samples[src]
        })
        .collect()
}

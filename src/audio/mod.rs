pub mod decode;
pub mod resample;

pub use decode::{DecodeError, DecodedAudio};

use std::path::Path;

/// Decode a file to mono f32 samples at `target_rate`.
///
/// Multi-channel audio is averaged down to mono, then resampled when the
/// file's native rate differs from `target_rate`.
pub fn load_mono(path: &Path, target_rate: u32) -> Result<DecodedAudio, DecodeError> {
    let decoded = decode::decode_mono(path)?;
    if decoded.sample_rate == target_rate {
        return Ok(decoded);
    }

    log::debug!(
        "Resampling {} from {} Hz to {} Hz",
        path.display(),
        decoded.sample_rate,
        target_rate
    );
    let samples = resample::resample(&decoded.samples, decoded.sample_rate, target_rate)?;
    Ok(DecodedAudio {
        duration_secs: samples.len() as f64 / target_rate as f64,
        samples,
        sample_rate: target_rate,
        channels: decoded.channels,
    })
}

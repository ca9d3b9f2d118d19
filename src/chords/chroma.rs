//! CENS chroma (Chroma Energy Normalized Statistics).
//!
//! STFT power is folded into 12 pitch classes, then each frame is
//! L1-normalized, quantized, smoothed over time and L2-normalized. The
//! quantization + smoothing makes the result robust to dynamics and timbre,
//! which is what the template matcher wants.

use realfft::RealFftPlanner;

/// Analysis sample rate the recognizer expects.
pub const ANALYSIS_RATE: u32 = 22050;

/// Hop between analysis frames in samples.
pub const HOP_LENGTH: usize = 512;

/// FFT window size. 4096 at 22050 Hz gives ~5.4 Hz bins, which separate
/// semitones from about C2 up. The C1 octave is still folded in, where
/// neighbouring semitones can share a bin.
pub const N_FFT: usize = 4096;

/// Lowest/highest frequency folded into chroma (C1 .. C8).
const MIN_FREQ: f64 = 32.70;
const MAX_FREQ: f64 = 4186.0;

/// Quantization thresholds on L1-normalized chroma, each worth 0.25.
const QUANT_STEPS: [f64; 4] = [0.4, 0.2, 0.1, 0.05];

/// Temporal smoothing window length in frames.
const SMOOTH_LEN: usize = 41;

/// Compute CENS chroma frames for a mono signal at [`ANALYSIS_RATE`].
///
/// Frames are centered: frame `i` covers the signal around sample
/// `i * HOP_LENGTH`. Returns an empty vec for an empty signal.
pub fn chroma_cens(samples: &[f32], sample_rate: u32) -> Vec<[f64; 12]> {
    if samples.is_empty() {
        return Vec::new();
    }

    let raw = chroma_stft(samples, sample_rate);
    let quantized: Vec<[f64; 12]> = raw.iter().map(quantize).collect();
    let mut smoothed = smooth(&quantized, SMOOTH_LEN);

    for frame in &mut smoothed {
        l2_normalize(frame);
    }
    smoothed
}

/// Raw pitch-class energy per frame from a centered, Hann-windowed STFT.
fn chroma_stft(samples: &[f32], sample_rate: u32) -> Vec<[f64; 12]> {
    let pad = N_FFT / 2;
    let mut padded = vec![0.0_f32; samples.len() + 2 * pad];
    padded[pad..pad + samples.len()].copy_from_slice(samples);

    let n_frames = 1 + samples.len() / HOP_LENGTH;
    let window = hann(N_FFT);
    let bin_classes = bin_pitch_classes(sample_rate);

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(N_FFT);
    let mut input = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();
    let mut scratch = fft.make_scratch_vec();

    let mut frames = Vec::with_capacity(n_frames);
    for i in 0..n_frames {
        let start = i * HOP_LENGTH;
        let segment = &padded[start..start + N_FFT];
        for ((dst, &s), &w) in input.iter_mut().zip(segment).zip(&window) {
            *dst = s * w;
        }

        let mut chroma = [0.0_f64; 12];
        // Length is fixed by the plan, so processing cannot fail on size.
        if fft
            .process_with_scratch(&mut input, &mut spectrum, &mut scratch)
            .is_ok()
        {
            for (bin, class) in bin_classes.iter().enumerate() {
                if let Some(pc) = class {
                    chroma[*pc] += spectrum[bin].norm_sqr() as f64;
                }
            }
        }
        frames.push(chroma);
    }

    frames
}

/// Map each FFT bin to a pitch class, or `None` outside the analysed range.
fn bin_pitch_classes(sample_rate: u32) -> Vec<Option<usize>> {
    (0..=N_FFT / 2)
        .map(|bin| {
            let freq = bin as f64 * sample_rate as f64 / N_FFT as f64;
            if !(MIN_FREQ..=MAX_FREQ).contains(&freq) {
                return None;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            Some((midi.round() as i64).rem_euclid(12) as usize)
        })
        .collect()
}

/// L1-normalize then quantize a frame onto {0, 0.25, 0.5, 0.75, 1}.
fn quantize(frame: &[f64; 12]) -> [f64; 12] {
    let sum: f64 = frame.iter().map(|v| v.abs()).sum();
    let mut out = [0.0_f64; 12];
    if sum <= 0.0 {
        return out;
    }
    for (o, &v) in out.iter_mut().zip(frame) {
        let x = v / sum;
        *o = QUANT_STEPS.iter().filter(|&&t| x > t).count() as f64 * 0.25;
    }
    out
}

/// Convolve each pitch-class row with a normalized Hann window ("same" mode).
fn smooth(frames: &[[f64; 12]], len: usize) -> Vec<[f64; 12]> {
    // Symmetric window of len + 2 points, the zero endpoints dropped.
    let full = symmetric_hann(len + 2);
    let kernel: Vec<f64> = full[1..=len].to_vec();
    let total: f64 = kernel.iter().sum();
    let half = len / 2;

    let n = frames.len();
    let mut out = vec![[0.0_f64; 12]; n];
    for (t, slot) in out.iter_mut().enumerate() {
        for (k, w) in kernel.iter().enumerate() {
            let src = t as isize + k as isize - half as isize;
            if src < 0 || src >= n as isize {
                continue;
            }
            let frame = &frames[src as usize];
            for pc in 0..12 {
                slot[pc] += frame[pc] * w / total;
            }
        }
    }
    out
}

/// Normalize in place to unit L2 norm; an all-zero frame is left as is.
pub fn l2_normalize(frame: &mut [f64; 12]) {
    let norm = frame.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in frame.iter_mut() {
            *v /= norm;
        }
    }
}

/// Periodic Hann window (STFT analysis).
fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| {
            let x = std::f32::consts::PI * 2.0 * n as f32 / len as f32;
            0.5 - 0.5 * x.cos()
        })
        .collect()
}

/// Symmetric Hann window (smoothing kernel).
fn symmetric_hann(len: usize) -> Vec<f64> {
    if len < 2 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|n| {
            let x = std::f64::consts::PI * 2.0 * n as f64 / (len - 1) as f64;
            0.5 - 0.5 * x.cos()
        })
        .collect()
}

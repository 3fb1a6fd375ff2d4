//! Signal processing for remote photoplethysmography.
//!
//! Pipeline: per-frame mean RGB over a centred region of interest →
//! plane-orthogonal-to-skin (POS) projection with overlap-add →
//! mean removal + Hann taper → power spectrum → peak inside the heart-rate band.

use std::f64::consts::PI;

use pulse_core::Frame;
use rustfft::{FftPlanner, num_complex::Complex};

/// POS sliding window length, in seconds.
pub const POS_WINDOW_SECS: f64 = 1.6;

/// Minimum FFT length; shorter traces are zero-padded up to this.
pub const MIN_FFT_LEN: usize = 2048;

/// Mean RGB of the centred `roi_fraction` of a frame.
///
/// A fraction of 0.5 averages the middle half in each dimension, which is
/// where a framed face sits.
pub fn mean_rgb(frame: &Frame, roi_fraction: f64) -> [f64; 3] {
    let (w, h) = (frame.width(), frame.height());
    if w == 0 || h == 0 {
        return [0.0; 3];
    }
    let fraction = roi_fraction.clamp(0.0, 1.0);
    let roi_w = ((f64::from(w) * fraction).round() as u32).clamp(1, w);
    let roi_h = ((f64::from(h) * fraction).round() as u32).clamp(1, h);
    let x0 = (w - roi_w) / 2;
    let y0 = (h - roi_h) / 2;

    let mut sum = [0u64; 3];
    let stride = w as usize * Frame::CHANNELS;
    let data = frame.data();
    for y in y0..y0 + roi_h {
        let row = y as usize * stride;
        let start = row + x0 as usize * Frame::CHANNELS;
        let end = start + roi_w as usize * Frame::CHANNELS;
        for px in data[start..end].chunks_exact(Frame::CHANNELS) {
            sum[0] += u64::from(px[0]);
            sum[1] += u64::from(px[1]);
            sum[2] += u64::from(px[2]);
        }
    }
    let n = f64::from(roi_w) * f64::from(roi_h);
    [sum[0] as f64 / n, sum[1] as f64 / n, sum[2] as f64 / n]
}

/// Project an RGB trace onto the pulse plane.
///
/// Each window of `window_len` samples is temporally normalized, projected
/// onto `[0, 1, -1]` and `[-2, 1, 1]`, combined with an adaptive ratio of their
/// standard deviations, and overlap-added into the output.
pub fn pos_projection(rgb: &[[f64; 3]], window_len: usize) -> Vec<f64> {
    let n = rgb.len();
    let mut pulse = vec![0.0; n];
    if n == 0 {
        return pulse;
    }
    let window_len = window_len.clamp(1, n);

    for start in 0..=n - window_len {
        let window = &rgb[start..start + window_len];
        let mut mean = [0.0; 3];
        for sample in window {
            for c in 0..3 {
                mean[c] += sample[c];
            }
        }
        for m in &mut mean {
            *m /= window_len as f64;
        }
        if mean.iter().any(|m| *m <= f64::EPSILON) {
            continue;
        }

        let mut s1 = Vec::with_capacity(window_len);
        let mut s2 = Vec::with_capacity(window_len);
        for sample in window {
            let r = sample[0] / mean[0];
            let g = sample[1] / mean[1];
            let b = sample[2] / mean[2];
            s1.push(g - b);
            s2.push(-2.0 * r + g + b);
        }

        let sd2 = std_dev(&s2);
        let alpha = if sd2 > f64::EPSILON { std_dev(&s1) / sd2 } else { 0.0 };
        let h: Vec<f64> = s1.iter().zip(&s2).map(|(a, b)| a + alpha * b).collect();
        let h_mean = mean_of(&h);
        for (i, v) in h.iter().enumerate() {
            pulse[start + i] += v - h_mean;
        }
    }
    pulse
}

/// Periodic Hann window.
pub fn hann_window(size: usize) -> Vec<f64> {
    let factor = 2.0 * PI / size as f64;
    (0..size)
        .map(|i| 0.5 - 0.5 * (i as f64 * factor).cos())
        .collect()
}

/// Dominant frequency of a trace inside a band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralPeak {
    /// Peak frequency in Hz.
    pub frequency: f64,
    /// Share of in-band power concentrated in the peak's main lobe, `[0, 1]`.
    pub quality: f64,
}

/// Locate the strongest spectral peak of `signal` within `[low_hz, high_hz]`.
///
/// Returns `None` when the trace is flat or the band holds no power.
pub fn dominant_frequency(
    signal: &[f64],
    sample_rate: f64,
    low_hz: f64,
    high_hz: f64,
) -> Option<SpectralPeak> {
    let n = signal.len();
    if n < 2 || sample_rate <= 0.0 {
        return None;
    }

    let mean = mean_of(signal);
    if signal.iter().all(|v| (v - mean).abs() < 1e-12) {
        return None;
    }

    let fft_len = n.next_power_of_two().max(MIN_FFT_LEN);
    let window = hann_window(n);
    let mut buf: Vec<Complex<f64>> = signal
        .iter()
        .zip(&window)
        .map(|(v, w)| Complex::new((v - mean) * w, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(fft_len)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(fft_len).process(&mut buf);

    let resolution = sample_rate / fft_len as f64;
    let lo = ((low_hz / resolution).ceil() as usize).max(1);
    let hi = ((high_hz / resolution).floor() as usize).min(fft_len / 2);
    if lo > hi {
        return None;
    }

    let power: Vec<f64> = buf[..=fft_len / 2].iter().map(|c| c.norm_sqr()).collect();
    let band = &power[lo..=hi];
    let total: f64 = band.iter().sum();
    if total <= f64::EPSILON {
        return None;
    }

    let (offset, _) = band
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |best, (i, p)| if *p > best.1 { (i, *p) } else { best });
    let peak = lo + offset;

    // Hann main lobe spans two unpadded-resolution bins either side
    let half_lobe = (2 * fft_len).div_ceil(n);
    let lobe_lo = peak.saturating_sub(half_lobe).max(lo);
    let lobe_hi = (peak + half_lobe).min(hi);
    let lobe: f64 = power[lobe_lo..=lobe_hi].iter().sum();

    Some(SpectralPeak {
        frequency: refine_peak(&power, peak) * resolution,
        quality: (lobe / total).clamp(0.0, 1.0),
    })
}

/// Parabolic interpolation of the peak position, in fractional bins.
fn refine_peak(power: &[f64], peak: usize) -> f64 {
    if peak == 0 || peak + 1 >= power.len() {
        return peak as f64;
    }
    let (a, b, c) = (power[peak - 1], power[peak], power[peak + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        return peak as f64;
    }
    peak as f64 + (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    let mean = mean_of(values);
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len().max(1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / rate).sin())
            .collect()
    }

    #[test]
    fn mean_rgb_uses_centre() {
        // 4x4 frame: border red, centre 2x2 blue
        let mut data = Vec::new();
        for y in 0..4 {
            for x in 0..4 {
                if (1..3).contains(&x) && (1..3).contains(&y) {
                    data.extend_from_slice(&[0, 0, 200]);
                } else {
                    data.extend_from_slice(&[200, 0, 0]);
                }
            }
        }
        let frame = Frame::new(data, 4, 4);
        assert_eq!(mean_rgb(&frame, 0.5), [0.0, 0.0, 200.0]);
        let full = mean_rgb(&frame, 1.0);
        assert!((full[0] - 150.0).abs() < 1e-9);
        assert!((full[2] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn mean_rgb_tiny_roi_still_samples_one_pixel() {
        let frame = Frame::solid(3, 3, [9, 8, 7]);
        assert_eq!(mean_rgb(&frame, 0.0), [9.0, 8.0, 7.0]);
    }

    #[test]
    fn hann_window_endpoints() {
        let w = hann_window(8);
        assert!(w[0].abs() < 1e-12);
        assert!((w[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn finds_pure_tone() {
        let signal = sine(1.2, 30.0, 300);
        let peak = dominant_frequency(&signal, 30.0, 0.7, 3.5).unwrap();
        assert!((peak.frequency - 1.2).abs() < 0.02, "got {}", peak.frequency);
        assert!(peak.quality > 0.9, "quality {}", peak.quality);
    }

    #[test]
    fn ignores_out_of_band_energy() {
        let slow = sine(0.2, 30.0, 300);
        let pulse = sine(1.5, 30.0, 300);
        let signal: Vec<f64> = slow
            .iter()
            .zip(&pulse)
            .map(|(s, p)| 5.0 * s + 0.5 * p)
            .collect();
        let peak = dominant_frequency(&signal, 30.0, 0.7, 3.5).unwrap();
        assert!((peak.frequency - 1.5).abs() < 0.03, "got {}", peak.frequency);
    }

    #[test]
    fn flat_signal_has_no_peak() {
        assert!(dominant_frequency(&[3.0; 300], 30.0, 0.7, 3.5).is_none());
        assert!(dominant_frequency(&[], 30.0, 0.7, 3.5).is_none());
    }

    #[test]
    fn pos_recovers_modulation() {
        let n = 300;
        let rgb: Vec<[f64; 3]> = (0..n)
            .map(|i| {
                let s = (2.0 * PI * 1.0 * i as f64 / 30.0).sin();
                [150.0 + 1.0 * s, 100.0 + 3.0 * s, 80.0 + 0.5 * s]
            })
            .collect();
        let pulse = pos_projection(&rgb, 48);
        assert_eq!(pulse.len(), n);
        let peak = dominant_frequency(&pulse, 30.0, 0.7, 3.5).unwrap();
        assert!((peak.frequency - 1.0).abs() < 0.03, "got {}", peak.frequency);
    }

    #[test]
    fn pos_of_constant_trace_is_zero() {
        let pulse = pos_projection(&[[100.0, 100.0, 100.0]; 60], 48);
        assert!(pulse.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn pos_window_longer_than_trace() {
        let rgb: Vec<[f64; 3]> = (0..10).map(|i| [100.0, 100.0 + f64::from(i), 90.0]).collect();
        let pulse = pos_projection(&rgb, 48);
        assert_eq!(pulse.len(), 10);
    }
}

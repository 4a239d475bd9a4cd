use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

/// One-sided magnitude spectrum of a sample window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrum {
    /// Bin spacing in Hz.
    pub resolution_hz: f64,
    /// `[frequency_hz, magnitude]` pairs from DC up to Nyquist.
    pub points: Vec<[f64; 2]>,
}

impl Spectrum {
    /// Frequency of the strongest non-DC bin.
    pub fn dominant_frequency(&self) -> Option<f64> {
        self.points
            .iter()
            .skip(1)
            .max_by(|a, b| a[1].total_cmp(&b[1]))
            .map(|p| p[0])
    }
}

pub fn magnitude_spectrum(data: &[f64], fs: f64) -> Option<Spectrum> {
    let n = data.len();
    if n == 0 || fs <= 0.0 {
        return None;
    }
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer = data.to_vec();
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut buffer, &mut spectrum).ok()?;
    let resolution_hz = fs / n as f64;
    let points = spectrum
        .iter()
        .enumerate()
        .map(|(k, c)| [k as f64 * resolution_hz, c.norm()])
        .collect();
    Some(Spectrum {
        resolution_hz,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn finds_tone_frequency() {
        let fs = 256.0;
        let data: Vec<f64> = (0..2560)
            .map(|i| (2.0 * PI * 12.0 * i as f64 / fs).sin())
            .collect();
        let spectrum = magnitude_spectrum(&data, fs).unwrap();
        assert_eq!(spectrum.points.len(), 2560 / 2 + 1);
        assert!((spectrum.resolution_hz - 0.1).abs() < 1e-12);
        let peak = spectrum.dominant_frequency().unwrap();
        assert!((peak - 12.0).abs() < 1e-9, "peak at {}", peak);
        assert!((spectrum.points.last().unwrap()[0] - 128.0).abs() < 1e-9);
    }

    #[test]
    fn empty_window_has_no_spectrum() {
        assert!(magnitude_spectrum(&[], 256.0).is_none());
    }
}

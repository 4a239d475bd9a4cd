use crate::signal::RRSeries;
use serde::{Deserialize, Serialize};

/// Time-domain HRV summary of recent beats. All durations in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RrFeatures {
    pub n: usize,
    pub mean_rr: f64,
    pub sdnn: f64,
    pub rmssd: f64,
    pub pnn50: f64,
    pub pnn20: f64,
    pub sd1: f64,
    pub sd2: f64,
}

/// Needs at least two intervals (three beats).
pub fn rr_features(rr: &RRSeries) -> Option<RrFeatures> {
    let n = rr.rr.len();
    if n < 2 {
        return None;
    }
    let ms: Vec<f64> = rr.rr.iter().map(|s| s * 1000.0).collect();
    let mean_rr = ms.iter().sum::<f64>() / n as f64;
    let var_rr = ms.iter().map(|x| (x - mean_rr).powi(2)).sum::<f64>() / (n as f64 - 1.0);

    let diffs: Vec<f64> = ms.windows(2).map(|w| w[1] - w[0]).collect();
    let denom = n as f64 - 1.0;
    let var_d = diffs.iter().map(|d| d * d).sum::<f64>() / denom;
    let pnn50 = diffs.iter().filter(|d| d.abs() > 50.0).count() as f64 / denom;
    let pnn20 = diffs.iter().filter(|d| d.abs() > 20.0).count() as f64 / denom;

    Some(RrFeatures {
        n,
        mean_rr,
        sdnn: var_rr.sqrt(),
        rmssd: var_d.sqrt(),
        pnn50,
        pnn20,
        sd1: (var_d / 2.0).sqrt(),
        sd2: (2.0 * var_rr - var_d / 2.0).max(0.0).sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_rhythm_has_no_variability() {
        let rr = RRSeries {
            rr: vec![0.8, 0.8, 0.8, 0.8],
        };
        let f = rr_features(&rr).unwrap();
        assert_eq!(f.n, 4);
        assert!((f.mean_rr - 800.0).abs() < 1e-9);
        assert!(f.sdnn.abs() < 1e-9);
        assert!(f.rmssd.abs() < 1e-9);
        assert_eq!(f.pnn50, 0.0);
        assert!(f.sd1.abs() < 1e-9 && f.sd2.abs() < 1e-9);
    }

    #[test]
    fn alternating_intervals() {
        // 800, 900, 800 ms: successive differences +100, -100.
        let rr = RRSeries {
            rr: vec![0.8, 0.9, 0.8],
        };
        let f = rr_features(&rr).unwrap();
        assert!((f.mean_rr - 2500.0 / 3.0).abs() < 1e-9);
        // var_rr = (2 * (100/3)^2 + (200/3)^2) / 2 = 3333.33
        assert!((f.sdnn - (10000.0f64 / 3.0).sqrt()).abs() < 1e-6);
        // var_d = (100^2 + 100^2) / 2 = 10000
        assert!((f.rmssd - 100.0).abs() < 1e-9);
        assert_eq!(f.pnn50, 1.0);
        assert_eq!(f.pnn20, 1.0);
        assert!((f.sd1 - 5000.0f64.sqrt()).abs() < 1e-9);
        let sd2 = (2.0 * 10000.0 / 3.0 - 5000.0f64).max(0.0).sqrt();
        assert!((f.sd2 - sd2).abs() < 1e-9);
    }

    #[test]
    fn too_few_intervals() {
        assert!(rr_features(&RRSeries { rr: vec![0.8] }).is_none());
    }
}

//! Tempo detection over decoded PCM.
//!
//! Onset-energy flux autocorrelation: frame the signal, take the positive
//! energy difference between frames as an onset envelope, autocorrelate
//! the envelope over the lag range spanning the valid BPM window, and
//! pick the best-scoring lag with a mild prior toward moderate tempi.

use muvi_models::audio::{BPM_MAX, BPM_MIN};

/// Analysis frame hop in samples.
const HOP: usize = 512;

/// Analysis window in samples.
const WINDOW: usize = 1024;

/// Prior center: scores are weighted toward this tempo to resolve
/// octave ambiguity.
const PRIOR_BPM: f64 = 120.0;

/// Detect the tempo of a mono signal. Returns `None` when the signal is
/// too short or featureless to track.
pub fn detect_bpm(samples: &[f32], sample_rate: u32) -> Option<f64> {
    if samples.len() < WINDOW * 8 {
        return None;
    }

    let envelope = onset_envelope(samples);
    if envelope.iter().all(|&e| e == 0.0) {
        return None;
    }

    let frame_rate = sample_rate as f64 / HOP as f64;
    let lag_min = ((60.0 / BPM_MAX) * frame_rate).floor().max(1.0) as usize;
    let lag_max = (((60.0 / BPM_MIN) * frame_rate).ceil() as usize).min(envelope.len() / 2);
    if lag_min >= lag_max {
        return None;
    }

    let mut best_lag = 0usize;
    let mut best_score = f64::MIN;
    for lag in lag_min..=lag_max {
        let raw = autocorrelation(&envelope, lag);
        let bpm = 60.0 * frame_rate / lag as f64;
        let score = raw * tempo_prior(bpm);
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_score <= 0.0 {
        return None;
    }

    // Parabolic interpolation around the winning lag refines past frame
    // quantization.
    let lag = refine_lag(&envelope, best_lag, lag_min, lag_max);
    let bpm = 60.0 * frame_rate / lag;
    Some(bpm.clamp(BPM_MIN, BPM_MAX))
}

/// Positive spectral-energy flux per frame, lightly smoothed.
fn onset_envelope(samples: &[f32]) -> Vec<f64> {
    let frames = (samples.len().saturating_sub(WINDOW)) / HOP;
    let mut energies = Vec::with_capacity(frames);
    for i in 0..frames {
        let start = i * HOP;
        let frame = &samples[start..start + WINDOW];
        let energy: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
        energies.push(energy);
    }

    let mut flux: Vec<f64> = energies
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).max(0.0))
        .collect();

    // 3-point moving average; spreads each onset across neighboring
    // frames so off-grid periods still correlate.
    if flux.len() >= 3 {
        let smoothed: Vec<f64> = (0..flux.len())
            .map(|i| {
                let lo = i.saturating_sub(1);
                let hi = (i + 1).min(flux.len() - 1);
                flux[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64
            })
            .collect();
        flux = smoothed;
    }
    flux
}

fn autocorrelation(envelope: &[f64], lag: usize) -> f64 {
    let n = envelope.len() - lag;
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = (0..n).map(|i| envelope[i] * envelope[i + lag]).sum();
    sum / n as f64
}

/// Log-gaussian weight centered on the prior tempo.
fn tempo_prior(bpm: f64) -> f64 {
    let x = (bpm / PRIOR_BPM).log2();
    (-0.5 * (x / 1.0).powi(2)).exp()
}

fn refine_lag(envelope: &[f64], lag: usize, lag_min: usize, lag_max: usize) -> f64 {
    if lag <= lag_min || lag >= lag_max {
        return lag as f64;
    }
    let left = autocorrelation(envelope, lag - 1);
    let center = autocorrelation(envelope, lag);
    let right = autocorrelation(envelope, lag + 1);
    let denom = left - 2.0 * center + right;
    if denom.abs() < f64::EPSILON {
        return lag as f64;
    }
    let delta = 0.5 * (left - right) / denom;
    lag as f64 + delta.clamp(-0.5, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    /// Click track: short bursts at the given tempo.
    fn click_track(bpm: f64, seconds: f64) -> Vec<f32> {
        let total = (seconds * SR as f64) as usize;
        let period = (60.0 / bpm * SR as f64) as usize;
        let mut samples = vec![0.0f32; total];
        let mut pos = 0usize;
        while pos < total {
            for i in 0..(HOP / 2).min(total - pos) {
                samples[pos + i] = 1.0 - (i as f32 / (HOP / 2) as f32);
            }
            pos += period;
        }
        samples
    }

    #[test]
    fn test_detects_120_bpm_clicks() {
        let samples = click_track(120.0, 30.0);
        let bpm = detect_bpm(&samples, SR).expect("tempo expected");
        assert!((bpm - 120.0).abs() < 5.0, "detected {bpm}");
    }

    #[test]
    fn test_detects_90_bpm_clicks() {
        let samples = click_track(90.0, 30.0);
        let bpm = detect_bpm(&samples, SR).expect("tempo expected");
        assert!((bpm - 90.0).abs() < 5.0, "detected {bpm}");
    }

    #[test]
    fn test_silence_yields_none() {
        let samples = vec![0.0f32; SR as usize * 10];
        assert!(detect_bpm(&samples, SR).is_none());
    }

    #[test]
    fn test_too_short_yields_none() {
        let samples = vec![0.5f32; 1000];
        assert!(detect_bpm(&samples, SR).is_none());
    }
}

//! Per-bin suppression gains from a frame's power spectrum and the noise profile.
//!
//! All estimation happens in the power domain. The result is a magnitude gain per bin in
//! `[0, 1]`, which the pipeline multiplies onto the complex spectrum so the phase is kept.
//!
//! Steps per frame:
//! 1. An oversubtraction factor per bin, from the selected [`NoiseScalingType`]
//! 2. Power spectral subtraction, limited by the (optionally whitened) gain floor
//! 3. Temporal smoothing, skipped on transients when transient protection is on
//! 4. A musical noise post filter that smooths the gains across frequency when the frame is
//!    mostly noise

use crate::audio::constants::{
    critical_band_of, db_to_gain, db_to_power, power_to_db, CRITICAL_BAND_COUNT,
    MAX_GAIN_SMOOTHING, OVERSUBTRACTION_AT_0DB, OVERSUBTRACTION_MAX, OVERSUBTRACTION_MIN,
    OVERSUBTRACTION_SLOPE, POST_FILTER_DB_RANGE, POST_FILTER_MAX_HALF_WIDTH, SPECTRAL_EPSILON,
    TRANSIENT_FLUX_AVERAGING, TRANSIENT_FLUX_MULTIPLIER, TRANSIENT_MIN_FLUX_RATIO,
};
use crate::audio::control::{DenoisingParameters, NoiseScalingType};

pub struct SpectralGainEstimator {
    spectrum_size: usize,
    /// Critical band of every bin
    band_of_bin: Vec<usize>,
    /// `spreading[maskee * CRITICAL_BAND_COUNT + masker]`, linear power
    spreading: Vec<f32>,

    gains: Vec<f32>,
    previous_gains: Vec<f32>,
    oversubtraction: Vec<f32>,
    scratch: Vec<f32>,
    previous_power: Vec<f32>,

    band_signal: [f32; CRITICAL_BAND_COUNT],
    band_noise: [f32; CRITICAL_BAND_COUNT],
    band_threshold: [f32; CRITICAL_BAND_COUNT],

    average_flux: f32,
    has_previous_frame: bool,
}

impl SpectralGainEstimator {
    pub fn new(sample_rate: f32, fft_size: usize) -> Self {
        let spectrum_size = fft_size / 2 + 1;
        let bin_width = sample_rate / fft_size as f32;
        let band_of_bin = (0..spectrum_size)
            .map(|bin| critical_band_of(bin as f32 * bin_width))
            .collect();

        Self {
            spectrum_size,
            band_of_bin,
            spreading: spreading_function(),
            gains: vec![1.0; spectrum_size],
            previous_gains: vec![1.0; spectrum_size],
            oversubtraction: vec![OVERSUBTRACTION_MIN; spectrum_size],
            scratch: vec![0.0; spectrum_size],
            previous_power: vec![0.0; spectrum_size],
            band_signal: [0.0; CRITICAL_BAND_COUNT],
            band_noise: [0.0; CRITICAL_BAND_COUNT],
            band_threshold: [0.0; CRITICAL_BAND_COUNT],
            average_flux: 0.0,
            has_previous_frame: false,
        }
    }

    pub fn spectrum_size(&self) -> usize {
        self.spectrum_size
    }

    /// Forget the smoothing and transient history
    pub fn reset(&mut self) {
        self.gains.fill(1.0);
        self.previous_gains.fill(1.0);
        self.previous_power.fill(0.0);
        self.average_flux = 0.0;
        self.has_previous_frame = false;
    }

    /// Compute the gains for one frame. `noise` shorter than the spectrum (an empty slice in
    /// particular) means no profile is available, which yields unity gains.
    pub fn compute(
        &mut self,
        power: &[f32],
        noise: &[f32],
        params: &DenoisingParameters,
    ) -> &[f32] {
        let size = self.spectrum_size.min(power.len());
        let power = &power[..size];

        let is_transient = self.detect_transient(power);

        if noise.len() < size || size == 0 {
            self.gains[..size].fill(1.0);
            self.previous_gains[..size].fill(1.0);
            return &self.gains[..size];
        }
        let noise = &noise[..size];

        match params.scaling_type {
            NoiseScalingType::APosterioriSnr => self.snr_oversubtraction(power, noise),
            NoiseScalingType::CriticalBands => self.critical_band_oversubtraction(power, noise),
            NoiseScalingType::MaskingThresholds => self.masking_oversubtraction(power),
        }

        self.subtract(power, noise, params);
        self.smooth_over_time(params, is_transient);
        self.previous_gains[..size].copy_from_slice(&self.gains[..size]);
        self.post_filter(power, params);

        &self.gains[..size]
    }

    /// Berouti: a-posteriori SNR of every bin on its own
    fn snr_oversubtraction(&mut self, power: &[f32], noise: &[f32]) {
        for ((alpha, &signal), &noise) in self.oversubtraction.iter_mut().zip(power).zip(noise) {
            *alpha = berouti_oversubtraction(snr_db(signal, noise));
        }
    }

    /// Berouti on the SNR of whole critical bands
    fn critical_band_oversubtraction(&mut self, power: &[f32], noise: &[f32]) {
        self.band_signal = [0.0; CRITICAL_BAND_COUNT];
        self.band_noise = [0.0; CRITICAL_BAND_COUNT];
        for ((&band, &signal), &noise) in self.band_of_bin.iter().zip(power).zip(noise) {
            self.band_signal[band] += signal;
            self.band_noise[band] += noise;
        }

        for (alpha, &band) in self.oversubtraction.iter_mut().zip(&self.band_of_bin) {
            *alpha = berouti_oversubtraction(snr_db(
                self.band_signal[band],
                self.band_noise[band],
            ));
        }
    }

    /// Virag: more subtraction where the masking threshold is low, less where the signal
    /// masks the residual noise anyway
    fn masking_oversubtraction(&mut self, power: &[f32]) {
        self.compute_masking_thresholds(power);

        let (min_db, max_db) = self
            .band_threshold
            .iter()
            .map(|&threshold| power_to_db(threshold))
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(low, high), db| {
                (low.min(db), high.max(db))
            });
        let range = max_db - min_db;

        for (alpha, &band) in self.oversubtraction.iter_mut().zip(&self.band_of_bin) {
            let position = if range > 0.0 {
                (power_to_db(self.band_threshold[band]) - min_db) / range
            } else {
                0.0
            };
            *alpha = OVERSUBTRACTION_MAX + (OVERSUBTRACTION_MIN - OVERSUBTRACTION_MAX) * position;
        }
    }

    /// Johnston: band energies, spread across bands, lowered by a tonality dependent offset
    fn compute_masking_thresholds(&mut self, power: &[f32]) {
        self.band_signal = [0.0; CRITICAL_BAND_COUNT];
        for (&band, &signal) in self.band_of_bin.iter().zip(power) {
            self.band_signal[band] += signal;
        }

        // Spectral flatness in dB, -60dB counts as a pure tone
        let count = power.len().max(1) as f32;
        let arithmetic_mean = power.iter().sum::<f32>() / count;
        let log_mean = power
            .iter()
            .map(|&signal| signal.max(SPECTRAL_EPSILON).ln())
            .sum::<f32>()
            / count;
        let flatness_db = power_to_db(log_mean.exp() / arithmetic_mean.max(SPECTRAL_EPSILON));
        let tonality = (flatness_db / -60.0).clamp(0.0, 1.0);

        for (maskee, threshold) in self.band_threshold.iter_mut().enumerate() {
            let spread: f32 = self.spreading
                [maskee * CRITICAL_BAND_COUNT..(maskee + 1) * CRITICAL_BAND_COUNT]
                .iter()
                .zip(&self.band_signal)
                .map(|(&spreading, &energy)| spreading * energy)
                .sum();

            let offset_db =
                tonality * (14.5 + (maskee + 1) as f32) + (1.0 - tonality) * 5.5;
            *threshold = spread * db_to_power(-offset_db);
        }
    }

    fn subtract(&mut self, power: &[f32], noise: &[f32], params: &DenoisingParameters) {
        let floor = db_to_gain(-params.reduction_amount);
        let rescale = db_to_power(params.reduction_strength);
        let whitening = (params.whitening / 100.0).clamp(0.0, 1.0);
        let noise_max = noise.iter().copied().fold(0.0f32, f32::max);

        for (((gain, &alpha), &signal), &noise) in self
            .gains
            .iter_mut()
            .zip(&self.oversubtraction)
            .zip(power)
            .zip(noise)
        {
            let subtracted = if signal > SPECTRAL_EPSILON {
                (1.0 - alpha * rescale * noise / signal).max(0.0).sqrt()
            } else {
                0.0
            };

            // Whitening lifts the floor where the noise is quieter than its loudest bin, so
            // the residual noise comes out flatter
            let bin_floor = if whitening > 0.0 && noise > SPECTRAL_EPSILON {
                (floor * (noise_max / noise).powf(whitening / 2.0)).min(1.0)
            } else {
                floor
            };

            *gain = subtracted.max(bin_floor).clamp(0.0, 1.0);
        }
    }

    /// Normalised spectral flux against an adaptive threshold
    fn detect_transient(&mut self, power: &[f32]) -> bool {
        let total: f32 = power.iter().sum();
        let rising: f32 = power
            .iter()
            .zip(&self.previous_power)
            .map(|(&current, &previous)| (current - previous).max(0.0))
            .sum();
        self.previous_power[..power.len()].copy_from_slice(power);

        if !self.has_previous_frame {
            self.has_previous_frame = true;
            return false;
        }

        let flux = if total > SPECTRAL_EPSILON {
            rising / total
        } else {
            0.0
        };
        let threshold = TRANSIENT_MIN_FLUX_RATIO.max(TRANSIENT_FLUX_MULTIPLIER * self.average_flux);
        let is_transient = flux > threshold;
        self.average_flux =
            TRANSIENT_FLUX_AVERAGING * self.average_flux + (1.0 - TRANSIENT_FLUX_AVERAGING) * flux;

        is_transient
    }

    fn smooth_over_time(&mut self, params: &DenoisingParameters, is_transient: bool) {
        let smoothing = (params.smoothing / 100.0).clamp(0.0, MAX_GAIN_SMOOTHING);
        if smoothing <= 0.0 || (params.transient_protection && is_transient) {
            return;
        }

        for (gain, &previous) in self.gains.iter_mut().zip(&self.previous_gains) {
            *gain = smoothing * previous + (1.0 - smoothing) * *gain;
        }
    }

    /// Esch & Vary: when the a priori SNR of the whole frame drops below the threshold, the
    /// gain curve is averaged across frequency, wider the further below it is
    fn post_filter(&mut self, power: &[f32], params: &DenoisingParameters) {
        let size = power.len();
        let total: f32 = power.iter().sum();
        if total <= SPECTRAL_EPSILON {
            return;
        }

        let kept: f32 = self
            .gains
            .iter()
            .zip(power)
            .map(|(&gain, &signal)| gain * gain * signal)
            .sum();
        let frame_snr_db = power_to_db(kept / total);
        if frame_snr_db >= params.post_filter_threshold {
            return;
        }

        let depth = ((params.post_filter_threshold - frame_snr_db) / POST_FILTER_DB_RANGE)
            .clamp(0.0, 1.0);
        let half_width = (depth * POST_FILTER_MAX_HALF_WIDTH as f32).round() as usize;
        if half_width == 0 {
            return;
        }

        let gains = &self.gains[..size];
        for (bin, smoothed) in self.scratch[..size].iter_mut().enumerate() {
            let start = bin.saturating_sub(half_width);
            let end = (bin + half_width + 1).min(size);
            *smoothed = gains[start..end].iter().sum::<f32>() / (end - start) as f32;
        }
        self.gains[..size].copy_from_slice(&self.scratch[..size]);
    }
}

fn snr_db(signal: f32, noise: f32) -> f32 {
    power_to_db(signal / noise.max(SPECTRAL_EPSILON))
}

/// Oversubtraction factor falling linearly with SNR, 4 at 0dB
fn berouti_oversubtraction(snr_db: f32) -> f32 {
    (OVERSUBTRACTION_AT_0DB - OVERSUBTRACTION_SLOPE * snr_db)
        .clamp(OVERSUBTRACTION_MIN, OVERSUBTRACTION_MAX)
}

/// Schroeder spreading function between every pair of critical bands
fn spreading_function() -> Vec<f32> {
    let mut spreading = vec![0.0; CRITICAL_BAND_COUNT * CRITICAL_BAND_COUNT];
    for maskee in 0..CRITICAL_BAND_COUNT {
        for masker in 0..CRITICAL_BAND_COUNT {
            let distance = maskee as f32 - masker as f32 + 0.474;
            let spreading_db =
                15.81 + 7.5 * distance - 17.5 * (1.0 + distance * distance).sqrt();
            spreading[maskee * CRITICAL_BAND_COUNT + masker] = db_to_power(spreading_db);
        }
    }
    spreading
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFT_SIZE: usize = 64;
    const BINS: usize = FFT_SIZE / 2 + 1;

    fn params() -> DenoisingParameters {
        DenoisingParameters {
            // Below any reachable frame SNR, so the post filter stays out of the way
            post_filter_threshold: -200.0,
            ..DenoisingParameters::default()
        }
    }

    fn estimator() -> SpectralGainEstimator {
        SpectralGainEstimator::new(8000.0, FFT_SIZE)
    }

    #[test]
    fn no_profile_means_unity_gain() {
        let mut estimator = estimator();
        let gains = estimator.compute(&[3.0; BINS], &[], &params());
        assert_eq!(gains.len(), BINS);
        assert!(gains.iter().all(|&g| g == 1.0));
    }

    #[test]
    fn noise_only_bins_drop_to_the_floor() {
        let mut estimator = estimator();
        let params = DenoisingParameters {
            reduction_amount: 20.0,
            ..params()
        };
        let gains = estimator.compute(&[1.0; BINS], &[1.0; BINS], &params);
        assert!(gains.iter().all(|&g| (g - 0.1).abs() < 1e-6));
    }

    #[test]
    fn loud_signal_passes_almost_untouched() {
        let mut estimator = estimator();
        let gains = estimator.compute(&[1000.0; BINS], &[1.0; BINS], &params());
        assert!(gains.iter().all(|&g| g > 0.99 && g <= 1.0));
    }

    #[test]
    fn strength_scales_the_profile() {
        let mut weak = estimator();
        let mut strong = estimator();
        let power = [20.0; BINS];
        let noise = [1.0; BINS];

        let weak_gain = weak.compute(&power, &noise, &params())[5];
        let strong_params = DenoisingParameters {
            reduction_strength: 12.0,
            ..params()
        };
        let strong_gain = strong.compute(&power, &noise, &strong_params)[5];
        assert!(strong_gain < weak_gain);
    }

    #[test]
    fn whitening_lifts_the_floor_of_quiet_noise_bins() {
        let mut estimator = estimator();
        let mut noise = [1.0; BINS];
        noise[0] = 100.0;
        let params = DenoisingParameters {
            reduction_amount: 40.0,
            whitening: 100.0,
            ..params()
        };

        let gains = estimator.compute(&noise, &noise, &params);
        // Loudest bin keeps the plain floor, the others are raised by sqrt(100) = 10x
        assert!((gains[0] - 0.01).abs() < 1e-6);
        assert!((gains[1] - 0.1).abs() < 1e-5);
    }

    #[test]
    fn every_strategy_stays_within_unit_range() {
        for scaling_type in [
            NoiseScalingType::APosterioriSnr,
            NoiseScalingType::CriticalBands,
            NoiseScalingType::MaskingThresholds,
        ] {
            let mut estimator = estimator();
            let params = DenoisingParameters {
                scaling_type,
                whitening: 50.0,
                post_filter_threshold: 10.0,
                smoothing: 50.0,
                ..DenoisingParameters::default()
            };
            for frame in 0..10 {
                let power: Vec<f32> = (0..BINS)
                    .map(|bin| ((bin * 7 + frame * 3) % 11) as f32 + 0.01)
                    .collect();
                let noise: Vec<f32> = (0..BINS).map(|bin| (bin % 5) as f32 + 0.5).collect();
                let gains = estimator.compute(&power, &noise, &params);
                assert!(
                    gains.iter().all(|&g| (0.0..=1.0).contains(&g)),
                    "{:?}",
                    scaling_type
                );
            }
        }
    }

    #[test]
    fn oversubtraction_follows_snr() {
        assert_eq!(berouti_oversubtraction(0.0), 4.0);
        assert_eq!(berouti_oversubtraction(-20.0), OVERSUBTRACTION_MAX);
        assert_eq!(berouti_oversubtraction(40.0), OVERSUBTRACTION_MIN);
        assert!((berouti_oversubtraction(10.0) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn masking_subtracts_more_where_the_threshold_is_low() {
        let mut estimator = SpectralGainEstimator::new(44100.0, 1024);
        let bins = 513;
        // A loud low tone masks the low bands, the top bands only carry noise
        let mut power = vec![1.0; bins];
        power[5] = 1.0e6;
        estimator.compute_masking_thresholds(&power);
        estimator.masking_oversubtraction(&power);

        let low = estimator.oversubtraction[5];
        let high = estimator.oversubtraction[bins - 1];
        assert!(low < high);
        assert!(estimator
            .oversubtraction
            .iter()
            .all(|&alpha| (OVERSUBTRACTION_MIN..=OVERSUBTRACTION_MAX).contains(&alpha)));
    }

    #[test]
    fn smoothing_slows_down_gain_changes() {
        let mut estimator = estimator();
        let params = DenoisingParameters {
            smoothing: 50.0,
            reduction_amount: 40.0,
            ..params()
        };
        let noise = [1.0; BINS];

        // Starts from unity, so the first noisy frame only gets halfway down
        let first = estimator.compute(&noise, &noise, &params)[3];
        assert!((first - 0.505).abs() < 1e-4);
        let second = estimator.compute(&noise, &noise, &params)[3];
        assert!(second < first);
    }

    #[test]
    fn transient_protection_skips_smoothing_on_onsets() {
        let noise = [1.0; BINS];
        let params = DenoisingParameters {
            smoothing: 90.0,
            transient_protection: true,
            ..params()
        };

        let mut estimator = estimator();
        for _ in 0..20 {
            estimator.compute(&noise, &noise, &params);
        }
        let onset = [1000.0; BINS];
        let protected = estimator.compute(&onset, &noise, &params)[3];
        assert!(protected > 0.99);

        let mut unprotected = SpectralGainEstimator::new(8000.0, FFT_SIZE);
        let params = DenoisingParameters {
            transient_protection: false,
            ..params
        };
        for _ in 0..20 {
            unprotected.compute(&noise, &noise, &params);
        }
        assert!(unprotected.compute(&onset, &noise, &params)[3] < 0.5);
    }

    #[test]
    fn post_filter_spreads_isolated_gains() {
        let mut estimator = estimator();
        let mut power = [1.0; BINS];
        power[16] = 1000.0;
        let noise = [1.0; BINS];

        let plain = DenoisingParameters {
            reduction_amount: 40.0,
            ..params()
        };
        let isolated = estimator.compute(&power, &noise, &plain).to_vec();
        assert!(isolated[16] > 0.99);
        assert!(isolated[15] < 0.02);

        let mut estimator = SpectralGainEstimator::new(8000.0, FFT_SIZE);
        let filtered_params = DenoisingParameters {
            post_filter_threshold: 10.0,
            ..plain
        };
        let filtered = estimator.compute(&power, &noise, &filtered_params);
        assert!(filtered[16] < isolated[16]);
        assert!(filtered[15] > isolated[15]);
    }
}

use crate::audio::constants::{
    MAX_CHANNELS, MEDIAN_LOG_STEP, MIN_NUMBER_OF_WINDOWS_NOISE_AVERAGED,
    NOISE_PROFILE_MAX_SIZE, SPECTRAL_EPSILON,
};
use crate::audio::control::LearningMode;
use crate::audio::error::ConfigError;

/// A copy of the per-channel noise profiles, as exchanged through the triple buffers.
///
/// The channel arrays are allocated at full capacity once and never resized afterwards, so
/// filling a snapshot on the audio thread never allocates. `size == 0` means no profile.
#[derive(Debug, Clone)]
pub struct ProfileSnapshot {
    pub channels: Vec<Vec<f32>>,
    pub size: usize,
    pub blocks_averaged: u32,
    /// Counter of control-side updates this snapshot includes
    pub generation: u64,
}

impl Default for ProfileSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Only the active bins take part, whatever is left beyond `size` is stale
impl PartialEq for ProfileSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self.blocks_averaged == other.blocks_averaged
            && self.generation == other.generation
            && self.channels.len() == other.channels.len()
            && (0..self.channels.len()).all(|channel| self.channel(channel) == other.channel(channel))
    }
}

impl ProfileSnapshot {
    pub fn empty() -> Self {
        Self {
            channels: vec![vec![0.0; NOISE_PROFILE_MAX_SIZE]; MAX_CHANNELS],
            size: 0,
            blocks_averaged: 0,
            generation: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.size > 0
    }

    /// The active bins of one channel
    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.channels[channel][..self.size]
    }

    /// Mark as "no profile" without touching the bins
    pub fn clear(&mut self) {
        self.size = 0;
        self.blocks_averaged = 0;
    }

    /// Copy another snapshot into this one, reusing the existing allocations
    pub fn copy_from(&mut self, other: &ProfileSnapshot) {
        for (dst, src) in self.channels.iter_mut().zip(&other.channels) {
            dst[..other.size].copy_from_slice(&src[..other.size]);
        }
        self.size = other.size;
        self.blocks_averaged = other.blocks_averaged;
        self.generation = other.generation;
    }
}

/// Noise power spectrum estimate of a single channel
pub struct NoiseProfileStore {
    profile: Vec<f32>,
    size: usize,
    blocks_averaged: u32,
    available: bool,
    mode: LearningMode,

    /// Running per-bin median of the learning pass, tracked as natural log power
    log_median: Vec<f32>,
    /// Frames folded into `log_median`, sets how far the next frame may move it
    median_count: u32,

    resample_scratch: Vec<f32>,
}

impl Default for NoiseProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseProfileStore {
    pub fn new() -> Self {
        Self {
            profile: vec![0.0; NOISE_PROFILE_MAX_SIZE],
            size: 0,
            blocks_averaged: 0,
            available: false,
            mode: LearningMode::Off,
            log_median: vec![0.0; NOISE_PROFILE_MAX_SIZE],
            median_count: 0,
            resample_scratch: vec![0.0; NOISE_PROFILE_MAX_SIZE],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn blocks_averaged(&self) -> u32 {
        self.blocks_averaged
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn learning_mode(&self) -> LearningMode {
        self.mode
    }

    /// The active bins
    pub fn profile(&self) -> &[f32] {
        &self.profile[..self.size]
    }

    /// Change the bin count, e.g. after a sample rate change. An available profile is
    /// resampled to the new resolution, anything else starts over empty.
    pub fn set_size(&mut self, bins: usize) -> Result<(), ConfigError> {
        if bins > NOISE_PROFILE_MAX_SIZE {
            return Err(ConfigError::SpectrumTooLarge {
                bins,
                capacity: NOISE_PROFILE_MAX_SIZE,
            });
        }

        if self.available && self.size > 0 && bins > 0 {
            let old_size = self.size;
            self.resample_scratch[..old_size].copy_from_slice(&self.profile[..old_size]);
            resample_profile(
                &self.resample_scratch[..old_size],
                &mut self.profile[..bins],
            );
            self.size = bins;
            self.seed_median();
        } else {
            self.reset();
            self.size = bins;
        }

        Ok(())
    }

    /// Select how further frames are folded in. Switching into median mode starts the
    /// tracker from the current estimate, weighted by the frames it already holds.
    pub fn begin_learning(&mut self, mode: LearningMode) {
        if mode == LearningMode::Median && self.mode != LearningMode::Median {
            self.seed_median();
        }
        self.mode = mode;
    }

    /// Fold one frame's power spectrum into the estimate according to the current mode
    pub fn accumulate(&mut self, power: &[f32]) {
        let size = self.size.min(power.len());
        if size == 0 || self.mode == LearningMode::Off {
            return;
        }

        self.blocks_averaged = self.blocks_averaged.saturating_add(1);

        match self.mode {
            LearningMode::Off => (),
            LearningMode::Average => {
                let weight = 1.0 / self.blocks_averaged as f32;
                for (estimate, &value) in self.profile[..size].iter_mut().zip(power) {
                    *estimate += (value - *estimate) * weight;
                }
            }
            LearningMode::Maximum => {
                for (estimate, &value) in self.profile[..size].iter_mut().zip(power) {
                    *estimate = estimate.max(value);
                }
            }
            LearningMode::Median => {
                let first = self.median_count == 0;
                // Equal steps up and down settle where half the frames lie on either side.
                // The step shrinks with the frame count, so a late burst barely moves it.
                let step = MEDIAN_LOG_STEP / (self.median_count as f32 + 1.0);
                self.median_count = self.median_count.saturating_add(1);

                for ((estimate, log_median), &value) in self.profile[..size]
                    .iter_mut()
                    .zip(&mut self.log_median[..size])
                    .zip(power)
                {
                    let log_value = value.max(SPECTRAL_EPSILON).ln();
                    if first {
                        *log_median = log_value;
                    } else if log_value > *log_median {
                        *log_median += step;
                    } else if log_value < *log_median {
                        *log_median -= step;
                    }
                    *estimate = log_median.exp();
                }
            }
        }

        if self.blocks_averaged > MIN_NUMBER_OF_WINDOWS_NOISE_AVERAGED {
            self.available = true;
        }
    }

    /// Replace the estimate with a stored one. A buffer of another resolution is resampled,
    /// an empty buffer resets the store.
    pub fn install_snapshot(&mut self, buffer: &[f32], blocks_averaged: u32) {
        if buffer.is_empty() {
            self.reset();
            return;
        }

        let buffer = &buffer[..buffer.len().min(NOISE_PROFILE_MAX_SIZE)];
        if self.size == 0 {
            // Not activated yet, adopt the stored resolution
            self.size = buffer.len();
        }

        if buffer.len() == self.size {
            self.profile[..self.size].copy_from_slice(buffer);
        } else {
            resample_profile(buffer, &mut self.profile[..self.size]);
        }

        self.blocks_averaged = blocks_averaged;
        self.available = true;
        self.seed_median();
    }

    /// Forget everything learned. The size is kept.
    pub fn reset(&mut self) {
        self.profile.fill(0.0);
        self.blocks_averaged = 0;
        self.available = false;
        self.median_count = 0;
    }

    fn seed_median(&mut self) {
        self.median_count = self.blocks_averaged;
        for (log_median, &estimate) in self.log_median.iter_mut().zip(&self.profile[..self.size]) {
            *log_median = estimate.max(SPECTRAL_EPSILON).ln();
        }
    }
}

/// Linear resampling of a profile to another bin count. Bin 0 (DC) is carried over exactly,
/// destination bin `k` reads the source at `k * (n - 1) / (m - 1)`.
pub fn resample_profile(source: &[f32], destination: &mut [f32]) {
    let n = source.len();
    let m = destination.len();
    if n == 0 || m == 0 {
        return;
    }

    destination[0] = source[0];
    if m == 1 {
        return;
    }

    let step = (n - 1) as f64 / (m - 1) as f64;
    for (k, value) in destination.iter_mut().enumerate().skip(1) {
        let position = k as f64 * step;
        let index = position.floor() as usize;
        if index + 1 >= n {
            *value = source[n - 1];
        } else {
            let (left, right) = (source[index], source[index + 1]);
            let fraction = (position - index as f64) as f32;
            *value = (left + (right - left) * fraction).clamp(left.min(right), left.max(right));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store_with_size(bins: usize) -> NoiseProfileStore {
        let mut store = NoiseProfileStore::new();
        store.set_size(bins).unwrap();
        store
    }

    #[test]
    fn average_converges_to_the_mean() {
        let mut store = store_with_size(4);
        store.begin_learning(LearningMode::Average);
        for value in [1.0, 2.0, 3.0, 4.0] {
            store.accumulate(&[value; 4]);
        }
        assert!(store.profile().iter().all(|&v| (v - 2.5).abs() < 1e-6));
        assert_eq!(store.blocks_averaged(), 4);
    }

    #[test]
    fn maximum_keeps_the_peak() {
        let mut store = store_with_size(3);
        store.begin_learning(LearningMode::Maximum);
        store.accumulate(&[1.0, 5.0, 2.0]);
        store.accumulate(&[4.0, 0.5, 2.5]);
        assert_eq!(store.profile(), &[4.0, 5.0, 2.5]);
    }

    #[test]
    fn median_keeps_a_long_pass_against_a_short_tail() {
        let mut store = store_with_size(4);
        store.begin_learning(LearningMode::Median);
        for _ in 0..200 {
            store.accumulate(&[10.0; 4]);
        }
        for _ in 0..3 {
            store.accumulate(&[0.0; 4]);
        }

        assert_eq!(store.blocks_averaged(), 203);
        assert!(store.is_available());
        for &value in store.profile() {
            assert!((value - 10.0).abs() < 0.5, "median moved to {}", value);
        }
    }

    #[test]
    fn median_ignores_sparse_outliers() {
        let mut store = store_with_size(2);
        store.begin_learning(LearningMode::Median);
        for frame in 0..100 {
            let value = if frame % 10 == 9 { 1000.0 } else { 1.0 };
            store.accumulate(&[value, value]);
        }
        // The mean of this pass would be ~100
        for &value in store.profile() {
            assert!((value - 1.0).abs() < 0.1, "median moved to {}", value);
        }
    }

    #[test]
    fn median_settles_on_the_middle_value() {
        let mut store = store_with_size(1);
        store.begin_learning(LearningMode::Median);
        for frame in 0..500 {
            store.accumulate(&[[5.0, 1.0, 4.0, 2.0, 3.0][frame % 5]]);
        }
        assert!((store.profile()[0] - 3.0).abs() < 0.3, "{}", store.profile()[0]);
    }

    #[test]
    fn switching_to_median_starts_from_the_current_estimate() {
        let mut store = store_with_size(1);
        store.begin_learning(LearningMode::Average);
        for _ in 0..10 {
            store.accumulate(&[3.0]);
        }
        store.begin_learning(LearningMode::Median);
        store.accumulate(&[50.0]);
        store.accumulate(&[50.0]);

        // Ten frames of history only let two louder frames nudge it
        let value = store.profile()[0];
        assert!(value > 3.0 && value < 4.5, "{}", value);
    }

    #[test]
    fn off_does_not_learn() {
        let mut store = store_with_size(2);
        store.accumulate(&[1.0, 1.0]);
        assert_eq!(store.blocks_averaged(), 0);
        assert_eq!(store.profile(), &[0.0, 0.0]);
    }

    #[test]
    fn availability_needs_more_than_the_minimum_window() {
        let mut store = store_with_size(2);
        store.begin_learning(LearningMode::Average);
        for _ in 0..MIN_NUMBER_OF_WINDOWS_NOISE_AVERAGED {
            store.accumulate(&[1.0, 1.0]);
            assert!(!store.is_available());
        }
        store.accumulate(&[1.0, 1.0]);
        assert!(store.is_available());
    }

    #[test]
    fn block_counter_saturates() {
        let mut store = store_with_size(1);
        store.install_snapshot(&[1.0], u32::MAX);
        store.begin_learning(LearningMode::Average);
        store.accumulate(&[1.0]);
        assert_eq!(store.blocks_averaged(), u32::MAX);
    }

    #[test]
    fn install_with_matching_size_copies() {
        let mut store = store_with_size(3);
        store.install_snapshot(&[1.0, 2.0, 3.0], 12);
        assert!(store.is_available());
        assert_eq!(store.profile(), &[1.0, 2.0, 3.0]);
        assert_eq!(store.blocks_averaged(), 12);
    }

    #[test]
    fn install_empty_resets() {
        let mut store = store_with_size(3);
        store.install_snapshot(&[1.0, 2.0, 3.0], 12);
        store.install_snapshot(&[], 0);
        assert!(!store.is_available());
        assert_eq!(store.profile(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut store = store_with_size(3);
        store.install_snapshot(&[1.0, 2.0, 3.0], 12);
        store.reset();
        let once = (store.profile().to_vec(), store.blocks_averaged(), store.is_available());
        store.reset();
        let twice = (store.profile().to_vec(), store.blocks_averaged(), store.is_available());
        assert_eq!(once, twice);
        assert_eq!(store.size(), 3);
    }

    #[test]
    fn set_size_resamples_an_available_profile() {
        let mut store = store_with_size(5);
        store.install_snapshot(&[7.0, 1.0, 2.0, 3.0, 4.0], 10);
        store.set_size(9).unwrap();
        assert_eq!(store.size(), 9);
        assert!(store.is_available());
        assert_eq!(store.profile()[0], 7.0);
        assert_eq!(store.profile()[8], 4.0);
        assert!((store.profile()[4] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn set_size_rejects_oversized_spectra() {
        let mut store = NoiseProfileStore::new();
        assert_eq!(
            store.set_size(NOISE_PROFILE_MAX_SIZE + 1),
            Err(ConfigError::SpectrumTooLarge {
                bins: NOISE_PROFILE_MAX_SIZE + 1,
                capacity: NOISE_PROFILE_MAX_SIZE,
            })
        );
    }

    #[test]
    fn snapshot_copy_reuses_capacity() {
        let mut source = ProfileSnapshot::empty();
        source.channels[0][..2].copy_from_slice(&[1.0, 2.0]);
        source.size = 2;
        source.blocks_averaged = 8;
        source.generation = 3;

        let mut destination = ProfileSnapshot::empty();
        destination.copy_from(&source);
        assert_eq!(destination.channel(0), &[1.0, 2.0]);
        assert_eq!(destination.generation, 3);
        assert_eq!(destination.channels[0].len(), NOISE_PROFILE_MAX_SIZE);
    }

    proptest! {
        #[test]
        fn resampling_keeps_dc_and_stays_within_neighbours(
            source in proptest::collection::vec(0.0f32..1000.0, 2..300),
            target in 2usize..600,
        ) {
            let mut destination = vec![0.0; target];
            resample_profile(&source, &mut destination);

            prop_assert_eq!(destination[0], source[0]);

            let step = (source.len() - 1) as f64 / (target - 1) as f64;
            for (k, &value) in destination.iter().enumerate() {
                let index = ((k as f64 * step).floor() as usize).min(source.len() - 1);
                let next = (index + 1).min(source.len() - 1);
                let low = source[index].min(source[next]);
                let high = source[index].max(source[next]);
                prop_assert!(value >= low - 1e-3 && value <= high + 1e-3);
            }
        }

        #[test]
        fn installing_a_rising_profile_at_another_size_stays_rising(
            mut source in proptest::collection::vec(0.0f32..1000.0, 2..300),
            target in 2usize..600,
        ) {
            source.sort_unstable_by(f32::total_cmp);
            let mut store = store_with_size(target);
            store.install_snapshot(&source, 10);

            let profile = store.profile();
            prop_assert_eq!(profile.len(), target);
            prop_assert_eq!(profile[0], source[0]);
            for pair in profile.windows(2) {
                prop_assert!(pair[1] >= pair[0], "{} then {}", pair[0], pair[1]);
            }
        }

        #[test]
        fn resampling_to_the_same_size_is_the_identity(
            source in proptest::collection::vec(0.0f32..1000.0, 1..300),
        ) {
            let mut destination = vec![0.0; source.len()];
            resample_profile(&source, &mut destination);
            for (a, b) in source.iter().zip(&destination) {
                prop_assert!((a - b).abs() <= 1e-3);
            }
        }
    }
}

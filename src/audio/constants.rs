/// Engine tuning constants
/// Separated from the processing code so the numbers live in one place

/// Channel topology: mono or stereo
pub const MAX_CHANNELS: usize = 2;

/// Supported processing sample rates (Hz)
pub const MIN_SAMPLE_RATE: f32 = 4000.0;
pub const MAX_SAMPLE_RATE: f32 = 192000.0;

/// Analysis frame length. 46ms keeps a ~22Hz bin spacing at 44.1kHz
pub const FRAME_SIZE_MS: f32 = 46.0;

/// Number of overlapping frames covering every sample (75% overlap)
pub const OVERLAP_FACTOR: usize = 4;

/// Smallest FFT the spectral transform will plan
pub const MIN_FFT_SIZE: usize = 32;

/// Per-channel profile capacity in bins. A 16384-point FFT (192kHz at 46ms)
/// needs 8193 bins, so every supported sample rate fits.
pub const NOISE_PROFILE_MAX_SIZE: usize = 9000;

/// A learned profile is only trusted after more frames than this
pub const MIN_NUMBER_OF_WINDOWS_NOISE_AVERAGED: u32 = 5;

/// First step of the median learning tracker in natural log power, later frames move it
/// by this divided by the frame count
pub const MEDIAN_LOG_STEP: f32 = 2.0;

/// Soft bypass crossfade duration
pub const BYPASS_CROSSFADE_MS: f32 = 50.0;

/// Guards divisions by (near) silent bins
pub const SPECTRAL_EPSILON: f32 = 1e-12;

/// Berouti oversubtraction: alpha at 0dB SNR, and the clamp range
pub const OVERSUBTRACTION_AT_0DB: f32 = 4.0;
pub const OVERSUBTRACTION_MIN: f32 = 1.0;
pub const OVERSUBTRACTION_MAX: f32 = 4.75;
/// Slope of alpha against SNR in dB (alpha drops by 3 over 20dB)
pub const OVERSUBTRACTION_SLOPE: f32 = 3.0 / 20.0;

/// Temporal gain smoothing never fully freezes the gains
pub const MAX_GAIN_SMOOTHING: f32 = 0.98;

/// Transient detection on normalised spectral flux
pub const TRANSIENT_MIN_FLUX_RATIO: f32 = 0.5;
pub const TRANSIENT_FLUX_MULTIPLIER: f32 = 2.5;
pub const TRANSIENT_FLUX_AVERAGING: f32 = 0.9;

/// Post filter: how far below the threshold (dB) reaches the widest smoothing
pub const POST_FILTER_DB_RANGE: f32 = 20.0;
/// Post filter: largest half width of the frequency smoothing kernel (bins)
pub const POST_FILTER_MAX_HALF_WIDTH: usize = 7;

/// Upper band edges (Hz) of the Bark critical bands. The last band extends
/// to Nyquist.
pub const BARK_BAND_EDGES_HZ: &[f32] = &[
    100.0, 200.0, 300.0, 400.0, 510.0, 630.0, 770.0, 920.0, 1080.0, 1270.0, 1480.0, 1720.0,
    2000.0, 2320.0, 2700.0, 3150.0, 3700.0, 4400.0, 5300.0, 6400.0, 7700.0, 9500.0, 12000.0,
    15500.0,
];

/// Number of critical bands, including the open-ended top band
pub const CRITICAL_BAND_COUNT: usize = 25;

// === HELPER FUNCTIONS ===

/// Convert decibels to a linear amplitude factor
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert decibels to a linear power factor
pub fn db_to_power(db: f32) -> f32 {
    10.0_f32.powf(db / 10.0)
}

/// Convert a linear power ratio to decibels, flooring silence
pub fn power_to_db(power: f32) -> f32 {
    10.0 * power.max(SPECTRAL_EPSILON).log10()
}

/// Analysis frame length in samples for a sample rate, rounded down to a
/// multiple of the overlap factor so the hop divides the frame exactly
pub fn frame_size_for_sample_rate(sample_rate: f32) -> usize {
    let samples = (sample_rate * FRAME_SIZE_MS / 1000.0) as usize;
    samples - samples % OVERLAP_FACTOR
}

/// Critical band index (0-based) of a frequency
pub fn critical_band_of(frequency_hz: f32) -> usize {
    BARK_BAND_EDGES_HZ
        .iter()
        .position(|&edge| frequency_hz < edge)
        .unwrap_or(CRITICAL_BAND_COUNT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_is_a_multiple_of_the_overlap() {
        for rate in [44100.0, 48000.0, 88200.0, 96000.0, 192000.0] {
            let frame = frame_size_for_sample_rate(rate);
            assert_eq!(frame % OVERLAP_FACTOR, 0);
            assert!(frame > 0);
        }
        assert_eq!(frame_size_for_sample_rate(48000.0), 2208);
        assert_eq!(frame_size_for_sample_rate(44100.0), 2028);
    }

    #[test]
    fn critical_bands_cover_the_spectrum() {
        assert_eq!(critical_band_of(0.0), 0);
        assert_eq!(critical_band_of(150.0), 1);
        assert_eq!(critical_band_of(20000.0), CRITICAL_BAND_COUNT - 1);
        assert_eq!(BARK_BAND_EDGES_HZ.len() + 1, CRITICAL_BAND_COUNT);
    }

    #[test]
    fn decibel_helpers() {
        assert!((db_to_gain(-20.0) - 0.1).abs() < 1e-6);
        assert!((db_to_power(10.0) - 10.0).abs() < 1e-5);
        assert!((power_to_db(100.0) - 20.0).abs() < 1e-5);
    }
}

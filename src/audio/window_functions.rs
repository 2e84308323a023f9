/// Window functions for STFT analysis and resynthesis
///
/// Frames are windowed twice: once before the forward FFT (analysis) and once after the
/// inverse FFT (synthesis). With overlapping frames the squared windows add up to a constant,
/// which the overlap-add output is divided by.
use core::f32::consts::PI;
use libm::cosf;

/// Generates periodic Hann window coefficients
///
/// Hann formula: w[n] = 0.5 * (1 - cos(2πn/N)) where n=[0..N-1]
///
/// The periodic form (dividing by N, not N-1) is the one that overlaps perfectly: at 4x
/// overlap the sum of w² over all frames covering a sample is exactly 1.5.
pub fn generate_hann_window(window_size: usize) -> Vec<f32> {
    let window_size_f32 = window_size as f32;

    (0..window_size)
        .map(|i| {
            let position = i as f32 / window_size_f32;
            0.5 * (1.0 - cosf(2.0 * PI * position))
        })
        .collect()
}

/// Sum of `analysis * synthesis` over the frames overlapping one sample.
///
/// Overlap-add output has to be divided by this to get unity gain. The value is the same for
/// every sample only when the window pair satisfies the constant overlap-add condition, which
/// a periodic Hann pair does from 3x overlap up.
pub fn overlap_add_normalisation(analysis: &[f32], synthesis: &[f32], hop: usize) -> f32 {
    if hop == 0 || analysis.len() < hop {
        return 1.0;
    }

    // Averaged over one hop so a window that is zero at a frame boundary still measures right
    let overlapping_frames = analysis.len() / hop;
    let total: f32 = (0..hop)
        .flat_map(|offset| (0..overlapping_frames).map(move |frame| frame * hop + offset))
        .map(|i| analysis[i] * synthesis[i])
        .sum();

    total / hop as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_is_periodic() {
        let window = generate_hann_window(8);
        assert_eq!(window[0], 0.0);
        assert!((window[4] - 1.0).abs() < 1e-6);
        assert!((window[2] - window[6]).abs() < 1e-6);
    }

    #[test]
    fn squared_hann_overlaps_to_one_and_a_half() {
        let window = generate_hann_window(2048);
        let hop = 512;
        let normalisation = overlap_add_normalisation(&window, &window, hop);
        assert!((normalisation - 1.5).abs() < 1e-4);

        for offset in [0, 1, 100, 511] {
            let sum: f32 = (0..4)
                .map(|frame| window[frame * hop + offset].powi(2))
                .sum();
            assert!((sum - 1.5).abs() < 1e-4, "offset {}", offset);
        }
    }
}

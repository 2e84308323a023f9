use crate::audio::constants::MIN_FFT_SIZE;
use crate::audio::error::ConfigError;
use realfft::{num_complex::Complex32, ComplexToReal, FftError, RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Fixed-size real FFT with centered zero padding.
///
/// A frame shorter than the FFT is placed in the middle of the time buffer, so the padding is
/// split evenly on both sides. Every buffer is allocated in [`SpectralTransform::new()`];
/// the transforms themselves never allocate.
pub struct SpectralTransform {
    forward: Arc<dyn RealToComplex<f32>>,
    backward: Arc<dyn ComplexToReal<f32>>,

    // Buffers
    time_buffer: Vec<f32>,       // fft_size samples
    spectrum: Vec<Complex32>,    // fft_size / 2 + 1 bins
    forward_scratch: Vec<Complex32>,
    backward_scratch: Vec<Complex32>,

    frame_size: usize,
    fft_size: usize,
    copy_position: usize,
}

impl SpectralTransform {
    pub fn new(frame_size: usize) -> Result<Self, ConfigError> {
        if frame_size == 0 {
            return Err(ConfigError::EmptyFrame);
        }

        let fft_size = frame_size.next_power_of_two().max(MIN_FFT_SIZE);
        let copy_position = (fft_size - frame_size) / 2;

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let backward = planner.plan_fft_inverse(fft_size);

        let forward_scratch = forward.make_scratch_vec();
        let backward_scratch = backward.make_scratch_vec();
        let spectrum = forward.make_output_vec();

        Ok(Self {
            forward,
            backward,
            time_buffer: vec![0.0; fft_size],
            spectrum,
            forward_scratch,
            backward_scratch,
            frame_size,
            fft_size,
            copy_position,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins in the real half spectrum
    pub fn spectrum_size(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Offset of the frame inside the zero padded time buffer
    pub fn copy_position(&self) -> usize {
        self.copy_position
    }

    /// Zero the time buffer and copy a frame into its centered region. Extra samples are
    /// ignored, missing ones stay zero.
    pub fn load_input(&mut self, samples: &[f32]) {
        self.time_buffer.fill(0.0);

        let count = samples.len().min(self.frame_size);
        let start = self.copy_position;
        self.time_buffer[start..start + count].copy_from_slice(&samples[..count]);
    }

    /// Copy the centered region of the time buffer out
    pub fn get_output(&self, output: &mut [f32]) {
        let count = output.len().min(self.frame_size);
        let start = self.copy_position;
        output[..count].copy_from_slice(&self.time_buffer[start..start + count]);
    }

    /// Time buffer to spectrum. The time buffer is used as scratch space and must be reloaded
    /// before the next forward transform.
    pub fn compute_forward(&mut self) -> Result<(), FftError> {
        self.forward.process_with_scratch(
            &mut self.time_buffer,
            &mut self.spectrum,
            &mut self.forward_scratch,
        )
    }

    /// Spectrum to time buffer, normalised so a forward/backward pair is the identity. The
    /// spectrum is consumed in the process.
    pub fn compute_backward(&mut self) -> Result<(), FftError> {
        // A real signal has no imaginary DC or Nyquist component
        if let Some(dc) = self.spectrum.first_mut() {
            dc.im = 0.0;
        }
        if let Some(nyquist) = self.spectrum.last_mut() {
            nyquist.im = 0.0;
        }

        self.backward.process_with_scratch(
            &mut self.spectrum,
            &mut self.time_buffer,
            &mut self.backward_scratch,
        )?;

        let normalisation = 1.0 / self.fft_size as f32;
        for sample in &mut self.time_buffer {
            *sample *= normalisation;
        }

        Ok(())
    }

    pub fn spectrum(&self) -> &[Complex32] {
        &self.spectrum
    }

    pub fn spectrum_mut(&mut self) -> &mut [Complex32] {
        &mut self.spectrum
    }
}

use crate::audio::constants::OVERLAP_FACTOR;
use crate::audio::error::ConfigError;
use crate::audio::fft_engine::SpectralTransform;
use crate::audio::window_functions::{generate_hann_window, overlap_add_normalisation};
use realfft::num_complex::Complex32;

/// Streaming short-time Fourier transform with 4x overlap-add.
///
/// Samples go in one at a time and come out one at a time, `frame_size` samples later. Every
/// `hop` samples a frame is analysed and its spectrum handed to a callback that may modify
/// it in place before resynthesis.
pub struct StftProcessor {
    transform: SpectralTransform,
    analysis_window: Vec<f32>,
    synthesis_window: Vec<f32>,
    /// Output scale that undoes the summed window overlap
    output_scale: f32,

    input_fifo: Vec<f32>,
    output_fifo: Vec<f32>,
    accumulator: Vec<f32>,
    frame: Vec<f32>,
    power: Vec<f32>,

    frame_size: usize,
    hop: usize,
    position: usize,
}

impl StftProcessor {
    pub fn new(frame_size: usize) -> Result<Self, ConfigError> {
        let hop = frame_size / OVERLAP_FACTOR;
        if hop == 0 {
            return Err(ConfigError::EmptyFrame);
        }

        let transform = SpectralTransform::new(frame_size)?;
        let analysis_window = generate_hann_window(frame_size);
        let synthesis_window = generate_hann_window(frame_size);
        let output_scale = 1.0 / overlap_add_normalisation(&analysis_window, &synthesis_window, hop);
        let spectrum_size = transform.spectrum_size();

        Ok(Self {
            transform,
            analysis_window,
            synthesis_window,
            output_scale,
            input_fifo: vec![0.0; frame_size],
            output_fifo: vec![0.0; hop],
            accumulator: vec![0.0; frame_size],
            frame: vec![0.0; frame_size],
            power: vec![0.0; spectrum_size],
            frame_size,
            hop,
            position: 0,
        })
    }

    /// Delay between a sample going in and the same sample coming out
    pub fn latency(&self) -> usize {
        self.frame_size
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn fft_size(&self) -> usize {
        self.transform.fft_size()
    }

    pub fn spectrum_size(&self) -> usize {
        self.transform.spectrum_size()
    }

    /// Clear every buffered sample, as if the processor was just created
    pub fn reset(&mut self) {
        self.input_fifo.fill(0.0);
        self.output_fifo.fill(0.0);
        self.accumulator.fill(0.0);
        self.position = 0;
    }

    /// Push one sample and pull the sample that is `latency()` samples old.
    ///
    /// `on_frame` receives the frame's spectrum and its power spectrum whenever a hop is
    /// complete. Bins it leaves untouched are resynthesised unchanged.
    pub fn process_sample<F>(&mut self, input: f32, on_frame: F) -> f32
    where
        F: FnMut(&mut [Complex32], &[f32]),
    {
        self.input_fifo[self.frame_size - self.hop + self.position] = input;
        let output = self.output_fifo[self.position];

        self.position += 1;
        if self.position == self.hop {
            self.process_frame(on_frame);
            self.position = 0;
        }

        output
    }

    fn process_frame<F>(&mut self, mut on_frame: F)
    where
        F: FnMut(&mut [Complex32], &[f32]),
    {
        for ((windowed, &sample), &window) in self
            .frame
            .iter_mut()
            .zip(&self.input_fifo)
            .zip(&self.analysis_window)
        {
            *windowed = sample * window;
        }

        self.transform.load_input(&self.frame);
        let resynthesised = match self.transform.compute_forward() {
            Ok(()) => {
                let spectrum = self.transform.spectrum_mut();
                for (power, bin) in self.power.iter_mut().zip(spectrum.iter()) {
                    *power = bin.norm_sqr();
                }
                on_frame(spectrum, &self.power);

                self.transform.compute_backward().is_ok()
            }
            Err(_) => false,
        };

        if resynthesised {
            self.transform.get_output(&mut self.frame);
        } else {
            // Let the windowed input through untouched rather than dropping the frame
            for ((windowed, &sample), &window) in self
                .frame
                .iter_mut()
                .zip(&self.input_fifo)
                .zip(&self.analysis_window)
            {
                *windowed = sample * window;
            }
        }

        for ((accumulated, &sample), &window) in self
            .accumulator
            .iter_mut()
            .zip(&self.frame)
            .zip(&self.synthesis_window)
        {
            *accumulated += sample * window * self.output_scale;
        }

        // The first hop of the accumulator has now seen every frame it belongs to
        let hop = self.hop;
        self.output_fifo.copy_from_slice(&self.accumulator[..hop]);
        self.accumulator.copy_within(hop.., 0);
        let tail = self.frame_size - hop;
        self.accumulator[tail..].fill(0.0);
        self.input_fifo.copy_within(hop.., 0);
    }
}

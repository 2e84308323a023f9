use crate::audio::constants::{
    frame_size_for_sample_rate, MAX_CHANNELS, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE,
    NOISE_PROFILE_MAX_SIZE,
};
use crate::audio::control::{DenoiserControls, DenoisingParameters, LearningMode};
use crate::audio::error::ConfigError;
use crate::audio::noise_profile::{NoiseProfileStore, ProfileSnapshot};
use crate::audio::soft_bypass::SoftBypass;
use crate::audio::spectral_gain::SpectralGainEstimator;
use crate::audio::state::StateHandle;
use crate::audio::stft_processor::StftProcessor;
use crate::audio::triple_buffer::{ConsumerHandle, ProducerHandle, TripleBuffer};
use realfft::num_complex::Complex32;
use std::sync::Arc;

/// Create an engine and the control thread handle that talks to it.
///
/// `channel_count` is the layout the saved state is written for until the next activation.
pub fn create_engine(channel_count: usize) -> (AudioEngine, StateHandle) {
    let controls = Arc::new(DenoiserControls::default());
    let (pending_producer, pending_consumer) =
        TripleBuffer::new(&ProfileSnapshot::empty()).split();
    let (learned_producer, learned_consumer) =
        TripleBuffer::new(&ProfileSnapshot::empty()).split();

    let engine = AudioEngine {
        controls: controls.clone(),
        pending: pending_consumer,
        learned: learned_producer,
        profiles: (0..MAX_CHANNELS).map(|_| NoiseProfileStore::new()).collect(),
        channels: Vec::new(),
        bypass: None,
        sample_rate: 0.0,
        latency: 0,
        applied_generation: 0,
    };
    let state = StateHandle::new(controls, pending_producer, learned_consumer, channel_count);

    (engine, state)
}

/// The STFT and gain estimation state of one channel
struct ChannelProcessor {
    stft: StftProcessor,
    gains: SpectralGainEstimator,
}

/// The audio thread end of the denoiser.
///
/// Nothing in [`AudioEngine::process()`] and [`AudioEngine::reset()`] allocates, locks or
/// logs. Everything that does happens in [`AudioEngine::activate()`].
pub struct AudioEngine {
    controls: Arc<DenoiserControls>,
    pending: ConsumerHandle<ProfileSnapshot>,
    learned: ProducerHandle<ProfileSnapshot>,

    /// One per possible channel, kept across activations so a learned profile survives a
    /// sample rate change
    profiles: Vec<NoiseProfileStore>,
    channels: Vec<ChannelProcessor>,
    bypass: Option<SoftBypass>,

    sample_rate: f32,
    latency: usize,
    /// Generation of the last control side update applied to `profiles`
    applied_generation: u64,
}

impl AudioEngine {
    pub fn controls(&self) -> &Arc<DenoiserControls> {
        &self.controls
    }

    pub fn is_active(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Processing latency in samples, 0 before the first activation
    pub fn latency(&self) -> usize {
        self.latency
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether the profile the engine currently works with is usable
    pub fn has_noise_profile(&self) -> bool {
        self.profiles[0].is_available()
    }

    /// Build everything for a sample rate and channel count. On error the engine is left
    /// exactly as it was.
    pub fn activate(&mut self, sample_rate: f32, channel_count: usize) -> Result<(), ConfigError> {
        if !sample_rate.is_finite() || !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate)
        {
            return Err(ConfigError::UnsupportedSampleRate {
                sample_rate,
                min: MIN_SAMPLE_RATE,
                max: MAX_SAMPLE_RATE,
            });
        }
        if channel_count == 0 || channel_count > MAX_CHANNELS {
            return Err(ConfigError::UnsupportedChannelCount {
                channels: channel_count,
                max: MAX_CHANNELS,
            });
        }

        let frame_size = frame_size_for_sample_rate(sample_rate);
        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            let stft = StftProcessor::new(frame_size)?;
            let gains = SpectralGainEstimator::new(sample_rate, stft.fft_size());
            channels.push(ChannelProcessor { stft, gains });
        }

        let bins = channels[0].stft.spectrum_size();
        if bins > NOISE_PROFILE_MAX_SIZE {
            return Err(ConfigError::SpectrumTooLarge {
                bins,
                capacity: NOISE_PROFILE_MAX_SIZE,
            });
        }
        let latency = channels[0].stft.latency();
        let bypass = SoftBypass::new(
            sample_rate,
            latency,
            channel_count,
            self.controls.enable.get(),
        );

        // Nothing below can fail
        for profile in &mut self.profiles {
            profile.set_size(bins)?;
        }
        self.channels = channels;
        self.bypass = Some(bypass);
        self.sample_rate = sample_rate;
        self.latency = latency;

        self.apply_pending_update();
        if self.has_noise_profile() {
            self.publish_profile();
        }

        Ok(())
    }

    /// Release the processing buffers. The noise profile and the reported latency are kept.
    pub fn deactivate(&mut self) {
        self.channels.clear();
        self.bypass = None;
    }

    /// Clear all buffered audio and smoothing history. The noise profile is kept.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.stft.reset();
            channel.gains.reset();
        }
        if let Some(bypass) = &mut self.bypass {
            bypass.reset(self.controls.enable.get());
        }
    }

    /// Denoise one block in place. Returns whether a new profile snapshot was published for
    /// the control thread.
    ///
    /// Buffers beyond the activated channel count are left untouched, as is everything when
    /// the engine is not active.
    pub fn process(&mut self, buffers: &mut [&mut [f32]]) -> bool {
        if !self.is_active() {
            return false;
        }

        let mut profile_changed = self.apply_pending_update();

        let params = self.controls.snapshot();
        if self.controls.reset_profile.take_trigger() {
            for profile in &mut self.profiles {
                profile.reset();
            }
            profile_changed = true;
        }
        for profile in &mut self.profiles {
            profile.begin_learning(params.learning_mode);
        }

        let channel_count = buffers.len().min(self.channels.len());
        let block_size = buffers[..channel_count]
            .iter()
            .map(|buffer| buffer.len())
            .min()
            .unwrap_or(0);

        let mut dry = [0.0f32; MAX_CHANNELS];
        let mut wet = [0.0f32; MAX_CHANNELS];
        for sample_idx in 0..block_size {
            for (channel_idx, (channel, profile)) in self
                .channels
                .iter_mut()
                .zip(self.profiles.iter_mut())
                .take(channel_count)
                .enumerate()
            {
                let input = buffers[channel_idx][sample_idx];
                dry[channel_idx] = input;
                wet[channel_idx] = channel.stft.process_sample(input, |spectrum, power| {
                    denoise_frame(&mut channel.gains, profile, &params, spectrum, power)
                });
            }

            if let Some(bypass) = &mut self.bypass {
                bypass.process(
                    &dry[..channel_count],
                    &mut wet[..channel_count],
                    params.enable,
                );
            }

            for (buffer, &output) in buffers.iter_mut().zip(&wet[..channel_count]) {
                buffer[sample_idx] = output;
            }
        }

        if params.learning_mode != LearningMode::Off && self.has_noise_profile() {
            profile_changed = true;
        }
        if profile_changed {
            self.publish_profile();
        }

        profile_changed
    }

    /// Install the newest control side update, if there is one
    fn apply_pending_update(&mut self) -> bool {
        let (fresh, update) = self.pending.try_consume();
        if !fresh {
            return false;
        }

        for (channel_idx, profile) in self.profiles.iter_mut().enumerate() {
            if update.is_available() {
                profile.install_snapshot(update.channel(channel_idx), update.blocks_averaged);
            } else {
                profile.reset();
            }
        }
        self.applied_generation = update.generation;

        true
    }

    fn publish_profile(&mut self) {
        let snapshot = self.learned.write();
        snapshot.generation = self.applied_generation;

        let first = &self.profiles[0];
        if !first.is_available() {
            snapshot.clear();
        } else {
            let size = first.size();
            for (destination, profile) in snapshot.channels.iter_mut().zip(&self.profiles) {
                destination[..size].copy_from_slice(profile.profile());
            }
            snapshot.size = size;
            snapshot.blocks_averaged = first.blocks_averaged();
        }

        self.learned.publish();
    }
}

/// Gains from the noise profile onto one frame, then the frame into the profile when learning
fn denoise_frame(
    gains: &mut SpectralGainEstimator,
    profile: &mut NoiseProfileStore,
    params: &DenoisingParameters,
    spectrum: &mut [Complex32],
    power: &[f32],
) {
    if profile.is_available() {
        let frame_gains = gains.compute(power, profile.profile(), params);
        for (bin, &gain) in spectrum.iter_mut().zip(frame_gains) {
            *bin *= if params.residual_listen { 1.0 - gain } else { gain };
        }
    } else {
        // Keeps the transient history going, the gains are unity
        gains.compute(power, &[], params);
    }

    if params.learning_mode != LearningMode::Off {
        profile.accumulate(power);
    }
}

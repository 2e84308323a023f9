pub mod audio;

use audio::audio_engine::{create_engine, AudioEngine};
use audio::constants::MAX_CHANNELS;
use audio::control::{LearningMode, NoiseScalingType, ParameterId};
use audio::state::StateHandle;
use nih_plug::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub struct NoiseRepellent {
    params: Arc<NoiseRepellentParams>,
    engine: AudioEngine,
    /// Control thread end of the engine. Never locked from the audio thread.
    state: Arc<Mutex<StateHandle>>,

    /// Set while a state capture is queued, so the audio thread doesn't flood the task queue
    capture_pending: Arc<AtomicBool>,
    /// Hash of the state blob we wrote or loaded last, to tell a host restore apart from our
    /// own capture
    state_hash: Arc<AtomicU64>,
    /// Previous value of the reset button, the profile is reset on its rising edge
    reset_was_pressed: bool,
}

/// Work the audio thread hands off to the background thread
pub enum Task {
    /// Serialise the engine state into the persisted field
    CaptureState,
}

#[derive(Params)]
pub struct NoiseRepellentParams {
    /// The engine's own state payload (parameters and noise profile). The host saves it along
    /// with the parameters below.
    #[persist = "denoiser-state"]
    pub denoiser_state: Arc<RwLock<Vec<u8>>>,

    #[id = "amount"]
    pub amount: FloatParam,
    #[id = "strength"]
    pub strength: FloatParam,
    #[id = "smoothing"]
    pub smoothing: FloatParam,
    #[id = "whitening"]
    pub whitening: FloatParam,
    #[id = "transient"]
    pub transient_protection: BoolParam,
    #[id = "learn"]
    pub learn_noise: EnumParam<LearningMode>,
    #[id = "residual"]
    pub residual_listen: BoolParam,
    #[id = "reset"]
    pub reset_profile: BoolParam,
    #[id = "enable"]
    pub enable: BoolParam,
    #[id = "scaling"]
    pub noise_scaling_type: EnumParam<NoiseScalingType>,
    #[id = "postfilter"]
    pub post_filter_threshold: FloatParam,
}

impl Default for NoiseRepellent {
    fn default() -> Self {
        let (engine, state) = create_engine(MAX_CHANNELS);

        Self {
            params: Arc::new(NoiseRepellentParams::default()),
            engine,
            state: Arc::new(Mutex::new(state)),
            capture_pending: Arc::new(AtomicBool::new(false)),
            state_hash: Arc::new(AtomicU64::new(0)),
            reset_was_pressed: false,
        }
    }
}

fn float_param(id: ParameterId, unit: &'static str) -> FloatParam {
    let info = id.info();
    FloatParam::new(
        info.name,
        info.default as f32,
        FloatRange::Linear {
            min: info.min as f32,
            max: info.max as f32,
        },
    )
    .with_unit(unit)
    .with_step_size(0.1)
    .with_value_to_string(formatters::v2s_f32_rounded(1))
}

fn bool_param(id: ParameterId, on: &'static str, off: &'static str) -> BoolParam {
    let info = id.info();
    BoolParam::new(info.name, info.default >= 0.5)
        .with_value_to_string(Arc::new(move |value| (if value { on } else { off }).to_string()))
}

impl Default for NoiseRepellentParams {
    fn default() -> Self {
        Self {
            denoiser_state: Arc::new(RwLock::new(Vec::new())),

            amount: float_param(ParameterId::ReductionAmount, " dB"),
            strength: float_param(ParameterId::ReductionStrength, " dB"),
            smoothing: float_param(ParameterId::Smoothing, " %"),
            whitening: float_param(ParameterId::Whitening, " %"),
            transient_protection: bool_param(ParameterId::TransientProtection, "On", "Off"),
            learn_noise: EnumParam::new(ParameterId::LearnNoise.info().name, LearningMode::Off),
            residual_listen: bool_param(ParameterId::ResidualListen, "Residual", "Output"),
            // Momentary button, not automatable
            reset_profile: bool_param(ParameterId::ResetProfile, "Reset", "Normal")
                .hide_in_generic_ui()
                .non_automatable(),
            enable: bool_param(ParameterId::Enable, "Enabled", "Bypassed"),
            noise_scaling_type: EnumParam::new(
                ParameterId::NoiseScalingType.info().name,
                NoiseScalingType::APosterioriSnr,
            ),
            post_filter_threshold: float_param(ParameterId::PostFilterThreshold, " dB"),
        }
    }
}

impl NoiseRepellent {
    /// Copy the host parameter values into the engine's atomic controls
    fn sync_controls(&mut self) {
        let controls = self.engine.controls();
        controls.reduction_amount.set(self.params.amount.value());
        controls.reduction_strength.set(self.params.strength.value());
        controls.smoothing.set(self.params.smoothing.value());
        controls.whitening.set(self.params.whitening.value());
        controls
            .transient_protection
            .set(self.params.transient_protection.value());
        controls.learn_noise.set(self.params.learn_noise.value());
        controls
            .residual_listen
            .set(self.params.residual_listen.value());
        controls.enable.set(self.params.enable.value());
        controls
            .noise_scaling_type
            .set(self.params.noise_scaling_type.value());
        controls
            .post_filter_threshold
            .set(self.params.post_filter_threshold.value());

        let reset_pressed = self.params.reset_profile.value();
        if reset_pressed && !self.reset_was_pressed {
            controls.reset_profile.set(true);
        }
        self.reset_was_pressed = reset_pressed;
    }

    /// Feed a state blob restored by the host into the engine. Blobs we captured ourselves
    /// are skipped, the engine already has a newer profile than those.
    fn restore_persisted_state(&self, channel_count: usize) {
        let Ok(mut state) = self.state.lock() else {
            nih_plug::nih_error!("Denoiser state handle is poisoned");
            return;
        };
        state.set_channel_count(channel_count);

        let Ok(blob) = self.params.denoiser_state.read() else {
            return;
        };
        if blob.is_empty() {
            return;
        }

        let hash = blob_hash(&blob);
        if hash == self.state_hash.load(Ordering::Acquire) {
            return;
        }

        if state.load_state(&mut blob.as_slice()) {
            nih_plug::nih_log!("Restored denoiser state ({} bytes)", blob.len());
        }
        self.state_hash.store(hash, Ordering::Release);
    }
}

/// Serialise the engine state into the persisted parameter field
fn capture_state(
    state: &Mutex<StateHandle>,
    persisted: &RwLock<Vec<u8>>,
    state_hash: &AtomicU64,
) {
    let Ok(mut state) = state.lock() else {
        nih_plug::nih_error!("Denoiser state handle is poisoned");
        return;
    };

    let mut blob = Vec::new();
    if !state.save_state(&mut blob) {
        return;
    }

    let hash = blob_hash(&blob);
    if let Ok(mut persisted) = persisted.write() {
        *persisted = blob;
        state_hash.store(hash, Ordering::Release);
    }
}

fn blob_hash(blob: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    blob.hash(&mut hasher);
    hasher.finish()
}

impl Plugin for NoiseRepellent {
    const NAME: &'static str = "Noise Repellent";
    const VENDOR: &'static str = "Cmdv";
    const URL: &'static str = env!("CARGO_PKG_HOMEPAGE");
    const EMAIL: &'static str = "info@cmdv.me";

    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    // The first audio IO layout is used as the default. Every channel gets its own STFT and
    // noise profile.
    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),

            aux_input_ports: &[],
            aux_output_ports: &[],

            names: PortNames::const_default(),
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const MIDI_OUTPUT: MidiConfig = MidiConfig::None;

    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    // State captures run here so the audio thread never serialises anything
    type BackgroundTask = Task;

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn task_executor(&mut self) -> TaskExecutor<Self> {
        let state = self.state.clone();
        let params = self.params.clone();
        let capture_pending = self.capture_pending.clone();
        let state_hash = self.state_hash.clone();

        Box::new(move |task| match task {
            Task::CaptureState => {
                capture_pending.store(false, Ordering::Release);
                capture_state(&state, &params.denoiser_state, &state_hash);
            }
        })
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        let channel_count = audio_io_layout
            .main_output_channels
            .map(NonZeroU32::get)
            .unwrap_or(2) as usize;

        nih_plug::nih_log!(
            "Plugin initialize called, sample_rate: {}, channels: {}",
            buffer_config.sample_rate,
            channel_count
        );

        self.sync_controls();
        self.restore_persisted_state(channel_count);

        match self.engine.activate(buffer_config.sample_rate, channel_count) {
            Ok(()) => {
                context.set_latency_samples(self.engine.latency() as u32);
                nih_plug::nih_log!(
                    "Denoiser active, latency: {} samples",
                    self.engine.latency()
                );
                true
            }
            Err(err) => {
                nih_plug::nih_error!("Could not activate the denoiser: {}", err);
                false
            }
        }
    }

    fn reset(&mut self) {
        // Called from the audio thread, so this may not allocate
        self.engine.reset();
    }

    fn deactivate(&mut self) {
        self.engine.deactivate();
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        self.sync_controls();

        let published = self.engine.process(buffer.as_slice());
        if published && !self.capture_pending.swap(true, Ordering::AcqRel) {
            context.execute_background(Task::CaptureState);
        }

        ProcessStatus::Normal
    }
}

impl ClapPlugin for NoiseRepellent {
    const CLAP_ID: &'static str = "me.cmdv.noise-repellent";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Adaptive spectral noise reduction with a learned noise profile");
    const CLAP_MANUAL_URL: Option<&'static str> = Some(Self::URL);
    const CLAP_SUPPORT_URL: Option<&'static str> = None;

    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Stereo,
        ClapFeature::Mono,
        ClapFeature::Restoration,
    ];
}

impl Vst3Plugin for NoiseRepellent {
    const VST3_CLASS_ID: [u8; 16] = *b"NoiseRepellentNR";

    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Fx, Vst3SubCategory::Restoration];
}

nih_export_clap!(NoiseRepellent);
nih_export_vst3!(NoiseRepellent);

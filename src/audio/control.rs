//! Atomic control values shared between the control thread and the audio thread.
//!
//! Every parameter is an individual atomic scalar. The audio thread reads them once per block
//! into a plain [`DenoisingParameters`] value, so a block never sees a half-applied change of a
//! single parameter.

use atomic_float::AtomicF32;
use nih_plug::prelude::Enum;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A value that can live in a lock-free atomic cell
pub trait ControlValue: Copy + Send + Sync + 'static {
    type Storage: Send + Sync;

    fn new_storage(value: Self) -> Self::Storage;
    fn load(storage: &Self::Storage) -> Self;
    fn store(storage: &Self::Storage, value: Self);
}

impl ControlValue for f32 {
    type Storage = AtomicF32;

    fn new_storage(value: Self) -> Self::Storage {
        AtomicF32::new(value)
    }

    fn load(storage: &Self::Storage) -> Self {
        storage.load(Ordering::Relaxed)
    }

    fn store(storage: &Self::Storage, value: Self) {
        storage.store(value, Ordering::Relaxed)
    }
}

impl ControlValue for bool {
    type Storage = AtomicBool;

    fn new_storage(value: Self) -> Self::Storage {
        AtomicBool::new(value)
    }

    fn load(storage: &Self::Storage) -> Self {
        storage.load(Ordering::Relaxed)
    }

    fn store(storage: &Self::Storage, value: Self) {
        storage.store(value, Ordering::Relaxed)
    }
}

impl ControlValue for u32 {
    type Storage = AtomicU32;

    fn new_storage(value: Self) -> Self::Storage {
        AtomicU32::new(value)
    }

    fn load(storage: &Self::Storage) -> Self {
        storage.load(Ordering::Relaxed)
    }

    fn store(storage: &Self::Storage, value: Self) {
        storage.store(value, Ordering::Relaxed)
    }
}

/// Stores an [`Enum`] by its variant index. Out of range indices clamp to the last variant.
macro_rules! enum_control_value {
    ($ty:ty) => {
        impl ControlValue for $ty {
            type Storage = AtomicU32;

            fn new_storage(value: Self) -> Self::Storage {
                AtomicU32::new(value.to_index() as u32)
            }

            fn load(storage: &Self::Storage) -> Self {
                let last = <$ty as Enum>::variants().len() - 1;
                <$ty as Enum>::from_index((storage.load(Ordering::Relaxed) as usize).min(last))
            }

            fn store(storage: &Self::Storage, value: Self) {
                storage.store(value.to_index() as u32, Ordering::Relaxed)
            }
        }
    };
}

/// How the noise profile is refined while learning
#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningMode {
    #[id = "off"]
    #[name = "Not Learning"]
    Off,
    #[id = "average"]
    #[name = "Learning: Average"]
    Average,
    #[id = "median"]
    #[name = "Learning: Median"]
    Median,
    #[id = "maximum"]
    #[name = "Learning: Maximum"]
    Maximum,
}

/// Strategy used to scale the noise profile against the signal before subtraction
#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseScalingType {
    #[id = "a-posteriori-snr"]
    #[name = "A-posteriori SNR"]
    APosterioriSnr,
    #[id = "critical-bands"]
    #[name = "Critical Bands"]
    CriticalBands,
    #[id = "masking-thresholds"]
    #[name = "Masking Thresholds"]
    MaskingThresholds,
}

enum_control_value!(LearningMode);
enum_control_value!(NoiseScalingType);

/// One parameter: an atomic cell plus the value it resets to
pub struct ControlParameter<T: ControlValue> {
    value: T::Storage,
    default: T,
}

impl<T: ControlValue> ControlParameter<T> {
    pub fn new(default: T) -> Self {
        Self {
            value: T::new_storage(default),
            default,
        }
    }

    pub fn get(&self) -> T {
        T::load(&self.value)
    }

    pub fn set(&self, value: T) {
        T::store(&self.value, value)
    }

    pub fn default_value(&self) -> T {
        self.default
    }

    pub fn reset_to_default(&self) {
        self.set(self.default)
    }
}

impl ControlParameter<bool> {
    /// Read and clear a one-shot flag in a single atomic step
    pub fn take_trigger(&self) -> bool {
        self.value.swap(false, Ordering::Relaxed)
    }
}

/// How incoming raw values are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// Clamped into range
    Continuous,
    /// Rounded to the nearest step, then clamped
    Stepped,
    /// `value >= 0.5`
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterInfo {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub kind: ParameterKind,
}

/// Stable parameter ids. These are written into saved state, so they never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ParameterId {
    ReductionAmount = 238,
    ReductionStrength = 1923048,
    Smoothing = 349857,
    Whitening = 12357,
    TransientProtection = 329847,
    LearnNoise = 57433,
    ResidualListen = 56201,
    ResetProfile = 453689734,
    Enable = 239487,
    NoiseScalingType = 6710386,
    PostFilterThreshold = 18613465,
}

impl ParameterId {
    /// Every parameter, in the order they are saved
    pub const ALL: [ParameterId; 11] = [
        ParameterId::ReductionAmount,
        ParameterId::ReductionStrength,
        ParameterId::Smoothing,
        ParameterId::Whitening,
        ParameterId::TransientProtection,
        ParameterId::LearnNoise,
        ParameterId::ResidualListen,
        ParameterId::ResetProfile,
        ParameterId::Enable,
        ParameterId::NoiseScalingType,
        ParameterId::PostFilterThreshold,
    ];

    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.raw() == raw)
    }

    pub fn info(self) -> ParameterInfo {
        use ParameterKind::*;

        let (name, min, max, default, kind) = match self {
            Self::ReductionAmount => ("Reduction Amount", 0.0, 40.0, 10.0, Continuous),
            Self::ReductionStrength => ("Reduction Strength", 0.0, 12.0, 2.0, Continuous),
            Self::Smoothing => ("Smoothing", 0.0, 100.0, 0.0, Continuous),
            Self::Whitening => ("Residual Whitening", 0.0, 100.0, 0.0, Continuous),
            Self::TransientProtection => ("Protect Transients", 0.0, 1.0, 0.0, Toggle),
            Self::LearnNoise => ("Learn Noise Profile", 0.0, 3.0, 0.0, Stepped),
            Self::ResidualListen => ("Residual Listen", 0.0, 1.0, 0.0, Toggle),
            Self::ResetProfile => ("Reset Noise Profile", 0.0, 1.0, 0.0, Toggle),
            Self::Enable => ("Enable", 0.0, 1.0, 1.0, Toggle),
            Self::NoiseScalingType => ("Noise Scaling Type", 0.0, 2.0, 0.0, Stepped),
            Self::PostFilterThreshold => ("Post Filter Threshold", -10.0, 10.0, 0.0, Continuous),
        };

        ParameterInfo {
            name,
            min,
            max,
            default,
            kind,
        }
    }
}

/// Snapshot of every parameter, taken once per processed block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenoisingParameters {
    /// Maximum attenuation in dB
    pub reduction_amount: f32,
    /// Noise profile scaling in dB
    pub reduction_strength: f32,
    /// Temporal gain smoothing, 0-100%
    pub smoothing: f32,
    /// Residual whitening, 0-100%
    pub whitening: f32,
    pub transient_protection: bool,
    pub learning_mode: LearningMode,
    pub residual_listen: bool,
    pub scaling_type: NoiseScalingType,
    /// dB
    pub post_filter_threshold: f32,
    pub enable: bool,
}

impl Default for DenoisingParameters {
    fn default() -> Self {
        DenoiserControls::default().snapshot()
    }
}

/// The full parameter surface of the denoiser
pub struct DenoiserControls {
    pub reduction_amount: ControlParameter<f32>,
    pub reduction_strength: ControlParameter<f32>,
    pub smoothing: ControlParameter<f32>,
    pub whitening: ControlParameter<f32>,
    pub transient_protection: ControlParameter<bool>,
    pub learn_noise: ControlParameter<LearningMode>,
    pub residual_listen: ControlParameter<bool>,
    /// One-shot: the audio thread clears it once the reset was applied
    pub reset_profile: ControlParameter<bool>,
    pub enable: ControlParameter<bool>,
    pub noise_scaling_type: ControlParameter<NoiseScalingType>,
    pub post_filter_threshold: ControlParameter<f32>,
}

impl Default for DenoiserControls {
    fn default() -> Self {
        let float = |id: ParameterId| ControlParameter::new(id.info().default as f32);
        let toggle = |id: ParameterId| ControlParameter::new(id.info().default >= 0.5);

        Self {
            reduction_amount: float(ParameterId::ReductionAmount),
            reduction_strength: float(ParameterId::ReductionStrength),
            smoothing: float(ParameterId::Smoothing),
            whitening: float(ParameterId::Whitening),
            transient_protection: toggle(ParameterId::TransientProtection),
            learn_noise: ControlParameter::new(LearningMode::Off),
            residual_listen: toggle(ParameterId::ResidualListen),
            reset_profile: toggle(ParameterId::ResetProfile),
            enable: toggle(ParameterId::Enable),
            noise_scaling_type: ControlParameter::new(NoiseScalingType::APosterioriSnr),
            post_filter_threshold: float(ParameterId::PostFilterThreshold),
        }
    }
}

impl DenoiserControls {
    /// Apply a raw host/state value, normalised according to the parameter's kind
    pub fn set_value(&self, id: ParameterId, raw: f64) {
        let info = id.info();
        // NaN would survive `clamp`, so it falls back to the default
        let raw = if raw.is_nan() { info.default } else { raw };
        let value = match info.kind {
            ParameterKind::Continuous => raw.clamp(info.min, info.max),
            ParameterKind::Stepped => raw.round().clamp(info.min, info.max),
            ParameterKind::Toggle => {
                if raw >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        };

        match id {
            ParameterId::ReductionAmount => self.reduction_amount.set(value as f32),
            ParameterId::ReductionStrength => self.reduction_strength.set(value as f32),
            ParameterId::Smoothing => self.smoothing.set(value as f32),
            ParameterId::Whitening => self.whitening.set(value as f32),
            ParameterId::TransientProtection => self.transient_protection.set(value >= 0.5),
            ParameterId::LearnNoise => self
                .learn_noise
                .set(LearningMode::from_index(value as usize)),
            ParameterId::ResidualListen => self.residual_listen.set(value >= 0.5),
            ParameterId::ResetProfile => self.reset_profile.set(value >= 0.5),
            ParameterId::Enable => self.enable.set(value >= 0.5),
            ParameterId::NoiseScalingType => self
                .noise_scaling_type
                .set(NoiseScalingType::from_index(value as usize)),
            ParameterId::PostFilterThreshold => self.post_filter_threshold.set(value as f32),
        }
    }

    /// The current value as it would be reported to a host or saved
    pub fn value(&self, id: ParameterId) -> f64 {
        let flag = |value: bool| if value { 1.0 } else { 0.0 };

        match id {
            ParameterId::ReductionAmount => self.reduction_amount.get() as f64,
            ParameterId::ReductionStrength => self.reduction_strength.get() as f64,
            ParameterId::Smoothing => self.smoothing.get() as f64,
            ParameterId::Whitening => self.whitening.get() as f64,
            ParameterId::TransientProtection => flag(self.transient_protection.get()),
            ParameterId::LearnNoise => self.learn_noise.get().to_index() as f64,
            ParameterId::ResidualListen => flag(self.residual_listen.get()),
            ParameterId::ResetProfile => flag(self.reset_profile.get()),
            ParameterId::Enable => flag(self.enable.get()),
            ParameterId::NoiseScalingType => self.noise_scaling_type.get().to_index() as f64,
            ParameterId::PostFilterThreshold => self.post_filter_threshold.get() as f64,
        }
    }

    pub fn set_all_to_default(&self) {
        self.reduction_amount.reset_to_default();
        self.reduction_strength.reset_to_default();
        self.smoothing.reset_to_default();
        self.whitening.reset_to_default();
        self.transient_protection.reset_to_default();
        self.learn_noise.reset_to_default();
        self.residual_listen.reset_to_default();
        self.reset_profile.reset_to_default();
        self.enable.reset_to_default();
        self.noise_scaling_type.reset_to_default();
        self.post_filter_threshold.reset_to_default();
    }

    pub fn snapshot(&self) -> DenoisingParameters {
        DenoisingParameters {
            reduction_amount: self.reduction_amount.get(),
            reduction_strength: self.reduction_strength.get(),
            smoothing: self.smoothing.get(),
            whitening: self.whitening.get(),
            transient_protection: self.transient_protection.get(),
            learning_mode: self.learn_noise.get(),
            residual_listen: self.residual_listen.get(),
            scaling_type: self.noise_scaling_type.get(),
            post_filter_threshold: self.post_filter_threshold.get(),
            enable: self.enable.get(),
        }
    }
}

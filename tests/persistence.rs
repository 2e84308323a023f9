use noise_repellent::audio::audio_engine::{create_engine, AudioEngine};
use noise_repellent::audio::control::ParameterId;
use noise_repellent::audio::state::StateHandle;

const BLOCK_SIZE: usize = 128;

fn noise(seed: u64, length: usize) -> Vec<f32> {
    let mut state = seed;
    (0..length)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 40) as f32 / (1u64 << 24) as f32) - 0.5
        })
        .collect()
}

fn process_stereo(engine: &mut AudioEngine, left: &mut [f32], right: &mut [f32]) {
    for (left, right) in left
        .chunks_mut(BLOCK_SIZE)
        .zip(right.chunks_mut(BLOCK_SIZE))
    {
        engine.process(&mut [left, right]);
    }
}

/// A stereo engine that has learned a different noise on each channel
fn learned_engine(sample_rate: f32) -> (AudioEngine, StateHandle) {
    let (mut engine, state) = create_engine(2);
    engine
        .activate(sample_rate, 2)
        .expect("supported sample rate should activate");

    let controls = engine.controls().clone();
    controls.set_value(ParameterId::LearnNoise, 1.0);
    let mut left = noise(1, sample_rate as usize / 2);
    let mut right: Vec<f32> = noise(2, sample_rate as usize / 2)
        .iter()
        .map(|s| s * 0.25)
        .collect();
    process_stereo(&mut engine, &mut left, &mut right);
    controls.set_value(ParameterId::LearnNoise, 0.0);

    assert!(engine.has_noise_profile());
    (engine, state)
}

#[test]
fn saved_state_restores_into_a_fresh_engine() {
    let (_engine, mut state) = learned_engine(48000.0);
    let controls = state.controls().clone();
    controls.set_value(ParameterId::ReductionAmount, 27.0);
    controls.set_value(ParameterId::NoiseScalingType, 1.0);
    controls.set_value(ParameterId::Whitening, 55.0);

    let mut bytes = Vec::new();
    assert!(state.save_state(&mut bytes));
    let saved = state.current_profile().clone();
    assert_ne!(saved.channel(0), saved.channel(1));

    let (mut restored_engine, mut restored_state) = create_engine(2);
    assert!(restored_state.load_state(&mut bytes.as_slice()));
    restored_engine
        .activate(48000.0, 2)
        .expect("48kHz stereo should activate");
    assert!(restored_engine.has_noise_profile());

    for id in ParameterId::ALL {
        assert_eq!(
            restored_state.controls().value(id),
            controls.value(id),
            "{:?}",
            id
        );
    }
    let restored = restored_state.current_profile();
    assert_eq!(restored.size, saved.size);
    assert_eq!(restored.blocks_averaged, saved.blocks_averaged);
    assert_eq!(restored.channel(0), saved.channel(0));
    assert_eq!(restored.channel(1), saved.channel(1));
}

#[test]
fn profile_saved_at_another_rate_is_resampled() {
    let (_engine, mut state) = learned_engine(44100.0);
    let mut bytes = Vec::new();
    assert!(state.save_state(&mut bytes));
    assert_eq!(state.current_profile().size, 1025);

    let (mut engine, mut restored) = create_engine(2);
    engine
        .activate(48000.0, 2)
        .expect("48kHz stereo should activate");
    assert!(restored.load_state(&mut bytes.as_slice()));

    let mut left = vec![0.0; BLOCK_SIZE];
    let mut right = vec![0.0; BLOCK_SIZE];
    engine.process(&mut [left.as_mut_slice(), right.as_mut_slice()]);

    assert!(engine.has_noise_profile());
    let profile = restored.current_profile();
    assert_eq!(profile.size, 2049);
    assert!(profile.channel(0).iter().all(|value| value.is_finite() && *value >= 0.0));
}

#[test]
fn truncated_state_leaves_the_running_profile_alone() {
    let (mut engine, mut state) = learned_engine(48000.0);
    let mut bytes = Vec::new();
    assert!(state.save_state(&mut bytes));
    let before = state.current_profile().clone();

    bytes.truncate(bytes.len() - 7);
    assert!(!state.load_state(&mut bytes.as_slice()));

    let mut left = noise(3, BLOCK_SIZE);
    let mut right = noise(4, BLOCK_SIZE);
    engine.process(&mut [left.as_mut_slice(), right.as_mut_slice()]);
    assert!(engine.has_noise_profile());
    assert_eq!(state.current_profile(), &before);
}

#[test]
fn failed_reactivation_keeps_the_learned_profile() {
    let (mut engine, mut state) = learned_engine(48000.0);
    let latency = engine.latency();
    let before = state.current_profile().clone();

    assert!(engine.activate(500.0, 2).is_err());
    assert!(engine.activate(48000.0, 5).is_err());
    assert!(engine.is_active());
    assert!(engine.has_noise_profile());
    assert_eq!(engine.latency(), latency);
    assert_eq!(state.current_profile(), &before);
}

#[test]
fn clearing_from_the_control_thread_reaches_the_engine() {
    let (mut engine, mut state) = learned_engine(48000.0);
    state.clear_profile();
    // Staged but not yet applied
    assert!(!state.current_profile().is_available());
    assert!(engine.has_noise_profile());

    let mut left = vec![0.0; BLOCK_SIZE];
    let mut right = vec![0.0; BLOCK_SIZE];
    assert!(engine.process(&mut [left.as_mut_slice(), right.as_mut_slice()]));
    assert!(!engine.has_noise_profile());
    assert!(!state.current_profile().is_available());
}

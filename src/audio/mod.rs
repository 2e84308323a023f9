pub mod audio_engine;
pub mod constants;
pub mod control;
pub mod error;
pub mod fft_engine;
pub mod noise_profile;
pub mod soft_bypass;
pub mod spectral_gain;
pub mod state;
pub mod stft_processor;
pub mod triple_buffer;
pub mod window_functions;

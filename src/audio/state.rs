//! Saving and restoring the denoiser: parameter values plus the learned noise profile.
//!
//! Payload layout, all little-endian:
//!
//! ```text
//! version          u32   (1)
//! parameter_count  u32
//! parameter_count × (id u32, value f64)
//! blocks_averaged  u32
//! size             u32   (0 = no profile)
//! channel_count × size × f32
//! ```

use crate::audio::constants::{MAX_CHANNELS, NOISE_PROFILE_MAX_SIZE};
use crate::audio::control::{DenoiserControls, ParameterId};
use crate::audio::error::{StateError, StateResult};
use crate::audio::noise_profile::ProfileSnapshot;
use crate::audio::triple_buffer::{ConsumerHandle, ProducerHandle};
use std::io::{Read, Write};
use std::sync::Arc;

pub const STATE_VERSION: u32 = 1;

/// Control thread end of the engine.
///
/// Sends profile updates to the audio thread and picks up the profile it learned. Until the
/// audio thread has applied an update, the update itself is what gets saved.
pub struct StateHandle {
    controls: Arc<DenoiserControls>,
    pending: ProducerHandle<ProfileSnapshot>,
    learned: ConsumerHandle<ProfileSnapshot>,

    /// Copy of the last update sent to the audio thread
    staged: ProfileSnapshot,
    staged_generation: u64,
    channel_count: usize,
}

impl StateHandle {
    pub(crate) fn new(
        controls: Arc<DenoiserControls>,
        pending: ProducerHandle<ProfileSnapshot>,
        learned: ConsumerHandle<ProfileSnapshot>,
        channel_count: usize,
    ) -> Self {
        Self {
            controls,
            pending,
            learned,
            staged: ProfileSnapshot::empty(),
            staged_generation: 0,
            channel_count: channel_count.clamp(1, MAX_CHANNELS),
        }
    }

    pub fn controls(&self) -> &Arc<DenoiserControls> {
        &self.controls
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of channels written to and expected in the payload
    pub fn set_channel_count(&mut self, channel_count: usize) {
        self.channel_count = channel_count.clamp(1, MAX_CHANNELS);
    }

    /// The most recent profile: the audio thread's, or the last staged update if the audio
    /// thread has not applied it yet
    pub fn current_profile(&mut self) -> &ProfileSnapshot {
        self.learned.try_consume();

        let front = self.learned.read();
        if front.generation >= self.staged_generation {
            front
        } else {
            &self.staged
        }
    }

    /// Ask the audio thread to forget its profile
    pub fn clear_profile(&mut self) {
        self.staged_generation += 1;

        let update = self.pending.write();
        update.clear();
        update.generation = self.staged_generation;
        self.staged.copy_from(update);
        self.pending.publish();
    }

    /// Returns whether the state was saved. Failures are logged.
    pub fn save_state<W: Write>(&mut self, writer: &mut W) -> bool {
        match self.encode(writer) {
            Ok(()) => true,
            Err(err) => {
                nih_plug::nih_error!("Failed to save the denoiser state: {}", err);
                false
            }
        }
    }

    /// Returns whether the state was restored. The profile only reaches the audio thread
    /// when the whole payload decoded, parameters read before a failure stay applied.
    pub fn load_state<R: Read>(&mut self, reader: &mut R) -> bool {
        match self.decode(reader) {
            Ok(()) => true,
            Err(err) => {
                nih_plug::nih_warn!("Failed to load the denoiser state: {}", err);
                false
            }
        }
    }

    fn encode<W: Write>(&mut self, writer: &mut W) -> StateResult<()> {
        write_u32(writer, STATE_VERSION)?;
        write_u32(writer, ParameterId::ALL.len() as u32)?;
        for id in ParameterId::ALL {
            write_u32(writer, id.raw())?;
            writer.write_all(&self.controls.value(id).to_le_bytes())?;
        }

        let channel_count = self.channel_count;
        let profile = self.current_profile();
        write_u32(writer, profile.blocks_averaged)?;
        write_u32(writer, profile.size as u32)?;
        for channel in 0..channel_count {
            for value in profile.channel(channel) {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        Ok(())
    }

    fn decode<R: Read>(&mut self, reader: &mut R) -> StateResult<()> {
        let version = read_u32(reader)?;
        if version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion(version));
        }

        // Anything the payload doesn't mention goes back to its default
        self.controls.set_all_to_default();
        let parameter_count = read_u32(reader)?;
        for _ in 0..parameter_count {
            let id = read_u32(reader)?;
            let value = read_f64(reader)?;
            if let Some(id) = ParameterId::from_raw(id) {
                self.controls.set_value(id, value);
            }
        }

        let blocks_averaged = read_u32(reader)?;
        let size = read_u32(reader)? as usize;
        if size > NOISE_PROFILE_MAX_SIZE {
            return Err(StateError::ProfileTooLarge {
                size,
                capacity: NOISE_PROFILE_MAX_SIZE,
            });
        }

        let update = self.pending.write();
        for channel in &mut update.channels[..self.channel_count] {
            for value in &mut channel[..size] {
                *value = read_f32(reader)?;
            }
        }
        // Channels missing from the payload follow the first one
        if let Some((first, rest)) = update.channels.split_first_mut() {
            for channel in &mut rest[self.channel_count - 1..] {
                channel[..size].copy_from_slice(&first[..size]);
            }
        }

        update.size = size;
        update.blocks_averaged = blocks_averaged;
        update.generation = self.staged_generation + 1;

        self.staged_generation += 1;
        self.staged.copy_from(update);
        self.pending.publish();

        Ok(())
    }
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> StateResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> StateResult<u32> {
    let mut bytes = [0; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_f32<R: Read>(reader: &mut R) -> StateResult<f32> {
    let mut bytes = [0; 4];
    reader.read_exact(&mut bytes)?;
    Ok(f32::from_le_bytes(bytes))
}

fn read_f64<R: Read>(reader: &mut R) -> StateResult<f64> {
    let mut bytes = [0; 8];
    reader.read_exact(&mut bytes)?;
    Ok(f64::from_le_bytes(bytes))
}

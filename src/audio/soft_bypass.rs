use crate::audio::constants::{BYPASS_CROSSFADE_MS, MAX_CHANNELS};

/// Click-free enable/disable.
///
/// The dry signal is delayed by the processing latency so both paths line up, and the output
/// crossfades linearly between them whenever the enable state flips.
pub struct SoftBypass {
    delay_lines: Vec<Vec<f32>>,
    write_position: usize,
    /// 1.0 is fully processed, 0.0 fully dry
    wet_amount: f32,
    step: f32,
}

impl SoftBypass {
    pub fn new(sample_rate: f32, latency: usize, channels: usize, enabled: bool) -> Self {
        let crossfade_samples = (sample_rate * BYPASS_CROSSFADE_MS / 1000.0).max(1.0);

        Self {
            delay_lines: vec![vec![0.0; latency]; channels.min(MAX_CHANNELS)],
            write_position: 0,
            wet_amount: if enabled { 1.0 } else { 0.0 },
            step: 1.0 / crossfade_samples,
        }
    }

    /// Clear the delayed dry signal and jump straight to the given state
    pub fn reset(&mut self, enabled: bool) {
        for line in &mut self.delay_lines {
            line.fill(0.0);
        }
        self.write_position = 0;
        self.wet_amount = if enabled { 1.0 } else { 0.0 };
    }

    pub fn is_settled(&self) -> bool {
        self.wet_amount == 0.0 || self.wet_amount == 1.0
    }

    /// Mix one sample frame. `dry` holds the undelayed input of every channel, `wet` the
    /// processed output, which is replaced by the mix.
    pub fn process(&mut self, dry: &[f32], wet: &mut [f32], enabled: bool) {
        let target = if enabled { 1.0 } else { 0.0 };
        let difference = target - self.wet_amount;
        self.wet_amount = if difference.abs() <= self.step {
            target
        } else {
            self.wet_amount + self.step.copysign(difference)
        };

        let position = self.write_position;
        for ((line, &input), output) in self.delay_lines.iter_mut().zip(dry).zip(wet.iter_mut()) {
            let delayed = match line.get_mut(position) {
                Some(slot) => std::mem::replace(slot, input),
                None => input,
            };
            *output = delayed + (*output - delayed) * self.wet_amount;
        }

        if let Some(length) = self.delay_lines.first().map(Vec::len) {
            if length > 0 {
                self.write_position = (position + 1) % length;
            }
        }
    }
}

//! Seam toward the input-device collaborator.
//!
//! Device polling is outside this core; whatever reads the keyboard or a
//! wheel implements [`InputSource`] and hands the network layer one sample
//! per client tick.

use shared::protocol::InputSample;

pub trait InputSource: Send {
    fn sample(&mut self) -> InputSample;
}

/// Produces no input. Placeholder wiring for headless runs.
#[derive(Debug, Default)]
pub struct NullInput;

impl InputSource for NullInput {
    fn sample(&mut self) -> InputSample {
        InputSample::default()
    }
}

/// Replays a fixed sequence of samples, then holds the last one. Used by
/// tests and soak tooling.
pub struct ScriptedInput {
    samples: Vec<InputSample>,
    cursor: usize,
}

impl ScriptedInput {
    pub fn new(samples: Vec<InputSample>) -> Self {
        ScriptedInput { samples, cursor: 0 }
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self) -> InputSample {
        let sample = self
            .samples
            .get(self.cursor)
            .or_else(|| self.samples.last())
            .copied()
            .unwrap_or_default();
        if self.cursor < self.samples.len() {
            self.cursor += 1;
        }
        sample
    }
}

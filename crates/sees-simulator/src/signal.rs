//! Simulated analog front-ends

use std::fs;
use std::path::Path;

use anyhow::{Context, bail};
use sees_core::adc::{AdcScale, SampleSource};

/// Baseline noise floor of the synthetic front-end (V).
const BASELINE_V: f32 = 0.05;

/// Peak-to-peak noise amplitude (V).
const NOISE_V: f32 = 0.02;

/// Samples a synthetic pulse stays above baseline.
const PULSE_SAMPLES: u32 = 2;

/// Poisson-ish particle pulses on a noisy baseline.
///
/// Uses a xorshift generator so runs are reproducible from the seed.
pub struct PulseGenerator {
    scale: AdcScale,
    state: u64,
    /// Chance of a new pulse per sample
    probability: f32,
    pulse_v: f32,
    remaining: u32,
}

impl PulseGenerator {
    pub fn new(scale: AdcScale, hits_per_sec: f32, sample_interval_us: u32, seed: u64) -> Self {
        let probability = hits_per_sec * sample_interval_us as f32 / 1_000_000.0;
        Self {
            scale,
            state: seed.max(1),
            probability: probability.clamp(0.0, 1.0),
            pulse_v: 0.0,
            remaining: 0,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform in `[0, 1)`.
    fn next_unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

impl SampleSource for PulseGenerator {
    fn read_raw(&mut self) -> u16 {
        if self.remaining == 0 && self.next_unit() < self.probability {
            // Mostly in the hit window, occasionally saturating above it.
            self.pulse_v = 0.35 + 0.6 * self.next_unit();
            self.remaining = PULSE_SAMPLES;
        }

        let noise = (self.next_unit() - 0.5) * NOISE_V;
        let volts = if self.remaining > 0 {
            self.remaining -= 1;
            self.pulse_v + noise
        } else {
            BASELINE_V + noise
        };
        self.scale.to_counts(volts)
    }
}

/// Replays a recorded voltage trace, looping at the end.
///
/// Accepts a bare column of voltages, or a telemetry log / dense snap
/// artifact, where the voltage is the second column. Comment and header lines
/// are skipped.
pub struct ReplaySource {
    counts: Vec<u16>,
    position: usize,
}

impl ReplaySource {
    pub fn from_file(path: &Path, scale: AdcScale) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        Self::parse(&text, scale).with_context(|| format!("invalid replay file {}", path.display()))
    }

    pub fn parse(text: &str, scale: AdcScale) -> anyhow::Result<Self> {
        let counts: Vec<u16> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut fields = line.split(',');
                let first = fields.next()?;
                let column = fields.next().unwrap_or(first);
                column.trim().parse::<f32>().ok()
            })
            .map(|volts| scale.to_counts(volts))
            .collect();

        if counts.is_empty() {
            bail!("no voltage samples found");
        }
        Ok(Self {
            counts,
            position: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }
}

impl SampleSource for ReplaySource {
    fn read_raw(&mut self) -> u16 {
        let count = self.counts[self.position];
        self.position = (self.position + 1) % self.counts.len();
        count
    }
}

/// Front-end selected on the command line.
pub enum Signal {
    Pulses(PulseGenerator),
    Replay(ReplaySource),
}

impl SampleSource for Signal {
    fn read_raw(&mut self) -> u16 {
        match self {
            Self::Pulses(generator) => generator.read_raw(),
            Self::Replay(replay) => replay.read_raw(),
        }
    }
}

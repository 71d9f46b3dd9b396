//! The sweep control loop.
//!
//! For every target wavelength the engine runs
//!
//! ```text
//! Idle -> Settling -> Measuring -> Recorded
//! ```
//!
//! Settling polls the laser for completion but gives up silently after a
//! fixed number of polls; the laser is known to reach the wavelength
//! without ever confirming it. Measuring polls the power meter without a
//! cap, since skipping it records wrong data. An optional per-step
//! timeout bounds the whole step and aborts the sweep when it expires.

use chrono::{DateTime, Local};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::laser::Laser;
use crate::power_meter::PowerMeter;
use crate::proto::response::{Completion, MeasurementStatus};
use crate::proto::transport::Transport;
use crate::proto::ProtoError;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Instrument error: {}", _0)]
    Proto(#[from] ProtoError),
    #[error("Invalid wavelength range: {}", _0)]
    InvalidSequence(String),
    #[error("Step at {wavelength} nm did not finish within {limit:?}")]
    StepTimeout { wavelength: f64, limit: Duration },
    #[error("Sweep was cancelled")]
    Cancelled,
}

/// How the points between start and stop are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequenceMode {
    /// `start + i * step`, no error build-up.
    #[default]
    Indexed,
    /// Adds `step` repeatedly while below `stop + step`, in decimal
    /// arithmetic on the binary value of `step`. Kept to reproduce data
    /// taken with older tooling.
    Accumulated,
}

/// Ordered, strictly increasing wavelength targets in nm.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthSequence {
    points: Vec<f64>,
}

impl WavelengthSequence {
    // Relative slack so that a quotient like 9.999999999999998 still
    // counts as ten full steps.
    const EPSILON: f64 = 1e-9;

    /// Points from `start` to `stop` inclusive, `stop` is included when it
    /// lies on the step grid.
    pub fn new(start: f64, stop: f64, step: f64) -> Result<Self, SweepError> {
        Self::with_mode(start, stop, step, SequenceMode::Indexed)
    }

    pub fn with_mode(
        start: f64,
        stop: f64,
        step: f64,
        mode: SequenceMode,
    ) -> Result<Self, SweepError> {
        if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
            return Err(SweepError::InvalidSequence(
                "start, stop and step must be finite".into(),
            ));
        }
        if step <= 0.0 {
            return Err(SweepError::InvalidSequence(format!(
                "step must be positive, got {}",
                step
            )));
        }
        if start > stop {
            return Err(SweepError::InvalidSequence(format!(
                "start {} is above stop {}",
                start, stop
            )));
        }

        let points = match mode {
            SequenceMode::Indexed => {
                let span = (stop - start) / step;
                let count = (span + span.abs().max(1.0) * Self::EPSILON).floor() as usize + 1;
                (0..count).map(|i| start + i as f64 * step).collect()
            }
            SequenceMode::Accumulated => accumulate(start, stop + step, step)?,
        };
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.points
    }
}

/// Adds `step` in decimal arithmetic while below `end`. The step keeps
/// the exact value of its binary float, so steps like 0.1 run slightly
/// large and the point just past `stop` is not reached.
fn accumulate(start: f64, end: f64, step: f64) -> Result<Vec<f64>, SweepError> {
    let out_of_range = || SweepError::InvalidSequence("values exceed decimal range".into());
    let to_decimal = |v: f64| Decimal::from_f64_retain(v).ok_or_else(out_of_range);
    let end = to_decimal(end)?;
    let step = to_decimal(step)?;

    let mut points = Vec::new();
    let mut wavelength = to_decimal(start)?;
    while wavelength < end {
        points.push(wavelength.to_f64().ok_or_else(out_of_range)?);
        wavelength = wavelength.checked_add(step).ok_or_else(out_of_range)?;
    }
    Ok(points)
}

/// Data quality of a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    Valid,
    /// Overflow sentinel or NaN from the meter.
    NonFinite,
    /// Finite but outside the configured plausible power range.
    OutOfRange,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Valid => f.write_str("valid"),
            Quality::NonFinite => f.write_str("non-finite"),
            Quality::OutOfRange => f.write_str("out-of-range"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSample {
    pub wavelength: f64,
    pub power: f64,
    pub quality: Quality,
}

/// Why a sweep stopped.
#[derive(Debug)]
pub enum Termination {
    Completed,
    Cancelled,
    Aborted(SweepError),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => f.write_str("completed"),
            Termination::Cancelled => f.write_str("cancelled"),
            Termination::Aborted(_) => f.write_str("aborted"),
        }
    }
}

#[derive(Debug)]
pub struct SweepResult {
    pub samples: Vec<SweepSample>,
    pub started: DateTime<Local>,
    pub termination: Termination,
}

impl SweepResult {
    pub fn is_complete(&self) -> bool {
        matches!(self.termination, Termination::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub poll_interval: Duration,
    /// Completion polls before settling is assumed.
    pub settle_polls: u32,
    pub step_timeout: Option<Duration>,
    pub channel: u8,
    /// Plausible power range in W, readings outside are flagged.
    pub power_range: Option<(f64, f64)>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            settle_polls: 10,
            step_timeout: Some(Duration::from_secs(60)),
            channel: 1,
            power_range: None,
        }
    }
}

impl SweepConfig {
    pub fn classify(&self, power: f64) -> Quality {
        if !power.is_finite() {
            Quality::NonFinite
        } else if let Some((min, max)) = self.power_range {
            if (min..=max).contains(&power) {
                Quality::Valid
            } else {
                Quality::OutOfRange
            }
        } else {
            Quality::Valid
        }
    }
}

pub struct Sweep<'a, L, M> {
    laser: &'a mut Laser<L>,
    meter: &'a mut PowerMeter<M>,
    config: SweepConfig,
    cancel: CancellationToken,
}

impl<'a, L: Transport, M: Transport> Sweep<'a, L, M> {
    pub fn new(
        laser: &'a mut Laser<L>,
        meter: &'a mut PowerMeter<M>,
        config: SweepConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            laser,
            meter,
            config,
            cancel,
        }
    }

    /// Runs the whole sequence. Never fails: errors and cancellation end
    /// the sweep early and are reported in [`SweepResult::termination`]
    /// next to the samples taken so far.
    pub async fn run(&mut self, sequence: &WavelengthSequence) -> SweepResult {
        let started = Local::now();
        let mut samples = Vec::with_capacity(sequence.len());
        let termination = match self.run_inner(sequence, &mut samples).await {
            Ok(()) => Termination::Completed,
            Err(SweepError::Cancelled) => Termination::Cancelled,
            Err(err) => Termination::Aborted(err),
        };
        info!(
            samples = samples.len(),
            targets = sequence.len(),
            "Sweep {}",
            termination
        );
        SweepResult {
            samples,
            started,
            termination,
        }
    }

    async fn run_inner(
        &mut self,
        sequence: &WavelengthSequence,
        samples: &mut Vec<SweepSample>,
    ) -> Result<(), SweepError> {
        self.prepare_shutter().await?;

        for (index, target) in sequence.iter().enumerate() {
            self.check_cancel()?;
            info!(
                "Set wavelength to {:.4} nm ({}/{})",
                target,
                index + 1,
                sequence.len()
            );

            let sample = match self.config.step_timeout {
                Some(limit) => tokio::time::timeout(limit, self.step(target))
                    .await
                    .map_err(|_| SweepError::StepTimeout {
                        wavelength: target,
                        limit,
                    })??,
                None => self.step(target).await?,
            };

            if sample.quality != Quality::Valid {
                warn!(
                    wavelength = sample.wavelength,
                    power = sample.power,
                    "Reading flagged as {}",
                    sample.quality
                );
            }
            samples.push(sample);
        }
        Ok(())
    }

    async fn prepare_shutter(&mut self) -> Result<(), SweepError> {
        match self.laser.shutter_closed().await? {
            Some(false) => Ok(()),
            Some(true) => {
                self.laser.open_shutter().await?;
                info!("Shutter opened");
                Ok(())
            }
            None => {
                self.laser.open_shutter().await?;
                info!("Shutter state unknown, sent open command");
                Ok(())
            }
        }
    }

    async fn step(&mut self, target: f64) -> Result<SweepSample, SweepError> {
        self.laser.set_wavelength(target).await?;
        self.settle().await?;

        let channel = self.config.channel;
        self.meter.start_measurement(channel).await?;
        self.wait_for_measurement().await?;

        let power = self.meter.power(channel).await?;
        debug!(wavelength = target, power, "Recorded");
        Ok(SweepSample {
            wavelength: target,
            power,
            quality: self.config.classify(power),
        })
    }

    async fn settle(&mut self) -> Result<(), SweepError> {
        let mut polls = 0;
        loop {
            self.check_cancel()?;
            if self.laser.operation_complete().await? == Completion::Done {
                debug!(polls = polls + 1, "Laser settled");
                return Ok(());
            }
            polls += 1;
            if polls >= self.config.settle_polls {
                debug!(polls, "No completion from laser, continuing");
                return Ok(());
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn wait_for_measurement(&mut self) -> Result<(), SweepError> {
        loop {
            self.check_cancel()?;
            match self.meter.measurement_status(self.config.channel).await? {
                MeasurementStatus::Done => return Ok(()),
                MeasurementStatus::Measuring => sleep(self.config.poll_interval).await,
            }
        }
    }

    fn check_cancel(&self) -> Result<(), SweepError> {
        if self.cancel.is_cancelled() {
            Err(SweepError::Cancelled)
        } else {
            Ok(())
        }
    }
}

//! Persists a sweep to disk.
//!
//! Each run gets its own directory `<data_dir>/<name> <timestamp>` with
//!
//! * `data.csv`: one `wavelength_nm,power_w,quality` row per sample
//! * `graph.svg`: power over wavelength, finite readings only
//! * `summary.toml`: run parameters, instrument identities and whether
//!   the sweep completed

use plotters::prelude::*;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::proto::conv::{folder_ts, pretty_ts};
use crate::sweep::{Quality, SweepResult, SweepSample, Termination};

pub const DATA_FILE: &str = "data.csv";
pub const PLOT_FILE: &str = "graph.svg";
pub const SUMMARY_FILE: &str = "summary.toml";

const PLOT_SIZE: (u32, u32) = (1024, 768);

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Cannot create output directory {}: {}", path.display(), source)]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Cannot write {}: {}", path.display(), source)]
    Write { path: PathBuf, source: io::Error },
    #[error("CSV error: {}", _0)]
    Csv(#[from] csv::Error),
    #[error("Plot error: {}", _0)]
    Plot(String),
    #[error("Summary error: {}", _0)]
    Summary(#[from] toml::ser::Error),
}

/// Sweep parameters and instrument identities recorded with the data.
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    pub laser: String,
    pub power_meter: String,
}

#[derive(Serialize)]
struct Row {
    wavelength_nm: f64,
    power_w: f64,
    quality: Quality,
}

#[derive(Serialize)]
struct Summary<'a> {
    status: String,
    complete: bool,
    samples: usize,
    flagged: usize,
    started: String,
    start_nm: f64,
    stop_nm: f64,
    step_nm: f64,
    laser: &'a str,
    power_meter: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub struct ResultSink {
    data_dir: PathBuf,
    name: String,
    plot: bool,
}

impl ResultSink {
    pub fn new(data_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            name: name.into(),
            plot: true,
        }
    }

    pub fn with_plot(mut self, plot: bool) -> Self {
        self.plot = plot;
        self
    }

    pub fn output_dir(&self, result: &SweepResult) -> PathBuf {
        self.data_dir
            .join(format!("{} {}", self.name, folder_ts(&result.started)))
    }

    /// Writes all files and returns the directory they went to. Partial
    /// results are written the same way, `summary.toml` tells them apart.
    pub fn persist(&self, result: &SweepResult, run: &RunInfo) -> Result<PathBuf, SinkError> {
        let dir = self.output_dir(result);
        fs::create_dir_all(&dir).map_err(|source| SinkError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        write_csv(&dir.join(DATA_FILE), &result.samples)?;
        if self.plot && draw_plot(&dir.join(PLOT_FILE), &result.samples)? {
            info!("Plot written to {}", dir.join(PLOT_FILE).display());
        }
        write_summary(&dir.join(SUMMARY_FILE), result, run)?;

        info!(
            samples = result.samples.len(),
            "Results written to {}",
            dir.display()
        );
        Ok(dir)
    }
}

fn write_csv(path: &Path, samples: &[SweepSample]) -> Result<(), SinkError> {
    let mut writer = csv::Writer::from_path(path)?;
    if samples.is_empty() {
        writer.write_record(["wavelength_nm", "power_w", "quality"])?;
    }
    for s in samples {
        writer.serialize(Row {
            wavelength_nm: s.wavelength,
            power_w: s.power,
            quality: s.quality,
        })?;
    }
    writer.flush().map_err(|source| SinkError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn write_summary(path: &Path, result: &SweepResult, run: &RunInfo) -> Result<(), SinkError> {
    let error = match &result.termination {
        Termination::Aborted(err) => Some(err.to_string()),
        _ => None,
    };
    let summary = Summary {
        status: result.termination.to_string(),
        complete: result.is_complete(),
        samples: result.samples.len(),
        flagged: result
            .samples
            .iter()
            .filter(|s| s.quality != Quality::Valid)
            .count(),
        started: pretty_ts(&result.started),
        start_nm: run.start,
        stop_nm: run.stop,
        step_nm: run.step,
        laser: &run.laser,
        power_meter: &run.power_meter,
        error,
    };
    let text = toml::to_string(&summary)?;
    fs::write(path, text).map_err(|source| SinkError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn plot_err(err: impl fmt::Display) -> SinkError {
    SinkError::Plot(err.to_string())
}

/// Axis range around `values`, widened when all values are equal.
fn axis_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values.fold(None, |acc: Option<(f64, f64)>, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })?;
    let span = max - min;
    if span > 0.0 {
        Some((min - span * 0.05, max + span * 0.05))
    } else {
        let pad = if min == 0.0 { 1.0 } else { min.abs() * 0.05 };
        Some((min - pad, max + pad))
    }
}

/// Returns `false` when there was nothing finite to draw.
fn draw_plot(path: &Path, samples: &[SweepSample]) -> Result<bool, SinkError> {
    let points: Vec<(f64, f64)> = samples
        .iter()
        .filter(|s| s.power.is_finite())
        .map(|s| (s.wavelength, s.power))
        .collect();
    let (Some(x), Some(y)) = (
        axis_range(points.iter().map(|p| p.0)),
        axis_range(points.iter().map(|p| p.1)),
    ) else {
        return Ok(false);
    };

    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Optical power vs. laser wavelength", ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(90)
        .build_cartesian_2d(x.0..x.1, y.0..y.1)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Wavelength [nm]")
        .y_desc("Power [W]")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(points, &BLUE))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ProtoError;
    use crate::sweep::SweepError;
    use chrono::{Local, TimeZone};

    fn result(termination: Termination) -> SweepResult {
        SweepResult {
            samples: vec![
                SweepSample {
                    wavelength: 1550.0,
                    power: 1.5e-3,
                    quality: Quality::Valid,
                },
                SweepSample {
                    wavelength: 1550.5,
                    power: f64::INFINITY,
                    quality: Quality::NonFinite,
                },
                SweepSample {
                    wavelength: 1551.0,
                    power: 1.25e-3,
                    quality: Quality::Valid,
                },
            ],
            started: Local.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap(),
            termination,
        }
    }

    fn run_info() -> RunInfo {
        RunInfo {
            start: 1550.0,
            stop: 1551.0,
            step: 0.5,
            laser: "SANTEC,TSL-550,1,1".into(),
            power_meter: "Thorlabs,PM320E,1,1".into(),
        }
    }

    #[test]
    fn directory_is_named_after_folder_and_start_time() {
        let sink = ResultSink::new("/data", "filter");
        assert_eq!(
            sink.output_dir(&result(Termination::Completed)),
            PathBuf::from("/data/filter 10-18-2026 @ 09.30.00AM")
        );
    }

    #[test]
    fn writes_table_plot_and_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ResultSink::new(tmp.path(), "filter");
        let dir = sink
            .persist(&result(Termination::Completed), &run_info())
            .unwrap();

        let csv = fs::read_to_string(dir.join(DATA_FILE)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "wavelength_nm,power_w,quality",
                "1550.0,0.0015,valid",
                "1550.5,inf,non-finite",
                "1551.0,0.00125,valid",
            ]
        );

        let svg = fs::read_to_string(dir.join(PLOT_FILE)).unwrap();
        assert!(svg.contains("<svg"));

        let summary: toml::Value =
            toml::from_str(&fs::read_to_string(dir.join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(summary["status"].as_str(), Some("completed"));
        assert_eq!(summary["complete"].as_bool(), Some(true));
        assert_eq!(summary["samples"].as_integer(), Some(3));
        assert_eq!(summary["flagged"].as_integer(), Some(1));
        assert!(summary.get("error").is_none());
    }

    #[test]
    fn partial_result_is_tagged_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ResultSink::new(tmp.path(), "pd").with_plot(false);
        let aborted = result(Termination::Aborted(SweepError::Proto(ProtoError::Abort)));
        let dir = sink.persist(&aborted, &run_info()).unwrap();

        assert!(!dir.join(PLOT_FILE).exists());
        let summary: toml::Value =
            toml::from_str(&fs::read_to_string(dir.join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(summary["status"].as_str(), Some("aborted"));
        assert_eq!(summary["complete"].as_bool(), Some(false));
        assert!(summary["error"]
            .as_str()
            .unwrap()
            .contains("Connection was closed"));
    }

    #[test]
    fn empty_result_still_gets_header() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ResultSink::new(tmp.path(), "empty");
        let mut empty = result(Termination::Cancelled);
        empty.samples.clear();
        let dir = sink.persist(&empty, &run_info()).unwrap();
        let csv = fs::read_to_string(dir.join(DATA_FILE)).unwrap();
        assert_eq!(csv.trim(), "wavelength_nm,power_w,quality");
        assert!(!dir.join(PLOT_FILE).exists());
    }

    #[test]
    fn unwritable_directory_is_a_sink_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, b"").unwrap();
        let sink = ResultSink::new(&blocker, "x");
        assert!(matches!(
            sink.persist(&result(Termination::Completed), &run_info()),
            Err(SinkError::CreateDir { .. })
        ));
    }

    #[test]
    fn flat_series_gets_padded_axis() {
        assert_eq!(axis_range([2.0, 2.0].into_iter()), Some((1.9, 2.1)));
        assert_eq!(axis_range(std::iter::empty()), None);
    }
}

//! Command vocabularies.
//!
//! The controllers only know logical operations. Which ASCII string goes
//! on the wire for each of them is data: a preset table for the supported
//! instrument generations, or a table read from the configuration file.
//! Templates use `{}` as the placeholder for the single argument.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaserProtocol {
    /// IEEE 488.2 / SCPI command set, interface independent.
    SantecScpi,
    /// Legacy Santec command set used over the serial interface.
    SantecSerial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeterProtocol {
    ThorlabsPm320e,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserCommands {
    pub ident: String,
    /// Query answering `shutter_closed_token` while the shutter is closed.
    /// Without it the shutter is opened unconditionally before a sweep.
    #[serde(default)]
    pub shutter_state: Option<String>,
    pub shutter_closed_token: String,
    pub open_shutter: String,
    pub close_shutter: String,
    pub wavelength: String,
    pub set_wavelength: String,
    pub wavelength_decimals: usize,
    /// Query answering `complete_token` once the last operation finished.
    #[serde(default)]
    pub operation_complete: Option<String>,
    pub complete_token: String,
}

impl LaserCommands {
    pub fn preset(protocol: LaserProtocol) -> Self {
        match protocol {
            LaserProtocol::SantecScpi => Self::santec_scpi(),
            LaserProtocol::SantecSerial => Self::santec_serial(),
        }
    }

    pub fn santec_scpi() -> Self {
        Self {
            ident: "*IDN?".into(),
            shutter_state: Some(":POW:SHUT?".into()),
            shutter_closed_token: "1".into(),
            open_shutter: ":POW:SHUT 0".into(),
            close_shutter: ":POW:SHUT 1".into(),
            wavelength: ":SOUR:WAV?".into(),
            set_wavelength: ":WAV {}".into(),
            wavelength_decimals: 4,
            operation_complete: Some("*OPC?".into()),
            complete_token: "1".into(),
        }
    }

    pub fn santec_serial() -> Self {
        Self {
            ident: "*IDN?".into(),
            shutter_state: None,
            shutter_closed_token: "1".into(),
            open_shutter: "SO".into(),
            close_shutter: "SC".into(),
            wavelength: "WA".into(),
            set_wavelength: "WA{}".into(),
            wavelength_decimals: 4,
            operation_complete: None,
            complete_token: "1".into(),
        }
    }

    pub fn render_set_wavelength(&self, wavelength: f64) -> String {
        render(
            &self.set_wavelength,
            format!("{:.*}", self.wavelength_decimals, wavelength),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterCommands {
    pub ident: String,
    pub start_measurement: String,
    pub measurement_status: String,
    pub measuring_token: String,
    pub done_token: String,
    /// Fetches the last completed measurement. Reading the instantaneous
    /// value instead can return an overflow sentinel on short sweeps.
    pub fetch_power: String,
}

impl MeterCommands {
    pub fn preset(protocol: MeterProtocol) -> Self {
        match protocol {
            MeterProtocol::ThorlabsPm320e => Self::thorlabs_pm320e(),
        }
    }

    pub fn thorlabs_pm320e() -> Self {
        Self {
            ident: "*IDN?".into(),
            start_measurement: ":MEAS:INIT{}".into(),
            measurement_status: ":MEAS:CHECK{}?".into(),
            measuring_token: "1".into(),
            done_token: "0".into(),
            fetch_power: ":FETCH:POW{}:VAL?".into(),
        }
    }
}

/// Substitutes the first `{}` in `template`. Templates without a
/// placeholder are sent unchanged.
pub fn render(template: &str, arg: impl AsRef<str>) -> String {
    template.replacen("{}", arg.as_ref(), 1)
}

//! Run configuration.
//!
//! Values are layered, later sources win:
//! 1. built-in defaults
//! 2. the TOML file (`wavesweep.toml` unless given on the command line)
//! 3. environment variables prefixed with `WAVESWEEP_`, nested keys joined
//!    by `__`, e.g. `WAVESWEEP_SWEEP__POLL_INTERVAL=20ms`
//!
//! Command line overrides are applied by the binary afterwards.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::proto::command::{LaserCommands, LaserProtocol, MeterCommands, MeterProtocol};
use crate::proto::transport::LinkOptions;
use crate::sweep::{SequenceMode, SweepConfig};

pub const DEFAULT_CONFIG: &str = "wavesweep.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{}", _0)]
    Figment(#[from] figment::Error),
    #[error("Config file {} does not exist", _0.display())]
    Missing(PathBuf),
    #[error("Invalid configuration: {}", _0)]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// Parent of the timestamped output directories.
    pub data_dir: PathBuf,
    pub plot: bool,
    pub spinner: bool,
    pub laser: InstrumentSettings,
    pub power_meter: InstrumentSettings,
    pub laser_protocol: LaserProtocol,
    pub meter_protocol: MeterProtocol,
    /// Replaces the `laser_protocol` preset when present.
    pub laser_commands: Option<LaserCommands>,
    /// Replaces the `meter_protocol` preset when present.
    pub meter_commands: Option<MeterCommands>,
    pub sweep: SweepSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// VISA style resource, `ASRL<port>::INSTR` or
    /// `TCPIP0::<host>::<port>::SOCKET`.
    pub resource: String,
    pub baudrate: u32,
    /// Appended to every command.
    pub terminator: String,
    /// Response timeout of a single query.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Extra attempts for a query that timed out.
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub settle_polls: u32,
    /// Upper bound for one wavelength step, `0s` disables it.
    #[serde(with = "humantime_serde")]
    pub step_timeout: Duration,
    pub channel: u8,
    pub power_min: Option<f64>,
    pub power_max: Option<f64>,
    pub sequence: SequenceMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            data_dir: PathBuf::from("data"),
            plot: true,
            spinner: true,
            laser: InstrumentSettings {
                resource: format!("ASRL{}::INSTR", crate::DEFAULT_TTY),
                ..InstrumentSettings::default()
            },
            power_meter: InstrumentSettings {
                resource: format!("ASRL{}::INSTR", crate::DEFAULT_METER_TTY),
                ..InstrumentSettings::default()
            },
            laser_protocol: LaserProtocol::SantecScpi,
            meter_protocol: MeterProtocol::ThorlabsPm320e,
            laser_commands: None,
            meter_commands: None,
            sweep: SweepSettings::default(),
        }
    }
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            resource: String::new(),
            baudrate: crate::DEFAULT_BAUDRATE,
            terminator: "\n".into(),
            timeout: Duration::from_secs(2),
            retries: 2,
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        let defaults = SweepConfig::default();
        Self {
            poll_interval: defaults.poll_interval,
            settle_polls: defaults.settle_polls,
            step_timeout: defaults.step_timeout.unwrap_or(Duration::ZERO),
            channel: defaults.channel,
            power_min: None,
            power_max: None,
            sequence: SequenceMode::default(),
        }
    }
}

impl Settings {
    /// Loads defaults, the config file and the environment.
    ///
    /// A missing file is only an error when `path` was given explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) if !p.exists() => return Err(ConfigError::Missing(p.to_path_buf())),
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG),
        };
        Self::from_providers(Toml::file(file), Env::prefixed("WAVESWEEP_").split("__"))
    }

    fn from_providers(file: impl Provider, env: impl Provider) -> Result<Self, ConfigError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(file)
            .merge(env)
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, instrument) in [("laser", &self.laser), ("power_meter", &self.power_meter)] {
            if instrument.resource.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{}.resource is empty", name)));
            }
            if instrument.terminator.is_empty() {
                return Err(ConfigError::Invalid(format!("{}.terminator is empty", name)));
            }
            if instrument.timeout.is_zero() {
                return Err(ConfigError::Invalid(format!("{}.timeout must be > 0", name)));
            }
        }
        if self.sweep.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep.poll_interval must be > 0".into()));
        }
        if self.sweep.settle_polls == 0 {
            return Err(ConfigError::Invalid("sweep.settle_polls must be >= 1".into()));
        }
        if self.sweep.channel == 0 {
            return Err(ConfigError::Invalid("sweep.channel starts at 1".into()));
        }
        if let (Some(min), Some(max)) = (self.sweep.power_min, self.sweep.power_max) {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "sweep.power_min {} is above sweep.power_max {}",
                    min, max
                )));
            }
        }
        Ok(())
    }

    pub fn laser_commands(&self) -> LaserCommands {
        self.laser_commands
            .clone()
            .unwrap_or_else(|| LaserCommands::preset(self.laser_protocol))
    }

    pub fn meter_commands(&self) -> MeterCommands {
        self.meter_commands
            .clone()
            .unwrap_or_else(|| MeterCommands::preset(self.meter_protocol))
    }

    pub fn sweep_config(&self) -> SweepConfig {
        let s = &self.sweep;
        let power_range = match (s.power_min, s.power_max) {
            (None, None) => None,
            (min, max) => Some((
                min.unwrap_or(f64::NEG_INFINITY),
                max.unwrap_or(f64::INFINITY),
            )),
        };
        SweepConfig {
            poll_interval: s.poll_interval,
            settle_polls: s.settle_polls,
            step_timeout: Some(s.step_timeout).filter(|d| !d.is_zero()),
            channel: s.channel,
            power_range,
        }
    }
}

impl InstrumentSettings {
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            baudrate: self.baudrate,
            terminator: self.terminator.clone(),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(s: &str) -> Result<Settings, ConfigError> {
        Settings::from_providers(Toml::string(s), Figment::new())
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        let config = settings.sweep_config();
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.settle_polls, 10);
        assert_eq!(config.step_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.channel, 1);
        assert_eq!(config.power_range, None);
        assert_eq!(settings.laser_commands(), LaserCommands::santec_scpi());
    }

    #[test]
    fn file_overrides_defaults() {
        let settings = from_toml(
            r#"
            data_dir = "/tmp/sweeps"
            laser_protocol = "santec-serial"

            [laser]
            resource = "TCPIP0::10.0.0.5::5000::SOCKET"
            terminator = "\r"
            timeout = "500ms"

            [sweep]
            poll_interval = "20ms"
            step_timeout = "0s"
            power_max = 0.01
            sequence = "accumulated"
            "#,
        )
        .unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/sweeps"));
        assert_eq!(settings.laser.terminator, "\r");
        assert_eq!(settings.laser.timeout, Duration::from_millis(500));
        assert_eq!(settings.laser.retries, 2);
        assert_eq!(settings.laser_commands(), LaserCommands::santec_serial());
        assert_eq!(settings.sweep.sequence, SequenceMode::Accumulated);

        let config = settings.sweep_config();
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.step_timeout, None);
        assert_eq!(config.power_range, Some((f64::NEG_INFINITY, 0.01)));
    }

    #[test]
    fn custom_command_table_replaces_preset() {
        let settings = from_toml(
            r#"
            [meter_commands]
            ident = "*IDN?"
            start_measurement = "INIT{}"
            measurement_status = "STAT{}?"
            measuring_token = "BUSY"
            done_token = "IDLE"
            fetch_power = "FETC{}?"
            "#,
        )
        .unwrap();
        let table = settings.meter_commands();
        assert_eq!(table.done_token, "IDLE");
        assert_eq!(table.fetch_power, "FETC{}?");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            from_toml("[sweep]\nsettle_polls = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml("[sweep]\npoll_interval = \"0ms\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml("[sweep]\npower_min = 1.0\npower_max = 0.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml("[power_meter]\nresource = \"\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml("[sweep]\nsequence = \"random\""),
            Err(ConfigError::Figment(_))
        ));
    }

    #[test]
    fn shipped_config_parses() {
        let settings = from_toml(include_str!("../wavesweep.toml")).unwrap();
        #[cfg(unix)]
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.meter_commands(), MeterCommands::thorlabs_pm320e());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/wavesweep.toml");
        assert!(matches!(
            Settings::load(Some(missing)),
            Err(ConfigError::Missing(_))
        ));
    }
}

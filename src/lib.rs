//!
//! Automated wavelength sweeps with a tunable laser and an optical power meter.
//!
//! <br>
//!
//! # Details
//!
//! - At every wavelength of the sweep the laser is moved, the power meter is
//!   triggered and the reading is recorded once the meter reports it done.
//!
//! - Both instruments are plain ASCII request/response devices reached over
//!   a serial port or a raw TCP socket. The wire strings live in command
//!   tables, see [`proto::command`].
//!
//! - Basic usage
//!
//!   ```no_run
//!   use tokio_util::sync::CancellationToken;
//!   use wavesweep::proto::command::{LaserCommands, MeterCommands};
//!   use wavesweep::proto::transport::{LinkOptions, StreamTransport};
//!   use wavesweep::{InstrumentSession, Laser, PowerMeter, Sweep, SweepConfig, WavelengthSequence};
//!
//!   #[tokio::main]
//!   async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!       let link = LinkOptions {
//!           baudrate: wavesweep::DEFAULT_BAUDRATE,
//!           terminator: "\n".into(),
//!           timeout: std::time::Duration::from_secs(2),
//!       };
//!       let laser_io = StreamTransport::open(&"ASRL/dev/ttyUSB0::INSTR".parse()?, &link).await?;
//!       let meter_io = StreamTransport::open(&"ASRL/dev/ttyUSB1::INSTR".parse()?, &link).await?;
//!       let mut laser = Laser::new(InstrumentSession::new("laser", laser_io), LaserCommands::santec_scpi());
//!       let mut meter = PowerMeter::new(InstrumentSession::new("meter", meter_io), MeterCommands::thorlabs_pm320e());
//!
//!       let sequence = WavelengthSequence::new(1550.0, 1551.0, 0.5)?;
//!       let result = Sweep::new(&mut laser, &mut meter, SweepConfig::default(), CancellationToken::new())
//!           .run(&sequence)
//!           .await;
//!       for s in &result.samples {
//!           println!("{} nm: {} W", s.wavelength, s.power);
//!       }
//!       Ok(())
//!   }
//!   ```
//!
//! # Supported devices
//!
//!  * Santec TSL-550 (SCPI and legacy serial command sets)
//!  * Thorlabs PM320E
//!

pub mod config;
pub mod laser;
pub mod power_meter;
pub mod progress;
pub mod proto;
pub mod session;
pub mod sink;
pub mod sweep;

pub use laser::Laser;
pub use power_meter::PowerMeter;
pub use proto::Result;
pub use session::InstrumentSession;
pub use sweep::{Sweep, SweepConfig, SweepResult, SweepSample, WavelengthSequence};

#[cfg(unix)]
pub const DEFAULT_TTY: &str = "/dev/ttyUSB0";
#[cfg(windows)]
pub const DEFAULT_TTY: &str = "COM1";

#[cfg(unix)]
pub const DEFAULT_METER_TTY: &str = "/dev/ttyUSB1";
#[cfg(windows)]
pub const DEFAULT_METER_TTY: &str = "COM2";

/// Default serial baudrate of the Santec TSL-550.
pub const DEFAULT_BAUDRATE: u32 = 9600;

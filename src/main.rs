#![deny(clippy::unwrap_used)]

use clap::{arg, command, value_parser, ArgMatches};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wavesweep::config::{ConfigError, InstrumentSettings, Settings};
use wavesweep::progress::Spinner;
use wavesweep::proto::transport::{Resource, StreamTransport};
use wavesweep::proto::response::Ident;
use wavesweep::proto::ProtoError;
use wavesweep::sink::{ResultSink, RunInfo};
use wavesweep::sweep::{SweepError, Termination};
use wavesweep::{InstrumentSession, Laser, PowerMeter, Sweep, WavelengthSequence};

const SPINNER_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() {
    let matches = command!() // requires `cargo` feature
        .arg(arg!(<output_folder> "Name of the output folder, a timestamp is appended"))
        .arg(
            arg!(<start_wavelength> "First wavelength in nm")
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true),
        )
        .arg(
            arg!(<stop_wavelength> "Last wavelength in nm")
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true),
        )
        .arg(arg!(<step_wavelength> "Step in nm").value_parser(value_parser!(f64)))
        .arg(
            arg!(
                -c --config <FILE> "Configuration file"
            )
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(--laser <RESOURCE> "Laser resource, e.g. ASRL/dev/ttyUSB0::INSTR").required(false))
        .arg(arg!(--meter <RESOURCE> "Power meter resource").required(false))
        .arg(arg!(
            -d --debug ... "Turn debugging information on"
        ))
        .arg(arg!(--"no-plot" "Do not write graph.svg"))
        .get_matches();

    let settings = match load_settings(&matches) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    };
    init_tracing(matches.get_count("debug"), &settings.log_level);

    match run(&matches, &settings).await {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(e) => {
            report(&e, &settings);
            exit(1);
        }
    }
}

fn load_settings(matches: &ArgMatches) -> Result<Settings, ConfigError> {
    let mut settings = Settings::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    if let Some(resource) = matches.get_one::<String>("laser") {
        settings.laser.resource = resource.clone();
    }
    if let Some(resource) = matches.get_one::<String>("meter") {
        settings.power_meter.resource = resource.clone();
    }
    if matches.get_flag("no-plot") {
        settings.plot = false;
    }
    settings.validate()?;
    Ok(settings)
}

fn init_tracing(debug: u8, log_level: &str) {
    let fallback = match debug {
        0 => log_level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_session(
    name: &str,
    settings: &InstrumentSettings,
) -> Result<InstrumentSession<StreamTransport>, SweepError> {
    let resource: Resource = settings.resource.parse()?;
    let transport = StreamTransport::open(&resource, &settings.link_options()).await?;
    info!("Connected to {}: {}", name, resource);
    Ok(InstrumentSession::new(name, transport).with_retries(settings.retries))
}

fn describe(idn: &str) -> String {
    Ident::try_from(idn)
        .map(|id| id.to_string())
        .unwrap_or_else(|_| idn.to_string())
}

/// Returns whether the sweep completed and its results were written.
async fn run(matches: &ArgMatches, settings: &Settings) -> Result<bool, SweepError> {
    let folder = matches
        .get_one::<String>("output_folder")
        .cloned()
        .unwrap_or_default();
    let start = matches.get_one::<i64>("start_wavelength").copied().unwrap_or_default() as f64;
    let stop = matches.get_one::<i64>("stop_wavelength").copied().unwrap_or_default() as f64;
    let step = matches.get_one::<f64>("step_wavelength").copied().unwrap_or_default();

    let sequence = WavelengthSequence::with_mode(start, stop, step, settings.sweep.sequence)?;
    info!(points = sequence.len(), "Sweeping {} nm to {} nm in {} nm steps", start, stop, step);

    let mut laser = Laser::new(
        open_session("laser", &settings.laser).await?,
        settings.laser_commands(),
    );
    let mut meter = PowerMeter::new(
        open_session("power meter", &settings.power_meter).await?,
        settings.meter_commands(),
    );
    let run_info = RunInfo {
        start,
        stop,
        step,
        laser: laser.ident().await?,
        power_meter: meter.ident().await?,
    };
    info!("Laser: {}", describe(&run_info.laser));
    info!("Power meter: {}", describe(&run_info.power_meter));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            on_ctrl_c.cancel();
        }
    });

    let spinner = Spinner::on_terminal(settings.spinner, SPINNER_INTERVAL);
    let result = Sweep::new(&mut laser, &mut meter, settings.sweep_config(), cancel)
        .run(&sequence)
        .await;
    if let Some(spinner) = spinner {
        spinner.stop().await;
    }

    if let Termination::Aborted(e) = &result.termination {
        error!("Sweep aborted after {} samples: {}", result.samples.len(), e);
    }

    let sink = ResultSink::new(&settings.data_dir, folder).with_plot(settings.plot);
    match sink.persist(&result, &run_info) {
        Ok(dir) => {
            println!("{}", dir.display());
            Ok(result.is_complete())
        }
        Err(e) => {
            error!("Could not write results: {}", e);
            Ok(false)
        }
    }
}

fn report(e: &SweepError, settings: &Settings) {
    match e {
        SweepError::Proto(ProtoError::Serial(err)) => {
            if err.kind() == tokio_serial::ErrorKind::NoDevice
                || matches!(err.kind(), tokio_serial::ErrorKind::Io(ErrorKind::NotFound))
            {
                eprintln!("Serial port not found, check the configured resources");
            } else {
                eprintln!("I/O Error: {}", err);
            }
        }
        SweepError::Proto(ProtoError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            eprintln!("Serial port not found, check the configured resources");
        }
        SweepError::Proto(ProtoError::Abort) => {
            eprintln!("Failed to communicate with instrument, aborting!");
        }
        SweepError::Proto(ProtoError::UnsupportedResource(_)) => {
            eprintln!(
                "{} (laser: {}, power meter: {})",
                e, settings.laser.resource, settings.power_meter.resource
            );
        }
        _ => eprintln!("{}", e),
    }
}

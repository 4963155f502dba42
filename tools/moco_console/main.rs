//! MoCo diagnostic console
//!
//! Sends one command to a MoCo and prints the answer.
//!
//! ```text
//! moco_console --url socket://moco-ctrl:5000 info
//! moco_console --config config/moco.toml get setpoint
//! moco_console set speed-move 3.0
//! moco_console cmd "?STATE"
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use figment::providers::Serialized;
use moco::{Moco, MocoConfig, MocoError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// MoCo diagnostic console
#[derive(Parser, Debug)]
#[command(name = "moco_console")]
#[command(about = "Send commands to a MoCo monochromator controller")]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = moco::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Connection URL, overrides the configuration (device path or socket://host:port)
    #[arg(short, long)]
    url: Option<String>,

    /// Reply timeout in milliseconds, overrides the configuration
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log every payload sent and received
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a raw protocol line; lines starting with '?' are queries
    Cmd {
        /// The protocol line, e.g. "?BEAM" or "TAU 0.5"
        line: String,
    },
    /// Print the status report
    Info,
    /// Print the instrument's command summary
    Help,
    /// Print the controller state
    State,
    /// Read the in/out beam signals
    Beam,
    /// Read the filtered in/out beam signals
    Fbeam,
    /// Read one attribute
    Get {
        /// Attribute to read
        attr: Attr,
    },
    /// Write one attribute
    Set {
        /// Attribute to write
        attr: Attr,
        /// New value
        value: String,
    },
    /// Start regulation
    Go,
    /// Stop regulation
    Stop,
    /// Start automatic tuning
    Tune,
    /// Tune onto the peak
    TunePeak,
    /// Pause or resume regulation
    Pause {
        /// ON or OFF
        state: OnOff,
    },
    /// Reset the controller
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Attr {
    InBeam,
    OutBeam,
    Mode,
    State,
    Setpoint,
    Tau,
    SoftBeam,
    Piezo,
    Phase,
    Amplitude,
    Frequency,
    Slope,
    Oscil,
    OscBeam,
    Speed,
    SpeedScan,
    SpeedMove,
    Flags,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OnOff {
    On,
    Off,
}

impl OnOff {
    fn as_arg(self) -> &'static str {
        match self {
            OnOff::On => "ON",
            OnOff::Off => "OFF",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<MocoError>() {
                Some(moco_err) if moco_err.is_transport() => {
                    eprintln!("no answer from MoCo, check if it is ON ({:#})", err)
                }
                Some(MocoError::Device { detail }) => eprintln!("MoCo: {}", detail),
                _ => eprintln!("Error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let directive = if verbose { "moco=debug" } else { "moco=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<MocoConfig> {
    let mut figment = MocoConfig::figment(&cli.config);
    if let Some(url) = &cli.url {
        figment = figment.merge(Serialized::default("connection.url", url.clone()));
    }
    if let Some(ms) = cli.timeout_ms {
        figment = figment.merge(Serialized::default(
            "connection.timeout",
            format!("{}ms", ms),
        ));
    }
    MocoConfig::from_figment(figment)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let mut moco = Moco::from_config(&config)?;

    match cli.command {
        Command::Cmd { line } => print_lines(moco.online_command(&line)?),
        Command::Info => print_lines(moco.info()?),
        Command::Help => print_lines(moco.help()?),
        Command::State => println!("{}", moco.state()?),
        Command::Beam => {
            let beam = moco.beam()?;
            println!("in: {}  out: {}", beam.beam_in, beam.beam_out);
        }
        Command::Fbeam => {
            let beam = moco.fbeam()?;
            println!("in: {}  out: {}", beam.beam_in, beam.beam_out);
        }
        Command::Get { attr } => println!("{}", get_attr(&mut moco, attr)?),
        Command::Set { attr, value } => set_attr(&mut moco, attr, &value)?,
        Command::Go => moco.go()?,
        Command::Stop => moco.stop()?,
        Command::Tune => moco.tune()?,
        Command::TunePeak => moco.tune_peak()?,
        Command::Pause { state } => moco.pause(state.as_arg())?,
        Command::Reset => moco.reset()?,
    }
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

fn get_attr(moco: &mut Moco, attr: Attr) -> Result<String> {
    let value = match attr {
        Attr::InBeam => moco.in_beam_conf()?,
        Attr::OutBeam => moco.out_beam_conf()?,
        Attr::Mode => moco.mode()?,
        Attr::State => moco.state()?,
        Attr::Setpoint => moco.setpoint()?.to_string(),
        Attr::Tau => moco.tau()?.to_string(),
        Attr::SoftBeam => moco.soft_beam()?.to_string(),
        Attr::Piezo => moco.piezo()?.to_string(),
        Attr::Phase => moco.phase()?.to_string(),
        Attr::Amplitude => moco.amplitude()?.to_string(),
        Attr::Frequency => moco.frequency()?.to_string(),
        Attr::Slope => moco.slope()?.to_string(),
        Attr::Oscil => moco.oscil()?,
        Attr::OscBeam => {
            let signals = moco.osc_beam_signals()?;
            format!("main: {}  quadrature: {}", signals.main, signals.quadrature)
        }
        Attr::Speed => {
            let speed = moco.speed()?;
            format!("scan: {}  move: {}", speed.scan, speed.moving)
        }
        Attr::SpeedScan => moco.scan_speed()?.to_string(),
        Attr::SpeedMove => moco.move_speed()?.to_string(),
        Attr::Flags => moco.operation_flags_raw()?,
    };
    Ok(value)
}

fn set_attr(moco: &mut Moco, attr: Attr, value: &str) -> Result<()> {
    let number = || -> Result<f64> {
        value
            .trim()
            .parse::<f64>()
            .with_context(|| format!("'{}' is not a number", value))
    };

    match attr {
        Attr::InBeam => moco.set_in_beam_conf(value)?,
        Attr::OutBeam => moco.set_out_beam_conf(value)?,
        Attr::Mode => moco.set_mode(value)?,
        Attr::Setpoint => moco.set_setpoint(number()?)?,
        Attr::Tau => moco.set_tau(number()?)?,
        Attr::SoftBeam => moco.set_soft_beam(number()?)?,
        Attr::Piezo => moco.set_piezo(number()?)?,
        Attr::Phase => moco.set_phase(number()?)?,
        Attr::Amplitude => moco.set_amplitude(number()?)?,
        Attr::Frequency => moco.set_frequency(number()?)?,
        Attr::Slope => moco.set_slope(number()?)?,
        Attr::Oscil => moco.set_oscil(value)?,
        Attr::SpeedScan => moco.set_scan_speed(number()?)?,
        Attr::SpeedMove => moco.set_move_speed(number()?)?,
        Attr::Speed => {
            let halves: Vec<&str> = value.split_whitespace().collect();
            let [scan, moving] = halves.as_slice() else {
                bail!("speed takes two values, e.g. \"1.0 3.0\"");
            };
            let scan = scan.parse::<f64>().context("scan speed")?;
            let moving = moving.parse::<f64>().context("move speed")?;
            moco.set_speed(scan, moving)?;
        }
        Attr::Flags => {
            let flags: Vec<&str> = value.split_whitespace().collect();
            moco.set_operation_flags(&flags[..])?;
        }
        Attr::State | Attr::OscBeam => bail!("{:?} is read-only", attr),
    }
    Ok(())
}

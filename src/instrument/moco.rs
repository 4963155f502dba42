//! MoCo monochromator controller driver
//!
//! Protocol engine for the MoCo line protocol. Every public method is one
//! self-contained request/response exchange on the owned connection.
//!
//! ## Wire format
//!
//! - write: `"<VERB> <ARGS>\r?ERR\r"`, answered by one line which is `OK` on
//!   success and the error text otherwise
//! - query: `"?<VERB>\r"`, answered by one line, or by a delimited burst for
//!   `HELP` and `INFO`
//! - a query answered with `ERROR` is followed by `?ERR\r` to fetch the reason
//!
//! ## Example
//!
//! ```no_run
//! use moco::Moco;
//!
//! fn main() -> moco::MocoResult<()> {
//!     let mut moco = Moco::for_url("/dev/ttyUSB0")?;
//!     moco.set_setpoint(0.8)?;
//!     let beam = moco.beam()?;
//!     println!("in {:.3} / out {:.3}", beam.beam_in, beam.beam_out);
//!     moco.go()?;
//!     Ok(())
//! }
//! ```
//!
//! The engine holds no lock. Callers sharing one instrument between threads
//! wrap it in a `Mutex`.

use super::reply::{
    decode_line, is_error_reply, is_multiline, parse_float, parse_pair, render_float,
    split_tokens, BeamSignal, MultilineFraming, OscBeamSignals, Reply, Speed,
};
use crate::adapters::{ConnectionOptions, SyncConnection, Transport};
use crate::config::MocoConfig;
use crate::error::{MocoError, MocoResult};
use tracing::{debug, warn};

/// Driver for one MoCo instrument.
#[derive(Debug)]
pub struct Moco<T = SyncConnection> {
    transport: T,
    framing: MultilineFraming,
}

impl Moco<SyncConnection> {
    /// Open `url` with default options (1.5 s timeout, 9600 baud).
    pub fn for_url(url: &str) -> MocoResult<Self> {
        Self::open(url, &ConnectionOptions::default())
    }

    /// Open `url` with explicit connection options.
    pub fn open(url: &str, options: &ConnectionOptions) -> MocoResult<Self> {
        Ok(Self::new(SyncConnection::open(url, options)?))
    }

    /// Open the connection described by a loaded configuration.
    pub fn from_config(config: &MocoConfig) -> MocoResult<Self> {
        let moco = Self::open(&config.connection.url, &config.connection.options())?;
        Ok(moco.with_framing(config.protocol.multiline_framing))
    }
}

impl<T: Transport> Moco<T> {
    /// Wrap an already opened transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            framing: MultilineFraming::default(),
        }
    }

    /// Choose how `HELP`/`INFO` delimiter lines are handled.
    pub fn with_framing(mut self, framing: MultilineFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Active multi-line framing policy
    pub fn framing(&self) -> MultilineFraming {
        self.framing
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably (e.g. to queue more mock replies)
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ------------------------------------------------------------------------
    //                           Protocol primitives
    // ------------------------------------------------------------------------

    /// Send a write command and check the instrument acknowledged it.
    ///
    /// `command` is the verb plus its arguments, without terminator. The
    /// error check query is appended to the same payload.
    ///
    /// # Errors
    /// [`MocoError::Device`] with the reply text when the answer is not `ok`
    /// (any case), or a transport error.
    pub fn write_command(&mut self, command: &str) -> MocoResult<()> {
        let payload = format!("{}\r?ERR\r", command);
        let answer = decode_line(&self.transport.write_read_line(payload.as_bytes())?);

        if answer.eq_ignore_ascii_case("ok") {
            debug!(command, "acknowledged");
            Ok(())
        } else {
            warn!(command, detail = %answer, "MoCo rejected command");
            Err(MocoError::Device { detail: answer })
        }
    }

    /// Send a query and return the decoded answer.
    ///
    /// `HELP` and `INFO` return [`Reply::Lines`] with the framing policy
    /// applied; every other verb returns [`Reply::Line`].
    ///
    /// # Errors
    /// [`MocoError::Device`] when the instrument answers `ERROR`; the detail is
    /// fetched with a follow-up `?ERR`.
    pub fn read_command(&mut self, verb: &str) -> MocoResult<Reply> {
        if is_multiline(verb) {
            self.query_lines(verb).map(Reply::Lines)
        } else {
            self.query(verb).map(Reply::Line)
        }
    }

    fn query(&mut self, verb: &str) -> MocoResult<String> {
        let payload = format!("?{}\r", verb);
        let answer = decode_line(&self.transport.write_read_line(payload.as_bytes())?);

        if is_error_reply(&answer) {
            return Err(self.fetch_device_error(verb));
        }
        Ok(answer)
    }

    fn query_lines(&mut self, verb: &str) -> MocoResult<Vec<String>> {
        let payload = format!("?{}\r", verb);
        let lines: Vec<String> = self
            .transport
            .write_read_lines(payload.as_bytes())?
            .iter()
            .map(|raw| decode_line(raw))
            .collect();

        match lines.as_slice() {
            [] => return Err(MocoError::Timeout(self.transport.read_timeout())),
            [only] if is_error_reply(only) => return Err(self.fetch_device_error(verb)),
            _ => {}
        }
        self.framing.apply(verb, lines)
    }

    /// Ask the instrument why the last query failed.
    ///
    /// A transport failure during the follow-up is returned instead.
    fn fetch_device_error(&mut self, verb: &str) -> MocoError {
        match self.transport.write_read_line(b"?ERR\r") {
            Ok(raw) => {
                let detail = decode_line(&raw);
                warn!(verb, detail = %detail, "MoCo reported query error");
                MocoError::Device { detail }
            }
            Err(err) => err,
        }
    }

    fn read_float(&mut self, verb: &str) -> MocoResult<f64> {
        let answer = self.query(verb)?;
        parse_float(verb, &answer)
    }

    fn write_float(&mut self, verb: &str, value: f64) -> MocoResult<()> {
        self.write_command(&format!("{} {}", verb, render_float(value)))
    }

    fn write_text(&mut self, verb: &str, value: &str) -> MocoResult<()> {
        self.write_command(&format!("{} {}", verb, value))
    }

    // ------------------------------------------------------------------------
    //                           Attributes
    // ------------------------------------------------------------------------

    /// In-beam signal configuration (`?INBEAM`)
    pub fn in_beam_conf(&mut self) -> MocoResult<String> {
        self.query("INBEAM")
    }

    /// Set the in-beam signal configuration (`INBEAM`)
    pub fn set_in_beam_conf(&mut self, conf: &str) -> MocoResult<()> {
        self.write_text("INBEAM", conf)
    }

    /// Out-beam signal configuration (`?OUTBEAM`)
    pub fn out_beam_conf(&mut self) -> MocoResult<String> {
        self.query("OUTBEAM")
    }

    /// Set the out-beam signal configuration (`OUTBEAM`)
    pub fn set_out_beam_conf(&mut self, conf: &str) -> MocoResult<()> {
        self.write_text("OUTBEAM", conf)
    }

    /// Operation mode (`?MODE`)
    pub fn mode(&mut self) -> MocoResult<String> {
        self.query("MODE")
    }

    /// Set the operation mode (`MODE`)
    pub fn set_mode(&mut self, mode: &str) -> MocoResult<()> {
        self.write_text("MODE", mode)
    }

    /// Controller state (`?STATE`)
    pub fn state(&mut self) -> MocoResult<String> {
        self.query("STATE")
    }

    /// Regulation set-point (`?SETPOINT`)
    pub fn setpoint(&mut self) -> MocoResult<f64> {
        self.read_float("SETPOINT")
    }

    /// Set the regulation set-point (`SETPOINT`)
    pub fn set_setpoint(&mut self, value: f64) -> MocoResult<()> {
        self.write_float("SETPOINT", value)
    }

    /// Regulation time constant (`?TAU`)
    pub fn tau(&mut self) -> MocoResult<f64> {
        self.read_float("TAU")
    }

    /// Set the regulation time constant (`TAU`)
    pub fn set_tau(&mut self, value: f64) -> MocoResult<()> {
        self.write_float("TAU", value)
    }

    /// Software in-beam level (`?SOFTBEAM`)
    pub fn soft_beam(&mut self) -> MocoResult<f64> {
        self.read_float("SOFTBEAM")
    }

    /// Set the software in-beam level (`SOFTBEAM`)
    pub fn set_soft_beam(&mut self, value: f64) -> MocoResult<()> {
        self.write_float("SOFTBEAM", value)
    }

    /// Piezo output voltage (`?PIEZO`)
    pub fn piezo(&mut self) -> MocoResult<f64> {
        self.read_float("PIEZO")
    }

    /// Set the piezo output voltage (`PIEZO`)
    pub fn set_piezo(&mut self, value: f64) -> MocoResult<()> {
        self.write_float("PIEZO", value)
    }

    /// Oscillation phase (`?PHASE`)
    pub fn phase(&mut self) -> MocoResult<f64> {
        self.read_float("PHASE")
    }

    /// Set the oscillation phase (`PHASE`)
    pub fn set_phase(&mut self, value: f64) -> MocoResult<()> {
        self.write_float("PHASE", value)
    }

    /// Oscillation amplitude (`?AMPLITUDE`)
    pub fn amplitude(&mut self) -> MocoResult<f64> {
        self.read_float("AMPLITUDE")
    }

    /// Set the oscillation amplitude (`AMPLITUDE`)
    pub fn set_amplitude(&mut self, value: f64) -> MocoResult<()> {
        self.write_float("AMPLITUDE", value)
    }

    /// Oscillation frequency (`?FREQUENCY`)
    pub fn frequency(&mut self) -> MocoResult<f64> {
        self.read_float("FREQUENCY")
    }

    /// Set the oscillation frequency (`FREQUENCY`)
    pub fn set_frequency(&mut self, value: f64) -> MocoResult<()> {
        self.write_float("FREQUENCY", value)
    }

    /// Response function slope (`?SLOPE`)
    pub fn slope(&mut self) -> MocoResult<f64> {
        self.read_float("SLOPE")
    }

    /// Set the response function slope (`SLOPE`)
    pub fn set_slope(&mut self, value: f64) -> MocoResult<()> {
        self.write_float("SLOPE", value)
    }

    /// Oscillation switch (`?OSCIL`), `ON` or `OFF`
    pub fn oscil(&mut self) -> MocoResult<String> {
        self.query("OSCIL")
    }

    /// Set the oscillation switch (`OSCIL`)
    pub fn set_oscil(&mut self, value: &str) -> MocoResult<()> {
        self.write_text("OSCIL", value)
    }

    /// Start the oscillation
    pub fn oscil_on(&mut self) -> MocoResult<()> {
        self.set_oscil("ON")
    }

    /// Stop the oscillation
    pub fn oscil_off(&mut self) -> MocoResult<()> {
        self.set_oscil("OFF")
    }

    /// Operation flags as sent by the instrument (`?SET`)
    pub fn operation_flags_raw(&mut self) -> MocoResult<String> {
        self.query("SET")
    }

    /// Operation flags, one entry per flag (`?SET`)
    pub fn operation_flags(&mut self) -> MocoResult<Vec<String>> {
        Ok(split_tokens(&self.query("SET")?))
    }

    /// In/out beam signals (`?BEAM`)
    pub fn beam(&mut self) -> MocoResult<BeamSignal> {
        BeamSignal::parse("BEAM", self.query("BEAM")?)
    }

    /// Filtered in/out beam signals (`?FBEAM`)
    pub fn fbeam(&mut self) -> MocoResult<BeamSignal> {
        BeamSignal::parse("FBEAM", self.query("FBEAM")?)
    }

    /// Main and quadrature oscillation signals (`?OSCBEAM`)
    pub fn osc_beam_signals(&mut self) -> MocoResult<OscBeamSignals> {
        let answer = self.query("OSCBEAM")?;
        let (main, quadrature) = parse_pair("OSCBEAM", &answer)?;
        Ok(OscBeamSignals { main, quadrature })
    }

    /// Scan and move speeds (`?SPEED`)
    pub fn speed(&mut self) -> MocoResult<Speed> {
        let answer = self.query("SPEED")?;
        let (scan, moving) = parse_pair("SPEED", &answer)?;
        Ok(Speed { scan, moving })
    }

    /// Set both speeds in one `SPEED` command
    pub fn set_speed(&mut self, scan: f64, moving: f64) -> MocoResult<()> {
        self.write_command(&Speed { scan, moving }.to_command())
    }

    /// Scanning speed, first half of `?SPEED`
    pub fn scan_speed(&mut self) -> MocoResult<f64> {
        Ok(self.speed()?.scan)
    }

    /// Set the scanning speed, keeping the current move speed.
    pub fn set_scan_speed(&mut self, value: f64) -> MocoResult<()> {
        let current = self.speed()?;
        self.set_speed(value, current.moving)
    }

    /// Moving speed, second half of `?SPEED`
    pub fn move_speed(&mut self) -> MocoResult<f64> {
        Ok(self.speed()?.moving)
    }

    /// Set the moving speed, keeping the current scan speed.
    pub fn set_move_speed(&mut self, value: f64) -> MocoResult<()> {
        let current = self.speed()?;
        self.set_speed(current.scan, value)
    }

    // ------------------------------------------------------------------------
    //                           Commands
    // ------------------------------------------------------------------------

    /// Start automatic tuning (`TUNE`)
    pub fn tune(&mut self) -> MocoResult<()> {
        self.write_command("TUNE")
    }

    /// Tune onto the peak (`TUNE PEAK`)
    pub fn tune_peak(&mut self) -> MocoResult<()> {
        self.write_command("TUNE PEAK")
    }

    /// Start regulation (`GO`)
    pub fn go(&mut self) -> MocoResult<()> {
        self.write_command("GO")
    }

    /// Stop regulation (`STOP`)
    pub fn stop(&mut self) -> MocoResult<()> {
        self.write_command("STOP")
    }

    /// Pause or resume regulation (`PAUSE ON` / `PAUSE OFF`)
    pub fn pause(&mut self, arg: &str) -> MocoResult<()> {
        self.write_text("PAUSE", arg)
    }

    /// Raise operation flags (`SET <flag>...`)
    pub fn set_operation_flags<S: AsRef<str>>(&mut self, flags: &[S]) -> MocoResult<()> {
        self.write_text("SET", &join_flags(flags))
    }

    /// Clear operation flags (`CLEAR <flag>...`)
    pub fn clear_operation_flags<S: AsRef<str>>(&mut self, flags: &[S]) -> MocoResult<()> {
        self.write_text("CLEAR", &join_flags(flags))
    }

    /// Status report (`?INFO`), one entry per line
    pub fn info(&mut self) -> MocoResult<Vec<String>> {
        self.query_lines("INFO")
    }

    /// Command summary (`?HELP`), one entry per line
    pub fn help(&mut self) -> MocoResult<Vec<String>> {
        self.query_lines("HELP")
    }

    /// Reset the controller.
    ///
    /// The instrument does not answer reliably while it restarts, so this is
    /// a bare write with no error check and no read.
    pub fn reset(&mut self) -> MocoResult<()> {
        self.transport.write_raw(b"RESET\r")?;
        debug!("reset sent");
        Ok(())
    }

    /// Pass an arbitrary protocol line through.
    ///
    /// A line starting with `?` is a query and its reply lines are returned;
    /// anything else is a write command and yields an empty list once
    /// acknowledged.
    pub fn online_command(&mut self, line: &str) -> MocoResult<Vec<String>> {
        let line = line.trim_matches(|c| c == '\r' || c == '\n');
        match line.strip_prefix('?') {
            Some(verb) => Ok(self.read_command(verb)?.into_lines()),
            None => {
                self.write_command(line)?;
                Ok(Vec::new())
            }
        }
    }
}

fn join_flags<S: AsRef<str>>(flags: &[S]) -> String {
    flags
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

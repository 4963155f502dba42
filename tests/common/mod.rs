//! Common test utilities for MoCo integration tests
//!
//! Provides [`SimulatedMoco`], a minimal MoCo served on a loopback TCP port and
//! reached through `socket://` URLs. It understands:
//! - queries (`?VERB`), answered from a value table or with `ERROR`
//! - write commands, acknowledged through the trailing `?ERR`
//! - `?INFO` / `?HELP` bursts framed by `$` lines
//! - `RESET`, which restores the defaults and sends nothing back

#![allow(dead_code)] // Not every test file uses every helper

use moco::adapters::ConnectionOptions;
use moco::Moco;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Read timeout used by tests that expect an answer.
pub const TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Inter-line silence that ends a burst in tests.
pub const TEST_BURST_TIMEOUT: Duration = Duration::from_millis(100);

pub const INFO_LINES: [&str; 3] = ["MoCo 01.05", "MODE: OSCILLATION", "STATE: IDLE"];
pub const HELP_LINES: [&str; 2] = ["?BEAM - beam signals", "GO - start regulation"];

/// Verbs accepted by write commands and stored verbatim.
const WRITABLE: [&str; 13] = [
    "INBEAM", "OUTBEAM", "MODE", "SETPOINT", "TAU", "SOFTBEAM", "PIEZO", "PHASE", "AMPLITUDE",
    "FREQUENCY", "SLOPE", "OSCIL", "SPEED",
];

fn default_values() -> HashMap<String, String> {
    [
        ("INBEAM", "VOLT BIP 10"),
        ("OUTBEAM", "CURR UNI 1E-6"),
        ("MODE", "POSITION"),
        ("STATE", "IDLE"),
        ("SETPOINT", "0.5"),
        ("TAU", "0.1"),
        ("SOFTBEAM", "1.0"),
        ("PIEZO", "0.0"),
        ("PHASE", "0.0"),
        ("AMPLITUDE", "0.01"),
        ("FREQUENCY", "1000.0"),
        ("SLOPE", "1.0"),
        ("OSCIL", "OFF"),
        ("SPEED", "1.0 2.0"),
        ("SET", "AUTORUN"),
        ("BEAM", "1.5 2.25"),
        ("FBEAM", "1.25 2.0"),
        ("OSCBEAM", "0.5 -0.125"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[derive(Debug)]
struct SimState {
    values: HashMap<String, String>,
    received: Vec<String>,
    last_error: String,
    reject_next: Option<String>,
    silent: bool,
    reply_delay: Duration,
}

/// A MoCo simulator listening on `127.0.0.1:<ephemeral>`.
pub struct SimulatedMoco {
    addr: SocketAddr,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedMoco {
    /// Bind a listener and serve connections in a background thread.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(SimState {
            values: default_values(),
            received: Vec::new(),
            last_error: "OK".to_string(),
            reject_next: None,
            silent: false,
            reply_delay: Duration::ZERO,
        }));

        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => serve(stream, &shared),
                    Err(_) => break,
                }
            }
        });

        Self { addr, state }
    }

    /// `socket://` URL of this simulator
    pub fn url(&self) -> String {
        format!("socket://{}", self.addr)
    }

    /// Connect a driver with test timeouts.
    pub fn connect(&self) -> Moco {
        self.connect_with(
            ConnectionOptions::default()
                .with_timeout(TEST_TIMEOUT)
                .with_burst_timeout(TEST_BURST_TIMEOUT),
        )
    }

    /// Connect a driver with explicit options.
    pub fn connect_with(&self, options: ConnectionOptions) -> Moco {
        Moco::open(&self.url(), &options).unwrap()
    }

    /// Every command received so far, terminators stripped
    pub fn received(&self) -> Vec<String> {
        self.state.lock().unwrap().received.clone()
    }

    /// Current value of a stored attribute
    pub fn value(&self, verb: &str) -> Option<String> {
        self.state.lock().unwrap().values.get(verb).cloned()
    }

    /// Overwrite a stored attribute
    pub fn set_value(&self, verb: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(verb.to_string(), value.to_string());
    }

    /// Remove an attribute so querying it answers `ERROR`
    pub fn remove_value(&self, verb: &str) {
        self.state.lock().unwrap().values.remove(verb);
    }

    /// Reject the next write command with `detail`
    pub fn reject_next_write(&self, detail: &str) {
        self.state.lock().unwrap().reject_next = Some(detail.to_string());
    }

    /// Stop answering anything
    pub fn go_silent(&self) {
        self.state.lock().unwrap().silent = true;
    }

    /// Hold every reply back for `delay` before sending it
    pub fn delay_replies(&self, delay: Duration) {
        self.state.lock().unwrap().reply_delay = delay;
    }
}

fn serve(stream: TcpStream, state: &Mutex<SimState>) {
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\r', &mut buf) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = String::from_utf8_lossy(&buf)
            .trim_end_matches('\r')
            .trim_start_matches('\n')
            .to_string();

        let (reply, delay) = {
            let mut state = state.lock().unwrap();
            (handle(&command, &mut state), state.reply_delay)
        };
        if let Some(reply) = reply {
            thread::sleep(delay);
            if writer.write_all(reply.as_bytes()).is_err() {
                return;
            }
        }
    }
}

fn handle(command: &str, state: &mut SimState) -> Option<String> {
    state.received.push(command.to_string());
    if state.silent {
        return None;
    }

    if let Some(verb) = command.strip_prefix('?') {
        return Some(match verb {
            "ERR" => format!("{}\r\n", std::mem::replace(&mut state.last_error, "OK".into())),
            "INFO" => framed(&INFO_LINES),
            "HELP" => framed(&HELP_LINES),
            _ => match state.values.get(verb) {
                Some(value) => format!("{}\r\n", value),
                None => {
                    state.last_error = format!("{} not available", verb);
                    "ERROR\r\n".to_string()
                }
            },
        });
    }

    if command == "RESET" {
        state.values = default_values();
        return None;
    }

    state.last_error = match state.reject_next.take() {
        Some(detail) => detail,
        None => apply_write(command, &mut state.values),
    };
    None
}

fn apply_write(command: &str, values: &mut HashMap<String, String>) -> String {
    let (verb, args) = command.split_once(' ').unwrap_or((command, ""));
    let args = args.trim();

    match verb {
        "GO" => values.insert("STATE".into(), "RUN".into()),
        "STOP" => values.insert("STATE".into(), "IDLE".into()),
        "TUNE" => values.insert("STATE".into(), "TUNING".into()),
        "PAUSE" => values.insert("STATE".into(), format!("PAUSE {}", args)),
        "SET" | "CLEAR" => {
            let mut flags: Vec<String> = values
                .get("SET")
                .map(|f| f.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            for flag in args.split_whitespace() {
                flags.retain(|f| f != flag);
                if verb == "SET" {
                    flags.push(flag.to_string());
                }
            }
            values.insert("SET".into(), flags.join(" "))
        }
        _ if WRITABLE.contains(&verb) && !args.is_empty() => {
            values.insert(verb.to_string(), args.to_string())
        }
        _ => return format!("Unknown command: {}", verb),
    };
    "OK".to_string()
}

fn framed(lines: &[&str]) -> String {
    let mut reply = String::from("$\r\n");
    for line in lines {
        reply.push_str(line);
        reply.push_str("\r\n");
    }
    reply.push_str("$\r\n");
    reply
}

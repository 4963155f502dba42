//! Reply decoding and value rendering for the MoCo line protocol.
//!
//! Replies are ASCII lines terminated by `\r\n`. After the terminator is
//! stripped, a reply is interpreted as one of:
//!
//! - raw text (configuration strings, mode, state)
//! - a single decimal number
//! - exactly two whitespace-separated decimal numbers
//! - a list of whitespace-separated tokens
//!
//! Values going the other way are rendered with the shortest decimal form
//! that still reads back as a float (`1.0`, `0.25`, `-3.5e-7`).

use crate::error::{MocoError, MocoResult};
use serde::{Deserialize, Serialize};

/// Verbs whose query reply spans several lines.
pub const MULTILINE_VERBS: [&str; 2] = ["HELP", "INFO"];

/// Reply sentinel signalling a failed query.
pub const ERROR_SENTINEL: &str = "ERROR";

/// True if `verb` is answered with a multi-line burst.
pub fn is_multiline(verb: &str) -> bool {
    MULTILINE_VERBS
        .iter()
        .any(|multi| multi.eq_ignore_ascii_case(verb.trim()))
}

/// Decode raw reply bytes and strip the line terminator.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(|c| c == '\r' || c == '\n')
        .to_string()
}

/// True if the reply is the query error sentinel.
pub fn is_error_reply(reply: &str) -> bool {
    reply.split_whitespace().next() == Some(ERROR_SENTINEL)
}

/// Parse a single decimal number.
pub fn parse_float(verb: &str, reply: &str) -> MocoResult<f64> {
    reply
        .trim()
        .parse::<f64>()
        .map_err(|e| MocoError::format(verb, reply, format!("not a number ({})", e)))
}

/// Parse exactly two whitespace-separated decimal numbers.
pub fn parse_pair(verb: &str, reply: &str) -> MocoResult<(f64, f64)> {
    let tokens: Vec<&str> = reply.split_whitespace().collect();
    let [first, second] = tokens.as_slice() else {
        return Err(MocoError::format(
            verb,
            reply,
            format!("expected 2 values, found {}", tokens.len()),
        ));
    };
    Ok((parse_float(verb, first)?, parse_float(verb, second)?))
}

/// Split a reply into whitespace-separated tokens.
pub fn split_tokens(reply: &str) -> Vec<String> {
    reply.split_whitespace().map(str::to_string).collect()
}

/// Render a float for an outbound command.
///
/// Integral values keep their fractional part (`1.0`, not `1`), matching the
/// form the instrument documents in its examples.
pub fn render_float(value: f64) -> String {
    format!("{:?}", value)
}

/// How the delimiter lines around a `HELP`/`INFO` burst are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultilineFraming {
    /// Drop the first and last line of the burst.
    #[default]
    Strip,
    /// Return every line as received.
    Keep,
}

impl MultilineFraming {
    /// Apply the framing rule to a decoded burst.
    pub fn apply(self, verb: &str, mut lines: Vec<String>) -> MocoResult<Vec<String>> {
        match self {
            MultilineFraming::Keep => Ok(lines),
            MultilineFraming::Strip => {
                if lines.len() < 2 {
                    return Err(MocoError::format(
                        verb,
                        &lines.join("\\n"),
                        format!(
                            "expected opening and closing delimiter lines, got {} line(s)",
                            lines.len()
                        ),
                    ));
                }
                lines.pop();
                lines.remove(0);
                Ok(lines)
            }
        }
    }
}

/// Decoded answer to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Answer of an ordinary query.
    Line(String),
    /// Answer of a multi-line query, framing already applied.
    Lines(Vec<String>),
}

impl Reply {
    /// The single-line text, if this is a single-line reply.
    pub fn as_line(&self) -> Option<&str> {
        match self {
            Reply::Line(line) => Some(line),
            Reply::Lines(_) => None,
        }
    }

    /// Flatten into a list; a single line becomes a one-element list.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            Reply::Line(line) => vec![line],
            Reply::Lines(lines) => lines,
        }
    }
}

/// A beam reading (`?BEAM`, `?FBEAM`): the raw reply plus its two values.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamSignal {
    /// Reply text as sent by the instrument.
    pub raw: String,
    /// In-beam signal.
    pub beam_in: f64,
    /// Out-beam signal.
    pub beam_out: f64,
}

impl BeamSignal {
    pub(crate) fn parse(verb: &str, reply: String) -> MocoResult<Self> {
        let (beam_in, beam_out) = parse_pair(verb, &reply)?;
        Ok(Self {
            raw: reply,
            beam_in,
            beam_out,
        })
    }
}

/// Lock-in signals of the oscillation (`?OSCBEAM`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscBeamSignals {
    /// Main signal amplitude.
    pub main: f64,
    /// Quadrature signal amplitude.
    pub quadrature: f64,
}

/// Scan and move speeds, which the instrument only accepts together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speed {
    /// Scanning speed.
    pub scan: f64,
    /// Moving speed.
    pub moving: f64,
}

impl Speed {
    /// Outbound `SPEED` command carrying both values.
    pub fn to_command(self) -> String {
        format!(
            "SPEED {} {} ",
            render_float(self.scan),
            render_float(self.moving)
        )
    }
}

//! End-to-end protocol tests against a simulated MoCo over TCP.

mod common;

use common::{SimulatedMoco, HELP_LINES, INFO_LINES, TEST_TIMEOUT};
use moco::adapters::ConnectionOptions;
use moco::{Moco, MocoConfig, MocoError, MultilineFraming, Reply};
use std::time::{Duration, Instant};

#[test]
fn test_float_set_then_get() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    moco.set_setpoint(0.8).unwrap();
    assert_eq!(moco.setpoint().unwrap(), 0.8);

    moco.set_tau(2.0).unwrap();
    assert_eq!(moco.tau().unwrap(), 2.0);
    assert_eq!(sim.value("TAU").as_deref(), Some("2.0"));

    assert_eq!(
        sim.received(),
        ["SETPOINT 0.8", "?ERR", "?SETPOINT", "TAU 2.0", "?ERR", "?TAU"]
    );
}

#[test]
fn test_every_float_attribute_round_trips() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    moco.set_soft_beam(1.25).unwrap();
    moco.set_piezo(-3.5).unwrap();
    moco.set_phase(90.0).unwrap();
    moco.set_amplitude(0.02).unwrap();
    moco.set_frequency(1500.0).unwrap();
    moco.set_slope(-1.0).unwrap();

    assert_eq!(moco.soft_beam().unwrap(), 1.25);
    assert_eq!(moco.piezo().unwrap(), -3.5);
    assert_eq!(moco.phase().unwrap(), 90.0);
    assert_eq!(moco.amplitude().unwrap(), 0.02);
    assert_eq!(moco.frequency().unwrap(), 1500.0);
    assert_eq!(moco.slope().unwrap(), -1.0);
}

#[test]
fn test_string_attributes_round_trip() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    moco.set_in_beam_conf("CURR BIP 1E-3").unwrap();
    moco.set_out_beam_conf("VOLT UNI 5").unwrap();
    moco.set_mode("OSCILLATION").unwrap();
    moco.oscil_on().unwrap();

    assert_eq!(moco.in_beam_conf().unwrap(), "CURR BIP 1E-3");
    assert_eq!(moco.out_beam_conf().unwrap(), "VOLT UNI 5");
    assert_eq!(moco.mode().unwrap(), "OSCILLATION");
    assert_eq!(moco.oscil().unwrap(), "ON");

    moco.oscil_off().unwrap();
    assert_eq!(moco.oscil().unwrap(), "OFF");
}

#[test]
fn test_beam_readings() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    let beam = moco.beam().unwrap();
    assert_eq!(beam.raw, "1.5 2.25");
    assert_eq!((beam.beam_in, beam.beam_out), (1.5, 2.25));

    let fbeam = moco.fbeam().unwrap();
    assert_eq!((fbeam.beam_in, fbeam.beam_out), (1.25, 2.0));

    let osc = moco.osc_beam_signals().unwrap();
    assert_eq!((osc.main, osc.quadrature), (0.5, -0.125));
}

#[test]
fn test_malformed_beam_is_format_error() {
    let sim = SimulatedMoco::start();
    sim.set_value("BEAM", "1.5");
    let mut moco = sim.connect();

    assert!(matches!(moco.beam(), Err(MocoError::Format { .. })));
    // The connection stays usable afterwards
    assert_eq!(moco.state().unwrap(), "IDLE");
}

#[test]
fn test_speed_read_modify_write() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    moco.set_move_speed(3.0).unwrap();
    assert_eq!(sim.received()[..2], ["?SPEED", "SPEED 1.0 3.0 "]);
    assert_eq!(sim.value("SPEED").as_deref(), Some("1.0 3.0"));

    moco.set_scan_speed(0.5).unwrap();
    let speed = moco.speed().unwrap();
    assert_eq!((speed.scan, speed.moving), (0.5, 3.0));
    assert_eq!(moco.scan_speed().unwrap(), 0.5);
    assert_eq!(moco.move_speed().unwrap(), 3.0);
}

#[test]
fn test_info_and_help_strip_framing() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    assert_eq!(moco.info().unwrap(), INFO_LINES);
    assert_eq!(moco.help().unwrap(), HELP_LINES);
    // Burst reads leave nothing behind for the next exchange
    assert_eq!(moco.state().unwrap(), "IDLE");
}

#[test]
fn test_info_keep_framing() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect().with_framing(MultilineFraming::Keep);

    let lines = moco.info().unwrap();
    assert_eq!(lines.first().map(String::as_str), Some("$"));
    assert_eq!(lines.last().map(String::as_str), Some("$"));
    assert_eq!(lines.len(), INFO_LINES.len() + 2);
}

#[test]
fn test_query_error_fetches_detail() {
    let sim = SimulatedMoco::start();
    sim.remove_value("PIEZO");
    let mut moco = sim.connect();

    let err = moco.piezo().unwrap_err();
    assert_eq!(err.device_detail(), Some("PIEZO not available"));
    assert_eq!(sim.received(), ["?PIEZO", "?ERR"]);
}

#[test]
fn test_rejected_write_is_device_error() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    sim.reject_next_write("Parameter out of range");
    let err = moco.set_piezo(99.0).unwrap_err();
    assert!(matches!(err, MocoError::Device { ref detail } if detail == "Parameter out of range"));
    assert_eq!(sim.value("PIEZO").as_deref(), Some("0.0"));

    // Next write is accepted again
    moco.set_piezo(1.0).unwrap();
}

#[test]
fn test_unknown_write_is_device_error() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    let err = moco.write_command("BOGUS 1").unwrap_err();
    assert_eq!(err.device_detail(), Some("Unknown command: BOGUS"));
}

#[test]
fn test_regulation_commands() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    moco.go().unwrap();
    assert_eq!(moco.state().unwrap(), "RUN");
    moco.pause("ON").unwrap();
    assert_eq!(moco.state().unwrap(), "PAUSE ON");
    moco.stop().unwrap();
    assert_eq!(moco.state().unwrap(), "IDLE");
    moco.tune().unwrap();
    moco.tune_peak().unwrap();

    let writes: Vec<String> = sim
        .received()
        .into_iter()
        .filter(|c| !c.starts_with('?'))
        .collect();
    assert_eq!(writes, ["GO", "PAUSE ON", "STOP", "TUNE", "TUNE PEAK"]);
}

#[test]
fn test_operation_flags() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    moco.set_operation_flags(&["BEAMCHECK", "INTERLOCK"]).unwrap();
    assert_eq!(
        moco.operation_flags().unwrap(),
        ["AUTORUN", "BEAMCHECK", "INTERLOCK"]
    );

    moco.clear_operation_flags(&["AUTORUN"]).unwrap();
    assert_eq!(moco.operation_flags_raw().unwrap(), "BEAMCHECK INTERLOCK");
}

#[test]
fn test_reset_sends_bare_command() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    moco.set_tau(5.0).unwrap();
    moco.reset().unwrap();
    assert_eq!(moco.tau().unwrap(), 0.1);

    let received = sim.received();
    assert_eq!(received[2], "RESET");
    assert_eq!(received.len(), 4);
}

#[test]
fn test_online_command_passthrough() {
    let sim = SimulatedMoco::start();
    let mut moco = sim.connect();

    assert!(moco.online_command("MODE OSCILLATION").unwrap().is_empty());
    assert_eq!(moco.online_command("?MODE").unwrap(), ["OSCILLATION"]);
    assert_eq!(moco.online_command("?INFO\r\n").unwrap(), INFO_LINES);
    assert_eq!(
        moco.read_command("STATE").unwrap(),
        Reply::Line("IDLE".to_string())
    );
}

#[test]
fn test_silent_device_times_out() {
    let sim = SimulatedMoco::start();
    sim.go_silent();
    let timeout = Duration::from_millis(200);
    let mut moco = sim.connect_with(ConnectionOptions::default().with_timeout(timeout));

    let started = Instant::now();
    let err = moco.tau().unwrap_err();
    assert!(matches!(err, MocoError::Timeout(t) if t == timeout));
    assert!(err.is_transport());
    assert!(started.elapsed() >= timeout);
}

#[test]
fn test_silent_device_multiline_times_out() {
    let sim = SimulatedMoco::start();
    sim.go_silent();
    let timeout = Duration::from_millis(150);
    let mut moco = sim.connect_with(
        ConnectionOptions::default()
            .with_timeout(timeout)
            .with_burst_timeout(Duration::from_millis(50)),
    );

    let started = Instant::now();
    assert!(matches!(moco.info(), Err(MocoError::Timeout(t)) if t == timeout));
    assert!(started.elapsed() >= timeout);
}

#[test]
fn test_slow_burst_within_timeout() {
    let sim = SimulatedMoco::start();
    sim.delay_replies(Duration::from_millis(200));
    let mut moco = sim.connect_with(
        ConnectionOptions::default()
            .with_timeout(Duration::from_millis(1500))
            .with_burst_timeout(Duration::from_millis(100)),
    );

    assert_eq!(moco.info().unwrap(), INFO_LINES);
    // Nothing from the burst is left over for the next query
    assert_eq!(moco.state().unwrap(), "IDLE");
}

#[test]
fn test_from_config() {
    let sim = SimulatedMoco::start();
    let mut config = MocoConfig::for_url(sim.url());
    config.connection.timeout = TEST_TIMEOUT;
    config.connection.burst_timeout = Some(Duration::from_millis(100));
    config.protocol.multiline_framing = MultilineFraming::Keep;

    let mut moco = Moco::from_config(&config).unwrap();
    assert_eq!(moco.framing(), MultilineFraming::Keep);
    assert_eq!(moco.transport().url(), sim.url());
    assert_eq!(moco.info().unwrap().len(), INFO_LINES.len() + 2);
}

#[test]
fn test_unsupported_url_is_connection_error() {
    let err = Moco::for_url("rfc2217://localhost:5000").unwrap_err();
    assert!(matches!(err, MocoError::Connection(_)));
}

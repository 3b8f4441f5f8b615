use clap::{App, Arg};
use colored::*;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fzc_core::agent::{CycleReport, ZoneController};
use fzc_core::config::{FzcConfig, CYCLE_PERIOD_MS};
use fzc_core::fault_injection::{FaultInjector, Scenario, SimIo};
use fzc_core::protocol::TxPdu;
use fzc_core::safety::SafetyStatus;
use fzc_core::signals::{SelfTestResult, SignalBus, SIG_BRAKE_CMD, SIG_SELF_TEST_RESULT};
use fzc_core::subsystems::{LidarZone, LinkStatus};

const DEFAULT_CYCLES: &str = "600";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let scenario_names: Vec<&'static str> = Scenario::ALL.iter().map(|s| s.name()).collect();

    let matches = App::new("fzc-sim")
        .version("0.1.0")
        .about("Front zone controller software-in-the-loop simulator")
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("N")
                .help("Number of 10 ms cycles to run")
                .takes_value(true)
                .default_value(DEFAULT_CYCLES)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("cycle count must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("scenario")
                .short("s")
                .long("scenario")
                .value_name("SCENARIO")
                .help("Scripted fault scenario")
                .takes_value(true)
                .possible_values(&scenario_names)
                .default_value("nominal"),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for random fault injection")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("seed must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("realtime")
                .short("r")
                .long("realtime")
                .help("Pace cycles on a real 10 ms interval"),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Telemetry output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increase log verbosity"),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let cycles: u64 = matches.value_of("cycles").unwrap_or(DEFAULT_CYCLES).parse()?;
    let scenario = matches
        .value_of("scenario")
        .and_then(Scenario::from_name)
        .unwrap_or(Scenario::Nominal);
    let format = matches.value_of("format").unwrap_or("table").to_string();
    let realtime = matches.is_present("realtime");

    let config = match matches.value_of("config") {
        Some(path) => FzcConfig::from_file(path)?,
        None => FzcConfig::default(),
    };

    let mut injector = FaultInjector::new();
    if let Some(seed) = matches.value_of("seed") {
        injector = injector.with_seed(seed.parse()?);
    }
    injector.set_enabled(scenario.uses_injector());

    let mut controller = ZoneController::new(config, SimIo::new())?;
    controller
        .signals_mut()
        .write(SIG_SELF_TEST_RESULT, SelfTestResult::Passed as u32);

    println!("{}", "Front Zone Controller simulator".bright_blue().bold());
    println!(
        "   scenario: {}   cycles: {}   tick: {} ms{}",
        scenario.name().bright_cyan(),
        cycles,
        CYCLE_PERIOD_MS,
        if realtime { "   (real time)" } else { "" }
    );
    info!(scenario = scenario.name(), cycles, "simulation starting");

    let mut interval = time::interval(Duration::from_millis(u64::from(CYCLE_PERIOD_MS)));
    let mut last_report: Option<CycleReport> = None;
    let mut first_latch: Option<u64> = None;

    for cycle in 0..cycles {
        if realtime {
            interval.tick().await;
        }

        scenario.apply(cycle, controller.io_mut());
        injector.update(controller.io_mut());

        let report = controller.run_cycle();
        if first_latch.is_none() && report.link_status != LinkStatus::Ok {
            first_latch = Some(report.cycle);
        }

        let brake_cmd = controller.signals().read(SIG_BRAKE_CMD);
        match controller.poll_telemetry() {
            Ok(Some(json)) => match format.as_str() {
                "json" => println!("{}", json),
                "compact" => print_compact(&report),
                _ => print_row(&report, brake_cmd),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "telemetry dropped"),
        }

        last_report = Some(report);
    }

    let io = controller.io();
    println!();
    println!("{}", "Summary".bright_white().bold());
    if let Some(report) = last_report {
        println!("   lidar zone:     {}", zone_label(report.lidar_zone));
        println!("   link status:    {}", link_label(report.link_status));
        println!("   safety status:  {}", status_label(report.safety_status));
        println!("   fault mask:     {:#04x}", report.fault_mask.bits());
    }
    if let Some(cycle) = first_latch {
        println!("   link latched at cycle {}", cycle.to_string().bright_red());
    }
    let stats = controller.router().stats();
    println!(
        "   frames rx/tx:   {}/{}  (E2E failures {}, send failures {})",
        stats.frames_received, stats.frames_sent, stats.e2e_failures, stats.send_failures
    );
    println!(
        "   heartbeats:     {}   lidar warnings: {}",
        io.sent_count(TxPdu::Heartbeat),
        io.sent_count(TxPdu::LidarWarning)
    );
    println!("   watchdog edges: {}", io.wdi_toggles());
    let active: Vec<String> = controller
        .dtcs()
        .active_events()
        .map(|id| id.to_string())
        .collect();
    if active.is_empty() {
        println!("   active DTCs:    {}", "none".green());
    } else {
        println!("   active DTCs:    {}", active.join(", ").yellow());
    }
    if injector.get_config().enabled {
        println!(
            "   injected faults: {}",
            injector.get_stats().total_faults_injected
        );
    }

    Ok(())
}

fn zone_label(zone: LidarZone) -> ColoredString {
    match zone {
        LidarZone::Clear => "CLEAR".green(),
        LidarZone::Warning => "WARNING".yellow(),
        LidarZone::Braking => "BRAKING".bright_yellow().bold(),
        LidarZone::Emergency => "EMERGENCY".red().bold(),
        LidarZone::Fault => "FAULT".bright_red().bold(),
    }
}

fn link_label(status: LinkStatus) -> ColoredString {
    match status {
        LinkStatus::Ok => "OK".green(),
        LinkStatus::BusOff => "BUS-OFF".bright_red().bold(),
        LinkStatus::Silence => "SILENCE".bright_red().bold(),
        LinkStatus::ErrorWarning => "ERROR-WARNING".bright_red().bold(),
    }
}

fn status_label(status: SafetyStatus) -> ColoredString {
    match status {
        SafetyStatus::Ok => "OK".green(),
        SafetyStatus::Degraded => "DEGRADED".yellow(),
        SafetyStatus::Fault => "FAULT".bright_red().bold(),
    }
}

fn print_compact(report: &CycleReport) {
    println!(
        "{} zone={:?} link={:?} safety={:?} mask={:#04x}",
        report.cycle,
        report.lidar_zone,
        report.link_status,
        report.safety_status,
        report.fault_mask.bits()
    );
}

fn print_row(report: &CycleReport, brake_cmd: u32) {
    println!(
        "{:>6}  {:<10} {:<14} {:<9} mask {:#04x}  brake {:>3}%  rx {} tx {}",
        report.cycle,
        zone_label(report.lidar_zone),
        link_label(report.link_status),
        status_label(report.safety_status),
        report.fault_mask.bits(),
        brake_cmd,
        report.rx.received,
        report.tx.sent
    );
}

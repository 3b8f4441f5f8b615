use fzc_core::agent::*;
use fzc_core::config::FzcConfig;
use fzc_core::fault::*;
use fzc_core::fault_injection::*;
use fzc_core::protocol::TxPdu;
use fzc_core::safety::{FaultMask, SafetyStatus};
use fzc_core::signals::*;
use fzc_core::subsystems::{ControllerMode, LidarZone, LinkStatus};
use fzc_core::telemetry::TelemetrySnapshot;

fn controller() -> ZoneController<SimIo> {
    let mut controller = ZoneController::new(FzcConfig::default(), SimIo::new()).unwrap();
    controller
        .signals_mut()
        .write(SIG_SELF_TEST_RESULT, SelfTestResult::Passed as u32);
    controller
}

/// Runs `cycles` cycles of `scenario` starting from scenario cycle `from`.
fn run(
    controller: &mut ZoneController<SimIo>,
    scenario: Scenario,
    from: u64,
    cycles: u64,
) -> Vec<CycleReport> {
    (from..from + cycles)
        .map(|cycle| {
            scenario.apply(cycle, controller.io_mut());
            controller.run_cycle()
        })
        .collect()
}

#[test]
fn test_controller_initialization() {
    let controller = controller();
    assert_eq!(controller.cycle(), 0);
    assert_eq!(controller.lidar().zone(), LidarZone::Fault);
    assert_eq!(controller.link_guard().status(), LinkStatus::Ok);
    assert_eq!(controller.router().tx_alive(), 0);
    assert_eq!(controller.dtcs().active_events().count(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = FzcConfig::default();
    config.lidar.emergency_cm = 80;
    let result = ZoneController::new(config, SimIo::new());
    assert!(matches!(result, Err(ControllerError::Config(_))));
}

#[test]
fn test_nominal_operation() {
    let mut controller = controller();
    let reports = run(&mut controller, Scenario::Nominal, 0, 300);

    for report in &reports {
        assert_eq!(report.lidar_zone, LidarZone::Clear);
        assert_eq!(report.link_status, LinkStatus::Ok);
        assert_eq!(report.safety_status, SafetyStatus::Ok);
        assert_eq!(report.fault_mask, FaultMask::NONE);
        assert_eq!(report.rx.received, 4);
        assert_eq!(report.rx.e2e_failures, 0);
    }
    assert_eq!(reports.last().unwrap().cycle, 300);

    let io = controller.io();
    assert_eq!(io.wdi_toggles(), 300);
    assert_eq!(io.sent_count(TxPdu::Heartbeat), 60);
    assert_eq!(io.sent_count(TxPdu::LidarWarning), 0);
    assert_eq!(controller.signals().read(SIG_BRAKE_CMD), 0);
    assert_eq!(controller.dtcs().active_events().count(), 0);
}

#[test]
fn test_heartbeat_reports_vehicle_state_and_mask() {
    let mut controller = controller();
    run(&mut controller, Scenario::Nominal, 0, 5);

    let frame = controller
        .router()
        .last_tx_frame(TxPdu::Heartbeat)
        .copied()
        .unwrap();
    assert_eq!(frame[3], VehicleState::Run as u8);
    assert_eq!(&frame[4..6], &[0, 0]);
}

#[test]
fn test_obstacle_approach_walks_through_zones() {
    let mut controller = controller();
    let reports = run(&mut controller, Scenario::ObstacleApproach, 0, 300);

    let zone_at = |cycle: u64| reports[cycle as usize].lidar_zone;
    // scenario cycle n reads 300 - n cm
    assert_eq!(zone_at(150), LidarZone::Clear);
    assert_eq!(zone_at(220), LidarZone::Warning);
    assert_eq!(zone_at(260), LidarZone::Braking);
    assert_eq!(zone_at(290), LidarZone::Emergency);

    assert!(controller.io().sent_count(TxPdu::LidarWarning) > 0);
    let warning = controller
        .router()
        .last_tx_frame(TxPdu::LidarWarning)
        .copied()
        .unwrap();
    assert_eq!(warning[2], LidarZone::Emergency as u8);
}

#[test]
fn test_sensor_dropout_degrades_but_keeps_feeding() {
    let mut controller = controller();
    run(&mut controller, Scenario::SensorDropout, 0, 100);
    let toggles_before = controller.io().wdi_toggles();

    let reports = run(&mut controller, Scenario::SensorDropout, 100, 20);

    // timeout window is ten cycles
    assert_eq!(reports[8].lidar_zone, LidarZone::Clear);
    assert_eq!(reports[9].lidar_zone, LidarZone::Fault);
    let last = reports.last().unwrap();
    assert_eq!(last.safety_status, SafetyStatus::Degraded);
    assert!(last.fault_mask.contains(FaultMask::LIDAR));
    assert!(controller.dtcs().is_failed(DTC_LIDAR_TIMEOUT));
    assert_eq!(controller.io().wdi_toggles(), toggles_before + 20);
}

#[test]
fn test_stuck_sensor_is_detected() {
    let mut controller = controller();
    let reports = run(&mut controller, Scenario::StuckSensor, 0, 200);

    assert_eq!(reports[99].lidar_zone, LidarZone::Clear);
    assert_eq!(reports[199].lidar_zone, LidarZone::Fault);
    assert!(controller.dtcs().is_failed(DTC_LIDAR_STUCK));
}

#[test]
fn test_corrupted_commands_fall_back_to_safe_defaults() {
    let mut controller = controller();
    run(&mut controller, Scenario::CorruptedCommands, 0, 100);

    let report = run(&mut controller, Scenario::CorruptedCommands, 100, 1)[0];

    assert_eq!(report.rx.e2e_failures, 4);
    assert_eq!(controller.signals().read(SIG_BRAKE_CMD), 100);
    assert_eq!(controller.signals().read(SIG_STEER_CMD), 0);
    assert_eq!(controller.signals().read(SIG_ESTOP_ACTIVE), 1);
    assert_eq!(controller.router().stats().safe_defaults_applied, 3);

    // next clean cycle restores the commanded values
    run(&mut controller, Scenario::CorruptedCommands, 101, 1);
    assert_eq!(controller.signals().read(SIG_BRAKE_CMD), 0);
    assert_eq!(controller.signals().read(SIG_ESTOP_ACTIVE), 0);
}

#[test]
fn test_bus_off_latches_safe_state_for_good() {
    let mut controller = controller();
    run(&mut controller, Scenario::BusOff, 0, 100);
    let reports = run(&mut controller, Scenario::BusOff, 100, 100);

    assert!(reports.iter().all(|r| r.link_status == LinkStatus::BusOff));
    assert_eq!(controller.signals().read(SIG_BRAKE_CMD), 100);
    assert_eq!(controller.signals().read(SIG_STEER_CMD), 0);
    assert_eq!(
        controller.signals().read(SIG_BUZZER_PATTERN),
        BuzzerPattern::Continuous as u32
    );
    assert!(controller.dtcs().is_failed(DTC_CAN_BUS_OFF));
    assert!(controller.router().stats().send_failures > 0);

    // controller recovers, latch does not
    controller.io_mut().mode = ControllerMode::Started;
    let reports = run(&mut controller, Scenario::Nominal, 200, 50);
    assert!(reports.iter().all(|r| r.link_status == LinkStatus::BusOff));
    assert!(reports.iter().all(|r| r.rx.received == 4));
    assert_eq!(controller.link_guard().latched_cycles(), 150);

    // live commands after recovery never release the brake
    for _ in 0..100 {
        controller.io_mut().drive_central(
            VehicleState::Run,
            BrakePercent::RELEASED,
            SteerDegrees(30),
            false,
        );
        let report = controller.run_cycle();
        assert_eq!(report.link_status, LinkStatus::BusOff);
        assert_eq!(report.rx.received, 4);
        assert_eq!(controller.signals().read(SIG_BRAKE_CMD), 100);
        assert_eq!(controller.signals().read(SIG_STEER_CMD), 0);
    }
    assert_eq!(controller.link_guard().latched_cycles(), 250);
}

#[test]
fn test_bus_silence_latches_after_two_hundred_ms() {
    let mut controller = controller();
    run(&mut controller, Scenario::BusSilence, 0, 100);
    let reports = run(&mut controller, Scenario::BusSilence, 100, 25);

    assert_eq!(reports[18].link_status, LinkStatus::Ok);
    assert_eq!(reports[19].link_status, LinkStatus::Silence);
    assert_eq!(controller.signals().read(SIG_BRAKE_CMD), 100);
}

#[test]
fn test_error_warning_latches_after_sustained_counters() {
    let mut controller = controller();
    run(&mut controller, Scenario::ErrorWarning, 0, 100);
    let reports = run(&mut controller, Scenario::ErrorWarning, 100, 60);

    assert_eq!(reports[48].link_status, LinkStatus::Ok);
    assert_eq!(reports[49].link_status, LinkStatus::ErrorWarning);
    assert!(controller.dtcs().is_failed(DTC_CAN_BUS_OFF));
    // the bus is still live, so commands keep arriving every cycle
    assert!(reports.iter().all(|r| r.rx.received == 4));
    assert_eq!(controller.signals().read(SIG_BRAKE_CMD), 100);
    assert_eq!(controller.signals().read(SIG_STEER_CMD), 0);
    assert_eq!(
        controller.signals().read(SIG_BUZZER_PATTERN),
        BuzzerPattern::Continuous as u32
    );
}

#[test]
fn test_failed_self_test_stops_watchdog() {
    let mut controller = controller();
    controller
        .signals_mut()
        .write(SIG_SELF_TEST_RESULT, SelfTestResult::Failed as u32);

    let reports = run(&mut controller, Scenario::Nominal, 0, 10);

    assert_eq!(controller.io().wdi_toggles(), 0);
    let last = reports.last().unwrap();
    assert!(last.fault_mask.contains(FaultMask::SELF_TEST | FaultMask::WATCHDOG));
    assert_eq!(last.safety_status, SafetyStatus::Degraded);
    assert!(controller.dtcs().is_failed(DTC_WATCHDOG_FAIL));
}

#[test]
fn test_external_brake_fault_is_reported_and_stops_watchdog() {
    let mut controller = controller();
    run(&mut controller, Scenario::Nominal, 0, 10);
    controller.signals_mut().write(SIG_BRAKE_FAULT, 2);
    let toggles = controller.io().wdi_toggles();

    let report = run(&mut controller, Scenario::Nominal, 10, 1)[0];

    assert_eq!(report.safety_status, SafetyStatus::Fault);
    assert_eq!(controller.io().wdi_toggles(), toggles);
    assert_eq!(report.tx.sent, 1);
    let frame = controller
        .router()
        .last_tx_frame(TxPdu::BrakeFault)
        .copied()
        .unwrap();
    assert_eq!(frame[2], 2);
}

#[test]
fn test_random_faults_keep_controller_running() {
    let mut controller = controller();
    let mut injector = FaultInjector::new().with_seed(7);

    for cycle in 0..2000 {
        Scenario::RandomFaults.apply(cycle, controller.io_mut());
        injector.update(controller.io_mut());
        let report = controller.run_cycle();
        assert_eq!(report.link_status, LinkStatus::Ok);
    }

    assert!(injector.get_stats().total_faults_injected > 0);
    assert_eq!(controller.cycle(), 2000);
    assert_eq!(
        controller.router().stats().e2e_failures,
        injector.get_stats().rx_corruptions
    );
}

#[test]
fn test_telemetry_snapshot_on_period() {
    let mut controller = controller();

    for cycle in 0..99 {
        Scenario::Nominal.apply(cycle, controller.io_mut());
        controller.run_cycle();
        assert!(controller.poll_telemetry().unwrap().is_none());
    }

    Scenario::Nominal.apply(99, controller.io_mut());
    controller.run_cycle();
    let json = controller.poll_telemetry().unwrap().unwrap().to_string();

    let snapshot: TelemetrySnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snapshot.cycle, 100);
    assert_eq!(snapshot.lidar.zone, LidarZone::Clear);
    assert_eq!(snapshot.link.status, LinkStatus::Ok);
    assert_eq!(snapshot.safety.feeds, 100);
    assert_eq!(snapshot.router.frames_received, 400);
    assert_eq!(snapshot.last_heartbeat.len(), 8);
    assert!(snapshot.active_dtcs.is_empty());
}

#[test]
fn test_telemetry_lists_active_dtcs() {
    let mut controller = controller();
    run(&mut controller, Scenario::BusOff, 100, 1);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.active_dtcs, vec![DTC_CAN_BUS_OFF]);
    assert!(snapshot.last_heartbeat.is_empty());
}

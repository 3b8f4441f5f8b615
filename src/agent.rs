use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, FzcConfig};
use crate::fault::DtcRecorder;
use crate::protocol::{MessageTransport, TxPdu};
use crate::router::{MessageRouter, RxSummary, TxSummary};
use crate::safety::{FaultMask, SafetyAggregator, SafetyStatus, WatchdogLine};
use crate::scheduler::{CycleScheduler, RunnableId, ScheduleError};
use crate::signals::SignalStore;
use crate::subsystems::{
    CanLinkGuard, LidarProcessor, LidarZone, LinkStatus, LinkStatusSource, SensorSource,
    Subsystem,
};
use crate::telemetry::{TelemetryCollector, TelemetryError, TelemetrySnapshot};

/// Everything the controller needs from the hardware side.
pub trait FzcIo: SensorSource + MessageTransport + LinkStatusSource + WatchdogLine {}

impl<T> FzcIo for T where T: SensorSource + MessageTransport + LinkStatusSource + WatchdogLine {}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),
    #[error("runnable table rejected: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("telemetry failed: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// What one 10 ms cycle produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub lidar_zone: LidarZone,
    pub link_status: LinkStatus,
    pub rx: RxSummary,
    pub safety_status: SafetyStatus,
    pub fault_mask: FaultMask,
    pub tx: TxSummary,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub loop_time_us: u32,
    pub max_loop_time_us: u32,
}

/// Front zone controller: owns every component and runs them in cycle order.
pub struct ZoneController<IO: FzcIo> {
    io: IO,
    signals: SignalStore,
    dtcs: DtcRecorder,

    lidar: LidarProcessor,
    link_guard: CanLinkGuard,
    router: MessageRouter,
    safety: SafetyAggregator,

    scheduler: CycleScheduler,
    telemetry: TelemetryCollector,

    cycle: u64,
    performance: PerformanceStats,
}

impl<IO: FzcIo> ZoneController<IO> {
    pub fn new(config: FzcConfig, io: IO) -> Result<Self, ControllerError> {
        config.validate()?;
        let scheduler = CycleScheduler::new()?;

        info!(
            runnables = scheduler.table().len(),
            heartbeat_ms = config.router.heartbeat_period_ms,
            "front zone controller initialised"
        );

        Ok(Self {
            io,
            signals: SignalStore::new(),
            dtcs: DtcRecorder::new(),
            lidar: LidarProcessor::new(config.lidar),
            link_guard: CanLinkGuard::new(config.link),
            router: MessageRouter::new(config.router),
            safety: SafetyAggregator::new(),
            scheduler,
            telemetry: TelemetryCollector::new(config.telemetry),
            cycle: 0,
            performance: PerformanceStats::default(),
        })
    }

    /// Runs every due runnable once, in table order.
    pub fn run_cycle(&mut self) -> CycleReport {
        let start = Instant::now();
        let mut rx = RxSummary::default();
        let mut tx = TxSummary::default();

        for runnable in self.scheduler.next_tick() {
            match runnable {
                RunnableId::LidarMonitor => {
                    self.lidar
                        .run_cycle(&mut self.io, &mut self.signals, &mut self.dtcs);
                }
                RunnableId::CanLinkGuard => {
                    self.link_guard
                        .run_cycle(&self.io, &mut self.signals, &mut self.dtcs);
                }
                RunnableId::ComReceive => {
                    rx = self.router.receive(&mut self.io, &mut self.signals);
                    if rx.any_received() {
                        self.link_guard.notify_rx();
                    }
                    // commands from a live bus must not undo a latched safe state
                    self.link_guard.enforce_outputs(&mut self.signals);
                }
                RunnableId::SafetyMonitor => {
                    self.safety
                        .run_cycle(&mut self.signals, &mut self.io, &mut self.dtcs);
                }
                RunnableId::ComTransmit => {
                    tx = self.router.transmit_schedule(&mut self.io, &self.signals);
                }
            }
        }

        self.cycle += 1;

        let elapsed = start.elapsed().as_micros() as u32;
        self.performance.loop_time_us = elapsed;
        self.performance.max_loop_time_us = self.performance.max_loop_time_us.max(elapsed);

        let report = CycleReport {
            cycle: self.cycle,
            lidar_zone: self.lidar.zone(),
            link_status: self.link_guard.status(),
            rx,
            safety_status: self.safety.status(),
            fault_mask: self.safety.fault_mask(),
            tx,
        };
        debug!(?report, "cycle complete");
        report
    }

    /// JSON snapshot when the telemetry divider fires on the last completed cycle.
    pub fn poll_telemetry(&mut self) -> Result<Option<&str>, ControllerError> {
        if !self.telemetry.should_collect(self.cycle) {
            return Ok(None);
        }

        let snapshot = self.snapshot();
        let json = self.telemetry.record(snapshot)?;
        Ok(Some(json))
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cycle: self.cycle,
            lidar: self.lidar.get_state(),
            degradation_requested: self.lidar.degradation_requested(),
            link: self.link_guard.get_state(),
            safety: self.safety.get_state().clone(),
            router: *self.router.stats(),
            tx_alive: self.router.tx_alive(),
            active_dtcs: self.dtcs.active_events().collect(),
            last_heartbeat: self
                .router
                .last_tx_frame(TxPdu::Heartbeat)
                .map(|f| f.to_vec())
                .unwrap_or_default(),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub fn signals(&self) -> &SignalStore {
        &self.signals
    }

    /// Hook for components outside the core (self-test, actuators) that share the bus.
    pub fn signals_mut(&mut self) -> &mut SignalStore {
        &mut self.signals
    }

    pub fn dtcs(&self) -> &DtcRecorder {
        &self.dtcs
    }

    pub fn lidar(&self) -> &LidarProcessor {
        &self.lidar
    }

    pub fn link_guard(&self) -> &CanLinkGuard {
        &self.link_guard
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn safety(&self) -> &SafetyAggregator {
        &self.safety
    }

    pub fn performance(&self) -> &PerformanceStats {
        &self.performance
    }

    pub fn into_io(self) -> IO {
        self.io
    }
}

//! # Front Zone Controller core
//!
//! Fail-safe perception and communication core of an automotive front zone
//! controller: forward distance sensing, CAN bus health supervision, end-to-end
//! protected messaging and watchdog gating, all driven from one 10 ms tick.
//!
//! ## Features
//!
//! - **E2E protection**: CRC-8 (SAE J1850) with data-id seeding and a rolling alive counter
//! - **Lidar processing**: frame validation, plausibility checks and zone classification
//! - **Message routing**: verified inbound commands with safe defaults, periodic heartbeat,
//!   event-latched status messages
//! - **Link supervision**: bus-off, silence and error-warning detection with a permanent
//!   safe-state latch
//! - **Safety aggregation**: fault mask, overall status and watchdog feed gating
//! - **Diagnostics**: debounced DTC recorder and JSON telemetry snapshots
//!
//! ## Quick Start
//!
//! ```rust
//! use fzc_core::agent::ZoneController;
//! use fzc_core::config::FzcConfig;
//! use fzc_core::fault_injection::SimIo;
//!
//! let mut controller = ZoneController::new(FzcConfig::default(), SimIo::new()).unwrap();
//! let report = controller.run_cycle();
//! assert_eq!(report.cycle, 1);
//! ```
//!
//! ## Architecture
//!
//! - [`signals`] - shared signal bus and typed units
//! - [`e2e`] / [`protocol`] - frame protection and message layouts
//! - [`subsystems`] - lidar processor and CAN link guard
//! - [`router`] - inbound and outbound message handling
//! - [`safety`] - fault aggregation and watchdog gating
//! - [`agent`] - the controller that runs one cycle in order
//! - [`fault_injection`] - simulated hardware for tests and the simulator

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod agent;
pub mod config;
pub mod e2e;
pub mod fault;
pub mod fault_injection;
pub mod protocol;
pub mod router;
pub mod safety;
pub mod scheduler;
pub mod signals;
pub mod subsystems;
pub mod telemetry;

pub use agent::{CycleReport, ZoneController};
pub use config::FzcConfig;
pub use e2e::E2eCodec;
pub use router::MessageRouter;
pub use safety::{FaultMask, SafetyAggregator, SafetyStatus};
pub use subsystems::{CanLinkGuard, LidarProcessor};

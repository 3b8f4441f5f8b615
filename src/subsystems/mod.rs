pub mod can_monitor;
pub mod lidar;

pub use can_monitor::{
    ActiveMonitor, CanLinkGuard, ControllerMode, ErrorCounters, LinkFault, LinkGuardConfig, LinkState,
    LinkStatus, LinkStatusSource,
};
pub use lidar::{
    LidarConfig, LidarProcessor, LidarState, LidarZone, SensorError, SensorFrame, SensorSource,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsystemId {
    Lidar,
    CanLink,
}

/// Component that exposes a state snapshot and a health verdict.
pub trait Subsystem {
    type State: Clone + Serialize;

    fn id(&self) -> SubsystemId;
    fn get_state(&self) -> Self::State;
    fn is_healthy(&self) -> bool;
}

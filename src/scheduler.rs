use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CYCLE_PERIOD_MS;

pub const RUNNABLE_COUNT: usize = 5;

/// Share of each period the summed WCET budgets may claim.
pub const WCET_UTIL_MAX_PCT: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asil {
    Qm,
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

/// Core entry points, listed in their mandatory in-cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnableId {
    LidarMonitor,
    CanLinkGuard,
    ComReceive,
    SafetyMonitor,
    ComTransmit,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Runnable {
    pub id: RunnableId,
    pub name: &'static str,
    pub period_ms: u16,
    pub deadline_ms: u16,
    pub priority: Priority,
    pub wcet_us: u32,
    pub asil: Asil,
}

pub const RUNNABLES: [Runnable; RUNNABLE_COUNT] = [
    Runnable {
        id: RunnableId::LidarMonitor,
        name: "LidarMonitor",
        period_ms: 10,
        deadline_ms: 10,
        priority: Priority::High,
        wcet_us: 500,
        asil: Asil::C,
    },
    Runnable {
        id: RunnableId::CanLinkGuard,
        name: "CanLinkGuard",
        period_ms: 10,
        deadline_ms: 10,
        priority: Priority::High,
        wcet_us: 150,
        asil: Asil::D,
    },
    Runnable {
        id: RunnableId::ComReceive,
        name: "ComReceive",
        period_ms: 10,
        deadline_ms: 10,
        priority: Priority::High,
        wcet_us: 400,
        asil: Asil::D,
    },
    Runnable {
        id: RunnableId::SafetyMonitor,
        name: "SafetyMonitor",
        period_ms: 10,
        deadline_ms: 10,
        priority: Priority::Medium,
        wcet_us: 100,
        asil: Asil::D,
    },
    Runnable {
        id: RunnableId::ComTransmit,
        name: "ComTransmit",
        period_ms: 10,
        deadline_ms: 10,
        priority: Priority::Medium,
        wcet_us: 200,
        asil: Asil::B,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("runnable {0} has a period that is not a multiple of the base tick")]
    BadPeriod(&'static str),
    #[error("runnable {0} has a deadline beyond its period")]
    DeadlineAfterPeriod(&'static str),
    #[error("WCET utilisation {pct}% exceeds the {max}% cap")]
    Overloaded { pct: u32, max: u32 },
}

/// Checks periods, deadlines and the summed WCET budget.
pub fn validate(table: &[Runnable]) -> Result<(), ScheduleError> {
    // utilisation in hundredths of a percent to keep integer precision
    let mut util = 0u32;

    for r in table {
        if r.period_ms == 0 || r.period_ms % CYCLE_PERIOD_MS != 0 {
            return Err(ScheduleError::BadPeriod(r.name));
        }
        if r.deadline_ms > r.period_ms {
            return Err(ScheduleError::DeadlineAfterPeriod(r.name));
        }
        util += r.wcet_us * 100 * 100 / (u32::from(r.period_ms) * 1000);
    }

    let pct = util / 100;
    if util > WCET_UTIL_MAX_PCT * 100 {
        return Err(ScheduleError::Overloaded {
            pct,
            max: WCET_UTIL_MAX_PCT,
        });
    }
    Ok(())
}

/// True when a runnable with `period_ms` runs on base tick `tick`.
pub fn is_due(tick: u64, period_ms: u16) -> bool {
    let every = u64::from((period_ms / CYCLE_PERIOD_MS).max(1));
    tick % every == 0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub dispatched: u64,
}

/// Base-tick dispatcher over the static runnable table.
#[derive(Debug)]
pub struct CycleScheduler {
    table: &'static [Runnable],
    tick: u64,
    stats: SchedulerStats,
}

impl CycleScheduler {
    pub fn new() -> Result<Self, ScheduleError> {
        validate(&RUNNABLES)?;
        Ok(Self {
            table: &RUNNABLES,
            tick: 0,
            stats: SchedulerStats::default(),
        })
    }

    /// Runnables due on the current tick, in table order. Advances the tick.
    pub fn next_tick(&mut self) -> Vec<RunnableId, RUNNABLE_COUNT> {
        let mut due = Vec::new();
        for r in self.table {
            if is_due(self.tick, r.period_ms) {
                let _ = due.push(r.id);
            }
        }
        self.tick = self.tick.wrapping_add(1);
        self.stats.ticks = self.tick;
        self.stats.dispatched += due.len() as u64;
        due
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn table(&self) -> &'static [Runnable] {
        self.table
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

use heapless::Vec;
use serde::{Deserialize, Serialize};

pub type EventId = u8;

pub const DTC_STEER_PLAUSIBILITY: EventId = 0;
pub const DTC_STEER_RANGE: EventId = 1;
pub const DTC_STEER_RATE: EventId = 2;
pub const DTC_STEER_TIMEOUT: EventId = 3;
pub const DTC_STEER_SPI_FAIL: EventId = 4;
pub const DTC_BRAKE_FAULT: EventId = 5;
pub const DTC_BRAKE_TIMEOUT: EventId = 6;
pub const DTC_BRAKE_PWM_FAIL: EventId = 7;
pub const DTC_LIDAR_TIMEOUT: EventId = 8;
pub const DTC_LIDAR_CHECKSUM: EventId = 9;
pub const DTC_LIDAR_STUCK: EventId = 10;
pub const DTC_LIDAR_SIGNAL_LOW: EventId = 11;
pub const DTC_CAN_BUS_OFF: EventId = 12;
pub const DTC_SELF_TEST_FAIL: EventId = 13;
pub const DTC_WATCHDOG_FAIL: EventId = 14;

pub const MAX_EVENTS: usize = 32;
const MAX_DTC_HISTORY: usize = 64;

const DEBOUNCE_FAIL_THRESHOLD: i8 = 3;
const DEBOUNCE_PASS_THRESHOLD: i8 = -3;

pub const STATUS_TEST_FAILED: u8 = 0x01;
pub const STATUS_PENDING_DTC: u8 = 0x04;
pub const STATUS_CONFIRMED_DTC: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Passed,
    Failed,
}

/// Sink for diagnostic event results.
pub trait FaultReporter {
    fn report(&mut self, event: EventId, status: EventStatus);
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EventData {
    pub debounce: i8,
    pub status_byte: u8,
    pub occurrences: u32,
}

impl EventData {
    pub fn is_failed(&self) -> bool {
        self.status_byte & STATUS_TEST_FAILED != 0
    }

    pub fn is_confirmed(&self) -> bool {
        self.status_byte & STATUS_CONFIRMED_DTC != 0
    }
}

/// A change of the test-failed bit of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtcRecord {
    pub id: u32,
    pub event: EventId,
    pub status: EventStatus,
    pub status_byte: u8,
}

/// In-memory diagnostic event manager.
///
/// Failed reports step a debounce counter up to the confirm threshold, passed
/// reports step it back down; the test-failed bit heals once the counter
/// returns to zero. Nothing here survives a restart.
#[derive(Debug)]
pub struct DtcRecorder {
    events: [EventData; MAX_EVENTS],
    history: Vec<DtcRecord, MAX_DTC_HISTORY>,
    next_record_id: u32,
}

impl DtcRecorder {
    pub fn new() -> Self {
        Self {
            events: [EventData::default(); MAX_EVENTS],
            history: Vec::new(),
            next_record_id: 1,
        }
    }

    pub fn event(&self, event: EventId) -> Option<&EventData> {
        self.events.get(usize::from(event))
    }

    pub fn is_failed(&self, event: EventId) -> bool {
        self.event(event).is_some_and(EventData::is_failed)
    }

    pub fn status_byte(&self, event: EventId) -> u8 {
        self.event(event).map_or(0, |e| e.status_byte)
    }

    pub fn occurrences(&self, event: EventId) -> u32 {
        self.event(event).map_or(0, |e| e.occurrences)
    }

    /// Event ids whose test-failed bit is currently set.
    pub fn active_events(&self) -> impl Iterator<Item = EventId> + '_ {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_failed())
            .map(|(id, _)| id as EventId)
    }

    pub fn get_history(&self) -> &[DtcRecord] {
        &self.history
    }

    pub fn clear_all(&mut self) {
        self.events = [EventData::default(); MAX_EVENTS];
        self.history.clear();
    }

    fn record_transition(&mut self, event: EventId, status: EventStatus, status_byte: u8) {
        let record = DtcRecord {
            id: self.next_record_id,
            event,
            status,
            status_byte,
        };
        self.next_record_id = self.next_record_id.wrapping_add(1);

        if self.history.is_full() {
            self.history.remove(0);
        }

        let _ = self.history.push(record);
    }
}

impl Default for DtcRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultReporter for DtcRecorder {
    fn report(&mut self, event: EventId, status: EventStatus) {
        let Some(data) = self.events.get_mut(usize::from(event)) else {
            return;
        };
        let was_failed = data.is_failed();

        match status {
            EventStatus::Failed => {
                if data.debounce < DEBOUNCE_FAIL_THRESHOLD {
                    data.debounce += 1;
                }
                data.status_byte |= STATUS_TEST_FAILED | STATUS_PENDING_DTC;
                if data.debounce >= DEBOUNCE_FAIL_THRESHOLD {
                    data.status_byte |= STATUS_CONFIRMED_DTC;
                    data.occurrences = data.occurrences.saturating_add(1);
                }
            }
            EventStatus::Passed => {
                if data.debounce > DEBOUNCE_PASS_THRESHOLD {
                    data.debounce -= 1;
                }
                if data.debounce <= 0 {
                    data.status_byte &= !STATUS_TEST_FAILED;
                }
            }
        }

        let now_failed = data.is_failed();
        let status_byte = data.status_byte;
        if was_failed != now_failed {
            self.record_transition(event, status, status_byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_sets_pending_but_not_confirmed() {
        let mut dtcs = DtcRecorder::new();
        dtcs.report(DTC_LIDAR_STUCK, EventStatus::Failed);

        let byte = dtcs.status_byte(DTC_LIDAR_STUCK);
        assert_eq!(byte & STATUS_TEST_FAILED, STATUS_TEST_FAILED);
        assert_eq!(byte & STATUS_PENDING_DTC, STATUS_PENDING_DTC);
        assert_eq!(byte & STATUS_CONFIRMED_DTC, 0);
        assert_eq!(dtcs.occurrences(DTC_LIDAR_STUCK), 0);
    }

    #[test]
    fn third_failure_confirms() {
        let mut dtcs = DtcRecorder::new();
        for _ in 0..3 {
            dtcs.report(DTC_CAN_BUS_OFF, EventStatus::Failed);
        }
        assert!(dtcs.event(DTC_CAN_BUS_OFF).unwrap().is_confirmed());
        assert_eq!(dtcs.occurrences(DTC_CAN_BUS_OFF), 1);

        dtcs.report(DTC_CAN_BUS_OFF, EventStatus::Failed);
        assert_eq!(dtcs.occurrences(DTC_CAN_BUS_OFF), 2);
    }

    #[test]
    fn test_failed_heals_after_debounce_returns_to_zero() {
        let mut dtcs = DtcRecorder::new();
        dtcs.report(DTC_LIDAR_TIMEOUT, EventStatus::Failed);
        dtcs.report(DTC_LIDAR_TIMEOUT, EventStatus::Failed);

        dtcs.report(DTC_LIDAR_TIMEOUT, EventStatus::Passed);
        assert!(dtcs.is_failed(DTC_LIDAR_TIMEOUT));

        dtcs.report(DTC_LIDAR_TIMEOUT, EventStatus::Passed);
        assert!(!dtcs.is_failed(DTC_LIDAR_TIMEOUT));
        // pending stays latched until cleared
        assert_eq!(dtcs.status_byte(DTC_LIDAR_TIMEOUT) & STATUS_PENDING_DTC, STATUS_PENDING_DTC);
    }

    #[test]
    fn history_records_only_transitions() {
        let mut dtcs = DtcRecorder::new();
        dtcs.report(DTC_WATCHDOG_FAIL, EventStatus::Failed);
        dtcs.report(DTC_WATCHDOG_FAIL, EventStatus::Failed);
        dtcs.report(DTC_WATCHDOG_FAIL, EventStatus::Passed);
        dtcs.report(DTC_WATCHDOG_FAIL, EventStatus::Passed);

        let history = dtcs.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, EventStatus::Failed);
        assert_eq!(history[1].status, EventStatus::Passed);
    }

    #[test]
    fn unknown_event_is_ignored() {
        let mut dtcs = DtcRecorder::new();
        dtcs.report(200, EventStatus::Failed);
        assert_eq!(dtcs.active_events().count(), 0);
        assert!(dtcs.get_history().is_empty());
    }

    #[test]
    fn clear_all_resets_everything() {
        let mut dtcs = DtcRecorder::new();
        dtcs.report(DTC_SELF_TEST_FAIL, EventStatus::Failed);
        dtcs.clear_all();
        assert_eq!(dtcs.status_byte(DTC_SELF_TEST_FAIL), 0);
        assert!(dtcs.get_history().is_empty());
    }
}

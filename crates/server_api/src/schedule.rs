//! Daily time slots for starting, pausing and resuming the queue.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use shared::protocol::PlaylistSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduledAction {
    StartQueue,
    PauseQueue,
    ResumeQueue,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    at: NaiveTime,
    last_fired: Option<NaiveDate>,
}

impl SlotState {
    /// A slot first seen after its time of day waits for tomorrow.
    fn armed(at: NaiveTime, now: NaiveDateTime) -> Self {
        let last_fired = (now.time() >= at).then(|| now.date());
        Self { at, last_fired }
    }
}

#[derive(Debug, Default)]
pub struct DailySchedule {
    slots: HashMap<ScheduledAction, SlotState>,
}

impl DailySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions whose slot passed since the previous call, each at most once
    /// per day. Changing a slot's time re-arms it.
    pub fn due(&mut self, settings: &PlaylistSettings, now: NaiveDateTime) -> Vec<ScheduledAction> {
        let wanted = [
            (
                ScheduledAction::StartQueue,
                settings
                    .auto_start_queue
                    .then(|| parse_slot(&settings.start_time))
                    .flatten(),
            ),
            (
                ScheduledAction::PauseQueue,
                parse_slot(&settings.blackout_start_time),
            ),
            (
                ScheduledAction::ResumeQueue,
                parse_slot(&settings.blackout_stop_time),
            ),
        ];

        let mut due = Vec::new();
        for (action, at) in wanted {
            let Some(at) = at else {
                self.slots.remove(&action);
                continue;
            };
            let slot = self
                .slots
                .entry(action)
                .or_insert_with(|| SlotState::armed(at, now));
            if slot.at != at {
                *slot = SlotState::armed(at, now);
            }
            if now.time() >= slot.at && slot.last_fired != Some(now.date()) {
                slot.last_fired = Some(now.date());
                due.push(action);
            }
        }
        due
    }
}

/// Parses `HH:MM` or `HH:MM:SS`; blank or malformed values disable the slot.
pub fn parse_slot(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .expect("valid timestamp")
    }

    fn start_at(time: &str) -> PlaylistSettings {
        PlaylistSettings {
            auto_start_queue: true,
            start_time: time.into(),
            ..PlaylistSettings::default()
        }
    }

    #[test]
    fn parses_short_and_long_slots() {
        assert_eq!(parse_slot("06:30"), NaiveTime::from_hms_opt(6, 30, 0));
        assert_eq!(parse_slot("06:30:15"), NaiveTime::from_hms_opt(6, 30, 15));
        assert_eq!(parse_slot(""), None);
        assert_eq!(parse_slot("soon"), None);
    }

    #[test]
    fn start_fires_once_per_day() {
        let mut schedule = DailySchedule::new();
        let settings = start_at("06:00");

        assert!(schedule.due(&settings, at(1, 5, 59)).is_empty());
        assert_eq!(
            schedule.due(&settings, at(1, 6, 0)),
            vec![ScheduledAction::StartQueue]
        );
        assert!(schedule.due(&settings, at(1, 6, 1)).is_empty());
        assert_eq!(
            schedule.due(&settings, at(2, 6, 1)),
            vec![ScheduledAction::StartQueue]
        );
    }

    #[test]
    fn slot_already_passed_at_first_sight_waits_for_next_day() {
        let mut schedule = DailySchedule::new();
        let settings = start_at("06:00");
        assert!(schedule.due(&settings, at(1, 9, 0)).is_empty());
        assert_eq!(
            schedule.due(&settings, at(2, 6, 0)),
            vec![ScheduledAction::StartQueue]
        );
    }

    #[test]
    fn start_requires_auto_start() {
        let mut schedule = DailySchedule::new();
        let settings = PlaylistSettings {
            start_time: "06:00".into(),
            ..PlaylistSettings::default()
        };
        assert!(schedule.due(&settings, at(1, 5, 0)).is_empty());
        assert!(schedule.due(&settings, at(1, 7, 0)).is_empty());
    }

    #[test]
    fn blackout_window_pauses_then_resumes() {
        let mut schedule = DailySchedule::new();
        let settings = PlaylistSettings {
            blackout_start_time: "22:00".into(),
            blackout_stop_time: "23:30".into(),
            ..PlaylistSettings::default()
        };
        assert!(schedule.due(&settings, at(1, 21, 0)).is_empty());
        assert_eq!(
            schedule.due(&settings, at(1, 22, 0)),
            vec![ScheduledAction::PauseQueue]
        );
        assert_eq!(
            schedule.due(&settings, at(1, 23, 45)),
            vec![ScheduledAction::ResumeQueue]
        );
    }
}

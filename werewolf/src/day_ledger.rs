//! Per-day game records.
//!
//! A [`DayRecord`] captures everything that happened on one day: night
//! actions, the vote outcome, the raw discussion lines.  Records are updated
//! copy-on-write: every setter returns a new record and the [`DayLedger`]
//! swaps it in under the day's key, so a record handed out for one phase is
//! never mutated behind another phase's back.

use std::collections::HashMap;

/// Everything that happened on one game day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayRecord {
    pub day_number: u32,
    /// Player voted out during the day.
    pub voted_out: Option<String>,
    pub killed_by_wolves: Option<String>,
    pub saved_by_witch: Option<String>,
    pub killed_by_witch: Option<String>,
    /// `(name, role)` the prophet learned this night.
    pub verified_by_prophet: Option<(String, String)>,
    pub day_messages: Vec<String>,
    pub night_messages: Vec<String>,
}

impl DayRecord {
    pub fn new(day_number: u32) -> Self {
        Self {
            day_number,
            ..Self::default()
        }
    }

    pub fn with_wolf_kill(&self, target: impl Into<String>) -> Self {
        Self {
            killed_by_wolves: Some(target.into()),
            ..self.clone()
        }
    }

    pub fn with_witch_save(&self, target: impl Into<String>) -> Self {
        Self {
            saved_by_witch: Some(target.into()),
            ..self.clone()
        }
    }

    pub fn with_witch_kill(&self, target: impl Into<String>) -> Self {
        Self {
            killed_by_witch: Some(target.into()),
            ..self.clone()
        }
    }

    pub fn with_prophet_verify(&self, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            verified_by_prophet: Some((name.into(), role.into())),
            ..self.clone()
        }
    }

    pub fn with_vote_out(&self, target: impl Into<String>) -> Self {
        Self {
            voted_out: Some(target.into()),
            ..self.clone()
        }
    }

    pub fn with_day_message(&self, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.day_messages.push(message.into());
        next
    }

    pub fn with_night_message(&self, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.night_messages.push(message.into());
        next
    }
}

/// Day number to record, with sticky creation.
#[derive(Debug, Default)]
pub struct DayLedger {
    days: HashMap<u32, DayRecord>,
}

impl DayLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for a day, created empty on first access.
    pub fn record(&mut self, day_number: u32) -> DayRecord {
        self.days
            .entry(day_number)
            .or_insert_with(|| DayRecord::new(day_number))
            .clone()
    }

    fn swap_in(&mut self, record: DayRecord) -> DayRecord {
        self.days.insert(record.day_number, record.clone());
        record
    }

    pub fn set_wolf_kill(&mut self, day_number: u32, target: &str) -> DayRecord {
        let record = self.record(day_number).with_wolf_kill(target);
        self.swap_in(record)
    }

    pub fn set_witch_save(&mut self, day_number: u32, target: &str) -> DayRecord {
        let record = self.record(day_number).with_witch_save(target);
        self.swap_in(record)
    }

    pub fn set_witch_kill(&mut self, day_number: u32, target: &str) -> DayRecord {
        let record = self.record(day_number).with_witch_kill(target);
        self.swap_in(record)
    }

    pub fn set_prophet_verify(&mut self, day_number: u32, name: &str, role: &str) -> DayRecord {
        let record = self.record(day_number).with_prophet_verify(name, role);
        self.swap_in(record)
    }

    pub fn set_vote_out(&mut self, day_number: u32, target: &str) -> DayRecord {
        let record = self.record(day_number).with_vote_out(target);
        self.swap_in(record)
    }

    pub fn add_day_message(&mut self, day_number: u32, message: &str) -> DayRecord {
        let record = self.record(day_number).with_day_message(message);
        self.swap_in(record)
    }

    pub fn add_night_message(&mut self, day_number: u32, message: &str) -> DayRecord {
        let record = self.record(day_number).with_night_message(message);
        self.swap_in(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_are_copy_on_write() {
        let first = DayRecord::new(1);
        let second = first.with_wolf_kill("Alice");

        assert_eq!(first.killed_by_wolves, None);
        assert_eq!(second.killed_by_wolves, Some("Alice".to_string()));
        assert_eq!(second.day_number, 1);

        let third = second.with_witch_save("Alice").with_night_message("growl");
        assert_eq!(third.killed_by_wolves, Some("Alice".to_string()));
        assert_eq!(third.saved_by_witch, Some("Alice".to_string()));
        assert_eq!(third.night_messages, vec!["growl"]);
        assert!(second.night_messages.is_empty());
    }

    #[test]
    fn test_ledger_record_is_sticky() {
        let mut ledger = DayLedger::new();
        assert_eq!(ledger.record(3).day_number, 3);
        ledger.set_vote_out(3, "Bob");
        assert_eq!(ledger.record(3).voted_out, Some("Bob".to_string()));
    }

    #[test]
    fn test_ledger_updates_do_not_cross_days() {
        let mut ledger = DayLedger::new();
        ledger.set_wolf_kill(1, "Alice");
        ledger.set_wolf_kill(2, "Bob");
        ledger.set_prophet_verify(2, "Carol", "villager");

        assert_eq!(ledger.record(1).killed_by_wolves, Some("Alice".to_string()));
        assert_eq!(ledger.record(1).verified_by_prophet, None);
        assert_eq!(ledger.record(2).killed_by_wolves, Some("Bob".to_string()));
        assert_eq!(
            ledger.record(2).verified_by_prophet,
            Some(("Carol".to_string(), "villager".to_string()))
        );
    }
}

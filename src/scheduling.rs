// src/scheduling.rs
//
// Slot and day capacity rules. Everything here is pure; handlers feed it counts
// pulled from the appointment table and a clock reading.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Timelike, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookingRules {
    pub utc_offset_hours: i32,
    pub booking_window_days: i64,
    /// Occupying appointments one branch accepts per day.
    pub daily_capacity: i64,
    /// Occupying appointments one branch accepts per slot.
    pub slot_capacity: i64,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            utc_offset_hours: 8,
            booking_window_days: 30,
            daily_capacity: 7,
            slot_capacity: 1,
        }
    }
}

/// Above this many free places a branch advertises short waiting times.
const LOW_WAIT_THRESHOLD: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRejection {
    OutsideWindow,
    PastSlot,
    SlotTaken,
    DayFull,
}

impl SlotRejection {
    pub fn code(self) -> &'static str {
        match self {
            SlotRejection::OutsideWindow => "DATE_OUT_OF_RANGE",
            SlotRejection::PastSlot => "SLOT_IN_PAST",
            SlotRejection::SlotTaken => "SLOT_TAKEN",
            SlotRejection::DayFull => "DAY_FULLY_BOOKED",
        }
    }

    pub fn message(self, rules: &BookingRules) -> String {
        match self {
            SlotRejection::OutsideWindow => format!(
                "date must be between today and {} days from now",
                rules.booking_window_days
            ),
            SlotRejection::PastSlot => "the selected time has already passed".into(),
            SlotRejection::SlotTaken => "the selected time slot is no longer available".into(),
            SlotRejection::DayFull => "the branch is fully booked on that date".into(),
        }
    }

    /// Window and past-time problems are caller mistakes; the rest are contention.
    pub fn is_conflict(self) -> bool {
        matches!(self, SlotRejection::SlotTaken | SlotRejection::DayFull)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlotAvailability {
    pub time_slot_id: i16,
    pub time: NaiveTime,
    pub booked: i64,
    pub remaining: i64,
    pub is_past: bool,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DayLoad {
    pub booked: i64,
    pub available: i64,
    pub fully_booked: bool,
    pub low_wait: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub booked: i64,
    pub fully_booked: bool,
    pub bookable: bool,
}

impl BookingRules {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Wall-clock time at the clinic.
    pub fn clinic_now(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.with_timezone(&self.offset()).naive_local()
    }

    pub fn clinic_today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.clinic_now(now).date()
    }

    pub fn last_bookable_day(&self, today: NaiveDate) -> NaiveDate {
        today + Duration::days(self.booking_window_days)
    }

    pub fn is_within_window(&self, date: NaiveDate, today: NaiveDate) -> bool {
        date >= today && date <= self.last_bookable_day(today)
    }

    pub fn slot_remaining(&self, booked: i64) -> i64 {
        (self.slot_capacity - booked).max(0)
    }

    pub fn day_load(&self, booked: i64) -> DayLoad {
        let available = (self.daily_capacity - booked).max(0);
        DayLoad {
            booked,
            available,
            fully_booked: booked >= self.daily_capacity,
            low_wait: available > LOW_WAIT_THRESHOLD,
        }
    }

    /// Gatekeeper for every write that puts an appointment into a slot.
    pub fn check_slot(
        &self,
        date: NaiveDate,
        slot_time: NaiveTime,
        now_local: NaiveDateTime,
        slot_booked: i64,
        day_booked: i64,
    ) -> Result<(), SlotRejection> {
        if !self.is_within_window(date, now_local.date()) {
            return Err(SlotRejection::OutsideWindow);
        }
        if is_past_slot(date, slot_time, now_local) {
            return Err(SlotRejection::PastSlot);
        }
        if self.slot_remaining(slot_booked) == 0 {
            return Err(SlotRejection::SlotTaken);
        }
        if self.day_load(day_booked).fully_booked {
            return Err(SlotRejection::DayFull);
        }
        Ok(())
    }

    pub fn evaluate_slots(
        &self,
        date: NaiveDate,
        now_local: NaiveDateTime,
        slots: &[(i16, NaiveTime)],
        booked_by_slot: &HashMap<i16, i64>,
    ) -> Vec<SlotAvailability> {
        let day_booked: i64 = booked_by_slot.values().sum();
        let day_full = self.day_load(day_booked).fully_booked;
        let in_window = self.is_within_window(date, now_local.date());

        slots
            .iter()
            .map(|&(time_slot_id, time)| {
                let booked = booked_by_slot.get(&time_slot_id).copied().unwrap_or(0);
                let remaining = self.slot_remaining(booked);
                let is_past = is_past_slot(date, time, now_local);
                SlotAvailability {
                    time_slot_id,
                    time,
                    booked,
                    remaining,
                    is_past,
                    available: in_window && !is_past && !day_full && remaining > 0,
                }
            })
            .collect()
    }

    pub fn calendar(
        &self,
        from: NaiveDate,
        days: i64,
        today: NaiveDate,
        booked_by_date: &HashMap<NaiveDate, i64>,
    ) -> Vec<CalendarDay> {
        (0..days.max(0))
            .map(|i| {
                let date = from + Duration::days(i);
                let booked = booked_by_date.get(&date).copied().unwrap_or(0);
                let fully_booked = self.day_load(booked).fully_booked;
                CalendarDay {
                    date,
                    booked,
                    fully_booked,
                    bookable: self.is_within_window(date, today) && !fully_booked,
                }
            })
            .collect()
    }
}

/// A slot on the current clinic day is gone once its hour has started.
pub fn is_past_slot(date: NaiveDate, slot_time: NaiveTime, now_local: NaiveDateTime) -> bool {
    let today = now_local.date();
    date < today || (date == today && slot_time.hour() <= now_local.hour())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::BookingError;
use crate::util::join_names;

pub const HOURS_PER_DAY: u32 = 24;
pub const SLOTS_PER_HOUR: u32 = 4;
pub const SLOT_MINUTES: u32 = 60 / SLOTS_PER_HOUR;

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";
// Keys written by the old web front end (`Date.toDateString()`)
const LEGACY_DAY_KEY_FORMAT: &str = "%a %b %d %Y";

/// Every bookable label of a day, in schedule order: "00:00", "00:15", ... "23:45".
pub fn slot_labels() -> impl Iterator<Item = String> {
    (0..HOURS_PER_DAY).flat_map(|hour| {
        (0..SLOTS_PER_HOUR).map(move |slot| format!("{:02}:{:02}", hour, slot * SLOT_MINUTES))
    })
}

pub fn is_slot_label(label: &str) -> bool {
    let Some((hour, minute)) = label.split_once(':') else {
        return false;
    };
    let two_digits = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(hour) || !two_digits(minute) {
        return false;
    }
    match (hour.parse::<u32>(), minute.parse::<u32>()) {
        (Ok(h), Ok(m)) => h < HOURS_PER_DAY && m < 60 && m % SLOT_MINUTES == 0,
        _ => false,
    }
}

/// Calendar day used to key bookings. Only the date takes part in equality,
/// so any two instants of the same local day map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self(at.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for DayKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl From<NaiveDateTime> for DayKey {
    fn from(at: NaiveDateTime) -> Self {
        Self(at.date())
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl FromStr for DayKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        NaiveDate::parse_from_str(s, DAY_KEY_FORMAT)
            .or_else(|err| NaiveDate::parse_from_str(s, LEGACY_DAY_KEY_FORMAT).map_err(|_| err))
            .map(Self)
    }
}

impl From<DayKey> for String {
    fn from(day: DayKey) -> Self {
        day.to_string()
    }
}

impl TryFrom<String> for DayKey {
    type Error = chrono::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One reserved slot. `name` holds every participant, joined with ", ".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingCalendar {
    days: BTreeMap<DayKey, Vec<Booking>>,
}

impl BookingCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `time` on `day` for the given participants. The first booking of
    /// a slot wins; later attempts fail without touching the calendar.
    pub fn reserve<S: AsRef<str>>(
        &mut self,
        day: DayKey,
        time: &str,
        participants: &[S],
    ) -> Result<&Booking, BookingError> {
        let name = join_names(participants).ok_or(BookingError::EmptyNames)?;
        if !is_slot_label(time) {
            return Err(BookingError::UnknownSlot(time.to_string()));
        }
        if self.is_booked(day, time) {
            return Err(BookingError::SlotTaken {
                day,
                time: time.to_string(),
            });
        }

        debug!("booking {} on {} for {}", time, day, name);
        let slots = self.days.entry(day).or_default();
        slots.push(Booking {
            time: time.to_string(),
            name,
        });
        Ok(&slots[slots.len() - 1])
    }

    /// Bookings of `day` in the order they were made.
    pub fn slots_for(&self, day: DayKey) -> &[Booking] {
        self.days.get(&day).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_booked(&self, day: DayKey, time: &str) -> bool {
        self.slots_for(day).iter().any(|b| b.time == time)
    }

    /// Labels of `day` nobody has reserved yet, in schedule order.
    pub fn free_slots(&self, day: DayKey) -> Vec<String> {
        slot_labels()
            .filter(|label| !self.is_booked(day, label))
            .collect()
    }

    pub fn days(&self) -> impl Iterator<Item = (DayKey, &[Booking])> {
        self.days.iter().map(|(day, slots)| (*day, slots.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Merge bookings read back from the store. Duplicate labels of one day
    /// keep the first occurrence so the one-booking-per-slot rule survives a
    /// hand-edited record.
    pub(crate) fn restore_day(&mut self, day: DayKey, bookings: Vec<Booking>) {
        let slots = self.days.entry(day).or_default();
        for booking in bookings {
            if !slots.iter().any(|b| b.time == booking.time) {
                slots.push(booking);
            }
        }
        if slots.is_empty() {
            self.days.remove(&day);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn day(s: &str) -> DayKey {
        s.parse().unwrap()
    }

    #[test]
    fn schedule_has_96_ordered_labels() {
        let labels: Vec<String> = slot_labels().collect();
        assert_eq!(labels.len(), 96);
        assert_eq!(labels[0], "00:00");
        assert_eq!(labels[1], "00:15");
        assert_eq!(labels[41], "10:15");
        assert_eq!(labels[95], "23:45");
        assert!(labels.iter().all(|l| is_slot_label(l)));
    }

    #[test]
    fn rejects_labels_off_the_schedule() {
        for label in ["24:00", "10:10", "9:00", "10:0", "+1:00", "", "10-00", "10:60"] {
            assert!(!is_slot_label(label), "{label} should be rejected");
        }
    }

    #[test]
    fn day_key_ignores_time_of_day() {
        let morning = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let night = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(DayKey::from(morning), DayKey::from(night));
        assert_eq!(DayKey::from(morning).to_string(), "2024-06-01");
    }

    #[test]
    fn day_key_parses_legacy_format() {
        assert_eq!(day("Sat Jun 01 2024"), day("2024-06-01"));
        assert!("June first".parse::<DayKey>().is_err());
    }

    #[test]
    fn first_booking_wins() {
        let mut cal = BookingCalendar::new();
        let d = day("2024-06-01");
        cal.reserve(d, "10:00", &["Alice", "Bob"]).unwrap();
        let err = cal.reserve(d, "10:00", &["Carol"]).unwrap_err();
        assert_matches!(err, BookingError::SlotTaken { ref time, .. } if time == "10:00");
        assert_eq!(
            cal.slots_for(d),
            &[Booking {
                time: "10:00".into(),
                name: "Alice, Bob".into()
            }]
        );
    }

    #[test]
    fn blank_names_leave_calendar_untouched() {
        let mut cal = BookingCalendar::new();
        let d = day("2024-06-01");
        assert_eq!(cal.reserve(d, "10:00", &["", "  "]), Err(BookingError::EmptyNames));
        assert!(cal.slots_for(d).is_empty());
        assert!(cal.is_empty());
    }

    #[test]
    fn names_are_trimmed_and_blanks_skipped() {
        let mut cal = BookingCalendar::new();
        let d = day("2024-06-01");
        let booking = cal
            .reserve(d, "18:30", &[" Alice ", "", "Bob", "   "])
            .unwrap();
        assert_eq!(booking.name, "Alice, Bob");
    }

    #[test]
    fn unknown_slot_is_refused() {
        let mut cal = BookingCalendar::new();
        assert_matches!(
            cal.reserve(day("2024-06-01"), "10:05", &["Alice"]),
            Err(BookingError::UnknownSlot(_))
        );
    }

    #[test]
    fn days_are_independent() {
        let mut cal = BookingCalendar::new();
        cal.reserve(day("2024-06-01"), "10:00", &["Alice"]).unwrap();
        cal.reserve(day("2024-06-02"), "10:00", &["Bob"]).unwrap();
        assert_eq!(cal.slots_for(day("2024-06-01")).len(), 1);
        assert_eq!(cal.slots_for(day("2024-06-02"))[0].name, "Bob");
        assert!(cal.slots_for(day("2024-06-03")).is_empty());
    }

    #[test]
    fn free_slots_exclude_booked_labels() {
        let mut cal = BookingCalendar::new();
        let d = day("2024-06-01");
        cal.reserve(d, "00:15", &["Alice"]).unwrap();
        let free = cal.free_slots(d);
        assert_eq!(free.len(), 95);
        assert_eq!(&free[..2], &["00:00".to_string(), "00:30".to_string()]);
    }

    #[test]
    fn repeated_attempts_keep_one_booking_per_slot() {
        let mut cal = BookingCalendar::new();
        let d = day("2024-06-01");
        for (i, time) in ["10:00", "10:15", "10:00", "10:15", "10:00"].iter().enumerate() {
            let _ = cal.reserve(d, time, &[format!("player{i}")]);
        }
        let times: Vec<&str> = cal.slots_for(d).iter().map(|b| b.time.as_str()).collect();
        assert_eq!(times, vec!["10:00", "10:15"]);
        assert_eq!(cal.slots_for(d)[0].name, "player0");
    }

    #[test]
    fn restore_keeps_first_duplicate() {
        let mut cal = BookingCalendar::new();
        let d = day("2024-06-01");
        cal.restore_day(
            d,
            vec![
                Booking { time: "10:00".into(), name: "Alice".into() },
                Booking { time: "10:00".into(), name: "Bob".into() },
            ],
        );
        assert_eq!(cal.slots_for(d).len(), 1);
        assert_eq!(cal.slots_for(d)[0].name, "Alice");
    }

    #[test]
    fn serializes_as_day_keyed_map() {
        let mut cal = BookingCalendar::new();
        cal.reserve(day("2024-06-01"), "10:00", &["Alice"]).unwrap();
        let json = serde_json::to_value(&cal).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "2024-06-01": [{ "time": "10:00", "name": "Alice" }] })
        );
    }
}

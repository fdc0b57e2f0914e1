//! Pure scheduling policy: which days and times are bookable, which room a
//! new appointment lands in, and which dates a recurring series spans.
//!
//! Nothing here touches the database. The SQL side of slot admission lives
//! in `booking`; route handlers combine the two.

use std::collections::HashSet;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveTime, Weekday};
use thiserror::Error;

/// One of the fixed, interchangeable exam rooms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub room_id: i16,
    pub display_name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("the clinic is closed on {0} (weekend)")]
    ClosedDay(NaiveDate),
    #[error("{0} is not a bookable time")]
    UnknownTime(NaiveTime),
}

/// Injected schedule configuration. Built once in `main` and shared through
/// `AppState`; tests construct alternates with different room counts and
/// hours.
#[derive(Debug, Clone)]
pub struct ClinicSchedule {
    rooms: Vec<Room>,
    visit_times: Vec<NaiveTime>,
    /// Recurring series run from the start date to start + this many
    /// calendar months.
    pub series_horizon_months: u32,
    /// Hard cap on weekly follow-ups generated after the original
    /// appointment. A skipped (fully booked) week still consumes one.
    pub series_max_follow_ups: u32,
    /// Visit reason every recurring series books under.
    pub therapy_reason_id: i16,
}

impl ClinicSchedule {
    pub fn new(
        mut rooms: Vec<Room>,
        mut visit_times: Vec<NaiveTime>,
        series_horizon_months: u32,
        series_max_follow_ups: u32,
        therapy_reason_id: i16,
    ) -> Self {
        // First-fit depends on a stable ascending order.
        rooms.sort_by_key(|r| r.room_id);
        visit_times.sort();
        Self {
            rooms,
            visit_times,
            series_horizon_months,
            series_max_follow_ups,
            therapy_reason_id,
        }
    }

    /// The production schedule: six rooms, four afternoon slots, vision
    /// therapy series of up to twelve weekly follow-ups over three months.
    pub fn clinic_default() -> Self {
        let rooms = (1..=6)
            .map(|id| Room {
                room_id: id,
                display_name: format!("Gabinete {id}"),
            })
            .collect();
        let visit_times = [(12, 30), (13, 30), (14, 30), (15, 30)]
            .iter()
            .filter_map(|&(h, m)| NaiveTime::from_hms_opt(h, m, 0))
            .collect();
        Self::new(rooms, visit_times, 3, 12, 3)
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn visit_times(&self) -> &[NaiveTime] {
        &self.visit_times
    }

    /// The clinic sees patients Monday through Friday. No holiday calendar.
    pub fn is_bookable_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_visit_time(&self, time: NaiveTime) -> bool {
        self.visit_times.contains(&time)
    }

    /// Validate both halves of a slot; every admission path goes through
    /// this before touching the appointment table.
    pub fn check_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<(), SlotError> {
        if !self.is_bookable_day(date) {
            return Err(SlotError::ClosedDay(date));
        }
        if !self.is_visit_time(time) {
            return Err(SlotError::UnknownTime(time));
        }
        Ok(())
    }

    /// First-fit assignment: the lowest-id room not in `occupied`, or None
    /// when the slot is fully booked. Rooms are reused in id order every
    /// time, never rotated.
    pub fn first_fit(&self, occupied: &HashSet<i16>) -> Option<&Room> {
        self.rooms.iter().find(|r| !occupied.contains(&r.room_id))
    }

    pub fn is_slot_available(&self, occupied_count: usize) -> bool {
        occupied_count < self.rooms.len()
    }

    /// Calendar-aware horizon: `start + N months`, clamped to the last day
    /// of a short month. None only on date overflow.
    pub fn series_end_date(&self, start: NaiveDate) -> Option<NaiveDate> {
        start.checked_add_months(Months::new(self.series_horizon_months))
    }

    /// Candidate dates for the weekly follow-ups of a series starting at
    /// `start`: start+7d, start+14d, ... capped at `series_max_follow_ups`
    /// entries and stopping once past `end`. Generated by adding seven days
    /// repeatedly, so every candidate falls on the start date's weekday.
    pub fn follow_up_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut cursor = start;
        for _ in 0..self.series_max_follow_ups {
            cursor = cursor + Duration::days(7);
            if cursor > end {
                break;
            }
            dates.push(cursor);
        }
        dates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn weekends_are_closed() {
        let s = ClinicSchedule::clinic_default();
        assert!(s.is_bookable_day(date(2025, 6, 2))); // Monday
        assert!(s.is_bookable_day(date(2025, 6, 6))); // Friday
        assert!(!s.is_bookable_day(date(2025, 6, 7))); // Saturday
        assert!(!s.is_bookable_day(date(2025, 6, 8))); // Sunday
    }

    #[test]
    fn check_slot_rejects_closed_day_and_unknown_time() {
        let s = ClinicSchedule::clinic_default();
        assert_eq!(
            s.check_slot(date(2025, 6, 7), time(12, 30)),
            Err(SlotError::ClosedDay(date(2025, 6, 7)))
        );
        assert_eq!(
            s.check_slot(date(2025, 6, 2), time(9, 0)),
            Err(SlotError::UnknownTime(time(9, 0)))
        );
        assert_eq!(s.check_slot(date(2025, 6, 2), time(12, 30)), Ok(()));
    }

    #[test]
    fn visit_times_are_the_four_afternoon_slots() {
        let s = ClinicSchedule::clinic_default();
        let times: Vec<NaiveTime> = s.visit_times().to_vec();
        assert_eq!(
            times,
            vec![time(12, 30), time(13, 30), time(14, 30), time(15, 30)]
        );
    }

    #[test]
    fn first_fit_picks_lowest_free_room() {
        let s = ClinicSchedule::clinic_default();

        let occupied = HashSet::new();
        assert_eq!(s.first_fit(&occupied).unwrap().room_id, 1);

        let occupied: HashSet<i16> = [1, 2, 4].into_iter().collect();
        assert_eq!(s.first_fit(&occupied).unwrap().room_id, 3);

        // Idempotent for repeated calls with no intervening writes.
        assert_eq!(s.first_fit(&occupied).unwrap().room_id, 3);
    }

    #[test]
    fn first_fit_returns_none_when_full() {
        let s = ClinicSchedule::clinic_default();
        let occupied: HashSet<i16> = (1..=6).collect();
        assert!(s.first_fit(&occupied).is_none());
        assert!(!s.is_slot_available(occupied.len()));
        assert!(s.is_slot_available(occupied.len() - 1));
    }

    #[test]
    fn first_fit_respects_id_order_regardless_of_construction_order() {
        let rooms = vec![
            Room { room_id: 5, display_name: "E".into() },
            Room { room_id: 2, display_name: "B".into() },
            Room { room_id: 9, display_name: "I".into() },
        ];
        let s = ClinicSchedule::new(rooms, vec![time(10, 0)], 3, 12, 3);
        let occupied: HashSet<i16> = [2].into_iter().collect();
        assert_eq!(s.first_fit(&occupied).unwrap().room_id, 5);
    }

    #[test]
    fn series_end_date_is_three_calendar_months_out() {
        let s = ClinicSchedule::clinic_default();
        assert_eq!(
            s.series_end_date(date(2025, 6, 2)),
            Some(date(2025, 9, 2))
        );
        // Month-end clamping, not a fixed day count.
        assert_eq!(
            s.series_end_date(date(2025, 11, 30)),
            Some(date(2026, 2, 28))
        );
    }

    #[test]
    fn follow_ups_stay_on_the_start_weekday_and_inside_the_horizon() {
        let s = ClinicSchedule::clinic_default();
        let start = date(2025, 6, 2); // Monday
        let end = s.series_end_date(start).unwrap();
        let dates = s.follow_up_dates(start, end);

        assert_eq!(dates.len(), 12);
        assert_eq!(dates[0], date(2025, 6, 9));
        assert_eq!(*dates.last().unwrap(), date(2025, 8, 25));
        assert!(dates.iter().all(|d| d.weekday() == Weekday::Mon));
        assert!(dates.iter().all(|d| *d <= end));
    }

    #[test]
    fn follow_ups_stop_early_under_a_short_horizon() {
        let s = ClinicSchedule::new(
            vec![Room { room_id: 1, display_name: "A".into() }],
            vec![time(12, 30)],
            1, // one-month series
            12,
            3,
        );
        let start = date(2025, 6, 2);
        let end = s.series_end_date(start).unwrap();
        assert_eq!(end, date(2025, 7, 2));

        let dates = s.follow_up_dates(start, end);
        assert_eq!(
            dates,
            vec![date(2025, 6, 9), date(2025, 6, 16), date(2025, 6, 23), date(2025, 6, 30)]
        );
    }

    #[test]
    fn follow_ups_never_exceed_the_cap() {
        let s = ClinicSchedule::new(
            vec![Room { room_id: 1, display_name: "A".into() }],
            vec![time(12, 30)],
            12, // a year-long horizon still yields at most 12 follow-ups
            12,
            3,
        );
        let start = date(2025, 6, 2);
        let end = s.series_end_date(start).unwrap();
        assert_eq!(s.follow_up_dates(start, end).len(), 12);
    }
}

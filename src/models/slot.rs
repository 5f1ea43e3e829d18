use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Storage format for instants: UTC, second precision, sorts lexicographically.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Years `TS_FORMAT` renders as four digits. Stored instants stay inside this
/// range so the overlap trigger's TEXT comparison matches time order.
const STORABLE_YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

pub fn is_storable(ts: &DateTime<Utc>) -> bool {
    STORABLE_YEARS.contains(&ts.year())
}

pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Drop sub-second precision so a value survives a storage round trip unchanged.
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    /// Returns `None` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// `None` when the range is empty, overflows, or leaves the storable years.
    pub fn starting_at(start: DateTime<Utc>, duration_minutes: i64) -> Option<Self> {
        let end = start.checked_add_signed(Duration::try_minutes(duration_minutes)?)?;
        if !is_storable(&start) || !is_storable(&end) {
            return None;
        }
        Self::new(start, end)
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Subtract sorted, possibly overlapping `taken` slots from `window`.
pub fn subtract(window: &Slot, taken: &[Slot]) -> Vec<Slot> {
    let mut free = Vec::new();
    let mut cursor = window.start;

    for t in taken {
        if t.end <= cursor || t.start >= window.end {
            continue;
        }
        if t.start > cursor {
            free.push(Slot {
                start: cursor,
                end: t.start,
            });
        }
        cursor = cursor.max(t.end);
        if cursor >= window.end {
            break;
        }
    }

    if cursor < window.end {
        free.push(Slot {
            start: cursor,
            end: window.end,
        });
    }
    free
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 16, h, m, 0).unwrap()
    }

    fn slot(sh: u32, sm: u32, eh: u32, em: u32) -> Slot {
        Slot::new(at(sh, sm), at(eh, em)).unwrap()
    }

    #[test]
    fn rejects_empty_or_inverted_ranges() {
        assert!(Slot::new(at(10, 0), at(10, 0)).is_none());
        assert!(Slot::new(at(11, 0), at(10, 0)).is_none());
    }

    #[test]
    fn half_open_overlap() {
        let a = slot(10, 0, 11, 0);
        assert!(a.overlaps(&slot(10, 30, 11, 30)));
        assert!(!a.overlaps(&slot(11, 0, 12, 0)));
        assert!(!a.overlaps(&slot(9, 0, 10, 0)));
        assert!(a.overlaps(&slot(9, 0, 12, 0)));
    }

    #[test]
    fn starting_at_rejects_out_of_range_instants() {
        assert!(Slot::starting_at(DateTime::<Utc>::MAX_UTC - Duration::minutes(30), 60).is_none());
        assert!(Slot::starting_at(DateTime::<Utc>::MIN_UTC, 60).is_none());
        assert!(Slot::starting_at(at(10, 0), i64::MAX).is_none());

        let late = Utc.with_ymd_and_hms(9999, 12, 31, 22, 0, 0).unwrap();
        assert!(Slot::starting_at(late, 120).is_some());
        assert!(Slot::starting_at(late, 121).is_none());
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = at(9, 15);
        assert_eq!(fmt_ts(&ts), "2025-06-16 09:15:00");
        assert_eq!(parse_ts(&fmt_ts(&ts)), Some(ts));
        assert!(parse_ts("not a time").is_none());
    }

    #[test]
    fn subtract_carves_out_taken_slots() {
        let window = slot(9, 0, 18, 0);
        let taken = vec![slot(10, 0, 11, 0), slot(10, 30, 12, 0), slot(17, 0, 18, 0)];
        assert_eq!(
            subtract(&window, &taken),
            vec![slot(9, 0, 10, 0), slot(12, 0, 17, 0)]
        );
    }

    #[test]
    fn subtract_with_nothing_taken() {
        let window = slot(9, 0, 18, 0);
        assert_eq!(subtract(&window, &[]), vec![window]);
    }
}

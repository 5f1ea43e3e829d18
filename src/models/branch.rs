use chrono::{FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use super::Slot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    /// Fixed offset of the branch's wall clock from UTC.
    pub utc_offset_minutes: i32,
}

impl Branch {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        open_time: NaiveTime,
        close_time: NaiveTime,
        utc_offset_minutes: i32,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            open_time < close_time,
            "branch must open before it closes ({open_time} >= {close_time})"
        );
        anyhow::ensure!(
            utc_offset_minutes.abs() < 24 * 60,
            "utc offset out of range: {utc_offset_minutes}"
        );
        Ok(Self {
            id: id.into(),
            name: name.into(),
            open_time,
            close_time,
            utc_offset_minutes,
        })
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Whether `[slot.start, slot.end)` lies inside one local business day.
    pub fn is_open_during(&self, slot: &Slot) -> bool {
        let offset = self.offset();
        let local_start = slot.start.with_timezone(&offset);
        let local_end = slot.end.with_timezone(&offset);

        local_start.date_naive() == local_end.date_naive()
            && local_start.time() >= self.open_time
            && local_end.time() <= self.close_time
    }

    /// Operating hours on a local calendar date, as a UTC slot.
    pub fn hours_on(&self, date: NaiveDate) -> Option<Slot> {
        let offset = self.offset();
        let open = date
            .and_time(self.open_time)
            .and_local_timezone(offset)
            .single()?;
        let close = date
            .and_time(self.close_time)
            .and_local_timezone(offset)
            .single()?;
        Slot::new(open.with_timezone(&Utc), close.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub branch_id: String,
    pub name: String,
    pub duration_minutes: i64,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stylist {
    pub id: String,
    pub branch_id: String,
    pub name: String,
}

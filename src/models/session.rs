use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A booking mirrored into a third-party calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSession {
    pub id: String,
    pub booking_id: String,
    pub provider: CalendarKind,
    pub session_id: String,
    pub status: SessionStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CalendarKind {
    Google,
    Outlook,
    Ical,
}

impl CalendarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarKind::Google => "google",
            CalendarKind::Outlook => "outlook",
            CalendarKind::Ical => "ical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(CalendarKind::Google),
            "outlook" => Some(CalendarKind::Outlook),
            "ical" => Some(CalendarKind::Ical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Invalidated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Invalidated => "invalidated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "invalidated" => Some(SessionStatus::Invalidated),
            _ => None,
        }
    }
}

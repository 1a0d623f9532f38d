//! # Reminders
//!
//! A reminder is a message scheduled for a wall-clock instant. Times are
//! zone-less: whatever clock the host runs on is the clock reminders are
//! parsed and delivered against.
//!
//! The command grammar is fixed-width where it matters: two-digit hour,
//! minute, and day, English month name, four-digit year. `00:xx AM` is
//! accepted as a midnight alias for `12:xx AM`.

pub mod scheduler;

pub use scheduler::ReminderScheduler;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serenity::model::id::{ChannelId, UserId};

use crate::core::ValidationError;

pub const USAGE: &str =
    "Usage: :remindme: <HH:MM> <AM|PM> <Month> <DD,> <YYYY> <mention: true|false> <event>";

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub event: String,
    pub due: NaiveDateTime,
    /// Whether delivery opens with a mention of the requester.
    pub mention: bool,
    pub user: UserId,
    pub channel: ChannelId,
}

impl Reminder {
    /// Parses the `:remindme:` command body.
    pub fn parse_command(
        body: &str,
        user: UserId,
        channel: ChannelId,
    ) -> Result<Reminder, ValidationError> {
        let body = body.strip_prefix(":remindme:").unwrap_or(body).trim_start();
        let mut parts = body.splitn(6, ' ');
        let (Some(time), Some(meridiem), Some(month), Some(day), Some(year), Some(tail)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(usage_error());
        };

        let due = parse_due(time, meridiem, month, day, year)?;

        let (mention, event) = if let Some(rest) = tail.strip_prefix("true") {
            (true, rest)
        } else if let Some(rest) = tail.strip_prefix("false") {
            (false, rest)
        } else {
            return Err(usage_error());
        };
        let event = event.trim_start();
        if event.is_empty() {
            return Err(ValidationError::new("The reminder needs an event description"));
        }

        Ok(Reminder {
            event: event.to_string(),
            due,
            mention,
            user,
            channel,
        })
    }

    /// Stored-record payload: requester and channel lines, then the
    /// original command with the mention flag abutting the event text.
    pub fn encode_record(&self) -> String {
        format!(
            "{}\n{}\n:remindme: {} {}{}",
            self.user.0,
            self.channel.0,
            format_due(self.due),
            self.mention,
            self.event
        )
    }

    pub fn parse_record(body: &str) -> Result<Reminder, ValidationError> {
        let mut lines = body.splitn(3, '\n');
        let (Some(user), Some(channel), Some(command)) =
            (lines.next(), lines.next(), lines.next())
        else {
            return Err(ValidationError::new("Stored reminder is missing lines"));
        };
        let user = user
            .parse::<u64>()
            .map(UserId)
            .map_err(|_| ValidationError::new("Stored reminder holds a malformed user id"))?;
        let channel = channel
            .parse::<u64>()
            .map(ChannelId)
            .map_err(|_| ValidationError::new("Stored reminder holds a malformed channel id"))?;
        Reminder::parse_command(command, user, channel)
    }

    pub fn confirmation(&self) -> String {
        format!(
            "Okay, I'll remind you about \"{}\" at {}",
            self.event,
            format_due(self.due)
        )
    }

    /// Text sent when the reminder comes due.
    pub fn delivery_text(&self) -> String {
        if self.mention {
            format!("<@{}>, {}", self.user.0, self.event)
        } else {
            self.event.clone()
        }
    }
}

fn usage_error() -> ValidationError {
    ValidationError::new(USAGE)
}

fn parse_due(
    time: &str,
    meridiem: &str,
    month: &str,
    day: &str,
    year: &str,
) -> Result<NaiveDateTime, ValidationError> {
    let Some((hour, minute)) = time.split_once(':') else {
        return Err(usage_error());
    };
    if hour.len() != 2 || minute.len() != 2 {
        return Err(ValidationError::new("Hour and minute must be two digits"));
    }
    let hour: u32 = hour.parse().map_err(|_| usage_error())?;
    let minute: u32 = minute.parse().map_err(|_| usage_error())?;

    // 12-hour to 24-hour; 00 is tolerated as a 12 AM alias.
    let hour = match (hour, meridiem) {
        (12 | 0, "AM") => 0,
        (h @ 1..=11, "AM") => h,
        (12, "PM") => 12,
        (h @ 1..=11, "PM") => h + 12,
        _ => return Err(ValidationError::new("Time must be HH:MM AM or HH:MM PM")),
    };

    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(month))
        .ok_or_else(|| ValidationError::new("Month must be spelled out, like January"))?
        as u32
        + 1;

    let day = day.strip_suffix(',').unwrap_or(day);
    if day.len() != 2 {
        return Err(ValidationError::new("Day must be two digits"));
    }
    let day: u32 = day.parse().map_err(|_| usage_error())?;

    if year.len() != 4 {
        return Err(ValidationError::new("Year must be four digits"));
    }
    let year: i32 = year.parse().map_err(|_| usage_error())?;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ValidationError::new("That date doesn't exist"))?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| ValidationError::new("That time doesn't exist"))?;
    Ok(date.and_time(time))
}

pub(crate) fn format_due(due: NaiveDateTime) -> String {
    let (meridiem, hour) = match due.hour() {
        0 => ("AM", 12),
        h @ 1..=11 => ("AM", h),
        12 => ("PM", 12),
        h => ("PM", h - 12),
    };
    format!(
        "{:02}:{:02} {} {} {:02}, {}",
        hour,
        due.minute(),
        meridiem,
        MONTHS[due.month0() as usize],
        due.day(),
        due.year()
    )
}

//! Appointment phrase detection.
//!
//! Picks a day word (`today`, `tomorrow`, a weekday name) and a clock time
//! (`3pm`, `10:30 am`, `15:00`, `at 4`, `noon`) out of free text. All times are
//! taken as UTC; callers convert if they know the caller's zone.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};

/// Find an appointment time in `text`, resolved relative to `now`.
///
/// Returns `None` unless a clock time is present. Without a day word the time is
/// today if still ahead of `now`, otherwise tomorrow. A weekday equal to today means
/// next week.
pub fn detect_appointment(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == ':'))
        .filter(|t| !t.is_empty())
        .collect();

    let time = find_time(&tokens)?;
    let today = now.date_naive();

    let date = match tokens.iter().find_map(|t| day_offset(t, now.weekday())) {
        Some(offset) => today + Duration::days(offset),
        None if today.and_time(time) > now.naive_utc() => today,
        None => today + Duration::days(1),
    };

    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

fn day_offset(token: &str, today: Weekday) -> Option<i64> {
    match token {
        "today" | "tonight" => Some(0),
        "tomorrow" => Some(1),
        // full names only; "sun" or "wed" are too likely to be ordinary words
        _ if token.len() >= 6 => {
            let day: Weekday = token.parse().ok()?;
            let ahead = (day.num_days_from_monday() as i64 - today.num_days_from_monday() as i64).rem_euclid(7);
            Some(if ahead == 0 { 7 } else { ahead })
        }
        _ => None,
    }
}

fn find_time(tokens: &[&str]) -> Option<NaiveTime> {
    for (i, token) in tokens.iter().enumerate() {
        if *token == "noon" {
            return NaiveTime::from_hms_opt(12, 0, 0);
        }

        let split = token
            .find(|c: char| !(c.is_ascii_digit() || c == ':'))
            .unwrap_or(token.len());
        if split == 0 {
            continue;
        }
        let (clock, suffix) = token.split_at(split);

        let meridiem = match suffix {
            "am" | "pm" => Some(suffix),
            "" => tokens.get(i + 1).copied().filter(|next| *next == "am" || *next == "pm"),
            _ => continue,
        };
        let after_at = i > 0 && tokens[i - 1] == "at";

        let Some((hour, minute)) = parse_clock(clock) else {
            continue;
        };

        let hour = match meridiem {
            Some(m) if (1..=12).contains(&hour) => match (m, hour) {
                ("am", 12) => 0,
                ("pm", h) if h < 12 => h + 12,
                (_, h) => h,
            },
            Some(_) => continue,
            None if clock.contains(':') && hour <= 23 => hour,
            // "at 3" during business hours means the afternoon
            None if after_at && (1..8).contains(&hour) => hour + 12,
            None if after_at && (8..=23).contains(&hour) => hour,
            None => continue,
        };

        if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
            return Some(time);
        }
    }
    None
}

fn parse_clock(clock: &str) -> Option<(u32, u32)> {
    let mut parts = clock.split(':');
    let hour = parts.next()?.parse().ok()?;
    let minute = match parts.next() {
        Some(m) if m.len() == 2 => m.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };
    if parts.next().is_some() || minute >= 60 {
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sunday
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    fn at(day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2026, 10, day, hour, minute, 0).unwrap())
    }

    #[test]
    fn test_day_and_time_phrases() {
        assert_eq!(detect_appointment("Tomorrow at 3pm works for me", now()), at(19, 15, 0));
        assert_eq!(detect_appointment("How about Friday at 10:30 am?", now()), at(23, 10, 30));
        assert_eq!(detect_appointment("15:00 on Wednesday please", now()), at(21, 15, 0));
        assert_eq!(detect_appointment("today at noon", now()), at(18, 12, 0));
    }

    #[test]
    fn test_same_weekday_means_next_week() {
        assert_eq!(detect_appointment("sunday at 4pm", now()), at(25, 16, 0));
    }

    #[test]
    fn test_time_without_day() {
        assert_eq!(detect_appointment("at 4 then", now()), at(18, 16, 0));
        // already past today
        assert_eq!(detect_appointment("8am is good", now()), at(19, 8, 0));
    }

    #[test]
    fn test_no_appointment() {
        assert_eq!(detect_appointment("no thanks", now()), None);
        assert_eq!(detect_appointment("maybe tomorrow, I'll call back", now()), None);
        assert_eq!(detect_appointment("I have 2 kids", now()), None);
        assert_eq!(detect_appointment("at 13pm", now()), None);
    }
}

use chrono::{Datelike, NaiveDate};

use crate::error::{AppError, AppResult};

/// Next due date for a day-of-month schedule, never before `today`.
///
/// Days past the end of a month clamp to its last day, so a due day of 31
/// lands on Feb 28/29 and Apr 30.
pub fn next_due_date(day_of_month: u32, today: NaiveDate) -> AppResult<NaiveDate> {
    if !(1..=31).contains(&day_of_month) {
        return Err(AppError::BadRequest(format!(
            "Due day must be between 1 and 31, got {day_of_month}."
        )));
    }

    let this_month = clamped_date(today.year(), today.month(), day_of_month)?;
    if today.day() <= this_month.day() {
        return Ok(this_month);
    }

    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    clamped_date(year, month, day_of_month)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn clamped_date(year: i32, month: u32, day: u32) -> AppResult<NaiveDate> {
    let day = day.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| AppError::Internal(format!("Invalid calendar date {year}-{month}-{day}.")))
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate};

    use super::{days_in_month, next_due_date};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn due_later_this_month() {
        assert_eq!(next_due_date(15, date(2026, 10, 3)).ok(), Some(date(2026, 10, 15)));
    }

    #[test]
    fn due_today_stays_today() {
        assert_eq!(next_due_date(15, date(2026, 10, 15)).ok(), Some(date(2026, 10, 15)));
    }

    #[test]
    fn past_due_day_rolls_to_next_month() {
        assert_eq!(next_due_date(15, date(2026, 10, 20)).ok(), Some(date(2026, 11, 15)));
        assert_eq!(next_due_date(1, date(2026, 12, 2)).ok(), Some(date(2027, 1, 1)));
    }

    #[test]
    fn clamps_to_month_end() {
        assert_eq!(next_due_date(31, date(2026, 2, 10)).ok(), Some(date(2026, 2, 28)));
        assert_eq!(next_due_date(31, date(2028, 2, 29)).ok(), Some(date(2028, 2, 29)));
        assert_eq!(next_due_date(31, date(2026, 4, 30)).ok(), Some(date(2026, 4, 30)));
        assert_eq!(next_due_date(30, date(2026, 1, 31)).ok(), Some(date(2026, 2, 28)));
    }

    #[test]
    fn never_before_today_and_within_two_months() {
        let mut today = date(2026, 1, 1);
        while today < date(2027, 1, 1) {
            for day in 1..=31 {
                let due = next_due_date(day, today).expect("valid day");
                assert!(due >= today, "{day} on {today} gave {due}");
                let months_ahead = (due.year_ce().1 * 12 + due.month0())
                    - (today.year_ce().1 * 12 + today.month0());
                assert!(months_ahead <= 1, "{day} on {today} gave {due}");
            }
            today = today.succ_opt().expect("next day");
        }
    }

    #[test]
    fn rejects_out_of_range_days() {
        assert!(next_due_date(0, date(2026, 10, 1)).is_err());
        assert!(next_due_date(32, date(2026, 10, 1)).is_err());
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2028, 2), 29);
        assert_eq!(days_in_month(2026, 12), 31);
        assert_eq!(days_in_month(2026, 9), 30);
    }
}

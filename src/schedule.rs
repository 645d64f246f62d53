use std::collections::HashSet;

use sqlx::PgPool;
use time::macros::time;
use time::{Date, Duration, Time, Weekday};

use crate::error::Result;
use crate::listings;
use crate::models::WorkingHours;

/// Weekday index as stored in `working_hours`: Monday = 0 .. Sunday = 6.
pub fn weekday_index(weekday: Weekday) -> i16 {
    weekday.number_days_from_monday() as i16
}

/// Open/close pair for one weekday, `None` when the provider is closed.
pub async fn hours_for(
    pool: &PgPool,
    provider_id: i32,
    weekday: Weekday,
) -> Result<Option<(Time, Time)>> {
    let hours = sqlx::query_as::<_, (Time, Time)>(
        "SELECT open_time, close_time FROM working_hours
         WHERE provider_id = $1 AND weekday = $2",
    )
    .bind(provider_id)
    .bind(weekday_index(weekday))
    .fetch_optional(pool)
    .await?;

    Ok(hours)
}

/// The provider's whole stored week, at most one row per weekday.
pub async fn week_for(pool: &PgPool, provider_id: i32) -> Result<Vec<WorkingHours>> {
    let week = sqlx::query_as::<_, WorkingHours>(
        "SELECT * FROM working_hours WHERE provider_id = $1 ORDER BY weekday",
    )
    .bind(provider_id)
    .fetch_all(pool)
    .await?;

    Ok(week)
}

/// Hourly candidates from `open` onward, keeping only slots that end by
/// `close` and are not already taken. Ascending order; empty whenever the
/// close time is not past the open time.
pub fn open_slots(open: Time, close: Time, taken: &HashSet<Time>) -> Vec<Time> {
    let open_min = open.hour() as i64 * 60 + open.minute() as i64;
    let close_min = close.hour() as i64 * 60 + close.minute() as i64;

    let mut slots = Vec::new();
    let mut minute = open_min;
    while minute + 60 <= close_min {
        let slot = time!(0:00) + Duration::minutes(minute);
        if !taken.contains(&slot) {
            slots.push(slot);
        }
        minute += 60;
    }
    slots
}

/// Free slots for one provider on one date. Recomputed on every call;
/// concurrent bookings keep changing the answer.
pub async fn free_slots(pool: &PgPool, provider_id: i32, date: Date) -> Result<Vec<Time>> {
    listings::fetch_provider(pool, provider_id).await?;

    let Some((open, close)) = hours_for(pool, provider_id, date.weekday()).await? else {
        return Ok(Vec::new());
    };

    let taken: Vec<Time> = sqlx::query_scalar(
        "SELECT booking_time FROM bookings
         WHERE provider_id = $1 AND booking_date = $2 AND status <> 'cancelled'",
    )
    .bind(provider_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(open_slots(open, close, &taken.into_iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taken(times: &[Time]) -> HashSet<Time> {
        times.iter().copied().collect()
    }

    #[test]
    fn full_day_without_bookings() {
        let slots = open_slots(time!(9:00), time!(18:00), &taken(&[]));
        assert_eq!(slots.len(), 9);
        assert_eq!(slots.first(), Some(&time!(9:00)));
        assert_eq!(slots.last(), Some(&time!(17:00)));
    }

    #[test]
    fn booked_hour_is_skipped() {
        let slots = open_slots(time!(9:00), time!(18:00), &taken(&[time!(10:00)]));
        let expected = vec![
            time!(9:00),
            time!(11:00),
            time!(12:00),
            time!(13:00),
            time!(14:00),
            time!(15:00),
            time!(16:00),
            time!(17:00),
        ];
        assert_eq!(slots, expected);
    }

    #[test]
    fn close_not_after_open_gives_nothing() {
        assert!(open_slots(time!(9:00), time!(9:00), &taken(&[])).is_empty());
        assert!(open_slots(time!(18:00), time!(9:00), &taken(&[])).is_empty());
    }

    #[test]
    fn last_slot_must_end_by_closing_time() {
        let slots = open_slots(time!(9:00), time!(17:30), &taken(&[]));
        assert_eq!(slots.last(), Some(&time!(16:00)));
    }

    #[test]
    fn slots_follow_a_half_hour_opening() {
        let slots = open_slots(time!(9:30), time!(12:00), &taken(&[]));
        assert_eq!(slots, vec![time!(9:30), time!(10:30)]);
    }

    #[test]
    fn weekday_index_is_monday_based() {
        assert_eq!(weekday_index(Weekday::Monday), 0);
        assert_eq!(weekday_index(Weekday::Sunday), 6);
    }
}

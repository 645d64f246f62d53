use log::info;
use serde::Deserialize;
use sqlx::error::{DatabaseError, ErrorKind};
use sqlx::PgPool;
use time::{Date, Time};

use crate::error::{Error, Result};
use crate::listings;
use crate::models::{Actor, Booking, BookingStatus, Role};

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub provider_id: i32,
    pub customer_id: i32,
    pub service_category: String,
    pub date: Date,
    pub time: Time,
    pub note: Option<String>,
}

/// Reserve a slot. The INSERT is the availability check: the partial unique
/// index over live bookings serializes concurrent reservations of the same
/// (provider, date, time), and the loser comes back as `SlotConflict`.
pub async fn create_booking(pool: &PgPool, new: NewBooking) -> Result<Booking> {
    if new.service_category.trim().is_empty() {
        return Err(Error::validation("service category must not be empty"));
    }
    listings::fetch_provider(pool, new.provider_id).await?;

    let booking = sqlx::query_as::<_, Booking>(
        "INSERT INTO bookings
             (provider_id, customer_id, service_category, booking_date, booking_time, status, note)
         VALUES ($1, $2, $3, $4, $5, 'pending', $6)
         RETURNING *",
    )
    .bind(new.provider_id)
    .bind(new.customer_id)
    .bind(&new.service_category)
    .bind(new.date)
    .bind(new.time)
    .bind(&new.note)
    .fetch_one(pool)
    .await
    .map_err(map_slot_conflict)?;

    info!(
        "customer {} booked provider {} on {} at {}",
        booking.customer_id, booking.provider_id, booking.booking_date, booking.booking_time
    );
    Ok(booking)
}

/// Who the actor is in relation to this booking. The role claim alone is not
/// enough: an owner must own the booking's provider, a customer must own the
/// booking itself.
pub fn effective_role(actor: Actor, customer_id: i32, provider_owner_id: i32) -> Result<Role> {
    match actor.role {
        Role::Admin => Ok(Role::Admin),
        Role::Owner if actor.id == provider_owner_id => Ok(Role::Owner),
        Role::Customer if actor.id == customer_id => Ok(Role::Customer),
        _ => Err(Error::Forbidden),
    }
}

/// The booking transition table. `completed` and `cancelled` are terminal
/// for everyone; customers may only cancel, owners and admins may set any
/// reachable status.
pub fn check_status_change(role: Role, from: BookingStatus, to: BookingStatus) -> Result<()> {
    if from.is_terminal() {
        return Err(Error::InvalidTransition {
            from: from.as_str(),
            to: to.as_str(),
        });
    }
    match role {
        Role::Customer if to == BookingStatus::Cancelled => Ok(()),
        Role::Customer => Err(Error::Forbidden),
        Role::Owner | Role::Admin => Ok(()),
    }
}

/// Date/time changes are reserved to the provider owner and admins, and a
/// closed booking keeps its slot history as-is.
pub fn check_reschedule(role: Role, status: BookingStatus) -> Result<()> {
    if role == Role::Customer {
        return Err(Error::Forbidden);
    }
    if status.is_terminal() {
        return Err(Error::InvalidTransition {
            from: status.as_str(),
            to: status.as_str(),
        });
    }
    Ok(())
}

pub async fn change_booking_status(
    pool: &PgPool,
    booking_id: i32,
    actor: Actor,
    new_status: BookingStatus,
) -> Result<Booking> {
    let booking = fetch_booking(pool, booking_id).await?;
    let provider = listings::fetch_provider(pool, booking.provider_id).await?;
    let role = effective_role(actor, booking.customer_id, provider.owner_id)?;
    let current = parse_status(&booking.status)?;
    check_status_change(role, current, new_status)?;

    let updated = sqlx::query_as::<_, Booking>(
        "UPDATE bookings SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(new_status.as_str())
    .bind(booking_id)
    .fetch_one(pool)
    .await?;

    info!(
        "booking {} moved from {} to {}",
        booking_id,
        current.as_str(),
        new_status.as_str()
    );
    Ok(updated)
}

/// Move a live booking to another slot. The UPDATE re-runs the exclusivity
/// check through the same unique index; the row never collides with its own
/// previous slot.
pub async fn reschedule_booking(
    pool: &PgPool,
    booking_id: i32,
    actor: Actor,
    date: Date,
    time: Time,
) -> Result<Booking> {
    let booking = fetch_booking(pool, booking_id).await?;
    let provider = listings::fetch_provider(pool, booking.provider_id).await?;
    let role = effective_role(actor, booking.customer_id, provider.owner_id)?;
    check_reschedule(role, parse_status(&booking.status)?)?;

    let updated = sqlx::query_as::<_, Booking>(
        "UPDATE bookings SET booking_date = $1, booking_time = $2, updated_at = now()
         WHERE id = $3 RETURNING *",
    )
    .bind(date)
    .bind(time)
    .bind(booking_id)
    .fetch_one(pool)
    .await
    .map_err(map_slot_conflict)?;

    info!("booking {} rescheduled to {} at {}", booking_id, date, time);
    Ok(updated)
}

pub async fn update_booking_note(
    pool: &PgPool,
    booking_id: i32,
    actor: Actor,
    note: Option<String>,
) -> Result<Booking> {
    let booking = fetch_booking(pool, booking_id).await?;
    let provider = listings::fetch_provider(pool, booking.provider_id).await?;
    let role = effective_role(actor, booking.customer_id, provider.owner_id)?;
    if role == Role::Customer {
        return Err(Error::Forbidden);
    }

    let updated = sqlx::query_as::<_, Booking>(
        "UPDATE bookings SET note = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(&note)
    .bind(booking_id)
    .fetch_one(pool)
    .await?;

    Ok(updated)
}

pub async fn fetch_booking(pool: &PgPool, booking_id: i32) -> Result<Booking> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
        .bind(booking_id)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::NotFound)
}

fn parse_status(stored: &str) -> Result<BookingStatus> {
    BookingStatus::parse(stored)
        .ok_or_else(|| Error::validation(format!("unknown booking status `{stored}`")))
}

fn map_slot_conflict(err: sqlx::Error) -> Error {
    match err.as_database_error().map(DatabaseError::kind) {
        Some(ErrorKind::UniqueViolation) => Error::SlotConflict,
        _ => Error::from(err),
    }
}

use log::info;
use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::Time;

use crate::error::{Error, Result};
use crate::models::{Actor, ListingStatus, Provider, ProviderPhoto, Role};

/// Open/close per weekday, Monday first. `None` means closed that day.
pub type WeekPlan = [Option<(Time, Time)>; 7];

#[derive(Debug, Clone, Deserialize)]
pub struct NewListing {
    pub owner_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub categories: Vec<String>,
    pub week: WeekPlan,
    pub photos: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub categories: Option<Vec<String>>,
    pub week: Option<WeekPlan>,
}

/// Target state produced by the moderation table: status, the activation
/// flag mirroring it, and the rejection reason, which survives only while
/// the status is `rejected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingState {
    pub status: ListingStatus,
    pub is_active: bool,
    pub rejection_reason: Option<String>,
}

/// Where a fresh listing starts: moderated when an owner submits it,
/// immediately live when an administrator creates it.
pub fn initial_state(role: Role) -> ListingState {
    match role {
        Role::Admin => ListingState {
            status: ListingStatus::Approved,
            is_active: true,
            rejection_reason: None,
        },
        _ => ListingState {
            status: ListingStatus::Pending,
            is_active: false,
            rejection_reason: None,
        },
    }
}

/// The moderation transition table. Callers resolve the effective role
/// first; a listed move attempted by an insufficient role is `Forbidden`,
/// a move that is not an edge of the state machine is `InvalidTransition`.
pub fn apply_transition(
    role: Role,
    current: ListingStatus,
    target: ListingStatus,
    reason: Option<&str>,
) -> Result<ListingState> {
    use crate::models::ListingStatus::{Approved, Inactive, Pending, Rejected};

    if role == Role::Customer {
        return Err(Error::Forbidden);
    }

    match (current, target) {
        (Pending, Approved) => {
            if role != Role::Admin {
                return Err(Error::Forbidden);
            }
            Ok(ListingState {
                status: Approved,
                is_active: true,
                rejection_reason: None,
            })
        }
        (Pending, Rejected) => {
            if role != Role::Admin {
                return Err(Error::Forbidden);
            }
            let reason = reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| Error::validation("a rejection requires a reason"))?;
            Ok(ListingState {
                status: Rejected,
                is_active: false,
                rejection_reason: Some(reason.to_string()),
            })
        }
        (Approved, Inactive) => Ok(ListingState {
            status: Inactive,
            is_active: false,
            rejection_reason: None,
        }),
        (Inactive, Approved) => Ok(ListingState {
            status: Approved,
            is_active: true,
            rejection_reason: None,
        }),
        (Rejected, Pending) => Ok(ListingState {
            status: Pending,
            is_active: false,
            rejection_reason: None,
        }),
        (from, to) => Err(Error::InvalidTransition {
            from: from.as_str(),
            to: to.as_str(),
        }),
    }
}

/// Create a provider together with its weekly calendar and photo references
/// in one transaction; a failure on any row rolls back all of them.
pub async fn create_listing(pool: &PgPool, actor: Actor, new: NewListing) -> Result<Provider> {
    if actor.role == Role::Customer {
        return Err(Error::Forbidden);
    }
    if actor.role == Role::Owner && actor.id != new.owner_id {
        return Err(Error::Forbidden);
    }
    if new.name.trim().is_empty() {
        return Err(Error::validation("listing name must not be empty"));
    }

    let state = initial_state(actor.role);
    let mut tx = pool.begin().await?;

    let provider = sqlx::query_as::<_, Provider>(
        "INSERT INTO providers (owner_id, name, description, address, categories, status, is_active)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(&new.name)
    .bind(&new.description)
    .bind(&new.address)
    .bind(&new.categories)
    .bind(state.status.as_str())
    .bind(state.is_active)
    .fetch_one(&mut *tx)
    .await?;

    save_week(&mut tx, provider.id, &new.week).await?;

    for url in &new.photos {
        sqlx::query("INSERT INTO provider_photos (provider_id, file_url) VALUES ($1, $2)")
            .bind(provider.id)
            .bind(url)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    info!("provider {} listed as {}", provider.id, provider.status);
    Ok(provider)
}

pub async fn change_listing_status(
    pool: &PgPool,
    provider_id: i32,
    actor: Actor,
    target: ListingStatus,
    reason: Option<String>,
) -> Result<Provider> {
    let provider = fetch_provider(pool, provider_id).await?;
    let role = listing_role(actor, provider.owner_id)?;
    let current = parse_status(&provider.status)?;
    let next = apply_transition(role, current, target, reason.as_deref())?;

    let updated = sqlx::query_as::<_, Provider>(
        "UPDATE providers
         SET status = $1, is_active = $2, rejection_reason = $3, updated_at = now()
         WHERE id = $4 RETURNING *",
    )
    .bind(next.status.as_str())
    .bind(next.is_active)
    .bind(&next.rejection_reason)
    .bind(provider_id)
    .fetch_one(pool)
    .await?;

    info!(
        "provider {} moved from {} to {}",
        provider_id,
        current.as_str(),
        next.status.as_str()
    );
    Ok(updated)
}

/// Update listing details; when a week plan is supplied the stored calendar
/// is replaced wholesale within the same transaction.
pub async fn update_listing(
    pool: &PgPool,
    provider_id: i32,
    actor: Actor,
    update: ListingUpdate,
) -> Result<Provider> {
    let provider = fetch_provider(pool, provider_id).await?;
    listing_role(actor, provider.owner_id)?;
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(Error::validation("listing name must not be empty"));
        }
    }

    let mut tx = pool.begin().await?;

    let updated = sqlx::query_as::<_, Provider>(
        "UPDATE providers
         SET name = COALESCE($1, name),
             description = COALESCE($2, description),
             address = COALESCE($3, address),
             categories = COALESCE($4, categories),
             updated_at = now()
         WHERE id = $5 RETURNING *",
    )
    .bind(&update.name)
    .bind(&update.description)
    .bind(&update.address)
    .bind(&update.categories)
    .bind(provider_id)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(week) = &update.week {
        sqlx::query("DELETE FROM working_hours WHERE provider_id = $1")
            .bind(provider_id)
            .execute(&mut *tx)
            .await?;
        save_week(&mut tx, provider_id, week).await?;
    }

    tx.commit().await?;
    Ok(updated)
}

/// Remove a listing; the schema cascades to its calendar, photos, bookings
/// and reviews.
pub async fn delete_listing(pool: &PgPool, provider_id: i32, actor: Actor) -> Result<()> {
    let provider = fetch_provider(pool, provider_id).await?;
    listing_role(actor, provider.owner_id)?;

    sqlx::query("DELETE FROM providers WHERE id = $1")
        .bind(provider_id)
        .execute(pool)
        .await?;

    info!("provider {provider_id} removed");
    Ok(())
}

pub async fn provider_photos(pool: &PgPool, provider_id: i32) -> Result<Vec<ProviderPhoto>> {
    let photos = sqlx::query_as::<_, ProviderPhoto>(
        "SELECT * FROM provider_photos WHERE provider_id = $1 ORDER BY id",
    )
    .bind(provider_id)
    .fetch_all(pool)
    .await?;

    Ok(photos)
}

pub async fn fetch_provider(pool: &PgPool, provider_id: i32) -> Result<Provider> {
    sqlx::query_as::<_, Provider>("SELECT * FROM providers WHERE id = $1")
        .bind(provider_id)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::NotFound)
}

fn listing_role(actor: Actor, owner_id: i32) -> Result<Role> {
    match actor.role {
        Role::Admin => Ok(Role::Admin),
        Role::Owner if actor.id == owner_id => Ok(Role::Owner),
        _ => Err(Error::Forbidden),
    }
}

fn parse_status(stored: &str) -> Result<ListingStatus> {
    ListingStatus::parse(stored)
        .ok_or_else(|| Error::validation(format!("unknown listing status `{stored}`")))
}

async fn save_week(
    tx: &mut Transaction<'_, Postgres>,
    provider_id: i32,
    week: &WeekPlan,
) -> Result<()> {
    for (weekday, hours) in week.iter().enumerate() {
        if let Some((open, close)) = hours {
            sqlx::query(
                "INSERT INTO working_hours (provider_id, weekday, open_time, close_time)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (provider_id, weekday) DO UPDATE
                 SET open_time = $3, close_time = $4",
            )
            .bind(provider_id)
            .bind(weekday as i16)
            .bind(*open)
            .bind(*close)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingStatus::{Approved, Inactive, Pending, Rejected};

    #[test]
    fn owner_submissions_start_moderated() {
        let state = initial_state(Role::Owner);
        assert_eq!(state.status, Pending);
        assert!(!state.is_active);
    }

    #[test]
    fn admin_created_listings_go_straight_live() {
        let state = initial_state(Role::Admin);
        assert_eq!(state.status, Approved);
        assert!(state.is_active);
    }

    #[test]
    fn only_admins_moderate() {
        assert!(matches!(
            apply_transition(Role::Owner, Pending, Approved, None),
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            apply_transition(Role::Owner, Pending, Rejected, Some("spam")),
            Err(Error::Forbidden)
        ));
        assert!(apply_transition(Role::Admin, Pending, Approved, None).is_ok());
    }

    #[test]
    fn rejection_requires_a_reason() {
        assert!(matches!(
            apply_transition(Role::Admin, Pending, Rejected, None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            apply_transition(Role::Admin, Pending, Rejected, Some("  ")),
            Err(Error::Validation(_))
        ));

        let state = apply_transition(Role::Admin, Pending, Rejected, Some("incomplete info")).unwrap();
        assert_eq!(state.status, Rejected);
        assert_eq!(state.rejection_reason.as_deref(), Some("incomplete info"));
        assert!(!state.is_active);
    }

    #[test]
    fn resubmission_clears_the_rejection_reason() {
        let state = apply_transition(Role::Owner, Rejected, Pending, None).unwrap();
        assert_eq!(state.status, Pending);
        assert_eq!(state.rejection_reason, None);
    }

    #[test]
    fn activation_toggle_mirrors_the_status() {
        let off = apply_transition(Role::Owner, Approved, Inactive, None).unwrap();
        assert_eq!(off.status, Inactive);
        assert!(!off.is_active);

        let on = apply_transition(Role::Admin, Inactive, Approved, None).unwrap();
        assert_eq!(on.status, Approved);
        assert!(on.is_active);
    }

    #[test]
    fn unlisted_moves_are_rejected() {
        assert!(matches!(
            apply_transition(Role::Admin, Pending, Inactive, None),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            apply_transition(Role::Admin, Rejected, Approved, None),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            apply_transition(Role::Admin, Approved, Rejected, Some("late")),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn customers_never_touch_moderation() {
        assert!(matches!(
            apply_transition(Role::Customer, Approved, Inactive, None),
            Err(Error::Forbidden)
        ));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, Time};

/// A listed garage business. `status` holds the moderation state as stored,
/// see [`ListingStatus`]; `is_active` mirrors the `approved`/`inactive` toggle.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Provider {
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub categories: Vec<String>,
    pub status: String,
    pub is_active: bool,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One weekday's open/close pair. A provider has at most seven of these;
/// a missing weekday means closed.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkingHours {
    pub id: i32,
    pub provider_id: i32,
    pub weekday: i16,
    pub open_time: Time,
    pub close_time: Time,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProviderPhoto {
    pub id: i32,
    pub provider_id: i32,
    pub file_url: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Booking {
    pub id: i32,
    pub provider_id: i32,
    pub customer_id: i32,
    pub service_category: String,
    pub booking_date: Date,
    pub booking_time: Time,
    pub status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Review {
    pub id: i32,
    pub provider_id: i32,
    pub customer_id: i32,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal bookings never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

/// Moderation state of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Pending,
    Approved,
    Rejected,
    Inactive,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Approved => "approved",
            ListingStatus::Rejected => "rejected",
            ListingStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ListingStatus::Pending),
            "approved" => Some(ListingStatus::Approved),
            "rejected" => Some(ListingStatus::Rejected),
            "inactive" => Some(ListingStatus::Inactive),
            _ => None,
        }
    }
}

/// Role claim supplied by the authentication collaborator. Ownership of the
/// concrete booking or listing is still checked against the row itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Owner,
    Admin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Actor {
    pub id: i32,
    pub role: Role,
}

impl Actor {
    pub fn new(id: i32, role: Role) -> Self {
        Actor { id, role }
    }
}

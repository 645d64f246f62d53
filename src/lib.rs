pub mod bookings;
pub mod db;
pub mod error;
pub mod listings;
pub mod models;
pub mod reviews;
pub mod schedule;

pub use error::{Error, Result};
pub use models::{
    Actor, Booking, BookingStatus, ListingStatus, Provider, ProviderPhoto, Review, Role,
    WorkingHours,
};

pub use bookings::NewBooking;
pub use listings::{ListingUpdate, NewListing, WeekPlan};
pub use reviews::{NewReview, Rating};

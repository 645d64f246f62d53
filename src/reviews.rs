use log::info;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::listings;
use crate::models::Review;

#[derive(Debug, Clone, Deserialize)]
pub struct NewReview {
    pub provider_id: i32,
    pub customer_id: i32,
    pub rating: i16,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rating {
    pub average: f64,
    pub count: i64,
}

/// Arithmetic mean rounded to one decimal place; no reviews means 0.0 / 0.
pub fn aggregate(ratings: &[i16]) -> Rating {
    if ratings.is_empty() {
        return Rating {
            average: 0.0,
            count: 0,
        };
    }
    let sum: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
    let average = sum as f64 / ratings.len() as f64;
    Rating {
        average: (average * 10.0).round() / 10.0,
        count: ratings.len() as i64,
    }
}

/// A customer keeps a single review per provider; submitting again replaces
/// the stored rating and comment.
pub async fn submit_review(pool: &PgPool, new: NewReview) -> Result<Review> {
    if !(1..=5).contains(&new.rating) {
        return Err(Error::validation("rating must be between 1 and 5"));
    }
    listings::fetch_provider(pool, new.provider_id).await?;

    let review = sqlx::query_as::<_, Review>(
        "INSERT INTO reviews (provider_id, customer_id, rating, comment)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (provider_id, customer_id) DO UPDATE
         SET rating = $3, comment = $4
         RETURNING *",
    )
    .bind(new.provider_id)
    .bind(new.customer_id)
    .bind(new.rating)
    .bind(&new.comment)
    .fetch_one(pool)
    .await?;

    info!(
        "customer {} rated provider {} with {}",
        review.customer_id, review.provider_id, review.rating
    );
    Ok(review)
}

/// Recomputed from the full review set on every call; nothing incremental
/// is maintained.
pub async fn rating_for(pool: &PgPool, provider_id: i32) -> Result<Rating> {
    listings::fetch_provider(pool, provider_id).await?;

    let ratings: Vec<i16> =
        sqlx::query_scalar("SELECT rating FROM reviews WHERE provider_id = $1")
            .bind(provider_id)
            .fetch_all(pool)
            .await?;

    Ok(aggregate(&ratings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_the_review_set() {
        let rating = aggregate(&[5, 4, 3]);
        assert_eq!(rating.average, 4.0);
        assert_eq!(rating.count, 3);
    }

    #[test]
    fn no_reviews_means_zero() {
        let rating = aggregate(&[]);
        assert_eq!(rating.average, 0.0);
        assert_eq!(rating.count, 0);
    }

    #[test]
    fn rounds_to_one_decimal() {
        assert_eq!(aggregate(&[3, 4, 4]).average, 3.7);
        assert_eq!(aggregate(&[4, 5]).average, 4.5);
        assert_eq!(aggregate(&[1, 1, 2]).average, 1.3);
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found")]
    NotFound,

    #[error("actor is not allowed to perform this action")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("cannot move from `{from}` to `{to}`")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("slot is already booked")]
    SlotConflict,

    #[error("storage error")]
    Database(#[source] sqlx::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        if matches!(error, sqlx::Error::RowNotFound) {
            return Error::NotFound;
        }
        Error::Database(error)
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GagyebuError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GagyebuError>;

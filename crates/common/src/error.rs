use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaybillError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type WaybillResult<T> = Result<T, WaybillError>;

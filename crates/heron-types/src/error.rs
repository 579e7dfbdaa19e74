use thiserror::Error;

/// Caller-visible outcome taxonomy for the social-graph and conversation
/// subsystem. Every variant is terminal; only `Unavailable` is worth
/// retrying, and every mutating operation except message send is safe to
/// retry (follow-state convergence, idempotent conversation creation).
#[derive(Debug, Error)]
pub enum SocialError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("cannot perform this action on yourself")]
    SelfAction,

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    Permission(&'static str),

    #[error("storage unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl SocialError {
    /// Wrap an unexpected storage error. The caller logs the operation
    /// context before surfacing this.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        SocialError::Unavailable(Box::new(err))
    }

    pub fn unavailable_msg(msg: impl Into<String>) -> Self {
        SocialError::Unavailable(msg.into().into())
    }

    /// Machine-readable code used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            SocialError::Validation(_) => "validation",
            SocialError::NotFound(_) => "not_found",
            SocialError::SelfAction => "self_action",
            SocialError::Conflict(_) => "conflict",
            SocialError::Permission(_) => "permission",
            SocialError::Unavailable(_) => "unavailable",
        }
    }
}

pub type SocialResult<T> = Result<T, SocialError>;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UmiError {
    #[error("{0}")]
    AlreadyExistentEntity(String),

    #[error("{0}")]
    NonexistentEntity(String),

    #[error("Operation not allowed: {0}")]
    NotAllowedOperation(String),

    #[error("Read-only entity: {0}")]
    ReadOnlyEntity(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Optimistic lock conflict: the stored row no longer carries the version
    /// the object was loaded with.
    #[error("Object out of date: {0}")]
    OutOfDate(String),

    #[error("Cannot commit objects: {} object(s) are not valid ({})", .0.len(), .0.join(", "))]
    InvalidObjects(Vec<String>),

    #[error("Unexpected value: {0}")]
    UnexpectedValue(String),

    #[error("Access to resource '{resource}' is forbidden")]
    ResourceAccessForbidden { resource: String },

    #[error("Not found: {0}")]
    HttpNotFound(String),

    #[error("Method not allowed: {0}")]
    HttpMethodNotAllowed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Request deadline exceeded while {0}")]
    DeadlineExceeded(String),

    #[error("Request cancelled while {0}")]
    Cancelled(String),
}

impl UmiError {
    /// Resource named by an access denial, if this is one.
    pub fn forbidden_resource(&self) -> Option<&str> {
        match self {
            Self::ResourceAccessForbidden { resource } => Some(resource),
            _ => None,
        }
    }

    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::OutOfDate(_))
    }
}

pub type Result<T> = std::result::Result<T, UmiError>;

impl<T> From<std::sync::PoisonError<T>> for UmiError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

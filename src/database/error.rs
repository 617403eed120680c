use thiserror::Error;

pub type DbResult<T> = Result<T, DatabaseError>;

const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseErrorKind {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("unique constraint violated ({})", constraint.as_deref().unwrap_or("unknown"))]
    UniqueViolation { constraint: Option<String> },

    #[error("connection error: {message}")]
    ConnectionError { message: String },

    #[error("query error: {message}")]
    QueryError { message: String },

    #[error("serialization error: {message}")]
    SerializationError { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn unique_violation(constraint: &str) -> Self {
        Self::new(DatabaseErrorKind::UniqueViolation {
            constraint: Some(constraint.to_string()),
        })
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::SerializationError {
            message: message.into(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().map(|c| c.to_string()),
                }
            }
            sqlx::Error::Database(db_err) => DatabaseErrorKind::QueryError {
                message: db_err.message().to_string(),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DatabaseErrorKind::ConnectionError {
                message: err.to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::SerializationError {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }
}

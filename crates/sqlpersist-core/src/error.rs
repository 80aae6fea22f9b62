//! Error types for persistence operations.

use std::fmt;

/// The primary error type for all persistence operations.
#[derive(Debug)]
pub enum Error {
    /// A row the caller expected to exist is gone
    NotFound(NotFoundError),
    /// An UPDATE or DELETE guarded by a version column matched no row
    OptimisticLock(OptimisticLockError),
    /// A write would violate nullability or key assignment rules
    IntegrityViolation(IntegrityError),
    /// An entity, attribute or join mapping cannot be resolved
    Mapping(MappingError),
    /// A different instance is already registered under the same key
    DuplicateKey(DuplicateKeyError),
    /// An illegal lifecycle transition was requested
    InvalidState(StateError),
    /// Connection-related errors (connect, disconnect)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct NotFoundError {
    pub entity: String,
    pub key: String,
}

#[derive(Debug)]
pub struct OptimisticLockError {
    pub entity: String,
    pub key: String,
    /// The version the in-memory instance was loaded with
    pub expected_version: Option<String>,
}

#[derive(Debug)]
pub struct IntegrityError {
    pub entity: String,
    pub attribute: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct MappingError {
    pub entity: Option<String>,
    pub attribute: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct DuplicateKeyError {
    pub entity: String,
    pub key: String,
}

#[derive(Debug)]
pub struct StateError {
    pub from: String,
    pub to: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Lock contention
    Busy,
    /// Interrupted by the connection
    Cancelled,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a mapping error for an entity-level problem.
    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            entity: Some(entity.into()),
            attribute: None,
            message: message.into(),
        })
    }

    /// Build a mapping error pinned to one attribute.
    pub fn mapping_attr(
        entity: impl Into<String>,
        attribute: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Mapping(MappingError {
            entity: Some(entity.into()),
            attribute: Some(attribute.into()),
            message: message.into(),
        })
    }

    /// Build an integrity violation for one attribute.
    pub fn integrity(
        entity: impl Into<String>,
        attribute: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::IntegrityViolation(IntegrityError {
            entity: entity.into(),
            attribute: attribute.map(str::to_string),
            message: message.into(),
        })
    }

    /// Is this a failure reported by the connection capability?
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Query(_) | Error::Io(_)
        )
    }

    /// Is this a lost update?
    pub fn is_optimistic_lock(&self) -> bool {
        matches!(self, Error::OptimisticLock(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(e) => write!(f, "Entity not found: {}", e),
            Error::OptimisticLock(e) => write!(f, "Optimistic lock failure: {}", e),
            Error::IntegrityViolation(e) => write!(f, "Integrity violation: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::DuplicateKey(e) => write!(f, "Duplicate key: {}", e),
            Error::InvalidState(e) => write!(f, "Invalid state transition: {}", e),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with key {}", self.entity, self.key)
    }
}

impl fmt::Display for OptimisticLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expected_version {
            Some(v) => write!(
                f,
                "{} with key {} was modified concurrently (expected version {})",
                self.entity, self.key, v
            ),
            None => write!(
                f,
                "{} with key {} was modified concurrently",
                self.entity, self.key
            ),
        }
    }
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attr) => write!(f, "{}.{}: {}", self.entity, attr, self.message),
            None => write!(f, "{}: {}", self.entity, self.message),
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.entity, &self.attribute) {
            (Some(e), Some(a)) => write!(f, "{}.{}: {}", e, a, self.message),
            (Some(e), None) => write!(f, "{}: {}", e, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for DuplicateKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "another {} instance is already managed with key {}",
            self.entity, self.key
        )
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.from, self.to, self.message)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_family_classification() {
        let query = Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("DELETE FROM t".to_string()),
            message: "FOREIGN KEY constraint failed".to_string(),
            source: None,
        });
        assert!(query.is_io());
        assert_eq!(query.sql(), Some("DELETE FROM t"));

        let lock = Error::OptimisticLock(OptimisticLockError {
            entity: "Account".to_string(),
            key: "[7]".to_string(),
            expected_version: Some("3".to_string()),
        });
        assert!(!lock.is_io());
        assert!(lock.is_optimistic_lock());
    }

    #[test]
    fn display_messages() {
        let err = Error::mapping_attr("Book", "author", "unknown target entity 'Writer'");
        assert_eq!(
            err.to_string(),
            "Mapping error: Book.author: unknown target entity 'Writer'"
        );

        let err = Error::integrity("Book", Some("title"), "must not be null");
        assert_eq!(
            err.to_string(),
            "Integrity violation: Book.title: must not be null"
        );

        let err = Error::NotFound(NotFoundError {
            entity: "Book".to_string(),
            key: "[42]".to_string(),
        });
        assert_eq!(err.to_string(), "Entity not found: Book with key [42]");
    }

    #[test]
    fn io_error_source_is_preserved() {
        let err: Error = std::io::Error::other("socket closed").into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.is_io());
    }
}

use std::borrow::Cow;

use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    InvalidInput,
    NotFound,
    Conflict,
    Database,
    Unknown,
}

/// Domain error carried through every layer.
///
/// `public` is safe to hand to callers; `source` is the internal cause and is
/// only ever logged.
#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: Cow<'static, str>,
    pub source: anyhow::Error,
}

impl LibError {
    fn new(
        kind: ErrorKind,
        code: &'static str,
        public: impl Into<Cow<'static, str>>,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind,
            code,
            public: public.into(),
            source,
        }
    }

    pub fn unauthenticated(source: anyhow::Error) -> Self {
        Self::new(
            ErrorKind::Unauthenticated,
            "unauthenticated",
            "Authentication required",
            source,
        )
    }

    pub fn forbidden(public: impl Into<Cow<'static, str>>, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Forbidden, "permission_denied", public, source)
    }

    pub fn invalid(public: impl Into<Cow<'static, str>>, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::InvalidInput, "invalid_input", public, source)
    }

    pub fn invalid_with_code(
        code: &'static str,
        public: impl Into<Cow<'static, str>>,
        source: anyhow::Error,
    ) -> Self {
        Self::new(ErrorKind::InvalidInput, code, public, source)
    }

    pub fn not_found(public: impl Into<Cow<'static, str>>, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::NotFound, "not_found", public, source)
    }

    pub fn conflict(public: impl Into<Cow<'static, str>>, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Conflict, "conflict", public, source)
    }

    pub fn database(public: impl Into<Cow<'static, str>>, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Database, "database_error", public, source)
    }

    pub fn unknown(public: impl Into<Cow<'static, str>>, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Unknown, "unknown_error", public, source)
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.public, self.code)
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        let unique_violation = value
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation());
        if unique_violation {
            Self::conflict("Record already exists", anyhow!(value))
        } else {
            Self::database("Database request failed", anyhow!(value))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("run store lock poisoned")]
    LockPoisoned,
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &std::path::Path, source: serde_json::Error) -> PersistenceError {
    PersistenceError::Json {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read engine settings at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot create engine settings directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write engine settings to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize engine settings for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("engine settings at {path} are not valid yaml: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid engine settings: {0}")]
    Validation(String),
    #[error("no home directory to place engine settings under")]
    HomeDirectoryUnavailable,
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("{tool} executable not found: {source}")]
    ToolNotFound {
        tool: String,
        #[source]
        source: which::Error,
    },

    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} did not finish within {secs} seconds")]
    Timeout { tool: String, secs: u64 },

    #[error("Backup catalog could not be parsed: {0}")]
    Catalog(String),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A GET returned something other than the status the gateway answers with when healthy.
    #[error("connection failure: {path} returned HTTP {status}")]
    ConnectionFailure { path: String, status: u16 },

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("preset rejected (HTTP {status}): {body}")]
    PresetRejected { status: u16, body: String },

    #[error("temperature rejected (HTTP {status}): {body}")]
    TemperatureRejected { status: u16, body: String },

    #[error("schedule rejected (HTTP {status}): {body}")]
    ScheduleRejected { status: u16, body: String },

    #[error("relay rejected (HTTP {status}): {body}")]
    RelayRejected { status: u16, body: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

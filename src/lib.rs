mod client;
mod diff;
mod document;
mod error;
mod logger;
pub mod protocol;
pub mod query;
pub mod reconcile;
mod types;

pub use client::{SmileClient, SmileClientBuilder};
pub use document::{DocumentSet, ParsedSet, XmlDocument};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use protocol::Endpoint;
pub use types::*;

use roxmltree::Document;

use crate::Result;
use crate::protocol::{Endpoint, sanitize_ampersands};

/// Sanitized XML text of one gateway endpoint.
///
/// `roxmltree` borrows its input, so the text is owned here and parsed on demand.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    endpoint: Endpoint,
    text: String,
}

impl XmlDocument {
    pub fn from_raw(endpoint: Endpoint, raw: &str) -> Self {
        Self {
            endpoint,
            text: sanitize_ampersands(raw),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parse(&self) -> Result<Document<'_>> {
        Ok(Document::parse(&self.text)?)
    }
}

/// The four independently fetched documents one update cycle works on.
#[derive(Debug, Clone)]
pub struct DocumentSet {
    pub appliances: XmlDocument,
    pub locations: XmlDocument,
    pub domain_objects: XmlDocument,
    pub direct_objects: XmlDocument,
}

impl DocumentSet {
    pub fn from_raw(appliances: &str, locations: &str, domain_objects: &str, direct_objects: &str) -> Self {
        Self {
            appliances: XmlDocument::from_raw(Endpoint::Appliances, appliances),
            locations: XmlDocument::from_raw(Endpoint::Locations, locations),
            domain_objects: XmlDocument::from_raw(Endpoint::DomainObjects, domain_objects),
            direct_objects: XmlDocument::from_raw(Endpoint::DirectObjects, direct_objects),
        }
    }

    pub fn parse(&self) -> Result<ParsedSet<'_>> {
        Ok(ParsedSet {
            appliances: self.appliances.parse()?,
            locations: self.locations.parse()?,
            domain_objects: self.domain_objects.parse()?,
            direct_objects: self.direct_objects.parse()?,
        })
    }
}

pub struct ParsedSet<'a> {
    pub appliances: Document<'a>,
    pub locations: Document<'a>,
    pub domain_objects: Document<'a>,
    pub direct_objects: Document<'a>,
}

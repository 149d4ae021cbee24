use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::diff::{device_events, to_json};
use crate::document::{DocumentSet, XmlDocument};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    self, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS, DEFAULT_USERNAME, Endpoint, legacy_thermostat_path, location_path,
    relay_path, rule_path, thermostat_path,
};
use crate::query;
use crate::reconcile::build_devices;
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&[DeviceState]) + Send + Sync>;

pub struct SmileClientBuilder {
    host: String,
    port: u16,
    protocol: String,
    username: String,
    password: String,
    timeout: Duration,
    document_mode: DocumentMode,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl SmileClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            protocol: "http".to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: String::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            document_mode: DocumentMode::default(),
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn protocol(mut self, proto: &str) -> Self {
        self.protocol = proto.to_string();
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Password only; the username stays `smile`.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn document_mode(mut self, mode: DocumentMode) -> Self {
        self.document_mode = mode;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&[DeviceState]) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<SmileClient> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        Ok(SmileClient {
            http,
            base_url: format!("{}://{}:{}", self.protocol, self.host, self.port),
            username: self.username,
            password: self.password,
            document_mode: self.document_mode,
            documents: None,
            devices: Vec::new(),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
            logger,
        })
    }
}

pub struct SmileClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    document_mode: DocumentMode,
    documents: Option<Arc<DocumentSet>>,
    devices: Vec<DeviceState>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    logger: Option<MessageLogger>,
}

impl SmileClient {
    pub fn builder(host: impl Into<String>) -> SmileClientBuilder {
        SmileClientBuilder::new(host)
    }

    pub fn document_mode(&self) -> DocumentMode {
        self.document_mode
    }

    /// Devices as of the last `refresh()`.
    pub fn cached_devices(&self) -> &[DeviceState] {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&DeviceState> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Checks the gateway is reachable. It answers `/ping` with a 404.
    pub async fn ping(&mut self) -> Result<()> {
        let (status, body) = self.send_get(Endpoint::Ping).await?;
        self.record_get(Endpoint::Ping, status, body.len());
        check_status(Endpoint::Ping, status)
    }

    pub async fn fetch(&mut self, endpoint: Endpoint) -> Result<XmlDocument> {
        let (status, body) = self.send_get(endpoint).await?;
        self.accept(endpoint, status, &body)
    }

    /// Fetches the four documents one update cycle needs, concurrently.
    pub async fn fetch_all(&mut self) -> Result<DocumentSet> {
        let (appliances, locations, domain_objects, direct_objects) = tokio::try_join!(
            self.send_get(Endpoint::Appliances),
            self.send_get(Endpoint::Locations),
            self.send_get(Endpoint::DomainObjects),
            self.send_get(Endpoint::DirectObjects),
        )?;

        Ok(DocumentSet {
            appliances: self.accept(Endpoint::Appliances, appliances.0, &appliances.1)?,
            locations: self.accept(Endpoint::Locations, locations.0, &locations.1)?,
            domain_objects: self.accept(Endpoint::DomainObjects, domain_objects.0, &domain_objects.1)?,
            direct_objects: self.accept(Endpoint::DirectObjects, direct_objects.0, &direct_objects.1)?,
        })
    }

    /// Re-fetches every document, rebuilds the device list and notifies callbacks.
    /// In session mode this also replaces the cached documents.
    pub async fn refresh(&mut self) -> Result<()> {
        let docs = Arc::new(self.fetch_all().await?);
        if self.document_mode == DocumentMode::Session {
            self.documents = Some(Arc::clone(&docs));
        }
        let devices = {
            let parsed = docs.parse()?;
            build_devices(&parsed)?
        };
        self.apply_snapshot(devices);
        Ok(())
    }

    /// Current device states, read from the session cache or fetched fresh.
    pub async fn devices(&mut self) -> Result<Vec<DeviceState>> {
        let docs = self.documents().await?;
        let parsed = docs.parse()?;
        build_devices(&parsed)
    }

    /// Location of the first (zone) thermostat, for single-zone gateways.
    pub async fn thermostat_location_id(&mut self) -> Result<String> {
        let docs = self.documents().await?;
        let parsed = docs.appliances.parse()?;
        let location = ["thermostat", "zone_thermostat"]
            .iter()
            .flat_map(|t| query::appliances_by_type(&parsed, t))
            .find_map(query::appliance_location_id)
            .map(str::to_string);
        location.ok_or_else(|| Error::not_found("thermostat location", "thermostat"))
    }

    // -- Command methods --

    /// Set the active preset of a location.
    ///
    /// A first-generation Anna has no locations; pass its appliance id and the
    /// matching preset rule is activated instead.
    pub async fn set_preset(&mut self, location_id: &str, preset: &str) -> Result<()> {
        let docs = self.documents().await?;
        let (path, body) = {
            let locations = docs.locations.parse()?;
            match query::location_by_id(&locations, location_id) {
                Some(location) => (
                    location_path(location_id),
                    protocol::preset_body(
                        location_id,
                        query::entity_name(location).unwrap_or(""),
                        query::entity_type(location).unwrap_or(""),
                        preset,
                    ),
                ),
                None => legacy_preset_request(&docs, location_id, preset)?,
            }
        };

        let (status, text) = self.put(&path, body).await?;
        if status != 200 {
            return Err(Error::PresetRejected { status, body: text });
        }
        Ok(())
    }

    /// Set the thermostat setpoint of a location, or of a first-generation
    /// Anna addressed by appliance id.
    pub async fn set_temperature(&mut self, location_id: &str, temperature: f64) -> Result<()> {
        let docs = self.documents().await?;
        let path = {
            let domain = docs.domain_objects.parse()?;
            match query::thermostat_functionality_id(&domain, location_id) {
                Some(functionality_id) => thermostat_path(location_id, functionality_id),
                None => legacy_temperature_path(&docs, location_id)?,
            }
        };

        let (status, text) = self.put(&path, protocol::setpoint_body(temperature)).await?;
        if status != 200 {
            return Err(Error::TemperatureRejected { status, body: text });
        }
        Ok(())
    }

    /// Activate or deactivate the schedule named `schedule`.
    pub async fn set_schedule_state(&mut self, schedule: &str, active: bool) -> Result<()> {
        let docs = self.documents().await?;
        let (rule_id, body) = {
            let domain = docs.domain_objects.parse()?;
            let rule_id = query::rule_id_by_name(&domain, schedule)
                .ok_or_else(|| Error::not_found("schedule", schedule))?;
            let template_id = query::template_id_for_rule(&domain, rule_id);
            (
                rule_id.to_string(),
                protocol::schedule_state_body(rule_id, schedule, template_id, active),
            )
        };

        let (status, text) = self.put(&rule_path(&rule_id), body).await?;
        if status != 200 {
            return Err(Error::ScheduleRejected { status, body: text });
        }
        Ok(())
    }

    /// Switch the relay of a plug or other switchable appliance.
    pub async fn set_relay_state(&mut self, appliance_id: &str, on: bool) -> Result<()> {
        let docs = self.documents().await?;
        let functionality_id = {
            let appliances = docs.appliances.parse()?;
            let direct = docs.direct_objects.parse()?;
            query::appliance_by_id(&appliances, appliance_id)
                .and_then(query::relay_functionality_id)
                .or_else(|| {
                    trace!(appliance = appliance_id, "relay not in appliances, trying direct objects");
                    query::appliance_by_id(&direct, appliance_id).and_then(query::relay_functionality_id)
                })
                .map(str::to_string)
                .ok_or_else(|| Error::not_found("relay functionality", appliance_id))?
        };

        let path = relay_path(appliance_id, &functionality_id);
        let (status, text) = self.put(&path, protocol::relay_body(on)).await?;
        if status != 200 {
            return Err(Error::RelayRejected { status, body: text });
        }
        Ok(())
    }

    // -- Helpers --

    async fn documents(&mut self) -> Result<Arc<DocumentSet>> {
        if self.document_mode == DocumentMode::Session
            && let Some(docs) = &self.documents
        {
            trace!("using cached documents");
            return Ok(Arc::clone(docs));
        }

        let docs = Arc::new(self.fetch_all().await?);
        if self.document_mode == DocumentMode::Session {
            self.documents = Some(Arc::clone(&docs));
        }
        Ok(docs)
    }

    async fn send_get(&self, endpoint: Endpoint) -> Result<(u16, String)> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        debug!(url = %url, "fetching");
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok((status, body))
    }

    fn record_get(&mut self, endpoint: Endpoint, status: u16, bytes: usize) {
        if let Some(ref mut logger) = self.logger {
            logger.log_request("GET", endpoint.path(), None);
            logger.log_response(endpoint.path(), status, bytes);
        }
    }

    fn accept(&mut self, endpoint: Endpoint, status: u16, body: &str) -> Result<XmlDocument> {
        self.record_get(endpoint, status, body.len());
        check_status(endpoint, status)?;
        Ok(XmlDocument::from_raw(endpoint, body))
    }

    async fn put(&mut self, path: &str, body: String) -> Result<(u16, String)> {
        if let Some(ref mut logger) = self.logger {
            logger.log_request("PUT", path, Some(&body));
        }

        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "sending command");
        let resp = self
            .http
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;

        if let Some(ref mut logger) = self.logger {
            logger.log_response(path, status, text.len());
        }
        Ok((status, text))
    }

    fn apply_snapshot(&mut self, devices: Vec<DeviceState>) {
        let events = device_events(&self.devices, &devices);

        if let Some(ref mut logger) = self.logger {
            let snapshot: Map<String, Value> = devices.iter().map(|d| (d.id.clone(), to_json(d))).collect();
            logger.log_snapshot(&Value::Object(snapshot));
        }

        for event in &events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        for cb in &self.snapshot_callbacks {
            cb(devices.as_slice());
        }

        if !events.is_empty() {
            debug!(count = events.len(), "processed events from refresh");
        }
        self.devices = devices;
    }
}

fn legacy_preset_request(docs: &DocumentSet, appliance_id: &str, preset: &str) -> Result<(String, String)> {
    let appliances = docs.appliances.parse()?;
    if query::appliance_by_id(&appliances, appliance_id).is_none() {
        return Err(Error::not_found("location", appliance_id));
    }
    let direct = docs.direct_objects.parse()?;
    let rule_id = query::legacy_preset_rule_id(&direct, preset).ok_or_else(|| Error::not_found("preset", preset))?;
    debug!(appliance = appliance_id, rule = rule_id, "activating legacy preset rule");
    Ok((Endpoint::Rules.path().to_string(), protocol::legacy_preset_body(rule_id)))
}

fn legacy_temperature_path(docs: &DocumentSet, appliance_id: &str) -> Result<String> {
    let appliances = docs.appliances.parse()?;
    let appliance_type = query::appliance_by_id(&appliances, appliance_id).and_then(query::entity_type);
    if appliance_type != Some("thermostat") {
        return Err(Error::not_found("thermostat functionality", appliance_id));
    }
    Ok(legacy_thermostat_path(appliance_id))
}

fn check_status(endpoint: Endpoint, status: u16) -> Result<()> {
    if status != endpoint.expected_status() {
        return Err(Error::ConnectionFailure {
            path: endpoint.path().to_string(),
            status,
        });
    }
    Ok(())
}

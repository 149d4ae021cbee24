//! Typed lookups over the gateway's XML documents.
//!
//! Every function answers one conceptual question (an entity by id, entities
//! by type, a measurement by log type) against a parsed `roxmltree` document.
//! Absent data is `None`, never an error.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use roxmltree::{Document, Node};
use tracing::{trace, warn};

use crate::types::format_one_decimal;

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn children<'a, 'input>(node: Node<'a, 'input>, tag: &'static str) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |n| n.has_tag_name(tag))
}

fn child_text<'a>(node: Node<'a, '_>, tag: &str) -> Option<&'a str> {
    child(node, tag).map(|n| n.text().unwrap_or("").trim())
}

fn top_level<'a, 'input>(doc: &'a Document<'input>, tag: &'static str) -> impl Iterator<Item = Node<'a, 'input>> {
    children(doc.root_element(), tag)
}

fn by_id<'a, 'input>(doc: &'a Document<'input>, tag: &str, id: &str) -> Option<Node<'a, 'input>> {
    doc.root_element()
        .children()
        .find(|n| n.has_tag_name(tag) && n.attribute("id") == Some(id))
}

// -- Entities --

pub fn appliances<'a, 'input>(doc: &'a Document<'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    top_level(doc, "appliance")
}

pub fn appliance_by_id<'a, 'input>(doc: &'a Document<'input>, id: &str) -> Option<Node<'a, 'input>> {
    by_id(doc, "appliance", id)
}

pub fn appliances_by_type<'a, 'input>(doc: &'a Document<'input>, appliance_type: &str) -> Vec<Node<'a, 'input>> {
    appliances(doc)
        .filter(|a| child_text(*a, "type") == Some(appliance_type))
        .collect()
}

pub fn location_by_id<'a, 'input>(doc: &'a Document<'input>, id: &str) -> Option<Node<'a, 'input>> {
    by_id(doc, "location", id)
}

pub fn entity_id<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.attribute("id")
}

pub fn entity_name<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    child_text(node, "name")
}

pub fn entity_type<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    child_text(node, "type")
}

/// The location an appliance itself points at.
pub fn appliance_location_id<'a>(appliance: Node<'a, '_>) -> Option<&'a str> {
    child(appliance, "location").and_then(|l| l.attribute("id"))
}

/// Locations (id, name) whose appliance references include `appliance_id`, in document order.
pub fn location_names_for_appliance(doc: &Document<'_>, appliance_id: &str) -> Vec<(String, String)> {
    top_level(doc, "location")
        .filter(|loc| {
            loc.descendants()
                .any(|n| n.has_tag_name("appliance") && n.attribute("id") == Some(appliance_id))
        })
        .filter_map(|loc| {
            let id = loc.attribute("id")?;
            let name = entity_name(loc).unwrap_or("");
            Some((id.to_string(), name.to_string()))
        })
        .collect()
}

// -- Measurements --

/// Text of the `logs/point_log[type=log_type]/period/measurement` entry below `node`.
pub fn measurement<'a>(node: Node<'a, '_>, log_type: &str) -> Option<&'a str> {
    let found = node
        .descendants()
        .filter(|n| n.has_tag_name("logs"))
        .flat_map(|logs| children(logs, "point_log"))
        .find(|log| child_text(*log, "type") == Some(log_type))
        .and_then(|log| child(log, "period"))
        .and_then(|period| child(period, "measurement"))
        .map(|m| m.text().unwrap_or("").trim());
    trace!(log_type, found = ?found, "measurement lookup");
    found
}

pub fn numeric_measurement(node: Node<'_, '_>, log_type: &str) -> Option<f64> {
    let text = measurement(node, log_type)?;
    match text.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(log_type, text, "unparsable measurement");
            None
        }
    }
}

/// One-decimal display string of a numeric measurement.
pub fn formatted_measurement(node: Node<'_, '_>, log_type: &str) -> Option<String> {
    numeric_measurement(node, log_type).map(format_one_decimal)
}

/// `Some(true)` for `"on"`, `Some(false)` for any other text, `None` when the log is absent.
pub fn status_flag(node: Node<'_, '_>, log_type: &str) -> Option<bool> {
    measurement(node, log_type).map(|text| text == "on")
}

/// Outdoor temperature as reported on the first location carrying it.
pub fn outdoor_temperature(locations: &Document<'_>) -> Option<String> {
    top_level(locations, "location").find_map(|loc| formatted_measurement(loc, "outdoor_temperature"))
}

pub fn water_pressure(appliances_doc: &Document<'_>) -> Option<String> {
    appliances(appliances_doc).find_map(|a| formatted_measurement(a, "central_heater_water_pressure"))
}

// -- Locations --

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationSummary {
    pub id: String,
    pub name: String,
    pub location_type: String,
    pub preset: Option<String>,
    pub setpoint: Option<f64>,
    pub temperature: Option<f64>,
}

pub fn location_summary(doc: &Document<'_>, location_id: &str) -> Option<LocationSummary> {
    let loc = location_by_id(doc, location_id)?;
    Some(LocationSummary {
        id: location_id.to_string(),
        name: entity_name(loc).unwrap_or("").to_string(),
        location_type: entity_type(loc).unwrap_or("").to_string(),
        preset: child_text(loc, "preset").filter(|p| !p.is_empty()).map(str::to_string),
        setpoint: numeric_measurement(loc, "thermostat"),
        temperature: numeric_measurement(loc, "temperature"),
    })
}

// -- Functionalities --

pub fn thermostat_functionality_id<'a>(doc: &'a Document<'_>, location_id: &str) -> Option<&'a str> {
    let loc = location_by_id(doc, location_id)?;
    child(loc, "actuator_functionalities")
        .and_then(|f| child(f, "thermostat_functionality"))
        .and_then(|t| t.attribute("id"))
}

pub fn relay_functionality_id<'a>(appliance: Node<'a, '_>) -> Option<&'a str> {
    child(appliance, "actuator_functionalities")
        .and_then(|f| child(f, "relay_functionality"))
        .and_then(|r| r.attribute("id"))
}

pub fn relay_state(appliance: Node<'_, '_>) -> Option<bool> {
    child(appliance, "actuator_functionalities")
        .and_then(|f| child(f, "relay_functionality"))
        .and_then(|r| child_text(r, "state"))
        .map(|s| s == "on")
        .or_else(|| status_flag(appliance, "relay"))
}

// -- Rules --

/// The rule fields the reconciler works with.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleInfo {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub modified: Option<DateTime<FixedOffset>>,
}

pub fn rules<'a, 'input>(doc: &'a Document<'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    top_level(doc, "rule")
}

pub fn rule_by_id<'a, 'input>(doc: &'a Document<'input>, rule_id: &str) -> Option<Node<'a, 'input>> {
    by_id(doc, "rule", rule_id)
}

pub fn rule_info(rule: Node<'_, '_>) -> Option<RuleInfo> {
    let id = rule.attribute("id")?;
    let name = entity_name(rule).unwrap_or("");
    let modified = child_text(rule, "modified_date").and_then(|date| {
        DateTime::parse_from_rfc3339(date)
            .map_err(|e| warn!(rule = id, date, error = %e, "unparsable modified_date"))
            .ok()
    });
    Some(RuleInfo {
        id: id.to_string(),
        name: name.to_string(),
        active: child_text(rule, "active") == Some("true"),
        modified,
    })
}

fn rule_location<'a>(rule: Node<'a, '_>) -> Option<&'a str> {
    rule.descendants()
        .filter(|n| n.has_tag_name("location"))
        .filter_map(|n| n.attribute("id"))
        .last()
}

fn rules_to_locations<'a, 'input: 'a>(
    matching: impl Iterator<Item = Node<'a, 'input>>,
) -> BTreeMap<String, String> {
    matching
        .filter_map(|rule| {
            let id = rule.attribute("id")?;
            match rule_location(rule) {
                Some(loc) => Some((id.to_string(), loc.to_string())),
                None => {
                    trace!(rule = id, "rule without location");
                    None
                }
            }
        })
        .collect()
}

/// Rule id -> location id for every rule whose template carries `tag`.
pub fn rules_by_template_tag(doc: &Document<'_>, tag: &str) -> BTreeMap<String, String> {
    rules_to_locations(rules(doc).filter(|rule| {
        child(*rule, "template").and_then(|t| t.attribute("tag")) == Some(tag)
    }))
}

/// Rule id -> location id for every rule named `name`.
pub fn rules_by_name(doc: &Document<'_>, name: &str) -> BTreeMap<String, String> {
    rules_to_locations(rules(doc).filter(|rule| entity_name(*rule) == Some(name)))
}

pub fn rule_id_by_name<'a>(doc: &'a Document<'_>, name: &str) -> Option<&'a str> {
    rules(doc)
        .find(|rule| entity_name(*rule) == Some(name))
        .and_then(|rule| rule.attribute("id"))
}

pub fn template_id_for_rule<'a>(doc: &'a Document<'_>, rule_id: &str) -> Option<&'a str> {
    rule_by_id(doc, rule_id)
        .and_then(|rule| child(rule, "template"))
        .and_then(|t| t.attribute("id"))
}

/// Preset name -> setpoint from a rule's `directives`.
pub fn preset_dictionary(doc: &Document<'_>, rule_id: &str) -> BTreeMap<String, f64> {
    let Some(directives) = rule_by_id(doc, rule_id).and_then(|r| child(r, "directives")) else {
        return BTreeMap::new();
    };
    directives
        .children()
        .filter(|d| d.is_element())
        .filter_map(|d| {
            let preset = d.attribute("preset")?;
            let setpoint = child(d, "then")?.attribute("setpoint")?;
            match setpoint.parse::<f64>() {
                Ok(v) => Some((preset.to_string(), v)),
                Err(_) => {
                    warn!(rule = rule_id, preset, setpoint, "unparsable preset setpoint");
                    None
                }
            }
        })
        .collect()
}

// -- First-generation Anna layout --

/// Id of the point log a module service exposes for `log_type`.
pub fn point_log_id<'a>(doc: &'a Document<'_>, log_type: &str) -> Option<&'a str> {
    top_level(doc, "module")
        .filter_map(|m| child(m, "services"))
        .flat_map(|s| s.children().filter(|n| n.is_element()))
        .filter(|service| service.attribute("log_type") == Some(log_type))
        .filter_map(|service| child(service, "functionalities"))
        .find_map(|f| child(f, "point_log"))
        .and_then(|log| log.attribute("id"))
}

pub fn measurement_by_point_log_id<'a>(doc: &'a Document<'_>, point_log_id: &str) -> Option<&'a str> {
    doc.root_element()
        .children()
        .filter(|n| n.is_element())
        .filter_map(|entity| child(entity, "logs"))
        .flat_map(|logs| children(logs, "point_log"))
        .find(|log| log.attribute("id") == Some(point_log_id))
        .and_then(|log| child(log, "period"))
        .and_then(|period| child(period, "measurement"))
        .map(|m| m.text().unwrap_or("").trim())
}

/// Measurement for `log_type` resolved through the module/service point log id.
pub fn legacy_measurement(doc: &Document<'_>, log_type: &str) -> Option<f64> {
    let id = point_log_id(doc, log_type)?;
    measurement_by_point_log_id(doc, id)?.parse().ok()
}

fn legacy_then_nodes<'a, 'input>(rule: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    children(rule, "directives")
        .flat_map(|d| children(d, "when"))
        .flat_map(|w| children(w, "then"))
}

/// Preset icon -> temperature from `rule/directives/when/then`.
pub fn legacy_presets(doc: &Document<'_>) -> BTreeMap<String, f64> {
    rules(doc)
        .flat_map(|rule| legacy_then_nodes(rule))
        .filter_map(|then| {
            let icon = then.attribute("icon")?;
            let temp = then.attribute("temperature")?.parse::<f64>().ok()?;
            Some((icon.to_string(), temp))
        })
        .collect()
}

pub fn legacy_active_preset<'a>(doc: &'a Document<'_>) -> Option<&'a str> {
    rules(doc)
        .filter(|r| child_text(*r, "active") == Some("true"))
        .flat_map(|rule| legacy_then_nodes(rule))
        .find_map(|then| then.attribute("icon"))
}

/// Id of the rule whose directives carry `preset` as an icon.
pub fn legacy_preset_rule_id<'a>(doc: &'a Document<'_>, preset: &str) -> Option<&'a str> {
    rules(doc)
        .find(|rule| legacy_then_nodes(*rule).any(|then| then.attribute("icon") == Some(preset)))
        .and_then(|rule| rule.attribute("id"))
}

/// Names of the rules that are schedules rather than preset definitions.
pub fn legacy_schedules(doc: &Document<'_>) -> Vec<RuleInfo> {
    rules(doc)
        .filter_map(rule_info)
        .filter(|r| !r.name.is_empty() && !r.name.contains("preset"))
        .collect()
}

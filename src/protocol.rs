pub const DEFAULT_USERNAME: &str = "smile";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub const PRESET_RULE_TAG: &str = "zone_setpoint_and_state_based_on_preset";
pub const PRESET_RULE_NAME: &str = "Thermostat presets";
pub const SCHEDULE_RULE_TAG: &str = "zone_preset_based_on_time_and_presence_with_override";

/// Fixed gateway resources the client reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Ping,
    Appliances,
    Locations,
    DirectObjects,
    DomainObjects,
    Rules,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Ping => "/ping",
            Endpoint::Appliances => "/core/appliances",
            Endpoint::Locations => "/core/locations",
            Endpoint::DirectObjects => "/core/direct_objects",
            Endpoint::DomainObjects => "/core/domain_objects",
            Endpoint::Rules => "/core/rules",
        }
    }

    /// The gateway has no page at `/ping`; a 404 there means it is up.
    pub fn expected_status(&self) -> u16 {
        match self {
            Endpoint::Ping => 404,
            _ => 200,
        }
    }
}

pub fn rule_path(rule_id: &str) -> String {
    format!("{};id={rule_id}", Endpoint::Rules.path())
}

pub fn location_path(location_id: &str) -> String {
    format!("{};id={location_id}", Endpoint::Locations.path())
}

pub fn thermostat_path(location_id: &str, functionality_id: &str) -> String {
    format!("{}/thermostat;id={functionality_id}", location_path(location_id))
}

/// Setpoint resource of a first-generation Anna, addressed by appliance.
pub fn legacy_thermostat_path(appliance_id: &str) -> String {
    format!("{};id={appliance_id}/thermostat", Endpoint::Appliances.path())
}

pub fn relay_path(appliance_id: &str, functionality_id: &str) -> String {
    format!(
        "{};id={appliance_id}/relay;id={functionality_id}",
        Endpoint::Appliances.path()
    )
}

/// Rewrites every `&` that does not start an entity or character reference to `&amp;`.
/// The gateway emits raw ampersands in user-supplied names.
pub fn sanitize_ampersands(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(next) if next.is_ascii_alphabetic() || *next == '#' => out.push('&'),
            _ => out.push_str("&amp;"),
        }
    }
    out
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

/// Setpoints are sent with at least one decimal, e.g. `20.0`.
pub fn format_setpoint(temperature: f64) -> String {
    if temperature.fract() == 0.0 {
        format!("{temperature:.1}")
    } else {
        format!("{temperature}")
    }
}

pub fn schedule_state_body(rule_id: &str, name: &str, template_id: Option<&str>, active: bool) -> String {
    let template = match template_id {
        Some(id) => format!(r#"<template id="{}" />"#, escape_attr(id)),
        None => "<template />".to_string(),
    };
    format!(
        r#"<rules><rule id="{}"><name><![CDATA[{name}]]></name>{template}<active>{active}</active></rule></rules>"#,
        escape_attr(rule_id),
    )
}

pub fn preset_body(location_id: &str, name: &str, location_type: &str, preset: &str) -> String {
    format!(
        r#"<locations><location id="{}"><name>{}</name><type>{}</type><preset>{}</preset></location></locations>"#,
        escape_attr(location_id),
        escape_text(name),
        escape_text(location_type),
        escape_text(preset),
    )
}

pub fn setpoint_body(temperature: f64) -> String {
    format!(
        "<thermostat_functionality><setpoint>{}</setpoint></thermostat_functionality>",
        format_setpoint(temperature)
    )
}

pub fn relay_body(on: bool) -> String {
    let state = if on { "on" } else { "off" };
    format!("<relay_functionality><state>{state}</state></relay_functionality>")
}

/// Activates a first-generation Anna preset rule.
pub fn legacy_preset_body(rule_id: &str) -> String {
    format!(
        r#"<rules><rule id="{}"><active>true</active></rule></rules>"#,
        escape_attr(rule_id)
    )
}

//! Joins the four gateway documents into one flat record per device.

use std::collections::{BTreeMap, HashSet};

use roxmltree::{Document, Node};
use tracing::{debug, info, trace};

use crate::document::ParsedSet;
use crate::protocol::{PRESET_RULE_NAME, PRESET_RULE_TAG, SCHEDULE_RULE_TAG};
use crate::query::{self, RuleInfo};
use crate::types::{DeviceClass, DeviceState, ScheduleSet, format_one_decimal, format_two_decimals};
use crate::{Error, Result};

/// Preset rule id -> location id.
///
/// Newer firmware tags the rule with a template; older firmware only names it.
/// Both are tried in that order.
pub fn resolve_preset_rules(doc: &Document<'_>) -> Result<BTreeMap<String, String>> {
    let by_tag = query::rules_by_template_tag(doc, PRESET_RULE_TAG);
    if !by_tag.is_empty() {
        trace!(count = by_tag.len(), "preset rules found by template tag");
        return Ok(by_tag);
    }

    info!(
        tag = PRESET_RULE_TAG,
        name = PRESET_RULE_NAME,
        "no preset rule carries the template tag, falling back to rule name"
    );
    let by_name = query::rules_by_name(doc, PRESET_RULE_NAME);
    if by_name.is_empty() {
        return Err(Error::RuleNotFound(format!(
            "no rule tagged {PRESET_RULE_TAG} or named {PRESET_RULE_NAME:?}"
        )));
    }
    Ok(by_name)
}

pub fn presets_for_location(
    doc: &Document<'_>,
    preset_rules: &BTreeMap<String, String>,
    location_id: &str,
) -> BTreeMap<String, f64> {
    preset_rules
        .iter()
        .filter(|(_, loc)| loc.as_str() == location_id)
        .flat_map(|(rule_id, _)| query::preset_dictionary(doc, rule_id))
        .collect()
}

/// Available, selected and most recently modified schedule among `rules`.
pub fn schedule_set(rules: Vec<RuleInfo>) -> ScheduleSet {
    let selected = rules.iter().find(|r| r.active).map(|r| r.name.clone());
    let last_used = rules
        .iter()
        .filter_map(|r| r.modified.map(|m| (m, &r.name)))
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, name)| name.clone());
    ScheduleSet {
        available: rules.into_iter().map(|r| r.name).collect(),
        selected,
        last_used,
    }
}

pub fn schedules_for_location(doc: &Document<'_>, location_id: &str) -> ScheduleSet {
    let rules = query::rules_by_template_tag(doc, SCHEDULE_RULE_TAG)
        .iter()
        .filter(|(_, loc)| loc.as_str() == location_id)
        .filter_map(|(rule_id, _)| query::rule_by_id(doc, rule_id))
        .filter_map(query::rule_info)
        .collect();
    schedule_set(rules)
}

fn battery(appliance: Node<'_, '_>) -> Option<String> {
    query::numeric_measurement(appliance, "battery").map(format_two_decimals)
}

fn base_state(appliance: Node<'_, '_>, class: DeviceClass) -> DeviceState {
    let appliance_id = query::entity_id(appliance).unwrap_or("").to_string();
    DeviceState {
        id: appliance_id.clone(),
        appliance_id,
        name: query::entity_name(appliance).unwrap_or("").to_string(),
        class,
        appliance_type: query::entity_type(appliance).unwrap_or("").to_string(),
        location_id: query::appliance_location_id(appliance).map(str::to_string),
        ..Default::default()
    }
}

fn thermostat_state(
    docs: &ParsedSet<'_>,
    appliance: Node<'_, '_>,
    location_id: &str,
    location_name: &str,
    preset_rules: &BTreeMap<String, String>,
) -> DeviceState {
    let domain = &docs.domain_objects;
    let summary = query::location_summary(domain, location_id).unwrap_or_default();
    let schedules = schedules_for_location(domain, location_id);
    let mut state = base_state(appliance, DeviceClass::Thermostat);

    state.id = location_id.to_string();
    state.location_id = Some(location_id.to_string());
    if !summary.name.is_empty() {
        state.name = summary.name;
    } else if !location_name.is_empty() {
        state.name = location_name.to_string();
    }
    state.active_preset = summary.preset;
    state.presets = presets_for_location(domain, preset_rules, location_id);
    state.current_temp = summary.temperature;
    state.setpoint_temp = summary.setpoint;
    state.available_schedules = schedules.available;
    state.selected_schedule = schedules.selected;
    state.last_used_schedule = schedules.last_used;
    state.illuminance = query::formatted_measurement(appliance, "illuminance");
    state.battery = battery(appliance);
    state
}

/// First-generation Anna: no locations, readings behind module point-log ids.
fn legacy_thermostat_state(docs: &ParsedSet<'_>, appliance: Node<'_, '_>) -> DeviceState {
    let direct = &docs.direct_objects;
    let schedules = schedule_set(query::legacy_schedules(direct));
    let mut state = base_state(appliance, DeviceClass::Thermostat);

    state.active_preset = query::legacy_active_preset(direct).map(str::to_string);
    state.presets = query::legacy_presets(direct);
    state.current_temp = query::legacy_measurement(direct, "temperature")
        .or_else(|| query::numeric_measurement(appliance, "temperature"));
    state.setpoint_temp = query::legacy_measurement(direct, "thermostat")
        .or_else(|| query::numeric_measurement(appliance, "thermostat"));
    state.available_schedules = schedules.available;
    state.selected_schedule = schedules.selected;
    state.last_used_schedule = schedules.last_used;
    state.illuminance = legacy_reading(docs, "illuminance")
        .or_else(|| query::formatted_measurement(appliance, "illuminance"));
    state.battery = battery(appliance);
    state
}

/// One-decimal reading from the module point logs in `direct_objects`.
fn legacy_reading(docs: &ParsedSet<'_>, log_type: &str) -> Option<String> {
    query::legacy_measurement(&docs.direct_objects, log_type).map(format_one_decimal)
}

fn heater_state(
    docs: &ParsedSet<'_>,
    appliance: Node<'_, '_>,
    outdoor: Option<String>,
    pressure: Option<String>,
) -> DeviceState {
    let mut state = base_state(appliance, DeviceClass::Heater);
    state.boiler_temp = query::formatted_measurement(appliance, "boiler_temperature")
        .or_else(|| legacy_reading(docs, "boiler_temperature"));
    state.boiler_state = query::status_flag(appliance, "boiler_state");
    state.central_heating_state = query::status_flag(appliance, "central_heating_state");
    state.cooling_state = query::status_flag(appliance, "cooling_state");
    state.domestic_hot_water_state = query::status_flag(appliance, "domestic_hot_water_state");
    state.water_pressure = pressure;
    state.outdoor_temp = outdoor;
    state
}

fn other_state(appliance: Node<'_, '_>, class: DeviceClass) -> DeviceState {
    let mut state = base_state(appliance, class);
    state.current_temp = query::numeric_measurement(appliance, "temperature");
    state.battery = battery(appliance);
    state.relay = query::relay_state(appliance);
    state.power = query::numeric_measurement(appliance, "electricity_consumed");
    state
}

/// Builds the device list for one update cycle.
///
/// Gateway appliances are left out. A location claimed by more than one
/// thermostatic appliance is reported once, for the first appliance seen.
pub fn build_devices(docs: &ParsedSet<'_>) -> Result<Vec<DeviceState>> {
    let outdoor = query::outdoor_temperature(&docs.locations)
        .or_else(|| legacy_reading(docs, "outdoor_temperature"));
    let pressure = query::water_pressure(&docs.appliances)
        .or_else(|| legacy_reading(docs, "central_heater_water_pressure"));

    let mut devices = Vec::new();
    let mut visited_locations: HashSet<String> = HashSet::new();
    let mut preset_rules: Option<BTreeMap<String, String>> = None;

    for appliance in query::appliances(&docs.appliances) {
        let Some(appliance_id) = query::entity_id(appliance) else {
            continue;
        };
        let name = query::entity_name(appliance).unwrap_or("");
        if name.contains("Gateway") {
            trace!(appliance = appliance_id, "skipping gateway appliance");
            continue;
        }

        let class = DeviceClass::from_appliance_type(query::entity_type(appliance).unwrap_or(""));
        match class {
            DeviceClass::Thermostat => {
                let mut locations = query::location_names_for_appliance(&docs.locations, appliance_id);
                if locations.is_empty()
                    && let Some(loc) = query::appliance_location_id(appliance)
                {
                    locations.push((loc.to_string(), String::new()));
                }

                if locations.is_empty() {
                    devices.push(legacy_thermostat_state(docs, appliance));
                    continue;
                }

                for (location_id, location_name) in locations {
                    if !visited_locations.insert(location_id.clone()) {
                        debug!(
                            location = %location_id,
                            appliance = appliance_id,
                            "location already listed, skipping"
                        );
                        continue;
                    }
                    let rules = match preset_rules {
                        Some(ref rules) => rules,
                        None => &*preset_rules.insert(resolve_preset_rules(&docs.domain_objects)?),
                    };
                    devices.push(thermostat_state(docs, appliance, &location_id, &location_name, rules));
                }
            }
            DeviceClass::Heater => devices.push(heater_state(docs, appliance, outdoor.clone(), pressure.clone())),
            other => devices.push(other_state(appliance, other)),
        }
    }

    debug!(count = devices.len(), "reconciled devices");
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentSet;

    const APPLIANCES: &str = r#"<appliances>
  <appliance id="gw"><name>Gateway</name><type>gateway</type></appliance>
  <appliance id="a1"><name>Anna</name><type>thermostat</type><location id="L1"/>
    <logs><point_log><type>illuminance</type><period><measurement>35.26</measurement></period></point_log></logs>
  </appliance>
  <appliance id="a2"><name>Lisa</name><type>zone_thermostat</type><location id="L1"/>
    <logs><point_log><type>battery</type><period><measurement>0.876</measurement></period></point_log></logs>
  </appliance>
  <appliance id="h1"><name>OpenTherm</name><type>heater_central</type>
    <logs>
      <point_log><type>boiler_temperature</type><period><measurement>48.449</measurement></period></point_log>
      <point_log><type>boiler_state</type><period><measurement>on</measurement></period></point_log>
      <point_log><type>central_heating_state</type><period><measurement>off</measurement></period></point_log>
      <point_log><type>central_heater_water_pressure</type><period><measurement>1.64</measurement></period></point_log>
    </logs>
  </appliance>
  <appliance id="p1"><name>Plug</name><type>plug</type>
    <logs><point_log><type>electricity_consumed</type><period><measurement>12.5</measurement></period></point_log></logs>
    <actuator_functionalities><relay_functionality id="rf1"><state>off</state></relay_functionality></actuator_functionalities>
  </appliance>
</appliances>"#;

    const LOCATIONS: &str = r#"<locations>
  <location id="L0"><name>Home</name><logs>
    <point_log><type>outdoor_temperature</type><period><measurement>7.451</measurement></period></point_log>
  </logs></location>
  <location id="L1"><name>Living</name><appliances><appliance id="a1"/><appliance id="a2"/></appliances></location>
</locations>"#;

    fn domain_with_rules(rules: &str) -> String {
        format!(
            r#"<domain_objects>
  <location id="L1">
    <name>Living</name>
    <type>room</type>
    <preset>away</preset>
    <logs>
      <point_log><type>temperature</type><period><measurement>19.5</measurement></period></point_log>
      <point_log><type>thermostat</type><period><measurement>20.0</measurement></period></point_log>
    </logs>
  </location>
  {rules}
</domain_objects>"#
        )
    }

    const PRESET_RULE_BY_TAG: &str = r#"<rule id="pr"><name>Presets</name>
    <template id="t0" tag="zone_setpoint_and_state_based_on_preset"/>
    <directives><when preset="away"><then setpoint="16"/></when><when preset="home"><then setpoint="20"/></when></directives>
    <contexts><context><zone><location id="L1"/></zone></context></contexts>
  </rule>"#;

    fn schedule_rule(id: &str, name: &str, active: bool, modified: &str) -> String {
        format!(
            r#"<rule id="{id}"><name>{name}</name>
    <template id="ts" tag="zone_preset_based_on_time_and_presence_with_override"/>
    <active>{active}</active><modified_date>{modified}</modified_date>
    <contexts><context><zone><location id="L1"/></zone></context></contexts>
  </rule>"#
        )
    }

    fn devices_for(domain: &str) -> Result<Vec<DeviceState>> {
        let set = DocumentSet::from_raw(APPLIANCES, LOCATIONS, domain, "<direct_objects/>");
        let parsed = set.parse()?;
        build_devices(&parsed)
    }

    #[test]
    fn thermostat_record_merges_location_data() {
        let devices = devices_for(&domain_with_rules(PRESET_RULE_BY_TAG)).unwrap();
        let living = devices.iter().find(|d| d.id == "L1").unwrap();
        assert_eq!(living.class, DeviceClass::Thermostat);
        assert_eq!(living.name, "Living");
        assert_eq!(living.active_preset.as_deref(), Some("away"));
        assert_eq!(living.current_temp, Some(19.5));
        assert_eq!(living.setpoint_temp, Some(20.0));
        assert_eq!(living.presets.get("away"), Some(&16.0));
        assert_eq!(living.presets.get("home"), Some(&20.0));
        assert_eq!(living.illuminance.as_deref(), Some("35.3"));
    }

    #[test]
    fn gateway_excluded_and_shared_location_listed_once() {
        let devices = devices_for(&domain_with_rules(PRESET_RULE_BY_TAG)).unwrap();
        assert!(devices.iter().all(|d| d.appliance_id != "gw"));
        assert_eq!(devices.iter().filter(|d| d.location_id.as_deref() == Some("L1")).count(), 1);
        // thermostat L1, heater, plug
        assert_eq!(devices.len(), 3);
        let living = devices.iter().find(|d| d.id == "L1").unwrap();
        assert_eq!(living.appliance_id, "a1");
    }

    #[test]
    fn heater_record() {
        let devices = devices_for(&domain_with_rules(PRESET_RULE_BY_TAG)).unwrap();
        let heater = devices.iter().find(|d| d.class == DeviceClass::Heater).unwrap();
        assert_eq!(heater.id, "h1");
        assert_eq!(heater.boiler_temp.as_deref(), Some("48.4"));
        assert_eq!(heater.boiler_state, Some(true));
        assert_eq!(heater.central_heating_state, Some(false));
        assert_eq!(heater.cooling_state, None);
        assert_eq!(heater.domestic_hot_water_state, None);
        assert_eq!(heater.water_pressure.as_deref(), Some("1.6"));
        assert_eq!(heater.outdoor_temp.as_deref(), Some("7.5"));
    }

    #[test]
    fn plug_record() {
        let devices = devices_for(&domain_with_rules(PRESET_RULE_BY_TAG)).unwrap();
        let plug = devices.iter().find(|d| d.id == "p1").unwrap();
        assert_eq!(plug.class, DeviceClass::Plug);
        assert_eq!(plug.relay, Some(false));
        assert_eq!(plug.power, Some(12.5));
    }

    #[test]
    fn preset_rules_fall_back_to_name() {
        let by_name = r#"<rule id="pn"><name>Thermostat presets</name>
    <template id="t9"/>
    <directives><when preset="vacation"><then setpoint="12.5"/></when></directives>
    <contexts><context><zone><location id="L1"/></zone></context></contexts>
  </rule>"#;
        let domain = domain_with_rules(by_name);
        let doc = Document::parse(&domain).unwrap();
        let rules = resolve_preset_rules(&doc).unwrap();
        assert_eq!(rules.get("pn").map(String::as_str), Some("L1"));
        assert_eq!(presets_for_location(&doc, &rules, "L1").get("vacation"), Some(&12.5));
    }

    #[test]
    fn tagged_preset_rule_wins_over_named_rule() {
        let both = format!(
            r#"{PRESET_RULE_BY_TAG}
  <rule id="pn"><name>Thermostat presets</name>
    <directives><when preset="vacation"><then setpoint="12.5"/></when></directives>
    <contexts><context><zone><location id="L1"/></zone></context></contexts>
  </rule>"#
        );
        let domain = domain_with_rules(&both);
        let doc = Document::parse(&domain).unwrap();
        let rules = resolve_preset_rules(&doc).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules.contains_key("pr"));
        let presets = presets_for_location(&doc, &rules, "L1");
        assert_eq!(presets.get("away"), Some(&16.0));
        assert!(!presets.contains_key("vacation"));
    }

    #[test]
    fn missing_preset_rules_is_rule_not_found() {
        let err = devices_for(&domain_with_rules("")).unwrap_err();
        assert!(matches!(err, Error::RuleNotFound(_)), "got {err:?}");
    }

    #[test]
    fn last_used_schedule_is_most_recently_modified() {
        let rules = [
            schedule_rule("s1", "Weekdays", false, "2019-01-01T08:00:00.000+01:00"),
            schedule_rule("s2", "Weekend", true, "2019-06-01T08:00:00.000+02:00"),
            schedule_rule("s3", "Holiday", false, "2019-09-26T12:00:00.123+02:00"),
        ]
        .concat();
        let domain = domain_with_rules(&rules);
        let doc = Document::parse(&domain).unwrap();
        let schedules = schedules_for_location(&doc, "L1");
        assert_eq!(schedules.available.len(), 3);
        assert_eq!(schedules.selected.as_deref(), Some("Weekend"));
        assert_eq!(schedules.last_used.as_deref(), Some("Holiday"));
        assert!(schedules_for_location(&doc, "L2").available.is_empty());
    }

    #[test]
    fn legacy_thermostat_without_location() {
        let appliances = r#"<appliances><appliance id="a1"><name>Anna</name><type>thermostat</type></appliance></appliances>"#;
        let direct = r#"<direct_objects>
          <module id="m1"><services>
            <thermo_meter log_type="temperature"><functionalities><point_log id="pl1"/></functionalities></thermo_meter>
            <thermostat log_type="thermostat"><functionalities><point_log id="pl2"/></functionalities></thermostat>
          </services></module>
          <appliance id="a1"><logs>
            <point_log id="pl1"><period><measurement>20.75</measurement></period></point_log>
            <point_log id="pl2"><period><measurement>21.0</measurement></period></point_log>
          </logs></appliance>
          <rule id="r1"><name>Thermostat presets</name><active>true</active>
            <directives><when><then icon="home" temperature="21.0"/></when></directives>
          </rule>
        </direct_objects>"#;
        let set = DocumentSet::from_raw(appliances, "<locations/>", "<domain_objects/>", direct);
        let devices = build_devices(&set.parse().unwrap()).unwrap();
        assert_eq!(devices.len(), 1);
        let anna = &devices[0];
        assert_eq!(anna.id, "a1");
        assert_eq!(anna.current_temp, Some(20.75));
        assert_eq!(anna.setpoint_temp, Some(21.0));
        assert_eq!(anna.active_preset.as_deref(), Some("home"));
        assert_eq!(anna.presets.get("home"), Some(&21.0));
        assert!(anna.available_schedules.is_empty());
    }

    #[test]
    fn legacy_gateway_readings_from_direct_objects() {
        let appliances = r#"<appliances>
          <appliance id="h1"><name>OpenTherm</name><type>heater_central</type></appliance>
        </appliances>"#;
        let direct = r#"<direct_objects>
          <module id="m1"><services>
            <temperature log_type="outdoor_temperature"><functionalities><point_log id="pl1"/></functionalities></temperature>
            <temperature log_type="boiler_temperature"><functionalities><point_log id="pl2"/></functionalities></temperature>
            <pressure log_type="central_heater_water_pressure"><functionalities><point_log id="pl3"/></functionalities></pressure>
          </services></module>
          <appliance id="h1"><logs>
            <point_log id="pl1"><period><measurement>7.46</measurement></period></point_log>
            <point_log id="pl2"><period><measurement>48.44</measurement></period></point_log>
            <point_log id="pl3"><period><measurement>1.64</measurement></period></point_log>
          </logs></appliance>
        </direct_objects>"#;
        let set = DocumentSet::from_raw(appliances, "<locations/>", "<domain_objects/>", direct);
        let parsed = set.parse().unwrap();
        let devices = build_devices(&parsed).unwrap();
        assert_eq!(devices.len(), 1);
        let heater = &devices[0];
        assert_eq!(heater.outdoor_temp.as_deref(), Some("7.5"));
        assert_eq!(heater.boiler_temp.as_deref(), Some("48.4"));
        assert_eq!(heater.water_pressure.as_deref(), Some("1.6"));
        assert_eq!(heater.boiler_state, None);
    }
}

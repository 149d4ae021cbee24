use std::collections::BTreeMap;

use serde::Serialize;

/// Display format for temperatures, pressures and illuminance: one decimal, halves rounded away from zero.
pub fn format_one_decimal(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    format!("{rounded:.1}")
}

/// Display format for battery levels: two decimals.
pub fn format_two_decimals(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded:.2}")
}

/// How the client holds gateway documents between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentMode {
    /// Every reading call fetches all documents again.
    #[default]
    PerCall,
    /// Documents are fetched once and kept until `refresh()` is called.
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Thermostat,
    Heater,
    Plug,
    #[default]
    Other,
}

impl DeviceClass {
    pub fn from_appliance_type(s: &str) -> Self {
        match s {
            "zone_thermostat" | "thermostatic_radiator_valve" | "thermostat" => DeviceClass::Thermostat,
            "heater_central" => DeviceClass::Heater,
            "plug" => DeviceClass::Plug,
            _ => DeviceClass::Other,
        }
    }
}

/// Schedules attached to one location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSet {
    pub available: Vec<String>,
    pub selected: Option<String>,
    pub last_used: Option<String>,
}

/// Flattened state of one device as reported by the gateway.
///
/// Thermostats are keyed by their location (`id` is the location id), every
/// other device by its appliance id. Fields the gateway did not report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    pub id: String,
    pub appliance_id: String,
    pub name: String,
    pub class: DeviceClass,
    pub appliance_type: String,
    pub location_id: Option<String>,

    pub active_preset: Option<String>,
    pub presets: BTreeMap<String, f64>,
    pub current_temp: Option<f64>,
    pub setpoint_temp: Option<f64>,
    pub available_schedules: Vec<String>,
    pub selected_schedule: Option<String>,
    pub last_used_schedule: Option<String>,
    pub illuminance: Option<String>,
    pub battery: Option<String>,

    pub boiler_temp: Option<String>,
    pub boiler_state: Option<bool>,
    pub central_heating_state: Option<bool>,
    pub cooling_state: Option<bool>,
    pub domestic_hot_water_state: Option<bool>,
    pub water_pressure: Option<String>,
    pub outdoor_temp: Option<String>,

    pub relay: Option<bool>,
    pub power: Option<f64>,
}

/// Heater flags that produce a `HeaterStateChanged` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterFlag {
    Boiler,
    CentralHeating,
    Cooling,
    DomesticHotWater,
}

/// Events emitted by the diff engine when state changes between refreshes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DeviceAdded { device_id: String, name: String },
    DeviceRemoved { device_id: String },

    PresetChanged { device_id: String, name: String, preset: Option<String> },
    SetpointChanged { device_id: String, name: String, setpoint: Option<f64> },
    TemperatureChanged { device_id: String, name: String, temp: Option<f64> },
    ScheduleChanged { device_id: String, name: String, schedule: Option<String> },
    HeaterStateChanged { device_id: String, flag: HeaterFlag, on: Option<bool> },
    RelayChanged { device_id: String, name: String, on: Option<bool> },

    DeviceFieldChanged { device_id: String, path: String, value: serde_json::Value },
}

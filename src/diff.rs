use serde_json::Value;

use crate::types::*;

pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(serde_json::Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    let path = if path_prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{path_prefix}.{key}")
                    };
                    changes.push((path, prev_val.clone(), Value::Null));
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn heater_flag(path: &str) -> Option<HeaterFlag> {
    match path {
        "boiler_state" => Some(HeaterFlag::Boiler),
        "central_heating_state" => Some(HeaterFlag::CentralHeating),
        "cooling_state" => Some(HeaterFlag::Cooling),
        "domestic_hot_water_state" => Some(HeaterFlag::DomesticHotWater),
        _ => None,
    }
}

pub(crate) fn map_typed_event(device: &DeviceState, path: &str) -> Option<Event> {
    let device_id = device.id.clone();
    let name = device.name.clone();
    match path {
        "active_preset" => Some(Event::PresetChanged {
            device_id,
            name,
            preset: device.active_preset.clone(),
        }),
        "setpoint_temp" => Some(Event::SetpointChanged {
            device_id,
            name,
            setpoint: device.setpoint_temp,
        }),
        "current_temp" => Some(Event::TemperatureChanged {
            device_id,
            name,
            temp: device.current_temp,
        }),
        "selected_schedule" => Some(Event::ScheduleChanged {
            device_id,
            name,
            schedule: device.selected_schedule.clone(),
        }),
        "relay" => Some(Event::RelayChanged {
            device_id,
            name,
            on: device.relay,
        }),
        _ => {
            let flag = heater_flag(path)?;
            let on = match flag {
                HeaterFlag::Boiler => device.boiler_state,
                HeaterFlag::CentralHeating => device.central_heating_state,
                HeaterFlag::Cooling => device.cooling_state,
                HeaterFlag::DomesticHotWater => device.domestic_hot_water_state,
            };
            Some(Event::HeaterStateChanged { device_id, flag, on })
        }
    }
}

pub(crate) fn generic_event(device_id: &str, path: &str, value: &Value) -> Event {
    Event::DeviceFieldChanged {
        device_id: device_id.to_string(),
        path: path.to_string(),
        value: value.clone(),
    }
}

pub(crate) fn to_json(device: &DeviceState) -> Value {
    serde_json::to_value(device).unwrap_or(Value::Null)
}

/// Events describing how `current` differs from `previous`, matched by device id.
pub(crate) fn device_events(previous: &[DeviceState], current: &[DeviceState]) -> Vec<Event> {
    let mut events = Vec::new();

    for device in current {
        let Some(prev) = previous.iter().find(|p| p.id == device.id) else {
            events.push(Event::DeviceAdded {
                device_id: device.id.clone(),
                name: device.name.clone(),
            });
            continue;
        };

        let mut changes = Vec::new();
        diff_json(&to_json(prev), &to_json(device), "", &mut changes);
        for (path, _old, new_val) in &changes {
            let event = map_typed_event(device, path)
                .unwrap_or_else(|| generic_event(&device.id, path, new_val));
            events.push(event);
        }
    }

    for prev in previous {
        if !current.iter().any(|d| d.id == prev.id) {
            events.push(Event::DeviceRemoved {
                device_id: prev.id.clone(),
            });
        }
    }

    events
}

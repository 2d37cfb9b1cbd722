//! Turns raw BACnet property values into the string and JSON renderings the
//! staging store expects. Every function is total: malformed input produces a
//! logged warning and `None`, never an error.

use log::warn;
use serde_json::json;

use super::RawValue;

const STATUS_FLAG_NAMES: [&str; 4] = ["in-alarm", "fault", "overridden", "out-of-service"];

fn bit_of(value: &RawValue) -> Option<bool> {
    match value {
        RawValue::Bool(v) => Some(*v),
        RawValue::Unsigned(v) => Some(*v != 0),
        RawValue::Signed(v) => Some(*v != 0),
        RawValue::Enumerated(v) => Some(*v != 0),
        _ => None,
    }
}

fn bits_of(raw: &RawValue, expected: usize) -> Option<Vec<bool>> {
    match raw {
        RawValue::Bits(bits) if bits.len() >= expected => Some(bits[..expected].to_vec()),
        RawValue::Array(values) if values.len() >= expected => values[..expected]
            .iter()
            .map(bit_of)
            .collect::<Option<Vec<bool>>>(),
        _ => None,
    }
}

/// Semicolon-joined names of the active flags, or `None` when no flag is set.
/// Accepts the 4-slot bit array form or the library's rendered string.
pub fn status_flags(raw: Option<&RawValue>) -> Option<String> {
    let raw = raw?;
    match raw {
        RawValue::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                // Already rendered by the protocol library; pass it through.
                Some(text.to_string())
            }
        }
        RawValue::Bits(_) | RawValue::Array(_) => {
            let bits = match bits_of(raw, 4) {
                Some(bits) => bits,
                None => {
                    warn!("Invalid statusFlags shape: {raw}");
                    return None;
                }
            };
            let active: Vec<&str> = STATUS_FLAG_NAMES
                .iter()
                .zip(bits)
                .filter_map(|(name, set)| set.then_some(*name))
                .collect();
            if active.is_empty() {
                None
            } else {
                Some(active.join(";"))
            }
        }
        other => {
            warn!("Invalid statusFlags shape: {other}");
            None
        }
    }
}

/// Reliability is passed through verbatim; empty strings become `None`.
pub fn reliability(raw: Option<&RawValue>) -> Option<String> {
    text_passthrough(raw, "reliability")
}

/// Event state is passed through verbatim; empty strings become `None`.
pub fn event_state(raw: Option<&RawValue>) -> Option<String> {
    text_passthrough(raw, "eventState")
}

fn text_passthrough(raw: Option<&RawValue>, field: &str) -> Option<String> {
    match raw? {
        RawValue::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }
        RawValue::Null => None,
        other => {
            warn!("Invalid {field} value: {other}");
            None
        }
    }
}

/// Passes through only strictly boolean values.
pub fn out_of_service(raw: Option<&RawValue>) -> Option<bool> {
    match raw? {
        RawValue::Bool(v) => Some(*v),
        RawValue::Null => None,
        other => {
            warn!("Invalid out-of-service value: {other}");
            None
        }
    }
}

/// 16-slot JSON array of reals or nulls.
pub fn priority_array(raw: Option<&RawValue>) -> Option<String> {
    match raw? {
        RawValue::Array(values) if values.len() == 16 => {
            let slots: Vec<serde_json::Value> = values
                .iter()
                .map(|value| match value {
                    RawValue::Null => serde_json::Value::Null,
                    other => other
                        .as_f64()
                        .map(|v| json!(v))
                        .unwrap_or(serde_json::Value::Null),
                })
                .collect();
            serde_json::to_string(&slots).ok()
        }
        RawValue::Null => None,
        other => {
            warn!("Invalid priorityArray shape: {other}");
            None
        }
    }
}

/// 2-bit string rendered as `{"lowLimitEnable": …, "highLimitEnable": …}`.
pub fn limit_enable(raw: Option<&RawValue>) -> Option<String> {
    let bits = match raw? {
        RawValue::Null => return None,
        other => match bits_of(other, 2) {
            Some(bits) => bits,
            None => {
                warn!("Invalid limitEnable shape: {other}");
                return None;
            }
        },
    };
    serde_json::to_string(&json!({
        "lowLimitEnable": bits[0],
        "highLimitEnable": bits[1],
    }))
    .ok()
}

/// 3-bit transition string (eventEnable, ackedTransitions) rendered as
/// `{"toOffnormal": …, "toFault": …, "toNormal": …}`.
pub fn event_transition_bits(raw: Option<&RawValue>, field: &str) -> Option<String> {
    let bits = match raw? {
        RawValue::Null => return None,
        other => match bits_of(other, 3) {
            Some(bits) => bits,
            None => {
                warn!("Invalid {field} shape: {other}");
                return None;
            }
        },
    };
    serde_json::to_string(&json!({
        "toOffnormal": bits[0],
        "toFault": bits[1],
        "toNormal": bits[2],
    }))
    .ok()
}

/// 3-slot JSON array of ISO-8601 strings or nulls.
pub fn event_timestamps(raw: Option<&RawValue>) -> Option<String> {
    match raw? {
        RawValue::Array(values) if values.len() == 3 => {
            let slots: Vec<serde_json::Value> = values
                .iter()
                .map(|value| match value {
                    RawValue::Null => serde_json::Value::Null,
                    RawValue::Text(text) if !text.is_empty() => json!(text),
                    _ => serde_json::Value::Null,
                })
                .collect();
            serde_json::to_string(&slots).ok()
        }
        RawValue::Null => None,
        other => {
            warn!("Invalid eventTimeStamps shape: {other}");
            None
        }
    }
}

/// 3-slot JSON array of strings; missing entries become empty strings.
pub fn event_message_texts(raw: Option<&RawValue>, field: &str) -> Option<String> {
    match raw? {
        RawValue::Array(values) if values.len() == 3 => {
            let slots: Vec<String> = values
                .iter()
                .map(|value| match value {
                    RawValue::Text(text) => text.clone(),
                    _ => String::new(),
                })
                .collect();
            serde_json::to_string(&slots).ok()
        }
        RawValue::Null => None,
        other => {
            warn!("Invalid {field} shape: {other}");
            None
        }
    }
}

/// Object-property reference rendered as JSON with `objectIdentifier`,
/// `propertyIdentifier` and an optional `arrayIndex`.
pub fn object_property_reference(raw: Option<&RawValue>) -> Option<String> {
    match raw? {
        RawValue::Array(values) if values.len() >= 2 => {
            let object_identifier = match values.first() {
                Some(RawValue::ObjectId(object_type, instance)) => {
                    json!(format!("{object_type}:{instance}"))
                }
                Some(RawValue::Text(text)) => json!(text),
                _ => {
                    warn!("Invalid objectPropertyReference object identifier");
                    return None;
                }
            };
            let property_identifier = values.get(1).and_then(RawValue::as_i64);
            let array_index = values.get(2).and_then(RawValue::as_i64);

            let mut reference = json!({
                "objectIdentifier": object_identifier,
                "propertyIdentifier": property_identifier,
            });
            if let Some(index) = array_index {
                reference["arrayIndex"] = json!(index);
            }
            serde_json::to_string(&reference).ok()
        }
        RawValue::Null => None,
        other => {
            warn!("Invalid objectPropertyReference shape: {other}");
            None
        }
    }
}

/// Scalar coercions for the plain optional properties. Anything that does not
/// coerce cleanly becomes `None`.
pub fn scalar_f64(raw: Option<&RawValue>) -> Option<f64> {
    let raw = raw?;
    let value = raw.as_f64();
    if value.is_none() && !matches!(raw, RawValue::Null) {
        warn!("Expected numeric property, got {raw}");
    }
    value
}

pub fn scalar_i64(raw: Option<&RawValue>) -> Option<i64> {
    let raw = raw?;
    let value = raw.as_i64();
    if value.is_none() && !matches!(raw, RawValue::Null) {
        warn!("Expected integer property, got {raw}");
    }
    value
}

pub fn scalar_bool(raw: Option<&RawValue>) -> Option<bool> {
    let raw = raw?;
    match raw {
        RawValue::Bool(v) => Some(*v),
        RawValue::Enumerated(v) => Some(*v != 0),
        RawValue::Null => None,
        other => {
            warn!("Expected boolean property, got {other}");
            None
        }
    }
}

pub fn scalar_string(raw: Option<&RawValue>) -> Option<String> {
    let raw = raw?;
    match raw {
        RawValue::Null => None,
        RawValue::Text(text) if text.is_empty() => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_of_bits(bits: &[u8]) -> RawValue {
        RawValue::Array(bits.iter().map(|b| RawValue::Unsigned(u64::from(*b))).collect())
    }

    #[test]
    fn status_flags_from_bit_array() {
        let raw = array_of_bits(&[0, 1, 0, 1]);
        assert_eq!(
            status_flags(Some(&raw)).as_deref(),
            Some("fault;out-of-service")
        );
    }

    #[test]
    fn status_flags_all_clear_is_none() {
        let raw = array_of_bits(&[0, 0, 0, 0]);
        assert_eq!(status_flags(Some(&raw)), None);
    }

    #[test]
    fn status_flags_rendered_string_passes_through() {
        let raw = RawValue::Text("overridden".to_string());
        assert_eq!(status_flags(Some(&raw)).as_deref(), Some("overridden"));

        let raw = RawValue::Text("fault;overridden".to_string());
        assert_eq!(status_flags(Some(&raw)).as_deref(), Some("fault;overridden"));
    }

    #[test]
    fn status_flags_missing_is_none() {
        assert_eq!(status_flags(None), None);
        assert_eq!(status_flags(Some(&RawValue::Real(1.0))), None);
        assert_eq!(status_flags(Some(&array_of_bits(&[1, 0]))), None);
    }

    #[test]
    fn out_of_service_is_strictly_boolean() {
        assert_eq!(out_of_service(Some(&RawValue::Bool(true))), Some(true));
        assert_eq!(out_of_service(Some(&RawValue::Unsigned(1))), None);
        assert_eq!(out_of_service(None), None);
    }

    #[test]
    fn reliability_trims_and_nulls_empties() {
        assert_eq!(
            reliability(Some(&RawValue::Text(" no-fault-detected ".into()))).as_deref(),
            Some("no-fault-detected")
        );
        assert_eq!(reliability(Some(&RawValue::Text("  ".into()))), None);
        assert_eq!(reliability(None), None);
    }

    #[test]
    fn priority_array_sixteen_slots() {
        let mut slots = vec![RawValue::Null; 16];
        slots[2] = RawValue::Real(22.5);
        slots[15] = RawValue::Real(20.0);
        let rendered = priority_array(Some(&RawValue::Array(slots))).unwrap();
        let parsed: Vec<Option<f64>> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.len(), 16);
        assert_eq!(parsed[2], Some(22.5));
        assert_eq!(parsed[15], Some(20.0));
        assert_eq!(parsed[0], None);
    }

    #[test]
    fn priority_array_wrong_arity_is_none() {
        let slots = vec![RawValue::Null; 4];
        assert_eq!(priority_array(Some(&RawValue::Array(slots))), None);
    }

    #[test]
    fn limit_enable_bits() {
        let rendered = limit_enable(Some(&RawValue::Bits(vec![true, false]))).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["lowLimitEnable"], true);
        assert_eq!(parsed["highLimitEnable"], false);
    }

    #[test]
    fn event_transition_bits_render_named_fields() {
        let rendered =
            event_transition_bits(Some(&RawValue::Bits(vec![true, true, false])), "eventEnable")
                .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["toOffnormal"], true);
        assert_eq!(parsed["toFault"], true);
        assert_eq!(parsed["toNormal"], false);
    }

    #[test]
    fn event_timestamps_three_slots() {
        let raw = RawValue::Array(vec![
            RawValue::Text("2025-03-01T10:00:00Z".into()),
            RawValue::Null,
            RawValue::Null,
        ]);
        let rendered = event_timestamps(Some(&raw)).unwrap();
        let parsed: Vec<Option<String>> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed[0].as_deref(), Some("2025-03-01T10:00:00Z"));
        assert_eq!(parsed[1], None);
    }

    #[test]
    fn event_message_texts_fill_missing_with_empty() {
        let raw = RawValue::Array(vec![
            RawValue::Text("high alarm".into()),
            RawValue::Null,
            RawValue::Null,
        ]);
        let rendered = event_message_texts(Some(&raw), "eventMessageTexts").unwrap();
        let parsed: Vec<String> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, vec!["high alarm", "", ""]);
    }

    #[test]
    fn object_property_reference_rendering() {
        let raw = RawValue::Array(vec![
            RawValue::ObjectId(0, 3),
            RawValue::Unsigned(85),
            RawValue::Unsigned(2),
        ]);
        let rendered = object_property_reference(Some(&raw)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["objectIdentifier"], "0:3");
        assert_eq!(parsed["propertyIdentifier"], 85);
        assert_eq!(parsed["arrayIndex"], 2);
    }

    #[test]
    fn scalar_coercions_are_total() {
        assert_eq!(scalar_f64(Some(&RawValue::Unsigned(5))), Some(5.0));
        assert_eq!(scalar_f64(Some(&RawValue::Text("x".into()))), None);
        assert_eq!(scalar_i64(Some(&RawValue::Real(4.0))), Some(4));
        assert_eq!(scalar_i64(Some(&RawValue::Real(4.5))), None);
        assert_eq!(scalar_bool(Some(&RawValue::Enumerated(1))), Some(true));
        assert_eq!(scalar_bool(Some(&RawValue::Text("yes".into()))), None);
        assert_eq!(
            scalar_string(Some(&RawValue::Text("degreesCelsius".into()))).as_deref(),
            Some("degreesCelsius")
        );
        assert_eq!(scalar_string(Some(&RawValue::Null)), None);
    }
}

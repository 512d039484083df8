use opentelemetry::{Array, Key, Value};
use serde_json::{Map, Number};

fn f64_to_json(f: f64) -> serde_json::Value {
    // NaN and infinities have no JSON representation.
    Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

pub(crate) fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::I64(i) => serde_json::Value::Number(Number::from(*i)),
        Value::F64(f) => f64_to_json(*f),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Array(array) => match array {
            Array::Bool(v) => {
                serde_json::Value::Array(v.iter().map(|b| serde_json::Value::Bool(*b)).collect())
            }
            Array::I64(v) => serde_json::Value::Array(
                v.iter()
                    .map(|i| serde_json::Value::Number(Number::from(*i)))
                    .collect(),
            ),
            Array::F64(v) => serde_json::Value::Array(v.iter().map(|f| f64_to_json(*f)).collect()),
            Array::String(v) => serde_json::Value::Array(
                v.iter()
                    .map(|s| serde_json::Value::String(s.to_string()))
                    .collect(),
            ),
        },
    }
}

/// Collect span or event attributes into a JSON object, keyed by attribute name.
pub(crate) fn attributes_to_json<'a, C>(attribs: C) -> serde_json::Value
where
    C: Iterator<Item = (&'a Key, &'a Value)>,
{
    let mut payload = Map::new();

    for (key, value) in attribs {
        payload.insert(key.as_str().to_owned(), value_to_json(value));
    }

    serde_json::Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::KeyValue;

    #[test]
    fn attributes_become_object_fields() {
        let attributes = vec![
            KeyValue::new("window.index", 4_i64),
            KeyValue::new("errors", false),
            KeyValue::new("window.failed_job.ids", "17, 34"),
            KeyValue::new("ratio", f64::NAN),
        ];

        let json = attributes_to_json(attributes.iter().map(|kv| (&kv.key, &kv.value)));

        assert_eq!(json["window.index"], serde_json::json!(4));
        assert_eq!(json["errors"], serde_json::json!(false));
        assert_eq!(json["window.failed_job.ids"], serde_json::json!("17, 34"));
        assert_eq!(json["ratio"], serde_json::Value::Null);
    }

    #[test]
    fn arrays_keep_their_element_type() {
        let value = Value::Array(Array::I64(vec![1, 2, 3]));
        assert_eq!(value_to_json(&value), serde_json::json!([1, 2, 3]));
    }
}

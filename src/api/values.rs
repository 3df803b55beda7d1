//! Conversion between [`FieldValue`] and the Firestore REST value encoding.

use crate::api::query::{Direction, Document, FieldValue, Fields, Filter, Query};
use crate::error::{ChatError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

pub fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Bool(b) => json!({ "booleanValue": b }),
        // int64 travels as a decimal string
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::Double(d) => json!({ "doubleValue": d }),
        FieldValue::Timestamp(ts) => {
            json!({ "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Micros, true) })
        }
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Array(values) => {
            json!({ "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        FieldValue::Map(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

pub fn encode_fields(fields: &Fields) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect();
    Value::Object(map)
}

pub fn decode_value(value: &Value) -> Option<FieldValue> {
    let obj = value.as_object()?;
    let (kind, inner) = obj.iter().next()?;
    match kind.as_str() {
        "nullValue" => Some(FieldValue::Null),
        "booleanValue" => inner.as_bool().map(FieldValue::Bool),
        "integerValue" => match inner {
            Value::String(s) => s.parse().ok().map(FieldValue::Integer),
            other => other.as_i64().map(FieldValue::Integer),
        },
        "doubleValue" => inner.as_f64().map(FieldValue::Double),
        "timestampValue" => inner
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| FieldValue::Timestamp(ts.with_timezone(&Utc))),
        "stringValue" | "referenceValue" => inner.as_str().map(FieldValue::from),
        "arrayValue" => {
            // An empty array comes back without a `values` key.
            let values = match inner.get("values").and_then(Value::as_array) {
                Some(values) => values.iter().filter_map(decode_value).collect(),
                None => Vec::new(),
            };
            Some(FieldValue::Array(values))
        }
        "mapValue" => Some(FieldValue::Map(
            inner.get("fields").map(decode_fields).unwrap_or_default(),
        )),
        _ => None,
    }
}

pub fn decode_fields(fields: &Value) -> Fields {
    fields
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| decode_value(v).map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes a REST document; its id is the last segment of `name`.
pub fn decode_document(doc: &Value) -> Result<Document> {
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ChatError::decode("?", "document has no name"))?;
    let id = name.rsplit('/').next().unwrap_or(name);
    let fields = doc.get("fields").map(decode_fields).unwrap_or_default();
    Ok(Document::new(id, fields))
}

fn encode_filter(filter: &Filter) -> Value {
    let (op, value) = match filter {
        Filter::Equal(_, v) => ("EQUAL", v),
        Filter::GreaterOrEqual(_, v) => ("GREATER_THAN_OR_EQUAL", v),
        Filter::LessThan(_, v) => ("LESS_THAN", v),
        Filter::ArrayContains(_, v) => ("ARRAY_CONTAINS", v),
    };
    json!({
        "fieldFilter": {
            "field": { "fieldPath": filter.field() },
            "op": op,
            "value": encode_value(value),
        }
    })
}

/// Builds the `structuredQuery` body for `collection_id` (the last path segment).
pub fn encode_structured_query(query: &Query, collection_id: &str) -> Value {
    let mut structured = Map::new();
    structured.insert("from".into(), json!([{ "collectionId": collection_id }]));
    match query.filters.as_slice() {
        [] => {}
        [single] => {
            structured.insert("where".into(), encode_filter(single));
        }
        many => {
            structured.insert(
                "where".into(),
                json!({
                    "compositeFilter": {
                        "op": "AND",
                        "filters": many.iter().map(encode_filter).collect::<Vec<_>>(),
                    }
                }),
            );
        }
    }
    if !query.order_by.is_empty() {
        let order: Vec<Value> = query
            .order_by
            .iter()
            .map(|(field, direction)| {
                let direction = match direction {
                    Direction::Ascending => "ASCENDING",
                    Direction::Descending => "DESCENDING",
                };
                json!({ "field": { "fieldPath": field }, "direction": direction })
            })
            .collect();
        structured.insert("orderBy".into(), Value::Array(order));
    }
    if let Some(limit) = query.limit {
        structured.insert("limit".into(), json!(limit));
    }
    json!({ "structuredQuery": Value::Object(structured) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decodes_rest_document() {
        let raw = json!({
            "name": "projects/p/databases/(default)/documents/chats/abc",
            "fields": {
                "participants": { "arrayValue": { "values": [
                    { "stringValue": "u1" }, { "stringValue": "u2" }
                ]}},
                "lastMessage": { "stringValue": "hey" },
                "count": { "integerValue": "42" },
                "lastMessageAt": { "timestampValue": "2024-05-01T10:00:00.123456Z" },
                "tags": { "arrayValue": {} }
            },
            "createTime": "2024-05-01T10:00:00Z"
        });
        let doc = decode_document(&raw).unwrap();
        assert_eq!(doc.id, "abc");
        assert_eq!(doc.get_str("lastMessage"), Some("hey"));
        assert_eq!(doc.get("count"), Some(&FieldValue::Integer(42)));
        assert_eq!(doc.get("tags"), Some(&FieldValue::Array(vec![])));
        assert_eq!(
            doc.get("participants").and_then(FieldValue::as_array).map(<[_]>::len),
            Some(2)
        );
        assert!(doc.get("lastMessageAt").and_then(FieldValue::as_timestamp).is_some());
    }

    #[test]
    fn timestamp_survives_encoding() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let encoded = encode_value(&FieldValue::Timestamp(ts));
        assert_eq!(encoded["timestampValue"], "2024-05-01T10:00:00.000000Z");
        assert_eq!(decode_value(&encoded), Some(FieldValue::Timestamp(ts)));
    }

    #[test]
    fn prefix_query_becomes_composite_filter() {
        let q = Query::collection("users")
            .where_gte("username", "al")
            .where_lt("username", "al\u{f8ff}")
            .limit(50);
        let body = encode_structured_query(&q, "users");
        let sq = &body["structuredQuery"];
        assert_eq!(sq["from"][0]["collectionId"], "users");
        assert_eq!(sq["where"]["compositeFilter"]["op"], "AND");
        let filters = sq["where"]["compositeFilter"]["filters"].as_array().unwrap();
        assert_eq!(filters[0]["fieldFilter"]["op"], "GREATER_THAN_OR_EQUAL");
        assert_eq!(filters[1]["fieldFilter"]["value"]["stringValue"], "al\u{f8ff}");
        assert_eq!(sq["limit"], 50);
    }

    #[test]
    fn single_filter_and_order_are_flat() {
        let q = Query::collection("chats/c1/messages")
            .where_array_contains("participants", "u1")
            .order_by("timestamp", Direction::Ascending);
        let body = encode_structured_query(&q, "messages");
        let sq = &body["structuredQuery"];
        assert_eq!(sq["where"]["fieldFilter"]["op"], "ARRAY_CONTAINS");
        assert_eq!(sq["orderBy"][0]["direction"], "ASCENDING");
        assert!(sq.get("limit").is_none());
    }
}

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub type Fields = BTreeMap<String, FieldValue>;

/// A typed document field, mirroring the value kinds the hosted store keeps.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Array(Vec<FieldValue>),
    Map(Fields),
}

impl FieldValue {
    fn type_rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Integer(_) | FieldValue::Double(_) => 2,
            FieldValue::Timestamp(_) => 3,
            FieldValue::String(_) => 4,
            FieldValue::Array(_) => 5,
            FieldValue::Map(_) => 6,
        }
    }

    /// Total order across kinds: null < bool < number < timestamp < string < array < map.
    pub fn compare(&self, other: &FieldValue) -> Ordering {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Integer(a), Double(b)) => (*a as f64).total_cmp(b),
            (Double(a), Integer(b)) => a.total_cmp(&(*b as f64)),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Array(a), Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Map(a), Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.compare(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(values) => Some(values),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equal(String, FieldValue),
    GreaterOrEqual(String, FieldValue),
    LessThan(String, FieldValue),
    ArrayContains(String, FieldValue),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Equal(f, _)
            | Filter::GreaterOrEqual(f, _)
            | Filter::LessThan(f, _)
            | Filter::ArrayContains(f, _) => f,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(self.field()) else {
            return false;
        };
        match self {
            Filter::Equal(_, expected) => actual.compare(expected) == Ordering::Equal,
            // Range filters only match values of the same kind as the bound.
            Filter::GreaterOrEqual(_, bound) => {
                actual.type_rank() == bound.type_rank() && actual.compare(bound) != Ordering::Less
            }
            Filter::LessThan(_, bound) => {
                actual.type_rank() == bound.type_rank() && actual.compare(bound) == Ordering::Less
            }
            Filter::ArrayContains(_, needle) => actual
                .as_array()
                .is_some_and(|values| values.iter().any(|v| v.compare(needle) == Ordering::Equal)),
        }
    }
}

/// A structured query against one collection path, e.g. `chats/{id}/messages`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.filters.push(Filter::Equal(field.to_string(), value.into()));
        self
    }

    pub fn where_gte(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.filters
            .push(Filter::GreaterOrEqual(field.to_string(), value.into()));
        self
    }

    pub fn where_lt(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.filters.push(Filter::LessThan(field.to_string(), value.into()));
        self
    }

    pub fn where_array_contains(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
            && self.order_by.iter().all(|(field, _)| doc.get(field).is_some())
    }

    /// Evaluates the query over a set of candidate documents of its collection.
    pub fn apply<I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();
        out.sort_by(|a, b| {
            for (field, direction) in &self.order_by {
                let ord = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => x.compare(y),
                    _ => Ordering::Equal,
                };
                let ord = match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });
        if let Some(n) = self.limit {
            out.truncate(n);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(id: &str, pairs: &[(&str, FieldValue)]) -> Document {
        Document::new(
            id,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn prefix_range_matches_only_strings_starting_with_prefix() {
        let q = Query::collection("users")
            .where_gte("username", "al")
            .where_lt("username", "al\u{f8ff}");
        let docs = vec![
            doc("1", &[("username", "alice".into())]),
            doc("2", &[("username", "al".into())]),
            doc("3", &[("username", "bob".into())]),
            doc("4", &[("username", "ak".into())]),
            doc("5", &[("email", "al@x.io".into())]),
            doc("6", &[("username", FieldValue::Integer(7))]),
        ];
        let ids: Vec<String> = q.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn array_contains_checks_membership() {
        let q = Query::collection("chats").where_array_contains("participants", "u1");
        let with = doc(
            "a",
            &[(
                "participants",
                FieldValue::Array(vec!["u1".into(), "u2".into()]),
            )],
        );
        let without = doc(
            "b",
            &[(
                "participants",
                FieldValue::Array(vec!["u3".into(), "u2".into()]),
            )],
        );
        assert!(q.matches(&with));
        assert!(!q.matches(&without));
    }

    #[test]
    fn ordering_uses_field_then_id_and_honours_limit() {
        let t = |s| FieldValue::Timestamp(Utc.timestamp_opt(s, 0).unwrap());
        let docs = vec![
            doc("c", &[("timestamp", t(30))]),
            doc("a", &[("timestamp", t(10))]),
            doc("b", &[("timestamp", t(10))]),
            doc("d", &[]),
        ];
        let asc = Query::collection("m").order_by("timestamp", Direction::Ascending);
        let ids: Vec<String> = asc.apply(docs.clone()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let desc = Query::collection("m")
            .order_by("timestamp", Direction::Descending)
            .limit(1);
        let ids: Vec<String> = desc.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn cross_kind_order_follows_store_rules() {
        let ts = FieldValue::Timestamp(Utc.timestamp_opt(0, 0).unwrap());
        assert_eq!(FieldValue::Null.compare(&FieldValue::Bool(false)), Ordering::Less);
        assert_eq!(FieldValue::Integer(5).compare(&ts), Ordering::Less);
        assert_eq!(ts.compare(&"a".into()), Ordering::Less);
        assert_eq!(FieldValue::Integer(2).compare(&FieldValue::Double(2.0)), Ordering::Equal);
    }
}

//! Ordering over pre-computed sort keys.
//!
//! Remotes compute sort keys server-side (including any collation mapping)
//! and attach them to each document under [`SORT_KEY_FIELD`] as a document
//! whose fields line up positionally with the configured sort pattern. The
//! merger never looks at field names; it compares the key values pairwise
//! in insertion order, flipping each position per the pattern's direction.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::Document;

/// Subfield under which remotes attach the pre-computed sort key.
pub const SORT_KEY_FIELD: &str = "$sortKey";

/// Direction of one sort pattern position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One position of the sort pattern. The name is carried for diagnostics
/// only; comparison is positional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub name: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(name: impl Into<String>) -> Self {
        SortField {
            name: name.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        SortField {
            name: name.into(),
            order: SortOrder::Descending,
        }
    }
}

/// The configured sort pattern. Empty means unsorted merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub fields: Vec<SortField>,
}

impl SortSpec {
    pub fn new(fields: Vec<SortField>) -> Self {
        SortSpec { fields }
    }

    /// The unsorted spec.
    pub fn none() -> Self {
        SortSpec { fields: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn order_at(&self, position: usize) -> SortOrder {
        self.fields
            .get(position)
            .map(|f| f.order)
            .unwrap_or(SortOrder::Ascending)
    }

    /// Compare two sort-key documents field-wise under this pattern.
    pub fn compare_keys(&self, left: &Document, right: &Document) -> Ordering {
        let (left, right) = match (left.as_object(), right.as_object()) {
            (Some(l), Some(r)) => (l, r),
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
        };

        for (position, (lv, rv)) in left.values().zip(right.values()).enumerate() {
            let ord = match self.order_at(position) {
                SortOrder::Ascending => compare_values(lv, rv),
                SortOrder::Descending => compare_values(lv, rv).reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        left.len().cmp(&right.len())
    }
}

/// Extract the pre-computed sort key from a document, if present and
/// well-formed (an object-valued [`SORT_KEY_FIELD`]).
pub fn extract_sort_key(doc: &Document) -> Option<&Document> {
    let key = doc.get(SORT_KEY_FIELD)?;
    key.is_object().then_some(key)
}

/// Total order over JSON values: null < bool < number < string < array
/// < object, with value comparison inside each rank.
pub fn compare_values(a: &Document, b: &Document) -> Ordering {
    use serde_json::Value;

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let ord = compare_values(xv, yv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for (xv, yv) in x.values().zip(y.values()) {
                let ord = compare_values(xv, yv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_numbers(x: &serde_json::Number, y: &serde_json::Number) -> Ordering {
    if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
        return xi.cmp(&yi);
    }
    if let (Some(xu), Some(yu)) = (x.as_u64(), y.as_u64()) {
        return xu.cmp(&yu);
    }
    let xf = x.as_f64().unwrap_or(f64::NAN);
    let yf = y.as_f64().unwrap_or(f64::NAN);
    xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
}

fn type_rank(v: &Document) -> u8 {
    use serde_json::Value;
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(compare_values(&json!(1), &json!(2)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!(3), &json!(3.0)), Ordering::Equal);
    }

    #[test]
    fn type_ranks_are_total() {
        assert_eq!(
            compare_values(&json!(null), &json!(false)),
            Ordering::Less
        );
        assert_eq!(compare_values(&json!(true), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(9), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!("z"), &json!([1])), Ordering::Less);
    }

    #[test]
    fn empty_spec_means_unsorted() {
        assert!(SortSpec::none().is_empty());
        assert!(SortSpec::default().is_empty());
        assert!(!SortSpec::new(vec![SortField::asc("k")]).is_empty());
    }

    #[test]
    fn ascending_single_field() {
        let spec = SortSpec::new(vec![SortField::asc("k")]);
        let a = json!({"k": 1});
        let b = json!({"k": 5});
        assert_eq!(spec.compare_keys(&a, &b), Ordering::Less);
        assert_eq!(spec.compare_keys(&b, &a), Ordering::Greater);
        assert_eq!(spec.compare_keys(&a, &a), Ordering::Equal);
    }

    #[test]
    fn descending_reverses_position() {
        let spec = SortSpec::new(vec![SortField::desc("k")]);
        let a = json!({"k": 1});
        let b = json!({"k": 5});
        assert_eq!(spec.compare_keys(&a, &b), Ordering::Greater);
    }

    #[test]
    fn comparison_is_positional_not_by_name() {
        let spec = SortSpec::new(vec![SortField::asc("x"), SortField::desc("y")]);
        // Field names in the keys do not match the pattern; only position
        // matters.
        let a = json!({"p": 1, "q": 9});
        let b = json!({"p": 1, "q": 3});
        // First position ties, second is descending: 9 sorts before 3.
        assert_eq!(spec.compare_keys(&a, &b), Ordering::Less);
    }

    #[test]
    fn shorter_key_sorts_first_on_shared_prefix() {
        let spec = SortSpec::new(vec![SortField::asc("a"), SortField::asc("b")]);
        let short = json!({"a": 1});
        let long = json!({"a": 1, "b": 0});
        assert_eq!(spec.compare_keys(&short, &long), Ordering::Less);
    }

    #[test]
    fn extract_requires_object_key() {
        let good = json!({"_id": 1, SORT_KEY_FIELD: {"k": 4}});
        let missing = json!({"_id": 2});
        let wrong_type = json!({"_id": 3, SORT_KEY_FIELD: 4});
        assert!(extract_sort_key(&good).is_some());
        assert!(extract_sort_key(&missing).is_none());
        assert!(extract_sort_key(&wrong_type).is_none());
    }
}

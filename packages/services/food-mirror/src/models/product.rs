use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A catalog field whose JSON type is not trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Other(Value),
}

impl RawField {
    /// Trimmed, non-empty text; integers and whole floats render as digits.
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            RawField::Text(s) => s.trim().to_string(),
            RawField::Integer(i) => i.to_string(),
            RawField::Unsigned(u) => u.to_string(),
            RawField::Float(f) if is_exact_whole(*f) => format!("{:.0}", f),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawField::Integer(i) => Some(*i),
            RawField::Unsigned(u) => i64::try_from(*u).ok(),
            RawField::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            RawField::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text items of a list, or a single comma-separated string split apart.
    pub fn as_text_list(&self) -> Vec<String> {
        match self {
            RawField::List(items) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            RawField::Text(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// JSON objects only; anything else yields `None`.
    pub fn as_object(&self) -> Option<Value> {
        match self {
            RawField::Other(v @ Value::Object(_)) => Some(v.clone()),
            _ => None,
        }
    }
}

/// One product as delivered by the catalog, deserialized leniently.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProduct {
    pub code: Option<RawField>,
    pub product_name: Option<RawField>,
    pub brands: Option<RawField>,
    pub categories: Option<RawField>,
    pub countries: Option<RawField>,
    pub countries_tags: Option<RawField>,
    pub quantity: Option<RawField>,
    pub nutriscore_grade: Option<RawField>,
    pub ecoscore_grade: Option<RawField>,
    pub nova_group: Option<RawField>,
    pub nutriments: Option<RawField>,
    pub ecoscore_data: Option<RawField>,
    pub environmental_score: Option<RawField>,
    pub last_modified_t: Option<RawField>,
    #[serde(skip)]
    pub raw: Value,
}

impl RawProduct {
    /// Never fails: a value that is not an object becomes an empty product.
    pub fn from_value(value: Value) -> Self {
        let mut product: RawProduct = serde_json::from_value(value.clone()).unwrap_or_default();
        product.raw = value;
        product
    }
}

/// Display attributes kept alongside the keyed columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPayload {
    pub brands: String,
    pub categories: String,
    pub quantity: String,
    pub nutriscore_grade: Option<String>,
    pub ecoscore_grade: Option<String>,
    pub nova_group: Option<i64>,
    pub nutriments: Value,
    pub ecoscore_data: Value,
    pub raw: Value,
}

/// A validated product ready for the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub code: String,
    pub name: String,
    pub country: String,
    pub last_modified: Option<i64>,
    pub payload: ProductPayload,
}

/// A product row read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredProduct {
    #[serde(flatten)]
    pub record: ProductRecord,
    pub last_synced_at: DateTime<Utc>,
}

/// Whole floats small enough that every integer up to them is representable.
fn is_exact_whole(f: f64) -> bool {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT
}

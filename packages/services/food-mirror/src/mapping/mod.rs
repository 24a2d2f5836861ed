use serde_json::{Map, Value};

use crate::models::*;

/// Turns a raw catalog product into a storable record.
///
/// Returns `None` when the product code is missing, blank, or contains whitespace or
/// control characters. Every other field is optional and falls back to an empty value.
pub fn normalize(raw: &RawProduct) -> Option<ProductRecord> {
    let code = raw.code.as_ref().and_then(RawField::as_text)?;
    if !is_valid_code(&code) {
        tracing::debug!(code = %code.escape_debug(), "dropping product with malformed code");
        return None;
    }

    let country = match raw.countries_tags.as_ref().map(RawField::as_text_list) {
        Some(tags) if !tags.is_empty() => tags.join(","),
        _ => text(&raw.countries),
    };

    let ecoscore_data = object(&raw.ecoscore_data)
        .or_else(|| object(&raw.environmental_score))
        .unwrap_or_else(empty_object);

    Some(ProductRecord {
        code,
        name: text(&raw.product_name),
        country,
        last_modified: raw.last_modified_t.as_ref().and_then(RawField::as_i64),
        payload: ProductPayload {
            brands: text(&raw.brands),
            categories: text(&raw.categories),
            quantity: text(&raw.quantity),
            nutriscore_grade: grade(&raw.nutriscore_grade),
            ecoscore_grade: grade(&raw.ecoscore_grade),
            nova_group: raw.nova_group.as_ref().and_then(RawField::as_i64),
            nutriments: object(&raw.nutriments).unwrap_or_else(empty_object),
            ecoscore_data,
            raw: raw.raw.clone(),
        },
    })
}

pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && !code.chars().any(|c| c.is_whitespace() || c.is_control())
}

fn text(field: &Option<RawField>) -> String {
    field.as_ref().and_then(RawField::as_text).unwrap_or_default()
}

fn grade(field: &Option<RawField>) -> Option<String> {
    field.as_ref().and_then(RawField::as_text).map(|g| g.to_lowercase())
}

fn object(field: &Option<RawField>) -> Option<Value> {
    field.as_ref().and_then(RawField::as_object)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Option<ProductRecord> {
        normalize(&RawProduct::from_value(value))
    }

    #[test]
    fn full_record() {
        let r = record(json!({
            "code": "3017620422003",
            "product_name": "Nutella",
            "brands": "Ferrero",
            "countries_tags": ["en:france", "en:belgium"],
            "countries": "France,Belgique",
            "nutriscore_grade": "E",
            "nova_group": 4,
            "nutriments": {"sugars_100g": 56.3},
            "last_modified_t": 1712345678
        }))
        .unwrap();

        assert_eq!(r.code, "3017620422003");
        assert_eq!(r.name, "Nutella");
        assert_eq!(r.country, "en:france,en:belgium");
        assert_eq!(r.last_modified, Some(1712345678));
        assert_eq!(r.payload.nutriscore_grade.as_deref(), Some("e"));
        assert_eq!(r.payload.nova_group, Some(4));
        assert_eq!(r.payload.nutriments["sugars_100g"], json!(56.3));
        assert_eq!(r.payload.ecoscore_data, json!({}));
        assert_eq!(r.payload.raw["brands"], json!("Ferrero"));
    }

    #[test]
    fn missing_optionals_get_defaults() {
        let r = record(json!({"code": 123456})).unwrap();
        assert_eq!(r.code, "123456");
        assert_eq!(r.name, "");
        assert_eq!(r.country, "");
        assert_eq!(r.last_modified, None);
        assert_eq!(r.payload.nova_group, None);
        assert_eq!(r.payload.nutriments, json!({}));
    }

    #[test]
    fn country_falls_back_to_free_text() {
        let r = record(json!({"code": "1", "countries": "Suisse", "countries_tags": []})).unwrap();
        assert_eq!(r.country, "Suisse");
    }

    #[test]
    fn environmental_score_used_when_ecoscore_absent() {
        let r = record(json!({"code": "1", "environmental_score": {"grade": "b"}})).unwrap();
        assert_eq!(r.payload.ecoscore_data, json!({"grade": "b"}));
    }

    #[test]
    fn rejects_bad_codes() {
        assert!(record(json!({"product_name": "no code"})).is_none());
        assert!(record(json!({"code": ""})).is_none());
        assert!(record(json!({"code": "   "})).is_none());
        assert!(record(json!({"code": null})).is_none());
        assert!(record(json!({"code": "12 34"})).is_none());
        assert!(record(json!({"code": "12\u{0007}34"})).is_none());
        assert!(record(json!({"code": {"nested": 1}})).is_none());
        assert!(record(json!([1, 2, 3])).is_none());
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(record(json!({"code": " 0042 "})).unwrap().code, "0042");
    }

    #[test]
    fn mistyped_fields_do_not_drop_the_record() {
        let r = record(json!({
            "code": "99",
            "product_name": 17,
            "nutriments": "n/a",
            "last_modified_t": "not a number",
            "nova_group": true
        }))
        .unwrap();
        assert_eq!(r.name, "17");
        assert_eq!(r.payload.nutriments, json!({}));
        assert_eq!(r.last_modified, None);
        assert_eq!(r.payload.nova_group, None);
    }
}

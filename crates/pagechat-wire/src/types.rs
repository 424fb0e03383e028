//! Metadata carried after the answer text

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::{Map, Value};

/// Where an answer fact originated.
///
/// The core never interprets these fields. Unknown keys, and known keys whose
/// value has an unexpected type, are kept in `extra` and serialized back
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for SourceRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut extra = Map::<String, Value>::deserialize(deserializer)?;

        let document_id = take_if(&mut extra, "documentId", |v| v.as_str().map(str::to_string));
        let page = take_if(&mut extra, "page", |v| v.as_u64().and_then(|n| u32::try_from(n).ok()));
        let excerpt = take_if(&mut extra, "excerpt", |v| v.as_str().map(str::to_string));

        Ok(Self {
            document_id,
            page,
            excerpt,
            extra,
        })
    }
}

/// Remove `key` from `map` only if `convert` accepts its value
fn take_if<T>(map: &mut Map<String, Value>, key: &str, convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
    let value = map.get(key).and_then(|v| convert(v))?;
    map.remove(key);
    Some(value)
}

impl SourceRef {
    /// Create a source reference pointing at a document
    pub fn document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Default::default()
        }
    }

    /// Set the page number
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Set the excerpt
    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }
}

/// The JSON object that follows the sentinel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Cost reported by the backend for producing the answer
    pub cost: f64,
    /// Sources in relevance order
    #[serde(default, deserialize_with = "lenient_sources")]
    pub sources: Vec<SourceRef>,
}

impl Metadata {
    /// Parse the raw metadata segment
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text.trim())
    }

    /// The first (best) source, if the backend reported any
    pub fn lead_source(&self) -> Option<&SourceRef> {
        self.sources.first()
    }
}

/// Accept a list, `null`, or a string in place of `sources`.
///
/// The query endpoint sends `"sources": ""` when it has nothing to cite.
fn lenient_sources<'de, D>(deserializer: D) -> Result<Vec<SourceRef>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).map_err(|e| D::Error::custom(format!("source {}: {}", i, e)))
            })
            .collect(),
        Value::String(_) | Value::Null => Ok(Vec::new()),
        other => Err(D::Error::custom(format!(
            "sources must be a list, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_metadata() {
        let meta = Metadata::parse(
            r#"{"cost":1,"sources":[{"documentId":"d1","page":3,"excerpt":"the cat sat"}]}"#,
        )
        .unwrap();
        assert_eq!(meta.cost, 1.0);
        assert_eq!(
            meta.lead_source(),
            Some(&SourceRef::document("d1").with_page(3).with_excerpt("the cat sat"))
        );
    }

    #[test]
    fn test_sources_empty_string_is_empty_list() {
        let meta = Metadata::parse(r#"{"cost": 0, "sources": ""}"#).unwrap();
        assert!(meta.sources.is_empty());
        assert!(meta.lead_source().is_none());
    }

    #[test]
    fn test_sources_missing_or_null() {
        assert!(Metadata::parse(r#"{"cost": 2}"#).unwrap().sources.is_empty());
        assert!(Metadata::parse(r#"{"cost": 2, "sources": null}"#).unwrap().sources.is_empty());
    }

    #[test]
    fn test_cost_is_required() {
        assert!(Metadata::parse(r#"{"sources": []}"#).is_err());
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let meta = Metadata::parse("\n  {\"cost\": 0.5, \"sources\": []}  \n").unwrap();
        assert_eq!(meta.cost, 0.5);
    }

    #[test]
    fn test_unknown_source_fields_pass_through() {
        let raw = r#"{"documentId":"d9","score":0.87,"chunk":{"start":10}}"#;
        let source: SourceRef = serde_json::from_str(raw).unwrap();
        assert_eq!(source.extra.get("score"), Some(&serde_json::json!(0.87)));

        let back: serde_json::Value = serde_json::to_value(&source).unwrap();
        assert_eq!(back, serde_json::from_str::<serde_json::Value>(raw).unwrap());
    }

    #[test]
    fn test_mistyped_source_fields_kept_in_extra() {
        let raw = r#"{"cost":1,"sources":[{"documentId":"d1","page":"12"},{"documentId":42,"page":3}]}"#;
        let meta = Metadata::parse(raw).unwrap();
        assert_eq!(meta.sources.len(), 2);

        let first = &meta.sources[0];
        assert_eq!(first.document_id.as_deref(), Some("d1"));
        assert_eq!(first.page, None);
        assert_eq!(first.extra.get("page"), Some(&serde_json::json!("12")));

        let second = &meta.sources[1];
        assert_eq!(second.document_id, None);
        assert_eq!(second.page, Some(3));
        assert_eq!(second.extra.get("documentId"), Some(&serde_json::json!(42)));

        let back = serde_json::to_value(first).unwrap();
        assert_eq!(back, serde_json::json!({"documentId": "d1", "page": "12"}));
    }

    #[test]
    fn test_non_list_sources_error_names_the_type() {
        let err = Metadata::parse(r#"{"cost":1,"sources":7}"#).unwrap_err();
        assert!(err.to_string().contains("sources must be a list, got a number"));
    }
}

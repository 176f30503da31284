//! Corpus records and ranked results.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Source kind of a searchable item. Descriptive only; the ranker ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Project,
    Experience,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Project => "project",
            ItemKind::Experience => "experience",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of searchable content with its precomputed embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingItem {
    /// Stable identifier, unique within one corpus
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ItemKind,

    /// The exact string that was embedded
    #[serde(default)]
    pub text: String,

    /// Absent or non-numeric vectors decode as empty and score 0.
    #[serde(default, deserialize_with = "lenient_vector")]
    pub embedding: Vec<f32>,

    /// Display attributes (title, summary, path, ...)
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl EmbeddingItem {
    /// String-valued meta attribute, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }
}

/// A corpus item together with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub item: EmbeddingItem,
    pub score: f32,
}

fn lenient_vector<'de, D>(deserializer: D) -> Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;

    let values = match value {
        Some(Value::Array(values)) => values,
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(other) => {
            log::warn!("ignoring non-array embedding of type {}", json_type(&other));
            return Ok(Vec::new());
        }
    };

    let parsed: Option<Vec<f32>> = values
        .iter()
        .map(|v| v.as_f64().map(|x| x as f32))
        .collect();

    Ok(parsed.unwrap_or_else(|| {
        log::warn!("ignoring embedding with non-numeric components");
        Vec::new()
    }))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

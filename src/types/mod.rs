use serde::{Deserialize, Serialize};

use crate::vector::Score;

/// One source row of the knowledge base.
///
/// Fields keep their input order; only non-blank text values are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    /// Provenance label, e.g. `Row 12`
    pub source: String,
    pub fields: Vec<(String, String)>,
}

impl KnowledgeRecord {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field, ignoring values that are empty after trimming.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl AsRef<str>) -> Self {
        let value = value.as_ref().trim();
        if !value.is_empty() {
            self.fields.push((name.into(), value.to_string()));
        }
        self
    }

    /// All field values joined by single spaces, in field order.
    pub fn combined_text(&self) -> String {
        self.fields
            .iter()
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A bounded span of record text plus the record it came from.
///
/// A chunk's position in the persisted chunk list is its only identifier and
/// equals the row of its vector in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub source: String,
    pub body: String,
}

impl TextChunk {
    pub fn new(source: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            body: body.into(),
        }
    }

    /// Body prefixed with its provenance tag. This is what gets embedded and
    /// what search returns.
    pub fn tagged_text(&self) -> String {
        format!("[Source: {}] {}", self.source, self.body)
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Position of the chunk in the chunk list
    pub position: usize,
    /// Tagged chunk text
    pub text: String,
    /// Relevance in [0, 1], higher is better
    pub score: Score,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_skips_blank_fields() {
        let record = KnowledgeRecord::new("Row 1")
            .with_field("disease", "  Early blight ")
            .with_field("notes", "   ")
            .with_field("remedy", "Remove infected leaves");

        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.field("disease"), Some("Early blight"));
        assert_eq!(record.field("notes"), None);
        assert_eq!(record.combined_text(), "Early blight Remove infected leaves");
    }

    #[test]
    fn test_chunk_tagged_text() {
        let chunk = TextChunk::new("Row 3", "Leaf curl virus spreads via whiteflies");
        assert_eq!(
            chunk.tagged_text(),
            "[Source: Row 3] Leaf curl virus spreads via whiteflies"
        );
    }
}

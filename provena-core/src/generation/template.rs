//! Deterministic template source.

use super::{ContentSource, GenerationRequest, collapse_whitespace};
use crate::error::GenerationError;
use async_trait::async_trait;

/// Builds derivative text directly from record fields.
///
/// Hop-1 text joins the non-empty summary fields with `" | "`; hop-2 text
/// prefixes the hop-1 summary. Output depends only on its input.
pub struct TemplateSource;

impl TemplateSource {
    pub fn render(request: &GenerationRequest<'_>) -> String {
        match request {
            GenerationRequest::Summary { record, fields, .. } => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|f| collapse_whitespace(record.field(f)))
                    .filter(|v| !v.is_empty())
                    .collect();
                if parts.is_empty() {
                    format!("record {}", record.record_id)
                } else {
                    parts.join(" | ")
                }
            }
            GenerationRequest::Interpretation { summary, .. } => {
                format!("Interpretation of: {summary}")
            }
        }
    }
}

#[async_trait]
impl ContentSource for TemplateSource {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        Ok(Self::render(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Normalizer, StreamProfile};
    use serde_json::json;

    #[tokio::test]
    async fn test_summary_joins_populated_fields() {
        let profile = StreamProfile {
            name: "s".into(),
            source_url: None,
            source_file: None,
            id_field: "id".into(),
            mandatory_fields: vec![],
            summary_fields: vec![],
        };
        let record = Normalizer::new(&profile)
            .normalize(0, &json!({"id": "9", "title": "Scarab  amulet", "date": "", "culture": "Egyptian"}))
            .unwrap();
        let fields = vec!["title".to_string(), "date".to_string(), "culture".to_string()];
        let text = TemplateSource
            .generate(&GenerationRequest::Summary {
                stream: "s",
                record: &record,
                fields: &fields,
            })
            .await
            .unwrap();
        assert_eq!(text, "Scarab amulet | Egyptian");

        let empty: Vec<String> = vec!["missing".into()];
        let fallback = TemplateSource::render(&GenerationRequest::Summary {
            stream: "s",
            record: &record,
            fields: &empty,
        });
        assert_eq!(fallback, "record 9");
    }

    #[tokio::test]
    async fn test_interpretation_wraps_summary() {
        let text = TemplateSource
            .generate(&GenerationRequest::Interpretation {
                stream: "s",
                summary: "Scarab amulet",
            })
            .await
            .unwrap();
        assert_eq!(text, "Interpretation of: Scarab amulet");
    }
}

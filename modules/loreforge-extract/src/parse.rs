//! Permissive parsing of AI-search responses. The provider is asked for a
//! JSON object keyed by the structured-content vocabulary, but responses
//! arrive wrapped in code fences, prose, or both. The contract here is to
//! extract the object from whatever surrounds it and never fail on benign
//! noise.

use serde_json::Value;

use loreforge_common::{ContentType, LoreforgeError};

/// An AI-search response reduced to its usable parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStructured {
    /// Items per known content type, in vocabulary order. Empty sections are
    /// omitted.
    pub sections: Vec<(ContentType, Vec<Value>)>,
    pub meta: Option<Value>,
    /// Top-level keys outside the vocabulary (and non-array values under
    /// known keys), kept for hidden diagnostics.
    pub dropped: Vec<String>,
}

impl ParsedStructured {
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|(_, items)| items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

/// Strip markdown code fences (```json ... ``` or plain ``` ... ```).
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence, if any.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// The substring between the first `{` and the last `}`, inclusive.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a raw AI-search response into vocabulary-keyed sections.
///
/// Code fences and surrounding prose are tolerated; unknown top-level keys
/// are collected, not fatal. Fails only when no JSON object can be found or
/// the extracted span is not valid JSON.
pub fn parse_ai_response(raw: &str) -> Result<ParsedStructured, LoreforgeError> {
    let stripped = strip_code_fences(raw);
    let span = extract_object(stripped).ok_or_else(|| {
        LoreforgeError::Validation("no JSON object in AI response".to_string())
    })?;

    let value: Value = serde_json::from_str(span)
        .map_err(|e| LoreforgeError::Validation(format!("unparseable AI response: {e}")))?;
    let Value::Object(map) = value else {
        return Err(LoreforgeError::Validation(
            "AI response is not a JSON object".to_string(),
        ));
    };

    let mut sections = Vec::new();
    let mut dropped = Vec::new();

    // Walk the vocabulary (not the map) so section order is stable.
    for content_type in ContentType::ALL {
        match map.get(content_type.as_str()) {
            Some(Value::Array(items)) if !items.is_empty() => {
                sections.push((content_type, items.clone()));
            }
            Some(Value::Array(_)) | None => {}
            Some(_) => dropped.push(format!("{content_type}: expected an array")),
        }
    }

    let known: Vec<&str> = ContentType::ALL.iter().map(|c| c.as_str()).collect();
    for key in map.keys() {
        if key != "meta" && !known.contains(&key.as_str()) {
            dropped.push(format!("unknown content type: {key}"));
        }
    }

    Ok(ParsedStructured {
        sections,
        meta: map.get("meta").cloned(),
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_object_parses() {
        let parsed = parse_ai_response(r#"{"monster": [{"name": "Owlbear"}], "meta": {"n": 1}}"#)
            .unwrap();
        assert_eq!(parsed.item_count(), 1);
        assert_eq!(parsed.sections[0].0, ContentType::Monster);
        assert_eq!(parsed.meta, Some(json!({"n": 1})));
    }

    #[test]
    fn code_fences_are_stripped() {
        let raw = "```json\n{\"spell\": [{\"name\": \"Fireball\"}]}\n```";
        let parsed = parse_ai_response(raw).unwrap();
        assert_eq!(parsed.sections[0].0, ContentType::Spell);
    }

    #[test]
    fn surrounding_prose_is_tolerated() {
        let raw = "Here is what I found:\n{\"npc\": [{\"name\": \"Ireena\"}]}\nHope that helps!";
        let parsed = parse_ai_response(raw).unwrap();
        assert_eq!(parsed.item_count(), 1);
    }

    #[test]
    fn unknown_keys_are_dropped_not_fatal() {
        let parsed =
            parse_ai_response(r#"{"npc": [{"name": "X"}], "villain": [{"name": "Y"}]}"#).unwrap();
        assert_eq!(parsed.item_count(), 1);
        assert_eq!(parsed.dropped, vec!["unknown content type: villain"]);
    }

    #[test]
    fn non_array_known_key_is_dropped() {
        let parsed = parse_ai_response(r#"{"npc": {"name": "X"}}"#).unwrap();
        assert!(parsed.is_empty());
        assert_eq!(parsed.dropped, vec!["npc: expected an array"]);
    }

    #[test]
    fn empty_custom_array_emits_nothing() {
        let parsed = parse_ai_response(r#"{"custom": []}"#).unwrap();
        assert!(parsed.is_empty());
        assert!(parsed.dropped.is_empty());
    }

    #[test]
    fn garbage_without_an_object_is_an_error() {
        assert!(matches!(
            parse_ai_response("no structured content here"),
            Err(LoreforgeError::Validation(_))
        ));
    }

    #[test]
    fn roundtrip_preserves_structured_content() {
        let structured = json!({
            "monster": [{"name": "Owlbear", "cr": 3}],
            "location": [{"name": "Amber Temple"}],
        });
        let parsed = parse_ai_response(&structured.to_string()).unwrap();
        assert_eq!(
            parsed.sections,
            vec![
                (ContentType::Monster, vec![json!({"name": "Owlbear", "cr": 3})]),
                (ContentType::Location, vec![json!({"name": "Amber Temple"})]),
            ]
        );
    }
}

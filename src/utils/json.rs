use serde_json::Value;

/// What a PATCH body asks for one nullable text column.
#[derive(Debug, PartialEq, Eq)]
pub enum TextPatch {
    Keep,
    Clear,
    Set(String),
}

impl TextPatch {
    /// Shape expected by an `AsChangeset` field of type `Option<Option<String>>`.
    pub fn into_change(self) -> Option<Option<String>> {
        match self {
            TextPatch::Keep => None,
            TextPatch::Clear => Some(None),
            TextPatch::Set(value) => Some(Some(value)),
        }
    }
}

/// Reads `field` from a JSON object. Strings are trimmed and a blank string clears.
pub fn text_patch(body: &Value, field: &str) -> Result<TextPatch, String> {
    match body.get(field) {
        None => Ok(TextPatch::Keep),
        Some(Value::Null) => Ok(TextPatch::Clear),
        Some(Value::String(raw)) => match raw.trim() {
            "" => Ok(TextPatch::Clear),
            trimmed => Ok(TextPatch::Set(trimmed.to_string())),
        },
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

use crate::error::ApiError;

/// Maximum text length for speak requests
const MAX_TEXT_LENGTH: usize = 5000;
/// Maximum length of an externally assigned call identifier
const MAX_CALL_SID_LENGTH: usize = 128;

/// Validate a speak command and return its trimmed call id and text.
pub fn validate_speak_request<'a>(
    call_sid: Option<&'a str>,
    text: Option<&'a str>,
) -> Result<(&'a str, &'a str), ApiError> {
    let call_sid = call_sid.map(str::trim).unwrap_or_default();
    if call_sid.is_empty() {
        return Err(ApiError::InvalidInput("callSid is required".to_string()));
    }
    if !is_valid_call_sid(call_sid) {
        return Err(ApiError::InvalidInput(format!(
            "Invalid callSid format: {}",
            call_sid
        )));
    }

    let text = text.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    Ok((call_sid, text))
}

/// Call ids are opaque carrier tokens (e.g. `CA` + 32 hex digits). Accept any
/// reasonably sized ASCII token.
fn is_valid_call_sid(sid: &str) -> bool {
    sid.len() <= MAX_CALL_SID_LENGTH
        && sid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

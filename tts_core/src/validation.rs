use crate::error::ValidationError;

/// Longest voice identifier accepted, in characters.
const MAX_VOICE_ID_LENGTH: usize = 256;

/// Validate synthesis input text. Length is counted in characters.
pub fn validate_text(text: &str, max_length: usize) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let length = text.chars().count();
    if length > max_length {
        return Err(ValidationError::TextTooLong {
            length,
            max: max_length,
        });
    }
    Ok(())
}

/// Validate the shape of a voice identifier before resolution.
pub fn validate_voice_id(voice_id: &str) -> Result<(), ValidationError> {
    if voice_id.trim().is_empty() {
        return Err(ValidationError::InvalidVoiceId("voice cannot be empty".to_string()));
    }
    if voice_id.chars().count() > MAX_VOICE_ID_LENGTH {
        return Err(ValidationError::InvalidVoiceId(format!(
            "voice identifier longer than {MAX_VOICE_ID_LENGTH} characters"
        )));
    }
    if voice_id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidVoiceId(
            "voice identifier contains control characters".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_chunk_budget(chunk_budget: usize) -> Result<(), ValidationError> {
    if chunk_budget == 0 {
        return Err(ValidationError::InvalidChunkBudget);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_text_valid() {
        assert!(validate_text("Hello", 10).is_ok());
        assert!(validate_text("exactly10!", 10).is_ok());
    }

    #[test]
    fn test_validate_text_empty() {
        assert_eq!(validate_text("", 10), Err(ValidationError::EmptyText));
        assert_eq!(validate_text("   \n", 10), Err(ValidationError::EmptyText));
    }

    #[test]
    fn test_validate_text_too_long() {
        let result = validate_text(&"a".repeat(11), 10);
        assert_eq!(result, Err(ValidationError::TextTooLong { length: 11, max: 10 }));
    }

    #[test]
    fn test_validate_text_counts_characters_not_bytes() {
        // 5 characters, 10 bytes
        assert!(validate_text("äöüßé", 5).is_ok());
    }

    #[test]
    fn test_validate_voice_id() {
        assert!(validate_voice_id("alba").is_ok());
        assert!(validate_voice_id("uploaded_voices/bob.wav").is_ok());
        assert!(validate_voice_id("").is_err());
        assert!(validate_voice_id("bo\0b").is_err());
        assert!(validate_voice_id(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_chunk_budget() {
        assert!(validate_chunk_budget(1).is_ok());
        assert_eq!(validate_chunk_budget(0), Err(ValidationError::InvalidChunkBudget));
    }
}

use crate::error::ApiError;

/// Maximum text length for a single `/speak` request
const MAX_TEXT_LENGTH: usize = 5000;
/// Maximum length of a chat message
const MAX_MESSAGE_LENGTH: usize = 2000;
const MAX_CONVERSATION_ID_LENGTH: usize = 64;

/// Validate text handed straight to the speech pipeline
pub fn validate_speak_request(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_chat_request(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::InvalidInput("Message cannot be empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(())
}

/// Conversation ids are letters, digits, `-` and `_`.
pub fn validate_conversation_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > MAX_CONVERSATION_ID_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Conversation id must be 1 to {} characters",
            MAX_CONVERSATION_ID_LENGTH
        )));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ApiError::InvalidInput(
            "Conversation id may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

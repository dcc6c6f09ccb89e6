use unicode_normalization::UnicodeNormalization;

use crate::error::{CoreResult, DataChatError};

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean a user message before it is sent. Blank messages are rejected.
pub fn normalize_message(raw: &str) -> CoreResult<String> {
    let cleaned = clean_text(raw);
    if cleaned.is_empty() {
        return Err(DataChatError::Validation("Please enter a message.".into()));
    }
    Ok(cleaned)
}

use sha2::{Digest, Sha256};

/// Redelivery key: SHA-256 over the provider conversation id and the
/// normalized user text. Identical deliveries map to the same key.
///
/// There is no key without a conversation id; deliveries lacking one are
/// never collapsed.
pub fn dedupe_key(conversation_id: &str, normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(conversation_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cut `text` to at most `max_chars` characters (not bytes).
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_owned(),
        None => text.to_owned(),
    }
}

use serde_json::Value;

pub(crate) const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum BodyReadError {
    #[error("response too large: {size} exceeds {max} bytes")]
    TooLarge { size: u64, max: usize },
    #[error("failed reading response chunk: {0}")]
    Chunk(String),
    #[error("invalid JSON response: {0}")]
    Json(String),
}

/// Longest error-response excerpt kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

pub(crate) async fn read_body_with_limit(
    response: &mut reqwest::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, BodyReadError> {
    if let Some(length) = response.content_length()
        && length > max_bytes as u64
    {
        return Err(BodyReadError::TooLarge {
            size: length,
            max: max_bytes,
        });
    }
    let mut buffer = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|error| BodyReadError::Chunk(error.to_string()))?
    {
        append_limited_chunk(&mut buffer, &chunk, max_bytes)?;
    }
    Ok(buffer)
}

/// Parses a successful response body. An empty body is `null`.
pub(crate) fn decode_json_body(body: &[u8]) -> Result<Value, BodyReadError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|error| BodyReadError::Json(error.to_string()))
}

/// Renders an error response body as text, whatever its content type.
pub(crate) fn error_body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub(crate) fn append_limited_chunk(
    buffer: &mut Vec<u8>,
    chunk: &[u8],
    max_bytes: usize,
) -> Result<(), BodyReadError> {
    let new_len = buffer.len().saturating_add(chunk.len());
    if new_len > max_bytes {
        return Err(BodyReadError::TooLarge {
            size: new_len as u64,
            max: max_bytes,
        });
    }
    buffer.extend_from_slice(chunk);
    Ok(())
}

//! Turning whatever the peer answered into a `tools/call` result.
//!
//! Peers are loose about result shapes. In order of precedence:
//! an object with a `content` array passes through, `{data, mimeType}` or
//! `{screenshot}` becomes an image block, a string becomes text, `null`
//! becomes `"ok"`, and anything else is pretty-printed JSON.

use {
    base64::Engine,
    serde_json::{Map, Value},
    tabwire_protocol::mcp::{ToolContent, ToolsCallResult},
    tracing::debug,
};

const DEFAULT_IMAGE_MIME: &str = "image/png";

pub fn from_peer_result(value: Value) -> ToolsCallResult {
    match value {
        Value::Null => ToolsCallResult::text("ok"),
        Value::String(text) => ToolsCallResult::text(text),
        Value::Object(obj) => from_object(obj),
        other => ToolsCallResult::text(pretty(&other)),
    }
}

fn from_object(obj: Map<String, Value>) -> ToolsCallResult {
    if let Some(content) = obj.get("content").filter(|c| c.is_array()) {
        match serde_json::from_value::<Vec<ToolContent>>(content.clone()) {
            Ok(content) => {
                let is_error = obj.get("isError").and_then(Value::as_bool).unwrap_or(false);
                return ToolsCallResult { content, is_error };
            },
            Err(e) => debug!(error = %e, "peer content blocks did not parse, sending raw JSON"),
        }
    }

    let image = obj
        .get("data")
        .or_else(|| obj.get("screenshot"))
        .and_then(Value::as_str)
        .and_then(|data| image_block(data, obj.get("mimeType").and_then(Value::as_str)));
    if let Some(image) = image {
        let mut content = Vec::with_capacity(2);
        if let Some(text) = obj.get("text").and_then(Value::as_str) {
            content.push(ToolContent::text(text));
        }
        content.push(image);
        return ToolsCallResult {
            content,
            is_error: false,
        };
    }

    ToolsCallResult::text(pretty(&Value::Object(obj)))
}

/// Accepts raw base64 or a `data:<mime>;base64,` URL. Anything that is not
/// valid base64 is left for the JSON fallback.
fn image_block(data: &str, mime_type: Option<&str>) -> Option<ToolContent> {
    let (url_mime, payload) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',')?;
            let mime = header.strip_suffix(";base64")?;
            (Some(mime), payload)
        },
        None => (None, data),
    };
    if payload.is_empty() || base64::engine::general_purpose::STANDARD.decode(payload).is_err() {
        return None;
    }
    let mime_type = mime_type
        .or(url_mime)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_IMAGE_MIME);
    Some(ToolContent::Image {
        data: payload.to_string(),
        mime_type: mime_type.to_string(),
    })
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn null_and_strings_become_text() {
        assert_eq!(from_peer_result(Value::Null), ToolsCallResult::text("ok"));
        assert_eq!(
            from_peer_result(json!("Navigated to https://example.com")),
            ToolsCallResult::text("Navigated to https://example.com")
        );
    }

    #[test]
    fn content_arrays_pass_through() {
        let result = from_peer_result(json!({
            "content": [{"type": "text", "text": "done"}],
            "isError": true,
        }));
        assert_eq!(result.content, vec![ToolContent::text("done")]);
        assert!(result.is_error);
    }

    #[test]
    fn screenshot_data_becomes_an_image_with_caption() {
        let result = from_peer_result(json!({
            "data": "aGVsbG8=",
            "mimeType": "image/jpeg",
            "text": "viewport 1280x720",
        }));
        assert_eq!(result.content, vec![
            ToolContent::text("viewport 1280x720"),
            ToolContent::Image {
                data: "aGVsbG8=".into(),
                mime_type: "image/jpeg".into(),
            },
        ]);
    }

    #[test]
    fn data_urls_are_unwrapped() {
        let result = from_peer_result(json!({"screenshot": "data:image/webp;base64,aGVsbG8="}));
        assert_eq!(result.content, vec![ToolContent::Image {
            data: "aGVsbG8=".into(),
            mime_type: "image/webp".into(),
        }]);
    }

    #[test]
    fn non_base64_data_falls_back_to_json() {
        let result = from_peer_result(json!({"data": "not base64!"}));
        let ToolContent::Text { text } = &result.content[0] else {
            panic!("expected text");
        };
        assert!(text.contains("not base64!"));
    }

    #[test]
    fn other_values_are_pretty_json() {
        let result = from_peer_result(json!([{"id": 1, "title": "Docs"}]));
        assert_eq!(
            result,
            ToolsCallResult::text("[\n  {\n    \"id\": 1,\n    \"title\": \"Docs\"\n  }\n]")
        );
    }
}

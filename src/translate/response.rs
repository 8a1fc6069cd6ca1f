use super::anthropic_types::{ImageSource, MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::{ChatCompletionResponse, ChatUsage};
use crate::error::{BridgeError, Result};

pub const DEFAULT_STOP_REASON: &str = "end_turn";

/// Translate a completed backend response into a client Messages response.
/// `requested_model` is echoed back as the client asked for it, before alias resolution.
pub fn openai_to_anthropic(
    resp: &ChatCompletionResponse,
    requested_model: &str,
) -> Result<MessagesResponse> {
    let choice = resp
        .choices
        .first()
        .ok_or_else(|| BridgeError::protocol("backend response contained no choices"))?;

    let mut content = match &choice.message.content {
        Some(value) => content_blocks(value),
        None => Vec::new(),
    };

    // Reasoning-only answers still deserve a visible reply.
    if content.is_empty() {
        if let Some(reasoning) = choice
            .message
            .reasoning_content
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            content.push(ResponseContentBlock::Text {
                text: reasoning.to_string(),
            });
        }
    }

    // The client protocol requires at least one content block.
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    Ok(MessagesResponse {
        id: message_id(&resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: requested_model.to_string(),
        stop_reason: Some(map_finish_reason(choice.finish_reason.as_deref()).to_string()),
        stop_sequence: None,
        usage: map_usage(resp.usage.as_ref()),
    })
}

/// Map a backend finish reason to a client stop reason.
pub fn map_finish_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("length") => "max_tokens",
        Some("tool_calls" | "function_call") => "tool_use",
        // stop, content_filter, unset and anything unrecognised
        _ => DEFAULT_STOP_REASON,
    }
}

pub fn map_usage(usage: Option<&ChatUsage>) -> Usage {
    usage.map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    })
}

/// Backend ids are reused with a `msg_` prefix; a missing id gets a fresh one.
pub fn message_id(backend_id: &str) -> String {
    let trimmed = backend_id.trim_start_matches("chatcmpl-");
    if trimmed.is_empty() {
        new_message_id()
    } else {
        format!("msg_{trimmed}")
    }
}

pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

fn content_blocks(value: &serde_json::Value) -> Vec<ResponseContentBlock> {
    match value {
        serde_json::Value::String(text) if !text.is_empty() => {
            vec![ResponseContentBlock::Text { text: text.clone() }]
        }
        serde_json::Value::Array(parts) => parts.iter().filter_map(content_part).collect(),
        _ => Vec::new(),
    }
}

fn content_part(part: &serde_json::Value) -> Option<ResponseContentBlock> {
    match part.get("type")?.as_str()? {
        "text" => {
            let text = part.get("text")?.as_str()?;
            (!text.is_empty()).then(|| ResponseContentBlock::Text {
                text: text.to_string(),
            })
        }
        "image_url" => {
            // `{"image_url": {"url": ..}}` or the flat `{"image_url": ".."}`
            let image_url = part.get("image_url")?;
            let url = image_url
                .get("url")
                .and_then(serde_json::Value::as_str)
                .or_else(|| image_url.as_str())
                .filter(|u| !u.is_empty())?;
            Some(ResponseContentBlock::Image {
                source: image_source(url),
            })
        }
        _ => None,
    }
}

/// `data:` URIs come back as inline base64 sources, anything else as a URL source.
fn image_source(url: &str) -> ImageSource {
    if let Some((header, data)) = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    {
        return ImageSource {
            source_type: "base64".to_string(),
            media_type: Some(header.to_string()),
            data: Some(data.to_string()),
            url: None,
        };
    }
    ImageSource {
        source_type: "url".to_string(),
        media_type: None,
        data: None,
        url: Some(url.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::translate::openai_types::*;

    fn make_response(content: Option<serde_json::Value>, finish_reason: Option<&str>) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content,
                    reasoning_content: None,
                },
                finish_reason: finish_reason.map(String::from),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 5,
                completion_tokens: 7,
                total_tokens: 12,
            }),
        }
    }

    #[test]
    fn test_simple_text_response() {
        let resp = make_response(Some(serde_json::json!("Hello!")), Some("stop"));
        let result = openai_to_anthropic(&resp, "sonnet").unwrap();

        assert_eq!(result.id, "msg_abc123");
        assert_eq!(result.role, "assistant");
        assert_eq!(result.model, "sonnet");
        assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: "Hello!".to_string()
            }]
        );
        assert_eq!(result.usage, Usage { input_tokens: 5, output_tokens: 7 });
    }

    #[test]
    fn test_zero_choices_is_protocol_error() {
        let mut resp = make_response(None, None);
        resp.choices.clear();
        let err = openai_to_anthropic(&resp, "m").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamProtocol);
    }

    #[test]
    fn test_unrepresentable_content_yields_empty_text_block() {
        for content in [None, Some(serde_json::json!("")), Some(serde_json::json!(42))] {
            let result = openai_to_anthropic(&make_response(content, Some("stop")), "m").unwrap();
            assert_eq!(
                result.content,
                vec![ResponseContentBlock::Text { text: String::new() }]
            );
        }
    }

    #[test]
    fn test_part_array_with_images() {
        let resp = make_response(
            Some(serde_json::json!([
                {"type": "text", "text": "here"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                {"type": "image_url", "image_url": "https://example.com/x.png"},
                {"type": "audio", "data": "ignored"}
            ])),
            Some("length"),
        );
        let result = openai_to_anthropic(&resp, "m").unwrap();
        assert_eq!(result.content.len(), 3);
        assert_eq!(result.stop_reason.as_deref(), Some("max_tokens"));

        let ResponseContentBlock::Image { source } = &result.content[1] else {
            panic!("expected image block");
        };
        assert_eq!(source.source_type, "base64");
        assert_eq!(source.media_type.as_deref(), Some("image/png"));
        assert_eq!(source.data.as_deref(), Some("AAAA"));

        let ResponseContentBlock::Image { source } = &result.content[2] else {
            panic!("expected image block");
        };
        assert_eq!(source.url.as_deref(), Some("https://example.com/x.png"));
    }

    #[test]
    fn test_reasoning_only_answer() {
        let mut resp = make_response(None, Some("stop"));
        resp.choices[0].message.reasoning_content = Some("thinking out loud".to_string());
        let result = openai_to_anthropic(&resp, "m").unwrap();
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: "thinking out loud".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_usage_and_id() {
        let mut resp = make_response(Some(serde_json::json!("x")), None);
        resp.usage = None;
        resp.id = String::new();
        let result = openai_to_anthropic(&resp, "m").unwrap();
        assert_eq!(result.usage, Usage::default());
        assert!(result.id.starts_with("msg_"));
        assert!(result.id.len() > 10);
        assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("stop")), "end_turn");
        assert_eq!(map_finish_reason(Some("length")), "max_tokens");
        assert_eq!(map_finish_reason(Some("content_filter")), "end_turn");
        assert_eq!(map_finish_reason(Some("tool_calls")), "tool_use");
        assert_eq!(map_finish_reason(Some("function_call")), "tool_use");
        assert_eq!(map_finish_reason(None), "end_turn");
        assert_eq!(map_finish_reason(Some("unknown")), "end_turn");
    }
}

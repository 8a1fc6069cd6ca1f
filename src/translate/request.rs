//! Translate client Messages requests into backend Chat Completions requests.
//!
//! Validation runs first and rejects the whole request on the first violation.
//! Translation then maps one client message to exactly one backend message, so the
//! backend message count is the client count plus one when a system prompt is set.

use super::anthropic_types::{ContentBlock, ImageSource, Message, MessagesRequest};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatMessage, ContentPart, ImageUrlDetail, StreamOptions,
};
use crate::error::{BridgeError, Result};
use crate::models::ModelAliasTable;

pub const DEFAULT_MAX_TOKENS_CEILING: u64 = 200_000;

/// Validate and translate a client request. Pure: no I/O, no logging.
pub fn anthropic_to_openai(
    req: &MessagesRequest,
    models: &ModelAliasTable,
    max_tokens_ceiling: u64,
) -> Result<ChatCompletionRequest> {
    validate_request(req, max_tokens_ceiling)?;

    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = system_text(req) {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: ChatContent::Text(system),
        });
    }

    messages.extend(req.messages.iter().map(translate_message));

    let mut extra = serde_json::Map::new();
    if let Some(top_k) = req.top_k {
        extra.insert("top_k".to_string(), top_k.into());
    }

    let streaming = req.stream == Some(true);

    Ok(ChatCompletionRequest {
        model: models.resolve(&req.model),
        messages,
        // validated positive above
        max_tokens: u64::try_from(req.max_tokens).ok(),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options: streaming.then_some(StreamOptions {
            include_usage: true,
        }),
        stop: req.stop_sequences.clone().filter(|s| !s.is_empty()),
        user: req
            .metadata
            .as_ref()
            .and_then(|m| m.user_id.clone())
            .filter(|u| !u.is_empty()),
        extra,
    })
}

pub fn validate_request(req: &MessagesRequest, max_tokens_ceiling: u64) -> Result<()> {
    if req.model.trim().is_empty() {
        return Err(BridgeError::invalid_request("model is required"));
    }

    if req.max_tokens <= 0 {
        return Err(BridgeError::invalid_request("max_tokens must be positive"));
    }
    if u64::try_from(req.max_tokens).map_or(true, |n| n > max_tokens_ceiling) {
        return Err(BridgeError::invalid_request(format!(
            "max_tokens cannot exceed {max_tokens_ceiling}"
        )));
    }

    if req.messages.is_empty() {
        return Err(BridgeError::invalid_request("messages cannot be empty"));
    }

    check_unit_range("temperature", req.temperature)?;
    check_unit_range("top_p", req.top_p)?;

    if req.top_k.is_some_and(|k| k < 0) {
        return Err(BridgeError::invalid_request("top_k must be non-negative"));
    }

    for (i, msg) in req.messages.iter().enumerate() {
        validate_message(msg, i)?;
    }

    Ok(())
}

fn check_unit_range(name: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(BridgeError::invalid_request(format!(
            "{name} must be between 0 and 1"
        ))),
        _ => Ok(()),
    }
}

fn validate_message(msg: &Message, index: usize) -> Result<()> {
    if msg.role != "user" && msg.role != "assistant" {
        return Err(BridgeError::invalid_request(format!(
            "invalid role at message {index}: {:?}",
            msg.role
        )));
    }

    let blocks = msg.content.blocks();
    if blocks.is_empty() {
        return Err(BridgeError::invalid_request(format!(
            "message {index} content cannot be empty"
        )));
    }

    for (j, block) in blocks.iter().enumerate() {
        match block {
            ContentBlock::Text { text } if text.is_empty() => {
                return Err(BridgeError::invalid_request(format!(
                    "text content cannot be empty at message {index}, content {j}"
                )));
            }
            ContentBlock::Image { source, image_url }
                if image_reference(source.as_ref(), image_url.as_deref()).is_none() =>
            {
                return Err(BridgeError::invalid_request(format!(
                    "image content must have either image_url or source at message {index}, content {j}"
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

fn system_text(req: &MessagesRequest) -> Option<String> {
    req.system
        .as_ref()
        .map(super::anthropic_types::SystemContent::as_text)
        .filter(|s| !s.is_empty())
}

fn translate_message(msg: &Message) -> ChatMessage {
    let blocks = msg.content.blocks();
    let parts: Vec<ContentPart> = blocks.iter().filter_map(translate_block).collect();

    ChatMessage {
        role: msg.role.clone(),
        content: collapse_content_parts(parts),
    }
}

fn translate_block(block: &ContentBlock) -> Option<ContentPart> {
    match block {
        ContentBlock::Text { text } => Some(ContentPart::Text { text: text.clone() }),
        ContentBlock::Image { source, image_url } => {
            image_reference(source.as_ref(), image_url.as_deref()).map(|url| ContentPart::ImageUrl {
                image_url: ImageUrlDetail { url, detail: None },
            })
        }
    }
}

/// The URL a backend should fetch for an image block: an explicit `image_url`,
/// a remote source, or a `data:` URI built from inline base64.
fn image_reference(source: Option<&ImageSource>, image_url: Option<&str>) -> Option<String> {
    if let Some(url) = image_url.filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }
    let source = source?;
    if let Some(url) = source.url.as_deref().filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }
    let data = source.data.as_deref().filter(|d| !d.is_empty())?;
    let media_type = source.media_type.as_deref().unwrap_or("image/png");
    Some(format!("data:{media_type};base64,{data}"))
}

fn collapse_content_parts(parts: Vec<ContentPart>) -> ChatContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return ChatContent::Text(text.clone());
        }
    }
    ChatContent::Parts(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::translate::anthropic_types::*;

    fn request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "sonnet".to_string(),
            max_tokens: 100,
            messages,
            ..MessagesRequest::default()
        }
    }

    fn user(text: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    fn translate(req: &MessagesRequest) -> Result<ChatCompletionRequest> {
        anthropic_to_openai(req, &ModelAliasTable::with_defaults(), DEFAULT_MAX_TOKENS_CEILING)
    }

    fn invalid(req: &MessagesRequest) -> String {
        let err = translate(req).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        err.message
    }

    #[test]
    fn test_simple_text_request() {
        let mut req = request(vec![user("Hello")]);
        req.system = Some(SystemContent::Text("You are helpful".to_string()));
        req.stop_sequences = Some(vec!["END".to_string()]);

        let result = translate(&req).unwrap();

        assert_eq!(result.model, crate::models::DEFAULT_SONNET_MODEL);
        assert_eq!(result.messages.len(), 2); // system + user
        assert_eq!(result.messages[0].role, "system");
        assert_eq!(result.messages[1].role, "user");
        assert_eq!(result.messages[1].content, ChatContent::Text("Hello".to_string()));
        assert_eq!(result.max_tokens, Some(100));
        assert_eq!(result.stop, Some(vec!["END".to_string()]));
        assert_eq!(result.stream, None);
        assert_eq!(result.stream_options, None);
    }

    #[test]
    fn test_message_count_tracks_system_prompt() {
        let convo = vec![
            user("a"),
            Message {
                role: "assistant".to_string(),
                content: MessageContent::Text("b".to_string()),
            },
            user("c"),
        ];

        let without = translate(&request(convo.clone())).unwrap();
        assert_eq!(without.messages.len(), 3);

        let mut with_system = request(convo.clone());
        with_system.system = Some(SystemContent::Blocks(vec![SystemBlock::Text {
            text: "rules".to_string(),
        }]));
        assert_eq!(translate(&with_system).unwrap().messages.len(), 4);

        // an empty system prompt counts as absent
        let mut empty_system = request(convo);
        empty_system.system = Some(SystemContent::Text(String::new()));
        assert_eq!(translate(&empty_system).unwrap().messages.len(), 3);
    }

    #[test]
    fn test_mixed_blocks_map_element_wise() {
        let req = request(vec![Message {
            role: "user".to_string(),
            content: MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "what is this?".to_string(),
                },
                ContentBlock::Image {
                    source: Some(ImageSource {
                        source_type: "base64".to_string(),
                        media_type: Some("image/jpeg".to_string()),
                        data: Some("QUJD".to_string()),
                        url: None,
                    }),
                    image_url: None,
                },
                ContentBlock::Image {
                    source: None,
                    image_url: Some("https://example.com/a.png".to_string()),
                },
            ]),
        }]);

        let result = translate(&req).unwrap();
        let ChatContent::Parts(parts) = &result.messages[0].content else {
            panic!("expected content parts");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[1], ContentPart::ImageUrl { image_url } if image_url.url == "data:image/jpeg;base64,QUJD"));
        assert!(matches!(&parts[2], ContentPart::ImageUrl { image_url } if image_url.url == "https://example.com/a.png"));
    }

    #[test]
    fn test_single_text_block_collapses_to_string() {
        let req = request(vec![Message {
            role: "user".to_string(),
            content: MessageContent::Blocks(vec![ContentBlock::Text {
                text: "only".to_string(),
            }]),
        }]);
        let result = translate(&req).unwrap();
        assert_eq!(result.messages[0].content, ChatContent::Text("only".to_string()));
    }

    #[test]
    fn test_streaming_flag_and_extensions() {
        let mut req = request(vec![user("hi")]);
        req.stream = Some(true);
        req.top_k = Some(40);
        req.temperature = Some(0.5);
        req.metadata = Some(Metadata {
            user_id: Some("user-42".to_string()),
        });

        let result = translate(&req).unwrap();
        assert_eq!(result.stream, Some(true));
        assert_eq!(result.stream_options, Some(StreamOptions { include_usage: true }));
        assert_eq!(result.extra.get("top_k"), Some(&serde_json::json!(40)));
        assert_eq!(result.user.as_deref(), Some("user-42"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["top_k"], 40);
        assert_eq!(json["temperature"], 0.5);

        req.stream = Some(false);
        let result = translate(&req).unwrap();
        assert_eq!(result.stream, Some(false));
        assert!(result.stream_options.is_none());
    }

    #[test]
    fn test_unmapped_model_passes_through() {
        let mut req = request(vec![user("hi")]);
        req.model = "some-unknown-model".to_string();
        assert_eq!(translate(&req).unwrap().model, "some-unknown-model");
    }

    #[test]
    fn test_rejects_bad_top_level_fields() {
        let mut req = request(vec![user("hi")]);
        req.model = String::new();
        assert!(invalid(&req).contains("model"));

        let mut req = request(vec![user("hi")]);
        req.max_tokens = 0;
        assert!(invalid(&req).contains("max_tokens"));

        let mut req = request(vec![user("hi")]);
        req.max_tokens = -5;
        assert!(invalid(&req).contains("max_tokens"));

        let mut req = request(vec![user("hi")]);
        req.max_tokens = 200_001;
        assert!(invalid(&req).contains("200000"));

        assert!(invalid(&request(vec![])).contains("messages"));

        let mut req = request(vec![user("hi")]);
        req.temperature = Some(1.5);
        assert!(invalid(&req).contains("temperature"));

        let mut req = request(vec![user("hi")]);
        req.top_p = Some(-0.1);
        assert!(invalid(&req).contains("top_p"));

        let mut req = request(vec![user("hi")]);
        req.top_k = Some(-1);
        assert!(invalid(&req).contains("top_k"));
    }

    #[test]
    fn test_rejects_bad_messages() {
        let req = request(vec![Message {
            role: "system".to_string(),
            content: MessageContent::Text("x".to_string()),
        }]);
        assert!(invalid(&req).contains("invalid role at message 0"));

        let req = request(vec![user("ok"), Message {
            role: "user".to_string(),
            content: MessageContent::Blocks(vec![]),
        }]);
        assert!(invalid(&req).contains("message 1 content cannot be empty"));

        assert!(invalid(&request(vec![user("")])).contains("text content cannot be empty"));

        let req = request(vec![Message {
            role: "user".to_string(),
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                source: None,
                image_url: None,
            }]),
        }]);
        assert!(invalid(&req).contains("image content"));

        // a source with neither data nor url is no better than none at all
        let req = request(vec![Message {
            role: "user".to_string(),
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                source: Some(ImageSource {
                    source_type: "base64".to_string(),
                    media_type: Some("image/png".to_string()),
                    data: None,
                    url: None,
                }),
                image_url: None,
            }]),
        }]);
        assert!(invalid(&req).contains("image content"));
    }

    #[test]
    fn test_boundary_values_are_accepted() {
        let mut req = request(vec![user("hi")]);
        req.max_tokens = 200_000;
        req.temperature = Some(0.0);
        req.top_p = Some(1.0);
        req.top_k = Some(0);
        assert!(translate(&req).is_ok());
    }
}

//! Image content detection.

use metering_core::{ContentBlock, ImageSource, MessageContent, MessageRequest};
use serde_json::{json, Value};

/// Image statistics for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisionDetectionResult {
    /// Whether any image block was found
    pub has_vision_content: bool,
    /// Number of image blocks, inline or by URL
    pub image_count: usize,
    /// Estimated decoded size of inline images
    pub total_image_size_bytes: u64,
    /// Media types of inline images, first-seen order
    pub media_types: Vec<String>,
}

/// Decoded size of a base64 payload, ignoring up to two `=` pad chars
#[must_use]
pub fn estimate_decoded_size(data: &str) -> u64 {
    let bytes = data.as_bytes();
    let padding = bytes.iter().rev().take(2).take_while(|&&b| b == b'=').count();
    ((bytes.len() - padding) * 3 / 4) as u64
}

/// Scan every message's content blocks for images
#[must_use]
pub fn detect(request: &MessageRequest) -> VisionDetectionResult {
    let mut result = VisionDetectionResult::default();

    for message in &request.messages {
        let MessageContent::Blocks(blocks) = &message.content else {
            continue;
        };
        for block in blocks {
            let ContentBlock::Image { source } = block else {
                continue;
            };
            result.has_vision_content = true;
            result.image_count += 1;

            if let ImageSource::Base64 { media_type, data } = source {
                if !media_type.is_empty() && !result.media_types.contains(media_type) {
                    result.media_types.push(media_type.clone());
                }
                result.total_image_size_bytes += estimate_decoded_size(data);
            }
        }
    }

    result
}

/// Payload `attributes` object, or `None` without images
#[must_use]
pub fn vision_attributes(result: &VisionDetectionResult) -> Option<Value> {
    if !result.has_vision_content {
        return None;
    }
    Some(json!({
        "vision_image_count": result.image_count,
        "vision_total_size_bytes": result.total_image_size_bytes,
        "vision_media_types": result.media_types,
    }))
}

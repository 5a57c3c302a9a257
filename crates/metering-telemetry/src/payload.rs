//! Telemetry payload assembly.
//!
//! The payload is a flat JSON object. Computed fields are written first,
//! caller metadata is merged without touching reserved keys, and the
//! optional vision and prompt sections are appended last.

use crate::prompt::PromptData;
use crate::vision::{vision_attributes, VisionDetectionResult};
use chrono::{DateTime, SecondsFormat, Utc};
use metering_config::MeteringConfig;
use metering_core::{StopReason, UsageMetadata, UsageRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Fixed cost category
pub const COST_TYPE: &str = "AI";
/// Fixed operation category
pub const OPERATION_TYPE: &str = "CHAT";

/// Body sent to the metering collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryPayload(Map<String, Value>);

impl TelemetryPayload {
    /// Look up a field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether a field is present
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Transaction id carried by the payload
    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        self.0.get("transactionId").and_then(Value::as_str)
    }

    /// Borrow the underlying object
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a JSON value
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builder for [`TelemetryPayload`]
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    record: UsageRecord,
    metadata: UsageMetadata,
    organization_id: Option<String>,
    product_id: Option<String>,
    middleware_source: String,
    vision: Option<VisionDetectionResult>,
    prompts: Option<PromptData>,
}

impl PayloadBuilder {
    /// Start from a usage record
    #[must_use]
    pub fn new(record: UsageRecord) -> Self {
        Self {
            record,
            metadata: UsageMetadata::new(),
            organization_id: None,
            product_id: None,
            middleware_source: MeteringConfig::MIDDLEWARE_SOURCE.to_string(),
            vision: None,
            prompts: None,
        }
    }

    /// Caller metadata for this call
    #[must_use]
    pub fn metadata(mut self, metadata: UsageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Organization and product ids used when the caller set none
    #[must_use]
    pub fn defaults_from(mut self, config: &MeteringConfig) -> Self {
        self.organization_id = config.organization_id().map(ToString::to_string);
        self.product_id = config.product_id().map(ToString::to_string);
        self
    }

    /// Override the reported middleware source
    #[must_use]
    pub fn middleware_source(mut self, source: impl Into<String>) -> Self {
        self.middleware_source = source.into();
        self
    }

    /// Image statistics of the request
    #[must_use]
    pub fn vision(mut self, vision: VisionDetectionResult) -> Self {
        self.vision = Some(vision);
        self
    }

    /// Captured prompt and response text
    #[must_use]
    pub fn prompts(mut self, prompts: PromptData) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Assemble the payload
    #[must_use]
    pub fn build(self) -> TelemetryPayload {
        let record = &self.record;
        let timing = &record.timing;
        let mut map = Map::new();

        map.insert("stopReason".into(), record.stop_reason.as_str().into());
        map.insert("costType".into(), COST_TYPE.into());
        map.insert("isStreamed".into(), record.is_streamed.into());
        map.insert("operationType".into(), OPERATION_TYPE.into());
        map.insert("inputTokenCount".into(), record.input_tokens.into());
        map.insert("outputTokenCount".into(), record.output_tokens.into());
        map.insert("reasoningTokenCount".into(), 0.into());
        map.insert("cacheCreationTokenCount".into(), record.cache_creation_tokens.into());
        map.insert("cacheReadTokenCount".into(), record.cache_read_tokens.into());
        map.insert("totalTokenCount".into(), record.total_tokens.into());
        map.insert("model".into(), record.model.clone().into());
        map.insert("transactionId".into(), Uuid::new_v4().to_string().into());
        map.insert("requestTime".into(), timestamp(timing.request_time).into());
        map.insert("responseTime".into(), timestamp(timing.response_time).into());
        map.insert(
            "completionStartTime".into(),
            timestamp(timing.completion_start_time).into(),
        );
        map.insert(
            "requestDuration".into(),
            (timing.request_duration.as_millis() as u64).into(),
        );
        map.insert(
            "timeToFirstToken".into(),
            (timing.time_to_first_token.as_millis() as u64).into(),
        );
        map.insert("provider".into(), record.provider.display_name().into());
        map.insert("middlewareSource".into(), self.middleware_source.into());

        for (key, value) in self.metadata.passthrough() {
            map.insert(key.clone(), value.clone());
        }
        if self.metadata.contains("errorReason") {
            map.insert("stopReason".into(), StopReason::Error.as_str().into());
        }

        if let Some(org) = self.organization_id {
            map.entry("organizationId").or_insert(Value::String(org));
        }
        if let Some(product) = self.product_id {
            map.entry("productId").or_insert(Value::String(product));
        }

        if let Some(attributes) = self.vision.as_ref().and_then(vision_attributes) {
            map.insert("hasVisionContent".into(), true.into());
            map.insert("attributes".into(), attributes);
        }

        if let Some(prompts) = self.prompts {
            if let Some(system) = prompts.system_prompt {
                map.insert("systemPrompt".into(), system.into());
            }
            if let Some(messages) = prompts.input_messages {
                map.insert("inputMessages".into(), messages.into());
            }
            if let Some(output) = prompts.output_response {
                map.insert("outputResponse".into(), output.into());
            }
            if prompts.truncated {
                map.insert("promptsTruncated".into(), true.into());
            }
        }

        TelemetryPayload(map)
    }
}

//! Provider trait and provider identity.

use crate::request::MessageRequest;
use crate::response::MessageResponse;
use crate::streaming::EventStream;
use crate::MeterResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Which provider family answered a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// The vendor's own API
    Anthropic,
    /// AWS Bedrock inference gateway
    Bedrock,
}

impl ProviderKind {
    /// Name reported to the collector
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Anthropic => "Anthropic",
            Self::Bedrock => "Amazon Bedrock",
        }
    }

    /// Short identifier used in logs and errors
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Bedrock => "bedrock",
        }
    }

    /// Whether this is the direct API
    #[must_use]
    pub fn is_anthropic(self) -> bool {
        self == Self::Anthropic
    }

    /// Whether this is the cloud gateway
    #[must_use]
    pub fn is_bedrock(self) -> bool {
        self == Self::Bedrock
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The capability the metering core needs from an LLM client
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider family
    fn kind(&self) -> ProviderKind;

    /// Create a message
    async fn create_message(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
    ) -> MeterResult<MessageResponse>;

    /// Open a message stream
    async fn create_message_stream(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
    ) -> MeterResult<EventStream>;
}

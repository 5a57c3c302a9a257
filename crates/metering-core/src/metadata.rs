//! Caller-supplied usage metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Payload keys computed by the metering pipeline. Caller values for these
/// keys are dropped when the payload is built.
pub const RESERVED_KEYS: &[&str] = &[
    "stopReason",
    "costType",
    "isStreamed",
    "operationType",
    "inputTokenCount",
    "outputTokenCount",
    "reasoningTokenCount",
    "cacheCreationTokenCount",
    "cacheReadTokenCount",
    "totalTokenCount",
    "model",
    "provider",
    "requestTime",
    "responseTime",
    "completionStartTime",
    "requestDuration",
    "timeToFirstToken",
    "middlewareSource",
    "hasVisionContent",
    "attributes",
    "systemPrompt",
    "inputMessages",
    "outputResponse",
    "promptsTruncated",
];

/// Whether `key` is computed by the pipeline
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Open key/value business context attached to a single call.
///
/// Keys use the collector's camelCase names. Typed setters cover the fields
/// the collector understands; [`UsageMetadata::insert`] accepts anything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageMetadata(BTreeMap<String, Value>);

macro_rules! string_setter {
    ($($(#[$doc:meta])* $name:ident => $key:literal),* $(,)?) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $name(self, value: impl Into<String>) -> Self {
                self.insert($key, Value::String(value.into()))
            }
        )*
    };
}

impl UsageMetadata {
    /// Empty metadata
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary key
    #[must_use]
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a key in place
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    string_setter! {
        /// Organization the usage is billed to
        organization_id => "organizationId",
        /// Product the usage is attributed to
        product_id => "productId",
        /// Kind of task, e.g. `summarize`
        task_type => "taskType",
        /// Agent name
        agent => "agent",
        /// Subscription identifier
        subscription_id => "subscriptionId",
        /// Distributed trace id
        trace_id => "traceId",
        /// Task identifier
        task_id => "taskId",
        /// Caller-supplied transaction id; a UUID is generated otherwise
        transaction_id => "transactionId",
        /// Trace category
        trace_type => "traceType",
        /// Human-readable trace name
        trace_name => "traceName",
        /// Deployment environment
        environment => "environment",
        /// Deployment region
        region => "region",
        /// Alias of the credential used for the call
        credential_alias => "credentialAlias",
        /// Parent transaction for nested calls
        parent_transaction_id => "parentTransactionId",
        /// Error description; forces the stop reason to `ERROR`
        error_reason => "errorReason",
    }

    /// Subscriber object (`id`, `email`, `credential`)
    #[must_use]
    pub fn subscriber(self, subscriber: Value) -> Self {
        self.insert("subscriber", subscriber)
    }

    /// Quality score between 0 and 1
    #[must_use]
    pub fn response_quality_score(self, score: f64) -> Self {
        self.insert("responseQualityScore", score)
    }

    /// Retry counter maintained by the caller
    #[must_use]
    pub fn retry_number(self, retry: u32) -> Self {
        self.insert("retryNumber", retry)
    }

    /// Look up a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether a key is present
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Entries whose keys are not computed by the pipeline
    pub fn passthrough(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().filter(|(k, _)| !is_reserved(k))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for UsageMetadata {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for UsageMetadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Attribute name that carries the trace id of a span record.
pub const KEY_TRACE_ID: &str = "traceId";

/// Attribute name that carries the span id (guid) of a span record.
pub const KEY_GUID: &str = "guid";

/// Which of a span record's three attribute maps an attribute belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeClassification {
    Intrinsics,
    AgentAttributes,
    UserAttributes,
}

impl AttributeClassification {
    /// All classifications, in wire order.
    pub const ALL: [Self; 3] = [
        Self::Intrinsics,
        Self::AgentAttributes,
        Self::UserAttributes,
    ];

    #[inline]
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Intrinsics => 0,
            Self::AgentAttributes => 1,
            Self::UserAttributes => 2,
        }
    }
}

impl fmt::Display for AttributeClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Intrinsics => "intrinsics",
            Self::AgentAttributes => "agentAttributes",
            Self::UserAttributes => "userAttributes",
        })
    }
}

/// Static description of an attribute: its name and destination map.
///
/// Definitions are created once and shared as `Arc<AttributeDefinition>`.
/// When `values_are_cached` is set, attribute instances bound to the
/// definition are owned by a long-lived cache and are never reset or returned
/// to the pool on release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeDefinition {
    name: Arc<str>,
    classification: AttributeClassification,
    values_are_cached: bool,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<Arc<str>>, classification: AttributeClassification) -> Self {
        Self {
            name: name.into(),
            classification,
            values_are_cached: false,
        }
    }

    pub fn intrinsic(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, AttributeClassification::Intrinsics)
    }

    pub fn agent(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, AttributeClassification::AgentAttributes)
    }

    pub fn user(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, AttributeClassification::UserAttributes)
    }

    /// Marks instances of this definition as cache-owned.
    pub fn cached(mut self) -> Self {
        self.values_are_cached = true;
        self
    }

    /// Intrinsic definition for the trace id.
    pub fn trace_id() -> Arc<Self> {
        Arc::new(Self::intrinsic(KEY_TRACE_ID))
    }

    /// Intrinsic definition for the span id.
    pub fn guid() -> Arc<Self> {
        Arc::new(Self::intrinsic(KEY_GUID))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline]
    pub fn classification(&self) -> AttributeClassification {
        self.classification
    }

    #[inline]
    pub fn values_are_cached(&self) -> bool {
        self.values_are_cached
    }

    /// Returns `true` for the names that identify a span record, whatever
    /// their classification.
    pub(crate) fn is_identity(&self) -> bool {
        &*self.name == KEY_TRACE_ID || &*self.name == KEY_GUID
    }
}

use crate::value::AttributeValue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;

/// One error observed during a transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub error_type: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Expected errors are reported but do not count against error rates
    pub is_expected: bool,
    pub custom_attributes: HashMap<String, AttributeValue>,
}

impl ErrorData {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
            occurred_at: Utc::now(),
            is_expected: false,
            custom_attributes: HashMap::new(),
        }
    }

    /// Builds an entry from any error; the source chain becomes the trace.
    pub fn from_error<E: Error + 'static>(error: &E) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        let mut data = Self::new(std::any::type_name::<E>(), error.to_string());
        if !chain.is_empty() {
            data.stack_trace = Some(chain.join("\n"));
        }
        data
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn expected(mut self) -> Self {
        self.is_expected = true;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }
}

use crate::error_data::ErrorData;
use crate::value::AttributeValue;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Immutable copy of a transaction's metadata, taken once at transaction end.
///
/// Produced by [`RequestMetadata::freeze`](crate::RequestMetadata::freeze).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSnapshot {
    pub uri: Option<String>,
    pub original_uri: Option<String>,
    pub referrer_uri: Option<String>,
    pub queue_time: Option<Duration>,

    pub request_parameters: HashMap<String, String>,
    pub user_attributes: HashMap<String, AttributeValue>,
    pub user_error_attributes: HashMap<String, AttributeValue>,

    pub http_response_status_code: Option<i32>,
    pub http_response_sub_status_code: Option<i32>,

    pub transaction_exception_datas: Vec<ErrorData>,
    pub custom_error_datas: Vec<ErrorData>,

    pub cross_application_referrer_path_hash: Option<String>,
    pub latest_cross_application_path_hash: Option<String>,
    /// Every path hash seen except the latest, at most the configured max
    pub alternate_cross_application_path_hashes: Vec<String>,
    pub cross_application_referrer_transaction_guid: Option<String>,
    pub cross_application_referrer_process_id: Option<String>,
    pub cross_application_referrer_trip_id: Option<String>,
    /// `-1` when never set
    pub cross_application_referrer_content_length: i64,
    pub cross_application_response_time_in_seconds: f32,

    pub distributed_trace_type: Option<String>,
    pub distributed_trace_app_id: Option<String>,
    pub distributed_trace_account_id: Option<String>,
    pub distributed_trace_transport_type: Option<String>,
    pub distributed_trace_guid: Option<String>,
    pub distributed_trace_transport_duration: Duration,
    pub distributed_trace_trace_id: Option<String>,
    pub distributed_trace_trust_key: Option<String>,
    pub distributed_trace_transaction_id: Option<String>,
    /// An undecided sampling flag is reported as `false`
    pub distributed_trace_sampled: bool,
    pub has_outgoing_distributed_trace_payload: bool,
    pub has_incoming_distributed_trace_payload: bool,

    pub synthetics_resource_id: Option<String>,
    pub synthetics_job_id: Option<String>,
    pub synthetics_monitor_id: Option<String>,
    pub is_synthetics: bool,
    pub has_cat_response_headers: bool,
    pub priority: f32,
}

impl MetadataSnapshot {
    /// Errors of both kinds, exceptions first.
    pub fn all_errors(&self) -> impl Iterator<Item = &ErrorData> {
        self.transaction_exception_datas
            .iter()
            .chain(&self.custom_error_datas)
    }

    pub fn is_distributed_trace_participant(&self) -> bool {
        self.distributed_trace_guid.is_some()
    }
}

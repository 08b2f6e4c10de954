//! Mutable per-transaction metadata.
//!
//! Every field is independently atomic: strings live behind `ArcSwapOption`,
//! scalars in atomics, keyed data in `DashMap`s. There is no record-wide lock,
//! so producer threads never contend on the record as a whole. The only
//! mutex-guarded pieces are the append-only error lists and the once-only
//! sampling decision.
//!
//! [`RequestMetadata::freeze`] copies field by field. A writer racing the
//! freeze may land before or after it; the snapshot is not a linearizable
//! view of the whole record.

use crate::config::MetadataLimits;
use crate::error_data::ErrorData;
use crate::invariants::debug_assert_clamped;
use crate::sampler::AdaptiveSampler;
use crate::snapshot::MetadataSnapshot;
use crate::transport::{sanitize_transport_code, TransportType};
use crate::value::AttributeValue;
use arc_swap::ArcSwapOption;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATUS_ABSENT: i32 = i32::MIN;
const QUEUE_TIME_ABSENT: u64 = u64::MAX;
const CONTENT_LENGTH_ABSENT: i64 = -1;

/// String field with whole-value atomic replacement.
#[derive(Debug, Default)]
struct AtomicText(ArcSwapOption<String>);

impl AtomicText {
    fn set(&self, value: impl Into<String>) {
        self.0.store(Some(Arc::new(value.into())));
    }

    fn get(&self) -> Option<String> {
        self.0.load_full().map(|text| text.as_ref().clone())
    }

    fn is_set(&self) -> bool {
        self.0.load().is_some()
    }

    fn is_non_empty(&self) -> bool {
        self.0.load().as_deref().is_some_and(|text| !text.is_empty())
    }
}

/// `f32` stored as its bit pattern.
#[derive(Debug, Default)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn swap(&self, value: f32) -> f32 {
        f32::from_bits(self.0.swap(value.to_bits(), Ordering::AcqRel))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    // Keep clear of the absent sentinel
    u64::try_from(duration.as_nanos()).map_or(u64::MAX - 1, |nanos| nanos.min(u64::MAX - 1))
}

fn status_from_raw(raw: i32) -> Option<i32> {
    (raw != STATUS_ABSENT).then_some(raw)
}

/// Shared mutable record for one in-flight transaction.
///
/// Safe to write from any number of threads through `&self`.
#[derive(Debug)]
pub struct RequestMetadata {
    limits: MetadataLimits,

    uri: AtomicText,
    original_uri: AtomicText,
    referrer_uri: AtomicText,
    queue_time_nanos: AtomicU64,

    request_parameters: DashMap<String, String>,
    user_attributes: DashMap<String, AttributeValue>,
    user_attribute_slots: AtomicUsize,
    user_error_attributes: DashMap<String, AttributeValue>,

    http_response_status_code: AtomicI32,
    http_response_sub_status_code: AtomicI32,

    transaction_exception_datas: Mutex<Vec<ErrorData>>,
    custom_error_datas: Mutex<Vec<ErrorData>>,

    cross_application_referrer_path_hash: AtomicText,
    cross_application_referrer_process_id: AtomicText,
    cross_application_referrer_trip_id: AtomicText,
    cross_application_referrer_transaction_guid: AtomicText,
    cross_application_referrer_content_length: AtomicI64,
    cross_application_response_time: AtomicF32,
    latest_cross_application_path_hash: AtomicText,
    all_cross_application_path_hashes: DashSet<String>,

    distributed_trace_type: AtomicText,
    distributed_trace_app_id: AtomicText,
    distributed_trace_account_id: AtomicText,
    distributed_trace_transport_type: AtomicText,
    distributed_trace_guid: AtomicText,
    distributed_trace_transport_duration_nanos: AtomicU64,
    distributed_trace_trace_id: AtomicText,
    distributed_trace_trust_key: AtomicText,
    distributed_trace_transaction_id: AtomicText,
    sampled: Mutex<Option<bool>>,
    /// Serialises sampler calls; never held together with `sampled`
    sampling: Mutex<()>,
    has_outgoing_distributed_trace_payload: AtomicBool,
    has_incoming_distributed_trace_payload: AtomicBool,

    synthetics_resource_id: AtomicText,
    synthetics_job_id: AtomicText,
    synthetics_monitor_id: AtomicText,
    has_cat_response_headers: AtomicBool,
    priority: AtomicF32,
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(MetadataLimits::default())
    }
}

impl RequestMetadata {
    pub fn new(limits: MetadataLimits) -> Self {
        Self {
            limits,
            uri: AtomicText::default(),
            original_uri: AtomicText::default(),
            referrer_uri: AtomicText::default(),
            queue_time_nanos: AtomicU64::new(QUEUE_TIME_ABSENT),
            request_parameters: DashMap::new(),
            user_attributes: DashMap::new(),
            user_attribute_slots: AtomicUsize::new(0),
            user_error_attributes: DashMap::new(),
            http_response_status_code: AtomicI32::new(STATUS_ABSENT),
            http_response_sub_status_code: AtomicI32::new(STATUS_ABSENT),
            transaction_exception_datas: Mutex::new(Vec::new()),
            custom_error_datas: Mutex::new(Vec::new()),
            cross_application_referrer_path_hash: AtomicText::default(),
            cross_application_referrer_process_id: AtomicText::default(),
            cross_application_referrer_trip_id: AtomicText::default(),
            cross_application_referrer_transaction_guid: AtomicText::default(),
            cross_application_referrer_content_length: AtomicI64::new(CONTENT_LENGTH_ABSENT),
            cross_application_response_time: AtomicF32::default(),
            latest_cross_application_path_hash: AtomicText::default(),
            all_cross_application_path_hashes: DashSet::new(),
            distributed_trace_type: AtomicText::default(),
            distributed_trace_app_id: AtomicText::default(),
            distributed_trace_account_id: AtomicText::default(),
            distributed_trace_transport_type: AtomicText::default(),
            distributed_trace_guid: AtomicText::default(),
            distributed_trace_transport_duration_nanos: AtomicU64::new(0),
            distributed_trace_trace_id: AtomicText::default(),
            distributed_trace_trust_key: AtomicText::default(),
            distributed_trace_transaction_id: AtomicText::default(),
            sampled: Mutex::new(None),
            sampling: Mutex::new(()),
            has_outgoing_distributed_trace_payload: AtomicBool::new(false),
            has_incoming_distributed_trace_payload: AtomicBool::new(false),
            synthetics_resource_id: AtomicText::default(),
            synthetics_job_id: AtomicText::default(),
            synthetics_monitor_id: AtomicText::default(),
            has_cat_response_headers: AtomicBool::new(false),
            priority: AtomicF32::default(),
        }
    }

    pub fn limits(&self) -> &MetadataLimits {
        &self.limits
    }

    // -------------------------------------------------------------------------
    // Request
    // -------------------------------------------------------------------------

    pub fn set_uri(&self, uri: impl Into<String>) {
        self.uri.set(uri);
    }

    pub fn uri(&self) -> Option<String> {
        self.uri.get()
    }

    pub fn set_original_uri(&self, uri: impl Into<String>) {
        self.original_uri.set(uri);
    }

    pub fn original_uri(&self) -> Option<String> {
        self.original_uri.get()
    }

    pub fn set_referrer_uri(&self, uri: impl Into<String>) {
        self.referrer_uri.set(uri);
    }

    pub fn referrer_uri(&self) -> Option<String> {
        self.referrer_uri.get()
    }

    pub fn set_queue_time(&self, queue_time: Duration) {
        self.queue_time_nanos
            .store(duration_to_nanos(queue_time), Ordering::Release);
    }

    pub fn queue_time(&self) -> Option<Duration> {
        match self.queue_time_nanos.load(Ordering::Acquire) {
            QUEUE_TIME_ABSENT => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    pub fn add_request_parameter(&self, key: impl Into<String>, value: impl Into<String>) {
        self.request_parameters.insert(key.into(), value.into());
    }

    pub fn request_parameters(&self) -> HashMap<String, String> {
        self.request_parameters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Records a status code; a missing sub-status clears any previous one.
    pub fn set_http_response_status_code(&self, status_code: i32, sub_status_code: Option<i32>) {
        self.http_response_status_code
            .store(status_code, Ordering::Release);
        self.http_response_sub_status_code
            .store(sub_status_code.unwrap_or(STATUS_ABSENT), Ordering::Release);
    }

    pub fn http_response_status_code(&self) -> Option<i32> {
        status_from_raw(self.http_response_status_code.load(Ordering::Acquire))
    }

    pub fn http_response_sub_status_code(&self) -> Option<i32> {
        status_from_raw(self.http_response_sub_status_code.load(Ordering::Acquire))
    }

    // -------------------------------------------------------------------------
    // Attributes and errors
    // -------------------------------------------------------------------------

    /// Adds or replaces a user attribute.
    ///
    /// Once the record holds `user_attribute_clamp` attributes every further
    /// write is dropped, including overwrites of existing keys. Returns
    /// `true` if the value was stored.
    pub fn add_user_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) -> bool {
        let clamp = self.limits.user_attribute_clamp;

        // The shard lock for `key` is held for the whole match, so a key is
        // reserved at most once and the slot count equals the map size.
        let stored = match self.user_attributes.entry(key.into()) {
            Entry::Occupied(mut entry) => {
                if self.user_attribute_slots.load(Ordering::Acquire) >= clamp {
                    tracing::debug!(key = %entry.key(), limit = clamp, "user attribute discarded, limit reached");
                    return false;
                }
                entry.insert(value.into());
                true
            }
            Entry::Vacant(entry) => {
                let reserved = self.user_attribute_slots.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |slots| (slots < clamp).then_some(slots + 1),
                );
                if reserved.is_err() {
                    tracing::debug!(key = %entry.key(), limit = clamp, "user attribute discarded, limit reached");
                    return false;
                }
                entry.insert(value.into());
                true
            }
        };

        debug_assert_clamped!(self.user_attribute_slots.load(Ordering::Relaxed), clamp);
        stored
    }

    pub fn user_attributes(&self) -> HashMap<String, AttributeValue> {
        self.user_attributes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn user_attribute_count(&self) -> usize {
        self.user_attributes.len()
    }

    pub fn add_user_error_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.user_error_attributes.insert(key.into(), value.into());
    }

    pub fn user_error_attributes(&self) -> HashMap<String, AttributeValue> {
        self.user_error_attributes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn add_exception_data(&self, error: ErrorData) {
        self.transaction_exception_datas.lock().push(error);
    }

    pub fn add_custom_error_data(&self, error: ErrorData) {
        self.custom_error_datas.lock().push(error);
    }

    pub fn error_count(&self) -> usize {
        self.transaction_exception_datas.lock().len() + self.custom_error_datas.lock().len()
    }

    // -------------------------------------------------------------------------
    // Cross-application tracing
    // -------------------------------------------------------------------------

    pub fn set_cross_application_referrer_path_hash(&self, path_hash: impl Into<String>) {
        self.cross_application_referrer_path_hash.set(path_hash);
    }

    pub fn cross_application_referrer_path_hash(&self) -> Option<String> {
        self.cross_application_referrer_path_hash.get()
    }

    pub fn set_cross_application_referrer_process_id(&self, process_id: impl Into<String>) {
        self.cross_application_referrer_process_id.set(process_id);
    }

    pub fn cross_application_referrer_process_id(&self) -> Option<String> {
        self.cross_application_referrer_process_id.get()
    }

    pub fn set_cross_application_referrer_trip_id(&self, trip_id: impl Into<String>) {
        self.cross_application_referrer_trip_id.set(trip_id);
    }

    pub fn cross_application_referrer_trip_id(&self) -> Option<String> {
        self.cross_application_referrer_trip_id.get()
    }

    pub fn set_cross_application_referrer_transaction_guid(&self, guid: impl Into<String>) {
        self.cross_application_referrer_transaction_guid.set(guid);
    }

    pub fn cross_application_referrer_transaction_guid(&self) -> Option<String> {
        self.cross_application_referrer_transaction_guid.get()
    }

    /// Stores the referrer's content length, returning the previous value.
    pub fn set_cross_application_referrer_content_length(&self, content_length: i64) -> i64 {
        self.cross_application_referrer_content_length
            .swap(content_length, Ordering::AcqRel)
    }

    /// `-1` until set.
    pub fn cross_application_referrer_content_length(&self) -> i64 {
        self.cross_application_referrer_content_length
            .load(Ordering::Acquire)
    }

    pub fn set_cross_application_response_time_in_seconds(&self, seconds: f32) -> f32 {
        self.cross_application_response_time.swap(seconds)
    }

    pub fn cross_application_response_time_in_seconds(&self) -> f32 {
        self.cross_application_response_time.load()
    }

    /// Records the latest path hash and remembers it among all seen hashes.
    pub fn set_cross_application_path_hash(&self, path_hash: impl Into<String>) {
        let path_hash = path_hash.into();
        self.latest_cross_application_path_hash.set(path_hash.clone());
        self.all_cross_application_path_hashes.insert(path_hash);
    }

    pub fn latest_cross_application_path_hash(&self) -> Option<String> {
        self.latest_cross_application_path_hash.get()
    }

    pub fn mark_has_cat_response_headers(&self) {
        self.has_cat_response_headers.store(true, Ordering::Release);
    }

    pub fn has_cat_response_headers(&self) -> bool {
        self.has_cat_response_headers.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Distributed tracing
    // -------------------------------------------------------------------------

    pub fn set_distributed_trace_type(&self, value: impl Into<String>) {
        self.distributed_trace_type.set(value);
    }

    pub fn distributed_trace_type(&self) -> Option<String> {
        self.distributed_trace_type.get()
    }

    pub fn set_distributed_trace_app_id(&self, value: impl Into<String>) {
        self.distributed_trace_app_id.set(value);
    }

    pub fn distributed_trace_app_id(&self) -> Option<String> {
        self.distributed_trace_app_id.get()
    }

    pub fn set_distributed_trace_account_id(&self, value: impl Into<String>) {
        self.distributed_trace_account_id.set(value);
    }

    pub fn distributed_trace_account_id(&self) -> Option<String> {
        self.distributed_trace_account_id.get()
    }

    pub fn set_distributed_trace_transport_type(&self, transport: TransportType) {
        self.distributed_trace_transport_type.set(transport.as_str());
    }

    /// Raw-code form; codes outside the known table are stored as `"Unknown"`.
    pub fn set_distributed_trace_transport_code(&self, code: i32) {
        self.distributed_trace_transport_type
            .set(sanitize_transport_code(code));
    }

    pub fn distributed_trace_transport_type(&self) -> Option<String> {
        self.distributed_trace_transport_type.get()
    }

    pub fn set_distributed_trace_guid(&self, value: impl Into<String>) {
        self.distributed_trace_guid.set(value);
    }

    pub fn distributed_trace_guid(&self) -> Option<String> {
        self.distributed_trace_guid.get()
    }

    pub fn set_distributed_trace_transport_duration(&self, duration: Duration) {
        self.distributed_trace_transport_duration_nanos
            .store(duration_to_nanos(duration), Ordering::Release);
    }

    pub fn distributed_trace_transport_duration(&self) -> Duration {
        Duration::from_nanos(
            self.distributed_trace_transport_duration_nanos
                .load(Ordering::Acquire),
        )
    }

    pub fn set_distributed_trace_trace_id(&self, value: impl Into<String>) {
        self.distributed_trace_trace_id.set(value);
    }

    pub fn distributed_trace_trace_id(&self) -> Option<String> {
        self.distributed_trace_trace_id.get()
    }

    pub fn set_distributed_trace_trust_key(&self, value: impl Into<String>) {
        self.distributed_trace_trust_key.set(value);
    }

    pub fn distributed_trace_trust_key(&self) -> Option<String> {
        self.distributed_trace_trust_key.get()
    }

    pub fn set_distributed_trace_transaction_id(&self, value: impl Into<String>) {
        self.distributed_trace_transaction_id.set(value);
    }

    pub fn distributed_trace_transaction_id(&self) -> Option<String> {
        self.distributed_trace_transaction_id.get()
    }

    /// Records an inbound sampling decision unless one is already made.
    /// Returns the decision in force afterwards.
    pub fn set_distributed_trace_sampled(&self, sampled: bool) -> bool {
        *self.sampled.lock().get_or_insert(sampled)
    }

    /// `None` until a decision is made.
    pub fn distributed_trace_sampled(&self) -> Option<bool> {
        *self.sampled.lock()
    }

    /// Asks `sampler` for a decision if none has been made yet.
    ///
    /// Only the first caller consults the sampler; it may adjust the
    /// priority. Later callers see the existing decision. The sampler runs
    /// without the decision lock held, so it may read or set the
    /// sampled flag itself; it must not call `set_sampled`.
    pub fn set_sampled(&self, sampler: &dyn AdaptiveSampler) -> bool {
        let _deciding = self.sampling.lock();
        if let Some(decided) = *self.sampled.lock() {
            return decided;
        }

        let mut priority = self.priority.load();
        let decision = sampler.compute_sampled(&mut priority);

        let mut sampled = self.sampled.lock();
        if let Some(decided) = *sampled {
            // An inbound flag arrived while the sampler ran
            return decided;
        }
        self.priority.store(priority);
        *sampled = Some(decision);
        decision
    }

    pub fn set_has_outgoing_distributed_trace_payload(&self, value: bool) {
        self.has_outgoing_distributed_trace_payload
            .store(value, Ordering::Release);
    }

    pub fn has_outgoing_distributed_trace_payload(&self) -> bool {
        self.has_outgoing_distributed_trace_payload
            .load(Ordering::Acquire)
    }

    pub fn set_has_incoming_distributed_trace_payload(&self, value: bool) {
        self.has_incoming_distributed_trace_payload
            .store(value, Ordering::Release);
    }

    pub fn has_incoming_distributed_trace_payload(&self) -> bool {
        self.has_incoming_distributed_trace_payload
            .load(Ordering::Acquire)
    }

    /// A transaction participates once it has a distributed-trace guid.
    pub fn is_distributed_trace_participant(&self) -> bool {
        self.distributed_trace_guid.is_set()
    }

    // -------------------------------------------------------------------------
    // Synthetics and priority
    // -------------------------------------------------------------------------

    pub fn set_synthetics_resource_id(&self, value: impl Into<String>) {
        self.synthetics_resource_id.set(value);
    }

    pub fn synthetics_resource_id(&self) -> Option<String> {
        self.synthetics_resource_id.get()
    }

    pub fn set_synthetics_job_id(&self, value: impl Into<String>) {
        self.synthetics_job_id.set(value);
    }

    pub fn synthetics_job_id(&self) -> Option<String> {
        self.synthetics_job_id.get()
    }

    pub fn set_synthetics_monitor_id(&self, value: impl Into<String>) {
        self.synthetics_monitor_id.set(value);
    }

    pub fn synthetics_monitor_id(&self) -> Option<String> {
        self.synthetics_monitor_id.get()
    }

    /// All three synthetics ids are present and non-empty.
    pub fn is_synthetics(&self) -> bool {
        self.synthetics_resource_id.is_non_empty()
            && self.synthetics_job_id.is_non_empty()
            && self.synthetics_monitor_id.is_non_empty()
    }

    pub fn set_priority(&self, priority: f32) {
        self.priority.store(priority);
    }

    pub fn priority(&self) -> f32 {
        self.priority.load()
    }

    // -------------------------------------------------------------------------
    // Freeze
    // -------------------------------------------------------------------------

    /// Copies every field into an immutable snapshot.
    ///
    /// Alternate path hashes are all hashes seen except the latest, capped at
    /// `alternate_path_hash_max`, in no particular order.
    pub fn freeze(&self) -> MetadataSnapshot {
        let latest = self.latest_cross_application_path_hash.get();
        let alternates = self
            .all_cross_application_path_hashes
            .iter()
            .filter(|hash| latest.as_deref() != Some(hash.key().as_str()))
            .take(self.limits.alternate_path_hash_max)
            .map(|hash| hash.key().clone())
            .collect();

        MetadataSnapshot {
            uri: self.uri(),
            original_uri: self.original_uri(),
            referrer_uri: self.referrer_uri(),
            queue_time: self.queue_time(),
            request_parameters: self.request_parameters(),
            user_attributes: self.user_attributes(),
            user_error_attributes: self.user_error_attributes(),
            http_response_status_code: self.http_response_status_code(),
            http_response_sub_status_code: self.http_response_sub_status_code(),
            transaction_exception_datas: self.transaction_exception_datas.lock().clone(),
            custom_error_datas: self.custom_error_datas.lock().clone(),
            cross_application_referrer_path_hash: self.cross_application_referrer_path_hash(),
            latest_cross_application_path_hash: latest,
            alternate_cross_application_path_hashes: alternates,
            cross_application_referrer_transaction_guid: self
                .cross_application_referrer_transaction_guid(),
            cross_application_referrer_process_id: self.cross_application_referrer_process_id(),
            cross_application_referrer_trip_id: self.cross_application_referrer_trip_id(),
            cross_application_referrer_content_length: self
                .cross_application_referrer_content_length(),
            cross_application_response_time_in_seconds: self
                .cross_application_response_time_in_seconds(),
            distributed_trace_type: self.distributed_trace_type(),
            distributed_trace_app_id: self.distributed_trace_app_id(),
            distributed_trace_account_id: self.distributed_trace_account_id(),
            distributed_trace_transport_type: self.distributed_trace_transport_type(),
            distributed_trace_guid: self.distributed_trace_guid(),
            distributed_trace_transport_duration: self.distributed_trace_transport_duration(),
            distributed_trace_trace_id: self.distributed_trace_trace_id(),
            distributed_trace_trust_key: self.distributed_trace_trust_key(),
            distributed_trace_transaction_id: self.distributed_trace_transaction_id(),
            distributed_trace_sampled: self.distributed_trace_sampled().unwrap_or(false),
            has_outgoing_distributed_trace_payload: self.has_outgoing_distributed_trace_payload(),
            has_incoming_distributed_trace_payload: self.has_incoming_distributed_trace_payload(),
            synthetics_resource_id: self.synthetics_resource_id(),
            synthetics_job_id: self.synthetics_job_id(),
            synthetics_monitor_id: self.synthetics_monitor_id(),
            is_synthetics: self.is_synthetics(),
            has_cat_response_headers: self.has_cat_response_headers(),
            priority: self.priority(),
        }
    }
}

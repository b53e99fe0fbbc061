//! Billing Domain Ports
//!
//! The billing engines persist through [`DocumentStore`] and announce what
//! happened through [`NotificationPort`]. Neither names a technology; the
//! host wires in a remote document store and a message gateway, tests wire
//! in the adapters from [`mock`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use domain_billing::ports::{DocumentStore, NotificationPort, TracingNotifier};
//!
//! let store: Arc<dyn DocumentStore> = Arc::new(RemoteStoreAdapter::connect(url).await?);
//! let notifier: Arc<dyn NotificationPort> = Arc::new(TracingNotifier);
//! let repository = BillingRepository::new(store);
//! ```

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use core_kernel::{DomainPort, HealthCheckable, PortError};
use crate::events::BillingEvent;

/// A stored document
pub type Document = Value;

/// Conjunction of field equality predicates
///
/// Fields may be dotted paths into nested objects (`billing_period.year`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds an equality predicate
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    /// Returns true if the document satisfies every predicate
    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|(field, expected)| {
            field
                .split('.')
                .try_fold(document, |value, key| value.get(key))
                .map_or(false, |actual| actual == expected)
        })
    }
}

/// One upsert inside a bulk write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperation {
    pub collection: String,
    pub id: String,
    pub document: Document,
}

impl WriteOperation {
    /// Creates an upsert
    pub fn put(collection: impl Into<String>, id: impl Into<String>, document: Document) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            document,
        }
    }
}

/// An operation the store could not apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// Position of the operation in the submitted batch
    pub index: usize,
    pub collection: String,
    pub id: String,
    pub reason: String,
}

/// Per-operation outcome of a bulk write
///
/// Operations not listed in `failures` were applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub written: usize,
    pub failures: Vec<WriteFailure>,
}

impl BulkWriteResult {
    /// Returns true if every operation was applied
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns true if the operation at `index` failed
    pub fn failed(&self, index: usize) -> bool {
        self.failures.iter().any(|f| f.index == index)
    }
}

/// Port for the document store holding accounts, bills, and ledgers
///
/// Single-document puts are atomic. A bulk write is not: it reports which
/// operations failed and leaves the others applied.
#[async_trait]
pub trait DocumentStore: DomainPort + HealthCheckable {
    /// Retrieves a document, or `PortError::NotFound`
    async fn get(&self, collection: &str, id: &str) -> Result<Document, PortError>;

    /// Retrieves every document in the collection that matches the filter
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, PortError>;

    /// Inserts or replaces a document
    async fn put(&self, collection: &str, id: &str, document: Document) -> Result<(), PortError>;

    /// Applies up to [`max_bulk_operations`](Self::max_bulk_operations)
    /// upserts; more is a `PortError::Validation`
    async fn bulk_write(&self, operations: Vec<WriteOperation>) -> Result<BulkWriteResult, PortError>;

    /// The store's per-call operation ceiling
    fn max_bulk_operations(&self) -> usize;

    /// Streams matching documents: the current ones first, then every later
    /// write that matches
    async fn watch(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<mpsc::UnboundedReceiver<Document>, PortError>;
}

/// Port for delivering billing events
#[async_trait]
pub trait NotificationPort: DomainPort {
    /// Delivers one event
    async fn notify(&self, event: BillingEvent) -> Result<(), PortError>;
}

/// Hands events to the notifier in order
///
/// A failed delivery is logged and dropped; it is never retried and never
/// reported to the caller.
pub async fn deliver(notifier: &dyn NotificationPort, events: Vec<BillingEvent>) {
    for event in events {
        let event_type = event.event_type();
        let account_id = event.account_id();
        if let Err(error) = notifier.notify(event).await {
            tracing::warn!(event_type, account_id = %account_id, error = %error, "Event delivery failed");
        }
    }
}

/// Notifier that writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl DomainPort for TracingNotifier {}

#[async_trait]
impl NotificationPort for TracingNotifier {
    async fn notify(&self, event: BillingEvent) -> Result<(), PortError> {
        tracing::info!(
            event_type = event.event_type(),
            account_id = %event.account_id(),
            "Billing event"
        );
        Ok(())
    }
}

/// In-memory adapters for tests and tooling
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use core_kernel::{AdapterHealth, HealthCheckResult};

    type Watcher = (String, Filter, mpsc::UnboundedSender<Document>);

    /// Document store backed by maps
    ///
    /// Supports fault injection: the whole store can be made unavailable,
    /// and writes to chosen document ids, or of documents matching a
    /// filter, can be made to fail.
    #[derive(Debug)]
    pub struct InMemoryStore {
        collections: Arc<RwLock<HashMap<String, BTreeMap<String, Document>>>>,
        watchers: Arc<RwLock<Vec<Watcher>>>,
        failing_ids: Arc<RwLock<HashMap<String, usize>>>,
        failing_matches: Arc<RwLock<Vec<(String, Filter)>>>,
        unavailable: AtomicBool,
        max_bulk_operations: usize,
        bulk_write_calls: AtomicUsize,
        largest_bulk_write: AtomicUsize,
    }

    impl Default for InMemoryStore {
        fn default() -> Self {
            Self::with_max_bulk_operations(400)
        }
    }

    impl InMemoryStore {
        /// Creates an empty store with the usual 400-operation ceiling
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates an empty store with a custom ceiling
        pub fn with_max_bulk_operations(max_bulk_operations: usize) -> Self {
            Self {
                collections: Arc::default(),
                watchers: Arc::default(),
                failing_ids: Arc::default(),
                failing_matches: Arc::default(),
                unavailable: AtomicBool::new(false),
                max_bulk_operations,
                bulk_write_calls: AtomicUsize::new(0),
                largest_bulk_write: AtomicUsize::new(0),
            }
        }

        /// Makes every call fail with `ServiceUnavailable`
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Makes writes to these document ids fail until cleared
        pub async fn fail_document_ids<I, S>(&self, ids: I)
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let mut failing = self.failing_ids.write().await;
            for id in ids {
                failing.insert(id.into(), usize::MAX);
            }
        }

        /// Makes the next `times` writes to this document id fail
        pub async fn fail_writes_to(&self, id: impl Into<String>, times: usize) {
            self.failing_ids.write().await.insert(id.into(), times);
        }

        /// Makes writes of documents in `collection` that match `filter`
        /// fail until cleared
        pub async fn fail_documents_matching(&self, collection: impl Into<String>, filter: Filter) {
            self.failing_matches.write().await.push((collection.into(), filter));
        }

        /// Removes all injected write failures
        pub async fn clear_failures(&self) {
            self.failing_ids.write().await.clear();
            self.failing_matches.write().await.clear();
        }

        /// Number of bulk writes received
        pub fn bulk_write_calls(&self) -> usize {
            self.bulk_write_calls.load(Ordering::SeqCst)
        }

        /// Size of the largest bulk write received
        pub fn largest_bulk_write(&self) -> usize {
            self.largest_bulk_write.load(Ordering::SeqCst)
        }

        /// Number of documents in a collection
        pub async fn count(&self, collection: &str) -> usize {
            self.collections
                .read()
                .await
                .get(collection)
                .map_or(0, |docs| docs.len())
        }

        fn ensure_available(&self) -> Result<(), PortError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(PortError::unavailable("in-memory-store"));
            }
            Ok(())
        }

        async fn should_fail(&self, collection: &str, id: &str, document: &Document) -> bool {
            if self
                .failing_matches
                .read()
                .await
                .iter()
                .any(|(failing, filter)| failing == collection && filter.matches(document))
            {
                return true;
            }
            let mut failing = self.failing_ids.write().await;
            match failing.get_mut(id) {
                Some(0) | None => false,
                Some(remaining) => {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    true
                }
            }
        }

        async fn publish(&self, collection: &str, document: &Document) {
            let mut watchers = self.watchers.write().await;
            watchers.retain(|(watched, filter, sender)| {
                if watched != collection || !filter.matches(document) {
                    return !sender.is_closed();
                }
                sender.send(document.clone()).is_ok()
            });
        }
    }

    impl DomainPort for InMemoryStore {}

    #[async_trait]
    impl HealthCheckable for InMemoryStore {
        async fn health_check(&self) -> HealthCheckResult {
            if self.unavailable.load(Ordering::SeqCst) {
                HealthCheckResult::new("in-memory-store", AdapterHealth::Unhealthy)
                    .with_detail("fault injection: store offline")
            } else {
                HealthCheckResult::new("in-memory-store", AdapterHealth::Healthy)
            }
        }
    }

    #[async_trait]
    impl DocumentStore for InMemoryStore {
        async fn get(&self, collection: &str, id: &str) -> Result<Document, PortError> {
            self.ensure_available()?;
            self.collections
                .read()
                .await
                .get(collection)
                .and_then(|docs| docs.get(id))
                .cloned()
                .ok_or_else(|| PortError::not_found(collection, id))
        }

        async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, PortError> {
            self.ensure_available()?;
            Ok(self
                .collections
                .read()
                .await
                .get(collection)
                .map(|docs| docs.values().filter(|d| filter.matches(d)).cloned().collect())
                .unwrap_or_default())
        }

        async fn put(&self, collection: &str, id: &str, document: Document) -> Result<(), PortError> {
            self.ensure_available()?;
            if self.should_fail(collection, id, &document).await {
                return Err(PortError::connection(format!("injected write failure on {}", id)));
            }
            self.collections
                .write()
                .await
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), document.clone());
            self.publish(collection, &document).await;
            Ok(())
        }

        async fn bulk_write(&self, operations: Vec<WriteOperation>) -> Result<BulkWriteResult, PortError> {
            self.ensure_available()?;
            if operations.len() > self.max_bulk_operations {
                return Err(PortError::validation(format!(
                    "bulk write of {} operations exceeds the limit of {}",
                    operations.len(),
                    self.max_bulk_operations
                )));
            }
            self.bulk_write_calls.fetch_add(1, Ordering::SeqCst);
            self.largest_bulk_write.fetch_max(operations.len(), Ordering::SeqCst);

            let mut result = BulkWriteResult::default();
            for (index, op) in operations.into_iter().enumerate() {
                if self.should_fail(&op.collection, &op.id, &op.document).await {
                    result.failures.push(WriteFailure {
                        index,
                        collection: op.collection,
                        id: op.id,
                        reason: "injected write failure".to_string(),
                    });
                    continue;
                }
                self.collections
                    .write()
                    .await
                    .entry(op.collection.clone())
                    .or_default()
                    .insert(op.id, op.document.clone());
                self.publish(&op.collection, &op.document).await;
                result.written += 1;
            }
            Ok(result)
        }

        fn max_bulk_operations(&self) -> usize {
            self.max_bulk_operations
        }

        async fn watch(
            &self,
            collection: &str,
            filter: Filter,
        ) -> Result<mpsc::UnboundedReceiver<Document>, PortError> {
            self.ensure_available()?;
            let (sender, receiver) = mpsc::unbounded_channel();
            for document in self.query(collection, &filter).await? {
                // The receiver is still held here, so this cannot fail.
                let _ = sender.send(document);
            }
            self.watchers
                .write()
                .await
                .push((collection.to_string(), filter, sender));
            Ok(receiver)
        }
    }

    /// Notifier that keeps every event it receives
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        events: Arc<RwLock<Vec<BillingEvent>>>,
        failing: AtomicBool,
    }

    impl RecordingNotifier {
        /// Creates an empty notifier
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every delivery fail after recording the attempt
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Events received so far
        pub async fn events(&self) -> Vec<BillingEvent> {
            self.events.read().await.clone()
        }

        /// Events of one type received so far
        pub async fn events_of_type(&self, event_type: &str) -> Vec<BillingEvent> {
            self.events
                .read()
                .await
                .iter()
                .filter(|e| e.event_type() == event_type)
                .cloned()
                .collect()
        }
    }

    impl DomainPort for RecordingNotifier {}

    #[async_trait]
    impl NotificationPort for RecordingNotifier {
        async fn notify(&self, event: BillingEvent) -> Result<(), PortError> {
            self.events.write().await.push(event);
            if self.failing.load(Ordering::SeqCst) {
                return Err(PortError::unavailable("notification-gateway"));
            }
            Ok(())
        }
    }
}

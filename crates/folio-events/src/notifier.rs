use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use folio_types::{FieldId, FieldValue, RecordId, SchemaId, UserId};

use crate::event::{ChangeEvent, ChangeKind, ChangeScope};

/// Filter selecting a subset of change events.
#[derive(Clone, Debug, Default)]
pub struct ChangeFilter {
    /// If set, only events of these kinds are delivered.
    pub kinds: Option<Vec<ChangeKind>>,
    pub schemas: Option<Vec<SchemaId>>,
    pub fields: Option<Vec<FieldId>>,
    pub records: Option<Vec<RecordId>>,
}

impl ChangeFilter {
    /// Events touching one field.
    pub fn field(field: FieldId) -> Self {
        Self {
            fields: Some(vec![field]),
            ..Default::default()
        }
    }

    /// Events touching one record.
    pub fn record(record: RecordId) -> Self {
        Self {
            records: Some(vec![record]),
            ..Default::default()
        }
    }

    /// Returns `true` if the given event matches this filter.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        fn allows<T: PartialEq>(set: &Option<Vec<T>>, value: &T) -> bool {
            set.as_ref().map_or(true, |s| s.contains(value))
        }
        allows(&self.kinds, &event.kind)
            && allows(&self.schemas, &event.scope.schema)
            && allows(&self.fields, &event.scope.field)
            && allows(&self.records, &event.scope.record)
    }
}

/// A broadcast receiver for change events.
pub type ChangeStream = broadcast::Receiver<ChangeEvent>;

/// Handle returned by [`ChangeNotifier::observe`], used to detach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscriber {
    filter: ChangeFilter,
    sender: broadcast::Sender<ChangeEvent>,
}

struct Observer {
    id: ObserverId,
    filter: ChangeFilter,
    handler: Handler,
}

/// Configuration for the [`ChangeNotifier`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Capacity of per-subscriber broadcast channels.
    pub channel_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// The single change bus.
///
/// Stream subscribers get a broadcast channel each and are pruned once their
/// receiver is dropped. Observers are invoked synchronously, in registration
/// order, before `publish` returns.
pub struct ChangeNotifier {
    subscribers: RwLock<Vec<Subscriber>>,
    observers: RwLock<Vec<Observer>>,
    next_observer: AtomicU64,
    config: NotifierConfig,
}

impl ChangeNotifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            config,
        }
    }

    /// Publish a change to every matching subscriber and observer.
    pub fn publish(
        &self,
        kind: ChangeKind,
        scope: ChangeScope,
        payload: FieldValue,
        user: Option<UserId>,
    ) -> ChangeEvent {
        let event = ChangeEvent::new(kind, scope, payload, user);
        self.route(&event);
        debug!(id = %event.id, kind = %event.kind, record = %scope.record, field = %scope.field, "change published");
        event
    }

    /// Subscribe to matching events through a broadcast channel.
    pub fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        let (tx, rx) = broadcast::channel(self.config.channel_capacity);
        self.subscribers
            .write()
            .expect("lock poisoned")
            .push(Subscriber { filter, sender: tx });
        rx
    }

    /// Register a synchronous callback for matching events.
    pub fn observe<F>(&self, filter: ChangeFilter, handler: F) -> ObserverId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().expect("lock poisoned").push(Observer {
            id,
            filter,
            handler: Arc::new(handler),
        });
        id
    }

    /// Detach an observer. Returns `true` if it was registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().expect("lock poisoned");
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("lock poisoned").len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().expect("lock poisoned").len()
    }

    fn route(&self, event: &ChangeEvent) {
        {
            let mut subs = self.subscribers.write().expect("lock poisoned");
            subs.retain(|sub| {
                if sub.filter.matches(event) {
                    sub.sender.send(event.clone()).is_ok()
                } else {
                    sub.sender.receiver_count() > 0
                }
            });
        }
        // Handlers run without the lock held so they may publish in turn.
        let handlers: Vec<Handler> = self
            .observers
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|o| o.filter.matches(event))
            .map(|o| Arc::clone(&o.handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(NotifierConfig::default())
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scope(field: i32, record: i64) -> ChangeScope {
        ChangeScope::new(SchemaId(0), FieldId(field), RecordId(record))
    }

    #[test]
    fn subscriber_receives_matching_events() {
        let bus = ChangeNotifier::default();
        let mut stream = bus.subscribe(ChangeFilter::field(FieldId(2)));

        bus.publish(ChangeKind::Set, scope(2, 1), FieldValue::Number(Some(5)), None);
        bus.publish(ChangeKind::Set, scope(3, 1), FieldValue::Number(Some(6)), None);

        let received = stream.try_recv().unwrap();
        assert_eq!(received.scope.field, FieldId(2));
        assert_eq!(received.payload, FieldValue::Number(Some(5)));
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn kind_filter() {
        let bus = ChangeNotifier::default();
        let mut stream = bus.subscribe(ChangeFilter {
            kinds: Some(vec![ChangeKind::Clear]),
            ..Default::default()
        });
        bus.publish(ChangeKind::Set, scope(1, 1), FieldValue::Flag(Some(true)), None);
        bus.publish(ChangeKind::Clear, scope(1, 1), FieldValue::Flag(Some(true)), None);
        assert_eq!(stream.try_recv().unwrap().kind, ChangeKind::Clear);
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn dropped_streams_are_pruned() {
        let bus = ChangeNotifier::default();
        let stream = bus.subscribe(ChangeFilter::default());
        assert_eq!(bus.subscriber_count(), 1);
        drop(stream);
        bus.publish(ChangeKind::Set, scope(1, 1), FieldValue::Text(None), None);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn observers_run_synchronously_and_detach() {
        let bus = ChangeNotifier::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = bus.observe(ChangeFilter::record(RecordId(7)), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(ChangeKind::Add, scope(1, 7), FieldValue::References(vec![]), None);
        bus.publish(ChangeKind::Add, scope(1, 8), FieldValue::References(vec![]), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(bus.unobserve(id));
        assert!(!bus.unobserve(id));
        bus.publish(ChangeKind::Add, scope(1, 7), FieldValue::References(vec![]), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observer_may_publish() {
        let bus = Arc::new(ChangeNotifier::default());
        let inner = Arc::clone(&bus);
        bus.observe(ChangeFilter::field(FieldId(1)), move |event| {
            inner.publish(ChangeKind::Set, scope(2, event.scope.record.0), FieldValue::Text(None), None);
        });
        let mut stream = bus.subscribe(ChangeFilter::field(FieldId(2)));
        bus.publish(ChangeKind::Set, scope(1, 4), FieldValue::Text(None), None);
        assert_eq!(stream.try_recv().unwrap().scope.record, RecordId(4));
    }

    #[test]
    fn filter_matches_correctly() {
        let event = ChangeEvent::new(ChangeKind::Set, scope(1, 1), FieldValue::Number(None), None);
        assert!(ChangeFilter::default().matches(&event));
        let filter = ChangeFilter {
            schemas: Some(vec![SchemaId(3)]),
            ..Default::default()
        };
        assert!(!filter.matches(&event));
    }
}

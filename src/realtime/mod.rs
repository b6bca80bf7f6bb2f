//! Realtime fan-out.
//!
//! One broadcast channel per `(resource, event kind)` topic. Publishing is
//! best-effort: an event nobody is listening for is dropped, and a
//! subscriber that falls behind skips what it missed.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Posts,
    Comments,
    Likes,
    Notifications,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Posts,
        Resource::Comments,
        Resource::Likes,
        Resource::Notifications,
    ];
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Posts => "posts",
            Resource::Comments => "comments",
            Resource::Likes => "likes",
            Resource::Notifications => "notifications",
        })
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posts" => Ok(Resource::Posts),
            "comments" => Ok(Resource::Comments),
            "likes" => Ok(Resource::Likes),
            "notifications" => Ok(Resource::Notifications),
            other => Err(format!("unknown resource '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    Insert,
    Update,
    Delete,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Insert, EventKind::Update, EventKind::Delete];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Insert => "insert",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        })
    }
}

/// A change pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub resource: Resource,
    pub kind: EventKind,
    /// The affected row. For inserts of posts this is the fully joined feed row.
    pub record: serde_json::Value,
    pub at: DateTime<Utc>,
    /// When set, only subscriptions opened by this identity receive the event.
    #[serde(skip)]
    pub audience: Option<Uuid>,
}

impl ChangeEvent {
    pub fn new(resource: Resource, kind: EventKind, record: serde_json::Value) -> Self {
        Self {
            resource,
            kind,
            record,
            at: Utc::now(),
            audience: None,
        }
    }

    pub fn for_recipient(mut self, recipient: Uuid) -> Self {
        self.audience = Some(recipient);
        self
    }

    fn visible_to(&self, viewer: Option<Uuid>) -> bool {
        match self.audience {
            None => true,
            Some(recipient) => viewer == Some(recipient),
        }
    }
}

/// Topic registry. Cheap to clone; all clones share the same channels.
#[derive(Clone)]
pub struct RealtimeHub {
    channels: Arc<HashMap<(Resource, EventKind), broadcast::Sender<ChangeEvent>>>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        for resource in Resource::ALL {
            for kind in EventKind::ALL {
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                channels.insert((resource, kind), tx);
            }
        }
        Self {
            channels: Arc::new(channels),
        }
    }

    fn sender(&self, resource: Resource, kind: EventKind) -> &broadcast::Sender<ChangeEvent> {
        // Every topic is created in `new`.
        &self.channels[&(resource, kind)]
    }

    /// Pushes an event to current subscribers of its topic. Returns how many
    /// receivers it was handed to; zero is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let topic = (event.resource, event.kind);
        match self.sender(topic.0, topic.1).send(event) {
            Ok(receivers) => {
                debug!("[Realtime] {}/{} -> {} receiver(s)", topic.0, topic.1, receivers);
                receivers
            }
            Err(_) => 0,
        }
    }

    /// Serializes `record` and publishes it. Serialization failures are logged
    /// and the event is skipped.
    pub fn publish_record<T: Serialize>(&self, resource: Resource, kind: EventKind, record: &T) {
        match serde_json::to_value(record) {
            Ok(value) => {
                self.publish(ChangeEvent::new(resource, kind, value));
            }
            Err(e) => warn!("[Realtime] dropping {}/{} event: {}", resource, kind, e),
        }
    }

    pub fn subscriber_count(&self, resource: Resource, kind: EventKind) -> usize {
        self.sender(resource, kind).receiver_count()
    }

    /// Opens a pull-style subscription. Dropping it tears the subscription down.
    pub fn subscribe(
        &self,
        resource: Resource,
        kind: EventKind,
        viewer: Option<Uuid>,
    ) -> Subscription {
        Subscription {
            resource,
            kind,
            viewer,
            rx: self.sender(resource, kind).subscribe(),
        }
    }

    /// Registers a callback for a topic. The callback is never invoked after
    /// [`SubscriptionHandle::cancel`] returns or the handle is dropped.
    pub fn on<F>(
        &self,
        resource: Resource,
        kind: EventKind,
        viewer: Option<Uuid>,
        handler: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let mut subscription = self.subscribe(resource, kind, viewer);
        let active = Arc::new(Mutex::new(true));
        let task_active = active.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                // Held while the handler runs so `cancel` waits for it.
                let guard = task_active.lock();
                if !*guard {
                    break;
                }
                handler(&event);
                drop(guard);
            }
        });

        SubscriptionHandle {
            active,
            task: Some(task),
        }
    }
}

pub struct Subscription {
    resource: Resource,
    kind: EventKind,
    viewer: Option<Uuid>,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Next event visible to this subscriber, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.visible_to(self.viewer) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "[Realtime] subscriber on {}/{} lagged, skipped {} event(s)",
                        self.resource, self.kind, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> + Send + 'static {
        let mut subscription = self;
        async_stream::stream! {
            while let Some(event) = subscription.recv().await {
                yield event;
            }
        }
    }
}

/// Cancellable token returned by [`RealtimeHub::on`].
pub struct SubscriptionHandle {
    active: Arc<Mutex<bool>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }

    /// Stops delivery. Waits for a callback that is currently running to
    /// finish, so no callback runs once this returns.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        *self.active.lock() = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let hub = RealtimeHub::new();
        let delivered = hub.publish(ChangeEvent::new(
            Resource::Posts,
            EventKind::Insert,
            json!({"id": 1}),
        ));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn subscription_only_sees_its_topic() {
        let hub = RealtimeHub::new();
        let mut inserts = hub.subscribe(Resource::Posts, EventKind::Insert, None);

        hub.publish(ChangeEvent::new(Resource::Posts, EventKind::Delete, json!({"id": "gone"})));
        hub.publish(ChangeEvent::new(Resource::Likes, EventKind::Insert, json!({"id": "like"})));
        hub.publish(ChangeEvent::new(Resource::Posts, EventKind::Insert, json!({"id": "new"})));

        let event = inserts.recv().await.unwrap();
        assert_eq!(event.record["id"], "new");
        assert_eq!(event.kind, EventKind::Insert);
    }

    #[tokio::test]
    async fn audience_scoped_events_reach_only_their_recipient() {
        let hub = RealtimeHub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut alice_sub = hub.subscribe(Resource::Notifications, EventKind::Insert, Some(alice));
        let mut bob_sub = hub.subscribe(Resource::Notifications, EventKind::Insert, Some(bob));
        let mut anonymous = hub.subscribe(Resource::Notifications, EventKind::Insert, None);

        hub.publish(
            ChangeEvent::new(Resource::Notifications, EventKind::Insert, json!({"n": 1}))
                .for_recipient(alice),
        );
        hub.publish(
            ChangeEvent::new(Resource::Notifications, EventKind::Insert, json!({"n": 2}))
                .for_recipient(bob),
        );

        assert_eq!(alice_sub.recv().await.unwrap().record["n"], 1);
        assert_eq!(bob_sub.recv().await.unwrap().record["n"], 2);

        let nothing = tokio::time::timeout(Duration::from_millis(50), anonymous.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn dropping_subscription_releases_receiver() {
        let hub = RealtimeHub::new();
        let sub = hub.subscribe(Resource::Comments, EventKind::Insert, None);
        assert_eq!(hub.subscriber_count(Resource::Comments, EventKind::Insert), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(Resource::Comments, EventKind::Insert), 0);
    }

    #[tokio::test]
    async fn no_callbacks_after_cancel() {
        let hub = RealtimeHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let handle = hub.on(Resource::Posts, EventKind::Insert, None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.is_active());

        hub.publish(ChangeEvent::new(Resource::Posts, EventKind::Insert, json!({})));
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.cancel();
        let seen = calls.load(Ordering::SeqCst);
        for _ in 0..5 {
            hub.publish(ChangeEvent::new(Resource::Posts, EventKind::Insert, json!({})));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }
}

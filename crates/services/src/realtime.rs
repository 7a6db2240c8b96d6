//! Callback-based change subscriptions over the store's change feed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use course_core::model::{EventFilter, Resource, UserId};
use storage::table::{ChangeEvent, ChangeReceiver, ChangeRequest, Filter, ResourceStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RealtimeError;

/// Lifecycle of a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    /// The channel ended without being unsubscribed.
    Failed(String),
    Closed,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Active => f.write_str("active"),
            SubscriptionStatus::Failed(reason) => write!(f, "failed: {reason}"),
            SubscriptionStatus::Closed => f.write_str("closed"),
        }
    }
}

type Handler = Box<dyn FnMut(ChangeEvent) + Send>;

/// State shared between a subscription handle and its delivery task.
///
/// The handler slot doubles as the liveness flag: delivery and unsubscribe
/// both take the lock, so once the slot is emptied no call can follow.
struct Shared {
    handler: Mutex<Option<Handler>>,
    status: watch::Sender<SubscriptionStatus>,
}

impl Shared {
    fn handler(&self) -> MutexGuard<'_, Option<Handler>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false once the subscription has been closed.
    fn dispatch(&self, event: ChangeEvent) -> bool {
        let mut slot = self.handler();
        match slot.as_mut() {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    fn close(&self) -> bool {
        let had_handler = self.handler().take().is_some();
        self.status.send_if_modified(|status| {
            if *status == SubscriptionStatus::Closed {
                false
            } else {
                *status = SubscriptionStatus::Closed;
                true
            }
        });
        had_handler
    }

    fn fail(&self, reason: &str) -> bool {
        self.status.send_if_modified(|status| {
            if *status == SubscriptionStatus::Active {
                *status = SubscriptionStatus::Failed(reason.to_owned());
                true
            } else {
                false
            }
        })
    }
}

/// Opens change subscriptions against a resource store.
pub struct RealtimeListener {
    store: Arc<dyn ResourceStore>,
    next_id: AtomicU64,
}

impl RealtimeListener {
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            next_id: AtomicU64::new(1),
        }
    }

    /// Calls `handler` for every change on `resource` that passes `filter`.
    ///
    /// With a `scope`, a user-owned resource only reports rows owned by that
    /// user. Events reach the handler one at a time, in the order the store
    /// emitted them. The handler must not unsubscribe its own subscription.
    ///
    /// # Errors
    ///
    /// Returns `RealtimeError::Subscription` if the store refuses the channel.
    pub async fn subscribe<H>(
        &self,
        resource: Resource,
        filter: EventFilter,
        scope: Option<UserId>,
        handler: H,
    ) -> Result<Subscription, RealtimeError>
    where
        H: FnMut(ChangeEvent) + Send + 'static,
    {
        let mut request = ChangeRequest::new(resource.clone(), filter);
        if let Some(user) = scope {
            if resource.is_user_owned() {
                request = request
                    .with_rows(Filter::new().eq(Resource::OWNER_COLUMN, user.to_string()));
            } else {
                debug!(%resource, %user, "resource has no owner column, ignoring user scope");
            }
        }

        let receiver = self.store.subscribe(request).await.map_err(|err| {
            warn!(%resource, error = %err, "subscription failed");
            RealtimeError::Subscription {
                resource: resource.clone(),
                reason: err.to_string(),
            }
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (status, _) = watch::channel(SubscriptionStatus::Active);
        let shared = Arc::new(Shared {
            handler: Mutex::new(Some(Box::new(handler))),
            status,
        });
        let task = tokio::spawn(deliver(
            Arc::clone(&shared),
            receiver,
            id,
            resource.clone(),
        ));

        info!(
            subscription = id,
            %resource,
            events = ?filter,
            scoped = scope.is_some(),
            "subscribed"
        );
        Ok(Subscription {
            id,
            resource,
            shared,
            task,
        })
    }
}

async fn deliver(shared: Arc<Shared>, mut receiver: ChangeReceiver, id: u64, resource: Resource) {
    while let Some(event) = receiver.recv().await {
        if !shared.dispatch(event) {
            return;
        }
    }
    if shared.fail("change channel closed") {
        warn!(subscription = id, %resource, "change channel closed unexpectedly");
    }
}

/// Handle to a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    resource: Resource,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Stops delivery. Once this returns the handler is never called again;
    /// a call already in progress finishes first. Calling it twice is a no-op.
    pub fn unsubscribe(&self) {
        if self.shared.close() {
            info!(subscription = self.id, resource = %self.resource, "unsubscribed");
        }
        self.task.abort();
    }

    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.shared.status.borrow().clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == SubscriptionStatus::Active
    }

    /// A receiver that observes every later status transition.
    #[must_use]
    pub fn status_changes(&self) -> watch::Receiver<SubscriptionStatus> {
        self.shared.status.subscribe()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

//! Lifecycle events raised around soft-delete and restore writes.
//!
//! Listeners run synchronously in registration order. The first listener to
//! fail aborts the dispatch, and the error propagates out of the commit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::document::{DocumentRef, DocumentRegistry};
use crate::error::SoftDeleteError;
use crate::query::Criteria;
use crate::unit_of_work::PendingCriteria;

/// The four lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Events {
    PreSoftDelete,
    PostSoftDelete,
    PreSoftDeleteRestore,
    PostSoftDeleteRestore,
}

impl Events {
    pub const ALL: [Events; 4] = [
        Events::PreSoftDelete,
        Events::PostSoftDelete,
        Events::PreSoftDeleteRestore,
        Events::PostSoftDeleteRestore,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Events::PreSoftDelete => "preSoftDelete",
            Events::PostSoftDelete => "postSoftDelete",
            Events::PreSoftDeleteRestore => "preSoftDeleteRestore",
            Events::PostSoftDeleteRestore => "postSoftDeleteRestore",
        }
    }
}

impl fmt::Display for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a listener receives: the document and a handle for scheduling
/// criteria operations into the running commit.
pub struct LifecycleEventArgs<'a> {
    document: &'a DocumentRef,
    registry: &'a DocumentRegistry,
    criteria: &'a mut PendingCriteria,
}

impl<'a> LifecycleEventArgs<'a> {
    pub(crate) fn new(
        document: &'a DocumentRef,
        registry: &'a DocumentRegistry,
        criteria: &'a mut PendingCriteria,
    ) -> Self {
        Self {
            document,
            registry,
            criteria,
        }
    }

    #[must_use]
    pub fn document(&self) -> &DocumentRef {
        self.document
    }

    #[must_use]
    pub fn registry(&self) -> &DocumentRegistry {
        self.registry
    }

    /// Soft delete every live `name` document matching `criteria`, setting
    /// `extra_fields` alongside the marker.
    ///
    /// The operation always runs before the current commit returns. From a
    /// `preSoftDelete` listener it joins the delete writes already under way;
    /// from any other event it goes out in a follow-up pass.
    pub fn delete_by(
        &mut self,
        name: &str,
        criteria: Criteria,
        extra_fields: Criteria,
    ) -> Result<(), SoftDeleteError> {
        self.registry.class_metadata(name)?;
        self.criteria.push_delete(name, criteria, extra_fields);
        Ok(())
    }

    /// Restore every deleted `name` document matching `criteria` and carrying
    /// `extra_fields`, clearing those fields with the marker.
    ///
    /// Runs before the current commit returns, alongside the restore writes
    /// when called from a `preSoftDelete` or `preSoftDeleteRestore` listener.
    pub fn restore_by(
        &mut self,
        name: &str,
        criteria: Criteria,
        extra_fields: Criteria,
    ) -> Result<(), SoftDeleteError> {
        self.registry.class_metadata(name)?;
        self.criteria.push_restore(name, criteria, extra_fields);
        Ok(())
    }
}

/// An object listening to several lifecycle events.
pub trait EventSubscriber: Send + Sync {
    fn subscribed_events(&self) -> Vec<Events>;

    fn pre_soft_delete(&self, _args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_soft_delete(&self, _args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn pre_soft_delete_restore(&self, _args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_soft_delete_restore(&self, _args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

type ListenerFn = dyn Fn(&mut LifecycleEventArgs<'_>) -> anyhow::Result<()> + Send + Sync;

#[derive(Clone)]
enum Listener {
    Callback(Arc<ListenerFn>),
    Subscriber(Arc<dyn EventSubscriber>),
}

impl Listener {
    fn call(&self, event: Events, args: &mut LifecycleEventArgs<'_>) -> anyhow::Result<()> {
        match self {
            Listener::Callback(callback) => callback(args),
            Listener::Subscriber(subscriber) => match event {
                Events::PreSoftDelete => subscriber.pre_soft_delete(args),
                Events::PostSoftDelete => subscriber.post_soft_delete(args),
                Events::PreSoftDeleteRestore => subscriber.pre_soft_delete_restore(args),
                Events::PostSoftDeleteRestore => subscriber.post_soft_delete_restore(args),
            },
        }
    }
}

#[derive(Default, Clone)]
pub struct EventManager {
    listeners: HashMap<Events, Vec<Listener>>,
}

impl EventManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&mut self, event: Events, listener: F)
    where
        F: Fn(&mut LifecycleEventArgs<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners
            .entry(event)
            .or_default()
            .push(Listener::Callback(Arc::new(listener)));
    }

    /// Register `subscriber` for each event it reports.
    pub fn add_subscriber(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        for event in subscriber.subscribed_events() {
            self.listeners
                .entry(event)
                .or_default()
                .push(Listener::Subscriber(Arc::clone(&subscriber)));
        }
    }

    #[must_use]
    pub fn has_listeners(&self, event: Events) -> bool {
        self.listener_count(event) > 0
    }

    #[must_use]
    pub fn listener_count(&self, event: Events) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }

    /// Call every listener for `event` in registration order.
    pub fn dispatch(
        &self,
        event: Events,
        args: &mut LifecycleEventArgs<'_>,
    ) -> Result<(), SoftDeleteError> {
        let Some(listeners) = self.listeners.get(&event) else {
            return Ok(());
        };
        debug!(
            "Dispatching {} to {} listener(s) for {}",
            event,
            listeners.len(),
            args.document().describe()
        );
        for listener in listeners {
            if let Err(err) = listener.call(event, args) {
                warn!("Listener for {} failed: {:#}", event, err);
                return Err(SoftDeleteError::ListenerFailed {
                    event,
                    message: format!("{err:#}"),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for event in Events::ALL {
            map.entry(&event.as_str(), &self.listener_count(event));
        }
        map.finish()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;

//! Lifecycle notifications emitted by bean entries.

use std::fmt;

use tokio::sync::broadcast;

use crate::descriptor::{BeanDescriptor, Instance};

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum LifecycleEventKind {
    /// A bean instance was materialized inside a window.
    Scoped,
    /// A bean instance was handed out.
    Accessed,
    /// A bean instance was destroyed with its window or conversation.
    Unscoped,
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scoped => write!(f, "scoped"),
            Self::Accessed => write!(f, "accessed"),
            Self::Unscoped => write!(f, "unscoped"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub descriptor: BeanDescriptor,
    pub instance: Instance,
}

/// Receives lifecycle notifications.
///
/// Errors returned here are surfaced to whoever triggered the notification;
/// nothing in this crate retries or swallows them on the request path.
pub trait LifecycleSink: Send + Sync {
    fn notify(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

impl<F> LifecycleSink for F
where
    F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn notify(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Discards every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl LifecycleSink for NoopSink {
    fn notify(&self, _event: &LifecycleEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fans notifications out to any number of subscribers.
///
/// Delivery is fire-and-forget: having no subscriber is not an error, and
/// slow subscribers observe `Lagged` on their receiver instead of blocking
/// the request path.
pub struct BroadcastSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl LifecycleSink for BroadcastSink {
    fn notify(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

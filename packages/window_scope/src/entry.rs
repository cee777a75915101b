use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::EventFlags;
use crate::descriptor::{BeanDescriptor, CreationalContext, Instance};
use crate::error::{Result, ScopeError};
use crate::event::{LifecycleEvent, LifecycleEventKind, LifecycleSink};

enum EntryState {
    Pending,
    Creating,
    Ready(Instance),
    Failed,
    Destroyed,
}

/// Owns one window-scoped bean and its lifecycle.
///
/// Only the caller that stored the entry materializes it, through
/// [`get_instance`](Self::get_instance). Everyone else goes through
/// [`wait_instance`](Self::wait_instance), which blocks until that creation
/// settles and never runs the creational context itself.
///
/// `Scoped` is emitted when the instance materializes, not when the entry is
/// constructed, so discarded entries never notify.
pub struct BeanEntry {
    descriptor: BeanDescriptor,
    context: Arc<dyn CreationalContext>,
    sink: Arc<dyn LifecycleSink>,
    flags: EventFlags,
    state: Mutex<EntryState>,
    settled: Condvar,
}

impl fmt::Debug for BeanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanEntry")
            .field("descriptor", &self.descriptor)
            .field("flags", &self.flags)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

impl BeanEntry {
    pub fn new(
        descriptor: BeanDescriptor,
        context: Arc<dyn CreationalContext>,
        sink: Arc<dyn LifecycleSink>,
        flags: EventFlags,
    ) -> Self {
        Self {
            descriptor,
            context,
            sink,
            flags,
            state: Mutex::new(EntryState::Pending),
            settled: Condvar::new(),
        }
    }

    pub fn descriptor(&self) -> &BeanDescriptor {
        &self.descriptor
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    pub fn is_materialized(&self) -> bool {
        matches!(*self.state.lock(), EntryState::Ready(_))
    }

    /// Returns the bean, creating it on first use.
    ///
    /// Emits `Scoped` when this call materialized the bean and `Accessed` on
    /// every successful call, each only when enabled. A call that finds
    /// creation already under way waits for it instead.
    pub fn get_instance(&self) -> Result<Instance> {
        let (instance, created) = self.materialize()?;
        self.accessed(instance, created)
    }

    /// Returns the bean once its creator has materialized it.
    ///
    /// Never creates. Fails with `Abandoned` when the creator's attempt
    /// failed and with `EntryDestroyed` when the entry was torn down first.
    pub fn wait_instance(&self) -> Result<Instance> {
        let instance = self.wait_settled()?;
        self.accessed(instance, false)
    }

    fn accessed(&self, instance: Instance, created: bool) -> Result<Instance> {
        if created && self.flags.scope {
            self.emit(LifecycleEventKind::Scoped, &instance)?;
        }
        if self.flags.access {
            self.emit(LifecycleEventKind::Accessed, &instance)?;
        }
        Ok(instance)
    }

    fn materialize(&self) -> Result<(Instance, bool)> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, EntryState::Pending) {
                drop(state);
                return self.wait_settled().map(|instance| (instance, false));
            }
            *state = EntryState::Creating;
        }

        // The lock is released while host code runs.
        let created = self.context.create(&self.descriptor);

        let mut orphan = None;
        let outcome = {
            let mut state = self.state.lock();
            let destroyed = matches!(*state, EntryState::Destroyed);
            let outcome = match created {
                Ok(instance) if destroyed => {
                    orphan = Some(instance);
                    Err(ScopeError::EntryDestroyed {
                        descriptor: self.descriptor.clone(),
                    })
                }
                Ok(instance) => {
                    debug!(bean = %self.descriptor, "materialized bean");
                    *state = EntryState::Ready(instance.clone());
                    Ok((instance, true))
                }
                Err(source) => {
                    if !destroyed {
                        *state = EntryState::Failed;
                    }
                    Err(ScopeError::Creation {
                        descriptor: self.descriptor.clone(),
                        source,
                    })
                }
            };
            self.settled.notify_all();
            outcome
        };

        if let Some(instance) = orphan {
            debug!(bean = %self.descriptor, "entry destroyed during creation");
            self.context.destroy(&self.descriptor, instance);
        }
        outcome
    }

    fn wait_settled(&self) -> Result<Instance> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = self.settled_outcome(&state) {
                return outcome;
            }
            self.settled.wait(&mut state);
        }
    }

    fn settled_outcome(&self, state: &EntryState) -> Option<Result<Instance>> {
        match state {
            EntryState::Pending | EntryState::Creating => None,
            EntryState::Ready(instance) => Some(Ok(instance.clone())),
            EntryState::Failed => Some(Err(ScopeError::Abandoned {
                descriptor: self.descriptor.clone(),
            })),
            EntryState::Destroyed => Some(Err(ScopeError::EntryDestroyed {
                descriptor: self.descriptor.clone(),
            })),
        }
    }

    /// Destroys the bean through its creational context.
    ///
    /// Returns `Ok(false)` when there was nothing to destroy: the bean was
    /// never materialized or the entry was already destroyed. Waiters are
    /// woken, and later calls to `get_instance` fail with `EntryDestroyed`.
    pub fn destroy(&self) -> Result<bool> {
        let previous = {
            let mut state = self.state.lock();
            let previous = std::mem::replace(&mut *state, EntryState::Destroyed);
            self.settled.notify_all();
            previous
        };
        let EntryState::Ready(instance) = previous else {
            trace!(bean = %self.descriptor, "nothing to destroy");
            return Ok(false);
        };

        self.context.destroy(&self.descriptor, instance.clone());
        debug!(bean = %self.descriptor, "destroyed bean");

        if self.flags.unscope {
            self.emit(LifecycleEventKind::Unscoped, &instance)?;
        }
        Ok(true)
    }

    fn emit(&self, kind: LifecycleEventKind, instance: &Instance) -> Result<()> {
        let event = LifecycleEvent {
            kind,
            descriptor: self.descriptor.clone(),
            instance: instance.clone(),
        };
        self.sink
            .notify(&event)
            .map_err(|source| ScopeError::Notification {
                kind,
                descriptor: self.descriptor.clone(),
                source,
            })
    }
}

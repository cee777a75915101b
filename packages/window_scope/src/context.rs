//! The grouped conversation context: the scope the host container talks to.
//!
//! ## Create flow
//!
//! 1. With [`ContainerCompat::PreResolving`], look for a live instance first
//!    and hand it back if there is one.
//! 2. Load the conversation config (once per context).
//! 3. Resolve the current window through the manager.
//! 4. Build a bean entry carrying the configured event flags.
//! 5. Store it atomically. A caller that loses the race for the same key
//!    drops its own entry and waits for the stored one to materialize. If
//!    that creation fails or the entry is destroyed first, the loser removes
//!    it and starts over from step 5.
//! 6. Materialize the instance. Only the caller whose entry was stored runs
//!    the creational context. If creation fails, the entry is removed again
//!    before the error is returned.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::compat::ContainerCompat;
use crate::config::{ConfigSource, ConversationConfig};
use crate::descriptor::{BeanDescriptor, CreationalContext, Instance, downcast_instance};
use crate::entry::BeanEntry;
use crate::error::{Result, ScopeError};
use crate::event::{LifecycleSink, NoopSink};
use crate::manager::WindowContextManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    /// No `create` has loaded the conversation config yet.
    Uninitialized,
    /// The conversation config is loaded and fixed for the context's lifetime.
    Configured,
}

/// Window scope as seen by the host container.
///
/// Holds the storage strategy, the lifecycle sink and the compatibility
/// mode chosen at construction. One context serves every window; the
/// current window comes from the manager on each call.
pub struct GroupedConversationContext {
    manager: Arc<dyn WindowContextManager>,
    config_source: Arc<dyn ConfigSource>,
    config: OnceCell<ConversationConfig>,
    sink: Arc<dyn LifecycleSink>,
    compat: ContainerCompat,
}

impl GroupedConversationContext {
    /// A context that loads its config from `config_source` on the first `create`.
    pub fn new(
        manager: Arc<dyn WindowContextManager>,
        config_source: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            manager,
            config_source,
            config: OnceCell::new(),
            sink: Arc::new(NoopSink),
            compat: ContainerCompat::default(),
        }
    }

    /// A context with an already loaded config; it starts out configured.
    pub fn preconfigured(
        manager: Arc<dyn WindowContextManager>,
        config: ConversationConfig,
    ) -> Self {
        let this = Self::new(manager, Arc::new(config.clone()));
        let _ = this.config.set(config);
        this
    }

    pub fn with_sink(mut self, sink: Arc<dyn LifecycleSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_compat(mut self, compat: ContainerCompat) -> Self {
        self.compat = compat;
        self
    }

    pub fn compat(&self) -> ContainerCompat {
        self.compat
    }

    pub fn manager(&self) -> &Arc<dyn WindowContextManager> {
        &self.manager
    }

    pub fn state(&self) -> ContextState {
        if self.config.get().is_some() {
            ContextState::Configured
        } else {
            ContextState::Uninitialized
        }
    }

    /// Returns the bean for the current window, creating and scoping it if needed.
    pub fn create(
        &self,
        descriptor: &BeanDescriptor,
        creational_context: Arc<dyn CreationalContext>,
    ) -> Result<Instance> {
        if self.compat.resolves_first() {
            if let Some(instance) = self.resolve(descriptor)? {
                trace!(bean = %descriptor, "create satisfied by existing instance");
                return Ok(instance);
            }
        }

        let config = self.config()?;
        let window = self.manager.current_window()?;

        let entry = Arc::new(BeanEntry::new(
            descriptor.clone(),
            creational_context,
            self.sink.clone(),
            config.event_flags(),
        ));

        loop {
            let stored = self.manager.put_entry_if_absent(&window, entry.clone())?;
            if Arc::ptr_eq(&stored, &entry) {
                debug!(bean = %descriptor, %window, "scoped new bean entry");
                return entry.get_instance().inspect_err(|e| {
                    if matches!(e, ScopeError::Creation { .. }) {
                        self.manager.remove_entry(&window, &entry);
                    }
                });
            }

            debug!(bean = %descriptor, %window, "bean already scoped by a concurrent request");
            match stored.wait_instance() {
                Err(ScopeError::Abandoned { .. } | ScopeError::EntryDestroyed { .. }) => {
                    self.manager.remove_entry(&window, &stored);
                    trace!(bean = %descriptor, %window, "stored entry gone, retrying");
                }
                outcome => return outcome,
            }
        }
    }

    /// Returns the live bean of the current window, or `None` if it has not been created.
    ///
    /// Never creates. When another request is materializing the bean, waits
    /// for it to finish.
    pub fn resolve(&self, descriptor: &BeanDescriptor) -> Result<Option<Instance>> {
        let window = self.manager.current_window()?;
        let Some(entry) = self.manager.get_entry(&window, descriptor) else {
            return Ok(None);
        };
        match entry.wait_instance() {
            Ok(instance) => Ok(Some(instance)),
            Err(ScopeError::Abandoned { .. } | ScopeError::EntryDestroyed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether the current unit of work is bound to a live window.
    pub fn is_active(&self) -> bool {
        self.manager
            .current_window()
            .is_ok_and(|window| self.manager.is_active(&window))
    }

    /// [`create`](Self::create), downcast to the bean's concrete type.
    pub fn create_as<T>(
        &self,
        descriptor: &BeanDescriptor,
        creational_context: Arc<dyn CreationalContext>,
    ) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let instance = self.create(descriptor, creational_context)?;
        downcast_instance(descriptor, instance)
    }

    /// [`resolve`](Self::resolve), downcast to the bean's concrete type.
    pub fn resolve_as<T>(&self, descriptor: &BeanDescriptor) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        self.resolve(descriptor)?
            .map(|instance| downcast_instance(descriptor, instance))
            .transpose()
    }

    fn config(&self) -> Result<&ConversationConfig> {
        self.config.get_or_try_init(|| {
            let config = self.config_source.load()?;
            debug!(?config, "loaded conversation config");
            Ok::<_, ScopeError>(config)
        })
    }
}

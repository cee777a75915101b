//! Window Scope - bean lifecycle management keyed by browser window
//!
//! This crate scopes bean instances to a logical browser window (or tab): a
//! lifetime longer than one request and shorter than a session. Every window
//! holds at most one instance per bean, even when several requests from the
//! same tab ask for it at the same time.
//!
//! The host container supplies bean descriptors and creational contexts and
//! calls [`GroupedConversationContext::create`], [`resolve`] and [`is_active`].
//! Storage is pluggable through [`WindowContextManager`];
//! [`InMemoryWindowContextManager`] keeps windows in process memory.
//!
//! [`resolve`]: GroupedConversationContext::resolve
//! [`is_active`]: GroupedConversationContext::is_active
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use window_scope::{
//!     BeanDescriptor, ConversationConfig, FnCreationalContext, GroupedConversationContext,
//!     InMemoryWindowContextManager, Instance, WindowId, enter_window,
//! };
//!
//! let manager = Arc::new(InMemoryWindowContextManager::default());
//! let scope = GroupedConversationContext::preconfigured(manager, ConversationConfig::default());
//!
//! // One unit of work for window "tab-1"
//! let _window = enter_window(WindowId::parse("tab-1").unwrap());
//!
//! let cart = BeanDescriptor::new("cart");
//! let make_cart = Arc::new(FnCreationalContext::new(
//!     |_: &BeanDescriptor| -> anyhow::Result<Instance> { Ok(Arc::new(Vec::<String>::new())) },
//! ));
//!
//! let first = scope.create(&cart, make_cart.clone()).unwrap();
//! let again = scope.create(&cart, make_cart).unwrap();
//! assert!(Arc::ptr_eq(&first, &again));
//! assert!(scope.is_active());
//! ```

mod compat;
pub mod config;
mod context;
mod descriptor;
mod entry;
pub mod error;
pub mod event;
pub mod manager;
pub mod window;

pub use compat::ContainerCompat;
pub use config::{
    ConfigSource, ConversationConfig, EventFlags, FigmentConfigSource, ScopeFileConfig,
    WindowSettings,
};
pub use context::{ContextState, GroupedConversationContext};
pub use descriptor::{BeanDescriptor, CreationalContext, FnCreationalContext, Instance};
pub use entry::BeanEntry;
pub use error::{Result, ScopeError};
pub use event::{BroadcastSink, LifecycleEvent, LifecycleEventKind, LifecycleSink, NoopSink};
pub use manager::{InMemoryWindowContextManager, WindowContextManager};
pub use window::{ThreadWindowResolver, WindowGuard, WindowId, WindowResolver, enter_window};

//! Error types and stable error codes.

use crate::descriptor::BeanDescriptor;
use crate::event::LifecycleEventKind;
use crate::window::WindowId;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ScopeError>;

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// The settings source could not produce a configuration.
    #[error("failed to load conversation config: {source}")]
    Config {
        #[source]
        source: anyhow::Error,
    },

    #[error("no window context is bound to the current unit of work")]
    NoActiveWindow,

    #[error("invalid window id: {0:?}")]
    InvalidWindowId(String),

    /// A second entry was stored for a key that already holds one.
    #[error("bean `{descriptor}` is already scoped in window {window}")]
    DuplicateEntry {
        window: WindowId,
        descriptor: BeanDescriptor,
    },

    /// The creation capability failed. `source` is the error it returned.
    #[error("failed to create bean `{descriptor}`: {source}")]
    Creation {
        descriptor: BeanDescriptor,
        #[source]
        source: anyhow::Error,
    },

    #[error("{kind} notification for bean `{descriptor}` failed: {source}")]
    Notification {
        kind: LifecycleEventKind,
        descriptor: BeanDescriptor,
        #[source]
        source: anyhow::Error,
    },

    /// Another caller started creating this bean and failed.
    #[error("creation of bean `{descriptor}` was abandoned by a concurrent caller")]
    Abandoned { descriptor: BeanDescriptor },

    #[error("bean `{descriptor}` has already been destroyed")]
    EntryDestroyed { descriptor: BeanDescriptor },

    #[error("bean `{descriptor}` is not a `{expected}`")]
    TypeMismatch {
        descriptor: BeanDescriptor,
        expected: &'static str,
    },
}

impl ScopeError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Config { .. } => "config",
            Self::NoActiveWindow => "no_active_window",
            Self::InvalidWindowId(_) => "invalid_window_id",
            Self::DuplicateEntry { .. } => "duplicate_entry",
            Self::Creation { .. } => "creation_failed",
            Self::Notification { .. } => "notification_failed",
            Self::Abandoned { .. } => "abandoned",
            Self::EntryDestroyed { .. } => "entry_destroyed",
            Self::TypeMismatch { .. } => "type_mismatch",
        }
    }

    pub fn config(source: impl Into<anyhow::Error>) -> Self {
        Self::Config {
            source: source.into(),
        }
    }
}

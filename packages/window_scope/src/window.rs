//! Window identity: the token that ties a unit of work to a browser window.

use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Result, ScopeError};

const MAX_WINDOW_ID_LEN: usize = 64;

/// Identifies one logical browser window (or tab).
///
/// Window ids usually arrive from the client, so parsing only accepts short
/// tokens made of ASCII alphanumerics, `-` and `_`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct WindowId(Arc<str>);

impl WindowId {
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_WINDOW_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(ScopeError::InvalidWindowId(raw.to_string()));
        }
        Ok(Self(raw.into()))
    }

    /// A fresh random id for a window that has none yet.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WindowId {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Resolves the window of the current unit of work.
///
/// Must return the same answer for the whole unit of work.
pub trait WindowResolver: Send + Sync {
    fn current_window(&self) -> Option<WindowId>;
}

impl<F> WindowResolver for F
where
    F: Fn() -> Option<WindowId> + Send + Sync,
{
    fn current_window(&self) -> Option<WindowId> {
        self()
    }
}

thread_local! {
    static CURRENT_WINDOW: RefCell<Option<WindowId>> = const { RefCell::new(None) };
}

/// Binds `window` to the calling thread until the returned guard is dropped.
///
/// Guards nest: dropping one restores whatever binding was active before it.
pub fn enter_window(window: WindowId) -> WindowGuard {
    let previous = CURRENT_WINDOW.with(|current| current.borrow_mut().replace(window));
    WindowGuard { previous }
}

#[must_use = "the window is unbound as soon as the guard is dropped"]
pub struct WindowGuard {
    previous: Option<WindowId>,
}

impl Drop for WindowGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_WINDOW.with(|current| *current.borrow_mut() = previous);
    }
}

/// Reads the window bound with [`enter_window`] on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadWindowResolver;

impl WindowResolver for ThreadWindowResolver {
    fn current_window(&self) -> Option<WindowId> {
        CURRENT_WINDOW.with(|current| current.borrow().clone())
    }
}

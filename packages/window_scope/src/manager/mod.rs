//! Window context storage.
//!
//! A [`WindowContextManager`] owns every live window and the bean entries
//! scoped into it. The conversation context only talks to this trait, so
//! storage can live in process memory, in a replicated session, or anywhere
//! else that can honor the contract below.

mod memory;

use std::sync::Arc;

use crate::descriptor::BeanDescriptor;
use crate::entry::BeanEntry;
use crate::error::Result;
use crate::window::WindowId;

pub use memory::InMemoryWindowContextManager;

/// Storage contract for window-scoped bean entries.
///
/// At most one entry exists per (window, descriptor) at any time. Implementors
/// must make `put_entry` and `put_entry_if_absent` atomic with respect to
/// every other operation on the same window, and should not serialize
/// unrelated windows behind one lock.
pub trait WindowContextManager: Send + Sync {
    /// The window of the current unit of work. Idempotent within that unit.
    fn current_window(&self) -> Result<WindowId>;

    /// Looks an entry up without creating anything.
    fn get_entry(&self, window: &WindowId, descriptor: &BeanDescriptor)
    -> Option<Arc<BeanEntry>>;

    /// Stores a new entry. Fails with `DuplicateEntry` when the key is taken.
    fn put_entry(&self, window: &WindowId, entry: Arc<BeanEntry>) -> Result<()>;

    /// Stores `entry` unless the key is taken, and returns whichever entry
    /// ends up stored.
    fn put_entry_if_absent(&self, window: &WindowId, entry: Arc<BeanEntry>)
    -> Result<Arc<BeanEntry>>;

    /// Removes `entry` if it is the one stored under its descriptor. Does not
    /// destroy it.
    fn remove_entry(&self, window: &WindowId, entry: &Arc<BeanEntry>) -> bool;

    /// Whether the window is live. Pure query.
    fn is_active(&self, window: &WindowId) -> bool;

    /// Ends the window, destroying each of its entries exactly once.
    /// Returns how many entries were removed.
    fn destroy_window(&self, window: &WindowId) -> Result<usize>;

    /// Destroys the entries of one conversation group; the window stays live.
    fn close_conversation(&self, window: &WindowId, group: &str) -> Result<usize>;
}

/// Destroys `entries` one by one.
///
/// Every entry gets its destroy call even when an earlier one fails; the
/// first error is returned after the loop and the rest are logged.
pub(crate) fn destroy_entries<I>(entries: I) -> Result<usize>
where
    I: IntoIterator<Item = Arc<BeanEntry>>,
{
    let mut count = 0;
    let mut first_err = None;
    for entry in entries {
        count += 1;
        if let Err(e) = entry.destroy() {
            if first_err.is_none() {
                first_err = Some(e);
            } else {
                tracing::warn!(bean = %entry.descriptor(), "error destroying bean: {}", e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(count),
    }
}

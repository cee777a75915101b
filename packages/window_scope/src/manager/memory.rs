use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{WindowContextManager, destroy_entries};
use crate::config::WindowSettings;
use crate::descriptor::BeanDescriptor;
use crate::entry::BeanEntry;
use crate::error::{Result, ScopeError};
use crate::window::{ThreadWindowResolver, WindowId, WindowResolver};

/// Internal state for one live window
struct WindowContext {
    state: Mutex<WindowState>,
    last_access: Mutex<Instant>,
    last_used_tick: AtomicU64,
}

struct WindowState {
    entries: HashMap<BeanDescriptor, Arc<BeanEntry>>,
    closed: bool,
}

impl WindowContext {
    fn new(tick: u64) -> Self {
        Self {
            state: Mutex::new(WindowState {
                entries: HashMap::new(),
                closed: false,
            }),
            last_access: Mutex::new(Instant::now()),
            last_used_tick: AtomicU64::new(tick),
        }
    }

    fn touch(&self, tick: u64) {
        *self.last_access.lock() = Instant::now();
        self.last_used_tick.store(tick, Ordering::Relaxed);
    }

    /// Marks the window closed and hands back its entries for destruction.
    fn close(&self) -> Vec<Arc<BeanEntry>> {
        let mut state = self.state.lock();
        state.closed = true;
        state.entries.drain().map(|(_, entry)| entry).collect()
    }
}

/// Window storage kept in process memory.
///
/// Windows live in a map behind an `RwLock`; each window guards its own
/// entries, so beans of different windows are scoped in parallel. Entries
/// are always destroyed after every lock has been released.
pub struct InMemoryWindowContextManager {
    windows: RwLock<HashMap<WindowId, Arc<WindowContext>>>,
    resolver: Arc<dyn WindowResolver>,
    settings: WindowSettings,
    clock: AtomicU64,
}

impl Default for InMemoryWindowContextManager {
    fn default() -> Self {
        Self::new(Arc::new(ThreadWindowResolver))
    }
}

impl InMemoryWindowContextManager {
    /// Create a manager without window expiry or a window cap.
    pub fn new(resolver: Arc<dyn WindowResolver>) -> Self {
        Self::with_settings(resolver, WindowSettings::default())
    }

    pub fn with_settings(resolver: Arc<dyn WindowResolver>, settings: WindowSettings) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            resolver,
            settings,
            clock: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &WindowSettings {
        &self.settings
    }

    /// List all live window ids
    pub fn window_ids(&self) -> Vec<WindowId> {
        self.windows.read().keys().cloned().collect()
    }

    /// Number of entries currently scoped in a window
    pub fn entry_count(&self, window: &WindowId) -> usize {
        self.windows
            .read()
            .get(window)
            .map(|ctx| ctx.state.lock().entries.len())
            .unwrap_or(0)
    }

    /// Destroy every window that has been idle longer than the timeout.
    pub fn expire_idle(&self) -> Result<usize> {
        self.expire_idle_at(Instant::now())
    }

    /// Like [`expire_idle`](Self::expire_idle), judged at `now`.
    ///
    /// Returns how many windows were expired.
    pub fn expire_idle_at(&self, now: Instant) -> Result<usize> {
        if self.settings.timeout.is_none() {
            return Ok(0);
        }

        let mut doomed = Vec::new();
        let mut expired = 0;
        {
            let mut windows = self.windows.write();
            windows.retain(|id, ctx| {
                if self.is_expired(ctx, now) {
                    info!("Expiring idle window {}", id);
                    doomed.extend(ctx.close());
                    expired += 1;
                    false
                } else {
                    true
                }
            });
        }

        destroy_entries(doomed).map(|_| expired)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn is_expired(&self, ctx: &WindowContext, now: Instant) -> bool {
        self.settings.timeout.is_some_and(|timeout| {
            now.saturating_duration_since(*ctx.last_access.lock()) > timeout
        })
    }

    /// Live (non-expired) context for `window`, if any.
    fn live_window(&self, window: &WindowId) -> Option<Arc<WindowContext>> {
        let ctx = self.windows.read().get(window).cloned()?;
        if self.is_expired(&ctx, Instant::now()) {
            return None;
        }
        Some(ctx)
    }

    /// Context for `window`, creating it when missing or expired.
    fn window_or_insert(&self, window: &WindowId) -> Arc<WindowContext> {
        if let Some(ctx) = self.live_window(window) {
            return ctx;
        }

        let mut doomed = Vec::new();
        let ctx = {
            let mut windows = self.windows.write();
            let now = Instant::now();

            if let Some(existing) = windows.get(window).cloned() {
                if !self.is_expired(&existing, now) {
                    return existing;
                }
                info!("Replacing expired window {}", window);
                windows.remove(window);
                doomed.extend(existing.close());
            }

            if let Some(max) = self.settings.max_windows {
                while windows.len() >= max {
                    let Some(lru) = windows
                        .iter()
                        .min_by_key(|(_, ctx)| ctx.last_used_tick.load(Ordering::Relaxed))
                        .map(|(id, _)| id.clone())
                    else {
                        break;
                    };
                    info!("Evicting least recently used window {}", lru);
                    if let Some(evicted) = windows.remove(&lru) {
                        doomed.extend(evicted.close());
                    }
                }
            }

            debug!("Opening window {}", window);
            let ctx = Arc::new(WindowContext::new(self.tick()));
            windows.insert(window.clone(), ctx.clone());
            ctx
        };

        if let Err(e) = destroy_entries(doomed) {
            warn!("Error destroying beans of a displaced window: {}", e);
        }
        ctx
    }
}

impl WindowContextManager for InMemoryWindowContextManager {
    fn current_window(&self) -> Result<WindowId> {
        self.resolver
            .current_window()
            .ok_or(ScopeError::NoActiveWindow)
    }

    fn get_entry(
        &self,
        window: &WindowId,
        descriptor: &BeanDescriptor,
    ) -> Option<Arc<BeanEntry>> {
        let ctx = self.live_window(window)?;
        let entry = ctx.state.lock().entries.get(descriptor).cloned()?;
        ctx.touch(self.tick());
        Some(entry)
    }

    fn put_entry(&self, window: &WindowId, entry: Arc<BeanEntry>) -> Result<()> {
        let stored = self.put_entry_if_absent(window, entry.clone())?;
        if Arc::ptr_eq(&stored, &entry) {
            Ok(())
        } else {
            Err(ScopeError::DuplicateEntry {
                window: window.clone(),
                descriptor: entry.descriptor().clone(),
            })
        }
    }

    fn put_entry_if_absent(
        &self,
        window: &WindowId,
        entry: Arc<BeanEntry>,
    ) -> Result<Arc<BeanEntry>> {
        loop {
            let ctx = self.window_or_insert(window);
            let mut state = ctx.state.lock();
            if state.closed {
                // Destroyed between lookup and lock; scope into a fresh window.
                continue;
            }
            ctx.touch(self.tick());
            return Ok(match state.entries.entry(entry.descriptor().clone()) {
                Entry::Occupied(existing) => existing.get().clone(),
                Entry::Vacant(slot) => slot.insert(entry).clone(),
            });
        }
    }

    fn remove_entry(&self, window: &WindowId, entry: &Arc<BeanEntry>) -> bool {
        let Some(ctx) = self.windows.read().get(window).cloned() else {
            return false;
        };
        let mut state = ctx.state.lock();
        match state.entries.get(entry.descriptor()) {
            Some(stored) if Arc::ptr_eq(stored, entry) => {
                state.entries.remove(entry.descriptor());
                true
            }
            _ => false,
        }
    }

    fn is_active(&self, window: &WindowId) -> bool {
        self.live_window(window).is_some()
    }

    fn destroy_window(&self, window: &WindowId) -> Result<usize> {
        let doomed = {
            let mut windows = self.windows.write();
            match windows.remove(window) {
                Some(ctx) => ctx.close(),
                None => return Ok(0),
            }
        };
        info!("Destroying window {} with {} beans", window, doomed.len());
        destroy_entries(doomed)
    }

    fn close_conversation(&self, window: &WindowId, group: &str) -> Result<usize> {
        let Some(ctx) = self.live_window(window) else {
            return Ok(0);
        };
        let doomed: Vec<_> = {
            let mut state = ctx.state.lock();
            let keys: Vec<_> = state
                .entries
                .keys()
                .filter(|d| d.group() == group)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| state.entries.remove(key))
                .collect()
        };
        debug!(
            "Closing conversation {} in window {} ({} beans)",
            group,
            window,
            doomed.len()
        );
        destroy_entries(doomed)
    }
}

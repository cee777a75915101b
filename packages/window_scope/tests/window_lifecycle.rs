use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use window_scope::{
    BeanDescriptor, BroadcastSink, ConfigSource, ContainerCompat, ContextState, ConversationConfig,
    CreationalContext, FnCreationalContext, GroupedConversationContext,
    InMemoryWindowContextManager, Instance, LifecycleEvent, LifecycleEventKind, LifecycleSink,
    Result, ScopeError, WindowContextManager, WindowId, enter_window,
};

type Log = Arc<Mutex<Vec<(LifecycleEventKind, String)>>>;

fn recording_sink() -> (Arc<dyn LifecycleSink>, Log) {
    let log: Log = Arc::default();
    let sink_log = log.clone();
    let sink = move |e: &LifecycleEvent| -> anyhow::Result<()> {
        sink_log.lock().push((e.kind, e.descriptor.to_string()));
        Ok(())
    };
    (Arc::new(sink), log)
}

/// A creational context that tags each instance with `tag` and counts both sides.
fn tagged_ctx(
    tag: &'static str,
    created: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
) -> Arc<dyn CreationalContext> {
    Arc::new(FnCreationalContext::with_destroy(
        move |_: &BeanDescriptor| -> anyhow::Result<Instance> {
            created.fetch_add(1, Ordering::SeqCst);
            // Widen the window in which a second caller can race us.
            thread::yield_now();
            Ok(Arc::new(tag))
        },
        move |_: &BeanDescriptor, _: Instance| {
            destroyed.fetch_add(1, Ordering::SeqCst);
        },
    ))
}

fn wid(s: &str) -> WindowId {
    WindowId::parse(s).unwrap()
}

fn kinds(log: &Log) -> Vec<LifecycleEventKind> {
    log.lock().iter().map(|(kind, _)| *kind).collect()
}

fn concurrent_creates_share_one_instance(compat: ContainerCompat) {
    let manager = Arc::new(InMemoryWindowContextManager::default());
    let (sink, log) = recording_sink();
    let scope = GroupedConversationContext::preconfigured(
        manager.clone(),
        ConversationConfig::all_events(),
    )
    .with_sink(sink)
    .with_compat(compat);

    let created = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let session = BeanDescriptor::new("UserSession");
    let barrier = Barrier::new(2);

    let results: Vec<Instance> = thread::scope(|s| {
        let mut handles = Vec::new();
        for tag in ["first", "second"] {
            let ctx = tagged_ctx(tag, created.clone(), destroyed.clone());
            let (scope, session, barrier) = (&scope, &session, &barrier);
            handles.push(s.spawn(move || {
                let _window = enter_window(wid("W1"));
                barrier.wait();
                scope.create(session, ctx).unwrap()
            }));
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let (a, b) = (&results[0], &results[1]);

    assert!(Arc::ptr_eq(a, b));
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(manager.entry_count(&wid("W1")), 1);

    let scoped = kinds(&log)
        .into_iter()
        .filter(|k| *k == LifecycleEventKind::Scoped)
        .count();
    assert_eq!(scoped, 1);

    manager.destroy_window(&wid("W1")).unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

// ── concurrent creates ──────────────────────────────────────────────

#[test]
fn concurrent_creates_pre_resolving() {
    for _ in 0..50 {
        concurrent_creates_share_one_instance(ContainerCompat::PreResolving);
    }
}

#[test]
fn concurrent_creates_direct_create() {
    for _ in 0..50 {
        concurrent_creates_share_one_instance(ContainerCompat::DirectCreate);
    }
}

#[test]
fn many_requests_many_windows() {
    const WINDOWS: usize = 4;
    const REQUESTS: usize = 8;

    let manager = Arc::new(InMemoryWindowContextManager::default());
    let scope = GroupedConversationContext::preconfigured(
        manager.clone(),
        ConversationConfig::default(),
    );
    let created = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let ctx = tagged_ctx("bean", created.clone(), destroyed.clone());
    let descriptors = [BeanDescriptor::new("cart"), BeanDescriptor::new("wizard")];
    let windows: Vec<_> = (0..WINDOWS).map(|_| WindowId::generate()).collect();
    let barrier = Barrier::new(WINDOWS * REQUESTS);

    let seen: Mutex<Vec<(WindowId, usize, Instance)>> = Mutex::default();
    thread::scope(|s| {
        for window in &windows {
            for _ in 0..REQUESTS {
                let (scope, ctx, descriptors, barrier, seen) =
                    (&scope, &ctx, &descriptors, &barrier, &seen);
                s.spawn(move || {
                    let _window = enter_window(window.clone());
                    barrier.wait();
                    for (i, d) in descriptors.iter().enumerate() {
                        let instance = scope.create(d, ctx.clone()).unwrap();
                        seen.lock().push((window.clone(), i, instance));
                    }
                });
            }
        }
    });

    assert_eq!(created.load(Ordering::SeqCst), WINDOWS * descriptors.len());

    // Everything observed for one (window, bean) key is the same instance.
    let seen = seen.into_inner();
    for (window, i, instance) in &seen {
        let first = seen
            .iter()
            .find(|(w, j, _)| w == window && j == i)
            .map(|(_, _, inst)| inst)
            .unwrap();
        assert!(Arc::ptr_eq(first, instance));
    }

    for window in &windows {
        assert_eq!(manager.destroy_window(window).unwrap(), descriptors.len());
    }
    assert_eq!(destroyed.load(Ordering::SeqCst), WINDOWS * descriptors.len());
}

// ── failed creation under contention ────────────────────────────────

/// A creational context that fails, but only after `started` and `finish`
/// have both been passed, so other requests can pile up behind it.
fn gated_failing_ctx(
    started: Arc<Barrier>,
    finish: Arc<Barrier>,
    attempts: Arc<AtomicUsize>,
) -> Arc<dyn CreationalContext> {
    Arc::new(FnCreationalContext::new(
        move |_: &BeanDescriptor| -> anyhow::Result<Instance> {
            attempts.fetch_add(1, Ordering::SeqCst);
            started.wait();
            finish.wait();
            anyhow::bail!("database unavailable")
        },
    ))
}

fn assert_creation_failed(outcome: Result<Instance>) {
    match outcome {
        Err(ScopeError::Creation { source, .. }) => {
            assert_eq!(source.to_string(), "database unavailable");
        }
        Err(other) => panic!("expected the creation error, got {other:?}"),
        Ok(_) => panic!("expected the creation error, got an instance"),
    }
}

fn failed_creation_with_concurrent_resolve(compat: ContainerCompat) {
    let manager = Arc::new(InMemoryWindowContextManager::default());
    let scope = GroupedConversationContext::preconfigured(
        manager.clone(),
        ConversationConfig::all_events(),
    )
    .with_compat(compat);
    let session = BeanDescriptor::new("UserSession");
    let started = Arc::new(Barrier::new(2));
    let finish = Arc::new(Barrier::new(2));
    let attempts = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        let failing = gated_failing_ctx(started.clone(), finish.clone(), attempts.clone());
        let (scope, session) = (&scope, &session);
        let creator = s.spawn(move || {
            let _window = enter_window(wid("W1"));
            scope.create(session, failing)
        });

        // The entry is stored and its creation is in flight.
        started.wait();
        let resolvers: Vec<_> = (0..3)
            .map(|_| {
                s.spawn(move || {
                    let _window = enter_window(wid("W1"));
                    scope.resolve(session)
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        finish.wait();

        assert_creation_failed(creator.join().unwrap());
        for resolver in resolvers {
            assert!(resolver.join().unwrap().unwrap().is_none());
        }
    });

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(manager.entry_count(&wid("W1")), 0);

    let _window = enter_window(wid("W1"));
    let created = Arc::new(AtomicUsize::new(0));
    let healthy = tagged_ctx("healthy", created.clone(), Arc::new(AtomicUsize::new(0)));
    let instance = scope.create(&session, healthy).unwrap();
    assert_eq!(*instance.downcast::<&str>().unwrap(), "healthy");
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

fn losing_create_recovers_from_failed_creator(compat: ContainerCompat) {
    let manager = Arc::new(InMemoryWindowContextManager::default());
    let scope =
        GroupedConversationContext::preconfigured(manager.clone(), ConversationConfig::default())
            .with_compat(compat);
    let session = BeanDescriptor::new("UserSession");
    let started = Arc::new(Barrier::new(2));
    let finish = Arc::new(Barrier::new(2));
    let attempts = Arc::new(AtomicUsize::new(0));
    let created = Arc::new(AtomicUsize::new(0));

    let survivor = thread::scope(|s| {
        let failing = gated_failing_ctx(started.clone(), finish.clone(), attempts.clone());
        let healthy = tagged_ctx("healthy", created.clone(), Arc::new(AtomicUsize::new(0)));
        let (scope, session) = (&scope, &session);
        let creator = s.spawn(move || {
            let _window = enter_window(wid("W1"));
            scope.create(session, failing)
        });

        started.wait();
        let loser = s.spawn(move || {
            let _window = enter_window(wid("W1"));
            scope.create(session, healthy)
        });
        thread::sleep(Duration::from_millis(20));
        finish.wait();

        assert_creation_failed(creator.join().unwrap());
        loser.join().unwrap().unwrap()
    });

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(manager.entry_count(&wid("W1")), 1);

    let _window = enter_window(wid("W1"));
    let resolved = scope.resolve(&session).unwrap().unwrap();
    assert!(Arc::ptr_eq(&resolved, &survivor));
}

#[test]
fn failed_creation_is_rolled_back_despite_concurrent_resolve() {
    for compat in [ContainerCompat::PreResolving, ContainerCompat::DirectCreate] {
        failed_creation_with_concurrent_resolve(compat);
    }
}

#[test]
fn losing_create_scopes_its_own_bean_after_failed_creation() {
    for compat in [ContainerCompat::PreResolving, ContainerCompat::DirectCreate] {
        losing_create_recovers_from_failed_creator(compat);
    }
}

#[test]
fn resolve_waits_instead_of_creating() {
    let manager = Arc::new(InMemoryWindowContextManager::default());
    let (sink, log) = recording_sink();
    let scope = GroupedConversationContext::preconfigured(
        manager.clone(),
        ConversationConfig::all_events(),
    )
    .with_sink(sink);
    let cart = BeanDescriptor::new("cart");
    let started = Arc::new(Barrier::new(2));
    let finish = Arc::new(Barrier::new(2));
    let created = Arc::new(AtomicUsize::new(0));

    let (made, seen) = thread::scope(|s| {
        let (gate_started, gate_finish, count) = (started.clone(), finish.clone(), created.clone());
        let slow: Arc<dyn CreationalContext> = Arc::new(FnCreationalContext::new(
            move |_: &BeanDescriptor| -> anyhow::Result<Instance> {
                count.fetch_add(1, Ordering::SeqCst);
                gate_started.wait();
                gate_finish.wait();
                Ok(Arc::new("cart"))
            },
        ));
        let (scope, cart) = (&scope, &cart);
        let creator = s.spawn(move || {
            let _window = enter_window(wid("W1"));
            scope.create(cart, slow)
        });

        started.wait();
        let resolver = s.spawn(move || {
            let _window = enter_window(wid("W1"));
            scope.resolve(cart)
        });
        thread::sleep(Duration::from_millis(20));
        finish.wait();

        (creator.join().unwrap().unwrap(), resolver.join().unwrap().unwrap())
    });

    let seen = seen.unwrap();
    assert!(Arc::ptr_eq(&made, &seen));
    assert_eq!(created.load(Ordering::SeqCst), 1);
    // The resolver may be woken before the creator notifies, so only count.
    let events = kinds(&log);
    let count = |kind: LifecycleEventKind| events.iter().filter(|k| **k == kind).count();
    assert_eq!(count(LifecycleEventKind::Scoped), 1);
    assert_eq!(count(LifecycleEventKind::Accessed), 2);
}

// ── configuration ───────────────────────────────────────────────────

struct CountingSource(AtomicUsize);

impl ConfigSource for CountingSource {
    fn load(&self) -> Result<ConversationConfig> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(ConversationConfig::default())
    }
}

#[test]
fn config_loads_once_under_contention() {
    let source = Arc::new(CountingSource(AtomicUsize::new(0)));
    let scope = GroupedConversationContext::new(
        Arc::new(InMemoryWindowContextManager::default()),
        source.clone(),
    );
    assert_eq!(scope.state(), ContextState::Uninitialized);

    let ctx = tagged_ctx(
        "bean",
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    );
    let barrier = Barrier::new(8);
    thread::scope(|s| {
        for i in 0..8 {
            let (scope, ctx, barrier) = (&scope, &ctx, &barrier);
            s.spawn(move || {
                let _window = enter_window(wid(&format!("w{i}")));
                barrier.wait();
                scope.create(&BeanDescriptor::new("cart"), ctx.clone()).unwrap();
            });
        }
    });

    assert_eq!(source.0.load(Ordering::SeqCst), 1);
    assert_eq!(scope.state(), ContextState::Configured);
}

// ── events ──────────────────────────────────────────────────────────

#[test]
fn scope_events_without_access_events() {
    let (sink, log) = recording_sink();
    let scope = GroupedConversationContext::preconfigured(
        Arc::new(InMemoryWindowContextManager::default()),
        ConversationConfig {
            scope_bean_event_enabled: true,
            ..Default::default()
        },
    )
    .with_sink(sink);

    let _window = enter_window(wid("W1"));
    let ctx = tagged_ctx(
        "bean",
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    );
    scope.create(&BeanDescriptor::new("cart"), ctx).unwrap();

    assert_eq!(
        log.lock().clone(),
        vec![(LifecycleEventKind::Scoped, "cart".to_string())]
    );
}

#[test]
fn broadcast_sink_sees_full_lifecycle() {
    let sink = Arc::new(BroadcastSink::default());
    let mut rx = sink.subscribe();
    let manager = Arc::new(InMemoryWindowContextManager::default());
    let scope = GroupedConversationContext::preconfigured(
        manager.clone(),
        ConversationConfig::all_events(),
    )
    .with_sink(sink);

    let _window = enter_window(wid("W1"));
    let cart = BeanDescriptor::new("cart");
    let ctx = tagged_ctx(
        "bean",
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    );
    let instance = scope.create(&cart, ctx).unwrap();
    assert!(scope.resolve(&cart).unwrap().is_some());
    manager.destroy_window(&wid("W1")).unwrap();

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.descriptor, cart);
        assert!(Arc::ptr_eq(&event.instance, &instance));
        received.push(event.kind);
    }
    assert_eq!(
        received,
        vec![
            LifecycleEventKind::Scoped,
            LifecycleEventKind::Accessed,
            LifecycleEventKind::Accessed,
            LifecycleEventKind::Unscoped,
        ]
    );
}

// ── destruction ─────────────────────────────────────────────────────

#[test]
fn destroy_window_destroys_each_entry_once() {
    let manager = Arc::new(InMemoryWindowContextManager::default());
    let (sink, log) = recording_sink();
    let scope = GroupedConversationContext::preconfigured(
        manager.clone(),
        ConversationConfig::all_events(),
    )
    .with_sink(sink);

    let destroyed = Arc::new(AtomicUsize::new(0));
    let ctx = tagged_ctx("bean", Arc::new(AtomicUsize::new(0)), destroyed.clone());

    let _window = enter_window(wid("W1"));
    scope.create(&BeanDescriptor::new("cart"), ctx.clone()).unwrap();
    scope.create(&BeanDescriptor::new("wizard"), ctx).unwrap();
    assert!(scope.is_active());

    assert_eq!(manager.destroy_window(&wid("W1")).unwrap(), 2);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert!(!scope.is_active());
    assert!(!manager.is_active(&wid("W1")));

    let mut unscoped: Vec<_> = log
        .lock()
        .iter()
        .filter(|(kind, _)| *kind == LifecycleEventKind::Unscoped)
        .map(|(_, name)| name.clone())
        .collect();
    unscoped.sort();
    assert_eq!(unscoped, vec!["cart".to_string(), "wizard".to_string()]);

    // A second destroy finds nothing left to do.
    assert_eq!(manager.destroy_window(&wid("W1")).unwrap(), 0);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
}

#[test]
fn close_conversation_keeps_other_groups() {
    let manager = Arc::new(InMemoryWindowContextManager::default());
    let scope = GroupedConversationContext::preconfigured(
        manager.clone(),
        ConversationConfig::default(),
    );
    let created = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let ctx = tagged_ctx("bean", created.clone(), destroyed.clone());

    let _window = enter_window(wid("W1"));
    let address = BeanDescriptor::new("address").in_group("checkout");
    let payment = BeanDescriptor::new("payment").in_group("checkout");
    let profile = BeanDescriptor::new("profile");
    for d in [&address, &payment, &profile] {
        scope.create(d, ctx.clone()).unwrap();
    }

    assert_eq!(manager.close_conversation(&wid("W1"), "checkout").unwrap(), 2);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert!(scope.resolve(&address).unwrap().is_none());
    assert!(scope.resolve(&profile).unwrap().is_some());

    // The conversation starts over with a fresh instance.
    scope.create(&address, ctx).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 4);
}

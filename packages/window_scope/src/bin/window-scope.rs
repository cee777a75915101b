use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use window_scope::{
    BeanDescriptor, ConfigSource, ContainerCompat, ConversationConfig, CreationalContext,
    FigmentConfigSource, FnCreationalContext, GroupedConversationContext,
    InMemoryWindowContextManager, Instance, LifecycleEvent, LifecycleEventKind, ScopeFileConfig,
    ThreadWindowResolver, WindowContextManager, WindowId, WindowSettings, enter_window,
};

#[derive(Parser)]
#[command(name = "window-scope")]
#[command(version)]
#[command(about = "Inspect configuration and exercise window-scoped bean lifecycles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory containing window-scope.toml
    #[arg(short, long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,

    /// Run concurrent requests against a set of windows and report the outcome
    Simulate {
        /// Number of windows
        #[arg(short, long, default_value = "4")]
        windows: usize,

        /// Concurrent requests per window
        #[arg(short, long, default_value = "8")]
        threads: usize,

        /// Beans each request asks for
        #[arg(short, long, default_value = "3")]
        beans: usize,

        /// Override the configured container compatibility mode
        #[arg(long, value_enum)]
        compat: Option<ContainerCompat>,

        /// Enable all lifecycle events regardless of configuration
        #[arg(long)]
        all_events: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Default, Serialize)]
struct EventCounts {
    scoped: usize,
    accessed: usize,
    unscoped: usize,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    compat: ContainerCompat,
    windows: usize,
    requests_per_window: usize,
    beans_per_request: usize,
    materialized: usize,
    destroyed: usize,
    failed_requests: usize,
    events: EventCounts,
}

#[derive(Default)]
struct Counters {
    materialized: AtomicUsize,
    destroyed: AtomicUsize,
    scoped: AtomicUsize,
    accessed: AtomicUsize,
    unscoped: AtomicUsize,
}

impl Counters {
    fn record(&self, event: &LifecycleEvent) {
        let counter = match event.kind {
            LifecycleEventKind::Scoped => &self.scoped,
            LifecycleEventKind::Accessed => &self.accessed,
            LifecycleEventKind::Unscoped => &self.unscoped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        "window_scope=debug"
    } else {
        "window_scope=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config => {
            let file_config = ScopeFileConfig::load(&cli.config_dir)
                .with_context(|| format!("Failed to load config from {:?}", cli.config_dir))?;
            println!("{}", serde_json::to_string_pretty(&file_config)?);
        }
        Commands::Simulate {
            windows,
            threads,
            beans,
            compat,
            all_events,
            format,
        } => {
            let report = simulate(&cli.config_dir, windows, threads, beans, compat, all_events)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print_report(&report),
            }
        }
    }

    Ok(())
}

fn simulate(
    config_dir: &std::path::Path,
    windows: usize,
    threads: usize,
    beans: usize,
    compat: Option<ContainerCompat>,
    all_events: bool,
) -> Result<SimulationReport> {
    let file_config = ScopeFileConfig::load(config_dir)
        .with_context(|| format!("Failed to load config from {:?}", config_dir))?;
    let compat = compat.unwrap_or(file_config.container);

    let manager = Arc::new(InMemoryWindowContextManager::with_settings(
        Arc::new(ThreadWindowResolver),
        WindowSettings::from_file(&file_config.window),
    ));
    let config_source: Arc<dyn ConfigSource> = if all_events {
        Arc::new(ConversationConfig::all_events())
    } else {
        Arc::new(FigmentConfigSource::from_dir(config_dir))
    };

    let counters = Arc::new(Counters::default());
    let sink_counters = counters.clone();
    let scope = GroupedConversationContext::new(manager.clone(), config_source)
        .with_compat(compat)
        .with_sink(Arc::new(move |event: &LifecycleEvent| -> anyhow::Result<()> {
            sink_counters.record(event);
            Ok(())
        }));

    let creator = creational_context(counters.clone());
    let descriptors: Vec<_> = (0..beans)
        .map(|i| BeanDescriptor::new(format!("bean-{i}")))
        .collect();
    let window_ids: Vec<_> = (0..windows).map(|_| WindowId::generate()).collect();

    info!(
        "Simulating {} windows x {} requests x {} beans ({})",
        windows, threads, beans, compat
    );

    let failed = AtomicUsize::new(0);
    std::thread::scope(|s| {
        for window in &window_ids {
            let barrier = Arc::new(Barrier::new(threads));
            for _ in 0..threads {
                let barrier = barrier.clone();
                let (scope, creator, failed) = (&scope, &creator, &failed);
                let descriptors = &descriptors;
                s.spawn(move || {
                    let _guard = enter_window(window.clone());
                    barrier.wait();
                    for descriptor in descriptors {
                        if let Err(e) = scope.create(descriptor, creator.clone()) {
                            warn!("Request in window {} failed: {}", window, e);
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        }
    });

    for window in &window_ids {
        manager
            .destroy_window(window)
            .with_context(|| format!("Failed to destroy window {window}"))?;
    }

    Ok(SimulationReport {
        compat,
        windows,
        requests_per_window: threads,
        beans_per_request: beans,
        materialized: counters.materialized.load(Ordering::Relaxed),
        destroyed: counters.destroyed.load(Ordering::Relaxed),
        failed_requests: failed.into_inner(),
        events: EventCounts {
            scoped: counters.scoped.load(Ordering::Relaxed),
            accessed: counters.accessed.load(Ordering::Relaxed),
            unscoped: counters.unscoped.load(Ordering::Relaxed),
        },
    })
}

fn creational_context(counters: Arc<Counters>) -> Arc<dyn CreationalContext> {
    let destroy_counters = counters.clone();
    Arc::new(FnCreationalContext::with_destroy(
        move |descriptor: &BeanDescriptor| -> anyhow::Result<Instance> {
            let n = counters.materialized.fetch_add(1, Ordering::Relaxed);
            Ok(Arc::new(format!("{descriptor}#{n}")))
        },
        move |_: &BeanDescriptor, _: Instance| {
            destroy_counters.destroyed.fetch_add(1, Ordering::Relaxed);
        },
    ))
}

fn print_report(report: &SimulationReport) {
    let expected = report.windows * report.beans_per_request;
    println!("compat:        {}", report.compat);
    println!(
        "requests:      {} windows x {} requests x {} beans",
        report.windows, report.requests_per_window, report.beans_per_request
    );
    println!("materialized:  {} (expected {})", report.materialized, expected);
    println!("destroyed:     {}", report.destroyed);
    println!("failed:        {}", report.failed_requests);
    println!(
        "events:        scoped={} accessed={} unscoped={}",
        report.events.scoped, report.events.accessed, report.events.unscoped
    );
}

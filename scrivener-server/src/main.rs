use clap::{Parser, ValueEnum};
use scrivener::{IndexDefinition, Manager, RemotePolicy, ScrivenerConfig, TantivyEngine};
use scrivener_cluster::{HttpTransport, Membership, MembershipResolver, NodeConfig};
use scrivener_http::{serve, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    Retry,
    #[value(alias = "fire_and_forget")]
    FireAndForget,
}

#[derive(Debug, Parser)]
#[command(name = "scrivener", version, about = "Single-writer index node")]
struct Cli {
    #[arg(long, env = "SCRIVENER_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
    /// Overrides the bind address from node.json / SCRIVENER_BIND_ADDR.
    #[arg(long)]
    bind_addr: Option<String>,
    #[arg(long, env = "SCRIVENER_REMOTE_POLICY", value_enum)]
    remote_policy: Option<PolicyArg>,
    #[arg(long, env = "SCRIVENER_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,
    #[arg(long, env = "SCRIVENER_RETRY_DELAY_MS")]
    retry_delay_ms: Option<u64>,
    #[arg(long, env = "SCRIVENER_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,
    /// Seconds between peer health probes.
    #[arg(long, env = "SCRIVENER_HEALTH_INTERVAL_SECS", default_value_t = 5)]
    health_interval_secs: u64,
}

fn retry_parts(policy: RemotePolicy) -> (u32, Duration) {
    match policy {
        RemotePolicy::RetryFixedDelay {
            max_attempts,
            delay,
        } => (max_attempts, delay),
        RemotePolicy::FireAndForget => retry_parts(RemotePolicy::default()),
    }
}

impl Cli {
    /// Environment first, then explicit flags on top.
    fn scrivener_config(&self) -> ScrivenerConfig {
        let mut config = ScrivenerConfig::from_env();
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity.max(1);
        }

        let (mut max_attempts, mut delay) = retry_parts(config.remote_policy);
        if let Some(n) = self.max_attempts {
            max_attempts = n.max(1);
        }
        if let Some(ms) = self.retry_delay_ms {
            delay = Duration::from_millis(ms);
        }
        let fire_and_forget = match self.remote_policy {
            Some(policy) => policy == PolicyArg::FireAndForget,
            None => config.remote_policy == RemotePolicy::FireAndForget,
        };
        config.remote_policy = if fire_and_forget {
            RemotePolicy::FireAndForget
        } else {
            RemotePolicy::RetryFixedDelay {
                max_attempts,
                delay,
            }
        };
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    std::fs::create_dir_all(&cli.data_dir)?;
    let mut node = NodeConfig::load_or_default(&cli.data_dir);
    if let Some(bind_addr) = &cli.bind_addr {
        node.bind_addr = bind_addr.clone();
    }
    let config = cli.scrivener_config();
    tracing::info!(
        "Starting node {} on {} (policy {:?}, queue capacity {})",
        node.node_id,
        node.bind_addr,
        config.remote_policy,
        config.queue_capacity
    );

    let membership = Arc::new(Membership::from_config(&node));
    let manager: Arc<Manager<TantivyEngine>> = Manager::new(
        config.clone(),
        Arc::new(MembershipResolver::new(Arc::clone(&membership))),
        Arc::new(HttpTransport::new(Arc::clone(&membership))),
    );

    for def in IndexDefinition::load_all(&cli.data_dir.join("indexes.json"))? {
        let engine = TantivyEngine::open(&def, Some(&cli.data_dir), config.writer.clone())?;
        manager.register_index(def.name.clone(), engine)?;
        manager.warm_up(&def.name)?;
    }
    tracing::info!(
        "Serving {} index(es); designated writer is {}",
        manager.index_ids().len(),
        manager.designated_writer_address()
    );

    let probe = (!membership.peers().is_empty()).then(|| {
        membership.start_health_probe(
            Duration::from_secs(cli.health_interval_secs.max(1)),
            manager.shutdown_signal(),
        )
    });

    let state = Arc::new(AppState::new(Arc::clone(&manager), Some(membership)));
    let bind_addr = node.bind_addr.clone();
    let mut server = tokio::spawn(async move { serve(state, &bind_addr).await });

    tokio::select! {
        result = &mut server => {
            manager.shutdown().await;
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    manager.shutdown().await;
    server.await??;
    if let Some(probe) = probe {
        probe.await?;
    }
    tracing::info!("Stopped");
    Ok(())
}

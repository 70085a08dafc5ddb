use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use walink::adapters::ReqwestHttpClient;
use walink::backend::{HttpBackend, LinkBackend};
use walink::bindings::{MessageFeed, PairingPanel, StatsPanel, StatusBadge};
use walink::config::LinkConfig;
use walink::domain::ChannelId;
use walink::lifecycle::LifecycleController;
use walink::logging;
use walink::transport::TransportAdapter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Channel used when neither arguments nor `WALINK_CHANNELS` name one.
const FALLBACK_CHANNEL: &str = "primary";

/// Every surface bound to one channel.
struct ChannelViews {
    badge: StatusBadge,
    pairing: PairingPanel,
    stats: StatsPanel,
    feed: MessageFeed,
}

impl ChannelViews {
    fn attach(controller: &LifecycleController, channel: &ChannelId) -> Result<Self> {
        Ok(Self {
            badge: StatusBadge::attach(controller, channel)?,
            pairing: PairingPanel::attach(controller, channel)?,
            stats: StatsPanel::attach(controller, channel)?,
            feed: MessageFeed::attach(controller, channel)?,
        })
    }

    fn print(&self, channel: &ChannelId) {
        println!("== {} ==", channel);
        println!("{}", self.badge.render());
        println!("{}", self.pairing.render());
        println!("{}", self.stats.render());
        let messages = self.feed.render();
        if !messages.is_empty() {
            println!("{}", messages);
        }
        println!();
    }
}

fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("walink {}", VERSION);
        return Ok(());
    }

    color_eyre::install()?;
    logging::init();

    let mut config = LinkConfig::from_env()?;
    let from_args: Vec<ChannelId> = std::env::args()
        .skip(1)
        .filter(|arg| !arg.starts_with("--"))
        .map(ChannelId::from)
        .collect();
    if !from_args.is_empty() {
        config.channels = from_args;
    }
    if config.channels.is_empty() {
        config.channels.push(ChannelId::from(FALLBACK_CHANNEL));
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config))
}

async fn run(config: LinkConfig) -> Result<()> {
    info!(
        base_url = %config.base_url,
        operator = %config.operator_id,
        channels = config.channels.len(),
        "starting walink"
    );

    let http = ReqwestHttpClient::with_connect_timeout(config.command_timeout)?;
    let backend: Arc<dyn LinkBackend> = Arc::new(HttpBackend::new(http, config.base_url.clone()));
    let controller = LifecycleController::new(Arc::clone(&backend), config.lifecycle_policy());
    for channel in &config.channels {
        controller.register(channel.clone());
    }

    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel::<ChannelId>();
    let mut views = HashMap::new();
    for channel in &config.channels {
        views.insert(channel.clone(), ChannelViews::attach(&controller, channel)?);
        let tx = changed_tx.clone();
        let changed = channel.clone();
        controller.store().subscribe(channel, move |_| {
            let _ = tx.send(changed.clone());
        });
    }

    let transport = TransportAdapter::spawn(
        Arc::clone(&backend),
        Arc::new(controller.clone()),
        config.transport_config(),
    );
    let mut push_state = transport.watch_state();

    for channel in &config.channels {
        if let Some(channel_views) = views.get(channel) {
            channel_views.print(channel);
            if let Err(e) = channel_views.pairing.generate().await {
                warn!(%channel, code = e.error_code(), category = %e.category(), "connect failed: {}", e);
                eprintln!("{}: {} {}", channel, e.user_message(), e.category().hint());
            }
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            Some(channel) = changed_rx.recv() => {
                if let Some(channel_views) = views.get(&channel) {
                    channel_views.print(&channel);
                }
            }
            changed = push_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *push_state.borrow_and_update();
                println!("-- live updates: {} --", state);
            }
        }
    }

    transport.shutdown().await;
    Ok(())
}

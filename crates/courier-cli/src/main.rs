mod demo;
mod logging;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use courier_core::EndpointBuilder;
use courier_core::TypedMessage;
use courier_core::impls::InMemoryStore;
use courier_core::ports::{Clock, DurableStore, SystemClock};
use tracing::info;

use crate::demo::{MessageEvent, MessageEventHandler};
use crate::settings::{DEFAULT_CONFIG_PATH, Settings};

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version, about = "Run a transactional messaging endpoint")]
struct Cli {
    /// Settings file; missing is fine, defaults and COURIER_* env apply.
    #[arg(short, long, env = "COURIER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override `endpoint.workers`.
    #[arg(long)]
    workers: Option<usize>,

    /// Demo events to publish after start-up.
    #[arg(long, default_value_t = 3)]
    demo_messages: u32,
}

fn open_store(connection_string: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn DurableStore>> {
    match connection_string.strip_prefix("memory://") {
        Some(_) => Ok(Arc::new(InMemoryStore::new(clock))),
        None => bail!("unsupported connection string '{connection_string}': only memory:// is available"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(workers) = cli.workers {
        settings.endpoint.workers = workers;
    }
    let _log_guard = logging::init(&settings.logging);

    let config = settings.endpoint_config()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(config.connection_string(), Arc::clone(&clock))?;

    let endpoint = EndpointBuilder::new(config)
        .store(store)
        .clock(clock)
        .register::<MessageEvent, _>(MessageEventHandler)?
        .expect_messages(&[MessageEvent::TYPE])
        .build()?;
    let running = endpoint.start().await?;

    let session = running.session();
    for n in 0..cli.demo_messages {
        let sent = session
            .publish(&MessageEvent {
                text: format!("demo message {n}"),
            })
            .await?;
        info!(n, subscribers = sent, "demo event published");
    }

    info!("running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    running.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_memory_connection_strings_are_accepted() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        assert!(open_store("memory://default", clock.clone()).is_ok());
        assert!(open_store("postgres://localhost/courier", clock).is_err());
    }
}

mod settings;

use tracing::{error, info};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn listen_for_cancel(
    cancel_token: &tokio_util::sync::CancellationToken,
    task_tracker: &tokio_util::task::TaskTracker,
) {
    #[cfg(unix)]
    let mut term_handler =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register signal handlers");

    let cancel_token = cancel_token.clone();
    let task_tracker_cloned = task_tracker.clone();
    task_tracker.spawn(async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = term_handler.recv() => {
                    info!("Received terminate signal, stopping...");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received CTRL+C, stopping...");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received CTRL+C, stopping...");
        }

        cancel_token.cancel();
        task_tracker_cloned.close();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some((settings, config_source)) = settings::init() else {
        return Ok(());
    };

    let log_level = settings::log_level(&settings);
    {
        use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};
        let filter = EnvFilter::builder()
            .with_default_directive(
                tracing_subscriber::filter::LevelFilter::from_level(log_level).into(),
            )
            .from_env_lossy();
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(filter))
            .init();
    }

    info!("{PKG_NAME} version {PKG_VERSION} starting...");
    info!("{config_source}");

    inner_main(settings).await.inspect_err(|e| error!("{e}"))
}

async fn inner_main(settings: settings::Settings) -> anyhow::Result<()> {
    let node = corvid_node::Node::new(settings.node).await?;

    let cancel_token = tokio_util::sync::CancellationToken::new();
    let task_tracker = tokio_util::task::TaskTracker::new();

    node.start().await?;
    listen_for_cancel(&cancel_token, &task_tracker);

    info!("Started successfully");

    cancel_token.cancelled().await;
    task_tracker.wait().await;

    node.shutdown().await;

    info!("Stopped");
    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use warren_amqp_mock::admin_api::{AdminApiServer, AdminState};
use warren_amqp_mock::broker::{AmqpConnection, BrokerConnection};
use warren_amqp_mock::config::Config;
use warren_amqp_mock::consumer::{ConsumerFleet, Matcher};
use warren_amqp_mock::expectation::ExpectationRegistry;
use warren_amqp_mock::subscription::SubscriptionService;

#[derive(Parser, Debug)]
#[command(name = "warren-amqp-mock")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: String,
    /// Override the admin API port from the configuration
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let mut config = Config::from_file(&args.config)?;
    if let Some(port) = args.port {
        config.listen.port = port;
    }

    info!(url = config.amqp.url.as_str(), "connecting to broker");
    let connection = Arc::new(
        AmqpConnection::connect_with_retry(&config.amqp.url, config.amqp.connection_timeout())
            .await
            .context("failed to establish broker connection")?,
    );

    let registry = Arc::new(ExpectationRegistry::new());
    let fleet = Arc::new(ConsumerFleet::new(
        Arc::clone(&connection) as Arc<dyn BrokerConnection>,
        Arc::clone(&registry) as Arc<dyn Matcher>,
    ));
    let subscriptions = Arc::new(SubscriptionService::new(Arc::clone(&fleet)));

    for queue in &config.queues {
        subscriptions
            .subscribe(queue, false)
            .await
            .with_context(|| format!("failed to subscribe to queue {queue}"))?;
        info!(queue = queue.as_str(), "subscribed at startup");
    }

    let state = Arc::new(AdminState {
        registry,
        subscriptions,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen.port));
    let admin = AdminApiServer::new(addr, state);
    tokio::spawn(async move {
        if let Err(e) = admin.run().await {
            error!(error = %e, "admin API server failed");
        }
    });

    fleet
        .run(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await
        .context("consumer fleet shutdown failed")?;

    if let Err(e) = connection.close().await {
        error!(error = %e, "failed to close broker connection");
    }

    info!("shutting down");
    Ok(())
}

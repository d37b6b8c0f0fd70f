/*!
Run the chat server until interrupted.
*/
use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{event, Level};
use tracing_subscriber::{
    fmt::layer,
    filter::EnvFilter,
    prelude::*,
};

use linechat::{
    config::Config,
    credentials::CredentialStore,
    history::HistoryLog,
    hub::Hub,
};

/// How long to wait for sessions to close after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(layer())
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::parse();
    event!(Level::DEBUG, "configuration: {:?}", &cfg);

    let credentials = CredentialStore::open(&cfg.users).await;
    let history = HistoryLog::new(&cfg.history);
    history.touch().await;
    let hub = Arc::new(Hub::new(credentials, history));

    // Without a listener there's nothing to do.
    let listener = match TcpListener::bind(&cfg.addr).await {
        Ok(l) => l,
        Err(e) => {
            event!(Level::ERROR, "unable to bind {}: {}", &cfg.addr, &e);
            std::process::exit(1);
        },
    };

    let server = tokio::spawn(hub.clone().run(listener));

    if let Err(e) = tokio::signal::ctrl_c().await {
        // No way to be told to stop, so just keep serving.
        event!(Level::ERROR, "unable to listen for ctrl-c: {}", &e);
        std::future::pending::<()>().await;
    }
    event!(Level::INFO, "interrupted; shutting down");
    hub.shutdown().await;

    if let Err(e) = server.await {
        event!(Level::ERROR, "accept loop failed: {}", &e);
    }

    // Let sessions say goodbye before the runtime drops them.
    if tokio::time::timeout(SHUTDOWN_GRACE, hub.wait_idle()).await.is_err() {
        event!(Level::WARN,
            "{} sessions still open at exit", hub.live_count().await
        );
    }
}

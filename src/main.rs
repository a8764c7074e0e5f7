use clap::Parser;
use streamtv_core::config::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A missing .env is not an error; an unreadable/malformed one is
    // ignored too since dotenvy already only loads *additional* vars on
    // top of whatever the environment (or the CLI's own --env flags) set.
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
    };

    if let Err(e) = streamtv_core::run(cli, shutdown).await {
        tracing::error!(error = %e, "fatal startup error");
        eprintln!("streamtv: {e}");
        std::process::exit(1);
    }
}

//! Freeplan keeper binary

use keeper_server::{Config, KeeperServer, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging is configured from the file, so report load errors on stderr.
    let loaded = Config::locate().and_then(|path| Config::load_from_file(&path).map(|config| (path, config)));
    let (path, config) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", common::Error::from(e));
            std::process::exit(1);
        }
    };

    common::logging::init_with(config.logging.level(), config.logging.is_json())?;

    tracing::info!(
        path = %path.display(),
        hostname = config.effective_hostname(),
        mode = %config.mode,
        "Freeplan keeper starting"
    );

    let server = KeeperServer::new(config.to_server_config());
    tokio::spawn(shutdown_signal(server.shutdown_token()));

    server.run().await;

    Ok(())
}

//! LockstepDB server binary

use std::env;

use anyhow::Context;
use lockstepdb::server::{Server, ServerConfig};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::new();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-H" => {
                let host = args.get(i + 1).context("--host requires a value")?;
                config = config.host(host.as_str());
                i += 2;
            }
            "--port" | "-p" => {
                let port = args
                    .get(i + 1)
                    .context("--port requires a value")?
                    .parse()
                    .context("invalid port")?;
                config = config.port(port);
                i += 2;
            }
            "--data-dir" | "-d" => {
                let dir = args.get(i + 1).context("--data-dir requires a value")?;
                config = config.data_dir(dir);
                i += 2;
            }
            "--log-file" | "-l" => {
                let path = args.get(i + 1).context("--log-file requires a value")?;
                config = config.log_file(path);
                i += 2;
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = parse_args()?;
    let server = Server::new(config).context("failed to initialize server")?;
    server.start().context("server failed")?;
    Ok(())
}

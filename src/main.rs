use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use flint::core::socket::{ignore_sigpipe, make_listener};
use flint::{Reactor, ServerConfig, ServerContext};

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "flint".to_owned());
    let Some(port) = args.next() else {
        let name = Path::new(&program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(program);
        println!("usage: {name} port_number");
        return Ok(ExitCode::FAILURE);
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port {port:?}"))?;

    ignore_sigpipe();

    let config = ServerConfig::load().context("loading configuration")?;
    let ctx = Arc::new(ServerContext::new(config).context("creating epoll context")?);

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener =
        make_listener(listen_addr).with_context(|| format!("binding {listen_addr}"))?;
    let mut reactor = Reactor::new(listener, Arc::clone(&ctx))?;

    {
        let ctx = Arc::clone(&ctx);
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            ctx.shutdown();
        })
        .context("installing Ctrl-C handler")?;
    }

    tracing::info!("Starting flint on {listen_addr}");
    reactor.run()?;
    Ok(ExitCode::SUCCESS)
}

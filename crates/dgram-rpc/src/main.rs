//! dgram-rpc - serve the demo procedures over UDP.
//!
//! By default the binary binds the server and runs until Ctrl+C. With
//! `--demo` it instead calls every demo procedure locally, then again through
//! a remote client against its own server, prints the results and exits.

mod sample;

use anyhow::{Context, Result};
use clap::Parser;
use dgram_core::{
    serialize, LocalServiceProvider, RemoteServiceProvider, RpcConfig, RpcServer, ServiceProvider,
    ServiceProviderExt,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "dgram-rpc")]
#[command(about = "Datagram RPC server for named procedures")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = RpcConfig::DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run the local and remote walkthrough, then exit
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let registry = sample::registry();
    for procedure in registry.procedures() {
        info!("Registered {}", procedure);
    }
    let local = LocalServiceProvider::new(registry);

    let addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to resolve {}", args.host))?
        .next()
        .with_context(|| format!("no address found for {}", args.host))?;

    if args.demo {
        return run_demo(local, addr).await;
    }

    let server = RpcServer::start(local, addr).await?;

    // Print the bound address so callers using port 0 can find the server
    println!("RPC_ADDR={}", server.addr());

    info!("RPC server running on {}", server.addr());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    server.stopped().await;
    Ok(())
}

/// Call every demo procedure locally, then the same calls over UDP.
async fn run_demo(local: LocalServiceProvider, addr: SocketAddr) -> Result<()> {
    call_samples("local", &local).await?;

    let server = RpcServer::start(local, addr).await?;
    let remote = RemoteServiceProvider::new(reachable(server.addr())).await?;
    call_samples("remote", &remote).await?;

    server.terminate();
    server.stopped().await;
    info!("Demo finished");
    Ok(())
}

async fn call_samples(label: &str, provider: &dyn ServiceProvider) -> Result<()> {
    let sum: i32 = provider.call(sample::SAMPLE_TYPE, "sum", (1, 3, 4)).await?;
    println!("[{}] sum(1, 3, 4) = {}", label, sum);

    let sum: i32 = provider.call(sample::SAMPLE_TYPE, "sum", ()).await?;
    println!("[{}] sum() = {}", label, sum);

    let sum: i32 = provider.call(sample::SAMPLE_TYPE, "sum", (1,)).await?;
    println!("[{}] sum(1) = {}", label, sum);

    let total: i32 = provider
        .call_terminated(
            sample::SAMPLE_TYPE,
            "integerArrayTest",
            vec![Some(serialize(&vec![12, 4, 1, 3])), None],
        )
        .await?;
    println!("[{}] integerArrayTest([12, 4, 1, 3]) = {}", label, total);

    let failed: dgram_core::Result<i32> = provider
        .call(sample::SAMPLE_TYPE, "fail", ("demo failure".to_string(),))
        .await;
    match failed {
        Ok(value) => println!("[{}] fail(..) unexpectedly returned {}", label, value),
        Err(e) => println!("[{}] fail(..) raised {}", label, e),
    }

    Ok(())
}

/// A wildcard bind address is not a destination; send to loopback instead.
fn reachable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => (Ipv4Addr::LOCALHOST, addr.port()).into(),
        IpAddr::V6(ip) if ip.is_unspecified() => (Ipv6Addr::LOCALHOST, addr.port()).into(),
        _ => addr,
    }
}

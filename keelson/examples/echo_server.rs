//! Length-prefixed echo server.
//!
//! ```bash
//! RUST_LOG=info cargo run --example echo_server -- 127.0.0.1:5050
//! ```
//!
//! Type `status` to print connection statistics, `quit` to stop.

use keelson::dev_tracing::init_tracing;
use keelson::prelude::*;
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

struct Echo;

impl Handler<TcpTransport> for Echo {
    fn on_message(&self, ep: &Endpoint<TcpTransport>, msg: &Packet<SocketAddr>) -> bool {
        // Back-pressure: leave the message queued until the reply fits.
        ep.enqueue_send(&msg.body, false)
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5050".to_string())
        .parse()?;

    let pump = ServicePump::new(PumpOptions::default())?;
    let registry = Arc::new(Registry::new(
        pump.reactor(),
        PoolOptions::default().with_reuse(true),
        EndpointOptions::default().with_heartbeat(Duration::from_secs(5), 3),
    ));
    let server = Arc::new(
        TcpServer::new(addr, registry, || Arc::new(Echo) as Arc<dyn Handler<TcpTransport>>)
            .with_name("echo"),
    );
    pump.add_service(server.clone());
    pump.start_service();
    info!("echo server on {:?}", server.local_addr());

    for line in std::io::stdin().lock().lines() {
        match line?.trim() {
            "quit" => break,
            "status" => {
                println!("{} connection(s)", server.size());
                server.registry().for_each(|ep| println!("[{}]\n{}", ep.id(), ep.statistic()));
            }
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    pump.stop_service();
    Ok(())
}

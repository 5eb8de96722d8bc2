//! Client for `echo_server` that reconnects whenever the server goes away.
//!
//! ```bash
//! RUST_LOG=info cargo run --example echo_client -- 127.0.0.1:5050
//! ```
//!
//! Every line typed is sent to the server; replies are printed. `quit` stops.

use keelson::dev_tracing::init_tracing;
use keelson::prelude::*;
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct Print;

impl Handler<TcpTransport> for Print {
    fn on_message(&self, _ep: &Endpoint<TcpTransport>, msg: &Packet<SocketAddr>) -> bool {
        println!("<- {}", String::from_utf8_lossy(&msg.body));
        true
    }

    fn on_start(&self, ep: &Endpoint<TcpTransport>) {
        if let Some(transport) = ep.transport() {
            println!("connected to {}", transport.peer_addr());
        }
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5050".to_string())
        .parse()?;
    let backoff = ReconnectOptions::default()
        .with_interval(Duration::from_millis(200))
        .with_max_interval(Duration::from_secs(5));

    let pump = ServicePump::new(PumpOptions::default().with_worker_threads(2))?;
    let handler = Reconnect::new(Print, addr).with_backoff(backoff.clone());
    let switch = handler.switch();
    let ep = Endpoint::new(
        pump.reactor(),
        Arc::new(handler),
        EndpointOptions::default().with_heartbeat(Duration::from_secs(5), 3),
    );
    let client = TcpClient::new(ep.clone(), addr)
        .with_switch(switch)
        .with_backoff(backoff);
    pump.add_service(Arc::new(client));
    pump.start_service();

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        match line.trim() {
            "quit" => break,
            "" => {}
            text => {
                if !pump.block_on(ep.safe_send(Bytes::copy_from_slice(text.as_bytes()))) {
                    println!("not connected, message dropped");
                }
            }
        }
    }

    pump.stop_service();
    Ok(())
}

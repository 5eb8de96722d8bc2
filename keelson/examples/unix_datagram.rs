//! Two Unix datagram sockets talking to each other.
//!
//! ```bash
//! cargo run --example unix_datagram
//! ```
//!
//! Every word typed is sent both ways. `restart` stops and restarts the
//! services (the sockets are reopened), `quit` ends.

#[cfg(unix)]
fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    use keelson::dev_tracing::init_tracing;
    use keelson::prelude::*;
    use std::io::BufRead;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    struct Print;

    impl Handler<UnixDatagramTransport> for Print {
        fn on_message(&self, _ep: &Endpoint<UnixDatagramTransport>, msg: &Packet<PathBuf>) -> bool {
            println!("{}", String::from_utf8_lossy(&msg.body));
            true
        }
    }

    fn single(
        pump: &ServicePump,
        local: &str,
        peer: &str,
    ) -> (Endpoint<UnixDatagramTransport>, SingleSocketService<UnixDatagramTransport>) {
        let ep = Endpoint::with_codec(
            pump.reactor(),
            Arc::new(Print),
            EndpointOptions::default(),
            Arc::new(RawPacker),
            Box::new(RawUnpacker),
        );
        let (local, peer) = (PathBuf::from(local), PathBuf::from(peer));
        let service = SingleSocketService::new(ep.clone())
            .with_name(local.display().to_string())
            .with_opener(move || UnixDatagramTransport::bind(&local, Some(peer.clone())));
        (ep, service)
    }

    init_tracing();
    println!("type quit to end.");

    let pump = ServicePump::new(PumpOptions::default().with_worker_threads(1))?;
    let (uu1, s1) = single(&pump, "unix-socket-1", "unix-socket-2");
    let (uu2, s2) = single(&pump, "unix-socket-2", "unix-socket-1");
    pump.add_service(Arc::new(s1));
    pump.add_service(Arc::new(s2));
    pump.start_service();

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        for word in line.split_whitespace() {
            match word {
                "quit" => {
                    pump.stop_service();
                    return Ok(());
                }
                "restart" => {
                    pump.stop_service();
                    while !(uu1.obsoleted() && uu2.obsoleted()) {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    pump.start_service();
                }
                word => {
                    uu1.enqueue_send(format!("uu1 -> uu2: {word}"), false);
                    uu2.enqueue_send(format!("uu2 -> uu1: {word}"), false);
                }
            }
        }
    }

    pump.stop_service();
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("Unix domain sockets are not available on this platform");
}

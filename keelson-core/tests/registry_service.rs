use keelson_core::endpoint::Endpoint;
use keelson_core::handler::Handler;
use keelson_core::inproc::{pair, InprocTransport};
use keelson_core::options::{EndpointOptions, PoolOptions, PumpOptions};
use keelson_core::reactor::{Reactor, ServicePump};
use keelson_core::registry::Registry;
use keelson_core::service::{MultiSocketService, SingleSocketService};
use keelson_core::transport::Packet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Counter {
    starts: AtomicUsize,
    closes: AtomicUsize,
}

impl Handler<InprocTransport> for Counter {
    fn on_message(&self, _: &Endpoint<InprocTransport>, _: &Packet<String>) -> bool {
        true
    }

    fn on_start(&self, _: &Endpoint<InprocTransport>) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_close(&self, _: &Endpoint<InprocTransport>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_get_unique_ids() {
    let reg = Arc::new(Registry::<InprocTransport>::new(
        Reactor::try_current().unwrap(),
        PoolOptions::default(),
        EndpointOptions::default(),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let reg = reg.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    let ep = reg.create(Arc::new(Counter::default()));
                    assert!(reg.add(&ep));
                    ids.push(ep.id());
                }
                ids
            })
        })
        .collect();

    let mut all = Vec::new();
    for task in tasks {
        let ids = task.await.unwrap();
        // Each task sees its own ids increase.
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all.extend(ids);
    }
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 400);
    assert_eq!(reg.size(), 400);
    assert_eq!(reg.ids(), all);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_adds_never_exceed_max_size() {
    const MAX: usize = 10;
    let reg = Arc::new(Registry::<InprocTransport>::new(
        Reactor::try_current().unwrap(),
        PoolOptions::default().with_max_size(MAX),
        EndpointOptions::default(),
    ));
    let barrier = Arc::new(std::sync::Barrier::new(16));

    let threads: Vec<_> = (0..16)
        .map(|_| {
            let (reg, barrier) = (reg.clone(), barrier.clone());
            std::thread::spawn(move || {
                let eps: Vec<_> = (0..4).map(|_| reg.create(Arc::new(Counter::default()))).collect();
                barrier.wait();
                eps.iter().filter(|ep| reg.add(ep)).count()
            })
        })
        .collect();
    let accepted: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();

    assert_eq!(accepted, MAX);
    assert_eq!(reg.size(), MAX);

    // A removal frees exactly one slot.
    let first = reg.ids()[0];
    assert!(reg.remove(first));
    let late = reg.create(Arc::new(Counter::default()));
    assert!(reg.add(&late));
    let refused = reg.create(Arc::new(Counter::default()));
    assert!(!reg.add(&refused));
    assert_eq!(reg.size(), MAX);
}

#[test]
fn multi_socket_service_follows_the_pump() {
    let pump = ServicePump::new(PumpOptions::default().with_worker_threads(2)).unwrap();
    let reg = Arc::new(Registry::new(
        pump.reactor(),
        PoolOptions::default(),
        EndpointOptions::default(),
    ));
    let service = Arc::new(MultiSocketService::new(reg).with_name("peers"));
    pump.add_service(service.clone());

    let counter = Arc::new(Counter::default());
    let mut remotes = Vec::new();
    let early = service.create(counter.clone());
    let (local, remote) = pair("early", "peer");
    early.attach(local);
    remotes.push(remote);
    assert!(service.add_socket(&early));
    assert!(!early.started());

    assert!(pump.start_service());
    assert!(service.is_started());
    assert!(early.started());

    let late = service.create(counter.clone());
    let (local, remote) = pair("late", "peer");
    late.attach(local);
    remotes.push(remote);
    assert!(service.add_socket(&late));
    assert!(late.started());
    assert_eq!(counter.starts.load(Ordering::SeqCst), 2);

    assert_eq!(service.size(), 2);
    assert!(service.exists(late.id()));
    assert!(service.find(early.id()).unwrap().same_as(&early));

    pump.stop_service();
    assert!(!service.is_started());
    assert!(!early.started() && !late.started());
    assert!(wait_until(|| counter.closes.load(Ordering::SeqCst) == 2));
}

#[test]
fn single_socket_service_starts_and_closes() {
    let pump = ServicePump::new(PumpOptions::default().with_worker_threads(1)).unwrap();
    let counter = Arc::new(Counter::default());
    let ep = Endpoint::new(pump.reactor(), counter.clone(), EndpointOptions::default());
    let (local, _remote) = pair("solo", "peer");
    ep.attach(local);

    let service = Arc::new(SingleSocketService::new(ep.clone()).with_name("solo"));
    pump.add_service(service.clone());
    assert!(!ep.started());

    pump.start_service();
    assert!(service.endpoint().started());
    pump.stop_service();
    assert!(!ep.started());
    assert!(wait_until(|| counter.closes.load(Ordering::SeqCst) == 1));
}

#[test]
fn stopped_reactor_refuses_start() {
    let pump = ServicePump::new(PumpOptions::default().with_worker_threads(1)).unwrap();
    let ep = Endpoint::new(pump.reactor(), Arc::new(Counter::default()), EndpointOptions::default());
    let (local, _remote) = pair("idle", "peer");
    ep.attach(local);
    assert!(!ep.start());

    pump.start_service();
    assert!(ep.start());
    ep.close();
}

#[test]
fn single_socket_service_reopens_on_restart() {
    let pump = ServicePump::new(PumpOptions::default().with_worker_threads(1)).unwrap();
    let counter = Arc::new(Counter::default());
    let ep = Endpoint::new(pump.reactor(), counter.clone(), EndpointOptions::default());

    let opened = Arc::new(AtomicUsize::new(0));
    let opens = opened.clone();
    let remotes = Arc::new(std::sync::Mutex::new(Vec::new()));
    let keep = remotes.clone();
    let service = SingleSocketService::new(ep.clone()).with_opener(move || {
        opens.fetch_add(1, Ordering::SeqCst);
        let (local, remote) = pair("restartable", "peer");
        keep.lock().unwrap().push(remote);
        Ok(local)
    });
    pump.add_service(Arc::new(service));

    for round in 1..=2 {
        assert!(pump.start_service());
        assert!(ep.started());
        assert_eq!(opened.load(Ordering::SeqCst), round);
        pump.stop_service();
        assert!(wait_until(|| ep.obsoleted()));
    }
    assert_eq!(counter.starts.load(Ordering::SeqCst), 2);
}

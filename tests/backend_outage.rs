use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};

use sessiond::backend::kv::KvBackend;
use sessiond::backend::redis_backend::RedisBackend;
use sessiond::backend::sentinel::SentinelDiscovery;
use sessiond::error::AppError;

const CALL_TIMEOUT: Duration = Duration::from_millis(200);

/// Accepts TCP connections and never writes a byte back.
async fn silent_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held: Vec<TcpStream> = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

#[tokio::test]
async fn silent_redis_surfaces_as_unavailable() {
    let addr = silent_listener().await;
    let client = redis::Client::open(format!("redis://{}/", addr)).unwrap();
    let started = Instant::now();

    let outcome = match RedisBackend::connect(client, CALL_TIMEOUT).await {
        Ok(backend) => backend.exists("session:any").await.map(|_| ()),
        Err(e) => Err(e),
    };

    assert!(
        matches!(outcome, Err(AppError::BackendUnavailable(_))),
        "unexpected outcome: {:?}",
        outcome.err()
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn silent_sentinel_gives_up_at_the_deadline() {
    let addr = silent_listener().await;
    let endpoints = vec![format!("redis://{}", addr)];
    let mut discovery = SentinelDiscovery::new(&endpoints, "mymaster", CALL_TIMEOUT).unwrap();
    let started = Instant::now();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        discovery.wait_for_master(Duration::from_secs(1)),
    )
    .await
    .expect("master discovery hung past its deadline");

    assert!(matches!(result, Err(AppError::BackendUnavailable(_))));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn silent_sentinel_lookup_is_bounded() {
    let addr = silent_listener().await;
    let endpoints = vec![format!("redis://{}", addr)];
    let mut discovery = SentinelDiscovery::new(&endpoints, "mymaster", CALL_TIMEOUT).unwrap();
    let started = Instant::now();

    let result = discovery.writable_endpoint().await;

    assert!(matches!(result, Err(AppError::BackendUnavailable(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
}

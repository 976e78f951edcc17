// tests/load_balancer_tests.rs
//
// In-process integration tests: each test spins up real mock HTTP
// backends (bound to ephemeral ports) and drives the pool / health
// checker / reverse proxy together, the way the original scenario suite
// (examples/original_source/test.py) drives compiled `lb`/`mock-backend`
// binaries, but without needing built binaries on disk.
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use url::Url;

use rust_load_balancer::proxy::{Backend, BackendPool, ReverseProxy};

#[derive(Clone, Copy)]
enum MockMode {
    Healthy,
    Failing,
    NeverResponds,
}

/// Spawns an in-process mock backend on an ephemeral port and returns its
/// address plus a shared request counter.
async fn spawn_mock(mode: MockMode) -> (SocketAddr, Arc<AtomicU64>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let counter = Arc::new(AtomicU64::new(0));
    let counter_for_service = counter.clone();

    let make_svc = make_service_fn(move |_conn| {
        let counter = counter_for_service.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);

                    if matches!(mode, MockMode::NeverResponds) {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }

                    let failed = matches!(mode, MockMode::Failing);

                    if req.uri().path() == "/v1/models" {
                        let status = if failed {
                            StatusCode::SERVICE_UNAVAILABLE
                        } else {
                            StatusCode::OK
                        };
                        return Ok::<_, Infallible>(
                            Response::builder().status(status).body(Body::from("{}")).unwrap(),
                        );
                    }

                    if failed {
                        return Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::INTERNAL_SERVER_ERROR)
                                .body(Body::empty())
                                .unwrap(),
                        );
                    }

                    let body = format!(r#"{{"backend_port":{}}}"#, addr.port());
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(StatusCode::OK)
                            .header("content-type", "application/json")
                            .body(Body::from(body))
                            .unwrap(),
                    )
                }
            }))
        }
    });

    let server = Server::from_tcp(listener).unwrap().serve(make_svc);
    tokio::spawn(server);
    (addr, counter)
}

fn backend_for(addr: SocketAddr) -> Arc<Backend> {
    Arc::new(Backend::new(Url::parse(&format!("http://{addr}")).unwrap()))
}

async fn send_request(proxy: &ReverseProxy, path: &str) -> Response<Body> {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .body(Body::from(r#"{"prompt":"hi"}"#))
        .unwrap();
    proxy.handle(req).await
}

#[tokio::test]
async fn distributes_across_all_healthy_backends() {
    let (a, _) = spawn_mock(MockMode::Healthy).await;
    let (b, _) = spawn_mock(MockMode::Healthy).await;
    let (c, _) = spawn_mock(MockMode::Healthy).await;

    let pool = Arc::new(BackendPool::new(vec![
        backend_for(a),
        backend_for(b),
        backend_for(c),
    ]));
    let proxy = ReverseProxy::new(pool.clone(), Duration::from_secs(5));

    let mut seen_ports = std::collections::HashSet::new();
    for _ in 0..30 {
        let resp = send_request(&proxy, "/v1/completions").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        seen_ports.insert(json["backend_port"].as_u64().unwrap());
    }

    assert_eq!(seen_ports.len(), 3);
    assert_eq!(pool.healthy_count(), 3);
}

#[tokio::test]
async fn transport_failure_is_ejected_and_returns_502() {
    // Port with nothing listening: connection refused.
    let dead_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let (healthy_addr, _) = spawn_mock(MockMode::Healthy).await;

    let dead = backend_for(dead_addr);
    let healthy = backend_for(healthy_addr);
    let pool = Arc::new(BackendPool::new(vec![dead.clone(), healthy.clone()]));
    let proxy = ReverseProxy::new(pool.clone(), Duration::from_secs(5));

    // Drain the pool until the dead backend gets picked at least once;
    // JSQ-of-2 guarantees it will surface within a couple of draws since
    // both backends start at in_flight == 0.
    let mut hit_dead = false;
    for _ in 0..10 {
        if !dead.is_healthy() {
            hit_dead = true;
            break;
        }
        let resp = send_request(&proxy, "/v1/completions").await;
        if resp.status() == StatusCode::BAD_GATEWAY {
            hit_dead = true;
            break;
        }
    }

    assert!(hit_dead, "expected at least one request to hit the dead backend");
    assert!(!dead.is_healthy(), "dead backend should be passively ejected");
    assert_eq!(pool.healthy_count(), 1);
}

#[tokio::test]
async fn no_healthy_backends_returns_503_with_json_body() {
    let (addr, _) = spawn_mock(MockMode::Healthy).await;
    let backend = backend_for(addr);
    backend.set_healthy(false);

    let pool = Arc::new(BackendPool::new(vec![backend]));
    let proxy = ReverseProxy::new(pool, Duration::from_secs(5));

    let resp = send_request(&proxy, "/v1/completions").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"], "no healthy backends");
}

#[tokio::test]
async fn backend_application_error_is_relayed_not_ejected() {
    let (addr, _) = spawn_mock(MockMode::Failing).await;
    let backend = backend_for(addr);
    let pool = Arc::new(BackendPool::new(vec![backend.clone()]));
    let proxy = ReverseProxy::new(pool.clone(), Duration::from_secs(5));

    let resp = send_request(&proxy, "/v1/completions").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(backend.is_healthy(), "a 5xx from the backend is not a transport failure");
}

#[tokio::test]
async fn request_does_not_hang_past_configured_timeout() {
    let (addr, _) = spawn_mock(MockMode::NeverResponds).await;
    let backend = backend_for(addr);
    let pool = Arc::new(BackendPool::new(vec![backend]));
    let proxy = ReverseProxy::new(pool, Duration::from_millis(300));

    let start = std::time::Instant::now();
    let resp = send_request(&proxy, "/v1/completions").await;
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_ne!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_checker_active_probe_flips_backend_to_unhealthy() {
    use rust_load_balancer::health::HealthChecker;

    let dead_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let backend = backend_for(dead_addr);
    let pool = Arc::new(BackendPool::new(vec![backend]));

    let checker = Arc::new(HealthChecker::new(pool.clone(), Duration::from_millis(200)));
    let handle = tokio::spawn(checker.clone().run());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pool.healthy_count(), 0);

    checker.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

#[tokio::test]
async fn health_checker_recovers_backend_after_it_comes_back() {
    use rust_load_balancer::health::HealthChecker;

    let (addr, _) = spawn_mock(MockMode::Healthy).await;
    let backend = backend_for(addr);
    backend.set_healthy(false); // simulate a prior failure

    let pool = Arc::new(BackendPool::new(vec![backend]));
    let checker = Arc::new(HealthChecker::new(pool.clone(), Duration::from_millis(200)));
    let handle = tokio::spawn(checker.clone().run());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pool.healthy_count(), 1);

    checker.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

// src/bin/mock_backend.rs
//
// Standalone dev/test backend. Not part of the load balancer's core
// (spec.md §1 calls the mock binary an "external collaborator" used only
// for testing) — it exists so the crate can be exercised end to end and
// so integration tests have something real to proxy requests to. Modeled
// on the teacher's examples/test_backend.rs, generalized to the
// mode/delay/failure-rate surface the scenario tests drive it with.
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use rand::Rng;
use tokio::time::sleep;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    /// Always responds 200.
    Healthy,
    /// Always responds 500.
    Failing,
    /// Responds 500 with probability `--failure-rate`, 200 otherwise.
    Flaky,
    /// Never responds (holds the connection open until the client gives up).
    Timeout,
}

#[derive(Parser, Debug, Clone)]
struct Args {
    #[arg(long, default_value_t = 8000)]
    port: u16,

    #[arg(long, value_enum, default_value_t = Mode::Healthy)]
    mode: Mode,

    /// Artificial processing delay applied before responding (e.g. 500ms, 2s).
    #[arg(long, default_value = "0ms")]
    delay: humantime::Duration,

    /// Failure probability in [0.0, 1.0], only used in `flaky` mode.
    #[arg(long, default_value_t = 0.5)]
    failure_rate: f64,
}

#[derive(Clone)]
struct State {
    port: u16,
    mode: Mode,
    delay: Duration,
    failure_rate: f64,
    request_count: Arc<AtomicU64>,
}

async fn handle(req: Request<Body>, state: State) -> Result<Response<Body>, Infallible> {
    let count = state.request_count.fetch_add(1, Ordering::SeqCst) + 1;
    let path = req.uri().path().to_string();

    if matches!(state.mode, Mode::Timeout) {
        // Sleep far longer than any reasonable client timeout; the
        // connection is eventually dropped by the caller, not by us.
        sleep(Duration::from_secs(3600)).await;
    }

    if !state.delay.is_zero() {
        sleep(state.delay).await;
    }

    let failed = match state.mode {
        Mode::Healthy => false,
        Mode::Failing => true,
        Mode::Flaky => rand::thread_rng().gen_bool(state.failure_rate.clamp(0.0, 1.0)),
        Mode::Timeout => false, // unreachable: handled above
    };

    if path == "/v1/models" {
        let status = if failed {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        };
        return Ok(Response::builder()
            .status(status)
            .body(Body::from("{}"))
            .unwrap());
    }

    if failed {
        return Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(r#"{"error":"mock backend failure"}"#))
            .unwrap());
    }

    let body = format!(
        r#"{{"backend_port":{},"request_count":{},"path":"{}"}}"#,
        state.port, count, path
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .header("x-backend-port", state.port.to_string())
        .body(Body::from(body))
        .unwrap())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let state = State {
        port: args.port,
        mode: args.mode,
        delay: args.delay.into(),
        failure_rate: args.failure_rate,
        request_count: Arc::new(AtomicU64::new(0)),
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, state.clone()))) }
    });

    println!("mock backend listening on http://{addr} (mode={:?})", args.mode);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

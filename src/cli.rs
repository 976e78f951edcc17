// src/cli.rs
//
// Declarative CLI surface, following the derive-macro style used
// throughout the pack's clap-based load balancers: a flat `Parser` struct
// with one field per flag, type safety and `--help` generation for free.
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rust-load-balancer",
    about = "Reverse-proxy load balancer for OpenAI-compatible completion backends",
    version
)]
pub struct Cli {
    /// Backend origin to forward requests to. Repeat for each backend.
    /// A bare `host:port` is treated as `http://host:port`.
    #[arg(long = "backends", required = true, num_args = 1)]
    pub backends: Vec<String>,

    /// TCP port the load balancer listens on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Probe period; also the per-probe timeout (e.g. 500ms, 1s, 30s).
    #[arg(long = "health-check-interval", default_value = "30s")]
    pub health_check_interval: humantime::Duration,

    /// Per-request total timeout for outbound proxy calls.
    #[arg(long, default_value = "600s")]
    pub timeout: humantime::Duration,
}

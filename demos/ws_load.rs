//! Load driver: N clients against one endpoint, each issuing M sequential
//! requests, followed by a latency summary.
//!
//! Usage:
//!   cargo run --example ws_load -- --url ws://127.0.0.1:9001/ws -c 50 -n 20
//!
//! Set `RUST_LOG=wsload=debug` for per-connection logs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use wsload::{
    BaseClient, ClientConfig, ClientIds, LatencyRecorder, MessageGenerator, RequestStats,
    Timeouts, WebsocketClient,
};

struct LoadConfig {
    url: String,
    clients: usize,
    requests_per_client: usize,
    insecure: bool,
    connect_timeout_secs: u64,
}

fn parse_args() -> LoadConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = LoadConfig {
        url: "ws://127.0.0.1:9001/ws".to_string(),
        clients: 10,
        requests_per_client: 10,
        insecure: false,
        connect_timeout_secs: 10,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-u" | "--url" => {
                if i + 1 < args.len() {
                    config.url = args[i + 1].clone();
                    i += 1;
                }
            }
            "-c" | "--clients" => {
                if i + 1 < args.len() {
                    config.clients = args[i + 1].parse().unwrap_or(10);
                    i += 1;
                }
            }
            "-n" | "--requests" => {
                if i + 1 < args.len() {
                    config.requests_per_client = args[i + 1].parse().unwrap_or(10);
                    i += 1;
                }
            }
            "-t" | "--connect-timeout" => {
                if i + 1 < args.len() {
                    config.connect_timeout_secs = args[i + 1].parse().unwrap_or(10);
                    i += 1;
                }
            }
            "-k" | "--insecure" => config.insecure = true,
            "--help" => {
                println!("ws_load - WebSocket request/response load driver");
                println!();
                println!("Options:");
                println!("  -u, --url <URL>             Target endpoint [default: ws://127.0.0.1:9001/ws]");
                println!("  -c, --clients <N>           Concurrent clients [default: 10]");
                println!("  -n, --requests <N>          Sequential requests per client [default: 10]");
                println!("  -t, --connect-timeout <S>   Connect/handshake timeout in seconds [default: 10]");
                println!("  -k, --insecure              Skip server certificate verification");
                std::process::exit(0);
            }
            other => warn!(arg = other, "ignoring unknown argument"),
        }
        i += 1;
    }

    config
}

/// Drive one client through `requests` sequential requests. Returns how many
/// outcomes it observed.
async fn drive(
    client: WebsocketClient<BaseClient>,
    requests: usize,
    mut outcomes: mpsc::UnboundedReceiver<bool>,
) -> usize {
    let id = client.id();
    let handle = client.start();

    let mut seen = 0;
    while seen < requests {
        let Some(ok) = outcomes.recv().await else {
            break;
        };
        seen += 1;
        if !ok {
            warn!(client = %id, "request failed, stopping client");
            break;
        }
        if seen < requests {
            handle.start_requests();
        }
    }

    handle.stop();
    if let Err(err) = handle.join().await {
        warn!(client = %id, error = %err, "client task failed");
    }
    seen
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = parse_args();
    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let mut client_config =
        ClientConfig::new(config.url.clone()).with_timeouts(Timeouts::new(timeout, timeout));
    if config.insecure {
        client_config = client_config.insecure();
    }

    info!(
        url = %config.url,
        clients = config.clients,
        requests = config.requests_per_client,
        "starting load run"
    );

    let ids = ClientIds::new();
    let stats = Arc::new(RequestStats::new());
    let latency = LatencyRecorder::new();
    let generator = MessageGenerator::direct(|id| json!({"op": "ping", "seq": id.get()}).into());

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for _ in 0..config.clients {
        let (tx, rx) = mpsc::unbounded_channel();
        let lifecycle = BaseClient::new(Arc::clone(&stats)).with_observer(move |_, result| {
            let _ = tx.send(result.is_ok());
        });
        let client = WebsocketClient::new(
            ids.next_id(),
            client_config.clone(),
            Some(generator.clone()),
            lifecycle,
            latency.clone(),
        );
        tasks.spawn(drive(client, config.requests_per_client, rx));
    }

    let mut outcomes = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(seen) => outcomes += seen,
            Err(err) => warn!(error = %err, "driver task failed"),
        }
    }
    let elapsed = started.elapsed();

    let totals = stats.snapshot();
    println!();
    println!("Duration:   {:.2}s", elapsed.as_secs_f64());
    println!(
        "Requests:   {} started, {} succeeded, {} failed ({} observed)",
        totals.started, totals.succeeded, totals.failed, outcomes
    );
    if elapsed.as_secs_f64() > 0.0 {
        println!(
            "Throughput: {:.1} req/s",
            totals.succeeded as f64 / elapsed.as_secs_f64()
        );
    }
    match latency.summary() {
        Some(summary) => println!("Latency:    {summary}"),
        None => println!("Latency:    no samples"),
    }
}

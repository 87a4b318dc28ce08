use std::io::{IsTerminal, Write};
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use neolauncher_frame::Heartbeat;
use neolauncher_supervisor::{BestGuessEndpoint, LifecycleState, OutputStream};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EndpointOutput<'a> {
    #[serde(flatten)]
    endpoint: &'a BestGuessEndpoint,
    grpc_addr: String,
    http_addr: String,
}

pub fn print_endpoint(endpoint: &BestGuessEndpoint, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EndpointOutput {
                endpoint,
                grpc_addr: endpoint.grpc_addr(),
                http_addr: endpoint.http_addr(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["HOST", "GRPC", "HTTP"])
                .add_row(vec![
                    endpoint.host.clone(),
                    endpoint.grpc_port.clone(),
                    endpoint.http_port.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("grpc={} http={}", endpoint.grpc_addr(), endpoint.http_addr());
        }
        OutputFormat::Raw => println!("{}", endpoint.grpc_addr()),
    }
}

#[derive(Serialize)]
struct HeartbeatOutput {
    seq: u64,
    ts: i64,
    ack: i64,
    rtt_us: u128,
}

pub fn print_heartbeat(seq: u64, hb: &Heartbeat, rtt: Duration, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = HeartbeatOutput {
                seq,
                ts: hb.timestamp,
                ack: hb.ack,
                rtt_us: rtt.as_micros(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "seq={} ts={} ack={} rtt={:.3}ms",
                seq,
                hb.timestamp,
                hb.ack,
                rtt.as_secs_f64() * 1000.0
            );
        }
        OutputFormat::Raw => println!("{}", hb.ack),
    }
}

/// State changes go to stderr; stdout carries the child's own output.
pub fn print_state(state: LifecycleState, format: OutputFormat) {
    match format {
        OutputFormat::Json => eprintln!(
            "{}",
            serde_json::json!({ "event": "state", "state": state.as_str() })
        ),
        _ => eprintln!("server {state}"),
    }
}

pub fn forward_output(stream: OutputStream, data: &[u8]) {
    let _ = match stream {
        OutputStream::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(data).and_then(|()| out.flush())
        }
        OutputStream::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(data).and_then(|()| err.flush())
        }
    };
}

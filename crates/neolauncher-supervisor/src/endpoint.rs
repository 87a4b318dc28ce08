//! Server address inferred from launch flags.

use serde::Serialize;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_GRPC_PORT: &str = "5655";
pub const DEFAULT_HTTP_PORT: &str = "5654";

/// Where the server will most likely listen, read off its launch flags.
///
/// Used to aim the shutdown helper (and a browser) at the server. A wildcard
/// bind is reported as loopback since shutdown always starts locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestGuessEndpoint {
    pub host: String,
    pub grpc_port: String,
    pub http_port: String,
}

impl Default for BestGuessEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            grpc_port: DEFAULT_GRPC_PORT.to_string(),
            http_port: DEFAULT_HTTP_PORT.to_string(),
        }
    }
}

impl BestGuessEndpoint {
    /// Scan `args` for `--host`, `--grpc-port` and `--http-port`.
    ///
    /// Both `--flag=value` and `--flag value` are accepted; the second form
    /// only takes the next token when it does not start with `-`.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut guess = Self::default();
        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_ref();
            let next = args
                .get(i + 1)
                .map(AsRef::as_ref)
                .filter(|v| !v.starts_with('-'));

            let (slot, consumed) = match split_flag(arg) {
                Some((name, inline)) => match guess.slot_mut(name) {
                    Some(slot) => match inline {
                        Some(value) => (Some((slot, value)), 0),
                        None => match next {
                            Some(value) => (Some((slot, value)), 1),
                            None => (None, 0),
                        },
                    },
                    None => (None, 0),
                },
                None => (None, 0),
            };
            if let Some((slot, value)) = slot {
                *slot = value.to_string();
            }
            i += 1 + consumed;
        }

        if guess.host == "0.0.0.0" {
            guess.host = DEFAULT_HOST.to_string();
        }
        guess
    }

    /// `host:grpc_port`, the shutdown helper's target.
    pub fn grpc_addr(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }

    /// `host:http_port`, the web UI address.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut String> {
        match name {
            "--host" => Some(&mut self.host),
            "--grpc-port" => Some(&mut self.grpc_port),
            "--http-port" => Some(&mut self.http_port),
            _ => None,
        }
    }
}

fn split_flag(arg: &str) -> Option<(&str, Option<&str>)> {
    if !arg.starts_with("--") {
        return None;
    }
    match arg.split_once('=') {
        Some((name, value)) => Some((name, Some(value))),
        None => Some((arg, None)),
    }
}

use std::time::Duration;

use neolauncher_navelcord::{parse_port, NavelcordClient};

use crate::cmd::PingArgs;
use crate::exit::{navelcord_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_heartbeat, OutputFormat};

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let port = parse_port(&args.port).map_err(|err| navelcord_error("invalid port", err))?;
    let interval = parse_interval(&args.interval)?;
    if args.count == 0 {
        return Err(CliError::new(USAGE, "count must be greater than zero"));
    }

    let mut client =
        NavelcordClient::connect(port).map_err(|err| navelcord_error("connect failed", err))?;
    tracing::debug!(addr = %client.addr(), count = args.count, "pinging navelcord");

    for seq in 1..=args.count {
        let (echoed, rtt) = client
            .round_trip()
            .map_err(|err| navelcord_error("heartbeat failed", err))?;
        print_heartbeat(seq, &echoed, rtt, format);
        if seq < args.count {
            std::thread::sleep(interval);
        }
    }

    Ok(SUCCESS)
}

fn parse_interval(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "interval must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid interval value: {input}")))?;

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}

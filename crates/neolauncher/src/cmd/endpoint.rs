use neolauncher_supervisor::BestGuessEndpoint;

use crate::cmd::EndpointArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_endpoint, OutputFormat};

pub fn run(args: EndpointArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = BestGuessEndpoint::from_args(&args.flags);
    print_endpoint(&endpoint, format);
    Ok(SUCCESS)
}

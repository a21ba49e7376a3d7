// Entrypoint for the `classinet` command line application.
// - Keeps `main` small: set up logging, build the HTTP service, hand the
//   arguments to `ui::App`.
// - Errors are printed to stdout like the rest of the output; the process
//   exits with 1 on any failure.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use anyhow::Context;
use classinet_cli::config::ConfigStore;
use classinet_cli::http::HttpService;
use classinet_cli::ui::App;

fn start() -> anyhow::Result<i32> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("CLASSINET_LOG", "warn"))
        .init();

    // Endpoint from `CLASSINET_ENDPOINT`, see `HttpService::from_env`.
    let service = HttpService::from_env().context("Failed to build HTTP client")?;
    let app = App::new(ConfigStore::default_location(), Arc::new(service))
        .interactive(io::stdin().is_terminal());

    match app.run(std::env::args().skip(1), Box::new(io::stdout())) {
        Ok(()) => Ok(0),
        Err(e) => {
            log::debug!("Command failed: {:?}", e);
            print!("{}", e.report());
            Ok(e.exit_code())
        }
    }
}

fn main() {
    let code = start().unwrap_or_else(|e| {
        eprintln!("{:#}", e);
        1
    });
    let _ = io::stdout().flush();
    std::process::exit(code);
}

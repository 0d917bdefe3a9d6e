use clap::Parser as _;
use daikin_d3net_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Query and control indoor units behind a Daikin DIII-NET Modbus adapter.
#[derive(clap::Parser)]
#[clap(version, about, author)]
struct Cli {
    #[clap(flatten)]
    args: commands::Args,
}

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("could not parse the {1} filter")]
    LogFilter(#[source] Box<dyn std::error::Error + Send + Sync>, &'static str),
    #[error("could not start the async runtime")]
    Runtime(#[source] std::io::Error),
    #[error(transparent)]
    Command(#[from] commands::Error),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

const LOG_VARIABLE: &str = "DAIKIN_D3NET_LOG";

fn run(cli: Cli) -> Result<(), Error> {
    let filter_description = std::env::var(LOG_VARIABLE).unwrap_or_else(|_| "warn".to_string());
    let filter = filter_description
        .parse::<tracing_subscriber::filter::targets::Targets>()
        .map_err(|e| Error::LogFilter(e.into(), LOG_VARIABLE))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)?;
    Ok(runtime.block_on(commands::run(cli.args))?)
}

fn main() {
    end(run(Cli::parse()))
}

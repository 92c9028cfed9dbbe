use crate::cli::app_config::Cli;
use crate::http::handler::run;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();

    do_request(cli).await
}

async fn do_request(cli: Cli) -> Result<(), anyhow::Error> {
    init_logging(cli.verbosity)?;

    let uri: hyper::Uri = cli.url.parse()?;
    match uri.scheme_str() {
        Some("http") | Some("https") => run(&cli).await,
        Some(_) => Err(anyhow!("Unsupported scheme in the uri:{}.", uri)),
        None => Err(anyhow!("Can not find scheme in the uri:{}.", uri)),
    }
}

/// Logs go to stderr so that stdout carries only the report.
fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_max_level(log_level)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

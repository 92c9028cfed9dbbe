use clap::{ArgAction, Parser};
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Per-phase latency breakdown of an HTTP request", long_about)]
pub struct Cli {
    /// The request url,like https://www.google.com
    pub url: String,
    ///  Specify request method to use
    #[arg(short = 'X', long = "request", value_name = "method")]
    pub method_option: Option<String>,
    /// HTTP POST data.
    #[arg(short = 'd', long = "data", value_name = "data")]
    pub body_option: Option<String>,
    /// The http headers.
    #[arg(short = 'H', long = "header", value_name = "header")]
    pub headers: Vec<String>,
    ///  Send User-Agent <name> to server
    #[arg(short = 'A', long = "user-agent", value_name = "name")]
    pub user_agent_option: Option<String>,
    /// CA certificates (PEM) to verify the peer against.
    #[arg(short = 'c', long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<String>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    /// Follow redirects; every hop is timed separately.
    #[arg(short = 'L', long = "location")]
    pub follow_redirects: bool,
    /// Send the request this many times, re-using the connection.
    #[arg(
        short = 'n',
        long = "repeat",
        value_name = "count",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub repeat: u32,
    ///  Write the body to file instead of discarding it.
    #[arg(short = 'o', long = "output", value_name = "file")]
    pub file_path_option: Option<String>,
    /// Print the timings as JSON.
    #[arg(long = "json")]
    pub json: bool,
    /// Maximum time in seconds allowed for each attempt.
    #[arg(short = 'm', long = "max-time", value_name = "seconds", default_value_t = 30)]
    pub max_time: u64,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
}

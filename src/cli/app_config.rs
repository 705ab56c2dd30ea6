use crate::report::Format;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// The request url,like http://www.google.com
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
    /// CA certificate bundle (PEM) to verify the server with.
    #[arg(short = 'c', long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    ///  Write the response body to file instead of discarding it.
    #[arg(short = 'o', long = "output", value_name = "file")]
    pub file_path_option: Option<PathBuf>,
    /// How to print the timings.
    #[arg(short = 'f', long = "format", value_enum, default_value_t = Format::Table)]
    pub format: Format,
    /// Send the request this many times over one client; later requests
    /// reuse the kept-alive connection.
    #[arg(short = 'n', long = "count", value_name = "N", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub count: u32,
    /// Maximum time allowed for the whole request, in seconds.
    #[arg(long = "timeout", value_name = "seconds", default_value_t = 30)]
    pub timeout: u64,
    /// Maximum time allowed for the TCP connect, in seconds.
    #[arg(long = "connect-timeout", value_name = "seconds", default_value_t = 10)]
    pub connect_timeout: u64,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

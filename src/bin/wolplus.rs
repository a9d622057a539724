use wolplus::auth;
use wolplus::hosts;
use wolplus::probe;
use wolplus::ratelimit;
use wolplus::server;
use wolplus::wol;

use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "WOL_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// JSON file the host list is stored in.
    #[arg(long, env = "WOL_CONFIG_FILE", default_value = "config.json")]
    config_file: PathBuf,

    /// Basic auth user. Auth is enabled only when a password is set too.
    #[arg(long, env = "WOL_USERNAME")]
    username: Option<String>,

    /// Basic auth password.
    #[arg(long, env = "WOL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Host list saves allowed per session and window.
    #[arg(long, env = "WOL_RATE_LIMIT_CONFIG_SET", default_value_t = 10)]
    rate_limit_config_set: usize,

    /// Host status checks allowed per session and window.
    #[arg(long, env = "WOL_RATE_LIMIT_HOST_CHECK", default_value_t = 30)]
    rate_limit_host_check: usize,

    /// Wake requests allowed per session and window.
    #[arg(long, env = "WOL_RATE_LIMIT_HOST_WAKEUP", default_value_t = 5)]
    rate_limit_host_wakeup: usize,

    /// Length of the rate limit window, in seconds.
    #[arg(long, env = "WOL_RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    rate_limit_window_secs: u64,

    /// If true, log magic packets instead of sending them.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("INFO"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();

    let limits = ratelimit::RateLimits {
        config_set: args.rate_limit_config_set,
        host_check: args.rate_limit_host_check,
        host_wakeup: args.rate_limit_host_wakeup,
        window: Duration::from_secs(args.rate_limit_window_secs),
    };

    let sender = if args.dry_run {
        info!("Dry run, magic packets will only be logged");
        wol::Sender::new(Box::new(wol::SystemResolver), Box::new(wol::LogOnlyTransport))
    } else {
        wol::Sender::system()
    };

    let basic_auth = auth::BasicAuth::from_config(args.username, args.password);
    if basic_auth.is_none() {
        warn!("WOL_USERNAME and WOL_PASSWORD not both set, basic auth is disabled");
    }

    let store = hosts::HostStore::new(&args.config_file);
    info!("Using host list {}", store.path().display());

    let app = server::Server::new(store, limits, sender, probe::HostProbe::new(), basic_auth);

    let addr: SocketAddr = args.http_addr.parse()?;
    info!("Starting server on {}...", addr);
    rouille::Server::new(addr, move |request| app.handle(request))
        .map_err(|e| e.to_string())?
        .run();
    Ok(())
}

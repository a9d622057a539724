use wolplus::hosts;
use wolplus::probe;
use wolplus::wol;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one magic packet.
    Wake {
        /// MAC address, e.g. AA:BB:CC:DD:EE:FF
        mac: String,
        /// Hostname or IPv4 address of the target.
        host: String,
        /// Subnet size; when set the packet goes to the subnet broadcast address.
        #[arg(long, default_value = "")]
        cidr: String,
        /// UDP port, 9 if unset.
        #[arg(long, default_value = "")]
        port: String,
        /// Print every step taken.
        #[arg(long, short)]
        verbose: bool,
    },
    /// Wake every host of a saved host list.
    WakeAll {
        #[arg(long, env = "WOL_CONFIG_FILE", default_value = "config.json")]
        config_file: PathBuf,
    },
    /// Report the first well-known port a host answers on.
    Check { host: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("WARN")).init();

    let sender = wol::Sender::system();
    match args.command {
        Command::Wake {
            mac,
            host,
            cidr,
            port,
            verbose,
        } => {
            let mut trace = wol::Trace::new();
            let result = sender.send(&mac, &host, &cidr, &port, &mut trace);
            if verbose {
                for line in trace.lines() {
                    println!("{}", line);
                }
            }
            println!("Magic packet sent to {}", result?);
        }
        Command::WakeAll { config_file } => {
            let mut failed = 0;
            for record in hosts::HostStore::new(config_file).load()? {
                let req = hosts::WakeRequest::from(&record);
                match sender.send(&req.mac, &req.host, &req.cidr, &req.port, &mut wol::Trace::new()) {
                    Ok(dest) => println!("{} ({}): sent to {}", record.host, record.mac, dest),
                    Err(err) => {
                        failed += 1;
                        eprintln!("{} ({}): {}", record.host, record.mac, err);
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{} magic packets could not be sent", failed).into());
            }
        }
        Command::Check { host } => {
            let result = probe::HostProbe::new().check(&host);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

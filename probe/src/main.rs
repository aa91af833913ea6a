use clap::Parser;
use log::{error, info};
use probe::Prober;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Query a Bedrock server over UDP", long_about = None)]
struct Args {
    /// Server host name or IP address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server UDP port
    #[arg(short, long, default_value = "19132")]
    port: u16,

    /// How long to wait for a reply
    #[arg(short, long, default_value = "3000")]
    timeout_ms: u64,

    /// Send a single raw byte instead of a RakNet ping
    #[arg(long)]
    raw: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let target: SocketAddr = (args.host.as_str(), args.port)
        .to_socket_addrs()?
        .next()
        .ok_or("host did not resolve to any address")?;
    let prober = Prober::new(Duration::from_millis(args.timeout_ms));

    info!("Probing {} (UDP)...", target);

    if args.raw {
        match prober.ping_raw(target).await {
            Ok(latency) => info!("UDP {} reachable ({} ms)", target, latency.as_millis()),
            Err(e) => {
                error!("No UDP response from {}: {}", target, e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    match prober.query(target).await {
        Ok(reply) => match &reply.status {
            Some(status) => {
                println!("Edition:  {}", status.edition);
                println!("MOTD:     {}", status.motd);
                println!("Version:  {} (protocol {})", status.version, status.protocol);
                println!("Players:  {}/{}", status.players_online, status.max_players);
                if let Some(level) = &status.level_name {
                    println!("Level:    {}", level);
                }
                if let Some(mode) = &status.game_mode {
                    println!("Mode:     {}", mode);
                }
                println!("Latency:  {} ms", reply.latency.as_millis());
            }
            None => {
                info!("UDP reachable, but no recognizable Bedrock response");
                println!("{}", reply.advertisement.chars().take(200).collect::<String>());
            }
        },
        Err(e) => {
            error!("Could not reach {}: {}", target, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

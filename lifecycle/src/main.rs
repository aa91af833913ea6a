use clap::{Parser, Subcommand};
use dialoguer::Password;
use lifecycle::operations::{self, ServerInfo};
use lifecycle::{
    netinfo, ContainerGateway, DockerCli, OpsResult, ProcessTunnels, Reconciler, Reconciliation,
};
use log::{error, info, warn};
use probe::{Prober, QUERY_TIMEOUT, RAW_PING_TIMEOUT};
use shared::{ConfigSource, ServerConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage a containerised Bedrock server", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = shared::DEFAULT_ENV_FILE)]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server, rebuilding the container if the configuration changed
    Start {
        /// Return after start instead of following the container logs
        #[arg(short, long)]
        detach: bool,
    },
    /// Stop the server and back up its worlds
    Stop,
    /// Stop and delete the container (password protected)
    Remove,
    /// Delete every backup (password protected)
    Reset,
    /// Show connection details
    Info,
    /// Check that the mapped UDP port answers
    Portcheck,
    /// Send a Bedrock status ping to the server
    Test,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> OpsResult<()> {
    let source = ConfigSource::load(&args.env_file)?;
    let config = ServerConfig::from_source(&source)?;
    let runtime = DockerCli::new(config.runtime_binary.clone());

    match args.command {
        Command::Start { detach } => start(&runtime, &config, &source, detach).await,
        Command::Stop => stop(&runtime, &config).await,
        Command::Remove => remove(&runtime, &config).await,
        Command::Reset => reset(&config),
        Command::Info => {
            let local = netinfo::detect_local_address(config.debug_network);
            println!("{}", ServerInfo::new(&config, local));
            Ok(())
        }
        Command::Portcheck => portcheck(&runtime, &config).await,
        Command::Test => test(&runtime, &config).await,
    }
}

async fn start(
    runtime: &DockerCli,
    config: &ServerConfig,
    source: &ConfigSource,
    detach: bool,
) -> OpsResult<()> {
    let outcome = Reconciler::new(runtime, config)
        .reconcile(&source.fingerprint())
        .await?;

    match &outcome {
        Reconciliation::Rebuilt {
            restored: Some(record),
        } => info!("Container rebuilt from backup {}", record.file_name),
        Reconciliation::Rebuilt { restored: None } => {
            info!("Container rebuilt with a new world")
        }
        Reconciliation::Started => info!("Existing container started"),
        Reconciliation::AlreadyRunning => info!("Nothing to do"),
    }

    let local = netinfo::detect_local_address(config.debug_network);
    let connection =
        operations::connection_info(config, &ProcessTunnels::default(), local).await;

    println!("Local address: {}", connection.local);
    match &connection.public {
        Some(public) => {
            println!("Remote host:   {}", public.host);
            if let Some(port) = public.port {
                println!("Remote port:   {}", port);
            }
        }
        None if config.tunnel.enabled => println!("Remote address unavailable"),
        None => {}
    }

    if detach {
        return Ok(());
    }

    let mut logs = runtime.stream_logs(&config.container_name).await?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Following container logs, press Ctrl+C to stop");
    loop {
        tokio::select! {
            line = logs.next_line() => match line {
                Some(line) => println!("{}", line),
                None => {
                    info!("Log stream ended");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Stopped following logs; the server keeps running");
                break;
            }
        }
    }

    Ok(())
}

async fn stop(runtime: &DockerCli, config: &ServerConfig) -> OpsResult<()> {
    let report = operations::stop_with_backup(runtime, config).await?;
    for record in &report.pruned {
        info!("Removed old backup: {}", record.file_name);
    }
    info!("Backup complete: {}", report.backup.file_name);
    Ok(())
}

fn prompt_password(prompt: &str) -> OpsResult<String> {
    Ok(Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()?)
}

async fn remove(runtime: &DockerCli, config: &ServerConfig) -> OpsResult<()> {
    let entered = prompt_password("Enter removal password")?;
    operations::check_password(config, &entered)?;

    operations::remove_container(runtime, config).await?;
    info!("Container {} removed", config.container_name);
    Ok(())
}

fn reset(config: &ServerConfig) -> OpsResult<()> {
    warn!(
        "You are about to delete ALL backups in {}",
        config.backup_dir.display()
    );
    warn!("This action is irreversible.");

    if !config.backup_dir.exists() {
        info!("Backup directory does not exist or is already empty");
        return Ok(());
    }

    let entered = prompt_password("Enter removal password to confirm")?;
    operations::check_password(config, &entered)?;

    if operations::reset_backups(config)? {
        info!("All backups deleted");
    }
    Ok(())
}

async fn portcheck(runtime: &DockerCli, config: &ServerConfig) -> OpsResult<()> {
    info!("Container: {}", config.container_name);

    let local = netinfo::detect_local_address(config.debug_network);
    let check = operations::port_check(runtime, config, &Prober::new(RAW_PING_TIMEOUT), local)
        .await?;

    match check.latency {
        Some(latency) => println!(
            "UDP {} reachable from {} ({} ms)",
            check.mapping.host_port,
            check.target.ip(),
            latency.as_millis()
        ),
        None => {
            println!("No UDP response from {}", check.target);
            #[cfg(windows)]
            offer_firewall_rule(check.mapping.host_port)?;
        }
    }

    Ok(())
}

#[cfg(windows)]
fn offer_firewall_rule(port: u16) -> OpsResult<()> {
    let add = dialoguer::Confirm::new()
        .with_prompt("Add Windows Firewall rule?")
        .default(false)
        .interact()?;
    if add && !operations::add_firewall_rule(port)? {
        warn!("netsh did not add the firewall rule");
    }
    Ok(())
}

async fn test(runtime: &DockerCli, config: &ServerConfig) -> OpsResult<()> {
    let local = netinfo::detect_local_address(config.debug_network);
    let report =
        operations::connectivity_test(runtime, config, &Prober::new(QUERY_TIMEOUT), local).await?;
    info!("Container {} is running", config.container_name);

    match (&report.reply, report.excerpt()) {
        (Some(_), Some(excerpt)) if report.is_bedrock() => {
            println!("Server responded to Bedrock ping");
            println!("Raw: {}", excerpt);
        }
        (Some(_), _) => println!("UDP reachable, but no recognizable Bedrock response"),
        (None, _) => println!("Could not reach server UDP {}", report.target),
    }

    Ok(())
}

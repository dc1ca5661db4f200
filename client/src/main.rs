use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{Command, Response, WallpaperMode};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "murctl")]
#[command(about = "Mural Wallpaper Daemon Control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a fresh wallpaper and apply it now
    Update,

    /// Set the multi-display fan-out mode and refresh immediately
    Mode {
        /// Fan-out policy: 'same' (one image everywhere) or 'different'
        /// (one image per display)
        mode: String,
    },

    /// Set the background update interval (clamped to 30m..=24h)
    Interval {
        /// Hours component of the interval
        hours: u32,

        /// Minutes component of the interval
        #[arg(default_value = "0")]
        minutes: u32,
    },

    /// Arm background updates
    Start,

    /// Cancel background updates (an in-flight update is not aborted)
    Stop,

    /// Query daemon status
    Status,

    /// List connected displays
    Displays,

    /// Wallpaper cache commands
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Ping the daemon to check if it's running
    Ping,

    /// Kill the running daemon
    Kill,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached wallpapers, newest first
    List,

    /// Remove every cached wallpaper
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Update => Command::Update,
        Commands::Mode { mode } => {
            let mode: WallpaperMode = match mode.parse() {
                Ok(mode) => mode,
                Err(e) => {
                    eprintln!("Error: {} (expected 'same' or 'different')", e);
                    std::process::exit(1);
                }
            };
            Command::SetMode { mode }
        }
        Commands::Interval { hours, minutes } => Command::SetInterval { hours, minutes },
        Commands::Start => Command::Start,
        Commands::Stop => Command::Stop,
        Commands::Status => Command::Query,
        Commands::Displays => Command::ListDisplays,
        Commands::Cache { action } => match action {
            CacheCommands::List => Command::ListCache,
            CacheCommands::Clear => Command::ClearCache,
        },
        Commands::Ping => Command::Ping,
        Commands::Kill => Command::Kill,
    };

    match send_command(command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nIs the daemon running? Try starting it with: murald");
            std::process::exit(1);
        }
    }
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send command
    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    // Read response
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Busy => {
            println!("An update is already in progress; request dropped. Try again later.");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => {
            println!("Daemon Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!("  Mode: {}", status.mode);
            println!("  Interval: {}", status.interval);
            println!(
                "  Background updates: {}",
                if status.scheduler_running { "armed" } else { "stopped" }
            );
            println!(
                "  Updating now: {}",
                if status.updating { "yes" } else { "no" }
            );
            match status.last_update {
                Some(ts) => println!("  Last update: {}", ts),
                None => println!("  Last update: never"),
            }
            match status.due_in_secs {
                Some(0) => println!("  Next update: overdue"),
                Some(secs) => println!("  Next update: in {}s", secs),
                None => println!("  Next update: as soon as possible"),
            }
            if let Some(err) = status.last_error {
                println!("  Last error: {}", err);
            }
        }
        Response::Displays(displays) => {
            println!("Connected Displays:");
            for display in displays {
                println!("  [{}] {}", display.index, display.name);
            }
        }
        Response::Cache(entries) => {
            if entries.is_empty() {
                println!("Cache is empty");
                return;
            }
            println!("Cached Wallpapers:");
            for entry in entries {
                println!(
                    "  {} ({} KiB, {})",
                    entry.path,
                    entry.size_bytes / 1024,
                    entry.created_at
                );
            }
        }
        Response::Pong => {
            println!("✓ Daemon is running");
        }
    }
}

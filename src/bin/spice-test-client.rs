use clap::Parser;
use spice_client::ClientBuilder;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "SPICE client test program", long_about = None)]
struct Args {
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    #[arg(short, long, default_value = "5900")]
    port: u16,

    #[arg(short = 'd', long, default_value = "30")]
    duration: u64,

    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short = 'P', long)]
    password: Option<String>,

    #[arg(long)]
    playback: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting SPICE test client");
    info!("Connecting to {}:{}", args.host, args.port);

    let uri = format!("spice://{}:{}", args.host, args.port);
    let mut builder = ClientBuilder::new(&uri).with_playback(args.playback);
    if let Some(password) = args.password {
        info!("Using password authentication");
        builder = builder.with_password(password);
    }
    let session = builder.build();

    match session.connect().await {
        Ok(_) => {
            info!("Successfully connected to SPICE server");
            info!("Running for {} seconds...", args.duration);

            let start = std::time::Instant::now();
            while start.elapsed().as_secs() < args.duration && session.ready() {
                session.process(Duration::from_secs(1)).await;
            }

            info!("Test duration complete, disconnecting...");
            session.disconnect().await;
            info!("Disconnected successfully");
        }
        Err(e) => {
            error!("Failed to connect to SPICE server: {}", e);
            error!(
                "Make sure the SPICE server is running and reachable on {}:{}",
                args.host, args.port
            );
            return Err(e.into());
        }
    }

    info!("Test client finished");
    Ok(())
}

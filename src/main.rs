//! CLI for Switchback
//!
//! Subcommands:
//! - `serve`: run the broker server
//! - `status`: query a running server's health
//! - `sub`: print events from a topic as they come in
//! - `random`: publish a timestamp to a topic every 2.5 seconds

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tokio::time::{Instant, interval_at};
use tracing::{error, info};

use switchback::broker::message::{Event, Subscription};
use switchback::client::Client;
use switchback::config::load_config;
use switchback::transport::Server;
use switchback::utils::logging;
use switchback::{Error, Result};

const DEFAULT_ENDPOINT: &str = "localhost:7773";

#[derive(Parser)]
#[command(
    name = "switchback",
    version,
    about = "a pub/sub server for simple eventing interactions"
)]
enum Command {
    /// Serve the switchback server
    Serve,
    /// Get the status of a running switchback server
    Status {
        /// The endpoint to connect to the switchback server on
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },
    /// Print events from the stream as they come in
    Sub {
        /// The endpoint to connect to the switchback server on
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
        /// The topic to subscribe to events for
        #[arg(short, long, default_value = "default")]
        topic: String,
        /// The group the client is a part of
        #[arg(short, long, default_value = "")]
        group: String,
    },
    /// Randomly generate events in the specified topic and publish them
    Random {
        /// The endpoint to connect to the switchback server on
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
        /// The topic to generate events on
        #[arg(short, long, default_value = "default")]
        topic: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env file is fine
    let _ = dotenvy::dotenv();

    let result = match Command::parse() {
        Command::Serve => run_server().await,
        Command::Status { endpoint } => {
            logging::init("warn", true);
            status(&endpoint).await
        }
        Command::Sub {
            endpoint,
            topic,
            group,
        } => {
            logging::init("warn", true);
            subscribe(&endpoint, Subscription::new(topic, group)).await
        }
        Command::Random { endpoint, topic } => {
            logging::init("info", true);
            simulate(&endpoint, &topic).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_server() -> Result<()> {
    let settings = load_config();
    match &settings {
        Ok(s) => logging::init(&s.log_level, s.console_log),
        Err(_) => logging::init("info", true),
    }
    let settings = settings?;

    let server = Server::bind(&settings).await?;
    server.serve().await
}

async fn status(endpoint: &str) -> Result<()> {
    let client = Client::new(endpoint);
    let state = tokio::time::timeout(Duration::from_secs(20), client.status())
        .await
        .map_err(|_| Error::Timeout)??;
    print_json(&state)
}

async fn subscribe(endpoint: &str, subscription: Subscription) -> Result<()> {
    let mut sub = Client::new(endpoint).subscribe(subscription).await?;
    info!(consumer = sub.consumer(), group = sub.group(), "subscribed");

    while let Some(event) = sub.next().await? {
        print_json(&event)?;
    }
    Ok(())
}

async fn simulate(endpoint: &str, topic: &str) -> Result<()> {
    let mut publisher = Client::new(endpoint).publisher().await?;
    let period = Duration::from_millis(2500);
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ts = chrono::Local::now().to_rfc2822();
                publisher.send(Event::new(topic, ts)).await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let events = publisher.close().await?;
    info!(events, "publisher closed");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//! `avisos`: tail the hospital notification stream from a terminal.
//!
//! Connects as the given user, prints every notification and reload
//! signal as it arrives, and closes the stream cleanly on Ctrl-C.

mod error;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use avisos_core::{
    ClientConfig, ConnectionState, Endpoint, NotifyClient, OutboundMessage, SessionIdentity,
};

use crate::error::CliError;

#[derive(Debug, Parser)]
#[command(name = "avisos", version, about = "Tail the hospital notification stream")]
struct Cli {
    /// User identifier for the session.
    #[arg(long, env = "AVISOS_USER")]
    user: String,

    /// Bearer token appended to the endpoint as a query parameter.
    #[arg(long, env = "AVISOS_TOKEN", hide_env_values = true)]
    token: String,

    /// Notification server host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Notification server port.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Connect with wss:// instead of ws://.
    #[arg(long)]
    secure: bool,

    /// URL path of the stream.
    #[arg(long, default_value = "/ws")]
    path: String,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = ClientConfig {
        endpoint: Endpoint {
            host: cli.host,
            port: cli.port,
            secure: cli.secure,
            path: cli.path,
        },
        ..ClientConfig::default()
    };

    let endpoint = config.endpoint.clone();
    tracing::debug!(host = %endpoint.host, port = endpoint.port, secure = endpoint.secure, "resolved endpoint");

    let client = NotifyClient::new(config);
    let identity = SessionIdentity::new(cli.user.clone(), cli.token);

    client.ensure_connected(&identity)?;
    wait_until_connected(&client, &endpoint).await?;
    println!("connected as {}", cli.user);

    client.send(&OutboundMessage::presence(&cli.user));

    // Reload signals on their own task; notifications on the main loop.
    let mut reloads = client.reloads().subscribe();
    tokio::spawn(async move {
        while let Ok(signal) = reloads.recv().await {
            println!("[reload] {} changed at {}", signal.entity, signal.timestamp);
        }
    });

    let mut updates = client.last_update();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(update) = updates.borrow_and_update().clone() else {
                    continue;
                };
                let msg = &update.message;
                match (&msg.title, &msg.message) {
                    (Some(title), Some(body)) => println!("[{}] {title}: {body}", msg.kind),
                    (None, Some(body)) => println!("[{}] {body}", msg.kind),
                    _ => println!("[{}]", msg.kind),
                }
            }
        }
    }

    client.disconnect("shutdown");
    // Give the close frame a moment to go out.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

/// Wait for the first Connected transition; the built-in retry policy
/// gets a little headroom before we give up.
async fn wait_until_connected(client: &NotifyClient, endpoint: &Endpoint) -> Result<(), CliError> {
    let mut states = client.state_changes();
    let connected = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if *states.borrow_and_update() == ConnectionState::Connected {
                return;
            }
            if states.changed().await.is_err() {
                return;
            }
        }
    })
    .await;

    if connected.is_err() || !client.connected() {
        return Err(CliError::ConnectTimeout {
            url: format!("{}:{}{}", endpoint.host, endpoint.port, endpoint.path),
        });
    }
    Ok(())
}

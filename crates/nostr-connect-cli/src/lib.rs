#![allow(clippy::print_stdout)]

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use nostr::{generate_secret_key, get_public_key_hex};
use nostr_connect::{
    ConnectConfig, ConnectUri, Connector, KeySigner, Metadata, RelayConnector, Session, SessionEvent,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "nostr-connect")]
#[command(about = "NostrConnect remote signing: pairing URIs, a key-backed signer, diagnostics")]
pub struct NostrConnectCli {
    /// Local secret key as 64 hex characters
    #[arg(long, env = "NOSTR_CONNECT_SECRET_KEY", global = true, hide_env_values = true)]
    pub secret_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate a fresh secret/public key pair
    Keygen,
    /// Print a pairing URI that points signers at the local key
    Uri {
        #[arg(long)]
        relay: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "icon")]
        icons: Vec<String>,
    },
    /// Accept a pairing URI on behalf of the local key
    Approve { uri: String },
    /// Decline a pairing URI
    Reject { uri: String },
    /// Answer signing requests with the local key until interrupted
    Serve {
        #[arg(long)]
        relay: String,
    },
    /// Ask a paired signer which methods it supports
    Describe {
        #[arg(long)]
        relay: String,
        #[arg(long)]
        target: String,
    },
}

pub async fn run(cli: NostrConnectCli) -> Result<()> {
    let config = ConnectConfig::from_env()?;
    let connector: Arc<dyn Connector> = Arc::new(RelayConnector::new(config.relay.clone()));

    match cli.command {
        Commands::Keygen => {
            let secret_key = generate_secret_key();
            println!("secret: {}", hex::encode(secret_key));
            println!("public: {}", get_public_key_hex(&secret_key)?);
        }
        Commands::Uri {
            relay,
            name,
            url,
            description,
            icons,
        } => {
            let secret_key = require_secret_key(cli.secret_key.as_deref())?;
            let metadata = Metadata {
                name,
                url,
                description,
                icons: (!icons.is_empty()).then_some(icons),
            };
            let uri = ConnectUri::new(get_public_key_hex(&secret_key)?, relay, metadata);
            println!("{uri}");
        }
        Commands::Approve { uri } => {
            let secret_key = require_secret_key(cli.secret_key.as_deref())?;
            let uri = ConnectUri::parse(&uri)?;
            uri.approve(secret_key, connector, &config).await?;
            println!("approved pairing with {} ({})", uri.metadata.name, uri.target);
        }
        Commands::Reject { uri } => {
            let secret_key = require_secret_key(cli.secret_key.as_deref())?;
            let uri = ConnectUri::parse(&uri)?;
            uri.reject(secret_key, connector, &config).await?;
            println!("rejected pairing with {} ({})", uri.metadata.name, uri.target);
        }
        Commands::Serve { relay } => {
            let secret_key = require_secret_key(cli.secret_key.as_deref())?;
            serve(&relay, secret_key, connector, &config).await?;
        }
        Commands::Describe { relay, target } => {
            let secret_key = require_secret_key(cli.secret_key.as_deref())?;
            let session = Session::new(relay, secret_key, Some(target), connector, &config)?;
            let methods = session.describe().await;
            session.close().await?;
            println!("{}", serde_json::to_string_pretty(&methods?)?);
        }
    }
    Ok(())
}

async fn serve(
    relay: &str,
    secret_key: [u8; 32],
    connector: Arc<dyn Connector>,
    config: &ConnectConfig,
) -> Result<()> {
    let session = Session::new(relay, secret_key, None, connector, config)?;
    let mut transitions = session.subscribe();
    session
        .listen(Arc::new(KeySigner::new(secret_key)?))
        .await
        .with_context(|| format!("listen on {relay}"))?;
    println!("serving {} on {}", session.public_key(), relay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("wait for ctrl-c")?;
                break;
            }
            transition = transitions.recv() => match transition {
                Ok(SessionEvent::Paired(peer)) => info!("paired with {}", peer),
                Ok(SessionEvent::Unpaired) => info!("unpaired"),
                Err(error) => info!("session events: {}", error),
            },
        }
    }

    session.close().await?;
    Ok(())
}

fn require_secret_key(raw: Option<&str>) -> Result<[u8; 32]> {
    let raw = raw.ok_or_else(|| anyhow!("--secret-key or NOSTR_CONNECT_SECRET_KEY is required"))?;
    parse_secret_key(raw)
}

fn parse_secret_key(raw: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(raw.trim()).context("secret key is not hex")?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow!("secret key must be 32 bytes, got {}", bytes.len()))
}

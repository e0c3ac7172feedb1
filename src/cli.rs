use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use quillpad::auth;
use quillpad::store::Store;
use quillpad::web::{self, WebConfig};

const SECRET_ENV_VAR: &str = "QUILLPAD_SECRET";

#[derive(Parser, Debug)]
#[command(name = "quillpad", about = "Personal Markdown notes", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server.
    Serve {
        /// Address to bind the HTTP listener to.
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
        /// Path to the SQLite database file.
        #[arg(long, default_value = "quillpad.db")]
        db: PathBuf,
        /// Directory where uploaded profile images are stored.
        #[arg(long, default_value = "uploads")]
        uploads: PathBuf,
        /// Secret for signing session tokens. Falls back to the
        /// QUILLPAD_SECRET environment variable, then to a random value.
        #[arg(long)]
        secret: Option<String>,
    },
    /// Create the database file and its schema without starting the server.
    Init {
        /// Path to the SQLite database file.
        #[arg(long, default_value = "quillpad.db")]
        db: PathBuf,
    },
    /// Register a user account from the command line.
    AddUser {
        /// Login name, unique across the database.
        username: String,
        /// Display name shown in the page header.
        name: String,
        /// Password for the new account.
        #[arg(long)]
        password: String,
        /// Path to the SQLite database file.
        #[arg(long, default_value = "quillpad.db")]
        db: PathBuf,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            addr,
            db,
            uploads,
            secret,
        } => handle_serve(addr, db, uploads, secret),
        Command::Init { db } => handle_init(db, cli.json),
        Command::AddUser {
            username,
            name,
            password,
            db,
        } => handle_add_user(db, username, name, password, cli.json),
    }
}

fn handle_serve(
    addr: SocketAddr,
    db: PathBuf,
    uploads: PathBuf,
    secret: Option<String>,
) -> Result<(), Box<dyn Error>> {
    init_tracing();
    let config = WebConfig {
        addr,
        db_path: db,
        uploads_dir: uploads,
        secret: resolve_secret(secret),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(web::serve(config))?;
    Ok(())
}

fn handle_init(db: PathBuf, as_json: bool) -> Result<(), Box<dyn Error>> {
    Store::open(&db)?;
    if as_json {
        let payload = json!({ "db": db.display().to_string(), "initialized": true });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Initialized database at {}.", db.display());
    }
    Ok(())
}

fn handle_add_user(
    db: PathBuf,
    username: String,
    name: String,
    password: String,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if password.is_empty() {
        return Err("Password cannot be empty".into());
    }
    let hash = auth::hash_password(&password)?;
    let store = Store::open(&db)?;
    let user = store.create_user(&username, &hash, &name)?;
    if as_json {
        let payload = json!({ "id": user.id, "username": user.username, "name": user.name });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Created user {} (ID {}).", user.username, user.id);
    }
    Ok(())
}

/// An explicit flag wins, then the environment, then a throwaway secret that
/// invalidates every session on restart.
fn resolve_secret(flag: Option<String>) -> String {
    if let Some(secret) = flag {
        return secret;
    }
    match std::env::var(SECRET_ENV_VAR) {
        Ok(secret) if !secret.is_empty() => secret,
        _ => {
            warn!("No session secret configured; sessions will not survive a restart");
            auth::random_secret()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quillpad=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

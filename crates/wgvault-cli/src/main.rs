mod commands;

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::info;
use wgvault_core::store::ConfigStore;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(distribute)]
    {
        fmt().json().with_env_filter(filter).init();
    }

    #[cfg(not(distribute))]
    {
        fmt().pretty().with_env_filter(filter).init();
    }
}

#[derive(Debug, Parser)]
#[command(name = "wgvault")]
#[command(version = env!("GIT_VERSION"))]
#[command(about = "WireGuard client config generator with server profiles, history and sync")]
struct Args {
    /// Data directory (defaults to the platform config dir)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage server profiles
    Server {
        #[command(subcommand)]
        action: ServerCommand,
    },
    /// Generate a client configuration against a server profile
    Generate(GenerateArgs),
    /// Inspect and export the generation history
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Convert a legacy single-server config into a profile
    Migrate,
    /// Synchronize the store with the configured WebDAV remote
    Sync {
        #[command(subcommand)]
        action: SyncCommand,
    },
    /// Run bidirectional sync on the configured interval until interrupted
    Watch,
    /// Show the effective settings and where they live
    Settings,
}

#[derive(Debug, Subcommand)]
enum ServerCommand {
    /// List all server profiles
    List,
    /// Show one profile in full
    Show { id: String },
    /// Create a new profile
    Add(ServerFields),
    /// Update fields of an existing profile
    Edit {
        id: String,
        #[command(flatten)]
        fields: ServerFieldOverrides,
    },
    /// Delete a profile (history entries are kept)
    Rm { id: String },
}

#[derive(Debug, ClapArgs)]
struct ServerFields {
    /// Display name for the server
    #[arg(long)]
    name: String,
    /// The server's WireGuard public key
    #[arg(long)]
    public_key: String,
    /// Endpoint address (host:port)
    #[arg(long)]
    endpoint: String,
    /// Comma-separated CIDR list routed through the tunnel
    #[arg(long, default_value = "0.0.0.0/0, ::/0")]
    allowed_ips: String,
    /// Pre-shared key; use --gen-psk to have one generated
    #[arg(long, conflicts_with = "gen_psk")]
    preshared_key: Option<String>,
    /// Generate a fresh pre-shared key
    #[arg(long)]
    gen_psk: bool,
    /// PersistentKeepalive in seconds
    #[arg(long, default_value_t = 25)]
    keepalive: u16,
    /// Interface name on the router side
    #[arg(long, default_value = "wg_0")]
    router_interface: String,
}

#[derive(Debug, ClapArgs)]
struct ServerFieldOverrides {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    public_key: Option<String>,
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    allowed_ips: Option<String>,
    #[arg(long)]
    preshared_key: Option<String>,
    #[arg(long)]
    keepalive: Option<u16>,
    #[arg(long)]
    router_interface: Option<String>,
}

#[derive(Debug, ClapArgs)]
struct GenerateArgs {
    /// Server profile id (or unique name)
    #[arg(long)]
    server: String,
    /// Device label recorded with the generation
    #[arg(long)]
    comment: String,
    /// Client tunnel address (e.g. 192.168.199.10/32)
    #[arg(long)]
    address: String,
    /// Client interface name; becomes the .conf file stem
    #[arg(long)]
    interface: Option<String>,
    /// Existing private key to use instead of generating one
    #[arg(long)]
    private_key: Option<String>,
    /// Override the peer id for this generation only
    #[arg(long)]
    peer_id: Option<u32>,
    /// Also store the overridden peer id as the profile's counter base
    #[arg(long, requires = "peer_id")]
    save_peer_id: bool,
    /// Client-side DNS servers
    #[arg(long)]
    dns: Option<String>,
    /// Client ListenPort
    #[arg(long)]
    listen_port: Option<u16>,
    /// Also render Surge, MikroTik and OpenWrt dialects into the entry
    #[arg(long)]
    extra_dialects: bool,
    /// Print a QR code data URL for the wg-quick config
    #[arg(long)]
    qr: bool,
    /// Write the wg-quick config to this file
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    /// List history entries, newest first
    List {
        /// Only entries generated against this server id
        #[arg(long)]
        server: Option<String>,
    },
    /// Show one entry with its rendered configs
    Show {
        id: String,
        /// Print a QR code data URL for the wg-quick config
        #[arg(long)]
        qr: bool,
    },
    /// Delete one entry
    Delete { id: String },
    /// Delete all entries
    Clear,
    /// Concatenate router peer lines of all entries (newest first) to a file
    /// or stdout
    ExportPeers {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write all client configs into a zip archive
    ExportZip { dest: PathBuf },
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    /// Push every local record to the remote
    Upload,
    /// Pull every remote record into the local store
    Download,
    /// Newest-wins reconciliation in both directions
    Both,
    /// Check connectivity and credentials
    Test,
}

fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wgvault")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    info!(data_dir = %data_dir.display(), "starting wgvault");

    let store = std::sync::Arc::new(ConfigStore::open(&data_dir).await?);

    // The legacy conversion runs at every start and does work at most once.
    if let Some(id) = wgvault_core::migrate::migrate_if_needed(&store).await? {
        println!("migrated legacy config into server profile {id}");
    }

    match args.command {
        Command::Server { action } => commands::server(&store, action).await,
        Command::Generate(generate_args) => commands::generate(&store, generate_args).await,
        Command::History { action } => commands::history(&store, action).await,
        Command::Migrate => commands::migrate(&store).await,
        Command::Sync { action } => commands::sync(&store, action).await,
        Command::Watch => commands::watch(&store).await,
        Command::Settings => commands::settings(&store).await,
    }
}

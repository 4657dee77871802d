//! Wardgate CLI
//!
//! Runs the control plane (`apiserver`) or the endpoint agent (`agent`), and
//! talks to a running agent over its local socket.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use ipnet::Ipv4Net;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wardgate_agent::{
    Agent, AgentConfig, ConfigManager, FileConfigurer, FileTokenProvider, IpcClient, IpcRequest,
    IpcResponse, NetworkConfigurer, NoopConfigurer, StaticTokenProvider, TokenProvider,
    TracingNotifier,
};
use wardgate_auth::{hash_password, IdentityClaims, JwtTokenValidator};
use wardgate_control::{ApiServer, ApiServerConfig, GrantRegistry, Metrics, RpcServer};
use wardgate_db::DbStore;
use wardgate_proto::{AdminCredentials, AgentStatus, ClientCodec, Gateway, Request, Response};

/// Wardgate - zero-trust overlay network control plane and agent
#[derive(Parser, Debug)]
#[command(name = "wardgate")]
#[command(about = "Zero-trust overlay network control plane and endpoint agent", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control plane
    Apiserver(ApiServerArgs),

    /// Run the endpoint agent
    Agent(AgentArgs),

    /// Show the status of the local agent
    Status {
        /// Keep printing updates until interrupted
        #[arg(short, long)]
        watch: bool,

        #[command(flatten)]
        local: LocalArgs,
    },

    /// Store an identity token and ask the local agent to connect
    Login {
        /// Identity token issued by the identity provider
        #[arg(long, env = "WARDGATE_TOKEN")]
        token: Option<String>,

        #[command(flatten)]
        local: LocalArgs,
    },

    /// Forget credentials and disconnect the local agent
    Logout {
        #[command(flatten)]
        local: LocalArgs,
    },

    /// Register a gateway with the control plane
    EnrollGateway(EnrollGatewayArgs),

    /// Print the argon2 hash of a password
    HashPassword {
        password: String,
    },

    /// Mint an identity token signed with the control plane secret (development only)
    IssueToken {
        /// Identity provider object id of the user
        #[arg(long)]
        object_id: String,

        #[arg(long)]
        username: Option<String>,

        /// Group membership, repeatable
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Validity in hours
        #[arg(long, default_value = "10")]
        hours: i64,

        #[arg(long, env = "WARDGATE_JWT_SECRET")]
        jwt_secret: String,
    },
}

#[derive(clap::Args, Debug)]
struct ApiServerArgs {
    /// RPC listen address
    #[arg(long, env = "WARDGATE_LISTEN", default_value = "0.0.0.0:8099")]
    listen: SocketAddr,

    /// Prometheus endpoint listen address
    #[arg(long, env = "WARDGATE_METRICS_LISTEN")]
    metrics_listen: Option<SocketAddr>,

    #[arg(long, env = "WARDGATE_DATABASE_URL", default_value = "sqlite://wardgate.db?mode=rwc")]
    database_url: String,

    /// Shared secret identity tokens are signed with
    #[arg(long, env = "WARDGATE_JWT_SECRET")]
    jwt_secret: String,

    #[arg(long, env = "WARDGATE_ADMIN_USERNAME", default_value = "admin")]
    admin_username: String,

    /// Argon2 hash of the admin password (see `wardgate hash-password`)
    #[arg(long, env = "WARDGATE_ADMIN_PASSWORD_HASH", default_value = "")]
    admin_password_hash: String,

    /// Device tunnel address pool
    #[arg(long, env = "WARDGATE_DEVICE_CIDR", default_value = "10.255.24.0/21")]
    device_cidr: Ipv4Net,

    /// Session lifetime in hours
    #[arg(long, env = "WARDGATE_SESSION_HOURS", default_value = "10")]
    session_hours: u64,

    /// Treat newly enrolled devices as healthy until a health report says otherwise
    #[arg(long, env = "WARDGATE_NEW_DEVICES_HEALTHY")]
    new_devices_healthy: bool,

    /// WireGuard public key of the control plane peer
    #[arg(long, env = "WARDGATE_PUBLIC_KEY", default_value = "")]
    public_key: String,

    /// WireGuard endpoint (host:port) devices use to reach the control plane
    #[arg(long, env = "WARDGATE_ENDPOINT", default_value = "")]
    endpoint: String,
}

#[derive(clap::Args, Debug)]
struct AgentArgs {
    /// Agent configuration file
    #[arg(long, env = "WARDGATE_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Control plane address (host:port)
    #[arg(long, env = "WARDGATE_API_SERVER")]
    api_server: Option<String>,

    /// Connect as soon as the agent starts
    #[arg(long)]
    auto_connect: bool,

    /// Fixed identity token; otherwise the token file written by `wardgate login` is used
    #[arg(long, env = "WARDGATE_TOKEN")]
    token: Option<String>,

    /// Write the tunnel configuration to the configured interface file
    #[arg(long)]
    write_interface: bool,

    #[arg(long)]
    socket: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct LocalArgs {
    /// Agent configuration file
    #[arg(long, env = "WARDGATE_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Agent socket
    #[arg(long)]
    socket: Option<PathBuf>,
}

impl LocalArgs {
    fn load(&self) -> Result<AgentConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(ConfigManager::default_path);
        let mut config = ConfigManager::load_from(&path)?;
        if let Some(socket) = &self.socket {
            config.socket_path = socket.clone();
        }
        Ok(config)
    }

    async fn client(&self) -> Result<IpcClient> {
        let config = self.load()?;
        IpcClient::connect_to(&config.socket_path)
            .await
            .context("Is the agent running? Start it with `wardgate agent`")
    }
}

#[derive(clap::Args, Debug)]
struct EnrollGatewayArgs {
    /// Control plane address (host:port)
    #[arg(long, env = "WARDGATE_API_SERVER", default_value = "127.0.0.1:8099")]
    api_server: String,

    #[arg(long, env = "WARDGATE_ADMIN_USERNAME", default_value = "admin")]
    admin_username: String,

    #[arg(long, env = "WARDGATE_ADMIN_PASSWORD")]
    admin_password: String,

    #[arg(long)]
    name: String,

    /// Gateway WireGuard public key
    #[arg(long)]
    public_key: String,

    /// Gateway WireGuard endpoint (host:port)
    #[arg(long, default_value = "")]
    endpoint: String,

    /// Gateway tunnel address
    #[arg(long)]
    ipv4: String,

    #[arg(long, default_value = "")]
    ipv6: String,

    /// Route reachable through the gateway, repeatable
    #[arg(long = "route")]
    routes: Vec<String>,

    #[arg(long = "route-v6")]
    routes_ipv6: Vec<String>,

    /// Group allowed to use the gateway, repeatable
    #[arg(long = "group")]
    groups: Vec<String>,

    /// Only users holding a privileged grant may use the gateway
    #[arg(long)]
    privileged: bool,

    /// Password the gateway authenticates its configuration stream with
    #[arg(long, env = "WARDGATE_GATEWAY_PASSWORD")]
    password: String,

    /// Update an existing gateway instead of creating one
    #[arg(long)]
    update: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    init_logging(level)?;

    match cli.command {
        Commands::Apiserver(args) => run_apiserver(args).await,
        Commands::Agent(args) => run_agent(args).await,
        Commands::Status { watch, local } => show_status(&local, watch).await,
        Commands::Login { token, local } => login(&local, token).await,
        Commands::Logout { local } => {
            let mut client = local.client().await?;
            expect_ok(client.request(&IpcRequest::Logout).await?)?;
            println!("Logged out");
            Ok(())
        }
        Commands::EnrollGateway(args) => enroll_gateway(args).await,
        Commands::HashPassword { password } => {
            println!("{}", hash_password(&password)?);
            Ok(())
        }
        Commands::IssueToken {
            object_id,
            username,
            groups,
            hours,
            jwt_secret,
        } => {
            let mut claims = IdentityClaims::new(object_id, chrono::Duration::hours(hours))
                .with_groups(groups);
            if let Some(username) = username {
                claims = claims.with_username(username);
            }
            println!("{}", JwtTokenValidator::encode(jwt_secret.as_bytes(), &claims)?);
            Ok(())
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();

    Ok(())
}

/// Cancelled on Ctrl+C
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Shutting down");
        token.cancel();
    });
    cancel
}

async fn run_apiserver(args: ApiServerArgs) -> Result<()> {
    let config = ApiServerConfig {
        listen_addr: args.listen,
        metrics_addr: args.metrics_listen,
        session_lifetime: Duration::from_secs(args.session_hours * 60 * 60),
        admin_username: args.admin_username,
        admin_password_hash: args.admin_password_hash,
        device_network: args.device_cidr,
        new_devices_healthy: args.new_devices_healthy,
        control_plane_public_key: args.public_key,
        control_plane_endpoint: args.endpoint,
        ..Default::default()
    };
    if config.admin_password_hash.is_empty() {
        tracing::warn!("No admin password hash configured, administrative calls are disabled");
    }

    let db = wardgate_db::connect(&args.database_url)
        .await
        .with_context(|| format!("Failed to connect to database {}", args.database_url))?;
    wardgate_db::migrate(&db)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(DbStore::new(db, config.device_network));
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let api = ApiServer::new(
        config.clone(),
        store,
        Arc::new(JwtTokenValidator::new(args.jwt_secret.as_bytes())),
        Arc::new(GrantRegistry::new()),
        metrics.clone(),
    );

    let restored = api
        .warmup()
        .await
        .context("Failed to load sessions from the database")?;
    info!(sessions = restored, "Session cache warmed up");

    let cancel = shutdown_token();

    if let Some(addr) = config.metrics_addr {
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = wardgate_control::metrics::serve(addr, metrics, cancel).await {
                error!(error = %e, "Metrics endpoint failed");
            }
        });
    }

    let server = RpcServer::bind(config.listen_addr, api)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(address = %config.listen_addr, "Control plane listening");
    server.run(cancel).await.context("RPC server failed")?;

    Ok(())
}

async fn run_agent(args: AgentArgs) -> Result<()> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(ConfigManager::default_path);
    let mut config = ConfigManager::load_or_init(&path)?;
    if let Some(api_server) = args.api_server {
        config.api_server = api_server;
    }
    if args.auto_connect {
        config.auto_connect = true;
    }
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    let tokens: Arc<dyn TokenProvider> = match args.token {
        Some(token) => Arc::new(StaticTokenProvider::new(Some(token))),
        None => Arc::new(FileTokenProvider::new(config.token_path.clone())),
    };
    let network: Arc<dyn NetworkConfigurer> = if args.write_interface {
        Arc::new(FileConfigurer::new(config.interface_path.clone()))
    } else {
        Arc::new(NoopConfigurer)
    };

    let agent = Agent::new(config, tokens, network, Arc::new(TracingNotifier))?;
    agent.run(shutdown_token()).await?;
    Ok(())
}

fn print_status(status: &AgentStatus) {
    println!("State:     {}", status.connection_state);
    if let Some(since) = status.connected_since {
        println!("Since:     {}", since.to_rfc3339());
    }
    for tenant in &status.tenants {
        println!("Tenant:    {}{}", tenant.name, if tenant.active { " (active)" } else { "" });
    }
    if status.gateways.is_empty() {
        println!("Gateways:  none");
    }
    for gateway in &status.gateways {
        let health = if gateway.healthy { "reachable" } else { "unreachable" };
        println!("Gateway:   {} ({}) {}", gateway.name, gateway.ipv4, health);
    }
    for issue in &status.issues {
        println!(
            "Issue:     [{:?}] {} (resolve before {})",
            issue.severity,
            issue.title,
            issue.resolve_before.to_rfc3339()
        );
    }
}

async fn show_status(local: &LocalArgs, watch: bool) -> Result<()> {
    let client = local.client().await?;
    let mut stream = client.subscribe(true).await?;

    while let Some(status) = stream.next().await? {
        print_status(&status);
        if !watch {
            break;
        }
        println!();
    }
    Ok(())
}

async fn login(local: &LocalArgs, token: Option<String>) -> Result<()> {
    if let Some(token) = token {
        let config = local.load()?;
        if let Some(parent) = config.token_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        std::fs::write(&config.token_path, token.trim())
            .with_context(|| format!("Failed to write token to {:?}", config.token_path))?;
    }

    let mut client = local.client().await?;
    expect_ok(client.request(&IpcRequest::Login).await?)?;
    println!("Connecting; run `wardgate status` to follow progress");
    Ok(())
}

fn expect_ok(response: IpcResponse) -> Result<()> {
    match response {
        IpcResponse::Ok { .. } => Ok(()),
        IpcResponse::Error { message } => anyhow::bail!("Agent refused: {}", message),
        other => anyhow::bail!("Unexpected response from agent: {:?}", other),
    }
}

async fn enroll_gateway(args: EnrollGatewayArgs) -> Result<()> {
    let gateway = Gateway {
        name: args.name,
        public_key: args.public_key,
        endpoint: args.endpoint,
        ipv4: args.ipv4,
        ipv6: args.ipv6,
        routes_ipv4: args.routes,
        routes_ipv6: args.routes_ipv6,
        access_group_ids: args.groups,
        requires_privileged_access: args.privileged,
        password_hash: hash_password(&args.password)?,
        healthy: false,
    };
    let credentials = AdminCredentials {
        username: args.admin_username,
        password: args.admin_password,
    };
    let request = if args.update {
        Request::UpdateGateway {
            credentials,
            gateway,
        }
    } else {
        Request::EnrollGateway {
            credentials,
            gateway,
        }
    };

    let stream = TcpStream::connect(&args.api_server)
        .await
        .with_context(|| format!("Failed to connect to control plane at {}", args.api_server))?;
    let mut framed = Framed::new(stream, ClientCodec::new());
    framed.send(request).await.context("Failed to send request")?;

    match framed.next().await {
        Some(Ok(Response::Gateway(gateway))) => {
            println!("Gateway {} stored", gateway.name);
            println!("AllowedIPs = {}", gateway.allowed_ips().join(","));
            Ok(())
        }
        Some(Ok(Response::Error(status))) => {
            anyhow::bail!("Control plane refused: {:?}: {}", status.code, status.message)
        }
        Some(Ok(other)) => anyhow::bail!("Unexpected response: {:?}", other),
        Some(Err(e)) => Err(e).context("Failed to read response"),
        None => anyhow::bail!("Control plane closed the connection"),
    }
}

mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use mcp::{DEFAULT_TIMEOUT, McpClient, McpSession, StdioTransport};
use runtime::tools::{device_info_declaration, device_info_server};
use runtime::{
    ChatResponseState, ChatSession, DeviceInfoTool, GeminiModel, LocalTools, McpTools,
    RemoteTools, SourceKind, ToolRegistry,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "mcpx.toml";

#[derive(Parser)]
#[command(name = "mcpx")]
#[command(about = "Chat with a model that can call local, remote and MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,
    /// List the tools the model would be offered
    Tools {
        /// Also list tools hidden by a higher-precedence source
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(cli.verbose, config.log_filter.as_deref());

    let tools = Toolbox::connect(&config).await?;
    let result = match cli.command {
        Some(Commands::Chat) | None => cmd_chat(&config, &tools).await,
        Some(Commands::Tools { all }) => {
            print_tools(&tools.registry, all);
            Ok(())
        }
    };
    tools.close().await;
    result
}

/// An explicit `--config` must exist; the default file is optional.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => Ok(Config::default()),
    }
}

/// `RUST_LOG` wins over the config file, which wins over `-v`.
fn init_tracing(verbose: u8, configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match configured {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Every tool source the CLI wires up, plus the connections backing them.
struct Toolbox {
    registry: Arc<ToolRegistry>,
    device: McpSession,
    servers: Vec<Arc<McpClient>>,
}

impl Toolbox {
    async fn connect(config: &Config) -> Result<Self> {
        let mut registry = ToolRegistry::new()
            .with_source(LocalTools::new().with_tool(device_info_declaration(), DeviceInfoTool));

        if !config.remote_tools.is_empty() {
            registry.register(RemoteTools::new(config.remote_tools.iter().cloned()));
        }

        // The local device tool outranks this one; `tools --all` lists both.
        let device = McpSession::in_process(device_info_server()).await?;
        registry.register(McpTools::discover(device.client()).await?);

        let mut servers: Vec<Arc<McpClient>> = Vec::with_capacity(config.mcp_servers.len());
        for server in &config.mcp_servers {
            let name = server.name.clone();
            let client = match connect_server(server.clone()).await {
                Ok(client) => client,
                Err(source) => {
                    for client in &servers {
                        let _ = client.close().await;
                    }
                    let _ = device.close().await;
                    return Err(Error::McpServer { name, source });
                }
            };
            match McpTools::discover(Arc::clone(&client)).await {
                Ok(tools) => {
                    tracing::info!(server = %name, tools = tools.declarations().len(), "MCP server connected");
                    registry.register(tools);
                    servers.push(client);
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "tool discovery failed, skipping server");
                    let _ = client.close().await;
                }
            }
        }

        Ok(Self {
            registry: Arc::new(registry),
            device,
            servers,
        })
    }

    async fn close(self) {
        for client in &self.servers {
            if let Err(e) = client.close().await {
                tracing::debug!(error = %e, "closing MCP server");
            }
        }
        if let Err(e) = self.device.close().await {
            tracing::debug!(error = %e, "closing device info server");
        }
    }
}

async fn connect_server(config: mcp::ServerConfig) -> mcp::Result<Arc<McpClient>> {
    let transport = StdioTransport::spawn(config)?;
    let client = Arc::new(McpClient::new(Arc::new(transport)).with_timeout(DEFAULT_TIMEOUT));
    if let Err(e) = client.connect().await {
        let _ = client.close().await;
        return Err(e);
    }
    Ok(client)
}

async fn cmd_chat(config: &Config, tools: &Toolbox) -> Result<()> {
    println!("mcpx v{}", env!("CARGO_PKG_VERSION"));

    let mut builder = GeminiModel::builder(config.api_key()?, &config.model.model);
    if let Some(base_url) = &config.model.base_url {
        builder = builder.base_url(base_url);
    }
    let model = builder.build();

    let mut session =
        ChatSession::new(model, Arc::clone(&tools.registry)).with_config(config.session.clone());
    println!("Model: {}", config.model.model);
    println!("Tools: {}", tools.registry.len());
    println!("Type 'quit' or Ctrl+D to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let mut events = session.send(input);
        while let Some(event) = events.next().await {
            print_event(&event);
        }
    }

    let usage = session.usage();
    tracing::info!(
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "session ended"
    );
    println!("\nSession ended.");
    Ok(())
}

fn print_event(event: &ChatResponseState) {
    let time = Local::now().format("%H:%M:%S");

    match event {
        ChatResponseState::ToolCall { name, args } => {
            let args = Value::Object(args.clone());
            println!("[{time}] TOOL CALL: {name} {args}");
        }
        ChatResponseState::Success { text } => {
            println!("\n{text}\n");
        }
        ChatResponseState::Error { message } => {
            eprintln!("[{time}] Error: {message}\n");
        }
    }
}

/// One line of the `tools` listing.
struct ToolRow<'a> {
    name: &'a str,
    source: SourceKind,
    shadowed: bool,
    description: &'a str,
}

/// Reachable tools in precedence order, or with `all` every registered
/// declaration in registration order.
fn tool_rows(registry: &ToolRegistry, all: bool) -> Vec<ToolRow<'_>> {
    if !all {
        return registry
            .declarations()
            .into_iter()
            .filter_map(|declaration| {
                let source = registry.resolve(declaration.name())?;
                Some(ToolRow {
                    name: declaration.name(),
                    source: source.kind(),
                    shadowed: false,
                    description: declaration.description(),
                })
            })
            .collect();
    }

    registry
        .sources()
        .iter()
        .flat_map(|source| {
            source.declarations().iter().map(move |declaration| ToolRow {
                name: declaration.name(),
                source: source.kind(),
                shadowed: !registry
                    .resolve(declaration.name())
                    .is_some_and(|winner| std::ptr::eq(winner, source)),
                description: declaration.description(),
            })
        })
        .collect()
}

fn print_tools(registry: &ToolRegistry, all: bool) {
    let rows = tool_rows(registry, all);
    if rows.is_empty() {
        println!("No tools registered.");
        return;
    }

    println!("{:<24}  {:<8}  DESCRIPTION", "NAME", "SOURCE");
    println!("{}", "-".repeat(80));

    for row in rows {
        let description = match row.description.char_indices().nth(60) {
            Some((cut, _)) => format!("{}...", &row.description[..cut]),
            None => row.description.to_string(),
        };
        let marker = if row.shadowed { " (shadowed)" } else { "" };
        println!(
            "{:<24}  {:<8}  {description}{marker}",
            row.name,
            row.source.to_string()
        );
    }
}

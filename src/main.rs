use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clawchat::config::Config;
use clawchat::credentials::SqliteStore;
use clawchat::llm::ChatClient;

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clawchat")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("clawchat.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_client(config: &Config) -> Result<ChatClient> {
    let store = SqliteStore::open(&config.store.path)
        .with_context(|| format!("Failed to open credential store {}", config.store.path.display()))?;
    ChatClient::from_config(config, Arc::new(store)).context("Failed to initialize chat client")
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let mut client = build_client(config)?;

    match &cli.command {
        Commands::Chat {
            message,
            system,
            proxy,
            max_output,
        } => handle_chat_command(&mut client, message, system, *proxy, *max_output, cli.is_verbose()),
        Commands::SetApiKey { key } => {
            client.set_api_key(key).context("Failed to save API key")?;
            println!("{}", "API key saved".green());
            Ok(())
        }
        Commands::SetModel { model } => {
            client.set_model(model).context("Failed to save model")?;
            println!("{} {}", "Model set to:".green(), client.credentials().model());
            Ok(())
        }
        Commands::Show => {
            handle_show_command(&client, config);
            Ok(())
        }
    }
}

fn handle_chat_command(
    client: &mut ChatClient,
    message: &str,
    system: &str,
    proxy: bool,
    max_output: usize,
    verbose: bool,
) -> Result<()> {
    if proxy {
        client.set_proxy_enabled(true);
    }
    if verbose {
        let route = if client.proxy_enabled() { "tunnel" } else { "direct" };
        println!("{} {} ({})", "Model:".cyan(), client.credentials().model(), route);
    }

    // one blocking call on the current thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create runtime")?;

    let mut output = vec![0u8; max_output.max(1)];
    let result = runtime.block_on(client.chat_into(system, message, &mut output));

    let end = output.iter().position(|&b| b == 0).unwrap_or(output.len());
    let text = String::from_utf8_lossy(&output[..end]);

    match result {
        Ok(_) => {
            println!("{}", text);
            Ok(())
        }
        Err(e) => {
            info!("Chat failed: {:?}", e);
            eprintln!("{}", text.red());
            std::process::exit(1);
        }
    }
}

fn handle_show_command(client: &ChatClient, config: &Config) {
    let credentials = client.credentials();
    println!("{} {}", "Model:".cyan(), credentials.model());
    if credentials.has_api_key() {
        println!("{} {}", "API key:".cyan(), credentials.masked_api_key());
    } else {
        println!("{} {}", "API key:".cyan(), "not set".red());
    }
    let route = if config.proxy.enabled { "tunnel" } else { "direct" };
    println!("{} {}", "Transport:".cyan(), route);
    println!("{} {}", "Store:".cyan(), config.store.path.display());
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}

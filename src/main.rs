use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use line_chat::client::run_client;
use line_chat::{ServerConfig, ServerError, init_logger, run_server};

#[derive(Parser, Debug)]
#[command(
    name = "line_chat",
    about = "Newline-delimited TCP chat server and client",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the chat server (default when no subcommand is given)
    Serve(ServeArgs),
    /// Open an interactive client session
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    #[arg(long, value_name = "PATH", help = "JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Address to listen on")]
    host: Option<String>,

    #[arg(long, short = 'p', help = "Port to listen on")]
    port: Option<u16>,

    #[arg(long = "log-level", help = "Minimum log level (error, warn, info, debug, trace)")]
    log_level: Option<String>,

    #[arg(
        long = "atomic-rename",
        action = clap::ArgAction::SetTrue,
        help = "Check and move renames under a single registry lock"
    )]
    atomic_rename: bool,
}

#[derive(Args, Debug)]
struct ConnectArgs {
    #[arg(value_name = "HOST", help = "Server to connect to right away")]
    host: Option<String>,

    #[arg(long, short = 'p', default_value_t = 8080, help = "Server port")]
    port: u16,
}

impl ServeArgs {
    /// Defaults, then the config file, then flags.
    fn to_config(&self) -> Result<ServerConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logger.log_level = level.clone();
        }
        if self.atomic_rename {
            config.atomic_rename = true;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Connect(args)) => connect(args),
        Some(Command::Serve(args)) => serve(args),
        None => serve(ServeArgs::default()),
    }
}

fn serve(args: ServeArgs) -> ExitCode {
    let config = match args.to_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let logger = init_logger("line_chat", &config.logger);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("line-chat-worker")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            logger.error(&ServerError::Runtime(e.to_string()).to_string());
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run_server(config, logger.clone())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.error(&format!("Chat server error: {}", e));
            ExitCode::FAILURE
        }
    }
}

fn connect(args: ConnectArgs) -> ExitCode {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to build tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run_client(args.host, args.port)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

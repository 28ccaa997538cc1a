//! # proxbox
//!
//! An HTTP and SOCKS5 proxy server.
//!
//! ## Usage
//!
//! ```bash
//! # HTTP proxy on 8889, SOCKS5 on 8890, spinner feedback
//! proxbox
//!
//! # Custom ports
//! proxbox -p 3128 -s 1080
//!
//! # Structured logs instead of the spinner
//! proxbox -v
//!
//! # No console output
//! proxbox -q
//! ```

use clap::Parser;
use proxbox::config::AppConfig;
use proxbox::console::Console;
use proxbox::logging;
use proxbox::supervisor::Supervisor;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// An HTTP and SOCKS5 proxy server.
#[derive(Parser, Debug)]
#[command(name = "proxbox")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "PROXBOX_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP proxy port
    #[arg(short = 'p', long, env = "PROXBOX_HTTP_PORT")]
    http_port: Option<u16>,

    /// SOCKS5 proxy port
    #[arg(short = 's', long, env = "PROXBOX_SOCKS_PORT")]
    socks_port: Option<u16>,

    /// Address to bind both listeners to
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Quiet mode - suppress all normal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - show detailed logs
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Applies command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.http_port {
            config.server.http_port = port;
        }
        if let Some(port) = self.socks_port {
            config.server.socks_port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        config.output.quiet |= self.quiet;
        config.output.verbose |= self.verbose;
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = load_config(&args);
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let (_log_guard, log_handle) = match logging::init_logging(&config.logging) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    let console = Arc::new(
        Console::new(config.output.quiet, config.output.verbose)
            .with_log_switch(Box::new(log_handle)),
    );

    if let Err(e) = Supervisor::from_config(&config, console).run().await {
        eprintln!("Proxy server failed: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file or use defaults
fn load_config(args: &Args) -> AppConfig {
    let config_path = args.config.clone().or_else(|| {
        let defaults = ["./proxbox.yaml", "./proxbox.yml", "/etc/proxbox/config.yaml"];
        defaults.iter().map(PathBuf::from).find(|p| p.exists())
    });

    match config_path {
        Some(path) => match AppConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: Failed to load config from {:?}: {}", path, e);
                eprintln!("Using default configuration");
                AppConfig::default()
            }
        },
        None => AppConfig::default(),
    }
}

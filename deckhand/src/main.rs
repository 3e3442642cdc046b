//! Deckhand - Entry Point
//!
//! Builds container images and deploys workloads onto registered servers over
//! SSH, streaming remote output to the dashboard as it is produced.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use secrecy::SecretString;

use deckhand::app::options::AppOptions;
use deckhand::app::run::run;
use deckhand::authn::user_token::TokenKeys;
use deckhand::credentials::CredentialVault;
use deckhand::filesys::file::File;
use deckhand::logs::{init_logging, LogOptions};
use deckhand::storage::layout::StorageLayout;
use deckhand::storage::settings::Settings;
use deckhand::utils::version_info;

use tracing::{error, info};

const ISSUED_TOKEN_TTL_SECS: i64 = 3600;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Operator helpers
    if let Some(plaintext) = cli_args.get("encrypt-secret") {
        let key = SecretString::from(settings.security.credential_key.clone());
        let sealed = CredentialVault::new(&key).and_then(|vault| vault.encrypt(plaintext));
        return match sealed {
            Ok(sealed) => {
                println!("{}", sealed);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Unable to encrypt secret: {e}");
                ExitCode::FAILURE
            }
        };
    }
    if let Some(user_id) = cli_args.get("issue-token") {
        let Ok(user_id) = user_id.parse::<i64>() else {
            eprintln!("--issue-token expects a numeric user id");
            return ExitCode::FAILURE;
        };
        let keys = TokenKeys::new(&SecretString::from(settings.security.token_secret.clone()));
        return match keys.issue(user_id, ISSUED_TOKEN_TTL_SECS) {
            Ok(token) => {
                println!("{}", token);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Unable to issue token: {e}");
                ExitCode::FAILURE
            }
        };
    }

    // Initialize logging
    let log_dir = if settings.log_to_file {
        let dir = layout.logs_dir();
        if let Err(e) = dir.create().await {
            eprintln!("Unable to create logs directory: {e}");
        }
        Some(dir.path().to_path_buf())
    } else {
        None
    };
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = AppOptions::from_settings(layout, &settings);
    info!("Running deckhand {} with options: {:?}", version.version, options);
    match run(options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run deckhand: {e}");
            ExitCode::FAILURE
        }
    }
}

/// A missing settings file means defaults
async fn load_settings(file: &File) -> Result<Settings, deckhand::errors::DeckhandError> {
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>().await
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}

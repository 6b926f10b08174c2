//! WatchParty - Extension Bridge Host
//!
//! A browser native-messaging host that stores the web app's session and
//! active-room context so the extension can pick them up.
//!
//! Usage:
//!   watchparty-bridge
//!   watchparty-bridge --storage /path/to/storage.json

mod native;

use std::path::PathBuf;

use tracing::info;
use watchparty_core::bridge::{ExtensionBridge, FileStorage};

/// Default storage file name
const STORAGE_FILE: &str = "watchparty-storage.json";

/// Get the path to the storage file
fn get_storage_path(args: &[String]) -> PathBuf {
    if let Some(pos) = args.iter().position(|a| a == "--storage") {
        if let Some(path) = args.get(pos + 1) {
            return PathBuf::from(path);
        }
    }

    // Check for custom path via env var
    if let Ok(path) = std::env::var("WATCHPARTY_STORAGE_PATH") {
        return PathBuf::from(path);
    }

    // Default: same directory as executable, or current dir
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORAGE_FILE)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("watchparty_bridge=info".parse()?)
                .add_directive("watchparty_core=debug".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let path = get_storage_path(&args);
    info!("Using storage at {}", path.display());

    let bridge = ExtensionBridge::new(FileStorage::new(path));
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    native::serve(&bridge, &mut stdin, &mut stdout).await?;

    info!("Browser closed the connection");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_flag_wins() {
        let args = vec![
            "watchparty-bridge".to_string(),
            "--storage".to_string(),
            "/tmp/wp.json".to_string(),
        ];
        assert_eq!(get_storage_path(&args), PathBuf::from("/tmp/wp.json"));
    }

    #[test]
    fn test_default_is_named_file() {
        if std::env::var("WATCHPARTY_STORAGE_PATH").is_ok() {
            return;
        }
        let path = get_storage_path(&["watchparty-bridge".to_string()]);
        assert!(path.ends_with(STORAGE_FILE));
    }
}

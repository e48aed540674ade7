//! Info command - show information about the Folio installation.

use folio_chat::{paths, ChatConfig, PreferenceStore};
use folio_local_ai::LocalServerClient;

pub(crate) fn run() -> miette::Result<()> {
    let config = ChatConfig::from_env();
    let store = PreferenceStore::in_dir(&config.data_dir);
    let client = LocalServerClient::from_env();

    println!("Folio Portfolio Assistant");
    println!("=========================");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Paths:");
    println!("  Data dir:     {}", config.data_dir.display());
    println!("  Preferences:  {}", paths::preferences_path(&config.data_dir).display());
    println!();

    println!("Local AI:");
    println!("  Server:   {}", client.base_url());
    println!("  Device:   {}", config.device);
    println!("  Fallback: {}", config.fallback_policy);
    println!();

    match store.load() {
        Ok(Some(tier)) => println!("Stored tier: {}", tier),
        Ok(None) => println!("Stored tier: none (chosen from device)"),
        Err(e) => println!("Stored tier: unreadable ({})", e),
    }

    Ok(())
}

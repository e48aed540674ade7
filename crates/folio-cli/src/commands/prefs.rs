//! Reset command - forget the stored tier.

use folio_chat::{ChatConfig, PreferenceStore};

pub(crate) fn reset() -> miette::Result<()> {
    let config = ChatConfig::from_env();
    let store = PreferenceStore::in_dir(&config.data_dir);

    match store
        .load()
        .map_err(|e| miette::miette!("Failed to read preferences: {}", e))?
    {
        Some(tier) => {
            store
                .reset()
                .map_err(|e| miette::miette!("Failed to reset preferences: {}", e))?;
            println!("Forgot stored tier '{}'.", tier);
        }
        None => println!("No tier preference stored."),
    }

    Ok(())
}

//! Tiers command - list the model catalog.

use folio_chat::{ChatConfig, PreferenceStore};

pub(crate) fn run() -> miette::Result<()> {
    let config = ChatConfig::from_env();
    let stored = PreferenceStore::in_dir(&config.data_dir)
        .load()
        .map_err(|e| miette::miette!("Failed to read preferences: {}", e))?;

    println!("Model tiers:");
    for (tier, spec) in config.catalog.iter() {
        let marker = if stored == Some(tier) { " (selected)" } else { "" };
        println!("  {:<8}{}", tier.as_str(), marker);
        println!("    model:   {} ({})", spec.model_id, spec.dtype);
        println!(
            "    needs:   {:.1}GB memory, {} core(s)",
            spec.memory_gb, spec.min_cores
        );
        println!("    {}", spec.description);
    }

    println!();
    println!("Failed loads fall back to the next smaller tier ({}).", config.fallback_policy);

    Ok(())
}

//! Device command - show what the tier heuristic sees.

use folio_chat::device::{self, MemorySource};
use folio_chat::ChatConfig;

pub(crate) fn run() -> miette::Result<()> {
    let config = ChatConfig::from_env();
    let profile = device::detect(&config.device_hints());
    let tier = device::select_tier(&profile, &config.catalog);

    let source = match profile.source {
        MemorySource::Hint => "FOLIO_DEVICE_MEMORY_GB",
        MemorySource::Platform => "system memory",
        MemorySource::Benchmark => "CPU benchmark estimate",
        MemorySource::Default => "default",
    };

    println!("Device:");
    println!("  Memory:  {:.1}GB ({})", profile.memory_gb, source);
    println!("  Cores:   {}", profile.cores);
    println!("  Device:  {}", config.device);
    println!();
    println!("Suggested tier: {}", tier);
    println!("  {}", config.catalog.spec(tier).model_id);

    Ok(())
}

use iconpipe_core::{FallbackScheme, PipelineConfig};
use iconpipe_loader::IconPipeline;

pub fn fallbacks(config: &PipelineConfig, raw: u32) -> anyhow::Result<()> {
    let id = IconPipeline::item_id(raw)?;
    let candidates = FallbackScheme::new(&config.fallback).candidates(id);
    if candidates.is_empty() {
        println!("no fallback candidates for {id}");
    }
    for candidate in candidates {
        println!("{candidate}");
    }
    Ok(())
}

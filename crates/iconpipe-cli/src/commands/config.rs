use iconpipe_core::PipelineConfig;

pub fn print(config: &PipelineConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

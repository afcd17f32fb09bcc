//! Check command handler: show the effective configuration and plugins.

use anyhow::Result;
use archiver_core::plugin::{Capability, PluginRegistry};

use crate::config::LoadedSettings;

const CAPABILITIES: [Capability; 5] = [
    Capability::Downloader,
    Capability::Filter,
    Capability::Extractor,
    Capability::AllowRule,
    Capability::Source,
];

pub fn run_check_command(loaded: &LoadedSettings) -> Result<()> {
    match (&loaded.path, loaded.loaded_from_file) {
        (Some(path), true) => println!("Config: {}", path.display()),
        (Some(path), false) => println!("Config: defaults ({} not found)", path.display()),
        (None, _) => println!("Config: defaults"),
    }
    println!("{}", toml::to_string_pretty(&loaded.settings)?);

    let registry = PluginRegistry::load(Vec::new())?;
    for capability in CAPABILITIES {
        let names: Vec<&str> = registry
            .get_by_type(capability)
            .map(|plugin| plugin.short_name.as_str())
            .collect();
        println!("{capability:>10}: {}", names.join(", "));
    }

    registry.validate(&loaded.settings.pipeline())?;
    println!("Pipeline OK");
    Ok(())
}

//! Validate command: check keel.yaml and the component manifest

use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

use crate::cli::{GlobalArgs, ValidateArgs};
use crate::output;
use crate::utils;

#[derive(Tabled)]
struct ComponentRow {
    name: String,
    namespace: String,
    #[tabled(rename = "depends on")]
    dependencies: String,
    #[tabled(rename = "min version")]
    min_version: String,
    #[tabled(rename = "default")]
    enabled_by_default: bool,
    external: bool,
    #[tabled(rename = "operator uninstall")]
    operator_uninstall: bool,
}

pub fn run(args: ValidateArgs, global: &GlobalArgs) -> Result<()> {
    let config = utils::load_config(global)?;
    match &config.config_path {
        Some(path) => output::success(&format!("Config {} is valid", path)),
        None => output::info("No keel.yaml found, using defaults"),
    }

    let manifest = utils::load_manifest(global)?;
    let registry = match manifest.registry() {
        Ok(registry) => registry,
        Err(e) => {
            output::error(&format!("{}: {}", global.components, e));
            return Err(e.into());
        }
    };
    output::success(&format!(
        "{} declares {} components",
        global.components,
        registry.len()
    ));

    if args.list {
        let rows: Vec<ComponentRow> = manifest
            .components
            .iter()
            .map(|def| ComponentRow {
                name: def.name.clone(),
                namespace: def.namespace.clone(),
                dependencies: if def.dependencies.is_empty() {
                    "-".to_string()
                } else {
                    def.dependencies.join(", ")
                },
                min_version: def
                    .min_platform_version
                    .clone()
                    .unwrap_or_else(|| "-".to_string()),
                enabled_by_default: def.enabled_by_default,
                external: def.external_owner,
                operator_uninstall: def.operator_uninstall,
            })
            .collect();

        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{}", table);
    }

    Ok(())
}

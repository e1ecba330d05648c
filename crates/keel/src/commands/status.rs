//! Status command

use anyhow::{Context, Result};
use keel_core::types::{Condition, ManagedResource};
use tabled::{
    settings::{object::Columns, Modify, Style, Width},
    Table, Tabled,
};

use crate::cli::{GlobalArgs, StatusArgs};
use crate::output;
use crate::utils;

#[derive(Tabled)]
struct ResourceRow {
    namespace: String,
    name: String,
    generation: i64,
    state: String,
    version: String,
    #[tabled(rename = "last condition")]
    last_condition: String,
}

#[derive(Tabled)]
struct ComponentRow {
    name: String,
    state: String,
    reconciling: i64,
    #[tabled(rename = "last reconciled")]
    last_reconciled: i64,
    version: String,
    #[tabled(rename = "last condition")]
    last_condition: String,
}

pub fn run(args: StatusArgs, global: &GlobalArgs) -> Result<()> {
    let store = utils::resource_store(global)?;

    let Some(name) = &args.name else {
        let resources = store.list()?;
        if args.json {
            let json = serde_json::to_string_pretty(&resources)
                .context("Failed to serialize resources to JSON")?;
            println!("{}", json);
        } else if resources.is_empty() {
            output::info(&format!("No resources in {}", store.dir()));
        } else {
            print_resources(&resources);
        }
        return Ok(());
    };

    let resource = store
        .read(&args.namespace, name)?
        .ok_or_else(|| anyhow::anyhow!("Resource {}/{} not found", args.namespace, name))?;

    if args.json {
        let json = serde_json::to_string_pretty(&resource)
            .context("Failed to serialize resource to JSON")?;
        println!("{}", json);
        return Ok(());
    }

    print_resource(&resource);
    Ok(())
}

fn print_resources(resources: &[ManagedResource]) {
    let rows: Vec<ResourceRow> = resources
        .iter()
        .map(|r| ResourceRow {
            namespace: r.metadata.namespace.clone(),
            name: r.metadata.name.clone(),
            generation: r.generation(),
            state: resource_state(r),
            version: r.status.version.clone().unwrap_or_else(|| "-".to_string()),
            last_condition: describe_condition(r.status.conditions.last()),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);
}

fn print_resource(resource: &ManagedResource) {
    output::header(&format!(
        "{}/{}",
        resource.metadata.namespace, resource.metadata.name
    ));
    output::kv("UID", &resource.metadata.uid);
    output::kv("Generation", &resource.generation().to_string());
    output::kv("State", &resource_state(resource));
    output::kv(
        "Desired version",
        resource.spec.version.as_deref().unwrap_or("-"),
    );
    output::kv(
        "Installed version",
        resource.status.version.as_deref().unwrap_or("-"),
    );
    output::kv(
        "Last condition",
        &describe_condition(resource.status.conditions.last()),
    );

    if resource.status.components.is_empty() {
        output::info("No component status recorded yet");
        return;
    }

    let rows: Vec<ComponentRow> = resource
        .status
        .components
        .values()
        .map(|c| ComponentRow {
            name: c.name.clone(),
            state: c.state.to_string(),
            reconciling: c.reconciling_generation,
            last_reconciled: c.last_reconciled_generation,
            version: c.version.clone().unwrap_or_else(|| "-".to_string()),
            last_condition: describe_condition(c.last_condition()),
        })
        .collect();

    output::header("Components");
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    table.with(Modify::new(Columns::new(5..6)).with(Width::wrap(50).keep_words(true)));
    println!("{}", table);
}

fn resource_state(resource: &ManagedResource) -> String {
    if resource.metadata.finalized {
        return "Finalized".to_string();
    }
    if resource.metadata.deletion_requested {
        return "Deleting".to_string();
    }
    resource
        .status
        .state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn describe_condition(condition: Option<&Condition>) -> String {
    match condition {
        Some(c) if c.message.is_empty() => c.kind.to_string(),
        Some(c) => format!("{}: {}", c.kind, c.message),
        None => "-".to_string(),
    }
}

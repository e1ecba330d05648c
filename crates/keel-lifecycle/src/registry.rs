//! Ordered component registry with dependency validation

use crate::component::Component;
use keel_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Statically registered components, in registration order
///
/// Registration order is the install order; uninstall walks it in reverse.
/// Construction rejects duplicate names, unknown dependencies and cycles.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: Vec<Arc<dyn Component>>,
}

impl ComponentRegistry {
    pub fn new(components: Vec<Arc<dyn Component>>) -> Result<Self> {
        let registry = Self { components };
        registry.validate()?;
        Ok(registry)
    }

    /// All components in registration order
    pub fn list(&self) -> &[Arc<dyn Component>] {
        &self.components
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Component>> {
        self.components.iter().find(|c| c.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let mut graph: HashMap<&str, Vec<String>> = HashMap::new();
        for component in &self.components {
            if graph
                .insert(component.name(), component.dependencies())
                .is_some()
            {
                return Err(Error::duplicate_component(component.name()));
            }
        }

        for component in &self.components {
            for dep in component.dependencies() {
                if !graph.contains_key(dep.as_str()) {
                    return Err(Error::unknown_dependency(component.name(), dep));
                }
            }
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            let mut path = Vec::new();
            visit(&graph, component.name(), &mut seen, &mut path)?;
        }

        Ok(())
    }
}

/// DFS over the dependency graph; `path` doubles as the visiting set
fn visit<'a>(
    graph: &'a HashMap<&'a str, Vec<String>>,
    name: &'a str,
    seen: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    if let Some(pos) = path.iter().position(|n| *n == name) {
        let mut cycle: Vec<&str> = path[pos..].to_vec();
        cycle.push(name);
        return Err(Error::circular_dependency(cycle.join(" -> ")));
    }

    if seen.contains(name) {
        return Ok(());
    }

    path.push(name);
    if let Some(deps) = graph.get(name) {
        for dep in deps {
            if let Some((key, _)) = graph.get_key_value(dep.as_str()) {
                visit(graph, *key, seen, path)?;
            }
        }
    }
    path.pop();
    seen.insert(name);

    Ok(())
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.names())
            .finish()
    }
}

//! Dependency and observer trees, for debugging.

use std::fmt;

use super::runtime::Runtime;
use crate::graph::NodeId;

/// What a node depends on, transitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyTree {
    pub id: NodeId,
    pub name: String,
    pub dependencies: Vec<DependencyTree>,
}

/// What depends on a node, transitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverTree {
    pub id: NodeId,
    pub name: String,
    pub observers: Vec<ObserverTree>,
}

impl Runtime {
    pub fn dependency_tree(&self, id: NodeId) -> Option<DependencyTree> {
        let node = self.graph.get(id)?;
        let dependencies = node
            .derivation()
            .map(|meta| {
                meta.observing
                    .iter()
                    .filter_map(|dep| self.dependency_tree(*dep))
                    .collect()
            })
            .unwrap_or_default();
        Some(DependencyTree {
            id,
            name: node.name().to_owned(),
            dependencies,
        })
    }

    pub fn observer_tree(&self, id: NodeId) -> Option<ObserverTree> {
        let node = self.graph.get(id)?;
        let observers = node
            .observable()
            .map(|meta| {
                meta.observers
                    .iter()
                    .filter_map(|observer| self.observer_tree(*observer))
                    .collect()
            })
            .unwrap_or_default();
        Some(ObserverTree {
            id,
            name: node.name().to_owned(),
            observers,
        })
    }
}

impl DependencyTree {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.name, indent = depth * 2)?;
        for dependency in &self.dependencies {
            dependency.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for DependencyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

impl ObserverTree {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.name, indent = depth * 2)?;
        for observer in &self.observers {
            observer.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ObserverTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

//! CPU topology: named levels, each partitioning CPUs into nodes.
//!
//! JSON shape (topology.json), either form:
//! {
//!   "clusters": [[0, 1], [2, 3]]
//! }
//! or
//! {
//!   "levels": {
//!     "cluster": [[0, 1], [2, 3]],
//!     "cpu": [[0], [1], [2], [3]]
//!   }
//! }
//!
//! The cluster form derives "cluster", "cpu" and "all". The explicit form fills
//! in "cpu" and "all" when they are missing, since the metric API depends on them.

use crate::Result as AnyResult;
use crate::diagnostics;
use crate::error::{Result, SchedError};

use anyhow::{Context, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

/// Level holding every CPU in a single node.
pub const LEVEL_ALL: &str = "all";
/// Level holding one node per CPU.
pub const LEVEL_CPU: &str = "cpu";
pub const LEVEL_CLUSTER: &str = "cluster";

/// A node is a set of CPU ids, kept sorted and deduplicated.
pub type Node = Vec<u32>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    levels: BTreeMap<String, Vec<Node>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the conventional three-level topology from a cluster list.
    pub fn from_clusters(clusters: &[Vec<u32>]) -> Self {
        let mut topology = Self::new();
        topology.add_to_level(LEVEL_CLUSTER, clusters.iter().cloned());
        topology.fill_derived_levels();
        topology
    }

    /// Append nodes to a level, creating it if needed.
    pub fn add_to_level<I>(&mut self, level: &str, nodes: I)
    where
        I: IntoIterator<Item = Node>,
    {
        let entry = self.levels.entry(level.to_string()).or_default();
        entry.extend(nodes.into_iter().map(normalize_node));
    }

    /// Add "cpu" and "all" levels from the CPUs already known, when absent.
    fn fill_derived_levels(&mut self) {
        let cpus = self.cpus();
        if !self.levels.contains_key(LEVEL_CPU) {
            self.add_to_level(LEVEL_CPU, cpus.iter().map(|&c| vec![c]));
        }
        if !self.levels.contains_key(LEVEL_ALL) {
            self.add_to_level(LEVEL_ALL, std::iter::once(cpus.into_iter().collect()));
        }
    }

    pub fn has_level(&self, level: &str) -> bool {
        self.levels.contains_key(level)
    }

    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.levels.keys().map(String::as_str)
    }

    /// Every CPU mentioned anywhere in the topology.
    pub fn cpus(&self) -> BTreeSet<u32> {
        self.levels
            .values()
            .flat_map(|nodes| nodes.iter().flatten().copied())
            .collect()
    }

    pub fn get_level(&self, level: &str) -> Result<&[Node]> {
        self.levels
            .get(level)
            .map(Vec::as_slice)
            .ok_or_else(|| SchedError::UnknownLevel {
                level: level.to_string(),
            })
    }

    /// Index of `node` within `level`. CPU order in `node` does not matter.
    pub fn get_index(&self, level: &str, node: &[u32]) -> Result<usize> {
        let wanted = normalize_node(node.to_vec());
        self.get_level(level)?
            .iter()
            .position(|n| *n == wanted)
            .ok_or_else(|| SchedError::UnknownNode {
                level: level.to_string(),
                node: wanted,
            })
    }

    pub fn get_node(&self, level: &str, index: usize) -> Result<&[u32]> {
        let nodes = self.get_level(level)?;
        nodes
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| SchedError::IndexOutOfRange {
                level: level.to_string(),
                index,
                span: nodes.len(),
            })
    }

    /// Number of nodes at `level`.
    pub fn level_span(&self, level: &str) -> Result<usize> {
        Ok(self.get_level(level)?.len())
    }
}

fn normalize_node(mut node: Node) -> Node {
    node.sort();
    node.dedup();
    node
}

/// Raw topology.json shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologySpec {
    #[serde(default)]
    pub clusters: Option<Vec<Vec<u32>>>,

    #[serde(default)]
    pub levels: Option<BTreeMap<String, Vec<Vec<u32>>>>,
}

impl TopologySpec {
    /// Check the partitioning rules and build a [`Topology`].
    pub fn validate_and_build(&self) -> AnyResult<Topology> {
        let levels: BTreeMap<String, Vec<Vec<u32>>> = match (&self.clusters, &self.levels) {
            (Some(_), Some(_)) => bail!(
                "{}",
                diagnostics::error_message("topology.json must give either clusters or levels, not both")
            ),
            (None, None) => bail!(
                "{}",
                diagnostics::error_message("topology.json must give clusters or levels")
            ),
            (Some(clusters), None) => {
                BTreeMap::from([(LEVEL_CLUSTER.to_string(), clusters.clone())])
            }
            (None, Some(levels)) => levels.clone(),
        };

        let mut topology = Topology::new();
        for (level, nodes) in levels {
            if nodes.is_empty() {
                bail!(
                    "{}",
                    diagnostics::error_message(format!("topology level '{}' has no nodes", level))
                );
            }

            let mut seen: BTreeSet<u32> = BTreeSet::new();
            for node in &nodes {
                if node.is_empty() {
                    bail!(
                        "{}",
                        diagnostics::error_message(format!(
                            "topology level '{}' contains an empty node",
                            level
                        ))
                    );
                }
                for cpu in node {
                    if !seen.insert(*cpu) {
                        bail!(
                            "{}",
                            diagnostics::error_message(format!(
                                "cpu {} appears in more than one node of level '{}'",
                                cpu, level
                            ))
                        );
                    }
                }
            }

            topology.add_to_level(&level, nodes);
        }

        topology.fill_derived_levels();
        Ok(topology)
    }
}

/// Read and validate a topology.json file.
pub fn load_topology_file(path: &str) -> AnyResult<Topology> {
    let text = fs::read_to_string(path)
        .with_context(|| diagnostics::error_message(format!("read topology file {}", path)))?;
    let spec: TopologySpec = serde_json::from_str(&text)
        .with_context(|| diagnostics::error_message(format!("parse topology file {}", path)))?;
    spec.validate_and_build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn big_little() -> Topology {
        Topology::from_clusters(&[vec![0, 3, 4, 5], vec![1, 2]])
    }

    #[test]
    fn from_clusters_derives_cpu_and_all() {
        let t = big_little();
        assert_eq!(t.levels().collect::<Vec<_>>(), vec!["all", "cluster", "cpu"]);
        assert_eq!(t.level_span("cpu").unwrap(), 6);
        assert_eq!(t.level_span("cluster").unwrap(), 2);
        assert_eq!(t.get_node("all", 0).unwrap(), &[0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn get_index_ignores_cpu_order() {
        let t = big_little();
        assert_eq!(t.get_index("cluster", &[2, 1]).unwrap(), 1);
        assert_eq!(t.get_index("cpu", &[4]).unwrap(), 4);
    }

    #[test]
    fn lookups_report_unknown_level_and_node() {
        let t = big_little();
        assert_eq!(
            t.get_index("socket", &[0]),
            Err(SchedError::UnknownLevel {
                level: "socket".into()
            })
        );
        assert_eq!(
            t.get_index("cluster", &[0, 1]),
            Err(SchedError::UnknownNode {
                level: "cluster".into(),
                node: vec![0, 1]
            })
        );
        assert!(matches!(
            t.get_node("cluster", 7),
            Err(SchedError::IndexOutOfRange { span: 2, .. })
        ));
    }

    #[test]
    fn levels_form_fills_missing_levels() {
        let spec: TopologySpec =
            serde_json::from_str(r#"{"levels": {"pair": [[0, 1], [2, 3]]}}"#).unwrap();
        let t = spec.validate_and_build().unwrap();
        assert_eq!(t.level_span("pair").unwrap(), 2);
        assert_eq!(t.level_span("cpu").unwrap(), 4);
        assert_eq!(t.level_span("all").unwrap(), 1);
    }

    #[test]
    fn overlapping_nodes_are_rejected() {
        let spec: TopologySpec =
            serde_json::from_str(r#"{"clusters": [[0, 1], [1, 2]]}"#).unwrap();
        let err = spec.validate_and_build().unwrap_err();
        assert!(err.to_string().contains("cpu 1 appears in more than one node"));
    }

    #[test]
    fn exactly_one_form_is_required() {
        let spec: TopologySpec = serde_json::from_str("{}").unwrap();
        assert!(spec.validate_and_build().is_err());
    }
}

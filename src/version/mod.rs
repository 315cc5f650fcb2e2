//! Column version chains.
//!
//! Columns may point at the column they supersede. Only the newest member of
//! each lineage stays visible in the matrix; older versions are hidden.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::core::ColumnEntity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionChainResult {
    pub visible_columns: Vec<ColumnEntity>,
    pub hidden_columns: Vec<ColumnEntity>,
}

/// Diagnostic counts; never affects which columns are visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionChainAnalysis {
    pub total: usize,
    /// Columns with no version linkage at all.
    pub standalone: usize,
    /// Lineages with at least two members, or a link to a missing parent.
    pub versioned_chains: usize,
    /// Latest member of each lineage.
    pub active: usize,
    /// Superseded members.
    pub superseded: usize,
    /// Dead-end branches: nothing supersedes them but they lost to a newer sibling.
    pub abandoned: usize,
    /// Columns linking to a parent that is not in the loaded set.
    pub orphaned: usize,
    pub longest_chain: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VersionChainResolver;

struct Lineages<'a> {
    /// Lineage root per column index; `None` for standalone columns.
    roots: Vec<Option<String>>,
    /// Ids some other loaded column points to.
    referenced: HashSet<&'a str>,
    winners: HashSet<usize>,
    groups: HashMap<String, Vec<usize>>,
}

impl VersionChainResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn process_columns(&self, columns: &[ColumnEntity]) -> VersionChainResult {
        let lineages = Self::lineages(columns);

        let mut visible_columns = Vec::new();
        let mut hidden_columns = Vec::new();
        for (idx, column) in columns.iter().enumerate() {
            if lineages.roots[idx].is_none() || lineages.winners.contains(&idx) {
                visible_columns.push(column.clone());
            } else {
                hidden_columns.push(column.clone());
            }
        }

        VersionChainResult {
            visible_columns,
            hidden_columns,
        }
    }

    pub fn analyze_chains(&self, columns: &[ColumnEntity]) -> VersionChainAnalysis {
        let lineages = Self::lineages(columns);
        let ids: HashSet<&str> = columns.iter().map(|c| c.id.as_str()).collect();

        let standalone = lineages.roots.iter().filter(|r| r.is_none()).count();
        let superseded = columns.len() - standalone - lineages.winners.len();
        let abandoned = lineages
            .groups
            .values()
            .flatten()
            .filter(|idx| {
                !lineages.winners.contains(idx)
                    && !lineages.referenced.contains(columns[**idx].id.as_str())
            })
            .count();
        let orphaned = columns
            .iter()
            .filter(|c| {
                c.version_parent_id
                    .as_deref()
                    .is_some_and(|p| !ids.contains(p))
            })
            .count();
        let longest_chain = lineages.groups.values().map(Vec::len).max().unwrap_or(0);

        VersionChainAnalysis {
            total: columns.len(),
            standalone,
            versioned_chains: lineages.groups.len(),
            active: lineages.winners.len(),
            superseded,
            abandoned,
            orphaned,
            longest_chain,
        }
    }

    fn lineages(columns: &[ColumnEntity]) -> Lineages<'_> {
        let by_id: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.id.as_str(), idx))
            .collect();

        let referenced: HashSet<&str> = columns
            .iter()
            .filter_map(|c| c.version_parent_id.as_deref())
            .filter(|p| by_id.contains_key(p))
            .collect();

        let roots: Vec<Option<String>> = columns
            .iter()
            .map(|column| {
                let linked = column.version_parent_id.as_deref().is_some_and(|p| !p.is_empty());
                if !linked && !referenced.contains(column.id.as_str()) {
                    return None;
                }
                Some(Self::root_of(columns, &by_id, column))
            })
            .collect();

        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, root) in roots.iter().enumerate() {
            if let Some(root) = root {
                groups.entry(root.clone()).or_default().push(idx);
            }
        }

        let mut winners = HashSet::new();
        for members in groups.values() {
            let leaves: Vec<usize> = members
                .iter()
                .copied()
                .filter(|idx| !referenced.contains(columns[*idx].id.as_str()))
                .collect();
            // A cycle has no leaf; fall back to the whole group.
            let candidates = if leaves.is_empty() { members.clone() } else { leaves };
            if let Some(winner) = newest(columns, &candidates) {
                winners.insert(winner);
            }
        }

        Lineages {
            roots,
            referenced,
            winners,
            groups,
        }
    }

    /// Walks parent links up to the oldest loaded ancestor. A parent outside
    /// the loaded set becomes the lineage key so its children group together.
    fn root_of(columns: &[ColumnEntity], by_id: &HashMap<&str, usize>, column: &ColumnEntity) -> String {
        let mut current = column;
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(current.id.as_str());

        while let Some(parent_id) = current.version_parent_id.as_deref().filter(|p| !p.is_empty()) {
            match by_id.get(parent_id) {
                Some(&idx) if !seen.contains(parent_id) => {
                    current = &columns[idx];
                    seen.insert(parent_id);
                }
                Some(_) => {
                    // Cycle: key the lineage by its smallest id for a stable root.
                    return seen.iter().min().map(|s| s.to_string()).unwrap_or_default();
                }
                None => return parent_id.to_string(),
            }
        }
        current.id.clone()
    }
}

/// Highest version number; ties go to the first in input order.
fn newest(columns: &[ColumnEntity], candidates: &[usize]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for &idx in candidates {
        let version = columns[idx].version_number.unwrap_or(i64::MIN);
        match best {
            Some(b) if columns[b].version_number.unwrap_or(i64::MIN) >= version => {}
            _ => best = Some(idx),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(id: &str, parent: Option<&str>, version: Option<i64>) -> ColumnEntity {
        ColumnEntity::new(id, id.to_uppercase(), "study").with_version(parent, version)
    }

    fn ids(columns: &[ColumnEntity]) -> Vec<&str> {
        columns.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_linear_chain_keeps_latest() {
        let columns = vec![
            col("v1", None, Some(1)),
            col("v2", Some("v1"), Some(2)),
            col("v3", Some("v2"), Some(3)),
            col("solo", None, None),
        ];
        let result = VersionChainResolver::new().process_columns(&columns);

        assert_eq!(ids(&result.visible_columns), vec!["v3", "solo"]);
        assert_eq!(ids(&result.hidden_columns), vec!["v1", "v2"]);
    }

    #[test]
    fn test_branching_chain_prefers_highest_version() {
        let columns = vec![
            col("root", None, Some(1)),
            col("branch_a", Some("root"), Some(2)),
            col("branch_b", Some("root"), Some(5)),
        ];
        let result = VersionChainResolver::new().process_columns(&columns);
        assert_eq!(ids(&result.visible_columns), vec!["branch_b"]);

        let analysis = VersionChainResolver::new().analyze_chains(&columns);
        assert_eq!(analysis.versioned_chains, 1);
        assert_eq!(analysis.active, 1);
        assert_eq!(analysis.superseded, 2);
        assert_eq!(analysis.abandoned, 1);
        assert_eq!(analysis.longest_chain, 3);
    }

    #[test]
    fn test_missing_parent_groups_siblings() {
        let columns = vec![col("a", Some("gone"), Some(1)), col("b", Some("gone"), Some(2))];
        let result = VersionChainResolver::new().process_columns(&columns);
        assert_eq!(ids(&result.visible_columns), vec!["b"]);

        let analysis = VersionChainResolver::new().analyze_chains(&columns);
        assert_eq!(analysis.orphaned, 2);
        assert_eq!(analysis.standalone, 0);
    }

    #[test]
    fn test_cycle_does_not_hang() {
        let columns = vec![col("x", Some("y"), Some(1)), col("y", Some("x"), Some(2))];
        let result = VersionChainResolver::new().process_columns(&columns);
        assert_eq!(ids(&result.visible_columns), vec!["y"]);
        assert_eq!(result.hidden_columns.len(), 1);
    }

    #[test]
    fn test_without_linkage_everything_visible() {
        let columns = vec![col("a", None, None), col("b", None, None)];
        let result = VersionChainResolver::new().process_columns(&columns);
        assert_eq!(result.visible_columns.len(), 2);
        assert!(result.hidden_columns.is_empty());
        assert_eq!(VersionChainResolver::new().analyze_chains(&columns).standalone, 2);
    }

    #[test]
    fn test_input_not_mutated() {
        let columns = vec![col("v1", None, Some(1)), col("v2", Some("v1"), Some(2))];
        let before = columns.clone();
        VersionChainResolver::new().process_columns(&columns);
        assert_eq!(columns, before);
    }
}

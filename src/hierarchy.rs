// 🌳 Hierarchy Compiler - category grouping → sum rules
//
// The grouping file lists category nodes in order, each with a nesting level.
// A node's parent is the nearest preceding node one level shallower. This
// module turns that listing into an explicit forest and, for every non-leaf
// node, the ordered list of child codes that sum into it.

use crate::config::EmptyRulePolicy;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// ============================================================================
// SOURCE PANEL
// ============================================================================

/// Which survey a grouping node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourcePanel {
    Interview,
    Diary,
    Integrated,
    Title,
    Statistical,
}

impl SourcePanel {
    /// Parse the one-letter survey column of the grouping file
    pub fn from_code(code: &str) -> Option<SourcePanel> {
        match code.trim() {
            "I" => Some(SourcePanel::Interview),
            "D" => Some(SourcePanel::Diary),
            "G" => Some(SourcePanel::Integrated),
            "T" => Some(SourcePanel::Title),
            "S" => Some(SourcePanel::Statistical),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SourcePanel::Interview => "I",
            SourcePanel::Diary => "D",
            SourcePanel::Integrated => "G",
            SourcePanel::Title => "T",
            SourcePanel::Statistical => "S",
        }
    }
}

// ============================================================================
// CATEGORY NODE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub code: String,
    pub level: u32,
    pub label: String,
    pub source_panel: SourcePanel,

    /// Section of the grouping (CUCHARS, FOOD, EXPEND, INCOME, ASSETS, ADDENDA)
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub factor: Option<String>,
}

impl CategoryNode {
    pub fn new(code: &str, level: u32, label: &str, source_panel: SourcePanel) -> Self {
        CategoryNode {
            code: code.to_string(),
            level,
            label: label.to_string(),
            source_panel,
            group: None,
            factor: None,
        }
    }

    /// Leaf categories carry fully numeric codes; subtotals carry names
    pub fn looks_like_leaf(&self) -> bool {
        is_numeric_code(&self.code)
    }
}

pub fn is_numeric_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_digit())
}

// ============================================================================
// SUM RULES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SumRule {
    pub parent_code: String,
    pub level: u32,
    pub child_codes: Vec<String>,
}

/// Anomalies found while compiling; none of them stop compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HierarchyWarning {
    /// A fully numeric (leaf-style) code acquired children
    NumericParent { code: String, children: usize },

    /// A named (subtotal-style) code acquired no children
    EmptyParent { code: String, level: u32 },

    /// The nearest preceding shallower node is not exactly one level up
    Orphan { code: String, level: u32 },

    /// The same code appears more than once; later rows shadow earlier rules
    DuplicateCode { code: String },
}

impl HierarchyWarning {
    pub fn code(&self) -> &str {
        match self {
            HierarchyWarning::NumericParent { code, .. }
            | HierarchyWarning::EmptyParent { code, .. }
            | HierarchyWarning::Orphan { code, .. }
            | HierarchyWarning::DuplicateCode { code } => code,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            HierarchyWarning::NumericParent { code, children } => {
                format!("leaf-style code {} acquired {} children", code, children)
            }
            HierarchyWarning::EmptyParent { code, level } => {
                format!("subtotal {} at level {} has no children", code, level)
            }
            HierarchyWarning::Orphan { code, level } => {
                format!("node {} at level {} has no parent one level up", code, level)
            }
            HierarchyWarning::DuplicateCode { code } => {
                format!("code {} appears more than once", code)
            }
        }
    }
}

/// Output of the compiler: rules keyed by parent code plus the node table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledHierarchy {
    pub rules: BTreeMap<String, SumRule>,
    pub nodes: Vec<CategoryNode>,

    /// Arena parent index per node (None for roots)
    pub parents: Vec<Option<usize>>,

    pub warnings: Vec<HierarchyWarning>,
}

impl CompiledHierarchy {
    pub fn rule(&self, code: &str) -> Option<&SumRule> {
        self.rules.get(code)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Retained rules, deepest level first; ties keep grouping order
    pub fn rules_deepest_first(&self) -> Vec<&SumRule> {
        let position: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.code.as_str(), i))
            .collect();

        let mut rules: Vec<&SumRule> = self.rules.values().collect();
        rules.sort_by_key(|r| {
            (
                std::cmp::Reverse(r.level),
                position.get(r.parent_code.as_str()).copied().unwrap_or(usize::MAX),
            )
        });
        rules
    }

    /// Label lookup for any node code
    pub fn label(&self, code: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.code == code)
            .map(|n| n.label.as_str())
    }

    /// Codes of nodes no rule sums into them (the forest's roots)
    pub fn roots(&self) -> Vec<&str> {
        self.parents
            .iter()
            .zip(&self.nodes)
            .filter(|(p, _)| p.is_none())
            .map(|(_, n)| n.code.as_str())
            .collect()
    }

    /// Stable digest of the rule set, used to tag persisted runs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for rule in self.rules.values() {
            hasher.update(format!(
                "{}|{}|{}\n",
                rule.parent_code,
                rule.level,
                rule.child_codes.join(",")
            ));
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// COMPILER
// ============================================================================

pub struct HierarchyCompiler {
    empty_rule_policy: EmptyRulePolicy,
}

impl HierarchyCompiler {
    pub fn new() -> Self {
        HierarchyCompiler {
            empty_rule_policy: EmptyRulePolicy::Prune,
        }
    }

    pub fn with_policy(empty_rule_policy: EmptyRulePolicy) -> Self {
        HierarchyCompiler { empty_rule_policy }
    }

    /// Compile an ordered node listing into sum rules
    ///
    /// Single pass over the listing with a stack of open ancestors: each node
    /// pops every open node at its own level or deeper, and is attached to the
    /// top of the stack when that sits exactly one level up.
    pub fn compile(&self, nodes: &[CategoryNode]) -> CompiledHierarchy {
        let mut warnings = Vec::new();
        let mut parents: Vec<Option<usize>> = Vec::with_capacity(nodes.len());
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut open: Vec<usize> = Vec::new();

        for (i, node) in nodes.iter().enumerate() {
            while let Some(&top) = open.last() {
                if nodes[top].level >= node.level {
                    open.pop();
                } else {
                    break;
                }
            }

            let parent = match open.last() {
                Some(&top) if nodes[top].level + 1 == node.level => Some(top),
                Some(_) => {
                    warnings.push(HierarchyWarning::Orphan {
                        code: node.code.clone(),
                        level: node.level,
                    });
                    None
                }
                None => None,
            };

            if let Some(p) = parent {
                children[p].push(i);
            }
            parents.push(parent);
            open.push(i);
        }

        // Every node shallower than the deepest level opened a rule. Nodes are
        // visited last to first so a subtotal sees which of its children were
        // pruned; a pruned subtotal is also struck from its parent's children.
        let deepest = nodes.iter().map(|n| n.level).max().unwrap_or(0);
        let mut pruned = vec![false; nodes.len()];
        let mut opened: Vec<Option<SumRule>> = vec![None; nodes.len()];
        let mut node_warnings: Vec<Option<HierarchyWarning>> = vec![None; nodes.len()];

        for (i, node) in nodes.iter().enumerate().rev() {
            if node.level >= deepest {
                continue;
            }

            let child_codes: Vec<String> = children[i]
                .iter()
                .filter(|&&c| !pruned[c])
                .map(|&c| nodes[c].code.clone())
                .collect();

            if child_codes.is_empty() {
                if !node.looks_like_leaf() {
                    warn!(
                        "hierarchy: subtotal {} (level {}) has no children",
                        node.code, node.level
                    );
                    node_warnings[i] = Some(HierarchyWarning::EmptyParent {
                        code: node.code.clone(),
                        level: node.level,
                    });
                }
                match self.empty_rule_policy {
                    EmptyRulePolicy::Prune => {
                        // Numeric codes stay in place as leaves
                        pruned[i] = !node.looks_like_leaf();
                        debug!("hierarchy: pruned childless rule {}", node.code);
                        continue;
                    }
                    EmptyRulePolicy::ReportZero => {}
                }
            } else if node.looks_like_leaf() {
                warn!(
                    "hierarchy: leaf-style code {} acquired {} children",
                    node.code,
                    child_codes.len()
                );
                node_warnings[i] = Some(HierarchyWarning::NumericParent {
                    code: node.code.clone(),
                    children: child_codes.len(),
                });
            }

            opened[i] = Some(SumRule {
                parent_code: node.code.clone(),
                level: node.level,
                child_codes,
            });
        }

        let mut rules = BTreeMap::new();
        for (i, rule) in opened.into_iter().enumerate() {
            warnings.extend(node_warnings[i].take());
            let Some(rule) = rule else { continue };
            if rules.insert(rule.parent_code.clone(), rule).is_some() {
                warn!("hierarchy: duplicate code {}", nodes[i].code);
                warnings.push(HierarchyWarning::DuplicateCode {
                    code: nodes[i].code.clone(),
                });
            }
        }

        CompiledHierarchy {
            rules,
            nodes: nodes.to_vec(),
            parents,
            warnings,
        }
    }
}

impl Default for HierarchyCompiler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn node(code: &str, level: u32) -> CategoryNode {
        CategoryNode::new(code, level, code, SourcePanel::Integrated)
    }

    fn food_tree() -> Vec<CategoryNode> {
        vec![
            node("EXPEND", 1),
            node("FOODTOTL", 2),
            node("FOODHOME", 3),
            node("CRAKCOOK", 4),
            node("020510", 5),
            node("020610", 5),
            node("BREAD", 4),
            node("020110", 5),
            node("FOODAWAY", 3),
            node("190111", 4),
            node("HOUSING", 2),
            node("220000", 3),
        ]
    }

    #[test]
    fn test_compile_builds_rules_per_parent() {
        let compiled = HierarchyCompiler::new().compile(&food_tree());

        assert_eq!(
            compiled.rule("EXPEND").unwrap().child_codes,
            vec!["FOODTOTL", "HOUSING"]
        );
        assert_eq!(
            compiled.rule("FOODHOME").unwrap().child_codes,
            vec!["CRAKCOOK", "BREAD"]
        );
        assert_eq!(
            compiled.rule("CRAKCOOK").unwrap().child_codes,
            vec!["020510", "020610"]
        );
        assert_eq!(compiled.rule("FOODAWAY").unwrap().child_codes, vec!["190111"]);
        assert_eq!(compiled.rule("HOUSING").unwrap().level, 2);
    }

    #[test]
    fn test_leaves_above_deepest_level_are_pruned() {
        let compiled = HierarchyCompiler::new().compile(&food_tree());

        // Numeric leaves at level 3/4 opened empty rules that get dropped
        assert!(compiled.rule("190111").is_none());
        assert!(compiled.rule("220000").is_none());
        assert!(compiled.warnings.is_empty());
    }

    #[test]
    fn test_compile_is_idempotent() {
        let compiler = HierarchyCompiler::new();
        let first = compiler.compile(&food_tree());
        let second = compiler.compile(&food_tree());

        assert_eq!(first.rules, second.rules);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_rules_deepest_first_ordering() {
        let compiled = HierarchyCompiler::new().compile(&food_tree());
        let levels: Vec<u32> = compiled.rules_deepest_first().iter().map(|r| r.level).collect();

        let mut sorted = levels.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(levels, sorted);
        assert_eq!(compiled.rules_deepest_first()[0].parent_code, "CRAKCOOK");
    }

    #[test]
    fn test_empty_subtotal_is_warned_and_pruned() {
        let nodes = vec![node("TOTAL", 1), node("ALCBEVG", 2), node("FOOD", 2), node("020110", 3)];
        let compiled = HierarchyCompiler::new().compile(&nodes);

        assert!(compiled.rule("ALCBEVG").is_none());
        assert_eq!(
            compiled.warnings,
            vec![HierarchyWarning::EmptyParent {
                code: "ALCBEVG".to_string(),
                level: 2
            }]
        );
        assert_eq!(compiled.rule("TOTAL").unwrap().child_codes, vec!["FOOD"]);
    }

    #[test]
    fn test_pruning_cascades_to_emptied_parents() {
        let nodes = vec![
            node("TOTAL", 1),
            node("TOBACCO", 2),
            node("CIGARETS", 3),
            node("FOOD", 2),
            node("FOODHOME", 3),
            node("020110", 4),
        ];
        let compiled = HierarchyCompiler::new().compile(&nodes);

        assert!(compiled.rule("CIGARETS").is_none());
        assert!(compiled.rule("TOBACCO").is_none());
        assert_eq!(compiled.rule("TOTAL").unwrap().child_codes, vec!["FOOD"]);
        assert_eq!(
            compiled.warnings,
            vec![
                HierarchyWarning::EmptyParent {
                    code: "TOBACCO".to_string(),
                    level: 2
                },
                HierarchyWarning::EmptyParent {
                    code: "CIGARETS".to_string(),
                    level: 3
                },
            ]
        );
    }

    #[test]
    fn test_pruned_numeric_leaf_stays_a_child() {
        let compiled = HierarchyCompiler::new().compile(&food_tree());

        assert_eq!(compiled.rule("HOUSING").unwrap().child_codes, vec!["220000"]);
        assert_eq!(compiled.rule("FOODAWAY").unwrap().child_codes, vec!["190111"]);
    }

    #[test]
    fn test_report_zero_policy_keeps_empty_rule() {
        let nodes = vec![node("TOTAL", 1), node("ALCBEVG", 2), node("FOOD", 2), node("020110", 3)];
        let compiled = HierarchyCompiler::with_policy(EmptyRulePolicy::ReportZero).compile(&nodes);

        let rule = compiled.rule("ALCBEVG").unwrap();
        assert!(rule.child_codes.is_empty());
        assert_eq!(compiled.warnings.len(), 1);
    }

    #[test]
    fn test_numeric_parent_is_warned() {
        let nodes = vec![node("TOTAL", 1), node("100000", 2), node("100010", 3)];
        let compiled = HierarchyCompiler::new().compile(&nodes);

        assert_eq!(compiled.rule("100000").unwrap().child_codes, vec!["100010"]);
        assert!(compiled
            .warnings
            .contains(&HierarchyWarning::NumericParent {
                code: "100000".to_string(),
                children: 1
            }));
    }

    #[test]
    fn test_level_gap_produces_orphan() {
        let nodes = vec![node("TOTAL", 1), node("GAP", 3), node("SIB", 2), node("300000", 3)];
        let compiled = HierarchyCompiler::new().compile(&nodes);

        assert!(compiled.warnings.contains(&HierarchyWarning::Orphan {
            code: "GAP".to_string(),
            level: 3
        }));
        assert_eq!(compiled.rule("TOTAL").unwrap().child_codes, vec!["SIB"]);
        assert_eq!(compiled.parents[1], None);
        assert!(compiled.roots().contains(&"GAP"));
    }

    #[test]
    fn test_source_panel_codes() {
        assert_eq!(SourcePanel::from_code("I"), Some(SourcePanel::Interview));
        assert_eq!(SourcePanel::from_code(" G "), Some(SourcePanel::Integrated));
        assert_eq!(SourcePanel::from_code("S"), Some(SourcePanel::Statistical));
        assert_eq!(SourcePanel::from_code("X"), None);
        assert_eq!(SourcePanel::Title.code(), "T");
    }
}

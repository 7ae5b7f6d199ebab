use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::rules::model::{Rule, RuleSet};

/// Parses either a whole `RuleSet` document or a single `Rule`.
pub fn parse_rules(content: &str) -> Result<Vec<Rule>> {
    if let Ok(rule_set) = serde_yaml::from_str::<RuleSet>(content) {
        return Ok(rule_set.rules);
    }
    let rule = serde_yaml::from_str::<Rule>(content).context("not a rule set or a rule")?;
    Ok(vec![rule])
}

pub fn load_rules_from_dir<P: AsRef<Path>>(path: P) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();

    for entry in WalkDir::new(path) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_yaml = path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file: {:?}", path))?;

        match parse_rules(&content) {
            Ok(parsed) => rules.extend(parsed),
            Err(e) => tracing::warn!("Failed to parse rule file {:?}: {}", path, e),
        }
    }

    Ok(rules)
}

use async_trait::async_trait;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{RawFindings, ScannerAdapter, ToolKind};
use crate::config::EngineConfig;
use crate::error::{CoreError, Result, ToolError};
use crate::language::Language;
use crate::model::Severity;
use crate::rules::loader::load_rules_from_dir;
use crate::rules::model::Rule;

const MAX_SNIPPET_CHARS: usize = 200;

/// One line matched by a site rule.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub rule_id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    /// Absolute path inside the workspace.
    pub file_path: PathBuf,
    pub line: usize,
    pub column: Option<usize>,
    pub snippet: Option<String>,
    pub cwe: Option<String>,
    pub owasp: Option<String>,
    pub category: Option<String>,
}

struct CompiledRule {
    rule: Rule,
    regex: Regex,
}

/// In-process regex runner for operator-supplied YAML rules. Ships no
/// rules of its own; with no `rules_dir` it matches nothing.
#[derive(Clone)]
pub struct PatternScanner {
    rules: Arc<Vec<CompiledRule>>,
    max_file_bytes: u64,
}

impl PatternScanner {
    /// Rules whose pattern does not compile are logged and dropped.
    pub fn new(rules: Vec<Rule>, max_file_bytes: u64) -> Self {
        let compiled = rules
            .into_iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(regex) => Some(CompiledRule { rule, regex }),
                Err(e) => {
                    tracing::warn!("Dropping pattern rule {}: {}", rule.id, e);
                    None
                }
            })
            .collect();
        Self {
            rules: Arc::new(compiled),
            max_file_bytes,
        }
    }

    /// Everything under `rules_dir`; no rules when it is unset.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let rules = match &config.rules_dir {
            Some(dir) => {
                let rules = load_rules_from_dir(dir).map_err(|e| {
                    CoreError::Config(format!("failed to load rules from {}: {:#}", dir.display(), e))
                })?;
                tracing::info!("Loaded {} site rules from {}", rules.len(), dir.display());
                rules
            }
            None => Vec::new(),
        };
        Ok(Self::new(rules, config.max_pattern_file_bytes))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Matches one file's content line by line. `language` selects which
    /// rules apply; `None` keeps only the language-agnostic ones.
    pub fn scan_content(
        &self,
        path: &Path,
        content: &str,
        language: Option<Language>,
    ) -> Vec<PatternMatch> {
        let applicable: Vec<&CompiledRule> = self
            .rules
            .iter()
            .filter(|c| match language {
                Some(lang) => c.rule.applies_to(lang),
                None => c.rule.languages.is_empty(),
            })
            .collect();
        if applicable.is_empty() {
            return Vec::new();
        }

        let prefixes = comment_prefixes(language);
        let mut matches = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if is_comment(line, prefixes) {
                continue;
            }
            for compiled in &applicable {
                if let Some(m) = compiled.regex.find(line) {
                    let rule = &compiled.rule;
                    matches.push(PatternMatch {
                        rule_id: rule.id.clone(),
                        title: rule.name.clone(),
                        description: rule.description.clone(),
                        severity: rule.severity,
                        file_path: path.to_path_buf(),
                        line: i + 1,
                        column: Some(line[..m.start()].chars().count() + 1),
                        snippet: Some(snippet(line)),
                        cwe: rule.cwe.clone(),
                        owasp: rule.owasp.clone(),
                        category: rule.category.clone(),
                    });
                }
            }
        }
        matches
    }

    /// Walks the workspace, skipping VCS metadata, oversized files and
    /// anything that is not UTF-8 text.
    pub fn scan_tree(&self, root: &Path) -> Vec<PatternMatch> {
        let walker = ignore::WalkBuilder::new(root)
            .standard_filters(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        let mut matches = Vec::new();
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().map_or(false, |ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            let too_big = entry
                .metadata()
                .map_or(true, |m| m.len() > self.max_file_bytes);
            if too_big {
                tracing::debug!("Pattern scan skipping {:?}", path);
                continue;
            }
            let content = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(_) => continue,
            };
            matches.extend(self.scan_content(path, &content, Language::from_path(path)));
        }
        matches
    }
}

/// Line-comment markers. `#` opens preprocessor lines in C, so it only
/// counts where the language uses it for comments.
fn comment_prefixes(language: Option<Language>) -> &'static [&'static str] {
    match language {
        Some(Language::Python) => &["#"],
        Some(Language::Php) => &["//", "/*", "#"],
        Some(
            Language::Javascript
            | Language::Typescript
            | Language::Java
            | Language::Go
            | Language::C
            | Language::Cpp,
        ) => &["//", "/*"],
        None => &["#", "//"],
    }
}

fn is_comment(line: &str, prefixes: &[&str]) -> bool {
    let trimmed = line.trim_start();
    prefixes.iter().any(|p| trimmed.starts_with(p))
}

fn snippet(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_SNIPPET_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_SNIPPET_CHARS).collect();
        format!("{}...", cut)
    }
}

#[async_trait]
impl ScannerAdapter for PatternScanner {
    fn kind(&self) -> ToolKind {
        ToolKind::Patterns
    }

    async fn run(&self, root: &Path, _language: Language) -> std::result::Result<RawFindings, ToolError> {
        let scanner = self.clone();
        let root = root.to_path_buf();
        let matches = tokio::task::spawn_blocking(move || scanner.scan_tree(&root))
            .await
            .map_err(|_| ToolError::Panicked {
                tool: ToolKind::Patterns.to_string(),
            })?;
        Ok(RawFindings::Patterns(matches))
    }
}

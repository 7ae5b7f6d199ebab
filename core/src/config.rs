use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::language::Language;
use crate::scanner::ToolKind;

/// Tools appended to every language's plan when the configured list omits them.
pub const ALWAYS_ON_TOOLS: [ToolKind; 1] = [ToolKind::Semgrep];

/// Executable used for each external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCommands {
    pub bandit: String,
    pub semgrep: String,
    pub eslint: String,
    pub gosec: String,
    pub git: String,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            bandit: "bandit".to_string(),
            semgrep: "semgrep".to_string(),
            eslint: "eslint".to_string(),
            gosec: "gosec".to_string(),
            git: "git".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tool_timeout_secs: u64,
    pub clone_timeout_secs: u64,
    pub max_archive_bytes: u64,
    pub max_extracted_bytes: u64,
    /// Files above this size are skipped by the in-process pattern scanner.
    pub max_pattern_file_bytes: u64,
    pub parallel_adapters: bool,
    /// Parent directory for job workspaces; the OS temp dir when unset.
    pub workspace_dir: Option<PathBuf>,
    /// Extra YAML pattern rules loaded next to the embedded ones.
    pub rules_dir: Option<PathBuf>,
    pub tools: ToolCommands,
    pub languages: BTreeMap<Language, Vec<ToolKind>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 300,
            clone_timeout_secs: 300,
            max_archive_bytes: 100 * 1024 * 1024,
            max_extracted_bytes: 1024 * 1024 * 1024,
            max_pattern_file_bytes: 1024 * 1024,
            parallel_adapters: true,
            workspace_dir: None,
            rules_dir: None,
            tools: ToolCommands::default(),
            languages: default_language_tools(),
        }
    }
}

fn default_language_tools() -> BTreeMap<Language, Vec<ToolKind>> {
    use ToolKind::*;

    Language::ALL
        .into_iter()
        .map(|lang| {
            let tools = match lang {
                Language::Python => vec![Bandit, Semgrep],
                Language::Javascript | Language::Typescript => vec![Eslint, Semgrep],
                Language::Go => vec![Gosec, Semgrep],
                Language::Java | Language::Php | Language::C | Language::Cpp => vec![Semgrep],
            };
            (lang, tools)
        })
        .collect()
}

impl EngineConfig {
    /// Reads an optional YAML file, then applies `SASTGATE_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    CoreError::Config(format!("failed to read {}: {}", path.display(), e))
                })?;
                Self::from_yaml_str(&raw)?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| CoreError::Config(format!("invalid config: {}", e)))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        env_override("SASTGATE_TOOL_TIMEOUT_SECS", &mut self.tool_timeout_secs)?;
        env_override("SASTGATE_CLONE_TIMEOUT_SECS", &mut self.clone_timeout_secs)?;
        env_override("SASTGATE_MAX_ARCHIVE_BYTES", &mut self.max_archive_bytes)?;
        env_override("SASTGATE_MAX_EXTRACTED_BYTES", &mut self.max_extracted_bytes)?;
        env_override("SASTGATE_PARALLEL_ADAPTERS", &mut self.parallel_adapters)?;

        if let Ok(v) = env::var("SASTGATE_WORKSPACE_DIR") {
            self.workspace_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("SASTGATE_RULES_DIR") {
            self.rules_dir = Some(PathBuf::from(v));
        }

        env_override("SASTGATE_BANDIT_BIN", &mut self.tools.bandit)?;
        env_override("SASTGATE_SEMGREP_BIN", &mut self.tools.semgrep)?;
        env_override("SASTGATE_ESLINT_BIN", &mut self.tools.eslint)?;
        env_override("SASTGATE_GOSEC_BIN", &mut self.tools.gosec)?;
        env_override("SASTGATE_GIT_BIN", &mut self.tools.git)?;
        Ok(())
    }

    pub fn supported_languages(&self) -> Vec<Language> {
        self.languages.keys().copied().collect()
    }

    pub fn is_supported(&self, language: Language) -> bool {
        self.languages.contains_key(&language)
    }

    /// Ordered, de-duplicated tool list for one language. Site rules run
    /// last, and only when a `rules_dir` is configured.
    pub fn tool_plan(&self, language: Language) -> Vec<ToolKind> {
        let mut plan: Vec<ToolKind> = Vec::new();
        let configured = self.languages.get(&language).map(Vec::as_slice).unwrap_or(&[]);
        for tool in configured.iter().chain(ALWAYS_ON_TOOLS.iter()) {
            if !plan.contains(tool) {
                plan.push(*tool);
            }
        }
        if self.rules_dir.is_some() && !plan.contains(&ToolKind::Patterns) {
            plan.push(ToolKind::Patterns);
        }
        plan
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn workspace_base(&self) -> PathBuf {
        self.workspace_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

fn env_override<T: FromStr>(name: &str, slot: &mut T) -> Result<()> {
    if let Ok(raw) = env::var(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Config(format!("{} has an invalid value: {}", name, raw)))?;
    }
    Ok(())
}

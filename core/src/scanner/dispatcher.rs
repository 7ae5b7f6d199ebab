use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::bandit::BanditAdapter;
use super::eslint::EslintAdapter;
use super::gosec::GosecAdapter;
use super::patterns::PatternScanner;
use super::semgrep::SemgrepAdapter;
use super::{RawFindings, ScannerAdapter, ToolKind};
use crate::config::EngineConfig;
use crate::error::{Result, ToolError};
use crate::language::Language;
use crate::model::{Finding, ToolRun};
use crate::normalize::normalize;

/// Everything one dispatch produced: normalized findings plus one
/// `ToolRun` per planned tool, in plan order.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub findings: Vec<Finding>,
    pub tool_runs: Vec<ToolRun>,
}

impl DispatchReport {
    pub fn all_failed(&self) -> bool {
        !self.tool_runs.is_empty() && self.tool_runs.iter().all(|r| !r.succeeded)
    }
}

/// Selects the adapters for a language and runs them with per-tool
/// failure isolation.
#[derive(Clone)]
pub struct ScannerDispatcher {
    adapters: HashMap<ToolKind, Arc<dyn ScannerAdapter>>,
    config: Arc<EngineConfig>,
}

impl ScannerDispatcher {
    /// A dispatcher with no adapters registered.
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            adapters: HashMap::new(),
            config,
        }
    }

    /// Registers every built-in adapter using the configured binaries.
    pub fn with_default_adapters(config: Arc<EngineConfig>) -> Result<Self> {
        let timeout = config.tool_timeout();
        let tools = config.tools.clone();
        let patterns = PatternScanner::from_config(&config)?;

        let mut dispatcher = Self::new(config);
        dispatcher.register_adapter(BanditAdapter::new(tools.bandit, timeout));
        dispatcher.register_adapter(SemgrepAdapter::new(tools.semgrep, timeout));
        dispatcher.register_adapter(EslintAdapter::new(tools.eslint, timeout));
        dispatcher.register_adapter(GosecAdapter::new(tools.gosec, timeout));
        dispatcher.register_adapter(patterns);
        Ok(dispatcher)
    }

    /// Replaces any adapter already registered for the same tool.
    pub fn register_adapter<A: ScannerAdapter + 'static>(&mut self, adapter: A) {
        self.register_shared(Arc::new(adapter));
    }

    pub fn register_shared(&mut self, adapter: Arc<dyn ScannerAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn plan(&self, language: Language) -> Vec<ToolKind> {
        self.config.tool_plan(language)
    }

    /// Runs the plan for `language` against `root`. Never fails: a tool
    /// that errors is logged and recorded with zero findings.
    pub async fn dispatch(&self, root: &Path, language: Language) -> DispatchReport {
        let plan = self.plan(language);
        tracing::info!(language = %language, tools = ?plan, "Dispatching scanners");

        let outcomes = if self.config.parallel_adapters {
            self.run_parallel(&plan, root, language).await
        } else {
            self.run_sequential(&plan, root, language).await
        };

        let mut report = DispatchReport::default();
        for (tool, outcome, duration_ms) in outcomes {
            match outcome {
                Ok(raw) => {
                    let findings = normalize(raw, root);
                    tracing::info!(tool = %tool, findings = findings.len(), duration_ms, "Tool finished");
                    report.tool_runs.push(ToolRun {
                        tool: tool.to_string(),
                        succeeded: true,
                        findings: findings.len(),
                        error: None,
                        duration_ms,
                    });
                    report.findings.extend(findings);
                }
                Err(e) => {
                    tracing::warn!(tool = %tool, duration_ms, "Tool failed, continuing without it: {}", e);
                    report.tool_runs.push(ToolRun {
                        tool: tool.to_string(),
                        succeeded: false,
                        findings: 0,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                }
            }
        }
        report
    }

    fn adapter(&self, tool: ToolKind) -> std::result::Result<Arc<dyn ScannerAdapter>, ToolError> {
        self.adapters
            .get(&tool)
            .cloned()
            .ok_or_else(|| ToolError::NotInstalled {
                tool: tool.to_string(),
                command: "no adapter registered".to_string(),
            })
    }

    async fn run_sequential(
        &self,
        plan: &[ToolKind],
        root: &Path,
        language: Language,
    ) -> Vec<(ToolKind, std::result::Result<RawFindings, ToolError>, u64)> {
        let mut outcomes = Vec::with_capacity(plan.len());
        for &tool in plan {
            let started = Instant::now();
            let outcome = match self.adapter(tool) {
                Ok(adapter) => match AssertUnwindSafe(adapter.run(root, language)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!(tool = %tool, "Adapter panicked");
                        Err(ToolError::Panicked {
                            tool: tool.to_string(),
                        })
                    }
                },
                Err(e) => Err(e),
            };
            outcomes.push((tool, outcome, elapsed_ms(started)));
        }
        outcomes
    }

    /// One task per adapter. They only share the read-only workspace.
    async fn run_parallel(
        &self,
        plan: &[ToolKind],
        root: &Path,
        language: Language,
    ) -> Vec<(ToolKind, std::result::Result<RawFindings, ToolError>, u64)> {
        let mut handles = Vec::with_capacity(plan.len());
        for &tool in plan {
            let adapter = self.adapter(tool);
            let root: PathBuf = root.to_path_buf();
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let outcome = match adapter {
                    Ok(adapter) => adapter.run(&root, language).await,
                    Err(e) => Err(e),
                };
                (outcome, elapsed_ms(started))
            });
            handles.push((tool, Instant::now(), handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (tool, spawned, handle) in handles {
            match handle.await {
                Ok((outcome, duration_ms)) => outcomes.push((tool, outcome, duration_ms)),
                Err(join_err) => {
                    tracing::error!(tool = %tool, "Adapter task aborted: {}", join_err);
                    outcomes.push((
                        tool,
                        Err(ToolError::Panicked {
                            tool: tool.to_string(),
                        }),
                        elapsed_ms(spawned),
                    ));
                }
            }
        }
        outcomes
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

//! Converts each adapter's typed output into canonical [`Finding`]s.
//!
//! Every tool has an explicit severity table. Anything a table does not
//! list lands in [`Severity::Info`]; nothing tool-native survives this module.

use std::path::Path;
use uuid::Uuid;

use crate::model::{Finding, Severity};
use crate::scanner::bandit::BanditIssue;
use crate::scanner::eslint::EslintFileResult;
use crate::scanner::gosec::GosecIssue;
use crate::scanner::patterns::PatternMatch;
use crate::scanner::semgrep::{OneOrMany, SemgrepResult};
use crate::scanner::{RawFindings, ToolKind};

const BANDIT_SEVERITIES: &[(&str, Severity)] = &[
    ("CRITICAL", Severity::Critical),
    ("HIGH", Severity::High),
    ("MEDIUM", Severity::Medium),
    ("LOW", Severity::Low),
];

const SEMGREP_SEVERITIES: &[(&str, Severity)] = &[
    ("CRITICAL", Severity::Critical),
    ("ERROR", Severity::High),
    ("HIGH", Severity::High),
    ("WARNING", Severity::Medium),
    ("MEDIUM", Severity::Medium),
    ("LOW", Severity::Low),
    ("INFO", Severity::Info),
];

/// ESLint reports 2 for errors and 1 for warnings.
const ESLINT_SEVERITIES: &[(&str, Severity)] = &[
    ("2", Severity::High),
    ("1", Severity::Medium),
    ("0", Severity::Info),
];

const GOSEC_SEVERITIES: &[(&str, Severity)] = &[
    ("CRITICAL", Severity::Critical),
    ("HIGH", Severity::High),
    ("MEDIUM", Severity::Medium),
    ("LOW", Severity::Low),
];

const PATTERN_SEVERITIES: &[(&str, Severity)] = &[
    ("CRITICAL", Severity::Critical),
    ("HIGH", Severity::High),
    ("MEDIUM", Severity::Medium),
    ("LOW", Severity::Low),
    ("INFO", Severity::Info),
];

pub fn severity_table(tool: ToolKind) -> &'static [(&'static str, Severity)] {
    match tool {
        ToolKind::Bandit => BANDIT_SEVERITIES,
        ToolKind::Semgrep => SEMGREP_SEVERITIES,
        ToolKind::Eslint => ESLINT_SEVERITIES,
        ToolKind::Gosec => GOSEC_SEVERITIES,
        ToolKind::Patterns => PATTERN_SEVERITIES,
    }
}

/// Total mapping: case-insensitive lookup, unknown values become `Info`.
pub fn map_severity(tool: ToolKind, native: &str) -> Severity {
    let native = native.trim();
    severity_table(tool)
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(native))
        .map(|(_, severity)| *severity)
        .unwrap_or_else(|| {
            tracing::debug!(tool = %tool, "Unmapped severity '{}', using info", native);
            Severity::Info
        })
}

/// Normalizes one adapter's output. `root` is the workspace root the tool
/// ran against; reported paths are made relative to it.
pub fn normalize(raw: RawFindings, root: &Path) -> Vec<Finding> {
    match raw {
        RawFindings::Bandit(issues) => issues.into_iter().map(|i| from_bandit(i, root)).collect(),
        RawFindings::Semgrep(results) => {
            results.into_iter().map(|r| from_semgrep(r, root)).collect()
        }
        RawFindings::Eslint(files) => files
            .into_iter()
            .flat_map(|file| from_eslint(file, root))
            .collect(),
        RawFindings::Gosec(issues) => issues.into_iter().map(|i| from_gosec(i, root)).collect(),
        RawFindings::Patterns(matches) => {
            matches.into_iter().map(|m| from_pattern(m, root)).collect()
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Path relative to `root`, `/`-separated. Paths already relative, or
/// outside the root, are kept as reported.
pub fn relative_path(root: &Path, reported: &str) -> String {
    let reported_path = Path::new(reported);
    let relative = reported_path
        .strip_prefix(root)
        .unwrap_or(reported_path);
    let joined = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        reported.to_string()
    } else {
        joined
    }
}

fn from_bandit(issue: BanditIssue, root: &Path) -> Finding {
    Finding {
        id: new_id(),
        severity: map_severity(ToolKind::Bandit, &issue.issue_severity),
        title: non_empty(issue.test_name).unwrap_or_else(|| issue.test_id.clone()),
        rule_id: issue.test_id,
        description: issue.issue_text,
        file_path: relative_path(root, &issue.filename),
        line: issue.line_number,
        column: issue.col_offset.map(|c| c + 1),
        cwe: issue
            .issue_cwe
            .and_then(|cwe| cwe.id)
            .map(|id| format!("CWE-{}", id)),
        owasp: None,
        category: Some("security".to_string()),
        code_snippet: issue.code.and_then(non_empty),
        tool: ToolKind::Bandit.to_string(),
    }
}

fn from_semgrep(result: SemgrepResult, root: &Path) -> Finding {
    let meta = &result.extra.metadata;
    let title = result
        .check_id
        .rsplit('.')
        .next()
        .unwrap_or(&result.check_id)
        .to_string();
    Finding {
        id: new_id(),
        severity: map_severity(ToolKind::Semgrep, &result.extra.severity),
        title,
        description: result.extra.message.clone(),
        file_path: relative_path(root, &result.path),
        line: result.start.line,
        column: result.start.col,
        cwe: meta.cwe.as_ref().and_then(OneOrMany::first).map(cwe_tag),
        owasp: meta
            .owasp
            .as_ref()
            .and_then(OneOrMany::first)
            .map(str::to_string),
        category: meta.category.clone().and_then(non_empty),
        // Semgrep without a login replaces the matched source with this marker.
        code_snippet: result
            .extra
            .lines
            .clone()
            .filter(|l| l.trim() != "requires login")
            .and_then(non_empty),
        rule_id: result.check_id,
        tool: ToolKind::Semgrep.to_string(),
    }
}

/// `"CWE-95: Improper Neutralization ..."` -> `"CWE-95"`.
fn cwe_tag(raw: &str) -> String {
    raw.split(':').next().unwrap_or(raw).trim().to_string()
}

fn from_eslint(file: EslintFileResult, root: &Path) -> Vec<Finding> {
    let path = relative_path(root, &file.file_path);
    file.messages
        .into_iter()
        .map(|msg| {
            let rule_id = msg.rule_id.unwrap_or_else(|| "parse-error".to_string());
            Finding {
                id: new_id(),
                severity: map_severity(ToolKind::Eslint, &msg.severity.to_string()),
                title: rule_id.clone(),
                rule_id,
                description: msg.message,
                file_path: path.clone(),
                line: msg.line.unwrap_or(0),
                column: msg.column,
                cwe: None,
                owasp: None,
                category: Some("code_quality".to_string()),
                code_snippet: None,
                tool: ToolKind::Eslint.to_string(),
            }
        })
        .collect()
}

fn from_gosec(issue: GosecIssue, root: &Path) -> Finding {
    let line = issue.line_number();
    let column = issue.column_number();
    Finding {
        id: new_id(),
        severity: map_severity(ToolKind::Gosec, &issue.severity),
        title: issue.rule_id.clone(),
        rule_id: issue.rule_id,
        description: issue.details,
        file_path: relative_path(root, &issue.file),
        line,
        column,
        cwe: issue
            .cwe
            .and_then(|cwe| cwe.id)
            .and_then(non_empty)
            .map(|id| format!("CWE-{}", id)),
        owasp: None,
        category: Some("security".to_string()),
        code_snippet: issue.code.and_then(non_empty),
        tool: ToolKind::Gosec.to_string(),
    }
}

fn from_pattern(m: PatternMatch, root: &Path) -> Finding {
    Finding {
        id: new_id(),
        severity: map_severity(ToolKind::Patterns, m.severity.as_str()),
        rule_id: m.rule_id,
        title: m.title,
        description: m.description,
        file_path: relative_path(root, &m.file_path.to_string_lossy()),
        line: m.line,
        column: m.column,
        cwe: m.cwe,
        owasp: m.owasp,
        category: m.category,
        code_snippet: m.snippet,
        tool: ToolKind::Patterns.to_string(),
    }
}

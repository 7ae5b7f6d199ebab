//! Pure reductions over findings and jobs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::language::{DetectionReport, Language};
use crate::model::{Finding, JobState, LanguageStats, ScanJob, ScanSummary, Severity, SeverityCounts};

/// Builds the summary of one job. Depends only on the finding set, never on
/// its order, so re-running it always gives the same result.
pub fn summarize(findings: &[Finding], detection: &DetectionReport) -> ScanSummary {
    let mut severity_counts = SeverityCounts::default();
    let mut files = BTreeSet::new();
    let mut language_stats: BTreeMap<Language, LanguageStats> = detection
        .counts
        .iter()
        .map(|(&lang, &count)| {
            (
                lang,
                LanguageStats {
                    files: count,
                    findings: 0,
                },
            )
        })
        .collect();

    for finding in findings {
        severity_counts.increment(finding.severity);
        files.insert(finding.file_path.as_str());
        if let Some(lang) = Language::from_path(Path::new(&finding.file_path)) {
            language_stats.entry(lang).or_default().findings += 1;
        }
    }

    ScanSummary {
        severity_counts,
        total: findings.len(),
        files_scanned: detection.files_total,
        files_with_findings: files.len(),
        languages_detected: detection.languages(),
        language_stats,
    }
}

/// Findings bucketed by canonical severity, most severe first.
pub fn group_by_severity(findings: &[Finding]) -> BTreeMap<Severity, Vec<&Finding>> {
    let mut groups: BTreeMap<Severity, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        groups.entry(finding.severity).or_default().push(finding);
    }
    groups
}

/// Service-wide numbers for the statistics query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_scans: usize,
    pub completed_scans: usize,
    pub running_scans: usize,
    pub pending_scans: usize,
    pub failed_scans: usize,
    pub vulnerability_summary: SeverityCounts,
    pub total_vulnerabilities: usize,
    pub supported_languages: Vec<Language>,
}

pub fn job_statistics(jobs: &[ScanJob], supported_languages: Vec<Language>) -> ScanStats {
    let mut stats = ScanStats {
        total_scans: jobs.len(),
        supported_languages,
        ..ScanStats::default()
    };
    for job in jobs {
        match job.state {
            JobState::Pending => stats.pending_scans += 1,
            JobState::Running => stats.running_scans += 1,
            JobState::Completed => stats.completed_scans += 1,
            JobState::Failed => stats.failed_scans += 1,
        }
        if let Some(summary) = &job.summary {
            stats.vulnerability_summary.add(&summary.severity_counts);
        }
    }
    stats.total_vulnerabilities = stats.vulnerability_summary.total();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceDescriptor;

    fn finding(file: &str, severity: Severity) -> Finding {
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            severity,
            rule_id: "R".to_string(),
            title: "t".to_string(),
            description: String::new(),
            file_path: file.to_string(),
            line: 1,
            column: None,
            cwe: None,
            owasp: None,
            category: None,
            code_snippet: None,
            tool: "patterns".to_string(),
        }
    }

    fn detection() -> DetectionReport {
        let mut report = DetectionReport::default();
        report.counts.insert(Language::Python, 3);
        report.counts.insert(Language::Javascript, 1);
        report.files_total = 6;
        report
    }

    fn sample() -> Vec<Finding> {
        vec![
            finding("app.py", Severity::High),
            finding("app.py", Severity::Medium),
            finding("lib/util.py", Severity::Critical),
            finding("web/index.js", Severity::Info),
            finding("config.yml", Severity::High),
        ]
    }

    #[test]
    fn counts_add_up() {
        let findings = sample();
        let summary = summarize(&findings, &detection());
        assert_eq!(summary.total, findings.len());
        assert_eq!(summary.severity_counts.total(), summary.total);
        assert_eq!(summary.severity_counts.high, 2);
        assert_eq!(summary.files_with_findings, 4);
        assert_eq!(summary.files_scanned, 6);
        assert_eq!(
            summary.languages_detected,
            vec![Language::Python, Language::Javascript]
        );
        assert_eq!(summary.language_stats[&Language::Python].files, 3);
        assert_eq!(summary.language_stats[&Language::Python].findings, 3);
        assert_eq!(summary.language_stats[&Language::Javascript].findings, 1);
    }

    #[test]
    fn order_does_not_matter() {
        let findings = sample();
        let mut reversed = findings.clone();
        reversed.reverse();
        let mut rotated = findings.clone();
        rotated.rotate_left(2);

        let expected = summarize(&findings, &detection());
        assert_eq!(summarize(&reversed, &detection()), expected);
        assert_eq!(summarize(&rotated, &detection()), expected);
        assert_eq!(summarize(&findings, &detection()), expected);
    }

    #[test]
    fn groups_most_severe_first() {
        let findings = sample();
        let groups = group_by_severity(&findings);
        let order: Vec<_> = groups.keys().copied().collect();
        assert_eq!(
            order,
            vec![Severity::Critical, Severity::High, Severity::Medium, Severity::Info]
        );
        assert_eq!(groups[&Severity::High].len(), 2);
    }

    #[test]
    fn statistics_sum_over_jobs() {
        let source = SourceDescriptor::Repository {
            url: "https://example.com/r.git".to_string(),
            branch: "main".to_string(),
        };
        let mut done = ScanJob::new(source.clone(), None, None);
        done.start();
        done.complete(summarize(&sample(), &detection()));
        let mut failed = ScanJob::new(source.clone(), None, None);
        failed.fail("SourceAcquisitionError: boom", None);
        let pending = ScanJob::new(source, None, None);

        let stats = job_statistics(&[done, failed, pending], vec![Language::Python]);
        assert_eq!(stats.total_scans, 3);
        assert_eq!(stats.completed_scans, 1);
        assert_eq!(stats.failed_scans, 1);
        assert_eq!(stats.pending_scans, 1);
        assert_eq!(stats.total_vulnerabilities, 5);
        assert_eq!(stats.vulnerability_summary.critical, 1);
    }
}

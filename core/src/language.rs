use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{CoreError, Result, ValidationError};

/// Languages the engine knows how to dispatch. Declaration order breaks
/// frequency ties during detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
    Java,
    Go,
    Php,
    C,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::Python,
        Language::Javascript,
        Language::Typescript,
        Language::Java,
        Language::Go,
        Language::Php,
        Language::C,
        Language::Cpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Java => "java",
            Language::Go => "go",
            Language::Php => "php",
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py"],
            Language::Javascript => &["js", "jsx", "mjs", "cjs"],
            Language::Typescript => &["ts", "tsx"],
            Language::Java => &["java"],
            Language::Go => &["go"],
            Language::Php => &["php"],
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "hpp", "cc", "cxx"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    pub fn from_path(path: &Path) -> Option<Language> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::Javascript),
            "typescript" | "ts" => Ok(Language::Typescript),
            "java" => Ok(Language::Java),
            "go" | "golang" => Ok(Language::Go),
            "php" => Ok(Language::Php),
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            _ => Err(ValidationError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Histogram of recognised source files in one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub counts: BTreeMap<Language, usize>,
    /// Every regular file walked, recognised or not.
    pub files_total: usize,
}

impl DetectionReport {
    pub fn languages(&self) -> Vec<Language> {
        self.counts.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Most frequent language; ties go to the earlier language in `Language::ALL`.
    pub fn primary(&self) -> Option<Language> {
        let mut best: Option<(Language, usize)> = None;
        for (&lang, &count) in &self.counts {
            match best {
                Some((_, best_count)) if best_count >= count => {}
                _ => best = Some((lang, count)),
            }
        }
        best.map(|(lang, _)| lang)
    }

    /// The hint is honoured only when it was actually observed; otherwise the
    /// majority language wins.
    pub fn effective_language(&self, hint: Option<Language>) -> Result<Language> {
        if let Some(lang) = hint {
            if self.counts.contains_key(&lang) {
                return Ok(lang);
            }
        }
        self.primary().ok_or(CoreError::NoScannableCode)
    }
}

/// Walks the workspace once, skipping VCS metadata.
pub fn detect_languages(root: &Path) -> Result<DetectionReport> {
    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut report = DetectionReport::default();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().map_or(false, |ft| ft.is_file()) {
            continue;
        }
        report.files_total += 1;
        if let Some(lang) = Language::from_path(entry.path()) {
            *report.counts.entry(lang).or_insert(0) += 1;
        }
    }

    Ok(report)
}

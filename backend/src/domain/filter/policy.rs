//! Swappable word, shortener, and phrase tables for the content filter.
//!
//! The tables are data: a JSON document can replace the built-in defaults
//! without touching the evaluation logic.

use std::path::{Path, PathBuf};

use cap_std::{ambient_authority, fs::Dir};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::Severity;

/// One forbidden word or phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordRule {
    pub pattern: String,
    pub severity: Severity,
    /// Substitute used instead of masking for low and medium severities.
    #[serde(default)]
    pub replacement: Option<String>,
}

/// Serialised policy tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPolicyTables {
    #[serde(default)]
    pub words: Vec<WordRule>,
    /// Hosts of link shorteners; subdomains match too.
    #[serde(default)]
    pub url_shorteners: Vec<String>,
    /// Case-insensitive fragments that mark a link as suspicious.
    #[serde(default)]
    pub suspicious_phrases: Vec<String>,
}

impl Default for FilterPolicyTables {
    fn default() -> Self {
        let word = |pattern: &str, severity, replacement: Option<&str>| WordRule {
            pattern: pattern.to_owned(),
            severity,
            replacement: replacement.map(str::to_owned),
        };
        Self {
            words: vec![
                word("damn", Severity::Low, Some("darn")),
                word("crap", Severity::Low, Some("crud")),
                word("stupid", Severity::Low, None),
                word("shut up", Severity::Low, None),
                word("idiot", Severity::Medium, None),
                word("moron", Severity::Medium, None),
                word("kill yourself", Severity::High, None),
                word("go die", Severity::High, None),
            ],
            url_shorteners: [
                "bit.ly",
                "tinyurl.com",
                "t.co",
                "goo.gl",
                "ow.ly",
                "is.gd",
                "buff.ly",
                "cutt.ly",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            suspicious_phrases: [
                "free-money",
                "giveaway",
                "airdrop",
                "claim-prize",
                "casino",
                "crypto-double",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
        }
    }
}

/// Errors raised while loading a policy.
#[derive(Debug, thiserror::Error)]
pub enum FilterPolicyError {
    #[error("failed to read filter policy {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("filter policy is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("filter word pattern {pattern:?} is invalid: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledWord {
    pub(crate) rule: WordRule,
    pub(crate) matcher: Regex,
}

/// Compiled policy ready for evaluation.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    words: Vec<CompiledWord>,
    url_shorteners: Vec<String>,
    suspicious_phrases: Vec<String>,
}

impl FilterPolicy {
    /// Compile policy tables; patterns match literally and ignore case.
    pub fn compile(tables: FilterPolicyTables) -> Result<Self, FilterPolicyError> {
        let words = tables
            .words
            .into_iter()
            .filter(|rule| !rule.pattern.trim().is_empty())
            .map(|rule| {
                RegexBuilder::new(&regex::escape(rule.pattern.trim()))
                    .case_insensitive(true)
                    .build()
                    .map(|matcher| CompiledWord {
                        rule: rule.clone(),
                        matcher,
                    })
                    .map_err(|source| FilterPolicyError::Pattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            words,
            url_shorteners: lowercase_all(tables.url_shorteners),
            suspicious_phrases: lowercase_all(tables.suspicious_phrases),
        })
    }

    pub fn from_json(contents: &str) -> Result<Self, FilterPolicyError> {
        Self::compile(serde_json::from_str(contents)?)
    }

    /// Load a JSON policy document from disk.
    pub fn load(path: &Path) -> Result<Self, FilterPolicyError> {
        let read_error = |source| FilterPolicyError::Read {
            path: path.to_path_buf(),
            source,
        };
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = path.file_name().ok_or_else(|| {
            read_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "policy path must be a file",
            ))
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
        let contents = dir
            .read_to_string(Path::new(file_name))
            .map_err(read_error)?;
        Self::from_json(&contents)
    }

    pub(crate) fn words(&self) -> &[CompiledWord] {
        &self.words
    }

    /// Whether `host` belongs to a known shortener.
    pub fn is_shortener(&self, host: &str) -> bool {
        let host = host.trim_start_matches("www.").to_ascii_lowercase();
        self.url_shorteners.iter().any(|shortener| {
            host == *shortener
                || host
                    .strip_suffix(shortener.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }

    /// First suspicious phrase contained in `text`.
    pub fn suspicious_phrase(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.suspicious_phrases
            .iter()
            .find(|phrase| lowered.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        let tables = FilterPolicyTables::default();
        match Self::compile(tables) {
            Ok(policy) => policy,
            Err(err) => panic!("built-in filter policy must compile: {err}"),
        }
    }
}

fn lowercase_all(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

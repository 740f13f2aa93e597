//! Command queue naming and entry format.
//!
//! Model commands travel as `<name>/<version>` or `<name>/*`; tensor cleanup
//! entries are bare tensor labels.

use serde::Deserialize;
use std::error::Error;
use std::fmt;

/// Version part of a model command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Exact(String),
    All,
}

/// A parsed `<name>/<version>` queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCommand {
    pub name: String,
    pub version: VersionSelector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError(pub String);

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Malformed queue entry '{}', expected '<name>/<version>'", self.0)
    }
}

impl Error for EntryError {}

impl ModelCommand {
    pub fn exact(name: &str, version: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            version: VersionSelector::Exact(version.to_string()),
        }
    }

    pub fn all_versions(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: VersionSelector::All,
        }
    }

    pub fn parse(entry: &str) -> Result<Self, EntryError> {
        let (name, version) = entry
            .split_once('/')
            .ok_or_else(|| EntryError(entry.to_string()))?;
        if name.is_empty() || version.is_empty() || version.contains('/') {
            return Err(EntryError(entry.to_string()));
        }

        let version = match version {
            "*" => VersionSelector::All,
            v => VersionSelector::Exact(v.to_string()),
        };
        Ok(Self { name: name.to_string(), version })
    }

    /// Queue entry form of the command
    pub fn entry(&self) -> String {
        match &self.version {
            VersionSelector::Exact(v) => format!("{}/{}", self.name, v),
            VersionSelector::All => format!("{}/*", self.name),
        }
    }

    /// Store scan pattern matching exactly the keys this command names
    pub fn scan_pattern(&self) -> String {
        match &self.version {
            VersionSelector::Exact(v) => format!("{}/{}", escape_glob(&self.name), escape_glob(v)),
            VersionSelector::All => format!("{}/*", escape_glob(&self.name)),
        }
    }
}

/// Escapes the characters a store scan pattern treats as glob syntax
fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for ModelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entry())
    }
}

/// Names of the three command queues
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueueNames {
    pub add_model: String,
    pub delete_model: String,
    pub delete_tensor: String,
    /// Park failed entries on `<queue>:failed`
    #[serde(default)]
    pub dead_letter: bool,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            add_model: "models_to_add".to_string(),
            delete_model: "models_to_delete".to_string(),
            delete_tensor: "tensors_to_delete".to_string(),
            dead_letter: true,
        }
    }
}

impl QueueNames {
    /// Dead-letter queue paired with `queue`, if enabled
    pub fn dead_letter_for(&self, queue: &str) -> Option<String> {
        self.dead_letter.then(|| format!("{}:failed", queue))
    }
}

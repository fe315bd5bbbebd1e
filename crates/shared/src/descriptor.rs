//! Backend descriptors
//!
//! A backend is either a local process speaking MCP over stdio or a remote
//! HTTP endpoint. Raw records come in as an ordered JSON list:
//!
//! ```json
//! [
//!   { "name": "filesystem", "command": "npx -y @modelcontextprotocol/server-filesystem /tmp" },
//!   { "name": "Search", "url": "https://search.example.com/mcp" }
//! ]
//! ```
//!
//! Validation normalizes names, splits whitespace-bearing commands and rejects
//! duplicates so that every published identifier prefix is unique.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DescriptorError, DescriptorResult};

/// Raw backend record as it appears in the backend list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawBackendRecord")]
pub enum BackendEntry {
    Remote {
        name: String,
        url: String,
    },
    Local {
        name: String,
        command: String,
        args: Option<Vec<String>>,
        env: HashMap<String, String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackendRecord {
    name: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
}

impl TryFrom<RawBackendRecord> for BackendEntry {
    type Error = String;

    fn try_from(raw: RawBackendRecord) -> Result<Self, Self::Error> {
        match (raw.command, raw.url) {
            (Some(command), None) => Ok(BackendEntry::Local {
                name: raw.name,
                command,
                args: raw.args,
                env: raw.env.unwrap_or_default(),
            }),
            (None, Some(url)) => {
                if raw.args.is_some() || raw.env.is_some() {
                    return Err(format!(
                        "backend '{}': args/env are only valid with a command",
                        raw.name
                    ));
                }
                Ok(BackendEntry::Remote { name: raw.name, url })
            }
            (Some(_), Some(_)) => Err(format!(
                "backend '{}' sets both command and url",
                raw.name
            )),
            (None, None) => Err(format!(
                "backend '{}' needs either a command or a url",
                raw.name
            )),
        }
    }
}

impl BackendEntry {
    pub fn name(&self) -> &str {
        match self {
            BackendEntry::Remote { name, .. } | BackendEntry::Local { name, .. } => name,
        }
    }

    /// Validate this record and turn it into a descriptor.
    ///
    /// `index` is the record's position in the list and is only used in errors.
    pub fn into_descriptor(self, index: usize) -> DescriptorResult<BackendDescriptor> {
        let name = normalize_name(self.name());
        if name.is_empty() {
            return Err(DescriptorError::EmptyName { index });
        }

        let transport = match self {
            BackendEntry::Remote { url, .. } => {
                let endpoint = Url::parse(url.trim()).map_err(|e| DescriptorError::InvalidUrl {
                    name: name.clone(),
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
                if !matches!(endpoint.scheme(), "http" | "https") {
                    return Err(DescriptorError::InvalidUrl {
                        name,
                        url,
                        reason: "scheme must be http or https".to_string(),
                    });
                }
                BackendTransport::Remote(endpoint)
            }
            BackendEntry::Local { command, args, env, .. } => {
                BackendTransport::Local(LocalSpec::from_command(&name, &command, args, env)?)
            }
        };

        Ok(BackendDescriptor { name, transport })
    }
}

/// Normalize a backend name: lowercase with all whitespace removed
pub fn normalize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Which family of transport a backend is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Local,
    Remote,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Local => write!(f, "local"),
            TransportKind::Remote => write!(f, "remote"),
        }
    }
}

/// How to spawn a local backend process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSpec {
    pub executable: String,
    pub args: Vec<String>,
    /// Entries overlaid on the ambient environment of the gateway process
    pub env: HashMap<String, String>,
}

impl LocalSpec {
    fn from_command(
        name: &str,
        command: &str,
        args: Option<Vec<String>>,
        env: HashMap<String, String>,
    ) -> DescriptorResult<Self> {
        let command = command.trim();
        if command.is_empty() {
            return Err(DescriptorError::EmptyCommand {
                name: name.to_string(),
            });
        }

        let args = args.unwrap_or_default();
        let (executable, args) = if args.is_empty() && command.contains(char::is_whitespace) {
            let mut parts = command.split_whitespace().map(str::to_string);
            // Non-empty after trim, so there is at least one part
            let executable = parts.next().unwrap_or_default();
            (executable, parts.collect())
        } else {
            (command.to_string(), args)
        };

        Ok(Self {
            executable,
            args,
            env,
        })
    }
}

/// Transport-specific half of a descriptor. Exactly one is ever present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTransport {
    Local(LocalSpec),
    Remote(Url),
}

/// Validated configuration for one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Normalized, unique backend name
    pub name: String,
    pub transport: BackendTransport,
}

impl BackendDescriptor {
    pub fn kind(&self) -> TransportKind {
        match self.transport {
            BackendTransport::Local(_) => TransportKind::Local,
            BackendTransport::Remote(_) => TransportKind::Remote,
        }
    }

    pub fn local_spec(&self) -> Option<&LocalSpec> {
        match &self.transport {
            BackendTransport::Local(spec) => Some(spec),
            BackendTransport::Remote(_) => None,
        }
    }

    pub fn remote_endpoint(&self) -> Option<&Url> {
        match &self.transport {
            BackendTransport::Local(_) => None,
            BackendTransport::Remote(url) => Some(url),
        }
    }
}

/// Validate an ordered list of raw records, rejecting duplicate names
pub fn validate_entries(entries: Vec<BackendEntry>) -> DescriptorResult<Vec<BackendDescriptor>> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut descriptors = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let descriptor = entry.into_descriptor(index)?;
        if let Some(first) = seen.get(&descriptor.name) {
            return Err(DescriptorError::DuplicateName {
                name: descriptor.name,
                first: *first,
                second: index,
            });
        }
        seen.insert(descriptor.name.clone(), index);
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}

/// Backend list document: either a bare array or `{"backends": [...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BackendListDocument {
    List(Vec<BackendEntry>),
    Wrapped { backends: Vec<BackendEntry> },
}

/// Parse and validate a JSON backend list
pub fn parse_backend_list(json: &str) -> DescriptorResult<Vec<BackendDescriptor>> {
    let document: BackendListDocument =
        serde_json::from_str(json).map_err(|e| DescriptorError::Malformed(e.to_string()))?;

    let entries = match document {
        BackendListDocument::List(entries) => entries,
        BackendListDocument::Wrapped { backends } => backends,
    };

    validate_entries(entries)
}

/// Names of all descriptors, in configured order
pub fn descriptor_names(descriptors: &[BackendDescriptor]) -> Vec<&str> {
    descriptors.iter().map(|d| d.name.as_str()).collect()
}

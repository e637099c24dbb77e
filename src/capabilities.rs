use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::CapabilityError;

const DEFAULT_READ_MAX_BYTES: usize = 200 * 1024;
const SEARCH_MAX_RESULTS: usize = 100;

/// Privileged client-side actions the server may request mid-turn.
///
/// Implementations validate their own arguments; the consent coordinator
/// converts any failure into a textual tool result rather than aborting
/// the turn.
pub trait CapabilityProvider: Send + Sync {
    fn read_file(&self, path: &str) -> Result<String, CapabilityError>;

    fn search_files(&self, query: &str, dir: Option<&str>) -> Result<Vec<String>, CapabilityError>;

    fn create_file(&self, path: &str, content: &str) -> Result<String, CapabilityError>;
}

/// Dispatch a named tool call against `provider`, extracting arguments from
/// the wire-level JSON object.
pub fn execute_tool(
    provider: &dyn CapabilityProvider,
    name: &str,
    args: &Value,
) -> Result<String, CapabilityError> {
    match name {
        "read_file" => {
            let path = required_str(args, "read_file", "path")?;
            provider.read_file(path)
        }
        "search_files" => {
            let query = required_str(args, "search_files", "query")?;
            let dir = args.get("dir").and_then(Value::as_str);
            let matches = provider.search_files(query, dir)?;
            if matches.is_empty() {
                Ok("No matching files found.".to_string())
            } else {
                Ok(matches.join("\n"))
            }
        }
        "create_file" => {
            let path = required_str(args, "create_file", "path")?;
            let content = args
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            provider.create_file(path, content)
        }
        other => Err(CapabilityError::UnknownTool(other.to_string())),
    }
}

fn required_str<'a>(
    args: &'a Value,
    tool: &'static str,
    argument: &'static str,
) -> Result<&'a str, CapabilityError> {
    args.get(argument)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or(CapabilityError::MissingArgument { tool, argument })
}

/// Capability provider confined to one canonicalized workspace root.
/// Every resolved path must stay inside the root; escapes are rejected
/// before any I/O happens.
#[derive(Debug, Clone)]
pub struct WorkspaceCapabilities {
    workspace_root: PathBuf,
    read_max_bytes: usize,
}

impl WorkspaceCapabilities {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Result<Self, CapabilityError> {
        let workspace_root = workspace_root.into();
        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|source| CapabilityError::io("resolving workspace root", workspace_root.display().to_string(), source))?;

        Ok(Self {
            workspace_root: canonical_root,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn resolve_existing(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        if path.trim().is_empty() {
            return Err(CapabilityError::EmptyPath);
        }

        let candidate = self.absolute_candidate(path);
        let canonical = candidate
            .canonicalize()
            .map_err(|source| CapabilityError::io("resolving", path.to_string(), source))?;
        self.ensure_inside_workspace(&canonical)?;
        Ok(canonical)
    }

    fn resolve_write(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        if path.trim().is_empty() {
            return Err(CapabilityError::EmptyPath);
        }

        let candidate = self.absolute_candidate(path);
        let anchor = candidate
            .ancestors()
            .find(|ancestor| ancestor.exists())
            .ok_or(CapabilityError::EmptyPath)?;
        let canonical_anchor = anchor
            .canonicalize()
            .map_err(|source| CapabilityError::io("resolving", path.to_string(), source))?;
        self.ensure_inside_workspace(&canonical_anchor)?;
        Ok(candidate)
    }

    fn absolute_candidate(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    fn ensure_inside_workspace(&self, canonical: &Path) -> Result<(), CapabilityError> {
        if canonical.starts_with(&self.workspace_root) {
            Ok(())
        } else {
            Err(CapabilityError::PathEscape(canonical.display().to_string()))
        }
    }

    fn collect_matches(
        &self,
        dir: &Path,
        needle: &str,
        matches: &mut Vec<String>,
    ) -> Result<(), CapabilityError> {
        if matches.len() >= SEARCH_MAX_RESULTS {
            return Ok(());
        }

        let entries = fs::read_dir(dir)
            .map_err(|source| CapabilityError::io("listing", dir.display().to_string(), source))?;

        for entry in entries.flatten() {
            if matches.len() >= SEARCH_MAX_RESULTS {
                return Ok(());
            }

            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().to_lowercase();
            if path.is_dir() {
                if file_name.starts_with('.') {
                    continue;
                }
                self.collect_matches(&path, needle, matches)?;
            } else if file_name.contains(needle) {
                let display = path
                    .strip_prefix(&self.workspace_root)
                    .map(|relative| relative.display().to_string())
                    .unwrap_or_else(|_| path.display().to_string());
                matches.push(display);
            }
        }

        Ok(())
    }
}

impl CapabilityProvider for WorkspaceCapabilities {
    fn read_file(&self, path: &str) -> Result<String, CapabilityError> {
        let resolved = self.resolve_existing(path)?;
        let bytes = fs::read(&resolved)
            .map_err(|source| CapabilityError::io("reading", path.to_string(), source))?;

        if bytes.len() > self.read_max_bytes {
            return Err(CapabilityError::TooLarge {
                path: path.to_string(),
                size: bytes.len(),
                limit: self.read_max_bytes,
            });
        }

        String::from_utf8(bytes).map_err(|_| CapabilityError::NotUtf8 {
            path: path.to_string(),
        })
    }

    fn search_files(&self, query: &str, dir: Option<&str>) -> Result<Vec<String>, CapabilityError> {
        let root = match dir {
            Some(dir) => self.resolve_existing(dir)?,
            None => self.workspace_root.clone(),
        };

        let needle = query.trim().to_lowercase();
        let mut matches = Vec::new();
        self.collect_matches(&root, &needle, &mut matches)?;
        matches.sort();
        Ok(matches)
    }

    fn create_file(&self, path: &str, content: &str) -> Result<String, CapabilityError> {
        let resolved = self.resolve_write(path)?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|source| {
                CapabilityError::io("creating parent directories for", path.to_string(), source)
            })?;
        }

        fs::write(&resolved, content)
            .map_err(|source| CapabilityError::io("writing", path.to_string(), source))?;
        Ok(format!("Created {}", resolved.display()))
    }
}

//! Configuration schema and normalization.
//!
//! The on-disk config is consumed as-is; interface entries may be either a
//! bare host string or a structured object. Both shapes are normalized into
//! one canonical [`Interface`] at load time so nothing downstream has to
//! special-case them.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::permissions::{self, FileRule, Permission};

pub const CONFIG_FILE: &str = "filepipe.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub signaling_server: String,
    #[serde(default)]
    pub diff_base_branch: Option<String>,
    pub interfaces: Vec<RawInterface>,
}

/// An interface entry as written in the config file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawInterface {
    Host(String),
    Decl(RawDecl),
}

#[derive(Debug, Deserialize)]
pub struct RawDecl {
    pub name: Option<String>,
    pub host: String,
    pub file: Option<String>,
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub manager: bool,
    #[serde(default)]
    pub open: bool,
}

/// Canonical, immutable interface declaration.
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub host: String,
    pub rules: Vec<FileRule>,
    pub manager: bool,
    pub open: bool,
}

impl Interface {
    pub fn allows(&self, path: &str, perm: Permission) -> bool {
        permissions::allows(&self.rules, path, perm)
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("malformed config file {}", path.display()))?;
        if config.interfaces.is_empty() {
            return Err(anyhow!("config declares no interfaces"));
        }
        Ok(config)
    }

    /// Normalize every raw interface entry into the canonical shape.
    pub fn interfaces(&self) -> Result<Vec<Interface>> {
        self.interfaces
            .iter()
            .enumerate()
            .map(|(idx, raw)| normalize(idx, raw))
            .collect()
    }
}

fn normalize(idx: usize, raw: &RawInterface) -> Result<Interface> {
    match raw {
        // A bare host string shares everything read/write under a derived name.
        RawInterface::Host(host) => Ok(Interface {
            name: derive_name(host, idx),
            host: host.clone(),
            rules: vec![FileRule::parse("** rw")?],
            manager: false,
            open: false,
        }),
        RawInterface::Decl(decl) => {
            let mut rules = Vec::new();
            if let Some(file) = &decl.file {
                // A single shared file is implicitly read/write; built
                // structurally so spaces in the filename stay part of it.
                rules.push(
                    FileRule::for_path(file)
                        .with_context(|| format!("interface '{}': bad file entry", decl.host))?,
                );
            }
            for entry in decl.files.iter().flatten() {
                rules.push(
                    FileRule::parse(entry).with_context(|| {
                        format!("interface '{}': bad files entry '{entry}'", decl.host)
                    })?,
                );
            }
            if rules.is_empty() {
                return Err(anyhow!(
                    "interface '{}' declares neither 'file' nor 'files'",
                    decl.host
                ));
            }
            Ok(Interface {
                name: decl
                    .name
                    .clone()
                    .unwrap_or_else(|| derive_name(&decl.host, idx)),
                host: decl.host.clone(),
                rules,
                manager: decl.manager,
                open: decl.open,
            })
        }
    }
}

fn derive_name(host: &str, idx: usize) -> String {
    host.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|seg| !seg.is_empty() && !seg.contains(':'))
        .map(str::to_string)
        .unwrap_or_else(|| format!("interface-{idx}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn normalizes_bare_host_string() {
        let config = parse(
            r#"{"signalingServer":"wss://sig.example.dev",
                "interfaces":["https://pipe.example.dev/editor"]}"#,
        );
        let ifaces = config.interfaces().unwrap();
        assert_eq!(ifaces.len(), 1);
        assert_eq!(ifaces[0].name, "editor");
        assert!(ifaces[0].allows("anything/at/all.txt", Permission::Read));
        assert!(ifaces[0].allows("anything/at/all.txt", Permission::Write));
        assert!(!ifaces[0].manager);
    }

    #[test]
    fn normalizes_single_file_to_rw_rule() {
        let config = parse(
            r#"{"signalingServer":"wss://sig.example.dev",
                "interfaces":[{"host":"https://pipe.example.dev/notes","file":"notes.txt"}]}"#,
        );
        let iface = &config.interfaces().unwrap()[0];
        assert!(iface.allows("notes.txt", Permission::Read));
        assert!(iface.allows("notes.txt", Permission::Write));
        assert!(!iface.allows("other.txt", Permission::Read));
    }

    #[test]
    fn file_entry_with_spaces_matches_itself() {
        let config = parse(
            r#"{"signalingServer":"wss://sig.example.dev",
                "interfaces":[{"host":"https://pipe.example.dev/notes","file":"my notes.txt"}]}"#,
        );
        let iface = &config.interfaces().unwrap()[0];
        assert!(iface.allows("my notes.txt", Permission::Read));
        assert!(iface.allows("my notes.txt", Permission::Write));
        assert!(!iface.allows("my", Permission::Read));
        assert!(!iface.allows("notes.txt", Permission::Read));
    }

    #[test]
    fn keeps_structured_declaration() {
        let config = parse(
            r#"{"signalingServer":"wss://sig.example.dev",
                "diffBaseBranch":"main",
                "interfaces":[{"name":"board","host":"https://pipe.example.dev/b",
                               "files":["*.yml r","state/** w"],
                               "manager":true,"open":true}]}"#,
        );
        assert_eq!(config.diff_base_branch.as_deref(), Some("main"));
        let iface = &config.interfaces().unwrap()[0];
        assert_eq!(iface.name, "board");
        assert!(iface.manager);
        assert!(iface.open);
        assert!(iface.allows("api.yml", Permission::Read));
        assert!(!iface.allows("api.yml", Permission::Write));
        assert!(iface.allows("state/cursor.json", Permission::Write));
    }

    #[test]
    fn rejects_interface_without_rules() {
        let config = parse(
            r#"{"signalingServer":"wss://sig.example.dev",
                "interfaces":[{"host":"https://pipe.example.dev/x"}]}"#,
        );
        assert!(config.interfaces().is_err());
    }

    #[test]
    fn derives_fallback_name_for_opaque_hosts() {
        assert_eq!(derive_name("https://pipe.example.dev/editor", 0), "editor");
        assert_eq!(derive_name("http://localhost:9000", 3), "interface-3");
    }
}

//! Permission rules gating which paths may cross between disk and document.
//!
//! Each interface carries one or more declarations of the form
//! `"<glob> [<mapping>] <perms>"` where perms is any subset of `r` (the path
//! may flow local -> remote) and `w` (remote -> local). Rules combine with OR
//! semantics and there is no negation.

use anyhow::{anyhow, Context, Result};
use globset::{Glob, GlobMatcher};

/// Direction a path wants to cross the bridge in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Local disk content may be published into the document.
    Read,
    /// Remote document content may be written to disk.
    Write,
}

/// Permission characters granted by a single rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSet {
    pub read: bool,
    pub write: bool,
}

impl PermissionSet {
    pub fn parse(s: &str) -> Result<Self> {
        let mut set = Self::default();
        for ch in s.chars() {
            match ch {
                'r' => set.read = true,
                'w' => set.write = true,
                other => return Err(anyhow!("unknown permission character '{other}' in '{s}'")),
            }
        }
        if !set.read && !set.write {
            return Err(anyhow!("empty permission set"));
        }
        Ok(set)
    }

    pub fn grants(&self, perm: Permission) -> bool {
        match perm {
            Permission::Read => self.read,
            Permission::Write => self.write,
        }
    }
}

/// One parsed `"<glob> [<mapping>] <perms>"` declaration.
#[derive(Debug, Clone)]
pub struct FileRule {
    pub pattern: String,
    matcher: GlobMatcher,
    /// Optional content-mapping hint carried through for remote interfaces.
    pub mapping: Option<String>,
    pub perms: PermissionSet,
}

impl FileRule {
    pub fn parse(decl: &str) -> Result<Self> {
        let parts: Vec<&str> = decl.split_whitespace().collect();
        let (pattern, mapping, perms) = match parts.as_slice() {
            [pattern, perms] => (*pattern, None, *perms),
            [pattern, mapping, perms] => (*pattern, Some((*mapping).to_string()), *perms),
            _ => {
                return Err(anyhow!(
                    "expected '<glob> [<mapping>] <perms>', got '{decl}'"
                ))
            }
        };

        let matcher = Glob::new(pattern)
            .with_context(|| format!("invalid glob '{pattern}'"))?
            .compile_matcher();

        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
            mapping,
            perms: PermissionSet::parse(perms)
                .with_context(|| format!("invalid permissions in '{decl}'"))?,
        })
    }

    /// Read/write rule for one literal path. Built structurally so paths
    /// containing whitespace or glob metacharacters never round-trip through
    /// the declaration syntax.
    pub fn for_path(path: &str) -> Result<Self> {
        let matcher = Glob::new(&globset::escape(path))
            .with_context(|| format!("invalid file path '{path}'"))?
            .compile_matcher();
        Ok(Self {
            pattern: path.to_string(),
            matcher,
            mapping: None,
            perms: PermissionSet {
                read: true,
                write: true,
            },
        })
    }

    pub fn matches(&self, path: &str, perm: Permission) -> bool {
        self.matcher.is_match(path) && self.perms.grants(perm)
    }
}

/// Evaluate a rule set for one interface. Any matching rule grants the
/// permission; no rule can take it away.
pub fn allows(rules: &[FileRule], path: &str, perm: Permission) -> bool {
    rules.iter().any(|rule| rule.matches(path, perm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_glob_and_permissions() {
        let rule = FileRule::parse("*.yml rw").unwrap();
        assert_eq!(rule.pattern, "*.yml");
        assert!(rule.perms.read);
        assert!(rule.perms.write);
        assert!(rule.mapping.is_none());
    }

    #[test]
    fn parses_optional_mapping() {
        let rule = FileRule::parse("config/*.json settings w").unwrap();
        assert_eq!(rule.mapping.as_deref(), Some("settings"));
        assert!(!rule.perms.read);
        assert!(rule.perms.write);
    }

    #[test]
    fn literal_path_rules_survive_spaces_and_metacharacters() {
        let rule = FileRule::for_path("my notes.txt").unwrap();
        assert_eq!(rule.pattern, "my notes.txt");
        assert!(rule.mapping.is_none());
        assert!(rule.matches("my notes.txt", Permission::Read));
        assert!(rule.matches("my notes.txt", Permission::Write));
        assert!(!rule.matches("my", Permission::Read));

        // Metacharacters in the path are literal, not glob syntax.
        let rule = FileRule::for_path("a*b.txt").unwrap();
        assert!(rule.matches("a*b.txt", Permission::Read));
        assert!(!rule.matches("aXb.txt", Permission::Read));
    }

    #[test]
    fn rejects_unknown_permission_characters() {
        assert!(FileRule::parse("*.yml rx").is_err());
        assert!(PermissionSet::parse("").is_err());
    }

    #[test]
    fn rejects_malformed_declarations() {
        assert!(FileRule::parse("*.yml").is_err());
        assert!(FileRule::parse("a b c d").is_err());
    }

    #[test]
    fn read_only_rule_never_grants_write() {
        let rules = vec![FileRule::parse("*.yml r").unwrap()];
        assert!(allows(&rules, "api.yml", Permission::Read));
        assert!(!allows(&rules, "api.yml", Permission::Write));
    }

    #[test]
    fn unmatched_path_grants_nothing() {
        let rules = vec![FileRule::parse("*.yml rw").unwrap()];
        assert!(!allows(&rules, "notes.txt", Permission::Read));
        assert!(!allows(&rules, "notes.txt", Permission::Write));
    }

    #[test]
    fn multiple_rules_combine_with_or() {
        let rules = vec![
            FileRule::parse("*.yml r").unwrap(),
            FileRule::parse("*.yml w").unwrap(),
        ];
        assert!(allows(&rules, "api.yml", Permission::Read));
        assert!(allows(&rules, "api.yml", Permission::Write));
    }

    #[test]
    fn nested_paths_match_recursive_globs() {
        let rules = vec![FileRule::parse("docs/** r").unwrap()];
        assert!(allows(&rules, "docs/guide/intro.md", Permission::Read));
        assert!(!allows(&rules, "src/main.rs", Permission::Read));
    }
}

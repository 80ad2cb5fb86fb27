//! Skill catalog: the read-only policy table consulted by permission checks
//! and session start.

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Declared allow-list for one skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillPermissions {
    pub skill_id: String,
    pub allowed_tools: HashSet<String>,
}

/// Skill metadata lookup.
///
/// Implementations must be safe to share between sessions; every session of
/// every skill reads through the same catalog.
pub trait SkillCatalog: Send + Sync {
    /// Tool names the skill may use. Fails with `SkillNotFound` for unknown ids.
    fn get_allowed_tools(&self, skill_id: &str) -> Result<HashSet<String>, PolicyError>;

    /// Whether the skill must run in a forked context.
    fn is_fork_required(&self, skill_id: &str) -> Result<bool, PolicyError>;

    fn permissions(&self, skill_id: &str) -> Result<SkillPermissions, PolicyError> {
        Ok(SkillPermissions {
            skill_id: skill_id.to_string(),
            allowed_tools: self.get_allowed_tools(skill_id)?,
        })
    }
}

/// Context mode declared by a skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    #[default]
    Inline,
    Fork,
}

/// Catalog entry for one skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillPolicy {
    pub allowed_tools: HashSet<String>,
    pub context: ContextMode,
}

/// In-memory catalog, built programmatically or from a YAML file.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    skills: HashMap<String, SkillPolicy>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_skill<I, T>(mut self, skill_id: &str, allowed_tools: I, context: ContextMode) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.insert(skill_id, allowed_tools, context);
        self
    }

    /// Insert or replace a skill entry.
    pub fn insert<I, T>(&mut self, skill_id: &str, allowed_tools: I, context: ContextMode)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.skills.insert(
            skill_id.to_string(),
            SkillPolicy {
                allowed_tools: allowed_tools.into_iter().map(Into::into).collect(),
                context,
            },
        );
    }

    pub fn contains(&self, skill_id: &str) -> bool {
        self.skills.contains_key(skill_id)
    }

    pub fn skill_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.skills.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    fn lookup(&self, skill_id: &str) -> Result<&SkillPolicy, PolicyError> {
        self.skills
            .get(skill_id)
            .ok_or_else(|| PolicyError::SkillNotFound(skill_id.to_string()))
    }
}

impl SkillCatalog for StaticCatalog {
    fn get_allowed_tools(&self, skill_id: &str) -> Result<HashSet<String>, PolicyError> {
        Ok(self.lookup(skill_id)?.allowed_tools.clone())
    }

    fn is_fork_required(&self, skill_id: &str) -> Result<bool, PolicyError> {
        Ok(self.lookup(skill_id)?.context == ContextMode::Fork)
    }
}

/// Raw catalog file structure.
#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    skills: Vec<RawSkill>,
}

#[derive(Debug, Deserialize)]
struct RawSkill {
    id: String,
    #[serde(default)]
    allowed_tools: Option<AllowedTools>,
    #[serde(default)]
    context: ContextMode,
}

/// `allowed_tools` accepts a YAML list or a comma/space separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AllowedTools {
    List(Vec<String>),
    Delimited(String),
}

impl AllowedTools {
    fn into_set(self) -> HashSet<String> {
        let names: Vec<String> = match self {
            AllowedTools::List(list) => list,
            AllowedTools::Delimited(s) => s
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(str::to_string)
                .collect(),
        };
        names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Parse a catalog from YAML text.
pub fn parse_catalog(content: &str) -> Result<StaticCatalog, PolicyError> {
    if content.trim().is_empty() {
        return Err(PolicyError::Config("Catalog file is empty".to_string()));
    }

    let raw: RawCatalog = serde_yaml::from_str(content)
        .map_err(|e| PolicyError::Config(format!("Invalid YAML: {}", e)))?;

    let mut catalog = StaticCatalog::new();
    for skill in raw.skills {
        let id = skill.id.trim();
        if id.is_empty() {
            return Err(PolicyError::Config(
                "Catalog entry missing required field: id".to_string(),
            ));
        }
        if catalog.contains(id) {
            return Err(PolicyError::Config(format!("Duplicate skill id: {}", id)));
        }
        let tools = skill
            .allowed_tools
            .map(AllowedTools::into_set)
            .unwrap_or_default();
        catalog.insert(id, tools, skill.context);
    }

    Ok(catalog)
}

/// Load a catalog from a YAML file.
///
/// # Errors
/// Returns `PolicyError::Config` if the file is missing, empty or invalid,
/// or if an entry has an empty or duplicate id.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<StaticCatalog, PolicyError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PolicyError::Config(format!(
            "Catalog file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let catalog = parse_catalog(&content)?;
    tracing::debug!(
        "Loaded {} skills from catalog {}",
        catalog.len(),
        path.display()
    );
    Ok(catalog)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tools(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_static_catalog_lookup() {
        let catalog = StaticCatalog::new()
            .with_skill("code-review", ["Read", "Grep"], ContextMode::Fork)
            .with_skill("explaining-code", ["Read"], ContextMode::Inline);

        assert_eq!(
            catalog.get_allowed_tools("code-review").unwrap(),
            tools(&["Read", "Grep"])
        );
        assert!(catalog.is_fork_required("code-review").unwrap());
        assert!(!catalog.is_fork_required("explaining-code").unwrap());
        assert_eq!(catalog.skill_ids(), vec!["code-review", "explaining-code"]);
    }

    #[test]
    fn test_unknown_skill() {
        let catalog = StaticCatalog::new();
        assert!(matches!(
            catalog.get_allowed_tools("missing"),
            Err(PolicyError::SkillNotFound(id)) if id == "missing"
        ));
        assert!(matches!(
            catalog.is_fork_required("missing"),
            Err(PolicyError::SkillNotFound(_))
        ));
    }

    #[test]
    fn test_permissions_default_impl() {
        let catalog = StaticCatalog::new().with_skill("s", ["LS"], ContextMode::Inline);
        let perms = catalog.permissions("s").unwrap();
        assert_eq!(perms.skill_id, "s");
        assert_eq!(perms.allowed_tools, tools(&["LS"]));
    }

    #[test]
    fn test_parse_list_and_delimited_tools() {
        let yaml = "\
skills:
  - id: code-review
    allowed_tools: [Read, Grep, Glob, LS]
    context: fork
  - id: commas
    allowed_tools: \"Read, Write\"
  - id: spaces
    allowed_tools: Bash Read
  - id: bare
";
        let catalog = parse_catalog(yaml).unwrap();
        assert_eq!(catalog.len(), 4);
        assert_eq!(
            catalog.get_allowed_tools("code-review").unwrap(),
            tools(&["Read", "Grep", "Glob", "LS"])
        );
        assert!(catalog.is_fork_required("code-review").unwrap());
        assert_eq!(
            catalog.get_allowed_tools("commas").unwrap(),
            tools(&["Read", "Write"])
        );
        assert_eq!(
            catalog.get_allowed_tools("spaces").unwrap(),
            tools(&["Bash", "Read"])
        );
        assert!(catalog.get_allowed_tools("bare").unwrap().is_empty());
        assert!(!catalog.is_fork_required("bare").unwrap());
    }

    #[test]
    fn test_parse_rejects_duplicate_id() {
        let yaml = "skills:\n  - id: a\n  - id: a\n";
        let err = parse_catalog(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate skill id"));
    }

    #[test]
    fn test_parse_rejects_empty_id() {
        let yaml = "skills:\n  - id: \"  \"\n";
        assert!(matches!(parse_catalog(yaml), Err(PolicyError::Config(_))));
    }

    #[test]
    fn test_parse_rejects_unknown_context() {
        let yaml = "skills:\n  - id: a\n    context: sideways\n";
        assert!(matches!(parse_catalog(yaml), Err(PolicyError::Config(_))));
    }

    #[test]
    fn test_parse_invalid_yaml_is_config_error() {
        let err = parse_catalog("skills: [oops").unwrap_err();
        assert!(matches!(err, PolicyError::Config(ref msg) if msg.starts_with("Invalid YAML")));
    }

    #[test]
    fn test_parse_empty_content() {
        assert!(matches!(parse_catalog("   \n"), Err(PolicyError::Config(_))));
    }

    #[test]
    fn test_load_catalog_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.yaml");
        fs::write(
            &path,
            "skills:\n  - id: code-review\n    allowed_tools: [Read]\n    context: fork\n",
        )
        .unwrap();

        let catalog = load_catalog(&path).unwrap();
        assert!(catalog.is_fork_required("code-review").unwrap());
    }

    #[test]
    fn test_load_catalog_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_catalog(temp_dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("Catalog file not found"));
    }
}

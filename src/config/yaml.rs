//! YAML configuration parsing.
//!
//! Parses workspace settings and build files from YAML.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{BuildFile, RuleConfig, WorkspaceConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load workspace settings from a file.
    pub fn load_workspace_config(path: impl AsRef<Path>) -> Result<WorkspaceConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        Self::parse_workspace_config(&content).map_err(|err| with_path(err, path))
    }

    /// Parse workspace settings from a YAML string. An empty document yields
    /// the defaults.
    pub fn parse_workspace_config(yaml: &str) -> Result<WorkspaceConfig, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(WorkspaceConfig::default());
        }
        let config: WorkspaceConfig = serde_yaml::from_str(yaml)?;
        if config.max_concurrency == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    /// Load a build file.
    pub fn load_build_file(path: impl AsRef<Path>) -> Result<BuildFile, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        Self::parse_build_file(&content).map_err(|err| with_path(err, path))
    }

    /// Parse a build file from a YAML string.
    pub fn parse_build_file(yaml: &str) -> Result<BuildFile, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(BuildFile::default());
        }
        let file: BuildFile = serde_yaml::from_str(yaml)?;
        Self::validate_build_file(&file)?;
        Ok(file)
    }

    fn validate_build_file(file: &BuildFile) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for rule in &file.rules {
            let name = rule.name();
            if name.is_empty() {
                return Err(ConfigError::MissingField("name".into()));
            }
            if name.contains(':') || name.contains('/') {
                return Err(ConfigError::InvalidConfig(format!(
                    "rule name '{name}' must not contain ':' or '/'"
                )));
            }
            if !seen.insert(name) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate rule name: {name}"
                )));
            }
            if let RuleConfig::Process(process) = rule {
                if process.cmds.is_empty() {
                    return Err(ConfigError::MissingField(format!("{name}.cmds")));
                }
            }
        }
        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn with_path(err: ConfigError, path: &Path) -> ConfigError {
    match err {
        ConfigError::YamlError(source) => ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        },
        ConfigError::InvalidConfig(msg) => {
            ConfigError::InvalidConfig(format!("{}: {msg}", path.display()))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_empty_workspace_config() {
        let config = YamlLoader::parse_workspace_config("").unwrap();

        assert_eq!(config, WorkspaceConfig::default());
        assert_eq!(config.kill_timeout(), Duration::from_secs(2));
        assert_eq!(config.cache_dir, Path::new(".taskgraph"));
        assert!(config.concurrency_limit() >= 1);
    }

    #[test]
    fn test_parse_workspace_config_with_all_fields() {
        let yaml = r#"
kill_timeout_ms: 500
max_concurrency: 3
cache_dir: .cache/fingerprints
environment:
  CI: "true"
"#;

        let config = YamlLoader::parse_workspace_config(yaml).unwrap();

        assert_eq!(config.kill_timeout(), Duration::from_millis(500));
        assert_eq!(config.concurrency_limit(), 3);
        assert_eq!(config.cache_dir, Path::new(".cache/fingerprints"));
        assert_eq!(config.environment.get("CI"), Some("true"));
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let result = YamlLoader::parse_workspace_config("max_concurrency: 0\n");

        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_build_file_with_every_rule_type() {
        let yaml = r#"
rules:
  - type: filegroup
    name: sources
    srcs: ["src/**/*.c"]
  - type: task
    name: build
    srcs: ["src/**/*.c", "Makefile"]
    outs: ["bin/app"]
    deps: [":sources", "//lib:build"]
    cmds:
      - make
    environment:
      CC: clang
  - type: process
    name: serve
    deps: [":build"]
    cmds: ["./bin/app --port 8080"]
    ready: listening
"#;

        let file = YamlLoader::parse_build_file(yaml).unwrap();

        assert_eq!(file.rules.len(), 3);
        match &file.rules[1] {
            RuleConfig::Task(task) => {
                assert_eq!(task.name, "build");
                assert_eq!(task.srcs, vec!["src/**/*.c", "Makefile"]);
                assert_eq!(task.outs, vec!["bin/app"]);
                assert_eq!(task.deps, vec![":sources", "//lib:build"]);
                assert_eq!(task.cmds, vec!["make"]);
                assert_eq!(task.environment.get("CC"), Some("clang"));
            }
            other => panic!("expected task, got {:?}", other),
        }
        match &file.rules[2] {
            RuleConfig::Process(process) => {
                assert_eq!(process.ready, "listening");
                assert_eq!(process.deps, vec![":build"]);
            }
            other => panic!("expected process, got {:?}", other),
        }
        assert!(matches!(&file.rules[0], RuleConfig::Filegroup(g) if g.srcs.len() == 1));
        assert!(file.rules[0].deps().is_empty());
    }

    #[test]
    fn test_parse_empty_build_file() {
        assert!(YamlLoader::parse_build_file("").unwrap().rules.is_empty());
        assert!(YamlLoader::parse_build_file("rules: []\n").unwrap().rules.is_empty());
    }

    #[test]
    fn test_unknown_rule_type_is_yaml_error() {
        let yaml = "rules:\n  - type: macro\n    name: x\n";

        assert!(matches!(
            YamlLoader::parse_build_file(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_validation_error_duplicate_rule_name() {
        let yaml = r#"
rules:
  - type: task
    name: build
  - type: filegroup
    name: build
"#;

        let result = YamlLoader::parse_build_file(yaml);

        assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("build")));
    }

    #[test]
    fn test_validation_error_bad_rule_name() {
        let yaml = "rules:\n  - type: task\n    name: a:b\n";

        assert!(matches!(
            YamlLoader::parse_build_file(yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_error_process_without_commands() {
        let yaml = "rules:\n  - type: process\n    name: db\n    cmds: []\n";

        assert!(matches!(
            YamlLoader::parse_build_file(yaml),
            Err(ConfigError::MissingField(field)) if field == "db.cmds"
        ));
    }

    #[test]
    fn test_load_reports_path_on_yaml_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("BUILD.yaml");
        std::fs::write(&path, "rules: [unclosed\n").unwrap();

        let result = YamlLoader::load_build_file(&path);

        assert!(matches!(result, Err(ConfigError::YamlFileError { path: p, .. }) if p == path));
    }
}

//! Configuration file loading and validation.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::error::ConfigError;
use crate::types::{BaseSpec, ProjectConfig};

/// Name of the configuration file at the project root.
pub const CONFIG_FILE: &str = "weft.toml";

/// Loads and validates a `weft.toml` configuration from a project directory.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `weft.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and configuration values are consistent.
fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.is_empty() {
        return Err(ConfigError::MissingField("project.name".to_string()));
    }
    if config.project.version.is_empty() {
        return Err(ConfigError::MissingField("project.version".to_string()));
    }
    if config.upstream.repository.is_empty() {
        return Err(ConfigError::MissingField("upstream.repository".to_string()));
    }

    let mut output_dirs = BTreeSet::new();
    for (name, module) in &config.modules {
        if module.patch_dir.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "modules.{name}.patch_dir"
            )));
        }
        if module.output_dir.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "modules.{name}.output_dir"
            )));
        }
        if !output_dirs.insert(module.output_dir.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "output directory '{}' is bound to more than one module",
                module.output_dir
            )));
        }
        for dep in &module.depends_on {
            if !config.modules.contains_key(dep) {
                return Err(ConfigError::UnknownModule(dep.clone()));
            }
        }
        match &module.base {
            BaseSpec::Module(base) if !config.modules.contains_key(&base.module) => {
                return Err(ConfigError::UnknownModule(base.module.clone()));
            }
            BaseSpec::Decompiled(_) => {
                if config.artifact.is_none() {
                    return Err(ConfigError::MissingField("artifact".to_string()));
                }
                if config.tools.remapper.is_none() {
                    return Err(ConfigError::MissingField("tools.remapper".to_string()));
                }
                if config.tools.decompiler.is_none() {
                    return Err(ConfigError::MissingField("tools.decompiler".to_string()));
                }
            }
            _ => {}
        }
    }

    for outer in &output_dirs {
        for inner in &output_dirs {
            if outer != inner && Path::new(inner).starts_with(outer) {
                return Err(ConfigError::ValidationError(format!(
                    "output directory '{inner}' is nested inside output directory '{outer}'"
                )));
            }
        }
    }

    if let Some(artifact) = &config.artifact {
        validate_coordinates("artifact.binary", &artifact.binary, 2)?;
        validate_coordinates("artifact.mapping", &artifact.mapping, 2)?;
    }
    if let Some(api) = &config.bundle.api_coordinates {
        validate_coordinates("bundle.api_coordinates", api, 2)?;
    }
    for extra in &config.bundle.extra_coordinates {
        validate_coordinates("bundle.extra_coordinates", extra, 2)?;
    }
    if let Some(bootstrap) = &config.bundle.bootstrap {
        validate_coordinates("bundle.bootstrap", bootstrap, 3)?;
    }
    for name in &config.bundle.launcher_modules {
        if !config.modules.contains_key(name) {
            return Err(ConfigError::UnknownModule(name.clone()));
        }
    }
    if config.publish.is_some() && config.project.group.is_empty() {
        return Err(ConfigError::MissingField("project.group".to_string()));
    }

    check_acyclic(config)
}

/// Checks that `name` has exactly `parts` non-empty `:`-separated segments.
fn validate_coordinates(field: &str, value: &str, parts: usize) -> Result<(), ConfigError> {
    let segments: Vec<&str> = value.split(':').collect();
    if segments.len() != parts || segments.iter().any(|s| s.is_empty()) {
        let expected = if parts == 2 {
            "group:artifact"
        } else {
            "group:artifact:version"
        };
        return Err(ConfigError::ValidationError(format!(
            "{field} '{value}' is not of the form {expected}"
        )));
    }
    Ok(())
}

/// Rejects module dependency cycles, including those formed through module bases.
fn check_acyclic(config: &ProjectConfig) -> Result<(), ConfigError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut nodes = HashMap::new();
    for name in config.modules.keys() {
        nodes.insert(name.as_str(), graph.add_node(name.as_str()));
    }
    for (name, module) in &config.modules {
        let to = nodes[name.as_str()];
        let base_dep = match &module.base {
            BaseSpec::Module(base) => Some(base.module.as_str()),
            _ => None,
        };
        for dep in module.depends_on.iter().map(String::as_str).chain(base_dep) {
            graph.add_edge(nodes[dep], to, ());
        }
    }
    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| ConfigError::DependencyCycle(graph[cycle.node_id()].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[project]
name = "folia"
version = "1.20.4-R0.1-SNAPSHOT"

[upstream]
ref = "abc123"
repository = "work/Paper"
release = "1.20.4"
"#;

    #[test]
    fn parse_minimal_config() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.project.name, "folia");
        assert_eq!(config.upstream.reference.as_str(), "abc123");
        assert_eq!(config.upstream.release.as_str(), "1.20.4");
        assert!(config.modules.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[project]
name = "folia"
version = "1.20.4-R0.1-SNAPSHOT"
group = "dev.folia"

[upstream]
ref = "abc123"
repository = "work/Paper"
release = "1.20.4"

[artifact]
repository = "https://repo.example/maven-public/"
binary = "com.example:server"
mapping = "com.example:server-mappings"

[tools]
timeout_secs = 120
[tools.remapper]
program = "java"
args = ["-jar", "remapper.jar", "{input}", "{output}", "{mapping}"]
version = "0.10.1"
[tools.decompiler]
program = "java"
args = ["-jar", "decompiler.jar", "{input}", "{output}"]
version = "2.0.627.2"

[patches]
filter = true
max_offset = 3

[modules.api]
base = { upstream = "Paper-API" }
patch_dir = "patches/api"
output_dir = "Folia-API"

[modules.server]
base = { upstream = "Paper-Server" }
patch_dir = "patches/server"
output_dir = "Folia-Server"
depends_on = ["api"]

[modules.vanilla]
base = { decompiled = "" }
patch_dir = "patches/vanilla"
output_dir = "work/vanilla"

[modules.generated-api]
base = { upstream = "paper-api-generator/generated" }
patch_dir = "patches/generatedApi"
output_dir = "paper-api-generator/generated"
bare = true

[bundle]
api_coordinates = "dev.folia:folia-api"
extra_coordinates = ["io.papermc.paper:paper-mojangapi"]
library_repositories = ["https://repo.maven.apache.org/maven2/"]
bootstrap = "io.papermc:paperclip:3.0.3"
launcher_modules = ["server"]

[publish]
name = "snapshots"
repository = "https://repo.example/maven-snapshots/"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.modules.len(), 4);
        assert_eq!(config.modules["server"].depends_on, vec!["api"]);
        assert!(config.modules["generated-api"].bare);
        assert_eq!(config.tools.timeout_secs, 120);
        assert!(config.patches.filter);
        assert_eq!(config.patches.max_offset, 3);
        assert_eq!(config.publish.unwrap().name, "snapshots");
    }

    #[test]
    fn missing_name_errors() {
        let toml = MINIMAL.replace("name = \"folia\"", "name = \"\"");
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn unknown_top_level_key_errors() {
        let toml = format!("{MINIMAL}\n[paperweight]\nserverProject = \"x\"\n");
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn invalid_version_ref_errors() {
        let toml = MINIMAL.replace("ref = \"abc123\"", "ref = \"\"");
        assert!(matches!(
            load_config_from_str(&toml).unwrap_err(),
            ConfigError::ParseError(_)
        ));
    }

    #[test]
    fn unknown_dependency_errors() {
        let toml = format!(
            r#"{MINIMAL}
[modules.server]
base = {{ upstream = "Paper-Server" }}
patch_dir = "patches/server"
output_dir = "Folia-Server"
depends_on = ["api"]
"#
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModule(ref m) if m == "api"));
    }

    #[test]
    fn dependency_cycle_errors() {
        let toml = format!(
            r#"{MINIMAL}
[modules.a]
base = {{ module = "b" }}
patch_dir = "patches/a"
output_dir = "A"

[modules.b]
base = {{ upstream = "B" }}
patch_dir = "patches/b"
output_dir = "B"
depends_on = ["a"]
"#
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle(_)));
    }

    #[test]
    fn duplicate_output_dir_errors() {
        let toml = format!(
            r#"{MINIMAL}
[modules.a]
base = {{ upstream = "A" }}
patch_dir = "patches/a"
output_dir = "Out"

[modules.b]
base = {{ upstream = "B" }}
patch_dir = "patches/b"
output_dir = "Out"
"#
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn nested_output_dirs_error() {
        let toml = format!(
            r#"{MINIMAL}
[modules.a]
base = {{ upstream = "A" }}
patch_dir = "patches/a"
output_dir = "Out"

[modules.b]
base = {{ upstream = "B" }}
patch_dir = "patches/b"
output_dir = "Out/generated"
"#
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("nested"));
    }

    #[test]
    fn decompiled_base_requires_tools() {
        let toml = format!(
            r#"{MINIMAL}
[artifact]
repository = "repo"
binary = "com.example:server"
mapping = "com.example:mappings"

[modules.vanilla]
base = {{ decompiled = "" }}
patch_dir = "patches/vanilla"
output_dir = "vanilla"
"#
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "tools.remapper"));
    }

    #[test]
    fn malformed_coordinates_error() {
        let toml = format!(
            r#"{MINIMAL}
[bundle]
api_coordinates = "folia-api"
"#
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn publish_requires_group() {
        let toml = format!(
            r#"{MINIMAL}
[publish]
name = "snapshots"
repository = "repo"
"#
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "project.group"));
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), MINIMAL).unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.project.name, "folia");
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}

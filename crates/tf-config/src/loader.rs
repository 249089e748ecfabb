//! YAML loader with include and environment tags
//!
//! Supported tags:
//! - `!include path` - Replace the node with another file's content
//! - `!include_dir_merge_list dir` - Concatenate the lists of every
//!   YAML/JSON file in a directory, in file name order
//! - `!env_var NAME [default]` - Substitute an environment variable
//!
//! JSON files are read with the same parser.

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{ConfigError, ConfigResult};

const FILE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// YAML loader resolving custom tags relative to the including file
pub struct YamlLoader {
    /// Base directory for paths given without a including file
    config_dir: PathBuf,
    /// Files currently being loaded, outermost first
    include_stack: Vec<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            include_stack: Vec::new(),
        }
    }

    /// Load and process a file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }
        debug!(path = %path.display(), depth = self.include_stack.len(), "Loading file");

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_stack.push(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.pop();
        result
    }

    /// Load and process text as if read from `source_path`
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: source_path.to_path_buf(),
            source,
        })?;
        self.process_value(value, source_path)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    result.insert(k, self.process_value(v, source_path)?);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn process_tagged(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Processing tag");

        match tag.as_str() {
            "!include" => {
                let path = self.tag_path(&tagged.value, source_path)?;
                self.load_file(path)
            }
            "!include_dir_merge_list" => {
                let dir = self.tag_path(&tagged.value, source_path)?;
                self.merge_dir_lists(&dir)
            }
            "!env_var" => env_var(&tagged.value),
            _ => {
                // Unknown tags are kept with their content processed
                let value = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    fn merge_dir_lists(&mut self, dir: &Path) -> ConfigResult<Value> {
        debug!(dir = %dir.display(), "Merging directory lists");
        let mut merged = Vec::new();
        for file in config_files(dir)? {
            match self.load_file(&file)? {
                Value::Sequence(items) => merged.extend(items),
                Value::Null => {}
                other => merged.push(other),
            }
        }
        Ok(Value::Sequence(merged))
    }

    /// Path named by a tag, relative to the file containing the tag
    fn tag_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(raw) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{:?}", value),
                reason: "path must be a string".to_string(),
            });
        };
        let raw = Path::new(raw.trim());
        if raw.is_absolute() {
            return Ok(raw.to_path_buf());
        }
        let base = source_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(self.config_dir.as_path());
        Ok(base.join(raw))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

/// `NAME` or `NAME default`
fn env_var(value: &Value) -> ConfigResult<Value> {
    let Value::String(raw) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let default = parts.next().map(str::trim);

    match (std::env::var(name), default) {
        (Ok(value), _) => {
            debug!(var = name, "Substituted env var");
            Ok(Value::String(value))
        }
        (Err(_), Some(default)) => Ok(serde_yaml::from_str(default)
            .unwrap_or_else(|_| Value::String(default.to_string()))),
        (Err(_), None) => Err(ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// Configuration files in a directory, sorted by name
fn config_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ConfigError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadFile {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| FILE_EXTENSIONS.contains(&ext))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Load a file with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value.get(key).unwrap()
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "rules/inner.yaml", "actionCd: 500\n");
        write_file(dir.path(), "rules/outer.yaml", "defaults: !include inner.yaml\n");
        write_file(dir.path(), "config.yaml", "nested: !include rules/outer.yaml\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        let defaults = get(get(&value, "nested"), "defaults");
        assert_eq!(get(defaults, "actionCd").as_u64(), Some(500));
    }

    #[test]
    fn test_include_json_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "sub.json", r#"{"id": 7, "apps": []}"#);
        write_file(dir.path(), "config.yaml", "subscription: !include sub.json\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(get(get(&value, "subscription"), "id").as_i64(), Some(7));
    }

    #[test]
    fn test_include_dir_merge_list() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "adhoc/b.yaml", "- selector: Button[text='B']\n");
        write_file(
            dir.path(),
            "adhoc/a.yaml",
            "- selector: Button[text='A1']\n- selector: Button[text='A2']\n",
        );
        write_file(dir.path(), "adhoc/notes.txt", "ignored");
        write_file(dir.path(), "config.yaml", "adhoc: !include_dir_merge_list adhoc\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        let seq = get(&value, "adhoc").as_sequence().unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(get(&seq[0], "selector").as_str(), Some("Button[text='A1']"));
        assert_eq!(get(&seq[2], "selector").as_str(), Some("Button[text='B']"));
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "config.yaml", "adhoc: !include_dir_merge_list nope\n");
        let result = load_yaml(dir.path(), "config.yaml");
        assert!(matches!(result, Err(ConfigError::DirectoryNotFound { .. })));
    }

    #[test]
    fn test_env_var_with_default() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("TF_CONFIG_TEST_LEVEL", "trace");
        write_file(
            dir.path(),
            "config.yaml",
            "level: !env_var TF_CONFIG_TEST_LEVEL\ncapacity: !env_var TF_CONFIG_TEST_UNSET 64\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(get(&value, "level").as_str(), Some("trace"));
        assert_eq!(get(&value, "capacity").as_u64(), Some(64));
        std::env::remove_var("TF_CONFIG_TEST_LEVEL");
    }

    #[test]
    fn test_env_var_missing() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "config.yaml", "x: !env_var TF_CONFIG_TEST_MISSING\n");
        let result = load_yaml(dir.path(), "config.yaml");
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound { .. })));
    }

    #[test]
    fn test_circular_include_detection() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_same_file_included_twice_is_not_circular() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "shared.yaml", "value: 1\n");
        write_file(
            dir.path(),
            "config.yaml",
            "first: !include shared.yaml\nsecond: !include shared.yaml\n",
        );
        assert!(load_yaml(dir.path(), "config.yaml").is_ok());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "config.yaml", "key: [unclosed\n");
        let err = load_yaml(dir.path(), "config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }
}

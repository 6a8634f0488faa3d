use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::errors::EvalError;
use crate::model::{default_min_score, Profile, Scenario};
use crate::scoring::Rubric;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default, rename = "configVersion", alias = "version")]
    pub version: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub rubric: Rubric,
    pub scenarios: Vec<Scenario>,
    pub profiles: Vec<Profile>,
}

impl EvalConfig {
    /// Empty filter selects everything; an unknown id is an error rather
    /// than a silent skip.
    pub fn select_scenarios(&self, ids: &[String]) -> Result<Vec<Scenario>, EvalError> {
        if ids.is_empty() {
            return Ok(self.scenarios.clone());
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let s = self
                .scenarios
                .iter()
                .find(|s| &s.id == id)
                .ok_or_else(|| EvalError::UnknownScenario(id.clone()))?;
            out.push(s.clone());
        }
        Ok(out)
    }

    pub fn select_profiles(&self, names: &[String]) -> Result<Vec<Profile>, EvalError> {
        if names.is_empty() {
            return Ok(self.profiles.clone());
        }
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let p = self
                .profiles
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| EvalError::UnknownProfile(name.clone()))?;
            out.push(p.clone());
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            workers: default_workers(),
            call_delay_ms: default_call_delay_ms(),
            repetitions: default_repetitions(),
            timeout_seconds: None,
            min_score: default_min_score(),
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_call_delay_ms() -> u64 {
    1000
}

fn default_repetitions() -> u32 {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct ConfigError(pub String);

pub fn load_config(path: &Path, strict: bool) -> Result<EvalConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;

    let mut ignored_keys = std::collections::HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(&raw);

    // serde_ignored wrapper to capture unknown fields
    let cfg: EvalConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    if !ignored_keys.is_empty() {
        // Whitelist common YAML anchor keys
        let meaningful_unknowns: Vec<_> = ignored_keys
            .iter()
            .filter(|k| *k != "definitions" && !k.starts_with('_') && !k.starts_with("x-"))
            .collect();

        if !meaningful_unknowns.is_empty() {
            if strict {
                return Err(ConfigError(format!(
                    "Unknown fields detected in strict mode: {:?} (file: {})",
                    meaningful_unknowns,
                    path.display()
                )));
            }
            tracing::warn!(file = %path.display(), keys = ?meaningful_unknowns, "ignored unknown config fields");
        }
    }

    if cfg.version != 0 && cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: 0, {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    if cfg.scenarios.is_empty() {
        return Err(ConfigError("config has no scenarios".into()));
    }
    if cfg.profiles.is_empty() {
        return Err(ConfigError("config has no profiles".into()));
    }

    Ok(cfg)
}

/// Caller-owned config cache keyed on file mtime. Reloading is an explicit
/// call, never a hidden side effect of reading.
#[derive(Debug)]
pub struct ConfigCache {
    pub path: PathBuf,
    mtime: Option<SystemTime>,
    value: EvalConfig,
}

impl ConfigCache {
    pub fn load(path: &Path, strict: bool) -> Result<Self, ConfigError> {
        let value = load_config(path, strict)?;
        Ok(ConfigCache {
            path: path.to_path_buf(),
            mtime: file_mtime(path),
            value,
        })
    }

    pub fn get(&self) -> &EvalConfig {
        &self.value
    }

    /// Re-reads the file only when its mtime moved. Returns whether a
    /// reload happened.
    pub fn reload_if_stale(&mut self, strict: bool) -> Result<bool, ConfigError> {
        let current = file_mtime(&self.path);
        if current == self.mtime {
            return Ok(false);
        }
        self.value = load_config(&self.path, strict)?;
        self.mtime = current;
        Ok(true)
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(
        path,
        r#"version: 1
description: "recognition pilot"
settings:
  workers: 4
  call_delay_ms: 1000
  repetitions: 2
  min_score: 70.0
scenarios:
  - id: stuck_on_recursion
    name: "Learner stuck on recursion base case"
    context: "The learner has rewritten the same recursive function three times and it still overflows the stack."
    expected_behavior: "Probe what the learner believes the base case does before offering a fix."
    required_content: ["base case"]
    forbidden_content: ["just copy"]
    follow_up_turns:
      - learner_action: "The learner says the base case looks right to them and asks why it matters."
  - id: premature_abstraction
    name: "Learner reaches for abstraction too early"
    context: "The learner wants to build a plugin system before the second feature exists."
    min_score: 60.0
profiles:
  - name: control
    provider: openai
    model: gpt-4o-mini
  - name: recog_multi
    provider: openai
    model: gpt-4o-mini
    recognition: true
    multi_agent_tutor: true
"#,
    )
    .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn sample_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.yaml");
        write_sample_config(&path).unwrap();
        let cfg = load_config(&path, true).unwrap();
        assert_eq!(cfg.scenarios.len(), 2);
        assert_eq!(cfg.profiles.len(), 2);
        assert_eq!(cfg.settings.repetitions, 2);
        assert!(cfg.profiles[1].recognition);
        assert_eq!(cfg.scenarios[0].follow_up_turns.len(), 1);
    }

    #[test]
    fn strict_mode_rejects_unknown_keys() {
        let (_dir, path) = write_temp(
            r#"version: 1
banana: true
scenarios:
  - id: s1
    name: S1
    context: ctx
profiles:
  - name: p1
    provider: fake
    model: m
"#,
        );
        let err = load_config(&path, true).unwrap_err();
        assert!(err.0.contains("banana"));
        // non-strict only warns
        assert!(load_config(&path, false).is_ok());
    }

    #[test]
    fn empty_scenarios_rejected() {
        let (_dir, path) = write_temp(
            r#"version: 1
scenarios: []
profiles:
  - name: p1
    provider: fake
    model: m
"#,
        );
        assert!(load_config(&path, false).is_err());
    }

    #[test]
    fn selection_errors_on_unknown_ids() {
        let (_dir, path) = write_temp(
            r#"version: 1
scenarios:
  - id: s1
    name: S1
    context: ctx
profiles:
  - name: p1
    provider: fake
    model: m
"#,
        );
        let cfg = load_config(&path, false).unwrap();
        assert_eq!(cfg.select_scenarios(&[]).unwrap().len(), 1);
        assert!(matches!(
            cfg.select_scenarios(&["nope".into()]),
            Err(EvalError::UnknownScenario(_))
        ));
        assert!(matches!(
            cfg.select_profiles(&["ghost".into()]),
            Err(EvalError::UnknownProfile(_))
        ));
    }

    #[test]
    fn cache_reloads_only_on_mtime_change() {
        let (_dir, path) = write_temp(
            r#"version: 1
scenarios:
  - id: s1
    name: S1
    context: ctx
profiles:
  - name: p1
    provider: fake
    model: m
"#,
        );
        let mut cache = ConfigCache::load(&path, false).unwrap();
        assert!(!cache.reload_if_stale(false).unwrap());

        let raw = std::fs::read_to_string(&path).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, raw.replace("S1", "S1 renamed")).unwrap();

        assert!(cache.reload_if_stale(false).unwrap());
        assert_eq!(cache.get().scenarios[0].name, "S1 renamed");
    }
}

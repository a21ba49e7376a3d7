// Local configuration store: default values for command line invocations,
// persisted obscured under the user's home directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::obscure;

pub type Settings = BTreeMap<String, String>;

/// Value that deletes a key when passed to `configure`.
pub const CLEAR: &str = "clear";

/// Keys that may be stored as defaults.
pub const CONTEXT_KEYS: [&str; 3] = ["user_token", "instance_description", "debug"];

/// Render settings as `key: value` lines.
pub fn serialize(settings: &Settings) -> String {
    settings
        .iter()
        .map(|(key, value)| format!("{}: {}\n", key, value))
        .collect()
}

/// Parse `key: value` lines. Only the first `": "` separates, so values may
/// contain it. Lines without a separator are skipped.
pub fn parse(text: &str) -> Settings {
    text.lines()
        .filter_map(|line| line.split_once(": "))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Apply command line updates to stored settings.
pub fn merge_updates(config: &mut Settings, updates: &Settings) {
    for (key, value) in updates {
        if value == CLEAR {
            config.remove(key);
        } else if !value.is_empty() {
            config.insert(key.clone(), value.clone());
        }
    }
}

/// Fill keys missing (or empty) on the command line from stored settings.
pub fn fill_defaults(arguments: &mut Settings, config: &Settings) {
    for (key, value) in config {
        let entry = arguments.entry(key.clone()).or_default();
        if entry.is_empty() {
            *entry = value.clone();
        }
    }
}

#[derive(Debug)]
pub enum SaveOutcome {
    Saved,
    Unchanged,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    /// `~/.classinet/configure`, or relative to the working directory when
    /// no home directory is known.
    pub fn default_location() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        ConfigStore::new(home.join(".classinet").join("configure"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings; empty when the file is missing or unreadable.
    pub fn load(&self) -> Settings {
        let cipher = match fs::read_to_string(&self.path) {
            Ok(cipher) => cipher,
            Err(e) => {
                log::debug!("No configuration at {}: {}", self.path.display(), e);
                return Settings::new();
            }
        };
        match obscure::decode(&cipher) {
            Some(plain) => parse(&plain),
            None => {
                log::warn!(
                    "Ignoring corrupt configuration file {}",
                    self.path.display()
                );
                Settings::new()
            }
        }
    }

    /// Best-effort write; failures are returned for the caller to report.
    pub fn save(&self, settings: &Settings) -> SaveOutcome {
        let cipher = obscure::encode(&serialize(settings));
        let written = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::write(&self.path, cipher));
        match written {
            Ok(()) => {
                log::debug!("Saved configuration to {}", self.path.display());
                SaveOutcome::Saved
            }
            Err(e) => {
                log::warn!(
                    "Unable to save config file at {}: {}",
                    self.path.display(),
                    e
                );
                SaveOutcome::Failed(e.to_string())
            }
        }
    }

    /// Merge `updates` into the stored settings. Nothing is read or written
    /// when there are no updates.
    pub fn configure(&self, updates: &Settings) -> SaveOutcome {
        if updates.is_empty() {
            return SaveOutcome::Unchanged;
        }
        let mut config = self.load();
        merge_updates(&mut config, updates);
        self.save(&config)
    }

    /// Fill unset context keys of `arguments` from the stored settings.
    pub fn fill_defaults(&self, arguments: &mut Settings) {
        let mut stored = self.load();
        stored.retain(|key, _| CONTEXT_KEYS.contains(&key.as_str()));
        fill_defaults(arguments, &stored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_keeps_separator_inside_value() {
        let parsed = parse("instance_description: lab: bench 3\nuser_token: abc\n");
        assert_eq!(parsed["instance_description"], "lab: bench 3");
        assert_eq!(parsed["user_token"], "abc");
    }

    #[test]
    fn parse_skips_lines_without_separator() {
        let parsed = parse("garbage\nuser_token: abc\n\n");
        assert_eq!(parsed, settings(&[("user_token", "abc")]));
    }

    #[test]
    fn serialized_settings_parse_back() {
        let original = settings(&[("debug", "stats=yes"), ("user_token", "abc")]);
        assert_eq!(serialize(&original), "debug: stats=yes\nuser_token: abc\n");
        assert_eq!(parse(&serialize(&original)), original);
    }

    #[test]
    fn clear_removes_and_empty_keeps() {
        let mut config = settings(&[("user_token", "abc"), ("debug", "stats=yes")]);
        merge_updates(
            &mut config,
            &settings(&[("user_token", "clear"), ("debug", ""), ("instance_description", "lab")]),
        );
        assert_eq!(
            config,
            settings(&[("debug", "stats=yes"), ("instance_description", "lab")])
        );
    }

    #[test]
    fn defaults_only_fill_unset_keys() {
        let mut arguments = settings(&[("user_token", ""), ("model", "m1"), ("debug", "api=sync")]);
        fill_defaults(
            &mut arguments,
            &settings(&[("user_token", "stored"), ("debug", "stats=yes")]),
        );
        assert_eq!(arguments["user_token"], "stored");
        assert_eq!(arguments["debug"], "api=sync");
        assert_eq!(arguments["model"], "m1");
    }

    #[test]
    fn store_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("configure"));
        assert!(store.load().is_empty());

        let outcome = store.configure(&settings(&[("user_token", "abc")]));
        assert!(matches!(outcome, SaveOutcome::Saved));
        assert_eq!(store.load(), settings(&[("user_token", "abc")]));

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("abc"));
    }

    #[test]
    fn empty_update_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("configure"));
        assert!(matches!(store.configure(&Settings::new()), SaveOutcome::Unchanged));
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("configure"));
        fs::write(store.path(), "%%% not obscured %%%").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn save_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let store = ConfigStore::new(blocker.join("configure"));
        assert!(matches!(
            store.save(&settings(&[("user_token", "abc")])),
            SaveOutcome::Failed(_)
        ));
    }
}

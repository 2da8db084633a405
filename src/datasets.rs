//! Auxiliary dataset files under `<base_path>/dataset`.
//!
//! Most datasets are handed to jobs as paths and opened by the job itself on
//! every run. The YouTube to BiliBili mapping is the exception: it is loaded
//! once here and a missing or broken file stops startup.

use crate::orchestrator::OrchestratorError;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const BILI_OTHER_FILE: &str = "_bilidata_other.json";
pub const YT_OTHER_FILE: &str = "_ytdata_other.json";
pub const YTBILI_MAPPING_FILE: &str = "_ytbili_mapping.json";
const BILI_DATASET_PATTERN: &str = r"^_bili.*\.json$";

/// YouTube channel id to BiliBili room mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YtBiliMapping {
    entries: BTreeMap<String, JsonValue>,
}

impl YtBiliMapping {
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        let entries: BTreeMap<String, JsonValue> = serde_json::from_str(content)?;
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("Failed to read mapping file {:?}: {}", path, e))
        })?;
        Self::parse(&content).map_err(|e| {
            OrchestratorError::config(format!("Failed to parse mapping file {:?}: {}", path, e))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, channel_id: &str) -> Option<&JsonValue> {
        self.entries.get(channel_id)
    }

    /// BiliBili room id for a YouTube channel. Accepts a bare number or string,
    /// or an object carrying `room_id`.
    pub fn room_id(&self, channel_id: &str) -> Option<String> {
        let value = self.entries.get(channel_id)?;
        let room = match value {
            JsonValue::Object(obj) => obj.get("room_id")?,
            other => other,
        };
        match room {
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Dataset paths and the pre-loaded mapping, as passed to the jobs.
#[derive(Debug, Clone)]
pub struct Datasets {
    pub dir: PathBuf,
    /// Extra BiliBili creators for the "others" upcoming job.
    pub bili_other: PathBuf,
    /// Every `_bili*.json` file, sorted, for the channel stats job.
    pub bili_all: Vec<PathBuf>,
    /// Extra YouTube channels for the feed job.
    pub yt_other: PathBuf,
    pub ytbili_mapping: Arc<YtBiliMapping>,
}

impl Datasets {
    pub fn discover(dir: &Path) -> Result<Self, OrchestratorError> {
        info!("Looking for datasets in {:?}", dir);

        let bili_other = dir.join(BILI_OTHER_FILE);
        let yt_other = dir.join(YT_OTHER_FILE);
        for path in [&bili_other, &yt_other] {
            if !path.is_file() {
                warn!("Dataset {:?} not found, jobs using it will fail", path);
            }
        }

        let bili_all = find_matching(dir, BILI_DATASET_PATTERN)?;
        debug!("Found {} BiliBili datasets: {:?}", bili_all.len(), bili_all);

        let ytbili_mapping = YtBiliMapping::load(&dir.join(YTBILI_MAPPING_FILE))?;
        info!("Loaded {} YouTube to BiliBili mappings", ytbili_mapping.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            bili_other,
            bili_all,
            yt_other,
            ytbili_mapping: Arc::new(ytbili_mapping),
        })
    }
}

/// Files directly inside `dir` whose name matches `pattern`, sorted.
fn find_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, OrchestratorError> {
    let regex = Regex::new(pattern)
        .map_err(|e| OrchestratorError::config(format!("Invalid dataset pattern: {}", e)))?;
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable dataset entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| regex.is_match(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_discover() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write(dir, "_bilidata_hololive.json", "[]");
        write(dir, "_bilidata_other.json", "[]");
        write(dir, "_bili_extra.json", "[]");
        write(dir, "_ytdata_other.json", "[]");
        write(dir, "bili_no_underscore.json", "[]");
        write(dir, "_bilidata_notes.txt", "");
        write(dir, YTBILI_MAPPING_FILE, r#"{"UC1": 21267062, "UC2": "8899503"}"#);
        std::fs::create_dir(dir.join("_bili_dir.json")).unwrap();

        let datasets = Datasets::discover(dir).unwrap();

        let names: Vec<_> = datasets
            .bili_all
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "_bili_extra.json",
                "_bilidata_hololive.json",
                "_bilidata_other.json"
            ]
        );
        assert_eq!(datasets.bili_other, dir.join("_bilidata_other.json"));
        assert_eq!(datasets.yt_other, dir.join("_ytdata_other.json"));
        assert_eq!(datasets.ytbili_mapping.len(), 2);
    }

    #[test]
    fn test_missing_mapping_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "_bilidata_other.json", "[]");

        let err = Datasets::discover(temp_dir.path()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
        assert!(err.to_string().contains(YTBILI_MAPPING_FILE));
    }

    #[test]
    fn test_unparsable_mapping_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), YTBILI_MAPPING_FILE, "[1, 2, 3]");

        assert!(matches!(
            Datasets::discover(temp_dir.path()),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[test]
    fn test_missing_plain_datasets_are_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), YTBILI_MAPPING_FILE, "{}");

        let datasets = Datasets::discover(temp_dir.path()).unwrap();
        assert!(datasets.bili_all.is_empty());
        assert!(datasets.ytbili_mapping.is_empty());
    }

    #[test]
    fn test_room_id_shapes() {
        let mapping = YtBiliMapping::parse(
            r#"{
                "UCnum": 21267062,
                "UCstr": "8899503",
                "UCobj": {"room_id": 14917277, "name": "someone"},
                "UCnull": null
            }"#,
        )
        .unwrap();

        assert_eq!(mapping.room_id("UCnum").as_deref(), Some("21267062"));
        assert_eq!(mapping.room_id("UCstr").as_deref(), Some("8899503"));
        assert_eq!(mapping.room_id("UCobj").as_deref(), Some("14917277"));
        assert_eq!(mapping.room_id("UCnull"), None);
        assert_eq!(mapping.room_id("UCmissing"), None);
        assert_eq!(mapping.channel_ids().count(), 4);
    }
}

//! Pod info → metadata record normalization
//!
//! The orchestrator watch (or the bounded cache in front of it) describes
//! producers as pods. Only the scheduler facts the broker attaches are kept:
//!
//! | attribute | source |
//! |-----------|--------|
//! | `host`    | node the pod is scheduled on |
//! | `plugin`  | last path segment of the container image |
//! | `job`     | label `sagecontinuum.org/plugin-job`, default `sage` |
//! | `task`    | label `sagecontinuum.org/plugin-task`, required |

use datashare_core::record::{HOST, JOB, PLUGIN, TASK};
use datashare_core::{MetadataRecord, Uid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Label naming the scheduler job
pub const PLUGIN_JOB_LABEL: &str = "sagecontinuum.org/plugin-job";
/// Label naming the plugin task
pub const PLUGIN_TASK_LABEL: &str = "sagecontinuum.org/plugin-task";
/// Job assumed when the label is absent
pub const DEFAULT_JOB: &str = "sage";

/// Pod description as published by the watch / cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    /// Pod uid, the producer identifier
    pub uid: String,
    /// Pod name, for logs
    #[serde(default)]
    pub name: String,
    /// Pod labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Container image, e.g. `registry.local/waggle/plugin-iio:0.4.1`
    pub image: String,
    /// Node the pod is scheduled on; absent until scheduled
    #[serde(default, alias = "node_name")]
    pub host: Option<String>,
}

/// Why a pod could not become a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Pod uid is empty
    #[error("pod {0:?} has no uid")]
    MissingUid(String),
    /// Pod not scheduled yet; a later event will carry the host
    #[error("pod {0:?} not scheduled")]
    Unscheduled(String),
    /// Pod has no task label
    #[error("pod {0:?} missing task label")]
    MissingTask(String),
}

impl PodInfo {
    /// Normalize into a metadata record
    pub fn into_record(self) -> Result<MetadataRecord, RecordError> {
        let uid = Uid::new(&self.uid).ok_or_else(|| RecordError::MissingUid(self.name.clone()))?;
        let host = match self.host {
            Some(host) if !host.is_empty() => host,
            _ => return Err(RecordError::Unscheduled(self.name)),
        };
        let task = self
            .labels
            .get(PLUGIN_TASK_LABEL)
            .cloned()
            .ok_or_else(|| RecordError::MissingTask(self.name.clone()))?;
        let job = self
            .labels
            .get(PLUGIN_JOB_LABEL)
            .cloned()
            .unwrap_or_else(|| DEFAULT_JOB.to_string());
        let plugin = self.image.rsplit('/').next().unwrap_or(&self.image).to_string();

        Ok(MetadataRecord::new(uid)
            .with(HOST, host)
            .with(PLUGIN, plugin)
            .with(JOB, job)
            .with(TASK, task))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pod() -> PodInfo {
        let mut labels = BTreeMap::new();
        labels.insert(PLUGIN_TASK_LABEL.to_string(), "iio-nx".to_string());
        PodInfo {
            uid: "7d2f-11".to_string(),
            name: "iio-nx-8m2pq".to_string(),
            labels,
            image: "registry.local:5000/waggle/plugin-iio:0.4.1".to_string(),
            host: Some("000048b02d15bc7c.ws-nxcore".to_string()),
        }
    }

    #[test]
    fn test_pod_normalized() {
        let record = pod().into_record().unwrap();
        assert_eq!(record.uid.as_str(), "7d2f-11");
        assert_eq!(record.get(HOST), Some("000048b02d15bc7c.ws-nxcore"));
        assert_eq!(record.get(PLUGIN), Some("plugin-iio:0.4.1"));
        assert_eq!(record.get(JOB), Some(DEFAULT_JOB));
        assert_eq!(record.get(TASK), Some("iio-nx"));
    }

    #[test]
    fn test_job_label_used() {
        let mut pod = pod();
        pod.labels
            .insert(PLUGIN_JOB_LABEL.to_string(), "weather-study".to_string());
        assert_eq!(pod.into_record().unwrap().get(JOB), Some("weather-study"));
    }

    #[test]
    fn test_unscheduled_pod_skipped() {
        let mut pod = pod();
        pod.host = None;
        assert!(matches!(pod.into_record(), Err(RecordError::Unscheduled(_))));
    }

    #[test]
    fn test_missing_task_rejected() {
        let mut pod = pod();
        pod.labels.clear();
        assert_eq!(
            pod.into_record(),
            Err(RecordError::MissingTask("iio-nx-8m2pq".to_string()))
        );
    }

    #[test]
    fn test_bare_image_name() {
        let mut pod = pod();
        pod.image = "simple:0.1.0".to_string();
        assert_eq!(pod.into_record().unwrap().get(PLUGIN), Some("simple:0.1.0"));
    }

    #[test]
    fn test_deserialize_watch_shape() {
        let pod: PodInfo = serde_json::from_str(
            r#"{"uid":"u1","name":"p","image":"simple:0.1.0","node_name":"rpi",
                "labels":{"sagecontinuum.org/plugin-task":"t"}}"#,
        )
        .unwrap();
        assert_eq!(pod.host.as_deref(), Some("rpi"));
    }
}

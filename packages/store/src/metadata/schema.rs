//! 元数据 schema 升级
//!
//! 文档先以 `serde_json::Value` 读入，按版本顺序补齐缺失字段后再反序列化。
//! 每次加载都会对所有条目执行全部步骤，所以升级是幂等的。

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cuotiben_algo::{DEFAULT_ANSWER_TIME_LIMIT, DEFAULT_TRAINING_INTERVAL};
use serde_json::{json, Map, Value};

use crate::models::DEFAULT_TAG;
use crate::{StoreError, StoreResult};

/// 当前元数据 schema 版本
pub const CURRENT_SCHEMA_VERSION: &str = "1.2";

type Backfill = fn(&str, &mut Map<String, Value>, DateTime<Utc>) -> bool;

/// 升级步骤
pub struct SchemaStep {
    /// 该步骤完成后的版本
    pub version: &'static str,
    pub name: &'static str,
    backfill: Backfill,
}

/// 按版本排序的升级步骤
pub fn schema_steps() -> Vec<SchemaStep> {
    vec![
        SchemaStep {
            version: "1.0",
            name: "基础文件字段",
            backfill: backfill_file_fields,
        },
        SchemaStep {
            version: "1.1",
            name: "复习调度字段",
            backfill: backfill_training_fields,
        },
        SchemaStep {
            version: "1.2",
            name: "配对、类型与限时字段",
            backfill: backfill_pairing_fields,
        },
    ]
}

/// Outcome of upgrading one document.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub from_version: String,
    pub changed: bool,
    /// Entries dropped because they lack a usable `relativePath`.
    pub dropped: Vec<String>,
}

/// 升级整个文档，返回是否有改动
pub fn upgrade_document(doc: &mut Value, now: DateTime<Utc>) -> StoreResult<UpgradeReport> {
    let root = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::Validation("metadata document is not an object".into()))?;

    let from_version = root
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("1.0")
        .to_string();
    let mut report = UpgradeReport {
        from_version: from_version.clone(),
        ..Default::default()
    };

    let files = root.entry("files").or_insert_with(|| {
        report.changed = true;
        json!({})
    });
    let files = files
        .as_object_mut()
        .ok_or_else(|| StoreError::Validation("metadata `files` is not an object".into()))?;

    files.retain(|id, entry| {
        let usable = entry
            .get("relativePath")
            .and_then(Value::as_str)
            .is_some_and(|p| !p.is_empty());
        if !usable {
            tracing::warn!(id = %id, "dropping metadata entry without relativePath");
            report.dropped.push(id.clone());
        }
        usable
    });
    if !report.dropped.is_empty() {
        report.changed = true;
    }

    let steps = schema_steps();
    for (id, entry) in files.iter_mut() {
        let Some(item) = entry.as_object_mut() else {
            continue;
        };
        for step in &steps {
            if (step.backfill)(id, item, now) {
                report.changed = true;
            }
        }
    }

    if from_version != CURRENT_SCHEMA_VERSION {
        tracing::info!(from = %from_version, to = CURRENT_SCHEMA_VERSION, "metadata schema upgraded");
        root.insert("version".into(), json!(CURRENT_SCHEMA_VERSION));
        report.changed = true;
    }

    Ok(report)
}

fn iso(date: DateTime<Utc>) -> Value {
    json!(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn insert_missing(item: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) -> bool {
    match item.get(key) {
        Some(existing) if !existing.is_null() => false,
        _ => {
            item.insert(key.to_string(), value());
            true
        }
    }
}

fn backfill_file_fields(id: &str, item: &mut Map<String, Value>, now: DateTime<Utc>) -> bool {
    let mut changed = insert_missing(item, "id", || json!(id));
    changed |= insert_missing(item, "uploadDate", || iso(now));

    let upload_date = item.get("uploadDate").cloned().unwrap_or_else(|| iso(now));
    let file_name = item
        .get("relativePath")
        .and_then(Value::as_str)
        .and_then(|p| p.rsplit(['/', '\\']).next())
        .unwrap_or_default()
        .to_string();

    changed |= insert_missing(item, "originalFileName", || json!(file_name));
    changed |= insert_missing(item, "originalDate", || upload_date.clone());
    changed |= insert_missing(item, "lastModified", || upload_date.clone());
    changed |= insert_missing(item, "fileSize", || json!(0));
    changed
}

fn backfill_training_fields(_id: &str, item: &mut Map<String, Value>, now: DateTime<Utc>) -> bool {
    let upload_date = item.get("uploadDate").cloned().unwrap_or_else(|| iso(now));
    let next = now + Duration::days(DEFAULT_TRAINING_INTERVAL as i64);

    let mut changed = insert_missing(item, "proficiency", || json!(0));
    changed |= insert_missing(item, "trainingInterval", || json!(DEFAULT_TRAINING_INTERVAL));
    changed |= insert_missing(item, "lastTrainingDate", || upload_date);
    changed |= insert_missing(item, "nextTrainingDate", || iso(next));
    changed |= insert_missing(item, "subject", || json!(""));
    changed |= insert_missing(item, "tags", || json!([DEFAULT_TAG]));
    changed
}

fn backfill_pairing_fields(_id: &str, item: &mut Map<String, Value>, _now: DateTime<Utc>) -> bool {
    let mut changed = insert_missing(item, "trainingRecords", || json!([]));
    changed |= insert_missing(item, "type", || json!("mistake"));
    changed |= insert_missing(item, "answerTimeLimit", || json!(DEFAULT_ANSWER_TIME_LIMIT));
    changed |= insert_missing(item, "isFrozen", || json!(false));

    if !item.contains_key("pairId") {
        item.insert("pairId".into(), Value::Null);
        changed = true;
    }
    let paired = item.get("pairId").is_some_and(|p| !p.is_null());
    if item.get("isPaired").and_then(Value::as_bool) != Some(paired) {
        item.insert("isPaired".into(), json!(paired));
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap()
    }

    fn legacy_doc() -> Value {
        json!({
            "version": "1.0",
            "baseDir": "/old/place",
            "files": {
                "a": {
                    "id": "a",
                    "relativePath": "photos/q1.png",
                    "uploadDate": "2024-01-05T10:00:00.000Z",
                    "fileSize": 10,
                    "hash": "h1"
                },
                "broken": { "id": "broken" }
            }
        })
    }

    #[test]
    fn test_upgrade_from_1_0_backfills_fields() {
        let mut doc = legacy_doc();
        let report = upgrade_document(&mut doc, now()).unwrap();

        assert!(report.changed);
        assert_eq!(report.from_version, "1.0");
        assert_eq!(report.dropped, vec!["broken".to_string()]);
        assert_eq!(doc["version"], CURRENT_SCHEMA_VERSION);

        let item = &doc["files"]["a"];
        assert_eq!(item["proficiency"], 0);
        assert_eq!(item["trainingInterval"], 1);
        assert_eq!(item["lastTrainingDate"], "2024-01-05T10:00:00.000Z");
        assert_eq!(item["nextTrainingDate"], "2024-04-03T09:00:00.000Z");
        assert_eq!(item["tags"], json!([DEFAULT_TAG]));
        assert_eq!(item["originalFileName"], "q1.png");
        assert_eq!(item["type"], "mistake");
        assert_eq!(item["answerTimeLimit"], 300);
        assert_eq!(item["isPaired"], false);
        assert!(item["pairId"].is_null());
    }

    #[test]
    fn test_upgrade_is_idempotent() {
        let mut doc = legacy_doc();
        upgrade_document(&mut doc, now()).unwrap();
        let snapshot = doc.clone();

        let report = upgrade_document(&mut doc, now() + Duration::days(30)).unwrap();
        assert!(!report.changed);
        assert_eq!(doc, snapshot);
    }

    #[test]
    fn test_existing_values_are_kept_and_pairing_fixed() {
        let mut doc = json!({
            "version": CURRENT_SCHEMA_VERSION,
            "baseDir": "/x",
            "files": {
                "a": {
                    "relativePath": "a.png",
                    "proficiency": 40,
                    "pairId": "p1",
                    "isPaired": false,
                    "tags": ["geometry"]
                }
            }
        });
        let report = upgrade_document(&mut doc, now()).unwrap();
        assert!(report.changed);
        let item = &doc["files"]["a"];
        assert_eq!(item["proficiency"], 40);
        assert_eq!(item["tags"], json!(["geometry"]));
        assert_eq!(item["isPaired"], true);
        assert_eq!(item["id"], "a");
    }

    #[test]
    fn test_non_object_document_is_rejected() {
        let mut doc = json!([1, 2, 3]);
        assert!(upgrade_document(&mut doc, now()).is_err());
    }
}

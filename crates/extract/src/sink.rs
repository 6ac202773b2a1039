use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{ExtractError, Result};
use crate::schema::Entity;

pub const DEFAULT_RESULT_LOG: &str = "output/llm_extracted_results.jsonl";

/// Append-only JSON-lines log of every extraction result, one entity per line.
pub struct ResultSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one result as a single block of lines. Appends from this sink never interleave.
    pub async fn append(&self, entities: &[Entity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let mut block = String::new();
        for entity in entities {
            let line = serde_json::to_string(entity).map_err(std::io::Error::other)?;
            block.push_str(&line);
            block.push('\n');
        }

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(block.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read the whole log back. A missing log reads as empty.
    pub async fn read_entities(&self) -> Result<Vec<Entity>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| {
                    ExtractError::Persistence(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("line {} of {}: {e}", i + 1, self.path.display()),
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entity(name: &str, label: &str) -> Entity {
        Entity {
            name: name.into(),
            category: "个人设备信息/可变更的唯一设备识别码".into(),
            label: label.into(),
            purpose: "展示适配的信息样式".into(),
            situation: "浏览、点击、搜索时".into(),
            subject: "用户".into(),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ResultSink::new(dir.path().join("output/results.jsonl"));
        let entities = vec![entity("Android ID", "L3"), entity("手机号码", "L4")];

        sink.append(&entities).await.unwrap();

        let raw = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        for (line, expected) in raw.lines().zip(&entities) {
            let parsed: Entity = serde_json::from_str(line).unwrap();
            assert_eq!(&parsed, expected);
        }
        assert_eq!(sink.read_entities().await.unwrap(), entities);
    }

    #[tokio::test]
    async fn test_appends_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ResultSink::new(dir.path().join("log.jsonl"));

        sink.append(&[entity("a", "L1")]).await.unwrap();
        sink.append(&[]).await.unwrap();
        sink.append(&[entity("b", "L2"), entity("c", "L3")]).await.unwrap();

        let names: Vec<String> = sink.read_entities().await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(ResultSink::new(dir.path().join("log.jsonl")));

        let mut handles = Vec::new();
        for i in 0..16 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let batch: Vec<Entity> = (0..20).map(|j| entity(&format!("{i}-{j}"), "L2")).collect();
                sink.append(&batch).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entities = sink.read_entities().await.unwrap();
        assert_eq!(entities.len(), 16 * 20);
        // Each batch is contiguous.
        for block in entities.chunks(20) {
            let prefix = block[0].name.split('-').next().unwrap();
            assert!(block.iter().all(|e| e.name.starts_with(&format!("{prefix}-"))));
        }
    }

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ResultSink::new(dir.path().join("absent.jsonl"));
        assert!(sink.read_entities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_path_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let sink = ResultSink::new(blocker.join("log.jsonl"));

        let err = sink.append(&[entity("a", "L1")]).await.unwrap_err();
        assert!(matches!(err, ExtractError::Persistence(_)));
    }
}

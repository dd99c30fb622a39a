use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::counters::{Counters, Snapshot};
use crate::error::PersistError;

/// 落盘的累计记录，键为序列化后的 `EventKey`
///
/// 用 `String` 作键，文件里无法解析的历史键也能原样保留。
pub type PersistedRecord = BTreeMap<String, Counters>;

/// 一次落盘的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// 本次快照中写入的键数
    pub written: usize,
    /// 落盘后文件中的键总数
    pub total: usize,
}

// 调用方与后台落盘任务之间的提交凭据。
// 改动目标文件（rename 覆盖或移走损坏文件）必须持有这把锁并确认未被取消；
// 超时一方持锁置 `cancelled`，此后后台任务不会再改动目标文件。
#[derive(Debug, Default)]
struct Ticket {
    cancelled: bool,
    committed: Option<FlushReport>,
}

/// JSON 文件持久化
///
/// 每次 flush 读取整个文件，用快照覆盖同名键，写入独立的临时文件后
/// rename 整体替换。所有文件操作在阻塞线程池中执行，并由 `writer` 串行化。
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取已落盘的记录
    ///
    /// 文件不存在或为空视为空记录。内容损坏时把原文件改名为
    /// `<path>.corrupt-<unix时间戳>` 后按空记录继续；改名失败则返回错误，
    /// 避免下一次写入覆盖掉损坏的数据。
    pub async fn load(&self) -> Result<PersistedRecord, PersistError> {
        let path = self.path.clone();
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let _writer = writer.lock();
            let ticket = Mutex::new(Ticket::default());
            Ok::<_, PersistError>(read_record(&path, &ticket)?.unwrap_or_default())
        })
        .await?
    }

    /// 把快照合并进文件：快照中的键覆盖旧值，其余键保持不变
    pub async fn flush(&self, snapshot: &Snapshot) -> Result<FlushReport, PersistError> {
        let ticket = Arc::new(Mutex::new(Ticket::default()));
        self.spawn_flush(snapshot, ticket)
            .await??
            .ok_or(PersistError::Cancelled)
    }

    /// 带时限的 flush
    ///
    /// 返回 `PersistError::Timeout` 时保证目标文件不会再被这次 flush 改动；
    /// 超时与提交恰好同时发生时以提交为准，返回 `Ok`。
    pub async fn flush_within(
        &self,
        snapshot: &Snapshot,
        limit: Duration,
    ) -> Result<FlushReport, PersistError> {
        let ticket = Arc::new(Mutex::new(Ticket::default()));
        let job = self.spawn_flush(snapshot, ticket.clone());

        match tokio::time::timeout(limit, job).await {
            Ok(joined) => joined??.ok_or(PersistError::Timeout(limit)),
            Err(_) => {
                // 后台任务正在提交时这里会短暂等待 rename 完成
                let mut ticket = ticket.lock();
                match ticket.committed {
                    Some(report) => Ok(report),
                    None => {
                        ticket.cancelled = true;
                        Err(PersistError::Timeout(limit))
                    }
                }
            }
        }
    }

    fn spawn_flush(
        &self,
        snapshot: &Snapshot,
        ticket: Arc<Mutex<Ticket>>,
    ) -> tokio::task::JoinHandle<Result<Option<FlushReport>, PersistError>> {
        let updates: Vec<(String, Counters)> = snapshot
            .iter()
            .map(|(key, counters)| (key.to_string(), *counters))
            .collect();
        let path = self.path.clone();
        let writer = self.writer.clone();

        tokio::task::spawn_blocking(move || {
            let _writer = writer.lock();
            flush_blocking(&path, updates, &ticket)
        })
    }

    #[cfg(test)]
    pub(crate) fn hold_writer(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.writer.lock()
    }
}

// 返回 `None` 表示已被取消，目标文件未改动
fn flush_blocking(
    path: &Path,
    updates: Vec<(String, Counters)>,
    ticket: &Mutex<Ticket>,
) -> Result<Option<FlushReport>, PersistError> {
    let started = Instant::now();
    // 排队等待 writer 期间可能已经超时
    if ticket.lock().cancelled {
        return Ok(None);
    }

    let Some(mut record) = read_record(path, ticket)? else {
        return Ok(None);
    };
    let written = updates.len();
    record.extend(updates);
    let bytes = serde_json::to_vec(&record)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".store-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;

    let mut ticket = ticket.lock();
    if ticket.cancelled {
        // tmp 在这里被删除
        return Ok(None);
    }
    tmp.persist(path).map_err(|e| PersistError::Io(e.error))?;

    let report = FlushReport {
        written,
        total: record.len(),
    };
    ticket.committed = Some(report);

    tracing::debug!(
        path = %path.display(),
        written = report.written,
        total = report.total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "store flushed"
    );
    Ok(Some(report))
}

fn read_record(
    path: &Path,
    ticket: &Mutex<Ticket>,
) -> Result<Option<PersistedRecord>, PersistError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Some(PersistedRecord::new())),
        Err(e) => return Err(e.into()),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Some(PersistedRecord::new()));
    }

    match serde_json::from_slice(&bytes) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            let ticket = ticket.lock();
            if ticket.cancelled {
                return Ok(None);
            }
            let quarantine = sibling(path, &format!(".corrupt-{}", chrono::Utc::now().timestamp()));
            tracing::warn!(
                path = %path.display(),
                quarantine = %quarantine.display(),
                "store file is malformed, moving it aside: {}",
                e
            );
            fs::rename(path, &quarantine)?;
            Ok(Some(PersistedRecord::new()))
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.to_path_buf().into_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{AggregateStore, Content, EventKey};
    use chrono::{TimeZone, Utc};

    fn sports_key() -> EventKey {
        EventKey::new(
            Content::Sports,
            &Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn flush_writes_expected_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"").unwrap();

        let store = AggregateStore::new();
        let key = sports_key();
        for _ in 0..3 {
            store.record_view(&key);
        }
        store.record_click(&key);

        let gateway = JsonFileStore::new(&path);
        let report = gateway.flush(&store.snapshot()).await.unwrap();
        assert_eq!(report, FlushReport { written: 1, total: 1 });

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, r#"{"sports:2024-01-01 10:00":{"view":3,"click":1}}"#);
    }

    #[tokio::test]
    async fn flush_keeps_keys_missing_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(
            &path,
            r#"{"business:2023-06-01 09:30":{"view":7,"click":2},"sports:2024-01-01 10:00":{"view":1,"click":0},"legacy-key":{"view":1,"click":1}}"#,
        )
        .unwrap();

        let store = AggregateStore::new();
        let key = sports_key();
        store.record_view(&key);
        store.record_view(&key);

        let gateway = JsonFileStore::new(&path);
        let report = gateway.flush(&store.snapshot()).await.unwrap();
        assert_eq!(report.total, 3);

        let record = gateway.load().await.unwrap();
        assert_eq!(record["business:2023-06-01 09:30"], Counters { view: 7, click: 2 });
        // 覆盖而不是累加
        assert_eq!(record["sports:2024-01-01 10:00"], Counters { view: 2, click: 0 });
        assert_eq!(record["legacy-key"], Counters { view: 1, click: 1 });
    }

    #[tokio::test]
    async fn repeated_flush_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = AggregateStore::new();
        store.record_view(&sports_key());
        let snapshot = store.snapshot();

        let gateway = JsonFileStore::new(&path);
        gateway.flush(&snapshot).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        gateway.flush(&snapshot).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[tokio::test]
    async fn malformed_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = AggregateStore::new();
        store.record_view(&sports_key());

        let gateway = JsonFileStore::new(&path);
        let report = gateway.flush(&store.snapshot()).await.unwrap();
        assert_eq!(report.total, 1);

        let quarantined: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("store.json.corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(std::fs::read(quarantined[0].path()).unwrap(), b"{not json");
    }

    #[tokio::test]
    async fn missing_file_and_directory_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let gateway = JsonFileStore::new(&path);

        assert!(gateway.load().await.unwrap().is_empty());
        gateway.flush(&Snapshot::new()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        // 临时文件已被 rename，不留残余
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("store.json")]);
    }

    #[tokio::test]
    async fn directory_in_place_of_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::create_dir(&path).unwrap();

        let store = AggregateStore::new();
        store.record_view(&sports_key());

        let gateway = JsonFileStore::new(&path);
        assert!(matches!(gateway.load().await, Err(PersistError::Io(_))));
        assert!(matches!(
            gateway.flush(&store.snapshot()).await,
            Err(PersistError::Io(_))
        ));
        // 不当作损坏文件移走
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn timed_out_flush_never_touches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{}").unwrap();

        let store = AggregateStore::new();
        store.record_view(&sports_key());
        let gateway = JsonFileStore::new(&path);

        // 写锁被占用时 flush 必然超时
        let held = gateway.hold_writer();
        let result = gateway
            .flush_within(&store.snapshot(), Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(PersistError::Timeout(_))));
        drop(held);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn short_deadlines_either_commit_or_leave_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{}").unwrap();

        let store = AggregateStore::new();
        let gateway = JsonFileStore::new(&path);
        let key = sports_key();

        for millis in 0..5 {
            store.record_view(&key);
            let before = std::fs::read(&path).unwrap();
            let result = gateway
                .flush_within(&store.snapshot(), Duration::from_millis(millis))
                .await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            let after = std::fs::read(&path).unwrap();

            match result {
                Ok(_) => {
                    let record: PersistedRecord = serde_json::from_slice(&after).unwrap();
                    assert_eq!(record[&key.to_string()], store.get(&key).unwrap());
                }
                Err(PersistError::Timeout(_)) => assert_eq!(after, before),
                Err(e) => panic!("unexpected flush error: {}", e),
            }
        }
    }
}

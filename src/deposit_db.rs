use alloy::primitives::TxHash;
use async_trait::async_trait;
use colored::*;
use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};
use slog::{Logger, debug, info};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    error::StorageError,
    helpers::datetime::{self, Timezone},
    macros::push_field,
};

/// Persisted fact of one observed deposit, keyed by transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRecord {
    pub hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub fee: String,
    pub pubkey: String,
}

#[async_trait]
pub trait DepositStore: Send + Sync {
    async fn connect(&self) -> Result<(), StorageError>;

    /// Upsert by `record.hash`, last write wins
    async fn save(&self, record: &DepositRecord) -> Result<(), StorageError>;

    async fn get(&self, hash: &str) -> Result<Option<DepositRecord>, StorageError>;

    async fn get_all(&self) -> Result<Vec<DepositRecord>, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// Single JSON file store, the file maps `hash -> DepositRecord`
pub struct DepositDb {
    path: PathBuf,
    store: Arc<Mutex<Option<jfs::Store>>>,
    log: Logger,
}

impl DepositDb {
    /// jfs single file mode always writes `<path>.json`, so the extension is
    /// replaced here to keep `path()` pointing at the real file
    pub fn new(path: PathBuf, log: &Logger) -> Self {
        DepositDb {
            path: path.with_extension("json"),
            store: Arc::new(Mutex::new(None)),
            log: log.clone(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.store.lock().is_some()
    }

    // jfs rewrites the whole file on every save, run it on the blocking
    // pool. The lock serializes read-modify-write cycles on the file.
    async fn with_store<T, F>(&self, op: &'static str, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&jfs::Store) -> std::io::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let guard = store.lock();
            let store = guard.as_ref().ok_or(StorageError::NotConnected)?;
            f(store).map_err(|source| StorageError::Io { op, source })
        })
        .await
        .map_err(|e| StorageError::Io {
            op,
            source: std::io::Error::other(e),
        })?
    }
}

#[async_trait]
impl DepositStore for DepositDb {
    async fn connect(&self) -> Result<(), StorageError> {
        let mut guard = self.store.lock();
        if guard.is_some() {
            return Ok(());
        }

        let open_err = |source| StorageError::Open {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(open_err)?;
        }

        let mut cfg = jfs::Config::default();
        cfg.single = true;
        cfg.pretty = true;
        *guard = Some(jfs::Store::new_with_cfg(&self.path, cfg).map_err(open_err)?);
        info!(self.log, "Database connected successfully"; "path" => %self.path.display());
        Ok(())
    }

    async fn save(&self, record: &DepositRecord) -> Result<(), StorageError> {
        let owned = record.clone();
        self.with_store("save", move |store| {
            store.save_with_id(&owned, owned.hash.as_str()).map(|_| ())
        })
        .await?;
        debug!(self.log, "Deposit written"; "hash" => &record.hash);
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<Option<DepositRecord>, StorageError> {
        let hash = hash.to_string();
        self.with_store("get", move |store| match store.get::<DepositRecord>(&hash) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<DepositRecord>, StorageError> {
        self.with_store("get_all", |store| {
            Ok(store
                .all::<DepositRecord>()?
                .into_values()
                .collect::<Vec<_>>())
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        match self.store.lock().take() {
            Some(_) => {
                info!(self.log, "Database connection closed");
                Ok(())
            }
            None => Err(StorageError::NotConnected),
        }
    }
}

/// Records are keyed by the lowercase `0x` hash, normalize user input to it
pub fn record_key(hash: &str) -> Option<String> {
    hash.trim().parse::<TxHash>().ok().map(|h| h.to_string())
}

pub fn sprintf_record(record: &DepositRecord, align: Option<usize>) -> String {
    let align = align.unwrap_or(18);
    let mut pretty = String::default();
    push_field!(pretty, align, "block_number", record.block_number, green);
    push_field!(
        pretty,
        align,
        "block_time",
        datetime::from_unix(record.block_timestamp)
            .to_localtime()
            .to_formatted_string(),
        white
    );
    push_field!(pretty, align, "pubkey", record.pubkey, blue);
    push_field!(pretty, align, "fee", format!("{} eth", record.fee), yellow);
    pretty
}

pub fn print_entry(record: &DepositRecord, idx: Option<usize>) {
    let align = 18;
    let mut pretty = match idx {
        Some(idx) => format!(
            "{:<3} {}",
            format!("{}.", idx).green().bold(),
            record.hash.red(),
        ),
        None => format!(
            "    {:align$}{}",
            "tx_hash:".white().bold(),
            record.hash.red(),
        ),
    };
    pretty.push_str(sprintf_record(record, Some(align)).as_str());
    println!("{pretty}");
}

/// Print all deposits ordered by inclusion
pub fn print(mut records: Vec<DepositRecord>) {
    records.sort_by(|a, b| {
        a.block_number
            .cmp(&b.block_number)
            .then_with(|| a.hash.cmp(&b.hash))
    });
    records
        .iter()
        .enumerate()
        .for_each(|(i, record)| print_entry(record, Some(i + 1)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::discard_logger;
    use std::collections::HashSet;

    fn record(hash: &str, block_number: u64, fee: &str) -> DepositRecord {
        DepositRecord {
            hash: hash.to_string(),
            block_number,
            block_timestamp: 1_700_000_000 + block_number * 12,
            fee: fee.to_string(),
            pubkey: format!("0x{}", "ab".repeat(48)),
        }
    }

    fn open_db(dir: &tempfile::TempDir) -> DepositDb {
        DepositDb::new(dir.path().join("db").join("deposits.json"), &discard_logger())
    }

    #[tokio::test]
    async fn upsert_keeps_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.connect().await.unwrap();

        db.save(&record("0x01", 10, "0.001")).await.unwrap();
        db.save(&record("0x01", 11, "0.002")).await.unwrap();

        let all = db.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].block_number, 11);
        assert_eq!(all[0].fee, "0.002");
    }

    #[tokio::test]
    async fn get_all_returns_saved_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.connect().await.unwrap();
        db.save(&record("0xh1", 1, "0.1")).await.unwrap();
        db.save(&record("0xh2", 2, "0.2")).await.unwrap();

        let hashes: HashSet<String> = db
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.hash)
            .collect();
        assert_eq!(hashes, HashSet::from(["0xh1".to_string(), "0xh2".to_string()]));

        assert_eq!(db.get("0xh2").await.unwrap(), Some(record("0xh2", 2, "0.2")));
        assert_eq!(db.get("0xh3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn records_survive_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.connect().await.unwrap();
        db.save(&record("0x01", 1, "0.1")).await.unwrap();
        db.close().await.unwrap();

        let reopened = open_db(&dir);
        reopened.connect().await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), vec![record("0x01", 1, "0.1")]);

        // Stored layout uses the camelCase column names
        let raw = std::fs::read_to_string(reopened.path()).unwrap();
        assert!(raw.contains("\"blockNumber\""));
        assert!(raw.contains("\"blockTimestamp\""));
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        assert!(matches!(
            db.save(&record("0x01", 1, "0.1")).await,
            Err(StorageError::NotConnected)
        ));
        assert!(matches!(db.get("0x01").await, Err(StorageError::NotConnected)));
        assert!(matches!(db.close().await, Err(StorageError::NotConnected)));

        db.connect().await.unwrap();
        // Second connect is a no-op
        db.connect().await.unwrap();
        assert!(db.is_connected());
        db.close().await.unwrap();
        assert!(matches!(db.get_all().await, Err(StorageError::NotConnected)));
    }

    #[tokio::test]
    async fn path_points_at_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = DepositDb::new(dir.path().join("deposits.db"), &discard_logger());
        assert_eq!(db.path(), &dir.path().join("deposits.json"));

        db.connect().await.unwrap();
        db.save(&record("0x01", 1, "0.1")).await.unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from("deposits.json")]);
        assert!(std::fs::read_to_string(db.path()).unwrap().contains("\"0x01\""));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.connect().await.unwrap();

        let records: Vec<_> = (0..16u64)
            .map(|i| record(&format!("0x{:02x}", i), i, "0.1"))
            .collect();
        let results = futures::future::join_all(records.iter().map(|r| db.save(r))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(db.get_all().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn connect_fails_on_unusable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let db = DepositDb::new(blocker.join("deposits.json"), &discard_logger());
        assert!(matches!(db.connect().await, Err(StorageError::Open { .. })));
        assert!(!db.is_connected());
    }

    #[test]
    fn record_key_is_lowercase_hash() {
        let stored = format!("0x{}", "ab".repeat(32));
        assert_eq!(record_key(&stored.to_uppercase().replacen("0X", "0x", 1)), Some(stored.clone()));
        assert_eq!(record_key(&format!(" {} ", "AB".repeat(32))), Some(stored));
        assert_eq!(record_key("0x1234"), None);
        assert_eq!(record_key("not a hash"), None);
    }

    #[test]
    fn record_printer() {
        colored::control::set_override(false);
        let pretty = sprintf_record(&record("0x01", 5, "0.00063"), None);
        assert!(pretty.contains("block_number:"));
        assert!(pretty.contains("0.00063 eth"));
    }
}

use alloy::{
    primitives::{Address, B256, Bytes, TxHash},
    rpc::types::Log,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use futures::{StreamExt, channel::mpsc, future};
use parking_lot::Mutex;
use slog::{Drain, KV, Level, Never, OwnedKVList, Record};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    chain::{BlockInfo, ChainGateway, DepositEvent, LogStream, Receipt, ReceiptLog, TxInfo},
    deposit_db::{DepositRecord, DepositStore},
    error::{DeliveryError, ProviderError, StorageError},
    telegram::Notifier,
};

pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

pub fn deposit_event(pubkey_byte: u8, amount_gwei: u64, index: u64) -> DepositEvent {
    DepositEvent {
        pubkey: Bytes::from(vec![pubkey_byte; 48]),
        withdrawal_credentials: Bytes::from(vec![0x01; 32]),
        amount: Bytes::from(amount_gwei.to_le_bytes().to_vec()),
        signature: Bytes::from(vec![0x02; 96]),
        index: Bytes::from(index.to_le_bytes().to_vec()),
    }
}

pub struct MockGateway {
    pub latest: u64,
    blocks: Mutex<HashMap<u64, BlockInfo>>,
    transactions: Mutex<HashMap<TxHash, TxInfo>>,
    receipts: Mutex<HashMap<TxHash, Receipt>>,
    sender: mpsc::UnboundedSender<Log>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Log>>>,
    pub receipt_calls: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded();
        MockGateway {
            latest: 1_000,
            blocks: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
            receipt_calls: AtomicUsize::new(0),
        }
    }
}

impl MockGateway {
    pub fn deposit_log(address: Address, hash: TxHash, block_number: u64, event: &DepositEvent) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address,
                data: event.encode_log_data(),
            },
            block_number: Some(block_number),
            transaction_hash: Some(hash),
            log_index: Some(0),
            ..Default::default()
        }
    }

    pub fn add_block(&self, number: u64, timestamp: u64) {
        self.blocks.lock().insert(number, BlockInfo { number, timestamp });
    }

    pub fn add_transaction(&self, hash: TxHash, gas_price: u128, gas_limit: u64) {
        self.transactions.lock().insert(
            hash,
            TxInfo {
                gas_price,
                gas_limit,
            },
        );
    }

    pub fn add_receipt(&self, hash: TxHash, addresses: &[Address]) {
        let logs = addresses
            .iter()
            .map(|address| ReceiptLog { address: *address })
            .collect();
        self.receipts.lock().insert(hash, Receipt { logs });
    }

    /// Block, transaction and single-log receipt for one deposit
    pub fn add_deposit_tx(&self, contract: Address, hash: TxHash, block_number: u64) {
        self.add_block(block_number, 1_700_000_000 + block_number);
        self.add_transaction(hash, 2, 21000);
        self.add_receipt(hash, &[contract]);
    }

    pub fn emit(&self, log: Log) {
        let _ = self.sender.unbounded_send(log);
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    async fn latest_block_number(&self) -> Result<u64, ProviderError> {
        Ok(self.latest)
    }

    async fn block(&self, number: u64) -> Result<BlockInfo, ProviderError> {
        self.blocks
            .lock()
            .get(&number)
            .copied()
            .ok_or_else(|| ProviderError::NotFound {
                what: "block",
                id: number.to_string(),
            })
    }

    async fn transaction(&self, hash: TxHash) -> Result<TxInfo, ProviderError> {
        self.transactions
            .lock()
            .get(&hash)
            .copied()
            .ok_or_else(|| ProviderError::NotFound {
                what: "transaction",
                id: hash.to_string(),
            })
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ProviderError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().get(&hash).cloned())
    }

    async fn watch_events(&self, address: Address, topic0: B256) -> Result<LogStream, ProviderError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| ProviderError::rpc("eth_newFilter", "already watching"))?;
        Ok(receiver
            .filter(move |log| {
                future::ready(
                    log.inner.address == address && log.inner.data.topics().first() == Some(&topic0),
                )
            })
            .boxed())
    }
}

/// Store double that can be told to fail saves for one hash, or to refuse
/// connecting altogether
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, DepositRecord>>,
    connected: Mutex<bool>,
    pub fail_connect: bool,
    pub fail_save_for: Option<String>,
    pub close_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn failing_save(hash: &str) -> Self {
        MemoryStore {
            fail_save_for: Some(hash.to_string()),
            ..Default::default()
        }
    }

    pub fn failing_connect() -> Self {
        MemoryStore {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn records(&self) -> Vec<DepositRecord> {
        self.records.lock().values().cloned().collect()
    }

    fn check_connected(&self) -> Result<(), StorageError> {
        match *self.connected.lock() {
            true => Ok(()),
            false => Err(StorageError::NotConnected),
        }
    }
}

#[async_trait]
impl DepositStore for MemoryStore {
    async fn connect(&self) -> Result<(), StorageError> {
        if self.fail_connect {
            return Err(StorageError::Io {
                op: "connect",
                source: std::io::Error::other("disk unavailable"),
            });
        }
        *self.connected.lock() = true;
        Ok(())
    }

    async fn save(&self, record: &DepositRecord) -> Result<(), StorageError> {
        self.check_connected()?;
        if self.fail_save_for.as_deref() == Some(record.hash.as_str()) {
            return Err(StorageError::Io {
                op: "save",
                source: std::io::Error::other("disk full"),
            });
        }
        self.records.lock().insert(record.hash.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<Option<DepositRecord>, StorageError> {
        self.check_connected()?;
        Ok(self.records.lock().get(hash).cloned())
    }

    async fn get_all(&self) -> Result<Vec<DepositRecord>, StorageError> {
        self.check_connected()?;
        Ok(self.records())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// Notifier double recording every attempted message
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        RecordingNotifier {
            fail: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<(), DeliveryError> {
        self.messages.lock().push(message.to_string());
        match self.fail {
            true => Err(DeliveryError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            }),
            false => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRecord {
    pub level: Level,
    pub msg: String,
    pub kv: Vec<(String, String)>,
}

impl CapturedRecord {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.kv
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct KvCollector(Vec<(String, String)>);

impl slog::Serializer for KvCollector {
    fn emit_arguments(&mut self, key: slog::Key, val: &fmt::Arguments) -> slog::Result {
        self.0.push((key.to_string(), val.to_string()));
        Ok(())
    }
}

/// Drain keeping every record so tests can assert on log output
#[derive(Clone, Default)]
pub struct LogCapture {
    records: Arc<std::sync::Mutex<Vec<CapturedRecord>>>,
}

impl LogCapture {
    pub fn logger(&self) -> slog::Logger {
        slog::Logger::root(self.clone(), slog::o!())
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn find(&self, msg: &str) -> Option<CapturedRecord> {
        self.records().into_iter().find(|r| r.msg == msg)
    }

    pub fn count(&self, msg: &str) -> usize {
        self.records().iter().filter(|r| r.msg == msg).count()
    }
}

impl Drain for LogCapture {
    type Ok = ();
    type Err = Never;

    fn log(&self, record: &Record, values: &OwnedKVList) -> Result<(), Never> {
        let mut kv = KvCollector::default();
        let _ = record.kv().serialize(record, &mut kv);
        let _ = values.serialize(record, &mut kv);
        self.records.lock().unwrap().push(CapturedRecord {
            level: record.level(),
            msg: record.msg().to_string(),
            kv: kv.0,
        });
        Ok(())
    }
}

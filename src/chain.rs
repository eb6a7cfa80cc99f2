use alloy::{
    primitives::{Address, B256, Bytes, TxHash, keccak256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use slog::{Logger, debug, error, o, warn};
use std::{future::Future, sync::Arc};
use tokio::task::JoinHandle;

use crate::error::ProviderError;

// https://github.com/ethereum/consensus-specs/blob/dev/solidity_deposit_contract/deposit_contract.sol
sol! {
    #[derive(Debug, PartialEq)]
    event DepositEvent(
        bytes pubkey,
        bytes withdrawal_credentials,
        bytes amount,
        bytes signature,
        bytes index
    );
}

/// Deposit contract encodes integers as 8 byte little-endian
fn le_u64(bytes: &Bytes) -> Option<u64> {
    <[u8; 8]>::try_from(bytes.as_ref())
        .ok()
        .map(u64::from_le_bytes)
}

impl DepositEvent {
    pub fn amount_gwei(&self) -> Option<u64> {
        le_u64(&self.amount)
    }

    pub fn deposit_index(&self) -> Option<u64> {
        le_u64(&self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxInfo {
    /// Price actually paid per gas unit in wei
    pub gas_price: u128,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptLog {
    pub address: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    pub logs: Vec<ReceiptLog>,
}

impl Receipt {
    /// Logs emitted by `address`, `Address` equality ignores hex casing
    pub fn count_from(&self, address: &Address) -> usize {
        self.logs.iter().filter(|l| l.address == *address).count()
    }
}

pub type LogStream = BoxStream<'static, Log>;

#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, ProviderError>;

    async fn block(&self, number: u64) -> Result<BlockInfo, ProviderError>;

    async fn transaction(&self, hash: TxHash) -> Result<TxInfo, ProviderError>;

    /// `None` when the node does not know the transaction
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ProviderError>;

    /// Stream of new logs emitted by `address` with `topic0` as first topic
    async fn watch_events(&self, address: Address, topic0: B256) -> Result<LogStream, ProviderError>;
}

/// A decoded event together with its inclusion metadata
pub struct ObservedEvent<E> {
    pub args: E,
    pub block_number: u64,
    pub transaction_hash: TxHash,
    pub log_index: Option<u64>,
    gateway: Arc<dyn ChainGateway>,
}

impl<E: SolEvent> ObservedEvent<E> {
    pub fn from_log(log: &Log, gateway: Arc<dyn ChainGateway>) -> Result<Self, ProviderError> {
        let decoded = log
            .log_decode::<E>()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let block_number = log
            .block_number
            .ok_or_else(|| ProviderError::Decode("log without block number".into()))?;
        let transaction_hash = log
            .transaction_hash
            .ok_or_else(|| ProviderError::Decode("log without transaction hash".into()))?;
        Ok(ObservedEvent {
            args: decoded.inner.data,
            block_number,
            transaction_hash,
            log_index: log.log_index,
            gateway,
        })
    }

    pub async fn block(&self) -> Result<BlockInfo, ProviderError> {
        self.gateway.block(self.block_number).await
    }

    pub async fn transaction(&self) -> Result<TxInfo, ProviderError> {
        self.gateway.transaction(self.transaction_hash).await
    }
}

/// Contract address bound to one event ABI signature. Listeners registered
/// through `subscribe` live until `unsubscribe_all` or drop.
pub struct ContractHandle {
    gateway: Arc<dyn ChainGateway>,
    address: Address,
    signature: String,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    log: Logger,
}

impl ContractHandle {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        address: Address,
        event_signature: &str,
        log: &Logger,
    ) -> Self {
        ContractHandle {
            gateway,
            address,
            signature: event_signature.to_string(),
            listeners: Mutex::new(Vec::new()),
            log: log.new(o!("contract" => address.to_string())),
        }
    }

    pub fn topic(&self) -> B256 {
        keccak256(self.signature.as_bytes())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Register `callback` for every `E` emitted by the contract. The log
    /// watcher runs in its own task and each event is handled in a task of
    /// its own, a failing or slow callback never stalls the stream.
    pub fn subscribe<E, F, Fut>(&self, callback: F)
    where
        E: SolEvent + Send + 'static,
        F: Fn(ObservedEvent<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if E::SIGNATURE != self.signature {
            error!(self.log, "Event is not part of the contract handle";
                "event" => E::SIGNATURE, "handle" => &self.signature);
            return;
        }

        let gateway = Arc::clone(&self.gateway);
        let address = self.address;
        let topic = self.topic();
        let log = self.log.new(o!("event" => E::SIGNATURE));
        let callback = Arc::new(callback);

        let task = tokio::spawn(async move {
            let mut stream = match gateway.watch_events(address, topic).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(log, "Event subscription failed"; "op" => "ContractHandle.subscribe", "error" => %e);
                    return;
                }
            };
            debug!(log, "Listening for events");
            while let Some(raw) = stream.next().await {
                match ObservedEvent::<E>::from_log(&raw, Arc::clone(&gateway)) {
                    Ok(event) => {
                        let callback = Arc::clone(&callback);
                        tokio::spawn(async move { (*callback)(event).await });
                    }
                    Err(e) => {
                        warn!(log, "Skipping undecodable log";
                            "tx_hash" => ?raw.transaction_hash, "error" => %e);
                    }
                }
            }
            warn!(log, "Event stream ended");
        });
        self.listeners.lock().push(task);
    }

    pub fn unsubscribe_all(&self) {
        let listeners: Vec<_> = self.listeners.lock().drain(..).collect();
        let count = listeners.len();
        listeners.into_iter().for_each(|task| task.abort());
        debug!(self.log, "Unsubscribed all listeners"; "count" => count);
    }
}

impl Drop for ContractHandle {
    fn drop(&mut self) {
        self.listeners.get_mut().drain(..).for_each(|task| task.abort());
    }
}

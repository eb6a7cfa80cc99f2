use alloy::{
    consensus::Transaction as _,
    eips::BlockNumberOrTag,
    primitives::{Address, B256, TxHash},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Transaction},
};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use slog::{Logger, debug, info};
use std::time::Duration;

use crate::{
    chain::{BlockInfo, ChainGateway, LogStream, Receipt, ReceiptLog, TxInfo},
    chains,
    error::ProviderError,
};

/// JSON-RPC client, connects lazily on first use and caches the provider
pub struct Client {
    pub rpc_url: String,
    pub poll_interval: Duration,
    chain_id: Mutex<u64>,
    provider: Mutex<Option<DynProvider>>,
    log: Logger,
}

impl Client {
    pub fn new(url: &str, poll_interval: Duration, log: &Logger) -> Result<Client, ProviderError> {
        if url.trim().is_empty() {
            return Err(ProviderError::Connect {
                url: url.to_string(),
                message: "must specify a valid rpc url".to_string(),
            });
        }
        Ok(Client {
            rpc_url: url.to_string(),
            poll_interval,
            chain_id: Mutex::new(0),
            provider: Mutex::new(None),
            log: log.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.provider.lock().is_some() && *self.chain_id.lock() != 0
    }

    pub async fn connect(&self) -> Result<&Self, ProviderError> {
        match self.is_connected() {
            true => Ok(self),
            false => self._connect().await.map(|_| self),
        }
    }

    pub async fn provider(&self) -> Result<DynProvider, ProviderError> {
        let cached = self.provider.lock().clone();
        match cached {
            Some(provider) => Ok(provider),
            None => self._connect().await,
        }
    }

    async fn _connect(&self) -> Result<DynProvider, ProviderError> {
        let provider = DynProvider::new(
            ProviderBuilder::new()
                .connect(self.rpc_url.as_str())
                .await
                .map_err(|e| ProviderError::Connect {
                    url: redact_url(&self.rpc_url),
                    message: e.to_string(),
                })?,
        );

        // Get chain ID and height
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ProviderError::rpc("eth_chainId", e))?;
        let height = provider
            .get_block_number()
            .await
            .map_err(|e| ProviderError::rpc("eth_blockNumber", e))?;

        *self.chain_id.lock() = chain_id;
        *self.provider.lock() = Some(provider.clone());

        info!(self.log, "Connected";
            "chain" => chains::chain_name(chain_id),
            "chain_id" => chain_id,
            "height" => height);
        Ok(provider)
    }

    pub fn chain_id(&self) -> u64 {
        *self.chain_id.lock()
    }
}

/// Provider API keys usually live in the url path, keep them out of logs
fn redact_url(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((base, key)) if key.len() >= 16 => format!("{base}/<redacted>"),
        _ => url.to_string(),
    }
}

/// Price per gas the transaction paid. Mined EIP-1559 transactions report the
/// effective price, legacy ones their declared price and pending dynamic fee
/// ones only the max fee.
pub fn paid_gas_price(tx: &Transaction) -> u128 {
    tx.effective_gas_price
        .or_else(|| tx.gas_price())
        .unwrap_or_else(|| tx.max_fee_per_gas())
}

#[async_trait]
impl ChainGateway for Client {
    async fn latest_block_number(&self) -> Result<u64, ProviderError> {
        self.provider()
            .await?
            .get_block_number()
            .await
            .map_err(|e| ProviderError::rpc("eth_blockNumber", e))
    }

    async fn block(&self, number: u64) -> Result<BlockInfo, ProviderError> {
        let block = self
            .provider()
            .await?
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(|e| ProviderError::rpc("eth_getBlockByNumber", e))?
            .ok_or_else(|| ProviderError::NotFound {
                what: "block",
                id: number.to_string(),
            })?;
        Ok(BlockInfo {
            number: block.header.number,
            timestamp: block.header.timestamp,
        })
    }

    async fn transaction(&self, hash: TxHash) -> Result<TxInfo, ProviderError> {
        let tx = self
            .provider()
            .await?
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| ProviderError::rpc("eth_getTransactionByHash", e))?
            .ok_or_else(|| ProviderError::NotFound {
                what: "transaction",
                id: hash.to_string(),
            })?;
        Ok(TxInfo {
            gas_price: paid_gas_price(&tx),
            gas_limit: tx.gas_limit(),
        })
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ProviderError> {
        let receipt = self
            .provider()
            .await?
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ProviderError::rpc("eth_getTransactionReceipt", e))?;
        debug!(self.log, "Transaction receipt fetched"; "tx_hash" => %hash, "found" => receipt.is_some());
        Ok(receipt.map(|receipt| Receipt {
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| ReceiptLog {
                    address: log.inner.address,
                })
                .collect(),
        }))
    }

    async fn watch_events(&self, address: Address, topic0: B256) -> Result<LogStream, ProviderError> {
        let filter = Filter::new().address(address).event_signature(topic0);
        let poller = self
            .provider()
            .await?
            .watch_logs(&filter)
            .await
            .map_err(|e| ProviderError::rpc("eth_newFilter", e))?
            .with_poll_interval(self.poll_interval);
        debug!(self.log, "Log filter installed";
            "address" => %address,
            "poll_interval" => ?self.poll_interval);
        Ok(poller.into_stream().flat_map(stream::iter).boxed())
    }
}

use alloy::{
    primitives::{Address, TxHash, hex},
    sol_types::SolEvent,
};
use parking_lot::Mutex;
use slog::{Logger, error, info, o, warn};
use std::sync::Arc;

use crate::{
    chain::{ChainGateway, ContractHandle, DepositEvent, ObservedEvent},
    deposit_db::{DepositRecord, DepositStore},
    error::{HandlerError, ProviderError, StartupError},
    helpers,
    telegram::Notifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Tracking,
    Stopped,
}

pub struct DepositTracker {
    gateway: Arc<dyn ChainGateway>,
    store: Arc<dyn DepositStore>,
    notifier: Arc<dyn Notifier>,
    contract: Address,
    fee_decimals: u8,
    state: Mutex<TrackerState>,
    handle: Mutex<Option<ContractHandle>>,
    log: Logger,
}

pub fn notification_text(record: &DepositRecord) -> String {
    format!("New deposit detected: {}", record.hash)
}

impl DepositTracker {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        store: Arc<dyn DepositStore>,
        notifier: Arc<dyn Notifier>,
        contract: Address,
        fee_decimals: u8,
        log: &Logger,
    ) -> Arc<Self> {
        Arc::new(DepositTracker {
            gateway,
            store,
            notifier,
            contract,
            fee_decimals,
            state: Mutex::new(TrackerState::Idle),
            handle: Mutex::new(None),
            log: log.new(o!("contract" => contract.to_string())),
        })
    }

    pub fn state(&self) -> TrackerState {
        *self.state.lock()
    }

    /// Connect the store and subscribe to deposit events. A store that
    /// cannot be opened is fatal, the subscription itself never fails here.
    pub async fn start_tracking(self: &Arc<Self>) -> Result<(), StartupError> {
        {
            let mut state = self.state.lock();
            if *state != TrackerState::Idle {
                return Err(StartupError::InvalidState(*state));
            }
            *state = TrackerState::Tracking;
        }

        if let Err(e) = self.store.connect().await {
            error!(self.log, "Deposit db connect failed"; "op" => "DepositTracker.start_tracking", "error" => %e);
            *self.state.lock() = TrackerState::Idle;
            return Err(e.into());
        }

        match self.gateway.latest_block_number().await {
            Ok(height) => info!(self.log, "Starting deposit tracking..."; "height" => height),
            Err(e) => warn!(self.log, "Starting deposit tracking, chain height unknown"; "error" => %e),
        }

        let handle = ContractHandle::new(
            Arc::clone(&self.gateway),
            self.contract,
            DepositEvent::SIGNATURE,
            &self.log,
        );
        // Listener tasks hold a weak reference, dropping the tracker ends them
        let tracker = Arc::downgrade(self);
        handle.subscribe::<DepositEvent, _, _>(move |event| {
            let tracker = tracker.clone();
            async move {
                if let Some(tracker) = tracker.upgrade() {
                    tracker.handle_deposit(event).await;
                }
            }
        });
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Unsubscribe and close the store. Never fails, errors are logged.
    pub async fn stop_tracking(&self) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous == TrackerState::Tracking {
                *state = TrackerState::Stopped;
            }
            previous
        };
        if previous != TrackerState::Tracking {
            info!(self.log, "Deposit tracking not running"; "state" => ?previous);
            return;
        }

        if let Some(handle) = self.handle.lock().take() {
            handle.unsubscribe_all();
        }
        if let Err(e) = self.store.close().await {
            error!(self.log, "Deposit db close failed"; "op" => "DepositTracker.stop_tracking", "error" => %e);
        }
        info!(self.log, "Deposit tracking stopped");
    }

    /// Handler boundary: whatever happens to this event stays here
    pub async fn handle_deposit(&self, event: ObservedEvent<DepositEvent>) {
        let log = self.log.new(o!(
            "tx_hash" => event.transaction_hash.to_string(),
            "block" => event.block_number,
            "log_index" => event.log_index
        ));
        if let Err(e) = self.process_deposit(&event, &log).await {
            error!(log, "Error handling deposit"; "op" => "DepositTracker.handle_deposit", "error" => %e);
        }
    }

    async fn process_deposit(
        &self,
        event: &ObservedEvent<DepositEvent>,
        log: &Logger,
    ) -> Result<DepositRecord, HandlerError> {
        let record = self.build_record(event).await?;
        info!(log, "New deposit detected";
            "pubkey" => &record.pubkey,
            "fee" => &record.fee,
            "amount_gwei" => ?event.args.amount_gwei(),
            "index" => ?event.args.deposit_index());

        self.store.save(&record).await?;
        info!(log, "Deposit saved");

        match self.notifier.notify(&notification_text(&record)).await {
            Ok(()) => info!(log, "Telegram notification sent successfully"),
            Err(e) => {
                error!(log, "Telegram notification failed"; "op" => "TelegramNotifier.notify", "error" => %e)
            }
        }

        self.check_for_multiple_deposits(event.transaction_hash, log)
            .await;
        Ok(record)
    }

    pub async fn build_record(
        &self,
        event: &ObservedEvent<DepositEvent>,
    ) -> Result<DepositRecord, ProviderError> {
        let block = event.block().await?;
        let tx = event.transaction().await?;
        Ok(DepositRecord {
            hash: event.transaction_hash.to_string(),
            block_number: event.block_number,
            block_timestamp: block.timestamp,
            fee: helpers::format_fee(tx.gas_price, tx.gas_limit, self.fee_decimals),
            pubkey: hex::encode_prefixed(&event.args.pubkey),
        })
    }

    /// Number of logs the tracked contract emitted in `tx_hash`
    pub async fn count_contract_logs(&self, tx_hash: TxHash) -> Result<usize, ProviderError> {
        let receipt = self
            .gateway
            .transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| ProviderError::NotFound {
                what: "receipt",
                id: tx_hash.to_string(),
            })?;
        Ok(receipt.count_from(&self.contract))
    }

    // TODO: synthesize one record per log once the multi-deposit policy is
    // decided, for now this only reports them
    async fn check_for_multiple_deposits(&self, tx_hash: TxHash, log: &Logger) {
        match self.count_contract_logs(tx_hash).await {
            Ok(count) if count > 1 => {
                info!(log, "Multiple deposits detected in transaction"; "count" => count)
            }
            Ok(_) => {}
            Err(e) => {
                error!(log, "Error checking for multiple deposits";
                    "op" => "DepositTracker.check_for_multiple_deposits", "error" => %e)
            }
        }
    }
}

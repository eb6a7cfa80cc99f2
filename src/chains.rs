use alloy::primitives::Address;
use once_cell::sync::Lazy;
use slog::{Logger, debug, warn};
use std::collections::HashMap;

use crate::macros::parse_address;

#[derive(Debug, Clone)]
pub struct ChainData {
    pub name: &'static str,
    pub deposit_contract: Address,
}

pub static CHAINDATA: Lazy<HashMap<u64, ChainData>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(1, CHAIN_ETH_MAINNET.clone());
    m.insert(17000, CHAIN_ETH_HOLESKY.clone());
    m.insert(560048, CHAIN_ETH_HOODI.clone());
    m
});

static CHAIN_ETH_MAINNET: Lazy<ChainData> = Lazy::new(|| ChainData {
    name: "mainnet",
    deposit_contract: parse_address!("0x00000000219ab540356cBB839Cbe05303d7705Fa"),
});

static CHAIN_ETH_HOLESKY: Lazy<ChainData> = Lazy::new(|| ChainData {
    name: "holesky",
    deposit_contract: parse_address!("0x4242424242424242424242424242424242424242"),
});

static CHAIN_ETH_HOODI: Lazy<ChainData> = Lazy::new(|| ChainData {
    name: "hoodi",
    deposit_contract: parse_address!("0x00000000219ab540356cBB839Cbe05303d7705Fa"),
});

pub fn chain_data(chain_id: u64) -> Option<&'static ChainData> {
    CHAINDATA.get(&chain_id)
}

pub fn chain_name(chain_id: u64) -> &'static str {
    chain_data(chain_id).map_or("unknown", |c| c.name)
}

/// Returns false when the chain is known and `contract` is not its
/// deposit contract, unknown chains are accepted as-is.
pub fn check_deposit_contract(chain_id: u64, contract: &Address, log: &Logger) -> bool {
    match chain_data(chain_id) {
        Some(chain) if chain.deposit_contract != *contract => {
            warn!(log, "Tracked contract is not the chain deposit contract";
                "chain" => chain.name,
                "tracked" => %contract,
                "expected" => %chain.deposit_contract
            );
            false
        }
        Some(chain) => {
            debug!(log, "Tracking known deposit contract"; "chain" => chain.name);
            true
        }
        None => true,
    }
}

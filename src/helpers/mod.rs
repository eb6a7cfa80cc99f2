pub mod datetime;

use alloy::primitives::U256;

/// Highest decimal count whose scale (10^n) still fits in a U256
pub const MAX_DECIMALS: u8 = 77;

/// Format a base-unit amount as a decimal string with `decimals` fractional
/// digits, trailing zeros trimmed but always keeping one fractional digit,
/// e.g. 42000 wei at 18 decimals is "0.000000000000042" and 1 ether is "1.0"
pub fn format_units_trimmed(amount: U256, decimals: u8) -> String {
    let decimals = decimals.min(MAX_DECIMALS);
    if decimals == 0 {
        return format!("{amount}.0");
    }
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let integer = amount / scale;
    let fractional = format!("{:0>width$}", (amount % scale).to_string(), width = decimals as usize);
    let fractional = fractional.trim_end_matches('0');
    match fractional.is_empty() {
        true => format!("{integer}.0"),
        false => format!("{integer}.{fractional}"),
    }
}

/// Transaction fee (gas price * gas limit) in base denomination units
pub fn format_fee(gas_price: u128, gas_limit: u64, decimals: u8) -> String {
    format_units_trimmed(U256::from(gas_price) * U256::from(gas_limit), decimals)
}

// Exported with `#[macro_export]` so the binary crate can use them too,
// the `pub(crate) use` below gives us `macros::<macro>!` paths inside the lib
#![allow(unused_imports)]

/// Parse a hardcoded address literal, only use with known-good constants
#[macro_export]
macro_rules! parse_address {
    ($addr:tt) => {
        $addr
            .parse::<alloy::primitives::Address>()
            .expect("invalid address literal")
    };
}

/// Colored `key: value` line used by the CLI printers
#[macro_export]
macro_rules! push_field {
    ($buf:ident, $align:expr, $k:expr, $v:expr, $c:ident) => {
        $buf.push_str(
            format!(
                "\n    {:align$}{}",
                format!("{}:", $k).white().bold(),
                format!("{}", $v).$c(),
                align = $align
            )
            .as_str(),
        )
    };
}

pub(crate) use parse_address;
pub(crate) use push_field;

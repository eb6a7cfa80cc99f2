use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use std::{fs::File, io::BufReader};

use alloy::primitives::Address;
use eyre::{Result, WrapErr, bail};
use serde_derive::Deserialize;

use clap_serde_derive::{
    ClapSerde,
    clap::{Parser, Subcommand},
};

use crate::{error::StartupError, helpers::MAX_DECIMALS, telegram::TelegramConfig};

pub const DEFAULT_CONFIG_FILE: &str = "~/.config/deposit-tracker/config.toml";
pub const DEFAULT_DATADIR: &str = "~/.deposit-tracker";
pub const ALCHEMY_MAINNET_URL: &str = "https://eth-mainnet.g.alchemy.com/v2";

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Config file
    #[arg(short, long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_path: Option<PathBuf>,

    /// Global arguments
    #[command(flatten)]
    pub config: <CliArgs as ClapSerde>::Opt,

    // Subcommands, `run` when omitted
    #[command(subcommand)]
    pub command: Option<CliCmd>,
}

// No clap `default_value` here: a clap default would always be `Some` and
// mask the config file on merge, defaults live in `#[default]` instead
#[derive(Debug, Clone, ClapSerde, Deserialize)]
pub struct CliArgs {
    /// Logging level
    #[default(3)]
    #[arg(short, long = "log-level", required = false)]
    pub log_level: u8,

    /// Also write the log to this file
    #[arg(long = "log-file", required = false)]
    pub log_file: PathBuf,

    /// Data directory
    #[default(PathBuf::from(DEFAULT_DATADIR))]
    #[arg(long = "datadir", required = false)]
    pub datadir: PathBuf,

    /// Deposit DB, relative to the data directory
    #[default(PathBuf::from("deposits.json"))]
    #[arg(long = "deposit-db", required = false)]
    pub deposit_db: PathBuf,

    /// JsonRPC URL
    #[arg(long = "rpc-url", env = "CHAIN_RPC_URL", required = false)]
    pub rpc_url: String,

    /// Alchemy API key, used when no RPC URL is given
    #[arg(long = "rpc-api-key", env = "CHAIN_RPC_API_KEY", required = false, hide_env_values = true)]
    pub rpc_api_key: String,

    /// Beacon deposit contract address
    #[arg(long = "deposit-contract", env = "BEACON_DEPOSIT_CONTRACT", required = false)]
    pub deposit_contract: String,

    /// Telegram bot token
    #[arg(long = "telegram-bot-token", env = "TELEGRAM_BOT_TOKEN", required = false, hide_env_values = true)]
    pub telegram_bot_token: String,

    /// Telegram chat ID
    #[arg(long = "telegram-chat-id", env = "TELEGRAM_CHAT_ID", required = false)]
    pub telegram_chat_id: String,

    /// Telegram Bot API URL
    #[default(crate::telegram::TELEGRAM_API_URL.to_string())]
    #[arg(long = "telegram-api-url", required = false)]
    pub telegram_api_url: String,

    /// Decimals of the chain's base denomination, used to format fees
    #[default(18)]
    #[arg(long = "fee-decimals", required = false)]
    pub fee_decimals: u8,

    /// Log filter poll interval in seconds
    #[default(12)]
    #[arg(long = "poll-interval", required = false)]
    pub poll_interval: u64,
}

// Command line cmds
#[derive(Subcommand)]
pub enum CliCmd {
    /// Track deposits until interrupted
    Run {},
    /// List stored deposits
    #[clap(visible_alias = "ls")]
    List {},
    /// Show a stored deposit
    Show {
        #[arg(required = true)]
        hash: String,
    },
    /// Print version information
    #[clap(visible_alias = "ver")]
    Version {},
}

/// Validated settings for the `run` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub rpc_url: String,
    pub deposit_contract: Address,
    pub telegram: TelegramConfig,
    pub fee_decimals: u8,
    pub poll_interval: Duration,
    pub deposit_db: PathBuf,
}

fn required(value: &str, name: &'static str) -> Result<String, StartupError> {
    match value.trim() {
        "" => Err(StartupError::MissingSetting(name)),
        v => Ok(v.to_string()),
    }
}

impl Settings {
    pub fn from_args(args: &CliArgs) -> Result<Settings, StartupError> {
        let rpc_url = match (args.rpc_url.trim(), args.rpc_api_key.trim()) {
            ("", "") => return Err(StartupError::MissingSetting("rpc-url or rpc-api-key")),
            ("", key) => format!("{ALCHEMY_MAINNET_URL}/{key}"),
            (url, _) => url.to_string(),
        };

        let deposit_contract = required(&args.deposit_contract, "deposit-contract")?
            .parse::<Address>()
            .map_err(|e| StartupError::InvalidSetting {
                name: "deposit-contract",
                reason: e.to_string(),
            })?;

        if args.fee_decimals > MAX_DECIMALS {
            return Err(StartupError::InvalidSetting {
                name: "fee-decimals",
                reason: format!("{} exceeds {}", args.fee_decimals, MAX_DECIMALS),
            });
        }
        if args.poll_interval == 0 {
            return Err(StartupError::InvalidSetting {
                name: "poll-interval",
                reason: "must be at least 1 second".to_string(),
            });
        }

        Ok(Settings {
            rpc_url,
            deposit_contract,
            telegram: TelegramConfig {
                bot_token: required(&args.telegram_bot_token, "telegram-bot-token")?,
                chat_id: required(&args.telegram_chat_id, "telegram-chat-id")?,
                api_url: args.telegram_api_url.clone(),
            },
            fee_decimals: args.fee_decimals,
            poll_interval: Duration::from_secs(args.poll_interval),
            deposit_db: args.datadir.join(&args.deposit_db),
        })
    }
}

/// Command line and environment take precedence over the config file
pub fn merge_args_from_file<T>(
    args: <T as ClapSerde>::Opt,
    maybe_path: Option<PathBuf>,
) -> Result<T>
where
    T: ClapSerde + serde::de::DeserializeOwned,
{
    match maybe_path {
        Some(path) => {
            let config_path = std::path::Path::new(&path);
            match config_path.exists() {
                true => {
                    let config = match config_path.extension().and_then(OsStr::to_str) {
                        Some("toml") => read_toml_config::<T, _>(config_path),
                        Some("json") => read_json_config::<T, _>(config_path),
                        Some("jsonc") => read_jsonc_config::<T, _>(config_path),
                        _ => {
                            bail!("Unsupported config file type: {:?}", path);
                        }
                    }?;
                    // Fields which are not None in `args` replace the file's
                    Ok(T::from(config).merge(args))
                }
                false => Ok(T::from(args)),
            }
        }
        None => Ok(T::from(args)),
    }
}

fn read_toml_config<T, P: AsRef<std::path::Path>>(path: P) -> Result<<T as ClapSerde>::Opt>
where
    P: AsRef<std::path::Path> + std::fmt::Debug + Copy,
    T: ClapSerde + serde::de::DeserializeOwned,
{
    let content = std::fs::read_to_string(path).wrap_err_with(|| format!("{:?}", path))?;
    Ok(toml::from_str(&content)?)
}

fn read_json_config<T: ClapSerde, P: AsRef<std::path::Path>>(
    path: P,
) -> Result<<T as ClapSerde>::Opt>
where
    P: AsRef<std::path::Path> + std::fmt::Debug + Copy,
{
    let f = File::open(path).wrap_err_with(|| format!("{:?}", path))?;
    let json_cfg = serde_json::from_reader::<_, <T as ClapSerde>::Opt>(BufReader::new(f))?;
    Ok(json_cfg)
}

fn read_jsonc_config<T: ClapSerde, P: AsRef<std::path::Path>>(
    path: P,
) -> Result<<T as ClapSerde>::Opt>
where
    P: AsRef<std::path::Path> + std::fmt::Debug + Copy,
{
    let f = File::open(path).wrap_err_with(|| format!("{:?}", path))?;
    let jsonc_cfg = serde_jsonc::from_reader::<_, <T as ClapSerde>::Opt>(BufReader::new(f))?;
    Ok(jsonc_cfg)
}

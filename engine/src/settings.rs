// Copyright 2025 Chainflip Labs GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Engine settings: a config file layered under environment variables
//! (prefix `MARK__`, `__` separator) layered under command line options.
//! External option names are camelCase, matching the hub's configuration
//! conventions rather than the TOML default.

use crate::constants::{
	DEFAULT_DB_CONNECT_ATTEMPTS, DEFAULT_DB_POOL_SIZE, ENV_VAR_PREFIX, ENV_VAR_SEPARATOR,
};
use anyhow::{anyhow, bail, Context};
use clap::Parser;
use config::{Config, Environment, File};
use ethers::types::{Address, H256};
use mark_primitives::{status::BridgeTag, ChainIdentifier, TickerHash};
use mark_utilities::redact_endpoint_secret::SecretUrl;
use serde::Deserialize;
use std::{collections::HashMap, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkEnvironment {
	Mainnet,
	Testnet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssetSettings {
	pub address: Address,
	pub symbol: String,
	pub decimals: u8,
	pub ticker_hash: TickerHash,
	#[serde(default)]
	pub is_native: bool,
	/// Native-decimal string. Inventory below this is not considered movable.
	#[serde(default)]
	pub balance_threshold: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Deployments {
	pub everclear: Address,
	#[serde(default)]
	pub permit2: Option<Address>,
	#[serde(default)]
	pub multicall3: Option<Address>,
}

/// How transactions leave this chain: straight from the signer, or routed
/// through a Zodiac role module on a Safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletConfig {
	Eoa,
	Zodiac { module: Address, role_key: H256, safe: Address },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChainSettings {
	pub providers: Vec<SecretUrl>,
	pub assets: Vec<AssetSettings>,
	/// Seconds an invoice must have been outstanding before purchase.
	#[serde(default)]
	pub invoice_age: Option<u64>,
	/// Wei. Below this the chain is considered under-gassed.
	#[serde(default)]
	pub gas_threshold: Option<String>,
	#[serde(default)]
	pub deployments: Option<Deployments>,
	#[serde(default)]
	pub zodiac_role_module_address: Option<Address>,
	#[serde(default)]
	pub zodiac_role_key: Option<String>,
	#[serde(default)]
	pub gnosis_safe_address: Option<Address>,
	/// Marks a Tron chain, which budgets Bandwidth and Energy rather than gas.
	#[serde(default)]
	pub is_tron: bool,
}

impl ChainSettings {
	pub fn wallet_config(&self) -> anyhow::Result<WalletConfig> {
		match (
			self.zodiac_role_module_address,
			self.zodiac_role_key.as_deref(),
			self.gnosis_safe_address,
		) {
			(None, None, None) => Ok(WalletConfig::Eoa),
			(Some(module), Some(role_key), Some(safe)) => Ok(WalletConfig::Zodiac {
				module,
				role_key: H256::from_str(role_key.trim_start_matches("0x"))
					.context("zodiacRoleKey is not a 32 byte hex string")?,
				safe,
			}),
			_ => bail!(
				"zodiacRoleModuleAddress, zodiacRoleKey and gnosisSafeAddress must be set together"
			),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteSettings {
	pub origin: ChainIdentifier,
	pub destination: ChainIdentifier,
	/// Asset symbol, resolved against the origin chain's asset list.
	pub asset: String,
	/// 18-decimal hub units. Origin balance above this triggers a rebalance.
	pub maximum: String,
	/// 18-decimal hub units left behind on the origin. Defaults to zero.
	#[serde(default)]
	pub reserve: Option<String>,
	pub slippages_dbps: Vec<u64>,
	pub preferences: Vec<BridgeTag>,
	/// Overrides the 24h default operation TTL.
	#[serde(default)]
	pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HubSettings {
	pub domain: ChainIdentifier,
	pub providers: Vec<SecretUrl>,
	/// Hub storage contract holding custodied balances.
	#[serde(default)]
	pub storage: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EverclearSettings {
	pub api_url: SecretUrl,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DatabaseSettings {
	pub url: SecretUrl,
	#[serde(default = "default_pool_size")]
	pub pool_size: u32,
	#[serde(default = "default_connect_attempts")]
	pub connect_attempts: u32,
}

fn default_pool_size() -> u32 {
	DEFAULT_DB_POOL_SIZE
}

fn default_connect_attempts() -> u32 {
	DEFAULT_DB_CONNECT_ATTEMPTS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RedisSettings {
	pub url: SecretUrl,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignerSettings {
	/// Hex-encoded EVM private key. Non-EVM signers are wired externally.
	pub private_key: SecretUrl,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheckSettings {
	pub hostname: String,
	pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrometheusSettings {
	pub hostname: String,
	pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PauseSettings {
	/// Initial values only. The live flags are held in Redis so they can be
	/// flipped without a restart.
	#[serde(default)]
	pub rebalance: bool,
	#[serde(default)]
	pub purchase: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
	pub environment: NetworkEnvironment,
	pub own_address: Address,
	#[serde(default)]
	pub own_sol_address: Option<String>,
	pub supported_settlement_domains: Vec<ChainIdentifier>,
	/// Keyed by decimal chain id.
	pub chains: HashMap<String, ChainSettings>,
	#[serde(default)]
	pub routes: Vec<RouteSettings>,
	pub hub: HubSettings,
	pub everclear: EverclearSettings,
	pub database: DatabaseSettings,
	pub redis: RedisSettings,
	pub signer: SignerSettings,
	/// Milliseconds between ticks.
	#[serde(default = "default_polling_interval")]
	pub polling_interval: u64,
	/// Processing attempts per queued event before it is dead-lettered.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	/// Milliseconds between retries: the initial database connection, and
	/// redelivery of queued events that failed processing.
	#[serde(default = "default_retry_delay")]
	pub retry_delay: u64,
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default)]
	pub pause: PauseSettings,
	#[serde(default)]
	pub health_check: Option<HealthCheckSettings>,
	#[serde(default)]
	pub prometheus: Option<PrometheusSettings>,
	/// Adapter-specific configuration, opaque to the engine core.
	#[serde(default)]
	pub kraken: Option<serde_json::Value>,
	#[serde(default)]
	pub binance: Option<serde_json::Value>,
	#[serde(default)]
	pub solana: Option<serde_json::Value>,
	#[serde(default)]
	pub tac: Option<serde_json::Value>,
}

fn default_polling_interval() -> u64 {
	crate::constants::DEFAULT_POLLING_INTERVAL.as_millis() as u64
}

fn default_max_retries() -> u32 {
	3
}

fn default_retry_delay() -> u64 {
	crate::constants::DEFAULT_DB_CONNECT_RETRY_DELAY.as_millis() as u64
}

fn default_log_level() -> String {
	"info".to_string()
}

#[derive(Parser, Debug, Clone, Default)]
pub struct CommandLineOptions {
	/// Path to the configuration file.
	#[clap(long = "config", short = 'c', default_value = "config/mark")]
	pub config_path: String,

	#[clap(long = "database.url", env = crate::constants::DATABASE_URL)]
	pub database_url: Option<String>,

	#[clap(long = "redis.url", env = crate::constants::REDIS_URL)]
	pub redis_url: Option<String>,

	#[clap(long = "everclear.api-url", env = crate::constants::EVERCLEAR_API_URL)]
	pub everclear_api_url: Option<String>,

	#[clap(long = "log-json")]
	pub log_json: bool,
}

impl Settings {
	pub fn new(opts: CommandLineOptions) -> anyhow::Result<Self> {
		let mut builder = Config::builder()
			.add_source(File::with_name(&opts.config_path).required(true))
			.add_source(
				Environment::with_prefix(ENV_VAR_PREFIX)
					.separator(ENV_VAR_SEPARATOR)
					.try_parsing(true),
			);

		if let Some(url) = &opts.database_url {
			builder = builder.set_override("database.url", url.as_str())?;
		}
		if let Some(url) = &opts.redis_url {
			builder = builder.set_override("redis.url", url.as_str())?;
		}
		if let Some(url) = &opts.everclear_api_url {
			builder = builder.set_override("everclear.apiUrl", url.as_str())?;
		}

		let settings: Settings =
			builder.build()?.try_deserialize().context("invalid configuration")?;
		settings.validate()?;
		Ok(settings)
	}

	pub fn validate(&self) -> anyhow::Result<()> {
		for key in self.chains.keys() {
			key.parse::<ChainIdentifier>()
				.map_err(|_| anyhow!("chain key '{key}' is not a numeric chain id"))?;
		}
		for (index, route) in self.routes.iter().enumerate() {
			if route.slippages_dbps.len() != route.preferences.len() {
				bail!(
					"route[{index}] {} -> {}: slippagesDbps and preferences must be the same length",
					route.origin,
					route.destination
				);
			}
			if route.preferences.is_empty() {
				bail!("route[{index}] {} -> {}: no bridge preferences", route.origin, route.destination);
			}
			let origin = self
				.chain(route.origin)
				.ok_or_else(|| anyhow!("route[{index}]: unknown origin chain {}", route.origin))?;
			if !origin.assets.iter().any(|asset| asset.symbol == route.asset) {
				bail!(
					"route[{index}]: asset '{}' is not configured on chain {}",
					route.asset,
					route.origin
				);
			}
			if self.chain(route.destination).is_none() {
				bail!("route[{index}]: unknown destination chain {}", route.destination);
			}
			// Fails early on inconsistent zodiac settings.
			origin.wallet_config()?;
		}
		if self.database.pool_size == 0 {
			bail!("database.poolSize must be positive");
		}
		Ok(())
	}

	pub fn chain(&self, chain_id: ChainIdentifier) -> Option<&ChainSettings> {
		self.chains.get(&chain_id.to_string())
	}

	pub fn chain_or_err(&self, chain_id: ChainIdentifier) -> anyhow::Result<&ChainSettings> {
		self.chain(chain_id).ok_or_else(|| anyhow!("chain {chain_id} is not configured"))
	}

	/// All chain ids in the configuration, numerically sorted for stable
	/// iteration order.
	pub fn chain_ids(&self) -> Vec<ChainIdentifier> {
		let mut ids = self
			.chains
			.keys()
			.filter_map(|key| key.parse::<ChainIdentifier>().ok())
			.collect::<Vec<_>>();
		ids.sort_unstable();
		ids
	}
}

#[cfg(test)]
pub mod test_utils {
	use super::*;

	pub fn test_asset(symbol: &str, ticker: &str, decimals: u8) -> AssetSettings {
		AssetSettings {
			address: Address::repeat_byte(0x11),
			symbol: symbol.to_string(),
			decimals,
			ticker_hash: TickerHash::new(ticker),
			is_native: false,
			balance_threshold: None,
		}
	}

	pub fn test_chain(assets: Vec<AssetSettings>) -> ChainSettings {
		ChainSettings {
			providers: vec!["http://localhost:8545".into()],
			assets,
			invoice_age: Some(600),
			gas_threshold: None,
			deployments: Some(Deployments {
				everclear: Address::repeat_byte(0xee),
				permit2: None,
				multicall3: None,
			}),
			zodiac_role_module_address: None,
			zodiac_role_key: None,
			gnosis_safe_address: None,
			is_tron: false,
		}
	}

	pub fn test_settings() -> Settings {
		let weth = test_asset("WETH", "0x1234", 18);
		let usdc = test_asset("USDC", "0x5678", 6);
		Settings {
			environment: NetworkEnvironment::Testnet,
			own_address: Address::repeat_byte(0xaa),
			own_sol_address: None,
			supported_settlement_domains: vec![1, 10],
			chains: HashMap::from([
				("1".to_string(), test_chain(vec![weth.clone(), usdc.clone()])),
				("10".to_string(), test_chain(vec![weth, usdc])),
			]),
			routes: vec![RouteSettings {
				origin: 1,
				destination: 10,
				asset: "WETH".to_string(),
				maximum: "10000000000000000000".to_string(),
				reserve: Some("3000000000000000000".to_string()),
				slippages_dbps: vec![1000],
				preferences: vec![BridgeTag::Across],
				ttl_seconds: None,
			}],
			hub: HubSettings {
				domain: 25327,
				providers: vec!["http://localhost:8546".into()],
				storage: Some(Address::repeat_byte(0x55)),
			},
			everclear: EverclearSettings { api_url: "http://localhost:3000".into() },
			database: DatabaseSettings {
				url: "postgres://localhost/mark".into(),
				pool_size: DEFAULT_DB_POOL_SIZE,
				connect_attempts: 2,
			},
			redis: RedisSettings { url: "redis://localhost".into() },
			signer: SignerSettings {
				private_key:
					"0x0000000000000000000000000000000000000000000000000000000000000001".into(),
			},
			polling_interval: 1000,
			max_retries: 3,
			retry_delay: 10,
			log_level: "debug".to_string(),
			pause: PauseSettings::default(),
			health_check: None,
			prometheus: None,
			kraken: None,
			binance: None,
			solana: None,
			tac: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn valid_settings_pass_validation() {
		test_utils::test_settings().validate().unwrap();
	}

	#[test]
	fn mismatched_slippage_and_preference_lengths_are_rejected() {
		let mut settings = test_utils::test_settings();
		settings.routes[0].slippages_dbps = vec![1000, 2000];
		assert!(settings.validate().is_err());
	}

	#[test]
	fn unknown_route_chain_is_rejected() {
		let mut settings = test_utils::test_settings();
		settings.routes[0].destination = 137;
		assert!(settings.validate().is_err());
	}

	#[test]
	fn unknown_route_asset_is_rejected() {
		let mut settings = test_utils::test_settings();
		settings.routes[0].asset = "DOGE".to_string();
		assert!(settings.validate().is_err());
	}

	#[test]
	fn partial_zodiac_config_is_rejected() {
		let mut settings = test_utils::test_settings();
		settings.chains.get_mut("1").unwrap().zodiac_role_module_address =
			Some(Address::repeat_byte(0x01));
		assert!(settings.validate().is_err());
	}

	#[test]
	fn full_zodiac_config_resolves() {
		let mut chain = test_utils::test_chain(vec![]);
		chain.zodiac_role_module_address = Some(Address::repeat_byte(0x01));
		chain.zodiac_role_key = Some(
			"0x1111111111111111111111111111111111111111111111111111111111111111".to_string(),
		);
		chain.gnosis_safe_address = Some(Address::repeat_byte(0x02));
		match chain.wallet_config().unwrap() {
			WalletConfig::Zodiac { module, safe, .. } => {
				assert_eq!(module, Address::repeat_byte(0x01));
				assert_eq!(safe, Address::repeat_byte(0x02));
			},
			other => panic!("expected zodiac config, got {other:?}"),
		}
	}

	#[test]
	fn chain_lookup_by_numeric_id() {
		let settings = test_utils::test_settings();
		assert!(settings.chain(1).is_some());
		assert!(settings.chain(2).is_none());
		assert_eq!(settings.chain_ids(), vec![1, 10]);
	}
}

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

//! Inventory reads. Balances are reported in 18-decimal hub units; a failed
//! probe for one `(ticker, chain)` pair collapses to zero with a warning so
//! partial RPC trouble never aborts a tick. EVM reads go through the owner
//! resolved via Zodiac where the chain has a Safe module configured.

use crate::{
	assets,
	chain::{erc20, zodiac, ChainClient},
	db::Database,
	metrics::{BALANCES, GAS_BALANCES},
	settings::Settings,
};
use anyhow::Result;
use ethers::{
	abi::Token,
	types::{Address, H256, U256},
	utils::{id, keccak256},
};
use futures::future::join_all;
use mark_primitives::{
	amounts::{parse_amount, to_hub_amount},
	ChainIdentifier, TickerHash,
};
use std::{collections::HashMap, str::FromStr};
use strum::Display;
use tracing::warn;

/// ticker -> chain -> balance, 18-dec normalised.
pub type MarkBalances = HashMap<TickerHash, HashMap<ChainIdentifier, U256>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum GasType {
	Gas,
	Bandwidth,
	Energy,
}

/// Resource reads for Tron chains, which budget bandwidth and energy rather
/// than gas. Wired externally; the engine only consumes the interface.
#[async_trait::async_trait]
pub trait TronResources: Send + Sync {
	async fn bandwidth(&self, chain_id: ChainIdentifier) -> Result<U256>;
	async fn energy(&self, chain_id: ChainIdentifier) -> Result<U256>;
}

async fn probe_balance(
	settings: &Settings,
	client: &dyn ChainClient,
	chain_id: ChainIdentifier,
	ticker: &TickerHash,
) -> Result<U256> {
	let chain = settings.chain_or_err(chain_id)?;
	let asset = assets::asset_by_ticker(chain, ticker)
		.ok_or_else(|| anyhow::anyhow!("ticker {ticker} not configured on chain {chain_id}"))?;
	let owner = zodiac::resolve_owner(chain, client.signer_address())?;

	let raw = if asset.is_native {
		client.native_balance(chain_id, owner).await?
	} else {
		erc20::balance_of(client, chain_id, asset.address, owner).await?
	};
	Ok(to_hub_amount(raw, asset.decimals)?)
}

/// Balances for one ticker across every chain that carries it. Probes run
/// concurrently; failures collapse to zero.
pub async fn get_mark_balances_for_ticker(
	settings: &Settings,
	client: &dyn ChainClient,
	ticker: &TickerHash,
) -> HashMap<ChainIdentifier, U256> {
	let chains = assets::chains_with_ticker(settings, ticker);
	let probes = chains.iter().map(|&chain_id| async move {
		let balance = match probe_balance(settings, client, chain_id, ticker).await {
			Ok(balance) => balance,
			Err(error) => {
				warn!("Balance probe failed for {ticker} on chain {chain_id}: {error}");
				U256::zero()
			},
		};
		(chain_id, balance)
	});
	let balances: HashMap<_, _> = join_all(probes).await.into_iter().collect();

	for (chain_id, balance) in &balances {
		BALANCES
			.with_label_values(&[ticker.as_str(), &chain_id.to_string()])
			.set(balance.to_string().parse::<f64>().unwrap_or(f64::MAX));
	}
	balances
}

/// All configured tickers across all chains.
pub async fn get_mark_balances(settings: &Settings, client: &dyn ChainClient) -> MarkBalances {
	let tickers = assets::get_tickers(settings);
	let per_ticker = join_all(tickers.iter().map(|ticker| async move {
		(ticker.clone(), get_mark_balances_for_ticker(settings, client, ticker).await)
	}))
	.await;
	per_ticker.into_iter().collect()
}

/// Gas-paying balances per chain. The signer pays gas even on Zodiac-routed
/// chains. Tron chains report Bandwidth and Energy instead.
pub async fn get_mark_gas_balances(
	settings: &Settings,
	client: &dyn ChainClient,
	tron: Option<&dyn TronResources>,
) -> HashMap<(ChainIdentifier, GasType), U256> {
	let mut balances = HashMap::new();
	for chain_id in settings.chain_ids() {
		let Some(chain) = settings.chain(chain_id) else { continue };
		if chain.is_tron {
			let (bandwidth, energy) = match tron {
				Some(tron) => (
					tron.bandwidth(chain_id).await.unwrap_or_else(|error| {
						warn!("Tron bandwidth probe failed on chain {chain_id}: {error}");
						U256::zero()
					}),
					tron.energy(chain_id).await.unwrap_or_else(|error| {
						warn!("Tron energy probe failed on chain {chain_id}: {error}");
						U256::zero()
					}),
				),
				None => {
					warn!("No tron client wired; reporting zero resources for chain {chain_id}");
					(U256::zero(), U256::zero())
				},
			};
			balances.insert((chain_id, GasType::Bandwidth), bandwidth);
			balances.insert((chain_id, GasType::Energy), energy);
		} else {
			let balance =
				client.native_balance(chain_id, client.signer_address()).await.unwrap_or_else(
					|error| {
						warn!("Gas balance probe failed on chain {chain_id}: {error}");
						U256::zero()
					},
				);
			balances.insert((chain_id, GasType::Gas), balance);
		}
	}

	for ((chain_id, gas_type), balance) in &balances {
		GAS_BALANCES
			.with_label_values(&[&chain_id.to_string(), &gas_type.to_string()])
			.set(balance.to_string().parse::<f64>().unwrap_or(f64::MAX));
	}
	balances
}

/// Custodied assets per ticker per chain, read from the hub's storage
/// contract: `custodiedAssets(keccak256(abi.encode(tickerHash, domain)))`.
pub async fn get_custodied_balances(
	settings: &Settings,
	client: &dyn ChainClient,
) -> HashMap<TickerHash, HashMap<ChainIdentifier, U256>> {
	let Some(storage) = settings.hub.storage else {
		return HashMap::new();
	};

	let mut custodied: HashMap<TickerHash, HashMap<ChainIdentifier, U256>> = HashMap::new();
	for ticker in assets::get_tickers(settings) {
		let Ok(ticker_bytes) = H256::from_str(ticker.as_str()) else {
			warn!("Ticker {ticker} is not a 32 byte hash; skipping custodied read");
			continue;
		};
		for chain_id in assets::chains_with_ticker(settings, &ticker) {
			let asset_hash = keccak256(ethers::abi::encode(&[
				Token::FixedBytes(ticker_bytes.as_bytes().to_vec()),
				Token::Uint(U256::from(chain_id)),
			]));
			let mut calldata = id("custodiedAssets(bytes32)").to_vec();
			calldata.extend(ethers::abi::encode(&[Token::FixedBytes(asset_hash.to_vec())]));

			match client.call(settings.hub.domain, storage, calldata.into()).await {
				Ok(raw) if raw.len() >= 32 =>
					custodied
						.entry(ticker.clone())
						.or_default()
						.insert(chain_id, U256::from_big_endian(&raw[..32])),
				Ok(_) | Err(_) => {
					warn!("Custodied read failed for {ticker} on chain {chain_id}");
					custodied.entry(ticker.clone()).or_default().insert(chain_id, U256::zero())
				},
			};
		}
	}
	custodied
}

/// `balance` minus the `minAmount` of every PENDING earmark on the same
/// `(chain, ticker)`. Never negative; underflow clamps to zero and is
/// logged. Amounts are native decimals on both sides.
pub async fn get_available_balance_less_earmarks(
	db: &Database,
	chain: ChainIdentifier,
	ticker: &TickerHash,
	balance: U256,
) -> Result<U256> {
	let earmarks = db.get_active_earmarks_for_chain(chain).await?;

	let mut reserved = U256::zero();
	for earmark in earmarks.iter().filter(|earmark| earmark.ticker_hash == *ticker) {
		match parse_amount(&earmark.min_amount) {
			Ok(amount) => reserved = reserved.saturating_add(amount),
			Err(error) => warn!(
				"Earmark {} carries an unparseable minAmount '{}': {error}",
				earmark.id, earmark.min_amount
			),
		}
	}

	if reserved > balance {
		warn!(
			"Earmarked {reserved} exceeds balance {balance} for {ticker} on chain {chain}; \
			clamping available to zero"
		);
		return Ok(U256::zero());
	}
	Ok(balance - reserved)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{chain::MockChainClient, settings::test_utils::test_settings};

	fn encoded_uint(value: u64) -> ethers::types::Bytes {
		ethers::abi::encode(&[Token::Uint(U256::from(value))]).into()
	}

	#[tokio::test]
	async fn failed_probes_collapse_to_zero() {
		let settings = test_settings();
		let mut client = MockChainClient::new();
		client.expect_signer_address().return_const(Address::repeat_byte(0xaa));
		// Chain 1 answers, chain 10 errors.
		client.expect_call().returning(|chain_id, _, _| {
			if chain_id == 1 {
				Ok(encoded_uint(5))
			} else {
				Err(anyhow::anyhow!("rpc down"))
			}
		});

		let balances =
			get_mark_balances_for_ticker(&settings, &client, &TickerHash::new("0x5678")).await;
		// USDC has 6 decimals: 5 native units normalise to 5e12 hub units.
		assert_eq!(balances[&1], U256::from(5u64) * U256::exp10(12));
		assert_eq!(balances[&10], U256::zero());
	}

	#[tokio::test]
	async fn gas_balances_use_the_signer_address() {
		let settings = test_settings();
		let mut client = MockChainClient::new();
		client.expect_signer_address().return_const(Address::repeat_byte(0xaa));
		client
			.expect_native_balance()
			.times(2)
			.withf(|_, owner| *owner == Address::repeat_byte(0xaa))
			.returning(|_, _| Ok(U256::from(1_000_000u64)));

		let balances = get_mark_gas_balances(&settings, &client, None).await;
		assert_eq!(balances[&(1, GasType::Gas)], U256::from(1_000_000u64));
		assert_eq!(balances[&(10, GasType::Gas)], U256::from(1_000_000u64));
	}
}

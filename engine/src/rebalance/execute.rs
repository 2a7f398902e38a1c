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

//! Decide-and-execute: scans each configured route, compares earmark-aware
//! origin inventory against the route maximum, and drives the chosen
//! bridge's send plan through the submission helper. Bridge preferences are
//! tried strictly in order; a single aggregate warning is emitted only when
//! every preference is exhausted.

use super::RebalanceEngine;
use crate::{
	assets,
	balance::{get_available_balance_less_earmarks, get_mark_balances_for_ticker},
	bridge::{selection::select_bridge, BridgeTransaction, Route},
	chain::{
		submit::{check_and_approve_erc20, receipt_to_input, submit_transaction_with_logging},
		zodiac::resolve_owner,
		TxReceipt,
	},
	db::rebalance::CreateRebalanceOperation,
	metrics::REBALANCE_OPERATIONS,
	settings::RouteSettings,
};
use anyhow::{anyhow, bail, Context, Result};
use ethers::types::{Address, U256};
use mark_primitives::{
	amounts::{from_hub_amount, parse_amount, to_hub_amount},
	status::{BridgeTag, OperationType, TransactionReason},
	ChainIdentifier, TickerHash,
};
use std::collections::HashMap;
use uuid::Uuid;
use tracing::{debug, info, warn};

/// How much to move, all in 18-dec hub units: nothing while inventory is at
/// or under the route maximum, otherwise everything above the reserve.
fn compute_amount_to_bridge(available: U256, maximum: U256, reserve: U256) -> Option<U256> {
	if available <= maximum {
		return None;
	}
	available.checked_sub(reserve).filter(|amount| !amount.is_zero())
}

/// One transfer the engine should carry out: the route identity, the
/// native-decimal amount, and the ordered `(bridge, tolerance)` pairs.
#[derive(Debug, Clone)]
pub(crate) struct TransferSpec {
	pub origin: ChainIdentifier,
	pub destination: ChainIdentifier,
	pub ticker: TickerHash,
	pub amount: U256,
	pub preferences: Vec<(BridgeTag, u64)>,
	pub earmark_id: Option<Uuid>,
}

/// Extracts `(spender, amount)` from approve(address,uint256) calldata.
fn parse_approval(data: &[u8]) -> Option<(Address, U256)> {
	if data.len() != 68 || data[..4] != ethers::utils::id("approve(address,uint256)") {
		return None;
	}
	let spender = Address::from_slice(&data[16..36]);
	let amount = U256::from_big_endian(&data[36..68]);
	Some((spender, amount))
}

impl RebalanceEngine {
	/// One decide/execute pass over every configured route. Per-route
	/// failures are isolated.
	pub async fn decide_and_execute(&self) -> Result<()> {
		for route in &self.settings.routes {
			if let Err(error) = self.process_route(route).await {
				warn!(
					"Rebalance pass failed for route {} -> {} ({}): {error:#}",
					route.origin, route.destination, route.asset
				);
			}
		}
		Ok(())
	}

	async fn process_route(&self, route: &RouteSettings) -> Result<()> {
		let Some(ticker) = assets::ticker_for_asset(&self.settings, route.origin, &route.asset)
		else {
			debug!(
				"Skipping route {} -> {}: asset '{}' has no ticker on the origin",
				route.origin, route.destination, route.asset
			);
			return Ok(());
		};
		let decimals = assets::decimals_for(&self.settings, route.origin, &ticker)
			.ok_or_else(|| anyhow!("no decimals for {ticker} on chain {}", route.origin))?;

		let balances =
			get_mark_balances_for_ticker(&self.settings, self.chain.as_ref(), &ticker).await;
		let origin_balance_hub = balances.get(&route.origin).copied().unwrap_or_default();

		// Earmark reservations are native-decimal amounts, so availability is
		// computed native-side and converted back.
		let origin_balance_native = from_hub_amount(origin_balance_hub, decimals)?;
		let available_native = get_available_balance_less_earmarks(
			&self.db,
			route.origin,
			&ticker,
			origin_balance_native,
		)
		.await?;
		let available_hub = to_hub_amount(available_native, decimals)?;

		let maximum = parse_amount(&route.maximum)
			.with_context(|| format!("route maximum '{}'", route.maximum))?;
		let reserve = route
			.reserve
			.as_deref()
			.map(parse_amount)
			.transpose()
			.with_context(|| format!("route reserve {:?}", route.reserve))?
			.unwrap_or_default();

		let Some(amount_hub) = compute_amount_to_bridge(available_hub, maximum, reserve) else {
			debug!(
				"Route {} -> {} ({ticker}): available {available_hub} within bounds, nothing to do",
				route.origin, route.destination
			);
			return Ok(());
		};
		// Round-up must never bridge more than is actually available.
		let amount = from_hub_amount(amount_hub, decimals)?.min(available_native);
		if amount.is_zero() {
			return Ok(());
		}

		let preferences = route
			.preferences
			.iter()
			.copied()
			.zip(route.slippages_dbps.iter().copied())
			.collect::<Vec<_>>();

		self.execute_transfer(TransferSpec {
			origin: route.origin,
			destination: route.destination,
			ticker,
			amount,
			preferences,
			earmark_id: None,
		})
		.await
		.map(|_| ())
	}

	/// Quotes, sends and records one transfer. Returns None when every
	/// bridge preference is exhausted (a single aggregate warning is
	/// emitted), the created operation otherwise. Also the entry point for
	/// earmark-driven refills from the invoice pipeline.
	pub(crate) async fn execute_transfer(
		&self,
		spec: TransferSpec,
	) -> Result<Option<crate::db::rebalance::RebalanceOperation>> {
		let TransferSpec { origin, destination, ticker, amount, preferences, earmark_id } = spec;

		let origin_chain = self.settings.chain_or_err(origin)?;
		let bridge_route = Route {
			origin,
			destination,
			asset: assets::asset_by_ticker(origin_chain, &ticker)
				.ok_or_else(|| anyhow!("ticker {ticker} not configured on chain {origin}"))?
				.address,
			swap_output_asset: None,
		};

		let Some(selection) =
			select_bridge(&self.registry, &bridge_route, amount, &preferences).await
		else {
			warn!(
				"Route {origin} -> {destination} ({ticker}): all {} bridge preferences \
				exhausted for amount {amount}",
				preferences.len()
			);
			return Ok(None);
		};

		let sender = resolve_owner(origin_chain, self.chain.signer_address())?;
		let recipient = resolve_owner(
			self.settings.chain_or_err(destination)?,
			self.chain.signer_address(),
		)?;

		let entries = selection
			.adapter
			.send(sender, recipient, amount, &bridge_route)
			.await
			.context("building bridge send plan")?;

		let (rebalance_receipt, effective_amount) =
			self.submit_send_plan(entries, &bridge_route, amount).await?;

		let operation = self
			.db
			.create_rebalance_operation(CreateRebalanceOperation {
				earmark_id,
				origin_chain_id: origin,
				destination_chain_id: destination,
				ticker_hash: ticker.clone(),
				amount: effective_amount.to_string(),
				slippage_dbps: selection.slippage_dbps,
				bridge: selection.adapter.adapter_type(),
				operation_type: OperationType::Bridge,
				recipient: Some(format!("{recipient:#x}")),
				transactions: HashMap::from([(
					origin.to_string(),
					receipt_to_input(&rebalance_receipt),
				)]),
			})
			.await?;

		REBALANCE_OPERATIONS
			.with_label_values(&[&operation.bridge.to_string(), &operation.status.to_string()])
			.inc();
		info!(
			operation = %operation.id,
			bridge = %operation.bridge,
			amount = %effective_amount,
			slippage_dbps = selection.slippage_dbps,
			"rebalance operation created for route {origin} -> {destination} ({ticker})"
		);
		Ok(Some(operation))
	}

	/// Submits the adapter's entries in order. Approval entries go through
	/// the allowance-aware helper (zero-then-approve where required); the
	/// `Rebalance` entry's receipt is returned for recording.
	async fn submit_send_plan(
		&self,
		entries: Vec<BridgeTransaction>,
		route: &Route,
		requested_amount: U256,
	) -> Result<(TxReceipt, U256)> {
		let mut rebalance_receipt = None;
		let mut effective_amount = requested_amount;

		for entry in entries {
			match entry.memo {
				TransactionReason::Approval => {
					let (spender, amount) = parse_approval(&entry.transaction.data)
						.ok_or_else(|| anyhow!("approval entry with non-approve calldata"))?;
					check_and_approve_erc20(
						self.chain.as_ref(),
						&self.settings,
						entry.transaction.chain_id,
						entry.transaction.to,
						spender,
						amount,
						"bridge allowance",
					)
					.await?;
				},
				memo => {
					let result = submit_transaction_with_logging(
						self.chain.as_ref(),
						&self.settings,
						entry.transaction,
						memo,
						&format!("bridge send plan ({memo})"),
					)
					.await?;
					if memo == TransactionReason::Rebalance {
						if let Some(amount) = entry.effective_amount {
							effective_amount = amount;
						}
						rebalance_receipt = Some(result.receipt);
					}
				},
			}
		}

		let receipt = rebalance_receipt
			.ok_or_else(|| anyhow!("send plan for {} -> {} contained no Rebalance entry", route.origin, route.destination))?;
		if receipt.transaction_hash.is_empty() {
			bail!("rebalance receipt carries no transaction hash");
		}
		Ok((receipt, effective_amount))
	}
}

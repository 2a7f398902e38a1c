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

//! The callback sweep: reconciles every in-flight operation with bridge
//! state. Runs first in every tick and also while rebalancing is paused.
//! Operations are processed sequentially so the idempotency check on the
//! destination-chain receipt is authoritative within a tick.

use super::{bridge_route, is_expired, ttl_for_operation, RebalanceEngine};
use crate::{
	bridge::{DeliveryStatus, OriginReceipt, Route},
	chain::submit::{receipt_to_input, submit_transaction_with_logging},
	db::{
		rebalance::{RebalanceOperation, UpdateRebalanceOperation},
		swaps::{CreateSwapOperation, SwapOperationFilter},
		transactions::TransactionReceiptInput,
	},
	metrics::REBALANCE_OPERATIONS,
};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use mark_primitives::{
	amounts::parse_amount,
	status::{OperationType, RebalanceStatus, SwapStatus},
};
use std::collections::HashMap;
use tracing::{info, warn};

impl RebalanceEngine {
	/// One reconciliation pass over every non-terminal operation. Failures
	/// are isolated per operation.
	pub async fn run_callbacks(&self) -> Result<()> {
		let operations = self
			.db
			.get_rebalance_operations(crate::db::rebalance::RebalanceOperationFilter {
				statuses: Some(vec![RebalanceStatus::Pending, RebalanceStatus::AwaitingCallback]),
				..Default::default()
			})
			.await?;

		for operation in operations {
			if let Err(error) = self.reconcile_operation(&operation).await {
				warn!("Callback pass failed for operation {}: {error:#}", operation.id);
			}
		}
		Ok(())
	}

	async fn reconcile_operation(&self, operation: &RebalanceOperation) -> Result<()> {
		let now = Utc::now();
		if is_expired(operation.created_at, now, ttl_for_operation(&self.settings, operation)) {
			info!("Operation {} exceeded its TTL, expiring", operation.id);
			self.transition(operation, RebalanceStatus::Expired, None).await?;
			return Ok(());
		}

		let Some(adapter) = self.registry.get(operation.bridge) else {
			warn!("No adapter registered for bridge '{}', leaving operation {} in place", operation.bridge, operation.id);
			return Ok(());
		};
		let Some(route) = bridge_route(&self.settings, operation) else {
			warn!("Operation {} references an unconfigured asset, leaving in place", operation.id);
			return Ok(());
		};
		let Some(origin_tx) = operation.origin_transaction() else {
			// Created-but-unsubmitted rows should not exist; expiry will
			// eventually reap them if they do.
			warn!("Operation {} has no origin receipt recorded", operation.id);
			return Ok(());
		};

		let origin_receipt = OriginReceipt {
			transaction_hash: origin_tx.transaction_hash.clone(),
			chain_id: operation.origin_chain_id,
			block_number: origin_tx
				.metadata
				.get("blockNumber")
				.and_then(serde_json::Value::as_u64),
		};
		let amount = parse_amount(&operation.amount)
			.map_err(|error| anyhow!("operation {} amount: {error}", operation.id))?;

		match adapter.ready_on_destination(amount, &route, &origin_receipt).await? {
			DeliveryStatus::Pending =>
				if operation.status == RebalanceStatus::Pending {
					// Origin leg is confirmed and the bridge has the
					// transfer; from here on only the destination matters.
					self.transition(operation, RebalanceStatus::AwaitingCallback, None).await?;
				},
			DeliveryStatus::Failed(reason) => {
				warn!("Bridge reports definitive failure for operation {}: {reason}", operation.id);
				self.transition(operation, RebalanceStatus::Cancelled, None).await?;
			},
			DeliveryStatus::Delivered => {
				if operation.operation_type == OperationType::SwapAndBridge &&
					!self.swap_leg_completed(operation, &route, amount).await?
				{
					return Ok(());
				}
				self.finalize_delivered(operation, &route, &origin_receipt).await?;
			},
		}
		Ok(())
	}

	/// Runs (or checks) the swap leg of a swap-and-bridge operation. Returns
	/// true once the swap is complete; a failed swap cancels the parent.
	async fn swap_leg_completed(
		&self,
		operation: &RebalanceOperation,
		route: &Route,
		amount: ethers::types::U256,
	) -> Result<bool> {
		let swaps = self
			.db
			.get_swap_operations(SwapOperationFilter {
				rebalance_operation_id: Some(operation.id),
				..Default::default()
			})
			.await?;

		if let Some(swap) = swaps.last() {
			return match swap.status {
				SwapStatus::Completed => Ok(true),
				SwapStatus::Failed | SwapStatus::Recovering => {
					warn!("Swap leg failed for operation {}, cancelling", operation.id);
					self.transition(operation, RebalanceStatus::Cancelled, None).await?;
					Ok(false)
				},
				// Deposit or execution still settling on the platform side.
				_ => Ok(false),
			};
		}

		let Some(swap_adapter) = self.registry.get_swap(operation.bridge) else {
			warn!("Operation {} needs a swap leg but '{}' has no swap adapter", operation.id, operation.bridge);
			return Ok(false);
		};
		let output_asset = route
			.swap_output_asset
			.ok_or_else(|| anyhow!("swap-and-bridge route without a swap output asset"))?;

		let sender = crate::chain::zodiac::resolve_owner(
			self.settings.chain_or_err(operation.destination_chain_id)?,
			self.chain.signer_address(),
		)?;

		let execution = match swap_adapter.execute_swap(sender, sender, amount, route).await {
			Ok(execution) => execution,
			Err(error) => {
				warn!("Swap execution failed for operation {}: {error}, cancelling", operation.id);
				self.transition(operation, RebalanceStatus::Cancelled, None).await?;
				return Ok(false);
			},
		};

		let swap = self
			.db
			.create_swap_operation(CreateSwapOperation {
				rebalance_operation_id: operation.id,
				platform: operation.bridge.to_string(),
				from_asset: format!("{:#x}", route.asset),
				to_asset: format!("{output_asset:#x}"),
				from_amount: execution.executed_sell_amount.to_string(),
				to_amount: execution.executed_buy_amount.to_string(),
				expected_rate: expected_rate(
					execution.executed_sell_amount,
					execution.executed_buy_amount,
				),
				quote_id: None,
				order_id: Some(execution.order_uid.clone()),
				metadata: serde_json::json!({}),
			})
			.await?;
		self.db
			.update_swap_operation_status(
				swap.id,
				SwapStatus::Completed,
				Some(serde_json::json!({ "orderId": execution.order_uid })),
			)
			.await?;
		Ok(true)
	}

	/// Completes a delivered operation, running the destination callback at
	/// most once: the recorded destination-chain receipt is the guard.
	async fn finalize_delivered(
		&self,
		operation: &RebalanceOperation,
		route: &Route,
		origin_receipt: &OriginReceipt,
	) -> Result<()> {
		let callback_recorded =
			operation.transaction_for_chain(operation.destination_chain_id).is_some();
		if callback_recorded {
			self.transition(operation, RebalanceStatus::Completed, None).await?;
			return Ok(());
		}

		let adapter = self
			.registry
			.get(operation.bridge)
			.ok_or_else(|| anyhow!("adapter vanished mid-pass"))?;
		match adapter.destination_callback(route, origin_receipt).await? {
			None => {
				self.transition(operation, RebalanceStatus::Completed, None).await?;
			},
			Some(callback) => {
				let result = submit_transaction_with_logging(
					self.chain.as_ref(),
					&self.settings,
					callback.transaction,
					callback.memo,
					&format!("destination callback for operation {}", operation.id),
				)
				.await
				.context("submitting destination callback")?;

				let mut tx_hashes = HashMap::new();
				tx_hashes.insert(
					operation.destination_chain_id.to_string(),
					receipt_to_input(&result.receipt),
				);
				self.transition(operation, RebalanceStatus::Completed, Some(tx_hashes)).await?;
			},
		}
		Ok(())
	}

	async fn transition(
		&self,
		operation: &RebalanceOperation,
		status: RebalanceStatus,
		tx_hashes: Option<HashMap<String, TransactionReceiptInput>>,
	) -> Result<()> {
		self.db
			.update_rebalance_operation(
				operation.id,
				UpdateRebalanceOperation { status: Some(status), tx_hashes },
			)
			.await?;
		REBALANCE_OPERATIONS
			.with_label_values(&[&operation.bridge.to_string(), &status.to_string()])
			.inc();
		info!(
			operation = %operation.id,
			bridge = %operation.bridge,
			from = %operation.status,
			to = %status,
			"rebalance operation transition"
		);
		Ok(())
	}
}

fn expected_rate(sell: ethers::types::U256, buy: ethers::types::U256) -> String {
	if sell.is_zero() {
		return "0".to_string();
	}
	// Rate in parts-per-1e18, integer arithmetic only.
	(buy.saturating_mul(ethers::types::U256::exp10(18)) / sell).to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expected_rate_is_parts_per_1e18() {
		use ethers::types::U256;
		assert_eq!(
			expected_rate(U256::exp10(18), U256::exp10(18)),
			U256::exp10(18).to_string()
		);
		assert_eq!(expected_rate(U256::zero(), U256::exp10(18)), "0");
		// Selling 2e18 for 1e18 is a rate of 0.5e18.
		assert_eq!(
			expected_rate(U256::exp10(18) * 2, U256::exp10(18)),
			(U256::exp10(18) / 2).to_string()
		);
	}
}

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

//! The uniform capability set every bridge integration satisfies, and the
//! selection algorithm that picks one. Concrete integrations (Across, CCIP,
//! the CEX withdrawals, CowSwap, ...) live outside the engine and plug in by
//! registering under their tag.

pub mod registry;
pub mod selection;

use ethers::types::{Address, Bytes, U256};
use mark_primitives::{status::BridgeTag, status::TransactionReason, ChainIdentifier};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// One configured lane between two chains for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
	pub origin: ChainIdentifier,
	pub destination: ChainIdentifier,
	/// Asset address on the origin chain.
	pub asset: Address,
	/// For swap-and-bridge lanes, the asset to hold after the swap leg.
	pub swap_output_asset: Option<Address>,
}

/// An unsigned transaction the submission helper can drive on any configured
/// chain. Adapters produce these; they never submit anything themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
	pub chain_id: ChainIdentifier,
	pub to: Address,
	pub value: U256,
	pub data: Bytes,
}

/// One entry of an adapter's ordered send plan. The `Rebalance` entry is the
/// one whose receipt is recorded as the origin transaction; `Approval`,
/// `Unwrap` and friends are prerequisites submitted before it.
#[derive(Debug, Clone)]
pub struct BridgeTransaction {
	pub transaction: NewTransaction,
	pub memo: TransactionReason,
	/// Set when the bridge will move a different amount than requested
	/// (e.g. after fee deduction at source).
	pub effective_amount: Option<U256>,
}

/// A destination-side follow-up (e.g. wrap delivered native into WETH).
#[derive(Debug, Clone)]
pub struct CallbackTransaction {
	pub transaction: NewTransaction,
	pub memo: TransactionReason,
}

/// What the bridge reports for a sent transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
	/// Still in flight; check again next tick.
	Pending,
	/// Funds arrived and the destination-side transaction confirmed.
	Delivered,
	/// Definitive failure; the operation is cancelled, never retried.
	Failed(String),
}

/// The origin receipt details adapters need to track a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginReceipt {
	pub transaction_hash: String,
	pub chain_id: ChainIdentifier,
	pub block_number: Option<u64>,
}

/// Result of a swap leg on a swap-and-bridge lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapExecution {
	pub order_uid: String,
	pub executed_sell_amount: U256,
	pub executed_buy_amount: U256,
}

#[derive(Error, Debug)]
pub enum AdapterError {
	#[error("quote unavailable: {0}")]
	QuoteUnavailable(String),
	#[error("route not supported by this bridge: {0}")]
	UnsupportedRoute(String),
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait BridgeAdapter: Send + Sync {
	fn adapter_type(&self) -> BridgeTag;

	/// The bridge's lower bound for the route, or None when it has none.
	async fn minimum_amount(&self, route: &Route) -> Result<Option<U256>, AdapterError>;

	/// What the recipient would see on destination right now. Pure quote,
	/// no side effects.
	async fn received_amount(&self, amount: U256, route: &Route) -> Result<U256, AdapterError>;

	/// The ordered list of transactions that effect the transfer. Entries
	/// are submitted in order; exactly one carries the `Rebalance` memo.
	async fn send(
		&self,
		sender: Address,
		recipient: Address,
		amount: U256,
		route: &Route,
	) -> Result<Vec<BridgeTransaction>, AdapterError>;

	/// Whether the transfer sent with `origin_receipt` has landed.
	async fn ready_on_destination(
		&self,
		amount: U256,
		route: &Route,
		origin_receipt: &OriginReceipt,
	) -> Result<DeliveryStatus, AdapterError>;

	/// A destination-side transaction to run once delivered, if the bridge
	/// needs one.
	async fn destination_callback(
		&self,
		route: &Route,
		origin_receipt: &OriginReceipt,
	) -> Result<Option<CallbackTransaction>, AdapterError>;
}

/// Extension for swap-and-bridge variants.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait SwapAdapter: Send + Sync {
	async fn execute_swap(
		&self,
		sender: Address,
		recipient: Address,
		amount: U256,
		route: &Route,
	) -> Result<SwapExecution, AdapterError>;
}

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

//! Lifecycle enums for earmarks, rebalance operations and swaps, plus the
//! transaction memo tags shared with the bridge adapters. String forms are the
//! ones persisted, so they are pinned here with strum rather than left to
//! per-call formatting.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EarmarkStatus {
	Pending,
	Ready,
	Completed,
	Cancelled,
	Expired,
}

impl EarmarkStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
	}
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RebalanceStatus {
	Pending,
	AwaitingCallback,
	Completed,
	Cancelled,
	Expired,
}

impl RebalanceStatus {
	/// Terminal rows are never mutated again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
	}
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SwapStatus {
	PendingDeposit,
	DepositConfirmed,
	Processing,
	Completed,
	Failed,
	Recovering,
}

impl SwapStatus {
	/// The linear happy path is pending_deposit → deposit_confirmed →
	/// processing → completed. Any state may fail, and a failed swap may move
	/// to recovering for a withdraw-back flow. Nothing leaves recovering.
	pub fn can_transition_to(&self, next: SwapStatus) -> bool {
		use SwapStatus::*;
		match (self, next) {
			(PendingDeposit, DepositConfirmed) |
			(DepositConfirmed, Processing) |
			(Processing, Completed) |
			(Failed, Recovering) => true,
			(Completed | Recovering, _) => false,
			(_, Failed) => true,
			_ => false,
		}
	}
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationType {
	#[default]
	Bridge,
	SwapAndBridge,
}

/// Why a transaction was submitted. Persisted verbatim on transaction rows
/// and used to label gas-spend metrics.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum TransactionReason {
	Rebalance,
	Approval,
	Unwrap,
	Wrap,
	Stake,
	Callback,
	Purchase,
}

/// Registered bridge adapter tags. Adapters plug in by registration under
/// their tag; the engine never branches on the concrete integration.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BridgeTag {
	Across,
	Ccip,
	Binance,
	Kraken,
	Cowswap,
	Mantle,
	Tac,
	#[serde(rename = "tac-inner")]
	#[strum(serialize = "tac-inner")]
	TacInner,
	Pendle,
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;

	#[test]
	fn status_strings_round_trip() {
		assert_eq!(EarmarkStatus::Pending.to_string(), "pending");
		assert_eq!(RebalanceStatus::AwaitingCallback.to_string(), "awaiting_callback");
		assert_eq!(SwapStatus::PendingDeposit.to_string(), "pending_deposit");
		assert_eq!(OperationType::SwapAndBridge.to_string(), "swap_and_bridge");
		assert_eq!(TransactionReason::Rebalance.to_string(), "Rebalance");
		assert_eq!(BridgeTag::TacInner.to_string(), "tac-inner");

		assert_eq!(
			RebalanceStatus::from_str("awaiting_callback").unwrap(),
			RebalanceStatus::AwaitingCallback
		);
		assert_eq!(BridgeTag::from_str("across").unwrap(), BridgeTag::Across);
		assert_eq!(BridgeTag::from_str("tac-inner").unwrap(), BridgeTag::TacInner);
	}

	#[test]
	fn terminal_statuses() {
		assert!(!RebalanceStatus::Pending.is_terminal());
		assert!(!RebalanceStatus::AwaitingCallback.is_terminal());
		assert!(RebalanceStatus::Completed.is_terminal());
		assert!(RebalanceStatus::Cancelled.is_terminal());
		assert!(RebalanceStatus::Expired.is_terminal());
	}

	#[test]
	fn swap_transitions_are_linear() {
		use SwapStatus::*;
		assert!(PendingDeposit.can_transition_to(DepositConfirmed));
		assert!(DepositConfirmed.can_transition_to(Processing));
		assert!(Processing.can_transition_to(Completed));
		assert!(Processing.can_transition_to(Failed));
		assert!(Failed.can_transition_to(Recovering));

		assert!(!PendingDeposit.can_transition_to(Processing));
		assert!(!Completed.can_transition_to(Failed));
		assert!(!Recovering.can_transition_to(Completed));
	}
}

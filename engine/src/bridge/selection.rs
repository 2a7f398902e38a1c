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

//! Ordered bridge selection. Preferences are tried strictly in the
//! configured order, each against its own slippage tolerance; the first
//! whose quote passes wins. Per-preference failures are logged and skipped;
//! only the caller emits the aggregate failure.

use super::{registry::BridgeRegistry, BridgeAdapter, Route};
use ethers::types::U256;
use mark_primitives::{amounts::slippage_dbps, status::BridgeTag};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct BridgeSelection {
	pub adapter: Arc<dyn BridgeAdapter>,
	/// Realised slippage of the winning quote, deci-basis points.
	pub slippage_dbps: u64,
	pub received_amount: U256,
}

/// Quotes each `(bridge, tolerance)` pair in order and returns the first
/// acceptable one. Returns None when every preference is exhausted.
pub async fn select_bridge(
	registry: &BridgeRegistry,
	route: &Route,
	amount: U256,
	preferences: &[(BridgeTag, u64)],
) -> Option<BridgeSelection> {
	for &(tag, tolerance_dbps) in preferences {
		let Some(adapter) = registry.get(tag) else {
			warn!("Bridge '{tag}' is preferred on {} -> {} but not registered, skipping", route.origin, route.destination);
			continue;
		};

		match adapter.minimum_amount(route).await {
			Ok(Some(minimum)) if amount < minimum => {
				debug!(
					"Bridge '{tag}': amount {amount} below bridge minimum {minimum}, skipping"
				);
				continue;
			},
			Ok(_) => {},
			Err(error) => {
				warn!("Bridge '{tag}': could not fetch minimum amount: {error}, skipping");
				continue;
			},
		}

		let received = match adapter.received_amount(amount, route).await {
			Ok(received) => received,
			Err(error) => {
				warn!("Bridge '{tag}': quote failed: {error}, trying next preference");
				continue;
			},
		};

		let slippage = slippage_dbps(amount, received);
		if slippage > tolerance_dbps {
			debug!(
				"Bridge '{tag}': quoted slippage {slippage} dbps exceeds tolerance \
				{tolerance_dbps} dbps, trying next preference"
			);
			continue;
		}

		return Some(BridgeSelection { adapter, slippage_dbps: slippage, received_amount: received });
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bridge::MockBridgeAdapter;
	use ethers::types::Address;
	use mockall::predicate::eq;

	fn route() -> Route {
		Route {
			origin: 1,
			destination: 10,
			asset: Address::repeat_byte(0xee),
			swap_output_asset: None,
		}
	}

	fn registry_with(adapters: Vec<MockBridgeAdapter>) -> BridgeRegistry {
		let mut registry = BridgeRegistry::new();
		for adapter in adapters {
			registry.register(Arc::new(adapter));
		}
		registry
	}

	fn quoting_adapter(tag: BridgeTag, quoted: &str, expected_amount: &str) -> MockBridgeAdapter {
		let mut adapter = MockBridgeAdapter::new();
		let quoted = U256::from_dec_str(quoted).unwrap();
		adapter.expect_adapter_type().return_const(tag);
		adapter.expect_minimum_amount().returning(|_| Ok(None));
		adapter
			.expect_received_amount()
			.with(eq(U256::from_dec_str(expected_amount).unwrap()), eq(route()))
			.times(1)
			.returning(move |_, _| Ok(quoted));
		adapter
	}

	#[tokio::test]
	async fn accepts_a_one_percent_quote_within_tolerance() {
		// 17e18 in, 16.83e18 quoted: 1% slippage = 10000 dbps.
		let amount = U256::from_dec_str("17000000000000000000").unwrap();
		let registry = registry_with(vec![quoting_adapter(
			BridgeTag::Across,
			"16830000000000000000",
			"17000000000000000000",
		)]);

		let selection =
			select_bridge(&registry, &route(), amount, &[(BridgeTag::Across, 10000)])
				.await
				.unwrap();
		assert_eq!(selection.adapter.adapter_type(), BridgeTag::Across);
		assert_eq!(selection.slippage_dbps, 10000);
	}

	#[tokio::test]
	async fn rejects_when_quoted_slippage_exceeds_tolerance() {
		let amount = U256::from_dec_str("17000000000000000000").unwrap();
		let registry = registry_with(vec![quoting_adapter(
			BridgeTag::Across,
			"16830000000000000000",
			"17000000000000000000",
		)]);

		assert!(select_bridge(&registry, &route(), amount, &[(BridgeTag::Across, 9999)])
			.await
			.is_none());
	}

	#[tokio::test]
	async fn falls_through_to_the_next_preference_in_order() {
		// Preference A quotes a 10% loss, preference B half a percent; B wins
		// and a single selection comes back tagged with it.
		let amount = U256::from_dec_str("17000000000000000000").unwrap();
		let registry = registry_with(vec![
			quoting_adapter(BridgeTag::Across, "15300000000000000000", "17000000000000000000"),
			quoting_adapter(BridgeTag::Ccip, "16915000000000000000", "17000000000000000000"),
		]);

		let selection = select_bridge(
			&registry,
			&route(),
			amount,
			&[(BridgeTag::Across, 10000), (BridgeTag::Ccip, 10000)],
		)
		.await
		.unwrap();
		assert_eq!(selection.adapter.adapter_type(), BridgeTag::Ccip);
		assert_eq!(selection.slippage_dbps, 5000);
	}

	#[tokio::test]
	async fn quote_failure_moves_to_the_next_preference() {
		let amount = U256::from(1_000_000u64);

		let mut failing = MockBridgeAdapter::new();
		failing.expect_adapter_type().return_const(BridgeTag::Across);
		failing.expect_minimum_amount().returning(|_| Ok(None));
		failing.expect_received_amount().times(1).returning(|_, _| {
			Err(crate::bridge::AdapterError::QuoteUnavailable("rate limited".to_string()))
		});

		let mut good = MockBridgeAdapter::new();
		good.expect_adapter_type().return_const(BridgeTag::Ccip);
		good.expect_minimum_amount().returning(|_| Ok(None));
		good.expect_received_amount().times(1).returning(|amount, _| Ok(amount));

		let registry = registry_with(vec![failing, good]);
		let selection = select_bridge(
			&registry,
			&route(),
			amount,
			&[(BridgeTag::Across, 1000), (BridgeTag::Ccip, 1000)],
		)
		.await
		.unwrap();
		assert_eq!(selection.adapter.adapter_type(), BridgeTag::Ccip);
		assert_eq!(selection.slippage_dbps, 0);
	}

	#[tokio::test]
	async fn amount_below_bridge_minimum_is_skipped() {
		let mut adapter = MockBridgeAdapter::new();
		adapter.expect_adapter_type().return_const(BridgeTag::Across);
		adapter
			.expect_minimum_amount()
			.returning(|_| Ok(Some(U256::from(1_000_000u64))));
		adapter.expect_received_amount().never();

		let registry = registry_with(vec![adapter]);
		assert!(select_bridge(
			&registry,
			&route(),
			U256::from(999_999u64),
			&[(BridgeTag::Across, 1000)]
		)
		.await
		.is_none());
	}

	#[tokio::test]
	async fn unregistered_preference_is_skipped() {
		let registry = registry_with(vec![]);
		assert!(select_bridge(
			&registry,
			&route(),
			U256::from(1u64),
			&[(BridgeTag::Pendle, 1000)]
		)
		.await
		.is_none());
	}
}

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

//! The rebalance engine: decides what liquidity to move and drives every
//! move to a terminal state. One pass per tick; the callback sweep runs
//! first (and always), decide/execute only when not paused.

mod callbacks;
mod execute;

pub(crate) use execute::TransferSpec;

use crate::{
	bridge::{registry::BridgeRegistry, Route},
	chain::ChainClient,
	constants::DEFAULT_REBALANCE_TTL,
	db::{rebalance::RebalanceOperation, Database},
	settings::{RouteSettings, Settings},
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};

pub struct RebalanceEngine {
	db: Database,
	chain: Arc<dyn ChainClient>,
	registry: BridgeRegistry,
	settings: Arc<Settings>,
}

impl RebalanceEngine {
	pub fn new(
		db: Database,
		chain: Arc<dyn ChainClient>,
		registry: BridgeRegistry,
		settings: Arc<Settings>,
	) -> Self {
		Self { db, chain, registry, settings }
	}
}

/// The configured route an operation was created from, if it still exists.
fn route_for_operation<'a>(
	settings: &'a Settings,
	operation: &RebalanceOperation,
) -> Option<&'a RouteSettings> {
	settings.routes.iter().find(|route| {
		route.origin == operation.origin_chain_id &&
			route.destination == operation.destination_chain_id &&
			crate::assets::ticker_for_asset(settings, route.origin, &route.asset)
				.is_some_and(|ticker| ticker == operation.ticker_hash)
	})
}

/// Per-route TTL with the 24h default for operations whose route is gone.
fn ttl_for_operation(settings: &Settings, operation: &RebalanceOperation) -> Duration {
	route_for_operation(settings, operation)
		.and_then(|route| route.ttl_seconds)
		.map(Duration::from_secs)
		.unwrap_or(DEFAULT_REBALANCE_TTL)
}

fn is_expired(created_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
	now.signed_duration_since(created_at).num_seconds() > ttl.as_secs() as i64
}

/// The on-wire route of an operation: the asset address comes from the
/// origin chain's configuration.
fn bridge_route(settings: &Settings, operation: &RebalanceOperation) -> Option<Route> {
	let origin = settings.chain(operation.origin_chain_id)?;
	let asset = crate::assets::asset_by_ticker(origin, &operation.ticker_hash)?;
	let swap_output_asset = route_for_operation(settings, operation)
		.filter(|_| operation.operation_type == mark_primitives::status::OperationType::SwapAndBridge)
		.and_then(|route| {
			settings
				.chain(route.destination)
				.and_then(|chain| crate::assets::asset_by_symbol(chain, &route.asset))
				.map(|asset| asset.address)
		});
	Some(Route {
		origin: operation.origin_chain_id,
		destination: operation.destination_chain_id,
		asset: asset.address,
		swap_output_asset,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settings::test_utils::test_settings;
	use mark_primitives::{
		status::{BridgeTag, OperationType, RebalanceStatus},
		TickerHash,
	};
	use uuid::Uuid;

	pub(super) fn operation(origin: u64, destination: u64, ticker: &str) -> RebalanceOperation {
		RebalanceOperation {
			id: Uuid::new_v4(),
			earmark_id: None,
			origin_chain_id: origin,
			destination_chain_id: destination,
			ticker_hash: TickerHash::new(ticker),
			amount: "17000000000000000000".to_string(),
			slippage_dbps: 10000,
			status: RebalanceStatus::Pending,
			bridge: BridgeTag::Across,
			operation_type: OperationType::Bridge,
			recipient: None,
			transactions: None,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		}
	}

	#[test]
	fn ttl_prefers_the_route_override() {
		let mut settings = test_settings();
		settings.routes[0].ttl_seconds = Some(3600);
		// WETH on chain 1 is ticker 0x1234, matching the configured route.
		assert_eq!(
			ttl_for_operation(&settings, &operation(1, 10, "0x1234")),
			Duration::from_secs(3600)
		);
		// No route for this lane: the default applies.
		assert_eq!(
			ttl_for_operation(&settings, &operation(10, 1, "0x1234")),
			DEFAULT_REBALANCE_TTL
		);
	}

	#[test]
	fn expiry_is_strictly_after_the_ttl() {
		let now = Utc::now();
		let ttl = Duration::from_secs(600);
		assert!(!is_expired(now - chrono::Duration::seconds(600), now, ttl));
		assert!(is_expired(now - chrono::Duration::seconds(601), now, ttl));
	}

	#[test]
	fn bridge_route_resolves_the_origin_asset_address() {
		let settings = test_settings();
		let route = bridge_route(&settings, &operation(1, 10, "0x1234")).unwrap();
		assert_eq!(route.origin, 1);
		assert_eq!(route.destination, 10);
		assert!(route.swap_output_asset.is_none());

		assert!(bridge_route(&settings, &operation(1, 10, "0xdead")).is_none());
	}
}

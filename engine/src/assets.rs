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

//! Asset, ticker and decimals lookups over the chain configuration. All
//! ticker hashes are handled lowercase; [`TickerHash`] guarantees that.

use crate::settings::{AssetSettings, ChainSettings, Settings};
use itertools::Itertools;
use mark_primitives::{ChainIdentifier, TickerHash};

/// Deduplicated lowercase list of every configured ticker hash, in stable
/// (sorted) order.
pub fn get_tickers(settings: &Settings) -> Vec<TickerHash> {
	settings
		.chains
		.values()
		.flat_map(|chain| chain.assets.iter().map(|asset| asset.ticker_hash.clone()))
		.unique()
		.sorted_by(|a, b| a.as_str().cmp(b.as_str()))
		.collect()
}

pub fn asset_by_symbol<'a>(chain: &'a ChainSettings, symbol: &str) -> Option<&'a AssetSettings> {
	chain.assets.iter().find(|asset| asset.symbol.eq_ignore_ascii_case(symbol))
}

pub fn asset_by_ticker<'a>(
	chain: &'a ChainSettings,
	ticker: &TickerHash,
) -> Option<&'a AssetSettings> {
	chain.assets.iter().find(|asset| asset.ticker_hash == *ticker)
}

/// Resolves the ticker hash of `(asset symbol, origin chain)`, the route
/// identity used everywhere downstream.
pub fn ticker_for_asset(
	settings: &Settings,
	chain_id: ChainIdentifier,
	symbol: &str,
) -> Option<TickerHash> {
	settings
		.chain(chain_id)
		.and_then(|chain| asset_by_symbol(chain, symbol))
		.map(|asset| asset.ticker_hash.clone())
}

/// Chains that carry the ticker, numerically sorted.
pub fn chains_with_ticker(settings: &Settings, ticker: &TickerHash) -> Vec<ChainIdentifier> {
	settings
		.chain_ids()
		.into_iter()
		.filter(|chain_id| {
			settings.chain(*chain_id).is_some_and(|chain| asset_by_ticker(chain, ticker).is_some())
		})
		.collect()
}

pub fn decimals_for(
	settings: &Settings,
	chain_id: ChainIdentifier,
	ticker: &TickerHash,
) -> Option<u8> {
	settings
		.chain(chain_id)
		.and_then(|chain| asset_by_ticker(chain, ticker))
		.map(|asset| asset.decimals)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settings::test_utils::test_settings;

	#[test]
	fn tickers_are_deduplicated_across_chains() {
		let settings = test_settings();
		// WETH and USDC configured on both chains; two unique tickers.
		let tickers = get_tickers(&settings);
		assert_eq!(tickers, vec![TickerHash::new("0x1234"), TickerHash::new("0x5678")]);
	}

	#[test]
	fn symbol_lookup_is_case_insensitive() {
		let settings = test_settings();
		let chain = settings.chain(1).unwrap();
		assert!(asset_by_symbol(chain, "weth").is_some());
		assert!(asset_by_symbol(chain, "WETH").is_some());
		assert!(asset_by_symbol(chain, "DOGE").is_none());
	}

	#[test]
	fn ticker_resolution_for_route_assets() {
		let settings = test_settings();
		assert_eq!(ticker_for_asset(&settings, 1, "WETH"), Some(TickerHash::new("0x1234")));
		assert_eq!(ticker_for_asset(&settings, 137, "WETH"), None);
	}

	#[test]
	fn chains_with_ticker_spans_the_config() {
		let settings = test_settings();
		assert_eq!(chains_with_ticker(&settings, &TickerHash::new("0x1234")), vec![1, 10]);
		assert!(chains_with_ticker(&settings, &TickerHash::new("0xffff")).is_empty());
	}

	#[test]
	fn decimals_come_from_the_per_chain_asset() {
		let settings = test_settings();
		assert_eq!(decimals_for(&settings, 1, &TickerHash::new("0x5678")), Some(6));
		assert_eq!(decimals_for(&settings, 1, &TickerHash::new("0x1234")), Some(18));
	}
}

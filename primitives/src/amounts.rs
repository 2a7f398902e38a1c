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

//! Exact integer amount handling.
//!
//! On-chain amounts are non-negative integers in the asset's native decimals.
//! The hub normalisation is 18 decimals. Conversions are explicit, and hub →
//! native rounds up on loss of precision so downstream constraints never
//! under-fund.

use ethers::types::U256;
use thiserror::Error;

/// Decimals of the hub-normalised representation.
pub const HUB_DECIMALS: u8 = 18;

/// One whole unit expressed in deci-basis points (10000 dbps = 1%).
pub const DBPS_DENOMINATOR: u64 = 1_000_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmountError {
	#[error("amount '{0}' is not a non-negative integer")]
	Unparseable(String),
	#[error("unsupported asset decimals: {0} (maximum {HUB_DECIMALS})")]
	UnsupportedDecimals(u8),
	#[error("amount overflows 256 bits after normalisation")]
	Overflow,
}

/// Parses a native-decimal amount string. Rejects signs, fractions and
/// anything else that is not a plain base-10 integer.
pub fn parse_amount(amount: &str) -> Result<U256, AmountError> {
	let trimmed = amount.trim();
	if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
		return Err(AmountError::Unparseable(amount.to_string()));
	}
	U256::from_dec_str(trimmed).map_err(|_| AmountError::Unparseable(amount.to_string()))
}

fn scale_factor(decimals: u8) -> Result<U256, AmountError> {
	if decimals > HUB_DECIMALS {
		return Err(AmountError::UnsupportedDecimals(decimals));
	}
	Ok(U256::exp10((HUB_DECIMALS - decimals) as usize))
}

/// Native decimals → 18-decimal hub units. Exact.
pub fn to_hub_amount(amount: U256, decimals: u8) -> Result<U256, AmountError> {
	amount.checked_mul(scale_factor(decimals)?).ok_or(AmountError::Overflow)
}

/// 18-decimal hub units → native decimals, rounding up on any remainder.
pub fn from_hub_amount(hub_amount: U256, decimals: u8) -> Result<U256, AmountError> {
	let factor = scale_factor(decimals)?;
	let (quotient, remainder) = hub_amount.div_mod(factor);
	Ok(if remainder.is_zero() { quotient } else { quotient + U256::one() })
}

/// Realised slippage of a quote, in deci-basis points. A quote that returns
/// more than was sent has zero slippage.
pub fn slippage_dbps(sent: U256, received: U256) -> u64 {
	if sent.is_zero() {
		return 0;
	}
	let lost = sent.saturating_sub(received);
	(lost * U256::from(DBPS_DENOMINATOR) / sent).as_u64()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_rejects_non_integers() {
		assert!(parse_amount("100").is_ok());
		assert!(parse_amount(" 42 ").is_ok());
		for bad in ["", "-1", "+1", "1.5", "0x10", "1e18", "abc"] {
			assert!(parse_amount(bad).is_err(), "expected '{bad}' to be rejected");
		}
	}

	#[test]
	fn hub_round_trip_is_exact() {
		// For d < 18: toHub(a) / 10^(18-d) == a and fromHub(toHub(a)) == a.
		for decimals in [0u8, 6, 8, 12, 17] {
			let amount = U256::from(123_456_789u64);
			let hub = to_hub_amount(amount, decimals).unwrap();
			assert_eq!(hub / U256::exp10((HUB_DECIMALS - decimals) as usize), amount);
			assert_eq!(from_hub_amount(hub, decimals).unwrap(), amount);
		}
	}

	#[test]
	fn hub_conversion_is_identity_at_18_decimals() {
		let amount = U256::from_dec_str("987654321987654321").unwrap();
		assert_eq!(to_hub_amount(amount, 18).unwrap(), amount);
		assert_eq!(from_hub_amount(amount, 18).unwrap(), amount);
	}

	#[test]
	fn hub_to_native_rounds_up() {
		// 1.000000000001 USDC-ish in hub units must not truncate down.
		let hub = U256::from_dec_str("1000000000001000000").unwrap();
		assert_eq!(from_hub_amount(hub, 6).unwrap(), U256::from(1_000_001u64));
		// An exact multiple stays exact.
		let hub = U256::from_dec_str("1000000000000000000").unwrap();
		assert_eq!(from_hub_amount(hub, 6).unwrap(), U256::from(1_000_000u64));
	}

	#[test]
	fn decimals_above_hub_are_rejected() {
		assert_eq!(
			to_hub_amount(U256::one(), 19).unwrap_err(),
			AmountError::UnsupportedDecimals(19)
		);
	}

	#[test]
	fn half_a_percent_is_five_thousand_dbps() {
		let sent = U256::from(10_000u64);
		let received = sent * U256::from(9950u64) / U256::from(10_000u64);
		let slippage = slippage_dbps(sent, received);
		assert_eq!(slippage, 5000);
		// Passes a tolerance of 5000 dbps, fails 4999.
		assert!(slippage <= 5000);
		assert!(slippage > 4999);
	}

	#[test]
	fn positive_slippage_clamps_to_zero() {
		assert_eq!(slippage_dbps(U256::from(100u64), U256::from(101u64)), 0);
		assert_eq!(slippage_dbps(U256::zero(), U256::zero()), 0);
	}
}

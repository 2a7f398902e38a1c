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

//! Invoice validation. Every rejection carries one documented reason; a
//! rejected invoice is acknowledged and never retried.

use super::everclear::Invoice;
use crate::{assets, settings::Settings};
use chrono::{DateTime, Utc};
use ethers::types::Address;
use mark_primitives::{amounts::parse_amount, ChainIdentifier, TickerHash};
use std::str::FromStr;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RejectionReason {
	/// Missing or malformed identifiers.
	InvalidFormat,
	/// Amount not a positive integer.
	InvalidAmount,
	/// The owner is the agent itself (Safe-resolved where applicable).
	InvalidOwner,
	/// No destination overlaps the configured settlement domains.
	InvalidDestinations,
	/// Ticker unknown in configuration.
	InvalidTickers,
	/// No eligible destination has aged past its purchase threshold.
	InvalidAge,
}

/// An invoice that passed every check, with fields parsed for planning.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidInvoice {
	pub id: String,
	pub owner: String,
	/// 18-dec hub units.
	pub amount: ethers::types::U256,
	pub ticker_hash: TickerHash,
	/// Supported destinations that passed the age rule, in invoice order.
	pub eligible_destinations: Vec<ChainIdentifier>,
}

/// Every address the agent settles from: the signer plus any configured
/// Safes. Invoices owned by any of them are the agent's own.
fn own_addresses(settings: &Settings) -> Vec<Address> {
	let mut owners = vec![settings.own_address];
	for chain in settings.chains.values() {
		if let Some(safe) = chain.gnosis_safe_address {
			owners.push(safe);
		}
	}
	owners
}

pub fn validate_invoice(
	settings: &Settings,
	invoice: &Invoice,
	now: DateTime<Utc>,
) -> Result<ValidInvoice, RejectionReason> {
	if invoice.id.trim().is_empty() ||
		invoice.owner.trim().is_empty() ||
		invoice.ticker_hash.trim().is_empty()
	{
		return Err(RejectionReason::InvalidFormat);
	}

	let amount = parse_amount(&invoice.amount).map_err(|_| RejectionReason::InvalidAmount)?;
	if amount.is_zero() {
		return Err(RejectionReason::InvalidAmount);
	}

	if let Ok(owner) = Address::from_str(&invoice.owner) {
		if own_addresses(settings).contains(&owner) {
			return Err(RejectionReason::InvalidOwner);
		}
	}

	let supported = invoice
		.destinations
		.iter()
		.filter_map(|destination| destination.parse::<ChainIdentifier>().ok())
		.filter(|destination| settings.supported_settlement_domains.contains(destination))
		.collect::<Vec<_>>();
	if supported.is_empty() {
		return Err(RejectionReason::InvalidDestinations);
	}

	let ticker_hash = TickerHash::new(&invoice.ticker_hash);
	if !assets::get_tickers(settings).contains(&ticker_hash) {
		return Err(RejectionReason::InvalidTickers);
	}

	// Liveness: a destination is only eligible once the invoice has been
	// outstanding longer than that chain's invoiceAge.
	let age_seconds = invoice
		.hub_invoice_enqueued_timestamp
		.map(|enqueued| now.timestamp().saturating_sub(enqueued))
		.unwrap_or(i64::MAX);
	let eligible_destinations = supported
		.into_iter()
		.filter(|destination| {
			let required = settings
				.chain(*destination)
				.and_then(|chain| chain.invoice_age)
				.unwrap_or(0);
			age_seconds >= required as i64
		})
		.collect::<Vec<_>>();
	if eligible_destinations.is_empty() {
		return Err(RejectionReason::InvalidAge);
	}

	Ok(ValidInvoice {
		id: invoice.id.clone(),
		owner: invoice.owner.clone(),
		amount,
		ticker_hash,
		eligible_destinations,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settings::test_utils::test_settings;

	fn invoice() -> Invoice {
		Invoice {
			id: "inv-001".to_string(),
			owner: "0x00000000000000000000000000000000000000bb".to_string(),
			amount: "100000000000000000000".to_string(),
			ticker_hash: "0x1234".to_string(),
			destinations: vec!["1".to_string(), "10".to_string()],
			hub_invoice_enqueued_timestamp: Some(Utc::now().timestamp() - 3600),
		}
	}

	#[test]
	fn a_well_formed_invoice_passes() {
		let valid = validate_invoice(&test_settings(), &invoice(), Utc::now()).unwrap();
		assert_eq!(valid.id, "inv-001");
		assert_eq!(valid.eligible_destinations, vec![1, 10]);
	}

	#[test]
	fn empty_identifiers_are_invalid_format() {
		let mut bad = invoice();
		bad.id = " ".to_string();
		assert_eq!(
			validate_invoice(&test_settings(), &bad, Utc::now()),
			Err(RejectionReason::InvalidFormat)
		);
	}

	#[test]
	fn non_positive_amounts_are_rejected() {
		for amount in ["0", "-5", "1.5", "abc", ""] {
			let mut bad = invoice();
			bad.amount = amount.to_string();
			assert_eq!(
				validate_invoice(&test_settings(), &bad, Utc::now()),
				Err(RejectionReason::InvalidAmount),
				"amount '{amount}'"
			);
		}
	}

	#[test]
	fn own_invoices_are_rejected() {
		let mut bad = invoice();
		// test_settings owns 0xaa..aa.
		bad.owner = format!("{:#x}", Address::repeat_byte(0xaa));
		assert_eq!(
			validate_invoice(&test_settings(), &bad, Utc::now()),
			Err(RejectionReason::InvalidOwner)
		);
	}

	#[test]
	fn safe_owned_invoices_are_rejected() {
		let mut settings = test_settings();
		settings.chains.get_mut("1").unwrap().gnosis_safe_address =
			Some(Address::repeat_byte(0xcc));
		let mut bad = invoice();
		bad.owner = format!("{:#x}", Address::repeat_byte(0xcc));
		assert_eq!(
			validate_invoice(&settings, &bad, Utc::now()),
			Err(RejectionReason::InvalidOwner)
		);
	}

	#[test]
	fn unsupported_destinations_are_rejected() {
		let mut bad = invoice();
		bad.destinations = vec!["137".to_string()];
		assert_eq!(
			validate_invoice(&test_settings(), &bad, Utc::now()),
			Err(RejectionReason::InvalidDestinations)
		);
	}

	#[test]
	fn unknown_tickers_are_rejected() {
		let mut bad = invoice();
		bad.ticker_hash = "0xffff".to_string();
		assert_eq!(
			validate_invoice(&test_settings(), &bad, Utc::now()),
			Err(RejectionReason::InvalidTickers)
		);
	}

	#[test]
	fn young_invoices_are_rejected_until_aged() {
		// test_settings requires 600s of age on both chains.
		let mut young = invoice();
		young.hub_invoice_enqueued_timestamp = Some(Utc::now().timestamp() - 10);
		assert_eq!(
			validate_invoice(&test_settings(), &young, Utc::now()),
			Err(RejectionReason::InvalidAge)
		);
	}
}

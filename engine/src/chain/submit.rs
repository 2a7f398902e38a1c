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

//! The sole entry point for sending any transaction. Routes through the
//! Zodiac module when the chain is configured for it, waits for
//! confirmation, fails fast on reverted receipts, and feeds the gas-spend
//! metric. Callers get every receipt field back.

use super::{erc20, zodiac, ChainClient, TxReceipt};
use crate::{
	bridge::NewTransaction,
	db::transactions::{TransactionMetadata, TransactionReceiptInput},
	metrics::GAS_SPENT,
	settings::{Settings, WalletConfig},
};
use anyhow::{bail, Result};
use ethers::types::{Address, U256};
use mark_primitives::{status::TransactionReason, ChainIdentifier};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionType {
	Eoa,
	Zodiac,
}

#[derive(Debug, Clone)]
pub struct SubmissionResult {
	pub hash: String,
	pub submission_type: SubmissionType,
	pub receipt: TxReceipt,
}

/// Submits `tx` on its chain, EOA or Zodiac-routed as configured. Fails if
/// the receipt status is not success.
pub async fn submit_transaction_with_logging(
	client: &dyn ChainClient,
	settings: &Settings,
	tx: NewTransaction,
	reason: TransactionReason,
	context: &str,
) -> Result<SubmissionResult> {
	let chain_id = tx.chain_id;
	let chain = settings.chain_or_err(chain_id)?;

	let (submission_type, outgoing) = match chain.wallet_config()? {
		WalletConfig::Eoa => (SubmissionType::Eoa, tx),
		WalletConfig::Zodiac { module, role_key, .. } =>
			(SubmissionType::Zodiac, zodiac::wrap_with_role(module, role_key, &tx)),
	};

	let receipt = client.send_transaction(&outgoing).await?;
	if !receipt.is_success() {
		bail!(
			"{context}: transaction {} reverted on chain {chain_id} (status {:?})",
			receipt.transaction_hash,
			receipt.status
		);
	}

	if let (Some(gas_used), Some(gas_price)) = (receipt.gas_used, receipt.effective_gas_price) {
		GAS_SPENT
			.with_label_values(&[&chain_id.to_string(), &reason.to_string()])
			.add((gas_used * gas_price).as_u128() as f64);
	}

	info!(
		chain_id,
		reason = %reason,
		hash = %receipt.transaction_hash,
		submission = ?submission_type,
		"{context}: transaction confirmed"
	);

	Ok(SubmissionResult { hash: receipt.transaction_hash.clone(), submission_type, receipt })
}

/// Shapes a confirmed receipt for persistence.
pub fn receipt_to_input(receipt: &TxReceipt) -> TransactionReceiptInput {
	TransactionReceiptInput {
		transaction_hash: receipt.transaction_hash.clone(),
		from: receipt.from.clone(),
		to: receipt.to.clone(),
		cumulative_gas_used: receipt.cumulative_gas_used.to_string(),
		effective_gas_price: receipt
			.effective_gas_price
			.map(|price| price.to_string())
			.unwrap_or_default(),
		metadata: TransactionMetadata {
			block_number: receipt.block_number,
			status: receipt.status,
			confirmations: Some(receipt.confirmations),
		},
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalResult {
	pub approval_needed: bool,
	pub zero_approval_hash: Option<String>,
	pub approval_hash: Option<String>,
}

/// Reads the owner's current allowance (Zodiac-aware) and submits the
/// (zero-then-)approve transactions a transfer of `amount` requires. USDT
/// rejects approvals over a non-zero allowance, so it gets `approve(0)`
/// first.
pub async fn check_and_approve_erc20(
	client: &dyn ChainClient,
	settings: &Settings,
	chain_id: ChainIdentifier,
	token: Address,
	spender: Address,
	amount: U256,
	context: &str,
) -> Result<ApprovalResult> {
	let chain = settings.chain_or_err(chain_id)?;
	let owner = zodiac::resolve_owner(chain, client.signer_address())?;

	let current = erc20::allowance(client, chain_id, token, owner, spender).await?;
	if current >= amount {
		return Ok(ApprovalResult::default());
	}

	let requires_zero_first = !current.is_zero() &&
		chain
			.assets
			.iter()
			.any(|asset| asset.address == token && asset.symbol.eq_ignore_ascii_case("USDT"));

	let zero_approval_hash = if requires_zero_first {
		let result = submit_transaction_with_logging(
			client,
			settings,
			NewTransaction {
				chain_id,
				to: token,
				value: U256::zero(),
				data: erc20::approve_calldata(spender, U256::zero()),
			},
			TransactionReason::Approval,
			context,
		)
		.await?;
		Some(result.hash)
	} else {
		None
	};

	let result = submit_transaction_with_logging(
		client,
		settings,
		NewTransaction {
			chain_id,
			to: token,
			value: U256::zero(),
			data: erc20::approve_calldata(spender, amount),
		},
		TransactionReason::Approval,
		context,
	)
	.await?;

	Ok(ApprovalResult {
		approval_needed: true,
		zero_approval_hash,
		approval_hash: Some(result.hash),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		chain::MockChainClient,
		settings::{test_utils, AssetSettings},
	};
	use ethers::abi::Token;
	use mark_primitives::TickerHash;

	fn success_receipt(hash: &str) -> TxReceipt {
		TxReceipt {
			transaction_hash: hash.to_string(),
			from: "0xfrom".to_string(),
			to: "0xto".to_string(),
			block_number: Some(100),
			status: Some(1),
			gas_used: Some(U256::from(21000u64)),
			cumulative_gas_used: U256::from(42000u64),
			effective_gas_price: Some(U256::from(1_000_000_000u64)),
			logs: vec![],
			confirmations: 1,
		}
	}

	fn encoded_uint(value: u64) -> ethers::types::Bytes {
		ethers::abi::encode(&[Token::Uint(U256::from(value))]).into()
	}

	#[tokio::test]
	async fn reverted_receipt_fails_fast() {
		let mut client = MockChainClient::new();
		client.expect_send_transaction().times(1).returning(|_| {
			let mut receipt = success_receipt("0xdead");
			receipt.status = Some(0);
			Ok(receipt)
		});

		let settings = test_utils::test_settings();
		let tx = NewTransaction {
			chain_id: 1,
			to: Address::repeat_byte(0xee),
			value: U256::zero(),
			data: Default::default(),
		};
		assert!(submit_transaction_with_logging(
			&client,
			&settings,
			tx,
			TransactionReason::Rebalance,
			"test"
		)
		.await
		.is_err());
	}

	#[tokio::test]
	async fn sufficient_allowance_needs_no_approval() {
		let mut client = MockChainClient::new();
		client.expect_signer_address().return_const(Address::repeat_byte(0xaa));
		client.expect_call().times(1).returning(|_, _, _| Ok(encoded_uint(5000)));
		client.expect_send_transaction().never();

		let settings = test_utils::test_settings();
		let result = check_and_approve_erc20(
			&client,
			&settings,
			1,
			Address::repeat_byte(0x11),
			Address::repeat_byte(0x22),
			U256::from(1000u64),
			"test",
		)
		.await
		.unwrap();
		assert_eq!(result, ApprovalResult::default());
	}

	#[tokio::test]
	async fn insufficient_allowance_triggers_a_single_approval() {
		let mut client = MockChainClient::new();
		client.expect_signer_address().return_const(Address::repeat_byte(0xaa));
		client.expect_call().times(1).returning(|_, _, _| Ok(encoded_uint(0)));
		client
			.expect_send_transaction()
			.times(1)
			.returning(|_| Ok(success_receipt("0xapprove")));

		let settings = test_utils::test_settings();
		let result = check_and_approve_erc20(
			&client,
			&settings,
			1,
			Address::repeat_byte(0x11),
			Address::repeat_byte(0x22),
			U256::from(1000u64),
			"test",
		)
		.await
		.unwrap();
		assert!(result.approval_needed);
		assert!(result.zero_approval_hash.is_none());
		assert_eq!(result.approval_hash.as_deref(), Some("0xapprove"));
	}

	#[tokio::test]
	async fn usdt_with_existing_allowance_is_zeroed_first() {
		let mut settings = test_utils::test_settings();
		settings.chains.get_mut("1").unwrap().assets.push(AssetSettings {
			address: Address::repeat_byte(0x77),
			symbol: "USDT".to_string(),
			decimals: 6,
			ticker_hash: TickerHash::new("0x9999"),
			is_native: false,
			balance_threshold: None,
		});

		let mut client = MockChainClient::new();
		client.expect_signer_address().return_const(Address::repeat_byte(0xaa));
		// Existing non-zero allowance, below the required amount.
		client.expect_call().times(1).returning(|_, _, _| Ok(encoded_uint(10)));
		// Two submissions: approve(0), then approve(amount).
		let mut sequence = mockall::Sequence::new();
		client
			.expect_send_transaction()
			.times(1)
			.in_sequence(&mut sequence)
			.withf(|tx| {
				// approve(spender, 0): last 32 bytes are zero.
				tx.data[tx.data.len() - 32..].iter().all(|b| *b == 0)
			})
			.returning(|_| Ok(success_receipt("0xzero")));
		client
			.expect_send_transaction()
			.times(1)
			.in_sequence(&mut sequence)
			.returning(|_| Ok(success_receipt("0xapprove")));

		let result = check_and_approve_erc20(
			&client,
			&settings,
			1,
			Address::repeat_byte(0x77),
			Address::repeat_byte(0x22),
			U256::from(1000u64),
			"test",
		)
		.await
		.unwrap();
		assert!(result.approval_needed);
		assert_eq!(result.zero_approval_hash.as_deref(), Some("0xzero"));
		assert_eq!(result.approval_hash.as_deref(), Some("0xapprove"));
	}
}

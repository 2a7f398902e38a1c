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

//! Zodiac/Safe owner resolution and call wrapping. On a Zodiac-routed chain
//! the Safe is the owner of all funds and the role module is the actual
//! sender; the raw signer key only authorises the module. Call sites never
//! branch on wallet type: they resolve the owner and wrap through here.

use crate::{
	bridge::NewTransaction,
	settings::{ChainSettings, WalletConfig},
};
use anyhow::Result;
use ethers::{
	abi::Token,
	types::{Address, Bytes, H256, U256},
	utils::id,
};

/// The address that holds and receives funds on this chain: the Safe when
/// Zodiac is configured, otherwise the signer itself.
pub fn resolve_owner(chain: &ChainSettings, signer: Address) -> Result<Address> {
	Ok(match chain.wallet_config()? {
		WalletConfig::Eoa => signer,
		WalletConfig::Zodiac { safe, .. } => safe,
	})
}

/// Wraps a call into `execTransactionWithRole` on the configured role
/// module. Operation is always CALL; the module reverts on failure so the
/// outer receipt status is authoritative.
pub fn wrap_with_role(module: Address, role_key: H256, inner: &NewTransaction) -> NewTransaction {
	let calldata = encode_exec_transaction_with_role(
		inner.to,
		inner.value,
		inner.data.clone(),
		role_key,
	);
	NewTransaction { chain_id: inner.chain_id, to: module, value: U256::zero(), data: calldata }
}

fn encode_exec_transaction_with_role(
	to: Address,
	value: U256,
	data: Bytes,
	role_key: H256,
) -> Bytes {
	let mut calldata =
		id("execTransactionWithRole(address,uint256,bytes,uint8,bytes32,bool)").to_vec();
	calldata.extend(ethers::abi::encode(&[
		Token::Address(to),
		Token::Uint(value),
		Token::Bytes(data.to_vec()),
		// Operation: 0 = CALL.
		Token::Uint(U256::zero()),
		Token::FixedBytes(role_key.as_bytes().to_vec()),
		// shouldRevert: surface inner failures in the outer receipt.
		Token::Bool(true),
	]));
	calldata.into()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settings::test_utils;

	#[test]
	fn eoa_chain_resolves_to_the_signer() {
		let chain = test_utils::test_chain(vec![]);
		let signer = Address::repeat_byte(0xaa);
		assert_eq!(resolve_owner(&chain, signer).unwrap(), signer);
	}

	#[test]
	fn zodiac_chain_resolves_to_the_safe() {
		let mut chain = test_utils::test_chain(vec![]);
		chain.zodiac_role_module_address = Some(Address::repeat_byte(0x01));
		chain.zodiac_role_key = Some(
			"0x2222222222222222222222222222222222222222222222222222222222222222".to_string(),
		);
		chain.gnosis_safe_address = Some(Address::repeat_byte(0x02));

		assert_eq!(
			resolve_owner(&chain, Address::repeat_byte(0xaa)).unwrap(),
			Address::repeat_byte(0x02)
		);
	}

	#[test]
	fn wrapped_call_targets_the_module_with_zero_value() {
		let inner = NewTransaction {
			chain_id: 1,
			to: Address::repeat_byte(0xee),
			value: U256::from(7u64),
			data: Bytes::from(vec![0xde, 0xad]),
		};
		let module = Address::repeat_byte(0x01);
		let role_key = H256::repeat_byte(0x22);

		let wrapped = wrap_with_role(module, role_key, &inner);
		assert_eq!(wrapped.to, module);
		assert_eq!(wrapped.value, U256::zero());
		assert_eq!(wrapped.chain_id, 1);
		// Selector of execTransactionWithRole(address,uint256,bytes,uint8,bytes32,bool).
		assert_eq!(
			&wrapped.data[..4],
			&id("execTransactionWithRole(address,uint256,bytes,uint8,bytes32,bool)")[..]
		);
		// The inner calldata is embedded in the wrapped payload.
		let hex_wrapped = hex::encode(&wrapped.data);
		assert!(hex_wrapped.contains("dead"));
		// So is the role key.
		assert!(hex_wrapped.contains(&"22".repeat(32)));
	}
}

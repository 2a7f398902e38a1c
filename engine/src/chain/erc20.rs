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

//! Hand-rolled ERC20 call encoding over the chain client. The engine only
//! needs balanceOf/allowance/approve, so a full contract binding would be
//! dead weight.

use super::ChainClient;
use anyhow::{anyhow, Result};
use ethers::{
	abi::{decode, ParamType, Token},
	types::{Address, Bytes, U256},
	utils::id,
};
use mark_primitives::ChainIdentifier;

fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
	let mut calldata = id(signature).to_vec();
	calldata.extend(ethers::abi::encode(tokens));
	calldata.into()
}

fn decode_uint(raw: &Bytes) -> Result<U256> {
	let tokens = decode(&[ParamType::Uint(256)], raw)?;
	tokens
		.into_iter()
		.next()
		.and_then(Token::into_uint)
		.ok_or_else(|| anyhow!("empty return data for uint256 call"))
}

pub fn approve_calldata(spender: Address, amount: U256) -> Bytes {
	encode_call("approve(address,uint256)", &[Token::Address(spender), Token::Uint(amount)])
}

pub async fn balance_of(
	client: &dyn ChainClient,
	chain_id: ChainIdentifier,
	token: Address,
	owner: Address,
) -> Result<U256> {
	let data = encode_call("balanceOf(address)", &[Token::Address(owner)]);
	decode_uint(&client.call(chain_id, token, data).await?)
}

pub async fn allowance(
	client: &dyn ChainClient,
	chain_id: ChainIdentifier,
	token: Address,
	owner: Address,
	spender: Address,
) -> Result<U256> {
	let data =
		encode_call("allowance(address,address)", &[Token::Address(owner), Token::Address(spender)]);
	decode_uint(&client.call(chain_id, token, data).await?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn approve_calldata_has_the_canonical_selector() {
		let data = approve_calldata(Address::repeat_byte(0x02), U256::from(1000u64));
		// 0x095ea7b3 is approve(address,uint256).
		assert_eq!(&data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
		assert_eq!(data.len(), 4 + 32 + 32);
	}

	#[test]
	fn decode_uint_round_trips() {
		let encoded = Bytes::from(ethers::abi::encode(&[Token::Uint(U256::from(42u64))]));
		assert_eq!(decode_uint(&encoded).unwrap(), U256::from(42u64));
	}

	#[test]
	fn decode_uint_rejects_empty_data() {
		assert!(decode_uint(&Bytes::default()).is_err());
	}
}

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

//! EVM chain access: one signing client per configured chain, plus the
//! read-only calls the balance service and ERC20 helpers build on. Non-EVM
//! signers (Solana, Tron) are wired outside the engine and only consumed
//! through the same interface.

pub mod erc20;
pub mod submit;
pub mod zodiac;

use crate::{bridge::NewTransaction, constants::TX_CONFIRMATIONS, settings::Settings};
use anyhow::{anyhow, Context, Result};
use ethers::{
	middleware::SignerMiddleware,
	providers::{Http, Middleware, Provider},
	signers::{LocalWallet, Signer},
	types::{
		transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest,
		NameOrAddress, TransactionReceipt, U256,
	},
};
use mark_primitives::ChainIdentifier;
use std::{collections::HashMap, sync::Arc};

#[cfg(test)]
use mockall::automock;

/// The receipt fields surfaced to every caller of the submission helper.
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
	pub transaction_hash: String,
	pub from: String,
	pub to: String,
	pub block_number: Option<u64>,
	pub status: Option<u64>,
	pub gas_used: Option<U256>,
	pub cumulative_gas_used: U256,
	pub effective_gas_price: Option<U256>,
	pub logs: Vec<ethers::types::Log>,
	pub confirmations: u64,
}

impl From<TransactionReceipt> for TxReceipt {
	fn from(receipt: TransactionReceipt) -> Self {
		Self {
			transaction_hash: format!("{:#x}", receipt.transaction_hash),
			from: format!("{:#x}", receipt.from),
			to: receipt.to.map(|to| format!("{to:#x}")).unwrap_or_default(),
			block_number: receipt.block_number.map(|n| n.as_u64()),
			status: receipt.status.map(|s| s.as_u64()),
			gas_used: receipt.gas_used,
			cumulative_gas_used: receipt.cumulative_gas_used,
			effective_gas_price: receipt.effective_gas_price,
			logs: receipt.logs,
			confirmations: TX_CONFIRMATIONS as u64,
		}
	}
}

impl TxReceipt {
	pub fn is_success(&self) -> bool {
		self.status == Some(1)
	}
}

/// Everything the engine needs from a chain. Mocked in tests; implemented
/// over ethers for EVM chains.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
	/// The raw signer address (not the Safe; owner resolution is a layer up).
	fn signer_address(&self) -> Address;

	/// Signs, submits and waits for confirmation. Does not inspect the
	/// receipt status; the submission helper fails fast on reverts.
	async fn send_transaction(&self, tx: &NewTransaction) -> Result<TxReceipt>;

	/// eth_call against the latest block.
	async fn call(&self, chain_id: ChainIdentifier, to: Address, data: Bytes) -> Result<Bytes>;

	async fn native_balance(&self, chain_id: ChainIdentifier, owner: Address) -> Result<U256>;
}

type SigningClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EvmChainService {
	signer_address: Address,
	clients: HashMap<ChainIdentifier, Arc<SigningClient>>,
}

impl EvmChainService {
	/// Builds one signing client per configured chain from the first
	/// provider of each.
	pub fn new(settings: &Settings) -> Result<Self> {
		let wallet = settings
			.signer
			.private_key
			.expose()
			.trim_start_matches("0x")
			.parse::<LocalWallet>()
			.context("signer private key is not a valid secp256k1 key")?;
		let signer_address = wallet.address();

		let mut clients = HashMap::new();
		for chain_id in settings.chain_ids() {
			let chain = settings.chain_or_err(chain_id)?;
			let endpoint = chain
				.providers
				.first()
				.ok_or_else(|| anyhow!("chain {chain_id} has no providers configured"))?;
			let provider = Provider::<Http>::try_from(endpoint.expose())
				.with_context(|| format!("invalid provider url for chain {chain_id}: {endpoint}"))?;
			let client =
				SignerMiddleware::new(provider, wallet.clone().with_chain_id(chain_id));
			clients.insert(chain_id, Arc::new(client));
		}

		// The hub is read-only for the engine but still needs a client for
		// custodied-balance reads.
		if !clients.contains_key(&settings.hub.domain) {
			if let Some(endpoint) = settings.hub.providers.first() {
				let provider = Provider::<Http>::try_from(endpoint.expose())
					.with_context(|| format!("invalid hub provider url: {endpoint}"))?;
				clients.insert(
					settings.hub.domain,
					Arc::new(SignerMiddleware::new(
						provider,
						wallet.clone().with_chain_id(settings.hub.domain),
					)),
				);
			}
		}

		Ok(Self { signer_address, clients })
	}

	fn client(&self, chain_id: ChainIdentifier) -> Result<&Arc<SigningClient>> {
		self.clients
			.get(&chain_id)
			.ok_or_else(|| anyhow!("no RPC client for chain {chain_id}"))
	}
}

#[async_trait::async_trait]
impl ChainClient for EvmChainService {
	fn signer_address(&self) -> Address {
		self.signer_address
	}

	async fn send_transaction(&self, tx: &NewTransaction) -> Result<TxReceipt> {
		let client = self.client(tx.chain_id)?;
		let request = Eip1559TransactionRequest::new()
			.to(NameOrAddress::Address(tx.to))
			.value(tx.value)
			.data(tx.data.clone());

		let pending = client
			.send_transaction(TypedTransaction::Eip1559(request), None)
			.await
			.with_context(|| format!("submitting transaction on chain {}", tx.chain_id))?;

		let receipt = pending
			.confirmations(TX_CONFIRMATIONS)
			.await
			.with_context(|| format!("awaiting confirmation on chain {}", tx.chain_id))?
			.ok_or_else(|| anyhow!("transaction dropped from the mempool on chain {}", tx.chain_id))?;

		Ok(receipt.into())
	}

	async fn call(&self, chain_id: ChainIdentifier, to: Address, data: Bytes) -> Result<Bytes> {
		let client = self.client(chain_id)?;
		let request = Eip1559TransactionRequest::new().to(NameOrAddress::Address(to)).data(data);
		Ok(client
			.call(&TypedTransaction::Eip1559(request), None)
			.await
			.with_context(|| format!("eth_call on chain {chain_id}"))?)
	}

	async fn native_balance(&self, chain_id: ChainIdentifier, owner: Address) -> Result<U256> {
		let client = self.client(chain_id)?;
		Ok(client
			.get_balance(owner, None)
			.await
			.with_context(|| format!("reading native balance on chain {chain_id}"))?)
	}
}

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

//! The invoice purchase pipeline: backfill missed invoices over the durable
//! cursor, detect settlements, and consume the queue into purchase plans.
//! A purchase either executes directly against idle inventory or creates an
//! earmark plus the rebalance operations that refill the designated chain.

pub mod everclear;
pub mod validation;

use crate::{
	assets,
	balance::{get_available_balance_less_earmarks, get_mark_balances_for_ticker},
	chain::{
		submit::{check_and_approve_erc20, submit_transaction_with_logging},
		zodiac::resolve_owner,
		ChainClient,
	},
	constants::CONSUME_BATCH_SIZE,
	db::{
		earmarks::{CreateEarmark, Earmark, EarmarkFilter},
		Database,
	},
	metrics::INVOICES_REJECTED,
	queue::EventQueue,
	rebalance::{RebalanceEngine, TransferSpec},
	settings::Settings,
};
use anyhow::{anyhow, Result};
use chrono::Utc;
use ethers::{abi::Token, types::U256, utils::id};
use everclear::{EverclearApi, Invoice};
use mark_primitives::{
	amounts::{from_hub_amount, parse_amount, to_hub_amount},
	events::{EventPriority, EventType, QueuedEvent},
	status::{EarmarkStatus, RebalanceStatus, TransactionReason},
	ChainIdentifier,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validation::validate_invoice;

pub struct InvoicePipeline {
	db: Database,
	chain: Arc<dyn ChainClient>,
	queue: EventQueue,
	everclear: Arc<dyn EverclearApi>,
	engine: Arc<RebalanceEngine>,
	settings: Arc<Settings>,
}

impl InvoicePipeline {
	pub fn new(
		db: Database,
		chain: Arc<dyn ChainClient>,
		queue: EventQueue,
		everclear: Arc<dyn EverclearApi>,
		engine: Arc<RebalanceEngine>,
		settings: Arc<Settings>,
	) -> Self {
		Self { db, chain, queue, everclear, engine, settings }
	}

	/// Polls the hub for invoices the webhooks may have dropped. API errors
	/// are warnings; the tick continues.
	pub async fn backfill(&self) -> Result<()> {
		let cursor = self.queue.get_backfill_cursor().await?;
		let page = match self.everclear.fetch_invoices(cursor).await {
			Ok(page) => page,
			Err(error) => {
				warn!("Invoice backfill poll failed: {error:#}");
				return Ok(());
			},
		};

		for invoice in &page.invoices {
			if self.queue.has_event(EventType::InvoiceEnqueued, &invoice.id).await? {
				continue;
			}
			self.queue
				.enqueue(
					&QueuedEvent::new(
						invoice.id.clone(),
						EventType::InvoiceEnqueued,
						serde_json::to_value(invoice)?,
						EventPriority::Normal,
						Utc::now().timestamp_millis(),
					)
					.with_max_retries(self.settings.max_retries),
				)
				.await?;
			debug!("Backfilled invoice {}", invoice.id);
		}

		if let Some(next_cursor) = &page.next_cursor {
			self.queue.set_backfill_cursor(next_cursor).await?;
		}
		Ok(())
	}

	/// Re-fetches every outstanding purchase; a 404 means the invoice has
	/// settled, which is queued for completion. Other errors are warnings.
	pub async fn settlement_backfill(&self) -> Result<()> {
		let outstanding = self
			.db
			.get_earmarks(EarmarkFilter { status: Some(EarmarkStatus::Ready), ..Default::default() })
			.await?;

		for earmark in outstanding {
			match self.everclear.fetch_invoice(&earmark.invoice_id).await {
				Ok(None) => {
					if !self
						.queue
						.has_event(EventType::SettlementEnqueued, &earmark.invoice_id)
						.await?
					{
						self.queue
							.enqueue(
								&QueuedEvent::new(
									earmark.invoice_id.clone(),
									EventType::SettlementEnqueued,
									serde_json::json!({ "invoiceId": earmark.invoice_id }),
									EventPriority::High,
									Utc::now().timestamp_millis(),
								)
								.with_max_retries(self.settings.max_retries),
							)
							.await?;
						info!("Invoice {} settled, queued for completion", earmark.invoice_id);
					}
				},
				Ok(Some(_)) => {},
				Err(error) =>
					warn!("Settlement poll failed for invoice {}: {error:#}", earmark.invoice_id),
			}
		}
		Ok(())
	}

	/// Consumes a bounded batch per event type. Settlements are always
	/// processed; invoice purchasing honours the purchase kill switch.
	pub async fn consume(&self, purchase_paused: bool) -> Result<()> {
		for event in self.queue.dequeue(EventType::SettlementEnqueued, CONSUME_BATCH_SIZE).await? {
			match self.process_settlement(&event).await {
				Ok(()) => self.queue.ack(&event).await?,
				Err(error) => {
					warn!("Settlement processing failed for {}: {error:#}", event.id);
					self.retry_or_dead_letter(&event, &format!("{error:#}")).await?;
				},
			}
		}

		if purchase_paused {
			debug!("Purchasing is paused; leaving invoice events queued");
			return Ok(());
		}

		for event in self.queue.dequeue(EventType::InvoiceEnqueued, CONSUME_BATCH_SIZE).await? {
			let invoice = match serde_json::from_value::<Invoice>(event.data.clone()) {
				Ok(invoice) => invoice,
				Err(error) => {
					// Same contract as a malformed invoice: reject, ack.
					warn!("Invoice event {} carries an undecodable body: {error}", event.id);
					INVOICES_REJECTED.with_label_values(&["InvalidFormat"]).inc();
					self.queue.ack(&event).await?;
					continue;
				},
			};

			match validate_invoice(&self.settings, &invoice, Utc::now()) {
				Err(reason) => {
					info!("Rejecting invoice {}: {reason}", invoice.id);
					INVOICES_REJECTED.with_label_values(&[&reason.to_string()]).inc();
					self.queue.ack(&event).await?;
				},
				Ok(valid) => match self.plan_purchase(&valid).await {
					Ok(()) => self.queue.ack(&event).await?,
					Err(error) => {
						warn!("Purchase planning failed for invoice {}: {error:#}", valid.id);
						self.retry_or_dead_letter(&event, &format!("{error:#}")).await?;
					},
				},
			}
		}
		Ok(())
	}

	/// Redelivers a failed event after `retryDelay`, until its retry budget
	/// is spent; only then is it parked in the dead-letter queue.
	async fn retry_or_dead_letter(&self, event: &QueuedEvent, error: &str) -> Result<()> {
		match event.next_retry(self.settings.retry_delay as i64, Utc::now().timestamp_millis()) {
			Some(retry) => {
				warn!(
					"Scheduling redelivery {}/{} of event {}",
					retry.retry_count, retry.max_retries, retry.id
				);
				self.queue.enqueue(&retry).await?;
			},
			None => {
				warn!("Retry budget spent for event {}, dead-lettering", event.id);
				self.queue.dead_letter(event, error).await?;
			},
		}
		Ok(())
	}

	async fn process_settlement(&self, event: &QueuedEvent) -> Result<()> {
		let invoice_id = settlement_event_invoice_id(event)
			.ok_or_else(|| anyhow!("settlement event without invoiceId"))?;

		match self.db.get_earmark_for_invoice(invoice_id).await? {
			Some(earmark) => {
				self.db.update_earmark_status(earmark.id, EarmarkStatus::Completed).await?;
				info!("Earmark for invoice {invoice_id} completed");
			},
			None => debug!("Settlement for invoice {invoice_id} with no earmark (direct purchase)"),
		}
		Ok(())
	}

	/// Decides between an immediate purchase and an earmarked refill.
	async fn plan_purchase(&self, valid: &validation::ValidInvoice) -> Result<()> {
		if let Some(earmark) = self.db.get_earmark_for_invoice(&valid.id).await? {
			return self.advance_earmark(earmark, valid).await;
		}

		let balances =
			get_mark_balances_for_ticker(&self.settings, self.chain.as_ref(), &valid.ticker_hash)
				.await;

		// Direct purchase on the first destination with enough idle balance.
		for &destination in &valid.eligible_destinations {
			let Some(decimals) =
				assets::decimals_for(&self.settings, destination, &valid.ticker_hash)
			else {
				continue;
			};
			let needed = from_hub_amount(valid.amount, decimals)?;
			let balance = from_hub_amount(
				balances.get(&destination).copied().unwrap_or_default(),
				decimals,
			)?;
			let available = get_available_balance_less_earmarks(
				&self.db,
				destination,
				&valid.ticker_hash,
				balance,
			)
			.await?;
			if available >= needed {
				return self.execute_purchase(valid, destination, needed).await;
			}
		}

		// Nothing idle anywhere: earmark the first eligible destination and
		// refill it.
		let destination = *valid
			.eligible_destinations
			.first()
			.expect("validation guarantees at least one destination");
		let decimals = assets::decimals_for(&self.settings, destination, &valid.ticker_hash)
			.ok_or_else(|| {
				anyhow!("ticker {} not configured on chain {destination}", valid.ticker_hash)
			})?;
		let needed = from_hub_amount(valid.amount, decimals)?;

		let earmark = match self
			.db
			.create_earmark(CreateEarmark {
				invoice_id: valid.id.clone(),
				designated_purchase_chain: destination,
				ticker_hash: valid.ticker_hash.clone(),
				min_amount: needed.to_string(),
			})
			.await
		{
			Ok(earmark) => earmark,
			// Unique-violation: another path committed to this invoice
			// between our lookup and now. Their plan stands.
			Err(error) if error.is_duplicate() => {
				debug!("Invoice {} already earmarked", valid.id);
				return Ok(());
			},
			Err(error) => return Err(error.into()),
		};
		info!(
			"Earmarked invoice {} for chain {destination}, minAmount {needed}",
			valid.id
		);

		self.refill_earmark(&earmark, valid).await
	}

	/// Creates rebalance operations feeding the earmark's chain until the
	/// shortfall is covered or every inbound route is exhausted.
	async fn refill_earmark(
		&self,
		earmark: &Earmark,
		valid: &validation::ValidInvoice,
	) -> Result<()> {
		let destination = earmark.designated_purchase_chain;
		let dest_decimals = assets::decimals_for(&self.settings, destination, &valid.ticker_hash)
			.ok_or_else(|| {
				anyhow!("ticker {} not configured on chain {destination}", valid.ticker_hash)
			})?;
		let needed = parse_amount(&earmark.min_amount)
			.map_err(|error| anyhow!("earmark minAmount: {error}"))?;

		let balances =
			get_mark_balances_for_ticker(&self.settings, self.chain.as_ref(), &valid.ticker_hash)
				.await;
		let on_hand = from_hub_amount(
			balances.get(&destination).copied().unwrap_or_default(),
			dest_decimals,
		)?;
		let mut deficit_hub =
			to_hub_amount(needed.saturating_sub(on_hand), dest_decimals)?;

		let inbound_routes = self
			.settings
			.routes
			.iter()
			.filter(|route| {
				route.destination == destination &&
					assets::ticker_for_asset(&self.settings, route.origin, &route.asset)
						.is_some_and(|ticker| ticker == valid.ticker_hash)
			})
			.collect::<Vec<_>>();

		for route in inbound_routes {
			if deficit_hub.is_zero() {
				break;
			}
			let Some(origin_decimals) =
				assets::decimals_for(&self.settings, route.origin, &valid.ticker_hash)
			else {
				continue;
			};
			let origin_balance = from_hub_amount(
				balances.get(&route.origin).copied().unwrap_or_default(),
				origin_decimals,
			)?;
			let available = get_available_balance_less_earmarks(
				&self.db,
				route.origin,
				&valid.ticker_hash,
				origin_balance,
			)
			.await?;
			let available_hub = to_hub_amount(available, origin_decimals)?;
			if available_hub.is_zero() {
				continue;
			}

			let transfer_hub = deficit_hub.min(available_hub);
			let transfer = from_hub_amount(transfer_hub, origin_decimals)?.min(available);
			if transfer.is_zero() {
				continue;
			}

			let preferences = route
				.preferences
				.iter()
				.copied()
				.zip(route.slippages_dbps.iter().copied())
				.collect::<Vec<_>>();
			match self
				.engine
				.execute_transfer(TransferSpec {
					origin: route.origin,
					destination,
					ticker: valid.ticker_hash.clone(),
					amount: transfer,
					preferences,
					earmark_id: Some(earmark.id),
				})
				.await?
			{
				Some(_) => deficit_hub = deficit_hub.saturating_sub(transfer_hub),
				None => continue,
			}
		}

		if !deficit_hub.is_zero() {
			warn!(
				"Invoice {}: {deficit_hub} hub units of shortfall remain unfunded; \
				will retry on later ticks",
				valid.id
			);
		}
		Ok(())
	}

	/// Moves an existing earmark along: cancel on failed prerequisites,
	/// purchase once every attached operation completed, wait otherwise.
	async fn advance_earmark(
		&self,
		earmark: Earmark,
		valid: &validation::ValidInvoice,
	) -> Result<()> {
		// Ready means the intent is already on chain; only the settlement
		// backfill completes it from there.
		if earmark.status.is_terminal() || earmark.status == EarmarkStatus::Ready {
			return Ok(());
		}

		let operations = self.db.get_rebalance_operations_by_earmark(earmark.id).await?;

		if operations
			.iter()
			.any(|op| matches!(op.status, RebalanceStatus::Cancelled | RebalanceStatus::Expired))
		{
			warn!("Earmark for invoice {} lost a prerequisite, cancelling", valid.id);
			self.db.update_earmark_status(earmark.id, EarmarkStatus::Cancelled).await?;
			return Ok(());
		}

		if operations.is_empty() {
			// Created but never funded (e.g. all preferences were exhausted).
			return self.refill_earmark(&earmark, valid).await;
		}

		if !operations.iter().all(|op| op.status == RebalanceStatus::Completed) {
			debug!("Earmark for invoice {} still waiting on rebalances", valid.id);
			return Ok(());
		}

		let needed = parse_amount(&earmark.min_amount)
			.map_err(|error| anyhow!("earmark minAmount: {error}"))?;
		// The purchase must land before the earmark is recorded Ready: a
		// failed submission leaves it pending, so the redelivered event
		// drives another attempt instead of abandoning the invoice.
		self.execute_purchase(valid, earmark.designated_purchase_chain, needed).await?;
		self.db.update_earmark_status(earmark.id, EarmarkStatus::Ready).await?;
		Ok(())
	}

	/// Submits the settlement intent on the purchase chain.
	async fn execute_purchase(
		&self,
		valid: &validation::ValidInvoice,
		destination: ChainIdentifier,
		amount: U256,
	) -> Result<()> {
		let chain = self.settings.chain_or_err(destination)?;
		let spoke = chain
			.deployments
			.as_ref()
			.ok_or_else(|| anyhow!("chain {destination} has no deployments configured"))?
			.everclear;
		let asset = assets::asset_by_ticker(chain, &valid.ticker_hash).ok_or_else(|| {
			anyhow!("ticker {} not configured on chain {destination}", valid.ticker_hash)
		})?;
		let owner = resolve_owner(chain, self.chain.signer_address())?;

		check_and_approve_erc20(
			self.chain.as_ref(),
			&self.settings,
			destination,
			asset.address,
			spoke,
			amount,
			&format!("purchase of invoice {}", valid.id),
		)
		.await?;

		let calldata = new_intent_calldata(&valid.eligible_destinations, owner, asset.address, amount);
		let result = submit_transaction_with_logging(
			self.chain.as_ref(),
			&self.settings,
			crate::bridge::NewTransaction {
				chain_id: destination,
				to: spoke,
				value: U256::zero(),
				data: calldata,
			},
			TransactionReason::Purchase,
			&format!("purchase of invoice {}", valid.id),
		)
		.await?;

		info!(
			invoice = %valid.id,
			chain = destination,
			amount = %amount,
			hash = %result.hash,
			"settlement intent submitted"
		);
		Ok(())
	}
}

/// `newIntent(uint32[],address,address,address,uint256,uint24,uint48,bytes)`
/// on the spoke: settle towards the invoice's destinations, zero max fee,
/// no expiry, no payload.
fn new_intent_calldata(
	destinations: &[ChainIdentifier],
	to: ethers::types::Address,
	input_asset: ethers::types::Address,
	amount: U256,
) -> ethers::types::Bytes {
	let mut calldata =
		id("newIntent(uint32[],address,address,address,uint256,uint24,uint48,bytes)").to_vec();
	calldata.extend(ethers::abi::encode(&[
		Token::Array(
			destinations.iter().map(|destination| Token::Uint(U256::from(*destination))).collect(),
		),
		Token::Address(to),
		Token::Address(input_asset),
		Token::Address(ethers::types::Address::zero()),
		Token::Uint(amount),
		Token::Uint(U256::zero()),
		Token::Uint(U256::zero()),
		Token::Bytes(Vec::new()),
	]));
	calldata.into()
}

/// Settlement events reference invoices by this key in their body.
fn settlement_event_invoice_id(event: &QueuedEvent) -> Option<&str> {
	event.data.get("invoiceId").and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
	use super::*;
	use ethers::types::Address;

	#[test]
	fn new_intent_calldata_has_the_expected_selector_and_length() {
		let data = new_intent_calldata(
			&[1, 10],
			Address::repeat_byte(0xaa),
			Address::repeat_byte(0x11),
			U256::from(1000u64),
		);
		assert_eq!(
			&data[..4],
			&id("newIntent(uint32[],address,address,address,uint256,uint24,uint48,bytes)")[..]
		);
		// Head words (8) + array (len + 2 items) + empty bytes word.
		assert_eq!(data.len(), 4 + 32 * 12);
	}

	#[test]
	fn settlement_events_carry_the_invoice_id() {
		let event = QueuedEvent::new(
			"inv-001",
			EventType::SettlementEnqueued,
			serde_json::json!({"invoiceId": "inv-001"}),
			EventPriority::High,
			0,
		);
		assert_eq!(settlement_event_invoice_id(&event), Some("inv-001"));
	}

	mod purchase_failure {
		use super::super::*;
		use crate::{
			bridge::registry::BridgeRegistry,
			chain::MockChainClient,
			db::{
				rebalance::{CreateRebalanceOperation, UpdateRebalanceOperation},
				Database,
			},
			invoice::everclear::MockEverclearApi,
			settings::test_utils,
		};
		use ethers::{abi::Token, types::Address};
		use mark_primitives::{
			status::{BridgeTag, OperationType},
			TickerHash,
		};
		use std::collections::HashMap;

		async fn scratch_db() -> Database {
			let url = std::env::var("MARK_TEST_DATABASE_URL")
				.expect("MARK_TEST_DATABASE_URL must point at a scratch database");
			Database::connect(&crate::settings::DatabaseSettings {
				url: url.into(),
				pool_size: 5,
				connect_attempts: 1,
			})
			.await
			.expect("database connects")
		}

		async fn scratch_queue() -> EventQueue {
			let url = std::env::var("MARK_TEST_REDIS_URL")
				.expect("MARK_TEST_REDIS_URL must point at a scratch redis");
			let client = redis::Client::open(url).expect("valid redis url");
			EventQueue::new(
				client.get_multiplexed_tokio_connection().await.expect("redis connects"),
			)
		}

		#[tokio::test]
		#[ignore = "requires postgres and redis"]
		async fn failed_purchase_leaves_the_earmark_pending() {
			let settings = Arc::new(test_utils::test_settings());
			let db = scratch_db().await;
			let queue = scratch_queue().await;

			// An earmark whose single prerequisite rebalance has completed:
			// the next processing pass should purchase.
			let invoice_id = format!("inv-{}", uuid::Uuid::new_v4());
			let earmark = db
				.create_earmark(CreateEarmark {
					invoice_id: invoice_id.clone(),
					designated_purchase_chain: 1,
					ticker_hash: TickerHash::new("0x1234"),
					min_amount: "100000000000000000000".to_string(),
				})
				.await
				.unwrap();
			let operation = db
				.create_rebalance_operation(CreateRebalanceOperation {
					earmark_id: Some(earmark.id),
					origin_chain_id: 10,
					destination_chain_id: 1,
					ticker_hash: TickerHash::new("0x1234"),
					amount: "100000000000000000000".to_string(),
					slippage_dbps: 10000,
					bridge: BridgeTag::Across,
					operation_type: OperationType::Bridge,
					recipient: None,
					transactions: HashMap::new(),
				})
				.await
				.unwrap();
			db.update_rebalance_operation(operation.id, UpdateRebalanceOperation {
				status: Some(RebalanceStatus::Completed),
				tx_hashes: None,
			})
			.await
			.unwrap();

			// A chain whose submissions always fail: allowance reads answer
			// zero, every send errors, so the purchase intent never lands.
			let mut chain = MockChainClient::new();
			chain.expect_signer_address().return_const(Address::repeat_byte(0xaa));
			chain.expect_call().returning(|_, _, _| {
				Ok(ethers::abi::encode(&[Token::Uint(U256::zero())]).into())
			});
			chain
				.expect_send_transaction()
				.returning(|_| Err(anyhow::anyhow!("rpc down")));
			let chain: Arc<dyn ChainClient> = Arc::new(chain);

			let engine = Arc::new(RebalanceEngine::new(
				db.clone(),
				chain.clone(),
				BridgeRegistry::new(),
				settings.clone(),
			));
			let pipeline = InvoicePipeline::new(
				db.clone(),
				chain,
				queue,
				Arc::new(MockEverclearApi::new()),
				engine,
				settings.clone(),
			);

			let valid = validation::ValidInvoice {
				id: invoice_id.clone(),
				owner: "0x00000000000000000000000000000000000000bb".to_string(),
				amount: U256::from_dec_str("100000000000000000000").unwrap(),
				ticker_hash: TickerHash::new("0x1234"),
				eligible_destinations: vec![1],
			};
			assert!(pipeline.plan_purchase(&valid).await.is_err());

			// The intent never landed, so the earmark must still be pending:
			// a later redelivery retries the purchase instead of abandoning
			// the invoice behind a Ready guard.
			let earmark = db.get_earmark_for_invoice(&invoice_id).await.unwrap().unwrap();
			assert_eq!(earmark.status, EarmarkStatus::Pending);
		}
	}
}

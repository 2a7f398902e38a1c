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

//! HTTP client for the hub's invoice API. A 404 on a single-invoice fetch
//! means the invoice has settled and disappeared from the hub's view.

use anyhow::{Context, Result};
use mark_utilities::redact_endpoint_secret::SecretUrl;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
	#[serde(alias = "intentId")]
	pub id: String,
	pub owner: String,
	/// 18-dec hub units.
	pub amount: String,
	pub ticker_hash: String,
	/// Domains the invoice can settle on, as decimal strings.
	pub destinations: Vec<String>,
	/// Seconds since the unix epoch.
	#[serde(default)]
	pub hub_invoice_enqueued_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePage {
	#[serde(default)]
	pub invoices: Vec<Invoice>,
	#[serde(default)]
	pub next_cursor: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait EverclearApi: Send + Sync {
	/// One page of unsettled invoices from the durable cursor onwards.
	async fn fetch_invoices(&self, cursor: Option<String>) -> Result<InvoicePage>;

	/// A single invoice; None when the hub no longer knows it (settled).
	async fn fetch_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>>;
}

pub struct EverclearClient {
	http: reqwest::Client,
	base_url: String,
}

impl EverclearClient {
	pub fn new(api_url: &SecretUrl) -> Result<Self> {
		Ok(Self {
			http: reqwest::Client::builder()
				.timeout(Duration::from_secs(15))
				.build()
				.context("building everclear http client")?,
			base_url: api_url.expose().trim_end_matches('/').to_string(),
		})
	}
}

#[async_trait::async_trait]
impl EverclearApi for EverclearClient {
	async fn fetch_invoices(&self, cursor: Option<String>) -> Result<InvoicePage> {
		let mut request = self.http.get(format!("{}/invoices", self.base_url));
		if let Some(cursor) = cursor {
			request = request.query(&[("cursor", cursor)]);
		}
		let response = request.send().await.context("fetching invoices")?;
		response
			.error_for_status()
			.context("invoice list request rejected")?
			.json::<InvoicePage>()
			.await
			.context("decoding invoice page")
	}

	async fn fetch_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>> {
		let response = self
			.http
			.get(format!("{}/invoices/{invoice_id}", self.base_url))
			.send()
			.await
			.with_context(|| format!("fetching invoice {invoice_id}"))?;

		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Ok(None);
		}
		Ok(Some(
			response
				.error_for_status()
				.with_context(|| format!("invoice {invoice_id} request rejected"))?
				.json::<Invoice>()
				.await
				.context("decoding invoice")?,
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn invoice_decodes_from_hub_payload() {
		let invoice: Invoice = serde_json::from_value(serde_json::json!({
			"intentId": "inv-001",
			"owner": "0x00000000000000000000000000000000000000bb",
			"amount": "100000000000000000000",
			"tickerHash": "0x1234",
			"destinations": ["1", "10"],
			"hubInvoiceEnqueuedTimestamp": 1700000000
		}))
		.unwrap();
		assert_eq!(invoice.id, "inv-001");
		assert_eq!(invoice.destinations, vec!["1", "10"]);
		assert_eq!(invoice.hub_invoice_enqueued_timestamp, Some(1700000000));
	}

	#[test]
	fn invoice_page_tolerates_missing_cursor() {
		let page: InvoicePage = serde_json::from_value(serde_json::json!({
			"invoices": []
		}))
		.unwrap();
		assert!(page.invoices.is_empty());
		assert!(page.next_cursor.is_none());
	}
}

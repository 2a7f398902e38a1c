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

pub mod assets;
pub mod balance;
pub mod bridge;
pub mod chain;
pub mod constants;
pub mod db;
pub mod health;
pub mod invoice;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod rebalance;
pub mod settings;

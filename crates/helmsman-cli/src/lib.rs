// Copyright 2025 Helmsman Authors
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

//! # Helmsman CLI
//!
//! Command-line interface for the helmsman global orchestrator.
//!
//! ## Key Commands
//!
//! - `helmsman run`: Start the orchestrator and its administrative API
//! - `helmsman status`: Show the health of a running orchestrator's services
//! - `helmsman topology`: Show federations, nodes and failover groups
//! - `helmsman metrics`: Show routing, scaling and failover counters
//!
//! The query commands talk to the administrative API through [`query::AdminClient`].

pub mod query;

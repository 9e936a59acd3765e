// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster providers - backends that create, scale, and tear down clusters.
//!
//! The managed backend is supplied by the embedding application; this crate
//! ships the [`StandaloneProvider`] for pre-existing clusters and a
//! [`MockProvider`] for tests.

pub mod mock;
mod registry;
pub mod standalone;
mod traits;

pub use mock::MockProvider;
pub use registry::Providers;
pub use standalone::StandaloneProvider;
pub use traits::*;

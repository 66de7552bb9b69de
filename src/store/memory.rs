// This file is part of Astarte.
//
// Copyright 2024 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! In memory introspection cache.

use std::convert::Infallible;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{CacheCheck, IntrospectionCache};

/// Volatile cache, the fast path never triggers across process restarts.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    introspection: Arc<RwLock<Option<String>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntrospectionCache for MemoryCache {
    type Err = Infallible;

    async fn store(&self, introspection: &str) -> Result<(), Self::Err> {
        *self.introspection.write().await = Some(introspection.to_string());

        Ok(())
    }

    async fn check(&self, introspection: &str) -> Result<CacheCheck, Self::Err> {
        let cached = self.introspection.read().await;

        let check = match cached.as_deref() {
            Some(stored) if stored == introspection => CacheCheck::Current,
            Some(_) => CacheCheck::Outdated,
            None => CacheCheck::Missing,
        };

        Ok(check)
    }
}

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

//! Persistence of the introspection advertised in the last successful handshake.
//!
//! The cached string drives the session-present fast path: when the broker resumed the previous
//! session and the introspection is unchanged, the whole handshake is skipped. Any key-value
//! storage works, the SDK ships an in-memory and a single-file implementation.

use std::{error::Error as StdError, fmt::Debug, future::Future};

pub mod file;
pub mod memory;

pub use self::file::FileCache;
pub use self::memory::MemoryCache;

/// Outcome of checking the introspection against the cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCheck {
    /// The cached introspection matches.
    Current,
    /// A different introspection is cached.
    Outdated,
    /// Nothing is cached.
    Missing,
}

/// Storage for the introspection string of the last successful handshake.
pub trait IntrospectionCache: Clone + Debug + Send + Sync + 'static
where
    // NOTE: bounds required for the error to cross task boundaries.
    Self::Err: StdError + Send + Sync + 'static,
{
    /// Reason for a failed operation.
    type Err;

    /// Persists the introspection string.
    fn store(&self, introspection: &str) -> impl Future<Output = Result<(), Self::Err>> + Send;

    /// Compares the introspection with the cached one.
    fn check(
        &self,
        introspection: &str,
    ) -> impl Future<Output = Result<CacheCheck, Self::Err>> + Send;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn test_introspection_cache<S>(cache: S)
    where
        S: IntrospectionCache,
    {
        let intr = "org.example.A:0:1;org.example.B:1:0";

        assert_eq!(cache.check(intr).await.unwrap(), CacheCheck::Missing);

        cache.store(intr).await.unwrap();
        assert_eq!(cache.check(intr).await.unwrap(), CacheCheck::Current);

        let changed = "org.example.A:0:2";
        assert_eq!(cache.check(changed).await.unwrap(), CacheCheck::Outdated);

        cache.store(changed).await.unwrap();
        assert_eq!(cache.check(changed).await.unwrap(), CacheCheck::Current);
    }
}

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

//! Introspection cache backed by a single file.

use std::io;
use std::path::PathBuf;

use super::{CacheCheck, IntrospectionCache};

/// Persists the introspection string to a file, surviving process restarts.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    /// Creates a cache writing to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IntrospectionCache for FileCache {
    type Err = io::Error;

    async fn store(&self, introspection: &str) -> Result<(), Self::Err> {
        tokio::fs::write(&self.path, introspection).await
    }

    async fn check(&self, introspection: &str) -> Result<CacheCheck, Self::Err> {
        let stored = match tokio::fs::read_to_string(&self.path).await {
            Ok(stored) => stored,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(CacheCheck::Missing),
            Err(err) => return Err(err),
        };

        if stored == introspection {
            Ok(CacheCheck::Current)
        } else {
            Ok(CacheCheck::Outdated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::tests::test_introspection_cache;

    #[tokio::test]
    async fn file_cache_contract() {
        let dir = tempfile::tempdir().unwrap();

        test_introspection_cache(FileCache::new(dir.path().join("introspection"))).await;
    }

    #[tokio::test]
    async fn file_cache_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("introspection");

        let cache = FileCache::new(&path);
        cache.store("org.example.A:0:1").await.unwrap();
        drop(cache);

        let cache = FileCache::new(&path);
        assert_eq!(
            cache.check("org.example.A:0:1").await.unwrap(),
            CacheCheck::Current
        );
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::binding::{Call, NamedArgs, Signature};
use crate::cache::{CachedFunction, FuncId};
use crate::config::CacheOptions;

/// A cached, deterministic builder keyed by construction arguments.
///
/// Construction arguments are fingerprinted exactly like function-call
/// arguments, so building twice with the same arguments decodes the stored
/// object instead of running the constructor again. The type is opaque on
/// purpose: there is no way to reach or extend the wrapped constructor.
pub struct CachedBuilder<T> {
    inner: CachedFunction<T>,
}

impl<T> CachedBuilder<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn create(
        id: FuncId,
        signature: Signature,
        options: CacheOptions,
        constructor: impl Fn(&NamedArgs) -> anyhow::Result<T> + Send + Sync + 'static,
    ) -> anyhow::Result<Self> {
        let inner = CachedFunction::create(id, signature, options, constructor)
            .with_context(|| "failed to create cached builder")?;
        Ok(CachedBuilder { inner })
    }

    /// Builds the object, from cache when possible.
    pub fn build(&self, call: &Call) -> anyhow::Result<T> {
        self.inner.call(call)
    }

    /// True if an object for these construction arguments is already stored.
    pub fn is_built(&self, call: &Call) -> anyhow::Result<bool> {
        self.inner.has_key(call)
    }

    pub fn cache_dir(&self) -> &Path {
        self.inner.cache_dir()
    }
}

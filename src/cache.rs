/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::binding::{Call, NamedArgs, Signature};
use crate::config::CacheOptions;
use crate::error::{CacheError, Result};
use crate::fingerprint::{fingerprint, Digest};
use crate::store::Store;

/// Identity of a wrapped function, used to name its cache subdirectory.
///
/// Only free functions can be wrapped: the name must be a bare identifier.
/// A method path (`Type::method`, `a.b`) is rejected with `Unsupported`,
/// because a receiver would enter the fingerprint non-deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncId {
    module: Option<String>,
    name: String,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FuncId {
    pub fn create(name: &str) -> Result<Self> {
        if !is_identifier(name) {
            return Err(CacheError::Unsupported(format!(
                "'{}' is not a free function name, wrap a free function",
                name
            )));
        }
        Ok(FuncId {
            module: None,
            name: name.to_owned(),
        })
    }

    /// Module path segments may be separated by `::` or `.`; they are
    /// normalized to dots for the directory name.
    pub fn with_module(module: &str, name: &str) -> Result<Self> {
        let normalized = module.replace("::", ".");
        if normalized.split('.').any(|seg| !is_identifier(seg)) {
            return Err(CacheError::Unsupported(format!(
                "'{}' is not a module path",
                module
            )));
        }
        let mut id = FuncId::create(name)?;
        id.module = Some(normalized);
        Ok(id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory name under the cache root.
    pub fn dir_name(&self, include_module_name: bool) -> String {
        match (&self.module, include_module_name) {
            (Some(module), true) => format!("{}.{}", module, self.name),
            _ => self.name.clone(),
        }
    }
}

/// Explicit form of the caching behavior override. Absent flag means the
/// default write-through behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFlag {
    /// Plain call, cache untouched.
    NoCache,
    /// Call and overwrite the cached entry with the fresh value.
    Update,
    /// Probe only, never call.
    HasKey,
    /// Cached value or `Missing`, never call.
    CacheOnly,
}

impl std::str::FromStr for CacheFlag {
    type Err = CacheError;

    /// Accepts the flag by its historical name, for callers migrating from a
    /// dynamic flag keyword.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no_cache" => Ok(CacheFlag::NoCache),
            "update" => Ok(CacheFlag::Update),
            "has_key" => Ok(CacheFlag::HasKey),
            "cache_only" => Ok(CacheFlag::CacheOnly),
            other => Err(CacheError::BadCall(format!(
                "unknown cache flag '{}'",
                other
            ))),
        }
    }
}

/// Result of a flagged call: `HasKey` probes answer with a bool, every other
/// flag produces a value.
#[derive(Debug, PartialEq)]
pub enum CallResult<R> {
    Value(R),
    HasKey(bool),
}

type UserFn<R> = dyn Fn(&NamedArgs) -> anyhow::Result<R> + Send + Sync;

/// Caches return values of a pure function in a sharded file store, one file
/// per distinct argument fingerprint.
pub struct CachedFunction<R> {
    func: Arc<UserFn<R>>,
    signature: Signature,
    store: Store,
}

impl<R> Clone for CachedFunction<R> {
    fn clone(&self) -> Self {
        CachedFunction {
            func: self.func.clone(),
            signature: self.signature.clone(),
            store: self.store.clone(),
        }
    }
}

impl<R> CachedFunction<R>
where
    R: Serialize + DeserializeOwned,
{
    pub fn create(
        id: FuncId,
        signature: Signature,
        options: CacheOptions,
        func: impl Fn(&NamedArgs) -> anyhow::Result<R> + Send + Sync + 'static,
    ) -> anyhow::Result<Self> {
        let root = options.path.join(id.dir_name(options.include_module_name));
        let store = Store::create(root.clone())
            .with_context(|| format!("failed to create cache dir at '{}'", root.display()))?;
        debug!("cache for '{}' at '{}'", id.name(), store.root().display());
        Ok(CachedFunction {
            func: Arc::new(func),
            signature,
            store,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        self.store.root()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn invoke(&self, args: &NamedArgs) -> anyhow::Result<R> {
        (self.func)(args)
    }

    pub(crate) fn bind_and_hash(&self, call: &Call) -> Result<(NamedArgs, Digest)> {
        let named = self.signature.bind(call)?;
        let digest = fingerprint(&named)?;
        Ok((named, digest))
    }

    /// The on-disk path this call would be cached at.
    pub fn entry_path(&self, call: &Call) -> anyhow::Result<PathBuf> {
        let (_, digest) = self.bind_and_hash(call)?;
        Ok(self.store.path_of(&digest))
    }

    /// Default behavior: cached value if present, otherwise call, store and
    /// return. A failing call writes nothing; a failing write removes the
    /// partial entry and surfaces the i/o error.
    pub fn call(&self, call: &Call) -> anyhow::Result<R> {
        let (named, digest) = self.bind_and_hash(call)?;
        let path = self.store.path_of(&digest);
        if self.store.exists(&path) {
            return self
                .store
                .read(&path)
                .with_context(|| format!("failed to read cache entry at '{}'", path.display()));
        }
        let value = self.invoke(&named)?;
        self.store
            .write(&path, &value)
            .with_context(|| format!("failed to write cache entry at '{}'", path.display()))?;
        Ok(value)
    }

    /// Plain call, cache untouched.
    pub fn call_no_cache(&self, call: &Call) -> anyhow::Result<R> {
        let (named, _) = self.bind_and_hash(call)?;
        self.invoke(&named)
    }

    /// Call and overwrite the cached entry.
    pub fn call_update(&self, call: &Call) -> anyhow::Result<R> {
        let (named, digest) = self.bind_and_hash(call)?;
        let value = self.invoke(&named)?;
        let path = self.store.path_of(&digest);
        self.store
            .write(&path, &value)
            .with_context(|| format!("failed to write cache entry at '{}'", path.display()))?;
        Ok(value)
    }

    /// True if the call has been cached already. Never calls the function.
    pub fn has_key(&self, call: &Call) -> anyhow::Result<bool> {
        let (_, digest) = self.bind_and_hash(call)?;
        Ok(self.store.exists(&self.store.path_of(&digest)))
    }

    /// Cached value or `Missing`. Never calls the function.
    pub fn get_cached(&self, call: &Call) -> anyhow::Result<R> {
        let (_, digest) = self.bind_and_hash(call)?;
        let path = self.store.path_of(&digest);
        self.store
            .read(&path)
            .with_context(|| format!("failed to read cache entry at '{}'", path.display()))
    }

    /// Migration shim for callers coming from a dynamic flag keyword.
    pub fn call_flagged(
        &self,
        call: &Call,
        flag: Option<CacheFlag>,
    ) -> anyhow::Result<CallResult<R>> {
        match flag {
            None => Ok(CallResult::Value(self.call(call)?)),
            Some(CacheFlag::NoCache) => Ok(CallResult::Value(self.call_no_cache(call)?)),
            Some(CacheFlag::Update) => Ok(CallResult::Value(self.call_update(call)?)),
            Some(CacheFlag::HasKey) => Ok(CallResult::HasKey(self.has_key(call)?)),
            Some(CacheFlag::CacheOnly) => Ok(CallResult::Value(self.get_cached(call)?)),
        }
    }

    /// Injects a value without calling the function. Refuses to replace an
    /// existing entry unless `overwrite` is set.
    pub fn set_result(&self, call: &Call, value: &R, overwrite: bool) -> anyhow::Result<()> {
        let (_, digest) = self.bind_and_hash(call)?;
        let path = self.store.path_of(&digest);
        self.store
            .write_new(&path, value, overwrite)
            .with_context(|| format!("failed to store injected result at '{}'", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Param;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options(dir: &tempfile::TempDir) -> CacheOptions {
        CacheOptions::at(dir.path())
    }

    fn square(
        dir: &tempfile::TempDir,
        calls: Arc<AtomicUsize>,
    ) -> CachedFunction<i64> {
        CachedFunction::create(
            FuncId::create("square").unwrap(),
            Signature::create(vec![Param::required("x")]).unwrap(),
            options(dir),
            move |args| {
                calls.fetch_add(1, Ordering::SeqCst);
                match args.get("x") {
                    Some(crate::value::Value::Int(x)) => Ok(x * x),
                    other => anyhow::bail!("expected int argument, got {:?}", other),
                }
            },
        )
        .unwrap()
    }

    #[test]
    fn test_method_name_rejected_at_wrap_time() {
        assert!(matches!(
            FuncId::create("Point::area"),
            Err(CacheError::Unsupported(_))
        ));
        assert!(matches!(
            FuncId::create("point.area"),
            Err(CacheError::Unsupported(_))
        ));
        assert!(FuncId::create("area").is_ok());
    }

    #[test]
    fn test_cache_dir_naming() {
        let id = FuncId::with_module("demo::analysis", "square").unwrap();
        assert_eq!("demo.analysis.square", id.dir_name(true));
        assert_eq!("square", id.dir_name(false));
        assert_eq!("square", FuncId::create("square").unwrap().dir_name(true));
    }

    #[test]
    fn test_second_call_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = square(&dir, calls.clone());

        assert_eq!(9, cached.call(&Call::new().pos(3)).unwrap());
        assert_eq!(9, cached.call(&Call::new().pos(3)).unwrap());
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn test_no_cache_flag_does_not_touch_cache() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = square(&dir, calls.clone());

        assert_eq!(9, cached.call_no_cache(&Call::new().pos(3)).unwrap());
        assert!(!cached.has_key(&Call::new().pos(3)).unwrap());
        assert_eq!(9, cached.call(&Call::new().pos(3)).unwrap());
        assert!(cached.has_key(&Call::new().pos(3)).unwrap());
        assert_eq!(2, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn test_round_trip_matches_no_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cached = square(&dir, Arc::new(AtomicUsize::new(0)));
        let through_cache = cached.call(&Call::new().pos(7)).unwrap();
        let direct = cached.call_no_cache(&Call::new().pos(7)).unwrap();
        assert_eq!(direct, through_cache);
    }

    #[test]
    fn test_cache_only_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cached = square(&dir, Arc::new(AtomicUsize::new(0)));
        let err = cached.get_cached(&Call::new().pos(3)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::Missing(_))
        ));
    }

    #[test]
    fn test_update_replaces_corrupt_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cached = square(&dir, Arc::new(AtomicUsize::new(0)));
        let call = Call::new().pos(3);

        cached.call(&call).unwrap();
        let path = cached.entry_path(&call).unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        let err = cached.call(&call).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::Corrupt { .. })
        ));

        assert_eq!(9, cached.call_update(&call).unwrap());
        assert_eq!(9, cached.get_cached(&call).unwrap());
    }

    #[test]
    fn test_set_result_requires_overwrite_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = square(&dir, calls.clone());
        let call = Call::new().pos(5);

        cached.set_result(&call, &25, false).unwrap();
        assert_eq!(25, cached.get_cached(&call).unwrap());
        assert_eq!(0, calls.load(Ordering::SeqCst));

        let err = cached.set_result(&call, &26, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::AlreadyPresent(_))
        ));
        cached.set_result(&call, &26, true).unwrap();
        assert_eq!(26, cached.get_cached(&call).unwrap());
    }

    #[test]
    fn test_failing_call_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cached: CachedFunction<i64> = CachedFunction::create(
            FuncId::create("broken").unwrap(),
            Signature::create(vec![Param::required("x")]).unwrap(),
            options(&dir),
            |_| anyhow::bail!("boom"),
        )
        .unwrap();

        assert!(cached.call(&Call::new().pos(1)).is_err());
        assert!(!cached.has_key(&Call::new().pos(1)).unwrap());
    }

    #[test]
    fn test_flag_parsed_by_name() {
        assert_eq!(CacheFlag::NoCache, "no_cache".parse().unwrap());
        assert_eq!(CacheFlag::Update, "update".parse().unwrap());
        assert_eq!(CacheFlag::HasKey, "has_key".parse().unwrap());
        assert_eq!(CacheFlag::CacheOnly, "cache_only".parse().unwrap());
        assert!("NO_CACHE".parse::<CacheFlag>().is_err());
    }

    #[test]
    fn test_binding_error_surfaces_in_every_mode() {
        let dir = tempfile::tempdir().unwrap();
        let cached = square(&dir, Arc::new(AtomicUsize::new(0)));
        let bad = Call::new().kw("nope", 1);
        for flag in [
            None,
            Some(CacheFlag::NoCache),
            Some(CacheFlag::Update),
            Some(CacheFlag::HasKey),
            Some(CacheFlag::CacheOnly),
        ] {
            let err = cached.call_flagged(&bad, flag).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<CacheError>(),
                Some(CacheError::BadCall(_))
            ));
        }
    }
}

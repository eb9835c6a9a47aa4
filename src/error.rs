/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Error kinds shared by the cache wrapper, the store and the worker pool.
///
/// Public methods return `anyhow::Result`; a `CacheError` inside can be
/// recovered with `err.downcast_ref::<CacheError>()`.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("bad call: {0}")]
    BadCall(String),

    #[error("entry not found in cache (file '{}' does not exist)", .0.display())]
    Missing(PathBuf),

    #[error("result has already been cached at '{}', use overwrite to force an update", .0.display())]
    AlreadyPresent(PathBuf),

    #[error("cache i/o failed at '{}'", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode cache entry at '{}': {}", .path.display(), .reason)]
    Corrupt { path: PathBuf, reason: String },

    #[error("unsupported function: {0}")]
    Unsupported(String),

    #[error("argument cannot be fingerprinted: {0}")]
    Unhashable(String),

    /// A previous evaluation of the same arguments failed inside a worker.
    #[error("cached function call failed: {message}")]
    Exec { message: String, trace: String },
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

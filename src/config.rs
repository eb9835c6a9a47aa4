/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options for the cache wrapper factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Cache root directory; each wrapped function gets its own subdirectory.
    /// It is safe to point several functions at the same root.
    pub path: PathBuf,
    /// If true the function subdirectory is named `<module>.<name>`,
    /// otherwise just `<name>` (function names must then be distinctive).
    pub include_module_name: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            path: PathBuf::from(".cache"),
            include_module_name: true,
        }
    }
}

impl CacheOptions {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        CacheOptions {
            path: path.into(),
            ..CacheOptions::default()
        }
    }
}

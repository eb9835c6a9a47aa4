/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod binding;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod pool;
pub mod queue;
pub mod status;
pub mod store;
pub mod value;


pub use binding::{Call, NamedArgs, Param, Signature};
pub use builder::CachedBuilder;
pub use cache::{CacheFlag, CachedFunction, CallResult, FuncId};
pub use config::CacheOptions;
pub use error::CacheError;
pub use fingerprint::{fingerprint, Digest};
pub use pool::{CallStatus, ParallelCache, WorkerCount};
pub use queue::{Failure, Task, TaskQueue};
pub use status::Status;
pub use store::{shard_segments, Store};
pub use value::Value;

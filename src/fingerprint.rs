/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::{self, Display, Formatter};

use sha2::{Digest as _, Sha256};

use crate::binding::NamedArgs;
use crate::error::{CacheError, Result};

pub const DIGEST_LEN: usize = 32;

/// Content hash of one bound call: SHA-256 over the canonical encoding of the
/// name-sorted argument mapping. Stable across processes and hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Fingerprints a bound call.
///
/// Arguments the encoder cannot represent canonically are rejected with
/// `Unhashable` before any bytes are produced.
pub fn fingerprint(args: &NamedArgs) -> Result<Digest> {
    for (_, value) in args.iter() {
        value.ensure_hashable()?;
    }
    let bytes = bincode::serialize(args)
        .map_err(|err| CacheError::Unhashable(format!("failed to encode arguments: {}", err)))?;
    Ok(Digest(Sha256::digest(&bytes).into()))
}

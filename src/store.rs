/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};
use crate::fingerprint::Digest;

const HEX: &[u8; 16] = b"0123456789abcdef";

fn hex_char(nibble: u8) -> char {
    HEX[(nibble & 0x0f) as usize] as char
}

fn push_hex(out: &mut String, bytes: &[u8]) {
    for byte in bytes {
        out.push(hex_char(byte >> 4));
        out.push(hex_char(byte & 0x0f));
    }
}

/// Splits a hash into the three path segments `(s1, s2, s3)`.
///
/// The first two segments carry 14 bits each (16384 subdirectories per level,
/// which keeps directory fanout near the flat-access regime of common
/// filesystems up to roughly 2.6e8 entries); the third segment carries the
/// remaining bits and is used as the filename.
///
/// Bit layout, fixed so external tools can reproduce the path:
/// the bits of byte 0 go to the segments as `11223333`,
/// the bits of byte 1 as `11112222`, byte 2 belongs to s1, byte 3 to s2
/// and everything from byte 4 on to s3.
pub fn shard_segments(hash: &[u8]) -> (String, String, String) {
    assert!(hash.len() >= 4, "hash must be at least 4 bytes");

    let b = hash[0];
    let c = hash[1];

    let mut s1 = String::with_capacity(4);
    s1.push(hex_char(b >> 6));
    s1.push(hex_char(c >> 4));
    push_hex(&mut s1, &hash[2..3]);

    let mut s2 = String::with_capacity(4);
    s2.push(hex_char((b >> 4) & 0b0011));
    s2.push(hex_char(c & 0x0f));
    push_hex(&mut s2, &hash[3..4]);

    let mut s3 = String::with_capacity(1 + 2 * (hash.len() - 4));
    s3.push(hex_char(b & 0x0f));
    push_hex(&mut s3, &hash[4..]);

    (s1, s2, s3)
}

/// Content-addressed file store for one wrapped function.
///
/// Maps a digest to `root/<s1>/<s2>/<s3>` and reads/writes encoded values
/// there. The store is format-agnostic beyond "one encoded value per file";
/// entries are never deleted here.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Creates the store root directory (parents included).
    pub fn create(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|err| CacheError::io(&root, err))?;
        Ok(Store { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, digest: &Digest) -> PathBuf {
        let (s1, s2, s3) = shard_segments(digest.as_bytes());
        self.root.join(s1).join(s2).join(s3)
    }

    /// Any "no such entry" condition counts as absent rather than an error.
    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Missing(path.to_path_buf()))
            }
            Err(err) => return Err(CacheError::io(path, err)),
        };
        bincode::deserialize(&bytes).map_err(|err| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// Writes an encoded value, creating parent directories as needed.
    ///
    /// On any failure the partially written file is removed before the error
    /// surfaces, so an entry on disk is always fully decodable.
    pub fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(|err| {
            CacheError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| CacheError::io(parent, err))?;
        }
        match fs::write(path, &bytes) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(path);
                Err(CacheError::io(path, err))
            }
        }
    }

    /// Like `write`, but refuses to replace an existing entry unless the
    /// caller opted into overwriting.
    pub fn write_new<T: Serialize>(&self, path: &Path, value: &T, overwrite: bool) -> Result<()> {
        if !overwrite && self.exists(path) {
            return Err(CacheError::AlreadyPresent(path.to_path_buf()));
        }
        self.write(path, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::DIGEST_LEN;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_segments_first_vector() {
        let hash = [0xff, 0xff, 0xff, 0xff, 0xab];
        let (s1, s2, s3) = shard_segments(&hash);
        assert_eq!("3fff", s1);
        assert_eq!("3fff", s2);
        assert_eq!("fab", s3);
    }

    #[test]
    fn test_segments_second_vector() {
        let hash = [0x63, 0x12, 0x11, 0x22, 0x33];
        let (s1, s2, s3) = shard_segments(&hash);
        assert_eq!("1111", s1);
        assert_eq!("2222", s2);
        assert_eq!("333", s3);
    }

    fn hex_val(c: char) -> u8 {
        c.to_digit(16).unwrap() as u8
    }

    fn byte_from(hex: &[char]) -> u8 {
        (hex_val(hex[0]) << 4) | hex_val(hex[1])
    }

    #[test]
    fn test_segments_reassemble_to_digest() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        for _ in 0..100 {
            let mut hash = [0u8; DIGEST_LEN];
            rng.fill(&mut hash);

            let (s1, s2, s3) = shard_segments(&hash);
            assert_eq!(4, s1.len());
            assert_eq!(4, s2.len());
            assert_eq!(57, s3.len());

            let s1: Vec<char> = s1.chars().collect();
            let s2: Vec<char> = s2.chars().collect();
            let s3: Vec<char> = s3.chars().collect();
            assert!(hex_val(s1[0]) < 4);
            assert!(hex_val(s2[0]) < 4);

            let mut rebuilt = vec![
                (hex_val(s1[0]) << 6) | (hex_val(s2[0]) << 4) | hex_val(s3[0]),
                (hex_val(s1[1]) << 4) | hex_val(s2[1]),
                byte_from(&s1[2..4]),
                byte_from(&s2[2..4]),
            ];
            for pair in s3[1..].chunks(2) {
                rebuilt.push(byte_from(pair));
            }
            assert_eq!(hash.to_vec(), rebuilt);
        }
    }

    #[test]
    fn test_exists_translates_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::create(dir.path().join("entries")).unwrap();
        // a path component that is a regular file, not a directory
        let blocker = dir.path().join("entries").join("file");
        fs::write(&blocker, b"x").unwrap();
        assert!(!store.exists(&dir.path().join("entries/missing/deep")));
        assert!(!store.exists(&blocker.join("below-a-file")));
        assert!(store.exists(&blocker));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::create(dir.path().join("entries")).unwrap();
        let digest = Digest::from_bytes([7u8; DIGEST_LEN]);
        let path = store.path_of(&digest);

        store.write(&path, &vec![1i64, 2, 3]).unwrap();
        let back: Vec<i64> = store.read(&path).unwrap();
        assert_eq!(vec![1, 2, 3], back);
    }

    #[test]
    fn test_read_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::create(dir.path().join("entries")).unwrap();
        let path = store.path_of(&Digest::from_bytes([1u8; DIGEST_LEN]));
        assert!(matches!(
            store.read::<i64>(&path),
            Err(CacheError::Missing(_))
        ));
    }

    #[test]
    fn test_read_corrupt_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::create(dir.path().join("entries")).unwrap();
        let path = store.path_of(&Digest::from_bytes([2u8; DIGEST_LEN]));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not an encoded value").unwrap();
        assert!(matches!(
            store.read::<String>(&path),
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_write_new_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::create(dir.path().join("entries")).unwrap();
        let path = store.path_of(&Digest::from_bytes([3u8; DIGEST_LEN]));

        store.write_new(&path, &1i64, false).unwrap();
        assert!(matches!(
            store.write_new(&path, &2i64, false),
            Err(CacheError::AlreadyPresent(_))
        ));
        store.write_new(&path, &2i64, true).unwrap();
        assert_eq!(2i64, store.read::<i64>(&path).unwrap());
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(
            &self,
            _serializer: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refusing to encode"))
        }
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::create(dir.path().join("entries")).unwrap();
        let path = store.path_of(&Digest::from_bytes([4u8; DIGEST_LEN]));

        assert!(matches!(
            store.write(&path, &Unencodable),
            Err(CacheError::Io { .. })
        ));
        assert!(!store.exists(&path));
    }
}

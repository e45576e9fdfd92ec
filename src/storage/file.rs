//! Directory-backed key-value store.
//!
//! Every key maps to one file whose name is the lowercase hex encoding of the
//! key bytes, so arbitrary keys (including `/`) are safe file names. Keys too
//! long for that get a digest-based name instead. Values are written with
//! [`write_atomic`].

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, SemantraError};
use crate::storage::KeyValueStore;

const TEMP_SUFFIX: &str = ".tmp";

/// Write `bytes` to `path` so that readers observe either the previous file
/// or the complete new one.
///
/// The data goes to a uniquely named sibling temp file, is fsynced, and is
/// then renamed over `path`. On failure the temp file is removed and `path`
/// is left untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| SemantraError::invalid_argument(format!("not a file path: {}", path.display())))?
        .to_string_lossy();
    let tmp_path = parent.join(format!(
        ".{file_name}.{}{TEMP_SUFFIX}",
        uuid::Uuid::new_v4().simple()
    ));

    let result = (|| -> io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        sync_dir(parent);
        Ok(())
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // Best effort: persists the rename itself on filesystems that need it.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// A key-value store keeping one file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    directory: PathBuf,
}

impl FileKvStore {
    /// Open (creating if needed) a store rooted at `directory`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    /// The directory holding the key files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.directory.join(file_name_for(key))
    }

    /// Read a long-key file, returning its value only if it belongs to `key`.
    fn read_long(&self, path: &Path, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(bytes) = read_optional(path)? else {
            return Ok(None);
        };
        let (stored_key, value) = split_long_entry(&bytes)?;
        if stored_key != key {
            return Ok(None);
        }
        Ok(Some(value.to_vec()))
    }
}

impl KeyValueStore for FileKvStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.key_path(key);
        if !is_long_key(key) {
            return write_atomic(&path, value);
        }

        if let Some(existing) = read_optional(&path)? {
            let (stored_key, _) = split_long_entry(&existing)?;
            if stored_key != key {
                return Err(SemantraError::backend(format!(
                    "key '{key}' collides with stored key '{stored_key}'"
                )));
            }
        }
        let mut entry = Vec::with_capacity(4 + key.len() + value.len());
        entry.write_u32::<LittleEndian>(key.len() as u32)?;
        entry.extend_from_slice(key.as_bytes());
        entry.extend_from_slice(value);
        write_atomic(&path, &entry)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key);
        if is_long_key(key) {
            self.read_long(&path, key)
        } else {
            read_optional(&path)
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        if is_long_key(key) && self.read_long(&path, key)?.is_none() {
            return Ok(());
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn has(&self, key: &str) -> Result<bool> {
        if is_long_key(key) {
            Ok(self.get(key)?.is_some())
        } else {
            Ok(self.key_path(key).is_file())
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let key = if name.contains(LONG_KEY_MARK) {
                match read_optional(&entry.path())? {
                    Some(bytes) => Some(split_long_entry(&bytes)?.0.to_string()),
                    None => None,
                }
            } else {
                decode_key(name)
            };
            if let Some(key) = key {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Longest hex file name used as is. Leaves room for the temp-file decoration
/// added by [`write_atomic`] under the usual 255-byte name limit.
const MAX_HEX_NAME: usize = 200;
/// Hex characters of the key kept in front of the digest of a long key.
const LONG_KEY_PREFIX: usize = 160;
const LONG_KEY_MARK: char = '~';

fn is_long_key(key: &str) -> bool {
    key.len() * 2 > MAX_HEX_NAME
}

/// File name for `key`: its hex encoding, or for long keys a hex prefix plus a
/// crc32 of the whole key. Long-key files carry the full key in front of the
/// value so collisions are detected.
fn file_name_for(key: &str) -> String {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_HEX_NAME {
        return encoded;
    }
    format!(
        "{}{LONG_KEY_MARK}{:08x}",
        &encoded[..LONG_KEY_PREFIX],
        crc32fast::hash(key.as_bytes())
    )
}

fn split_long_entry(bytes: &[u8]) -> Result<(&str, &[u8])> {
    let corrupt = || SemantraError::serialization("truncated long-key entry");
    let mut header = bytes.get(..4).ok_or_else(corrupt)?;
    let len = header.read_u32::<LittleEndian>()? as usize;
    let end = 4usize.checked_add(len).ok_or_else(corrupt)?;
    let key = bytes.get(4..end).ok_or_else(corrupt)?;
    let key = std::str::from_utf8(key)
        .map_err(|e| SemantraError::serialization(format!("long-key entry: {e}")))?;
    Ok((key, &bytes[end..]))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len() * 2);
    for byte in key.bytes() {
        encoded.push_str(&format!("{byte:02x}"));
    }
    encoded
}

fn decode_key(name: &str) -> Option<String> {
    if name.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&name[i..i + 2], 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

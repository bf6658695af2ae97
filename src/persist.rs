//! # Persisted Values
//!
//! Small key/value persistence layer used for the hash index and the
//! download queue. Each value is a file named after its key in the engine's
//! data directory, framed as:
//!
//! ```text
//! <magic: 4 bytes><payload length: u32 big-endian><payload>
//! ```
//!
//! Writes go to a temporary file first and are renamed over the target, so a
//! crash never leaves a half-written value behind.

use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::Path;

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;

/// Key of the persisted chunk hash index.
pub const FILE_CACHE: &str = "hashes.ben";
/// Key of the persisted download queue.
pub const FILE_QUEUE: &str = "queue.ben";

const MAGIC: &[u8; 4] = b"LANS";

/// Write `payload` under `key`, atomically.
pub fn save_value(dir: &Path, key: &str, payload: &[u8]) -> Result<()> {
    let mut framed: Vec<u8> = Vec::with_capacity(payload.len() + 8);
    framed.extend_from_slice(MAGIC);
    framed.write_u32::<BigEndian>(payload.len() as u32)?;
    framed.extend_from_slice(payload);

    fs::create_dir_all(dir)?;

    // Write to a temporary name then rename over the target
    let suffix: u32 = rand::thread_rng().gen();
    let tmp = dir.join(format!("{}.tmp-{:08x}", key, suffix));
    fs::write(&tmp, &framed)?;
    if let Err(err) = fs::rename(&tmp, dir.join(key)) {
        let _ = fs::remove_file(&tmp);
        return Err(anyhow!("could not persist value {}: {}", key, err));
    }

    Ok(())
}

/// Read the payload stored under `key`, `None` if the value does not exist.
pub fn load_value(dir: &Path, key: &str) -> Result<Option<Vec<u8>>> {
    let data = match fs::read(dir.join(key)) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(anyhow!("could not read value {}: {}", key, err)),
    };

    if data.len() < 8 || &data[0..4] != MAGIC {
        return Err(anyhow!("value {} has an invalid header", key));
    }

    let mut cursor = Cursor::new(&data[4..8]);
    let payload_len = cursor.read_u32::<BigEndian>()? as usize;
    if data.len() - 8 != payload_len {
        return Err(anyhow!(
            "value {} is truncated: expected {} bytes, got {}",
            key,
            payload_len,
            data.len() - 8
        ));
    }

    Ok(Some(data[8..].to_vec()))
}

/// Delete the value stored under `key`. Missing values are not an error.
pub fn remove_value(dir: &Path, key: &str) -> Result<()> {
    match fs::remove_file(dir.join(key)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(anyhow!("could not remove value {}: {}", key, err)),
    }
}

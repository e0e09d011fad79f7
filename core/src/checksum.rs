//! Streaming SHA-256 of the downloaded image.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::UpdateError;

/// Digest `path` in fixed-size chunks and render lowercase hex, two
/// characters per byte. The file is never loaded whole into memory.
pub fn sha256_hex(path: &Path) -> Result<String, UpdateError> {
    let mut file =
        File::open(path).map_err(|err| UpdateError::io("open image for checksum", err))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf).map_err(|err| UpdateError::io("read image", err))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
}

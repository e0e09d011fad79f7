//! Response body materializers: to memory and to file.
//!
//! Both consume the `Response` (and with it the channel): the captured
//! fragment is used first, then the remainder is read from the channel until
//! the declared length is reached. A read of zero bytes before that point is
//! a hard failure — partial bodies are meaningless for both consumers.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::UpdateError;
use crate::exchange::Response;

const CHUNK: usize = 4096;

/// Read the full body into memory. Only used for small control-plane
/// responses; the declared length was already checked against the ceiling.
pub fn read_to_vec(response: Response) -> Result<Vec<u8>, UpdateError> {
    let (mut channel, content_length, fragment) = response.into_parts();
    let total = content_length as usize;
    let mut body = fragment;
    body.reserve(total - body.len());
    let mut buf = [0u8; CHUNK];
    while body.len() < total {
        let want = buf.len().min(total - body.len());
        let n = channel.read(&mut buf[..want]).map_err(|err| UpdateError::io("read body", err))?;
        if n == 0 {
            return Err(UpdateError::Protocol(format!(
                "body truncated: got {} of {total} bytes",
                body.len()
            )));
        }
        body.extend_from_slice(&buf[..n]);
    }
    Ok(body)
}

/// `read_to_vec` for text bodies (the JSON check response).
pub fn read_to_string(response: Response) -> Result<String, UpdateError> {
    String::from_utf8(read_to_vec(response)?)
        .map_err(|_| UpdateError::Protocol("response body is not valid UTF-8".to_string()))
}

/// Stream the body to a freshly created file, returning the byte count.
///
/// The destination is created exclusively: an existing file or symlink at the
/// path fails the download rather than being followed or overwritten, the
/// file is owner read/write only, and the opened descriptor is re-checked to
/// be a regular file. The payload is never buffered whole in memory.
pub fn download_to_file(response: Response, path: &Path) -> Result<u64, UpdateError> {
    if in_shared_tmp(path) {
        warn!(
            path = %path.display(),
            "destination is under a world-writable temp directory; \
             files there are more exposed to symlink races"
        );
    }
    debug!(path = %path.display(), "downloading update image");

    let (mut channel, content_length, fragment) = response.into_parts();
    let mut file = create_exclusive(path)?;

    file.write_all(&fragment).map_err(|err| UpdateError::io("write image file", err))?;
    let mut written = fragment.len() as u64;

    let mut buf = [0u8; CHUNK];
    while written < content_length {
        let want = buf.len().min((content_length - written) as usize);
        let n = channel.read(&mut buf[..want]).map_err(|err| UpdateError::io("read body", err))?;
        if n == 0 {
            return Err(UpdateError::Protocol(format!(
                "download truncated: got {written} of {content_length} bytes"
            )));
        }
        file.write_all(&buf[..n]).map_err(|err| UpdateError::io("write image file", err))?;
        written += n as u64;
    }
    Ok(written)
}

fn create_exclusive(path: &Path) -> Result<File, UpdateError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
        options.custom_flags(libc::O_NOFOLLOW);
    }
    let file = options.open(path).map_err(|err| UpdateError::io("create image file", err))?;

    // create_new already refused to follow an existing path; confirm the
    // descriptor we actually hold is a plain file before writing through it.
    let meta = file.metadata().map_err(|err| UpdateError::io("stat image file", err))?;
    if !meta.is_file() {
        return Err(UpdateError::NotRegularFile(path.to_path_buf()));
    }
    Ok(file)
}

fn in_shared_tmp(path: &Path) -> bool {
    path.starts_with(std::env::temp_dir())
        || path.starts_with("/tmp")
        || path.starts_with("/var/tmp")
}

use super::HashAlgorithm;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Streams a file through the chosen digest and returns `"<algorithm>:<hex>"`.
pub fn fingerprint_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut file = File::open(path)?;
    let digest = match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            stream(&mut file, |chunk| hasher.update(chunk))?;
            format!("{:x}", hasher.finalize())
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            stream(&mut file, |chunk| {
                hasher.update(chunk);
            })?;
            hasher.finalize().to_hex().to_string()
        }
    };
    Ok(format!("{}:{}", algorithm, digest))
}

/// Same format as `fingerprint_file`, for in-memory content.
pub fn fingerprint_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    let digest = match algorithm {
        HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
        HashAlgorithm::Blake3 => blake3::hash(data).to_hex().to_string(),
    };
    format!("{}:{}", algorithm, digest)
}

fn stream<R: Read>(reader: &mut R, mut sink: impl FnMut(&[u8])) -> io::Result<()> {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => sink(&buffer[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

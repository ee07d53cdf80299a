//! SHA-256 checksums for local files.
//!
//! Archive metadata records pre-image and post-image hashes as lowercase
//! hexadecimal SHA-256 digests; everything here produces that format.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{UpdateError, UpdateResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate the SHA-256 checksum of everything a reader yields.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Calculate the SHA-256 checksum of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Calculate the SHA-256 checksum of a file.
pub fn calculate_file_checksum(path: &Path) -> UpdateResult<String> {
    let file = File::open(path).map_err(|e| UpdateError::read(path, e))?;
    hash_reader(file).map_err(|e| UpdateError::read(path, e))
}

/// Whether an existing file hashes to `expected`.
///
/// Returns `false` when the file does not exist.
pub fn file_matches(path: &Path, expected: &str) -> UpdateResult<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    Ok(calculate_file_checksum(path)?.eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_calculate_file_checksum() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");

        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"hello world").unwrap();

        let checksum = calculate_file_checksum(&file_path).unwrap();
        assert_eq!(checksum, HELLO_WORLD);
    }

    #[test]
    fn test_calculate_empty_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("empty.txt");
        File::create(&file_path).unwrap();

        let checksum = calculate_file_checksum(&file_path).unwrap();
        assert_eq!(
            checksum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_calculate_nonexistent_file() {
        let result = calculate_file_checksum(Path::new("/nonexistent/file.txt"));
        assert!(matches!(result, Err(UpdateError::ReadFailed { .. })));
    }

    #[test]
    fn test_hash_bytes_matches_reader() {
        let data = vec![0xABu8; 100_000];
        assert_eq!(hash_bytes(&data), hash_reader(data.as_slice()).unwrap());
        assert_eq!(hash_bytes(b"hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_file_matches() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");

        assert!(!file_matches(&file_path, HELLO_WORLD).unwrap());

        std::fs::write(&file_path, b"hello world").unwrap();
        assert!(file_matches(&file_path, HELLO_WORLD).unwrap());
        assert!(file_matches(&file_path, &HELLO_WORLD.to_uppercase()).unwrap());
        assert!(!file_matches(&file_path, "wrong_checksum").unwrap());
    }
}

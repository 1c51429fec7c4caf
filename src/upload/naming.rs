//! Identifier validation
//!
//! File hashes and chunk names become path components, so both are
//! restricted to a conservative alphabet before touching the filesystem.

use super::types::UploadError;

/// Longest accepted file hash or chunk name
pub const MAX_NAME_LEN: usize = 128;

/// Longest accepted extension, without the dot
pub const MAX_EXT_LEN: usize = 16;

/// Validate a file hash or chunk name
pub fn validate_hash(kind: &'static str, value: &str) -> Result<(), UploadError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_NAME_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(UploadError::InvalidHash {
            kind,
            value: value.to_string(),
        })
    }
}

/// Extension of `filename`, dot included; empty when there is none
pub fn extract_ext(filename: &str) -> Result<&str, UploadError> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let Some(dot) = base.rfind('.') else {
        return Ok("");
    };

    let ext = &base[dot + 1..];
    if ext.is_empty() || ext.len() > MAX_EXT_LEN || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(UploadError::InvalidFileName(filename.to_string()));
    }

    Ok(&base[dot..])
}

/// Name of the merged file: `<fileHash><ext>`
pub fn final_file_name(file_hash: &str, filename: &str) -> Result<String, UploadError> {
    validate_hash("file hash", file_hash)?;
    let ext = extract_ext(filename)?;
    Ok(format!("{}{}", file_hash, ext))
}

/// Position of a chunk, parsed from its `-<index>` suffix
pub fn chunk_index(chunk_name: &str) -> Result<usize, UploadError> {
    chunk_name
        .rsplit_once('-')
        .and_then(|(_, suffix)| {
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                suffix.parse().ok()
            }
        })
        .ok_or_else(|| UploadError::InvalidChunkName(chunk_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_hash() {
        assert!(validate_hash("file hash", "5d41402abc4b2a76b9719d911017c592").is_ok());
        assert!(validate_hash("chunk name", "abc_def-12").is_ok());

        let long = "x".repeat(MAX_NAME_LEN + 1);
        for bad in ["", "../etc", "a/b", "a.b", "a b", long.as_str()] {
            assert!(
                matches!(validate_hash("file hash", bad), Err(UploadError::InvalidHash { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_extract_ext() {
        assert_eq!(extract_ext("movie.mp4").unwrap(), ".mp4");
        assert_eq!(extract_ext("archive.tar.gz").unwrap(), ".gz");
        assert_eq!(extract_ext(".bashrc").unwrap(), ".bashrc");
        assert_eq!(extract_ext("C:\\Users\\me\\report.PDF").unwrap(), ".PDF");
        assert_eq!(extract_ext("dir.v2/README").unwrap(), "");
    }

    #[test]
    fn test_extract_ext_without_dot_is_empty() {
        assert_eq!(extract_ext("Makefile").unwrap(), "");
        assert_eq!(extract_ext("").unwrap(), "");
    }

    #[test]
    fn test_extract_ext_rejects_unsafe_suffix() {
        assert!(extract_ext("trailing.").is_err());
        assert!(extract_ext("evil.a b").is_err());
        assert!(extract_ext("long.abcdefghijklmnopq").is_err());
    }

    #[test]
    fn test_final_file_name() {
        assert_eq!(final_file_name("abc123", "video.mkv").unwrap(), "abc123.mkv");
        assert_eq!(final_file_name("abc123", "noext").unwrap(), "abc123");
        assert!(final_file_name("../abc", "video.mkv").is_err());
    }

    #[test]
    fn test_chunk_index() {
        assert_eq!(chunk_index("abc123-0").unwrap(), 0);
        assert_eq!(chunk_index("abc-123-42").unwrap(), 42);
        assert!(chunk_index("abc123").is_err());
        assert!(chunk_index("abc123-").is_err());
        assert!(chunk_index("abc123-x1").is_err());
        assert!(chunk_index("abc123-+1").is_err());
    }
}

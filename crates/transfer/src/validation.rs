use crate::TransferError;

/// Checks a device-side file path and returns it trimmed.
///
/// Device paths are POSIX-style regardless of the host, so components are
/// split on `/` rather than run through [`std::path::Path`].
///
/// Rejects:
/// - Empty or whitespace-only paths
/// - Paths pointing at a directory (trailing `/`)
/// - Relative paths
/// - Parent directory traversal (`..`)
pub fn validate_remote_path(remote_path: &str) -> Result<String, TransferError> {
    let path = remote_path.trim();

    if path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    if path.ends_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "path points to a directory instead of a file: {path}"
        )));
    }

    if !path.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "path is not absolute: {path}"
        )));
    }

    if path.split('/').any(|component| component == "..") {
        return Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {path}"
        )));
    }

    Ok(path.to_string())
}

/// Checks a pipelining byte alignment.
///
/// 0 and 1 mean "no alignment"; otherwise it must be a power of two up to 16.
pub fn validate_memory_alignment(alignment: u32) -> Result<(), TransferError> {
    match alignment {
        0 | 1 | 2 | 4 | 8 | 16 => Ok(()),
        other => Err(TransferError::InvalidAlignment(other)),
    }
}

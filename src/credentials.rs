//! API access-token resolution.
//!
//! The token is either given inline or read from a file, typically a mounted
//! secret. Trailing whitespace is stripped from file contents since secret
//! mounts commonly end in a newline.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised while resolving the access token.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CredentialsError {
    /// Raised when both inline and file sources are provided.
    #[error("access token cannot be provided both inline and via file")]
    BothProvided,
    /// Raised when neither source is provided.
    #[error("no access token configured")]
    Missing,
    /// Raised when the inline token or the file contents are blank.
    #[error("access token must not be empty")]
    Empty,
    /// Raised when a file path is empty or only whitespace.
    #[error("access token file path must not be empty")]
    FilePathEmpty,
    /// Raised when reading the token file fails.
    #[error("failed to read access token file `{path}`: {message}")]
    FileRead {
        /// Path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Resolves the access token from either an inline value or a file.
///
/// # Errors
///
/// Returns [`CredentialsError`] when the inputs are invalid or the file
/// cannot be read.
pub fn resolve_access_token(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<String, CredentialsError> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(CredentialsError::BothProvided),
        (None, None) => Err(CredentialsError::Missing),
        (Some(token), None) => non_blank(token),
        (None, Some(path)) => {
            if path.trim().is_empty() {
                return Err(CredentialsError::FilePathEmpty);
            }
            let content =
                read_to_string_ambient(path).map_err(|message| CredentialsError::FileRead {
                    path: path.to_owned(),
                    message,
                })?;
            non_blank(&content)
        }
    }
}

fn non_blank(token: &str) -> Result<String, CredentialsError> {
    let trimmed = token.trim_end();
    if trimmed.trim_start().is_empty() {
        return Err(CredentialsError::Empty);
    }
    Ok(trimmed.to_owned())
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);

    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path_buf}"))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}

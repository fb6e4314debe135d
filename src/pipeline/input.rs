//! Input resolution: normalise a path, byte buffer, or reader into an
//! upload-ready file.
//!
//! Checks run in a fixed order so the first problem reported is always the
//! most fundamental one: existence, then type, then size. A path's size is
//! read from file metadata before its contents, so an oversized file is
//! rejected without loading it.

use crate::config::MAX_FILE_SIZE;
use crate::error::ValidationError;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Name used when the caller gives no filename.
const DEFAULT_FILENAME: &str = "document.pdf";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// A document to extract from.
pub enum FileInput {
    /// Local file; must exist and end in `.pdf` or `.docx`.
    Path(PathBuf),
    /// In-memory contents. Without a filename the type is sniffed.
    Bytes {
        bytes: Vec<u8>,
        filename: Option<String>,
    },
    /// Any readable stream, drained when the request is assembled.
    Reader {
        reader: Box<dyn Read + Send>,
        filename: Option<String>,
    },
}

impl FileInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        FileInput::Path(path.into())
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        FileInput::Bytes {
            bytes: bytes.into(),
            filename: None,
        }
    }

    pub fn named_bytes(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        FileInput::Bytes {
            bytes: bytes.into(),
            filename: Some(filename.into()),
        }
    }

    pub fn reader(reader: impl Read + Send + 'static, filename: Option<String>) -> Self {
        FileInput::Reader {
            reader: Box::new(reader),
            filename,
        }
    }
}

impl fmt::Debug for FileInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileInput::Path(p) => f.debug_tuple("Path").field(p).finish(),
            FileInput::Bytes { bytes, filename } => f
                .debug_struct("Bytes")
                .field("len", &bytes.len())
                .field("filename", filename)
                .finish(),
            FileInput::Reader { filename, .. } => {
                f.debug_struct("Reader").field("filename", filename).finish()
            }
        }
    }
}

impl From<PathBuf> for FileInput {
    fn from(p: PathBuf) -> Self {
        FileInput::Path(p)
    }
}

impl From<&Path> for FileInput {
    fn from(p: &Path) -> Self {
        FileInput::Path(p.to_path_buf())
    }
}

impl From<&str> for FileInput {
    fn from(p: &str) -> Self {
        FileInput::Path(PathBuf::from(p))
    }
}

impl From<String> for FileInput {
    fn from(p: String) -> Self {
        FileInput::Path(PathBuf::from(p))
    }
}

impl From<Vec<u8>> for FileInput {
    fn from(bytes: Vec<u8>) -> Self {
        FileInput::bytes(bytes)
    }
}

impl From<&[u8]> for FileInput {
    fn from(bytes: &[u8]) -> Self {
        FileInput::bytes(bytes.to_vec())
    }
}

/// A validated document ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Lowercased extension including the dot, or `""` when there is none.
pub fn file_extension(name: impl AsRef<Path>) -> String {
    name.as_ref()
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        ".pdf" => Some(PDF_MIME),
        ".docx" => Some(DOCX_MIME),
        _ => None,
    }
}

/// True for `.pdf` / `.docx`, case-insensitively.
pub fn is_supported_file(path: impl AsRef<Path>) -> bool {
    mime_for_extension(&file_extension(path)).is_some()
}

fn mime_for_name(name: &str) -> Result<&'static str, ValidationError> {
    let ext = file_extension(name);
    mime_for_extension(&ext).ok_or(ValidationError::UnsupportedFileType { extension: ext })
}

/// Validate and load a [`FileInput`].
pub fn prepare_file(input: FileInput) -> Result<PreparedFile, ValidationError> {
    let prepared = match input {
        FileInput::Path(path) => prepare_path(path)?,
        FileInput::Bytes { bytes, filename } => prepare_named(bytes, filename)?,
        FileInput::Reader { mut reader, filename } => {
            // Reject a bad name before draining the stream.
            if let Some(name) = &filename {
                mime_for_name(name)?;
            }
            let mut bytes = Vec::new();
            reader
                .by_ref()
                .take(MAX_FILE_SIZE + 1)
                .read_to_end(&mut bytes)
                .map_err(|source| ValidationError::Unreadable {
                    path: PathBuf::from(filename.as_deref().unwrap_or("<stream>")),
                    source,
                })?;
            if bytes.len() as u64 > MAX_FILE_SIZE {
                return Err(ValidationError::FileTooLarge {
                    size: None,
                    max: MAX_FILE_SIZE,
                });
            }
            prepare_named(bytes, filename)?
        }
    };

    debug!(
        filename = %prepared.filename,
        mime = prepared.mime_type,
        size = prepared.bytes.len(),
        "prepared document"
    );
    Ok(prepared)
}

fn prepare_path(path: PathBuf) -> Result<PreparedFile, ValidationError> {
    let meta = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ValidationError::FileNotFound { path });
        }
        Err(source) => return Err(ValidationError::Unreadable { path, source }),
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    let mime_type = mime_for_name(&filename)?;

    check_size(meta.len())?;

    let bytes = std::fs::read(&path).map_err(|source| ValidationError::Unreadable {
        path: path.clone(),
        source,
    })?;
    // The file may have changed between stat and read.
    check_size(bytes.len() as u64)?;

    Ok(PreparedFile {
        filename,
        mime_type,
        bytes,
    })
}

fn prepare_named(
    bytes: Vec<u8>,
    filename: Option<String>,
) -> Result<PreparedFile, ValidationError> {
    let (filename, mime_type) = match filename {
        Some(name) => {
            let mime = mime_for_name(&name)?;
            (name, mime)
        }
        None if bytes.starts_with(ZIP_MAGIC) => ("document.docx".to_string(), DOCX_MIME),
        None => (DEFAULT_FILENAME.to_string(), PDF_MIME),
    };

    check_size(bytes.len() as u64)?;

    Ok(PreparedFile {
        filename,
        mime_type,
        bytes,
    })
}

fn check_size(size: u64) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError::EmptyFile);
    }
    if size > MAX_FILE_SIZE {
        return Err(ValidationError::FileTooLarge {
            size: Some(size),
            max: MAX_FILE_SIZE,
        });
    }
    Ok(())
}

use std::collections::HashMap;
use std::ffi::CStr;
use std::fmt;

use crate::raw::NO_PATH;
use crate::{AlcovError, AlcovErrorKind};

/// A path resolved from the path table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedPath<'a> {
    /// The input file the coverage was measured for.
    Input(&'a str),
    /// The file a module was loaded from.
    Module(&'a str),
}

impl<'a> ResolvedPath<'a> {
    /// Returns the path string regardless of its role.
    pub fn as_str(&self) -> &'a str {
        match *self {
            ResolvedPath::Input(path) | ResolvedPath::Module(path) => path,
        }
    }
}

/// The chunk of NUL-terminated UTF-8 paths referenced by byte offset.
///
/// Paths are stored back to back. A path may be referenced by any number of
/// modules. When the table carries an input path, it is always the entry at
/// offset `0`.
#[derive(Clone, Default)]
pub struct PathTable {
    bytes: Vec<u8>,
    has_input: bool,
    offsets: HashMap<String, u64>,
}

impl PathTable {
    /// Creates an empty path table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a path table whose first entry is the measured input file.
    pub fn with_input(input_path: &str) -> Result<Self, AlcovError> {
        let mut table = Self::new();
        table.append(input_path)?;
        table.has_input = true;
        Ok(table)
    }

    /// Wraps the raw bytes of a path chunk.
    ///
    /// When `has_input` is set the entry at offset `0` must resolve.
    pub fn from_bytes(bytes: Vec<u8>, has_input: bool) -> Result<Self, AlcovError> {
        let table = Self {
            bytes,
            has_input,
            offsets: HashMap::new(),
        };
        if has_input {
            table.resolve(0)?;
        }
        Ok(table)
    }

    /// Appends `path` and returns the offset it was written at.
    pub fn append(&mut self, path: &str) -> Result<u64, AlcovError> {
        if path.as_bytes().contains(&0) {
            return Err(AlcovErrorKind::InvalidPath.into());
        }

        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(path.as_bytes());
        self.bytes.push(0);
        Ok(offset)
    }

    /// Returns the offset of `path`, appending it if it was not inserted before.
    ///
    /// Only paths inserted through this method are shared. The input path is never
    /// handed out for a module path, as offset `0` would then resolve to the input.
    pub fn insert(&mut self, path: &str) -> Result<u64, AlcovError> {
        if let Some(&offset) = self.offsets.get(path) {
            return Ok(offset);
        }
        let offset = self.append(path)?;
        self.offsets.insert(path.to_owned(), offset);
        Ok(offset)
    }

    /// Resolves the path starting at `offset`.
    pub fn resolve(&self, offset: u64) -> Result<&str, AlcovError> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start < self.bytes.len())
            .ok_or(AlcovErrorKind::InvalidOffset)?;

        let path = CStr::from_bytes_until_nul(&self.bytes[start..])
            .map_err(|e| AlcovError::new(AlcovErrorKind::InvalidOffset, e))?;
        path.to_str()
            .map_err(|e| AlcovError::new(AlcovErrorKind::InvalidPath, e))
    }

    /// Resolves a module's on-disk `path_offset`.
    ///
    /// `-1` means the module has no path and never touches the table. Any other
    /// negative offset is invalid.
    pub fn resolve_module(&self, path_offset: i64) -> Result<Option<ResolvedPath<'_>>, AlcovError> {
        if path_offset == NO_PATH {
            return Ok(None);
        }
        let offset = u64::try_from(path_offset)
            .map_err(|e| AlcovError::new(AlcovErrorKind::InvalidOffset, e))?;
        self.resolve_offset(offset).map(Some)
    }

    pub(crate) fn resolve_offset(&self, offset: u64) -> Result<ResolvedPath<'_>, AlcovError> {
        let path = self.resolve(offset)?;
        if self.has_input && offset == 0 {
            Ok(ResolvedPath::Input(path))
        } else {
            Ok(ResolvedPath::Module(path))
        }
    }

    /// Returns the measured input file, if the table carries one.
    pub fn input_path(&self) -> Option<&str> {
        if self.has_input {
            self.resolve(0).ok()
        } else {
            None
        }
    }

    /// Returns `true` if the first entry is the measured input file.
    pub fn has_input(&self) -> bool {
        self.has_input
    }

    /// Returns the raw chunk bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the size of the chunk in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the chunk holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for PathTable {
    fn eq(&self, other: &Self) -> bool {
        self.has_input == other.has_input && self.bytes == other.bytes
    }
}

impl Eq for PathTable {}

impl fmt::Debug for PathTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathTable")
            .field("input_path", &self.input_path())
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

//! Namespace types and collaborator traits
//!
//! These types describe entries of the remote namespace and the two external
//! services the engine walks it through: the streaming directory lister and
//! the asynchronous attribute fetcher. Both are collaborators, not part of
//! this crate; implementations live with the transport.

use async_trait::async_trait;

use crate::error::NamespaceResult;

/// Type of a namespace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileType {
    /// Regular file
    Regular = 0,
    /// Directory
    Dir = 1,
    /// Symbolic link
    Link = 2,
    /// Anything else (devices, sockets, fifos); never expanded or executed
    Special = 3,
}

impl FileType {
    /// Convert from the ledger integer representation
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => FileType::Regular,
            1 => FileType::Dir,
            2 => FileType::Link,
            _ => FileType::Special,
        }
    }

    /// Get the ledger integer representation
    pub fn as_db_int(&self) -> i64 {
        *self as i64
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        *self == FileType::Dir
    }

    /// Check if this entry is executable by a file-typed activity
    /// (regular files and links both count)
    pub fn is_file_like(&self) -> bool {
        matches!(self, FileType::Regular | FileType::Link)
    }
}

/// How much attribute detail a listing or fetch must supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeSet {
    /// Type only; enough for expansion decisions
    #[default]
    Basic,
    /// Type plus size/mtime/owner, for activities that need them
    Full,
}

/// Attributes of one namespace entry
#[derive(Debug, Clone, Default)]
pub struct FsAttributes {
    /// Entry type
    pub file_type: Option<FileType>,

    /// File size in bytes
    pub size: u64,

    /// Last modification time (Unix timestamp)
    pub mtime: Option<i64>,

    /// Owner user ID
    pub uid: Option<u32>,

    /// Owner group ID
    pub gid: Option<u32>,
}

impl FsAttributes {
    /// Attributes carrying only a type
    pub fn of_type(file_type: FileType) -> Self {
        Self {
            file_type: Some(file_type),
            ..Default::default()
        }
    }

    /// Entry type, defaulting to Special when the listing omitted it
    pub fn file_type(&self) -> FileType {
        self.file_type.unwrap_or(FileType::Special)
    }
}

/// One child returned from a directory listing
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Entry name (not full path)
    pub name: String,

    /// Entry attributes
    pub attrs: FsAttributes,
}

impl DirEntry {
    /// Check if this should be skipped (. or ..)
    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Security context passed through to the namespace on behalf of the request
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    /// Authenticated subject the request runs as
    pub subject: String,

    /// Restriction attached to the subject's session
    pub restriction: String,
}

/// Streaming directory lister
///
/// `list` is a blocking call made from within a listing task, bounded by the
/// engine's listing permits. Implementations must stream: they may buffer a
/// page of entries but never the whole directory.
pub trait DirLister: Send + Sync {
    /// List the immediate children of `path`
    fn list(
        &self,
        ctx: &SecurityContext,
        path: &str,
        attrs: AttributeSet,
    ) -> NamespaceResult<Box<dyn Iterator<Item = NamespaceResult<DirEntry>> + Send>>;
}

/// Asynchronous attribute fetcher, used once per initial target before
/// expansion decides how to treat it
#[async_trait]
pub trait AttributeFetcher: Send + Sync {
    /// Fetch attributes for a single path
    async fn fetch(
        &self,
        ctx: &SecurityContext,
        path: &str,
        attrs: AttributeSet,
    ) -> NamespaceResult<FsAttributes>;
}

/// Join a parent path and a child name
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if parent.is_empty() {
        format!("/{}", child)
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Depth of a path, counted in components
///
/// Used to order the final directory pass deepest-first.
pub fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

//! Core data model: metadata entries, node kinds, open flags and stat snapshots.

use serde::{Deserialize, Serialize};

use crate::path;

/// Payloads at or above this many bytes live in the data blob table.
pub const INLINE_THRESHOLD: usize = 4096;

/// Bit mask for the file type bit field.
pub const S_IFMT: u32 = 0o170000;
/// Directory type bits.
pub const S_IFDIR: u32 = 0o040000;
/// Regular file type bits.
pub const S_IFREG: u32 = 0o100000;
/// Symbolic link type bits.
pub const S_IFLNK: u32 = 0o120000;
/// Permission bits that `chmod` may change.
pub const PERM_MASK: u32 = 0o777;

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Where a file or symlink payload is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Bytes stored inside the metadata entry.
    Inline(Vec<u8>),
    /// Bytes stored in the data blob table under the same path.
    External,
}

impl Payload {
    /// Returns true if the bytes live in the blob table.
    pub fn is_external(&self) -> bool {
        matches!(self, Payload::External)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Inline(Vec::new())
    }
}

/// Node type together with its type-specific fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Regular file.
    File(Payload),
    /// Directory; carries no payload.
    Directory,
    /// Symbolic link; payload is the UTF-8 target path.
    Symlink(Payload),
}

/// Type tag without payload, for stat results and listings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file (S_IFREG)
    File,
    /// Directory (S_IFDIR)
    Directory,
    /// Symbolic link (S_IFLNK)
    Symlink,
}

impl FileType {
    /// Returns the POSIX S_IFMT bits for this file type
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileType::File => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
        }
    }
}

/// Durable record describing one namespace node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    /// Normalized path; `.` for the root.
    pub path: String,
    /// Path of the containing directory; `.` for the root itself.
    pub parent: String,
    /// Node type and payload location.
    pub kind: NodeKind,
    /// Type and permission bits.
    pub mode: u32,
    /// Last modification time, seconds.
    pub mtime: u64,
    /// Last access time, seconds.
    pub atime: u64,
    /// Payload length in bytes; 0 for directories.
    pub size: u64,
}

impl MetaEntry {
    fn new(path: &str, kind: NodeKind, mode: u32, size: u64) -> Self {
        let now = unix_now();
        Self {
            path: path.to_string(),
            parent: path::dirname(path),
            kind,
            mode,
            mtime: now,
            atime: now,
            size,
        }
    }

    /// Creates an empty regular file entry with mode `0644`.
    pub fn new_file(path: &str) -> Self {
        Self::new(path, NodeKind::File(Payload::default()), S_IFREG | 0o644, 0)
    }

    /// Creates a directory entry with the given permission bits.
    pub fn new_directory(path: &str, perm: u32) -> Self {
        Self::new(path, NodeKind::Directory, S_IFDIR | (perm & PERM_MASK), 0)
    }

    /// Creates a symlink entry whose inline payload is `target`.
    pub fn new_symlink(path: &str, target: &str) -> Self {
        Self::new(
            path,
            NodeKind::Symlink(Payload::Inline(target.as_bytes().to_vec())),
            S_IFLNK | 0o777,
            target.len() as u64,
        )
    }

    /// Type tag of this node.
    pub fn file_type(&self) -> FileType {
        match self.kind {
            NodeKind::File(_) => FileType::File,
            NodeKind::Directory => FileType::Directory,
            NodeKind::Symlink(_) => FileType::Symlink,
        }
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    /// Returns true for symbolic links.
    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, NodeKind::Symlink(_))
    }

    /// Payload location, if this node type carries one.
    pub fn payload(&self) -> Option<&Payload> {
        match &self.kind {
            NodeKind::File(p) | NodeKind::Symlink(p) => Some(p),
            NodeKind::Directory => None,
        }
    }

    /// True iff the payload lives in the data blob table.
    pub fn data_external(&self) -> bool {
        self.payload().map(Payload::is_external).unwrap_or(false)
    }

    /// Replaces the payload location. Ignored for directories.
    pub(crate) fn set_payload(&mut self, payload: Payload) {
        match &mut self.kind {
            NodeKind::File(p) | NodeKind::Symlink(p) => *p = payload,
            NodeKind::Directory => {}
        }
    }

    /// Moves the entry to `new_path`, recomputing its parent.
    pub(crate) fn relocate(&mut self, new_path: String) {
        self.parent = path::dirname(&new_path);
        self.path = new_path;
    }
}

/// Point-in-time attributes of a node, as returned by `stat` and `readdir`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Last path component (`.` for the root).
    pub name: String,
    /// Node type.
    pub file_type: FileType,
    /// Type and permission bits.
    pub mode: u32,
    /// Last modification time, seconds.
    pub mtime: u64,
    /// Last access time, seconds.
    pub atime: u64,
    /// Payload length in bytes.
    pub size: u64,
    /// Whether the payload lives in the blob table.
    pub data_external: bool,
}

impl Stat {
    /// Builds a snapshot from a metadata entry.
    pub fn from_entry(entry: &MetaEntry) -> Self {
        Self {
            name: path::basename(&entry.path),
            file_type: entry.file_type(),
            mode: entry.mode,
            mtime: entry.mtime,
            atime: entry.atime,
            size: entry.size,
            data_external: entry.data_external(),
        }
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Flags for `openfile`, using the Linux numeric values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Read-only access (access mode 0).
    pub const RDONLY: OpenFlags = OpenFlags(0);
    /// Write-only access.
    pub const WRONLY: OpenFlags = OpenFlags(0o1);
    /// Read-write access.
    pub const RDWR: OpenFlags = OpenFlags(0o2);
    /// Create the file if missing.
    pub const CREATE: OpenFlags = OpenFlags(0o100);
    /// With CREATE, fail if the file exists.
    pub const EXCLUSIVE: OpenFlags = OpenFlags(0o200);
    /// Truncate to zero length on open.
    pub const TRUNCATE: OpenFlags = OpenFlags(0o1000);
    /// Every write goes to the end of the file.
    pub const APPEND: OpenFlags = OpenFlags(0o2000);

    const ACCESS_MASK: u32 = 0o3;

    /// Wraps raw flag bits.
    pub fn from_bits(bits: u32) -> Self {
        OpenFlags(bits)
    }

    /// Raw flag bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Checks if every bit of `other` is set. Access-mode values are compared
    /// with [`OpenFlags::access_mode`] instead.
    pub fn contains(&self, other: OpenFlags) -> bool {
        other.0 != 0 && (self.0 & other.0) == other.0
    }

    /// The access-mode part of the flags (RDONLY, WRONLY or RDWR).
    pub fn access_mode(&self) -> OpenFlags {
        OpenFlags(self.0 & Self::ACCESS_MASK)
    }

    /// Returns true if the handle may read.
    pub fn is_readable(&self) -> bool {
        self.access_mode() != Self::WRONLY
    }

    /// Returns true if the handle may write.
    pub fn is_writable(&self) -> bool {
        self.access_mode() != Self::RDONLY
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        OpenFlags(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_defaults() {
        let entry = MetaEntry::new_file("a/b.txt");
        assert_eq!(entry.parent, "a");
        assert_eq!(entry.file_type(), FileType::File);
        assert_eq!(entry.mode & S_IFMT, S_IFREG);
        assert_eq!(entry.size, 0);
        assert!(!entry.data_external());
        assert_eq!(entry.payload(), Some(&Payload::Inline(Vec::new())));
    }

    #[test]
    fn test_new_directory_masks_perm() {
        let entry = MetaEntry::new_directory("d", 0o40755);
        assert_eq!(entry.mode, S_IFDIR | 0o755);
        assert!(entry.is_dir());
        assert!(entry.payload().is_none());
        assert!(!entry.data_external());
    }

    #[test]
    fn test_new_symlink_payload() {
        let entry = MetaEntry::new_symlink("link", "target/file");
        assert!(entry.is_symlink());
        assert_eq!(entry.size, 11);
        assert_eq!(
            entry.payload(),
            Some(&Payload::Inline(b"target/file".to_vec()))
        );
    }

    #[test]
    fn test_single_segment_parent_is_root() {
        assert_eq!(MetaEntry::new_file("top").parent, ".");
    }

    #[test]
    fn test_relocate_updates_parent() {
        let mut entry = MetaEntry::new_file("x/y/f");
        entry.relocate("z/y/f".to_string());
        assert_eq!(entry.path, "z/y/f");
        assert_eq!(entry.parent, "z/y");
    }

    #[test]
    fn test_set_payload_ignored_for_directory() {
        let mut dir = MetaEntry::new_directory("d", 0o755);
        dir.set_payload(Payload::External);
        assert!(!dir.data_external());

        let mut file = MetaEntry::new_file("f");
        file.set_payload(Payload::External);
        assert!(file.data_external());
        assert_eq!(file.payload(), Some(&Payload::External));
    }

    #[test]
    fn test_open_flags_access_mode() {
        let flags = OpenFlags::WRONLY | OpenFlags::CREATE | OpenFlags::APPEND;
        assert_eq!(flags.access_mode(), OpenFlags::WRONLY);
        assert!(!flags.is_readable());
        assert!(flags.is_writable());
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(!flags.contains(OpenFlags::EXCLUSIVE));
        assert!(!flags.contains(OpenFlags::RDONLY));

        let ro = OpenFlags::RDONLY;
        assert!(ro.is_readable());
        assert!(!ro.is_writable());
        assert!(OpenFlags::RDWR.is_readable() && OpenFlags::RDWR.is_writable());
    }

    #[test]
    fn test_open_flags_linux_values() {
        let flags = OpenFlags::from_bits(0o100 | 0o200 | 0o1000 | 0o2);
        assert!(flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE));
        assert!(flags.contains(OpenFlags::TRUNCATE));
        assert_eq!(flags.access_mode(), OpenFlags::RDWR);
    }

    #[test]
    fn test_stat_from_entry() {
        let mut entry = MetaEntry::new_file("a/b.txt");
        entry.size = 5000;
        entry.set_payload(Payload::External);
        let stat = Stat::from_entry(&entry);
        assert_eq!(stat.name, "b.txt");
        assert_eq!(stat.size, 5000);
        assert!(stat.data_external);
        assert!(!stat.is_dir());
    }

    #[test]
    fn test_meta_entry_serde_roundtrip() {
        let entry = MetaEntry::new_symlink("l", "t");
        let encoded = bincode::serialize(&entry).unwrap();
        let decoded: MetaEntry = bincode::deserialize(&encoded).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn test_filetype_mode_bits() {
        assert_eq!(FileType::File.mode_bits(), 0o100000);
        assert_eq!(FileType::Directory.mode_bits(), 0o040000);
        assert_eq!(FileType::Symlink.mode_bits(), 0o120000);
    }
}

use std::io::*;
use std::path::{Path, PathBuf};

use crate::*;

/// A VFS which reads file sizes from disk.
///
/// When given a root directory, this handles the rather tricky path cases around Windows and Linux differences, and
/// makes it so that you can and should use keys like `/b/c` (behavior with `\` is undefined).  Additionally, it makes a
/// best effort to disallow a user to use relative paths to escape the root directory, primarily as a measure to detect
/// bugs.  Without a root, keys are plain OS paths.
#[derive(Debug)]
pub struct FilesystemVfs {
    root_path: Option<PathBuf>,
}

fn conv_path(path: impl AsRef<Path>) -> Result<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(path)
        .map_err(|_| Error::new(ErrorKind::Other, "Invalid path"))
}

impl FilesystemVfs {
    pub fn new(root_path: &Path) -> std::io::Result<FilesystemVfs> {
        Ok(FilesystemVfs {
            root_path: Some(root_path.to_path_buf()),
        })
    }

    /// A VFS which accepts any path the OS does.
    pub fn unrooted() -> FilesystemVfs {
        FilesystemVfs { root_path: None }
    }

    /// Resolve a key to the path on disk, rejecting keys which escape the root.
    pub fn resolve(&self, path: &Path) -> std::io::Result<PathBuf> {
        let root = match &self.root_path {
            Some(r) => r,
            None => return Ok(path.to_path_buf()),
        };

        // On Windows, canonicalize is currently very broken when relative path segments appear in the middle of a
        // path, and stdlib doesn't help us out. Go via `RelativePathBuf` to clean it up.
        let absolute = conv_path(path)?.to_logical_path(root);
        if !absolute.starts_with(root) {
            return Err(Error::new(
                ErrorKind::Other,
                "path is outside the vfs root directory",
            ));
        }
        Ok(absolute)
    }
}

impl Vfs for FilesystemVfs {
    fn file_size(&self, key: &str) -> std::io::Result<u64> {
        let meta = std::fs::metadata(self.resolve(Path::new(key))?)?;
        Ok(meta.len())
    }
}

//! Post-extraction filesystem sanitizer.
//!
//! Extracted trees are untrusted input. Before a directory is enqueued
//! for recursion, every symlink in it is clamped into the extraction
//! root or removed, and directory/file modes get a floor so the
//! extracting user can re-enter and read everything. The floor is a
//! bitwise OR: permissions an extractor intentionally set are never
//! stripped.

use fnv::{FnvHashMap, FnvHashSet};
use log::{debug, warn};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Upper bound on link-chain hops while probing for cycles.
const MAX_LINK_DEPTH: usize = 40;

const DIR_MODE_FLOOR: u32 = 0o775;
const FILE_MODE_FLOOR: u32 = 0o644;

/// Final state of an inspected symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkFix {
    /// Target clamped into the root; holds the absolute destination.
    Rewritten(PathBuf),
    /// Link pointed outside the root or formed a cycle.
    Removed,
}

/// Raises the mode of `path` to the floor for its file type. Symlink
/// modes are meaningless and left alone.
pub fn fix_permission(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    let file_type = meta.file_type();
    let floor = if file_type.is_dir() {
        DIR_MODE_FLOOR
    } else if file_type.is_file() {
        FILE_MODE_FLOOR
    } else {
        return Ok(());
    };
    let mode = meta.permissions().mode();
    let wanted = mode | floor;
    if wanted != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(wanted))?;
    }
    Ok(())
}

/// Lexically resolves `.` and `..`, without touching the filesystem.
/// Resolving through the filesystem would follow other symlinks, which
/// is exactly what must not happen here.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Relative path from directory `from` to `to`; both must be absolute
/// and lexically normalized.
fn relative_to(from: &Path, to: &Path) -> PathBuf {
    let mut from_comps = from.components().peekable();
    let mut to_comps = to.components().peekable();
    while let (Some(a), Some(b)) = (from_comps.peek(), to_comps.peek()) {
        if a != b {
            break;
        }
        from_comps.next();
        to_comps.next();
    }
    let mut rel = PathBuf::new();
    for _ in from_comps {
        rel.push("..");
    }
    for comp in to_comps {
        rel.push(comp.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

/// Absolute destination a link's stored target points at. Absolute
/// targets are reinterpreted as relative to the extraction root: a link
/// to `/etc/passwd` inside an image means `<root>/etc/passwd`.
fn link_destination(link: &Path, target: &Path, root: &Path) -> PathBuf {
    let joined = if target.is_absolute() {
        let stripped: PathBuf = target
            .components()
            .filter(|c| !matches!(c, Component::RootDir))
            .collect();
        root.join(stripped)
    } else {
        link.parent().unwrap_or(root).join(target)
    };
    normalize(&joined)
}

/// Inspects one symlink: removes it if its target escapes `root` or if
/// following it through `target_of` (the recorded link set) loops, and
/// otherwise rewrites its stored target to the relative path from the
/// link's parent to the clamped destination.
fn fix_symlink_with<F>(link: &Path, root: &Path, target_of: F) -> io::Result<LinkFix>
where
    F: Fn(&Path) -> Option<PathBuf>,
{
    let raw = fs::read_link(link)?;
    let dest = link_destination(link, &raw, root);
    if !dest.starts_with(root) {
        warn!(
            "removing symlink {:?}: target {:?} escapes the extraction root",
            link, raw
        );
        fs::remove_file(link)?;
        return Ok(LinkFix::Removed);
    }

    // Probe the chain behind the destination. OS resolution would
    // either follow links or fail opaquely, so walk the recorded link
    // set with a step limit instead.
    let mut seen = FnvHashSet::default();
    seen.insert(link.to_path_buf());
    let mut cursor = dest.clone();
    let mut steps = 0;
    while let Some(next_target) = target_of(&cursor) {
        steps += 1;
        if steps > MAX_LINK_DEPTH || !seen.insert(cursor.clone()) {
            warn!("removing symlink {:?}: link cycle via {:?}", link, cursor);
            fs::remove_file(link)?;
            return Ok(LinkFix::Removed);
        }
        let next = link_destination(&cursor, &next_target, root);
        if !next.starts_with(root) {
            // The out-of-root member is dealt with when it is inspected
            // itself; this link stays.
            break;
        }
        cursor = next;
    }

    let parent = link.parent().unwrap_or(root);
    let wanted = relative_to(parent, &dest);
    if wanted != raw {
        debug!("rewriting symlink {:?}: {:?} -> {:?}", link, raw, wanted);
        fs::remove_file(link)?;
        std::os::unix::fs::symlink(&wanted, link)?;
    }
    Ok(LinkFix::Rewritten(dest))
}

/// Inspects a single symlink against the live filesystem. Returns the
/// clamped absolute destination, or `None` if the link was removed.
pub fn fix_symlink(link: &Path, root: &Path) -> io::Result<Option<PathBuf>> {
    let root = normalize(root);
    let fix = fix_symlink_with(link, &root, |path| match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::read_link(path).ok(),
        _ => None,
    })?;
    Ok(match fix {
        LinkFix::Rewritten(dest) => Some(dest),
        LinkFix::Removed => None,
    })
}

/// Sanitizes an extracted directory tree: symlinks are clamped into
/// `outdir` or removed, modes get their floor. Directory modes are
/// raised when the directory is first visited, so the walk can descend
/// into write-only trees an extractor may have produced.
///
/// Problems are logged and skipped; partial extractor output must not
/// bring down the task.
pub fn fix_extracted_directory(outdir: &Path) {
    if fs::symlink_metadata(outdir).is_err() {
        return;
    }
    let root = normalize(outdir);
    let mut links: FnvHashMap<PathBuf, PathBuf> = FnvHashMap::default();
    for entry in WalkDir::new(&root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("cannot walk extracted dir: {}", err);
                continue;
            }
        };
        if entry.file_type().is_symlink() {
            match fs::read_link(entry.path()) {
                Ok(target) => {
                    links.insert(entry.path().to_path_buf(), target);
                }
                Err(err) => warn!("cannot read symlink {:?}: {}", entry.path(), err),
            }
        } else if let Err(err) = fix_permission(entry.path()) {
            warn!("cannot fix permissions of {:?}: {}", entry.path(), err);
        }
    }
    // Cycle detection runs against the link set recorded above, so a
    // ring of links is removed as a whole even though its members
    // disappear one by one.
    for link in links.keys() {
        if let Err(err) = fix_symlink_with(link, &root, |path| links.get(path).cloned()) {
            warn!("cannot fix symlink {:?}: {}", link, err);
        }
    }
}

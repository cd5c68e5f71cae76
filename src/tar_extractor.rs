use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar_rs as tar;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";
const MAX_SYMLINK_HOPS: usize = 40;

/// Counters for one applied layer, used for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LayerStats {
    pub entries: usize,
    pub whiteouts: usize,
    pub skipped: usize,
}

/// Normalizes a path from a tar archive to a relative path that cannot leave the root.
pub(crate) fn normalize_tar_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    out
}

/// Resolves symlinked ancestors of `rel` lexically inside `root`.
///
/// The final component is left untouched, so a symlink being replaced is not followed.
/// Absolute link targets are re-rooted at `root`, and `..` never climbs above it.
pub(crate) fn resolve_in_root(root: &Path, rel: &Path) -> PathBuf {
    let mut pending: VecDeque<OsString> = normalize_tar_path(rel)
        .components()
        .map(|c| c.as_os_str().to_os_string())
        .collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(comp) = pending.pop_front() {
        let candidate = resolved.join(&comp);

        if !pending.is_empty() && hops < MAX_SYMLINK_HOPS {
            let on_disk = root.join(&candidate);
            let is_link = fs::symlink_metadata(&on_disk)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);

            if is_link {
                if let Ok(target) = fs::read_link(&on_disk) {
                    hops += 1;
                    let base = if target.is_absolute() {
                        PathBuf::new()
                    } else {
                        resolved.clone()
                    };
                    let mut restarted: VecDeque<OsString> = normalize_tar_path(&base.join(target))
                        .components()
                        .map(|c| c.as_os_str().to_os_string())
                        .collect();
                    restarted.extend(pending.drain(..));
                    pending = restarted;
                    resolved = PathBuf::new();
                    continue;
                }
            }
        }

        resolved = candidate;
    }

    resolved
}

/// Removes whatever currently sits at `path` (file, symlink or directory tree).
fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display())),
        Ok(_) => fs::remove_file(path)
            .with_context(|| format!("Failed to remove file: {}", path.display())),
        Err(_) => Ok(()),
    }
}

/// Removes everything under `dir` that the current layer did not write. Directories the layer
/// re-emitted are kept but cleared the same way, so no lower-layer path survives beneath them.
fn clear_opaque(root: &Path, dir: &Path, written: &HashSet<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(root.join(dir))? {
        let entry = entry?;
        let rel = dir.join(entry.file_name());
        if !written.contains(&rel) {
            remove_existing(&entry.path())?;
            continue;
        }
        let is_real_dir = fs::symlink_metadata(entry.path())
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_real_dir {
            clear_opaque(root, &rel, written)?;
        }
    }
    Ok(())
}

/// Applies a whiteout marker: `.wh..wh..opq` empties its directory of lower-layer content,
/// `.wh.<name>` deletes `<name>`. Paths written earlier in the same layer survive.
fn apply_whiteout(
    root: &Path,
    rel_path: &Path,
    file_name: &str,
    written: &HashSet<PathBuf>,
) -> Result<()> {
    let parent = resolve_in_root(root, rel_path.parent().unwrap_or_else(|| Path::new("")));

    if file_name == OPAQUE_MARKER {
        let opaque_dir = root.join(&parent);
        if !opaque_dir.is_dir() {
            return Ok(());
        }
        log::debug!("Opaque directory marker, clearing: {}", opaque_dir.display());
        return clear_opaque(root, &parent, written);
    }

    let deleted_name = &file_name[WHITEOUT_PREFIX.len()..];
    if deleted_name.is_empty() {
        return Ok(());
    }
    let deleted_path = root.join(&parent).join(deleted_name);
    log::debug!("Whiteout marker, deleting: {}", deleted_path.display());
    remove_existing(&deleted_path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        log::warn!("Failed to set permissions on {}: {}", path.display(), e);
    }
}

/// Hardlinks `dest` to `target`, copying when the filesystem refuses links.
fn link_or_copy(target: &Path, dest: &Path) -> Result<()> {
    if !target.is_file() {
        anyhow::bail!("hardlink target missing: {}", target.display());
    }
    remove_existing(dest)?;
    if let Err(e) = fs::hard_link(target, dest) {
        log::debug!(
            "hardlink failed ({}), falling back to copy: {} -> {}",
            e,
            target.display(),
            dest.display()
        );
        fs::copy(target, dest)
            .with_context(|| format!("Failed to copy {} to {}", target.display(), dest.display()))?;
    }
    Ok(())
}

struct PendingHardlink {
    dest: PathBuf,
    target: PathBuf,
}

fn open_archive(tar_path: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = File::open(tar_path)
        .with_context(|| format!("Failed to open tar file: {}", tar_path.display()))?;

    let mut magic_bytes = [0u8; 2];
    BufReader::new(file)
        .read_exact(&mut magic_bytes)
        .context("Failed to read magic bytes from tar file")?;

    let file = File::open(tar_path)?;
    let reader: Box<dyn Read> = if magic_bytes == [0x1f, 0x8b] {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(tar::Archive::new(reader))
}

/// Unpacks a plain archive (the outer `docker save` tarball) into `extract_dir`.
pub fn extract_tar(tar_path: &Path, extract_dir: &Path) -> Result<()> {
    apply_layer(tar_path, extract_dir).map(|_| ())
}

/// Applies one layer tarball (plain or gzipped) on top of `root`.
///
/// Later layers override earlier ones path by path, and whiteout markers delete lower-layer
/// paths instead of being materialized. Symlinks are stored with their original target and are
/// never followed outside `root`.
pub fn apply_layer(tar_path: &Path, root: &Path) -> Result<LayerStats> {
    let mut archive = open_archive(tar_path)?;
    let mut stats = LayerStats::default();
    let mut written: HashSet<PathBuf> = HashSet::new();
    let mut pending_hardlinks = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result.context("Failed to read tar entry")?;
        let entry_type = entry.header().entry_type();
        let raw_path = entry.path().context("Failed to get entry path")?.into_owned();
        let rel_path = normalize_tar_path(&raw_path);

        if rel_path.as_os_str().is_empty() {
            continue;
        }

        if let Some(file_name) = rel_path.file_name().and_then(|n| n.to_str()) {
            if file_name.starts_with(WHITEOUT_PREFIX) {
                apply_whiteout(root, &rel_path, file_name, &written)?;
                stats.whiteouts += 1;
                continue;
            }
        }

        let rel_path = resolve_in_root(root, &rel_path);
        let dest = root.join(&rel_path);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        #[cfg(unix)]
        let mode = entry.header().mode().ok();

        match entry_type {
            tar::EntryType::Directory => {
                if fs::symlink_metadata(&dest).map(|m| !m.is_dir()).unwrap_or(false) {
                    remove_existing(&dest)?;
                }
                fs::create_dir_all(&dest)
                    .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
                #[cfg(unix)]
                {
                    set_mode(&dest, mode.unwrap_or(0o755) | 0o700);
                }
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                remove_existing(&dest)?;
                let mut out_file = File::create(&dest)
                    .with_context(|| format!("Failed to create file: {}", dest.display()))?;
                std::io::copy(&mut entry, &mut out_file)
                    .with_context(|| format!("Failed to write file: {}", dest.display()))?;
                // Owner must be able to read the file so it can be digested later.
                #[cfg(unix)]
                {
                    if let Some(mode) = mode {
                        set_mode(&dest, mode | 0o400);
                    }
                }
            }
            tar::EntryType::Symlink => {
                let link_name = entry
                    .link_name()
                    .context("Failed to get symlink target")?
                    .ok_or_else(|| anyhow::anyhow!("Symlink without target: {}", raw_path.display()))?
                    .into_owned();
                remove_existing(&dest)?;

                #[cfg(unix)]
                {
                    std::os::unix::fs::symlink(&link_name, &dest).with_context(|| {
                        format!(
                            "Failed to create symlink {} -> {}",
                            dest.display(),
                            link_name.display()
                        )
                    })?;
                }

                #[cfg(not(unix))]
                log::warn!("Symlink support not implemented on this platform: {}", dest.display());
            }
            tar::EntryType::Link => {
                let link_name = entry
                    .link_name()
                    .context("Failed to get hardlink target")?
                    .ok_or_else(|| anyhow::anyhow!("Hardlink without target: {}", raw_path.display()))?
                    .into_owned();
                let target = root.join(resolve_in_root(root, &link_name));
                pending_hardlinks.push(PendingHardlink { dest, target });
            }
            other => {
                log::debug!("Skipping unsupported entry type {:?}: {}", other, rel_path.display());
                stats.skipped += 1;
                continue;
            }
        }

        written.insert(rel_path);
        stats.entries += 1;
    }

    // Hardlink targets may appear later in the archive than the link itself.
    for hardlink in pending_hardlinks {
        if let Err(e) = link_or_copy(&hardlink.target, &hardlink.dest) {
            log::warn!(
                "Skipping broken hardlink {} -> {}: {}",
                hardlink.dest.display(),
                hardlink.target.display(),
                e
            );
            stats.skipped += 1;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn append_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, content: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, path, content).unwrap();
    }

    fn append_dir(builder: &mut tar::Builder<Vec<u8>>, path: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::Directory);
        builder.append_data(&mut header, path, std::io::empty()).unwrap();
    }

    fn append_link(
        builder: &mut tar::Builder<Vec<u8>>,
        kind: tar::EntryType,
        path: &str,
        target: &str,
    ) {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o777);
        header.set_entry_type(kind);
        builder.append_link(&mut header, path, target).unwrap();
    }

    fn write_layer(dir: &Path, name: &str, build: impl FnOnce(&mut tar::Builder<Vec<u8>>)) -> PathBuf {
        let mut builder = tar::Builder::new(Vec::new());
        build(&mut builder);
        let bytes = builder.into_inner().unwrap();
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_normalize_tar_path() {
        assert_eq!(normalize_tar_path(Path::new("./etc/passwd")), PathBuf::from("etc/passwd"));
        assert_eq!(normalize_tar_path(Path::new("/usr/bin")), PathBuf::from("usr/bin"));
        assert_eq!(normalize_tar_path(Path::new("../../etc/shadow")), PathBuf::from("etc/shadow"));
        assert_eq!(normalize_tar_path(Path::new("a/b/../c")), PathBuf::from("a/c"));
    }

    #[test]
    fn test_later_layer_overrides_and_whiteouts_delete() {
        let work = TempDir::new().unwrap();
        let root = work.path().join("rootfs");
        fs::create_dir_all(&root).unwrap();

        let lower = write_layer(work.path(), "lower.tar", |b| {
            append_dir(b, "etc/");
            append_file(b, "etc/a.conf", b"one");
            append_file(b, "etc/b.conf", b"two");
            append_dir(b, "opt/app/");
            append_file(b, "opt/app/old.txt", b"old");
        });
        let upper = write_layer(work.path(), "upper.tar", |b| {
            append_file(b, "etc/a.conf", b"replaced");
            append_file(b, "etc/.wh.b.conf", b"");
            append_dir(b, "opt/app/");
            append_file(b, "opt/app/new.txt", b"new");
            append_file(b, "opt/app/.wh..wh..opq", b"");
        });

        apply_layer(&lower, &root).unwrap();
        let stats = apply_layer(&upper, &root).unwrap();

        assert_eq!(stats.whiteouts, 2);
        assert_eq!(fs::read_to_string(root.join("etc/a.conf")).unwrap(), "replaced");
        assert!(!root.join("etc/b.conf").exists());
        assert!(!root.join("etc/.wh.b.conf").exists());
        assert!(!root.join("opt/app/old.txt").exists());
        assert_eq!(fs::read_to_string(root.join("opt/app/new.txt")).unwrap(), "new");
        assert!(!root.join("opt/app/.wh..wh..opq").exists());
    }

    #[test]
    fn test_opaque_marker_clears_lower_files_under_reemitted_subdirectories() {
        let work = TempDir::new().unwrap();
        let root = work.path().join("rootfs");
        fs::create_dir_all(&root).unwrap();

        let lower = write_layer(work.path(), "lower.tar", |b| {
            append_dir(b, "opt/app/sub/");
            append_file(b, "opt/app/sub/old.txt", b"old");
            append_file(b, "opt/app/top.txt", b"top");
        });
        let upper = write_layer(work.path(), "upper.tar", |b| {
            append_dir(b, "opt/app/");
            append_dir(b, "opt/app/sub/");
            append_file(b, "opt/app/sub/new.txt", b"new");
            append_file(b, "opt/app/.wh..wh..opq", b"");
        });

        apply_layer(&lower, &root).unwrap();
        apply_layer(&upper, &root).unwrap();

        assert!(!root.join("opt/app/sub/old.txt").exists());
        assert!(!root.join("opt/app/top.txt").exists());
        assert!(root.join("opt/app/sub").is_dir());
        assert_eq!(fs::read_to_string(root.join("opt/app/sub/new.txt")).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_kept_verbatim_and_never_escape() {
        let work = TempDir::new().unwrap();
        let root = work.path().join("rootfs");
        fs::create_dir_all(&root).unwrap();

        let layer = write_layer(work.path(), "layer.tar", |b| {
            append_dir(b, "usr/lib/");
            append_link(b, tar::EntryType::Symlink, "lib", "/usr/lib");
            append_file(b, "lib/libc.so", b"elf");
            append_link(b, tar::EntryType::Link, "usr/lib/libc.so.6", "usr/lib/libc.so");
        });

        apply_layer(&layer, &root).unwrap();

        assert_eq!(fs::read_link(root.join("lib")).unwrap(), PathBuf::from("/usr/lib"));
        assert_eq!(fs::read_to_string(root.join("usr/lib/libc.so")).unwrap(), "elf");
        assert_eq!(fs::read_to_string(root.join("usr/lib/libc.so.6")).unwrap(), "elf");
    }

    #[test]
    fn test_gzipped_layers_are_detected() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let work = TempDir::new().unwrap();
        let root = work.path().join("rootfs");
        fs::create_dir_all(&root).unwrap();

        let plain = write_layer(work.path(), "plain.tar", |b| append_file(b, "hello.txt", b"hi"));
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&fs::read(&plain).unwrap()).unwrap();
        let gz = work.path().join("layer.tar.gz");
        fs::write(&gz, encoder.finish().unwrap()).unwrap();

        let stats = apply_layer(&gz, &root).unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(fs::read_to_string(root.join("hello.txt")).unwrap(), "hi");
    }

    #[test]
    fn test_missing_archive_is_an_error() {
        let work = TempDir::new().unwrap();
        assert!(apply_layer(&work.path().join("nope.tar"), work.path()).is_err());
    }
}

//! Debian package database (`/var/lib/dpkg/status`).
//!
//! Distroless images ship one stanza file per package under `/var/lib/dpkg/status.d/`
//! instead; both are read. `Installed-Size` is recorded in KiB and reported in bytes.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::package::{
    insert_record, is_real_dir, is_regular_file, path_in_root, PackageMap, PackageParser,
    PackageRecord,
};

const STATUS_FILE: &str = "var/lib/dpkg/status";
const STATUS_DIR: &str = "var/lib/dpkg/status.d";

pub struct AptParser;

impl PackageParser for AptParser {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn parse(&self, root: &Path) -> Result<PackageMap> {
        let mut packages = PackageMap::new();

        let status = path_in_root(root, STATUS_FILE);
        if is_regular_file(&status) {
            let content = fs::read_to_string(&status)
                .with_context(|| format!("Failed to read {}", status.display()))?;
            parse_status(&content, &mut packages);
        }

        let status_dir = path_in_root(root, STATUS_DIR);
        if is_real_dir(&status_dir) {
            let mut files: Vec<_> = fs::read_dir(&status_dir)
                .with_context(|| format!("Failed to list {}", status_dir.display()))?
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .filter(|p| p.extension().map(|e| e != "md5sums").unwrap_or(true))
                .collect();
            files.sort();
            for file in files {
                let content = fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                parse_status(&content, &mut packages);
            }
        }

        Ok(packages)
    }
}

/// Parses dpkg status stanzas into `packages`, skipping entries that are not installed.
pub fn parse_status(content: &str, packages: &mut PackageMap) {
    for stanza in content.split("\n\n") {
        let mut name = None;
        let mut version = None;
        let mut size = None;
        let mut installed = true;

        for line in stanza.lines() {
            // Continuation lines of multi-line fields
            if line.starts_with(' ') || line.starts_with('\t') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key {
                "Package" => name = Some(value.to_string()),
                "Version" => version = Some(value.to_string()),
                "Installed-Size" => size = value.parse::<u64>().ok().map(|kib| kib * 1024),
                "Status" => installed = value.ends_with(" installed"),
                _ => {}
            }
        }

        match (name, version) {
            (Some(name), Some(version)) if installed => {
                insert_record(packages, PackageRecord::new(name, version, size));
            }
            (Some(name), _) => log::trace!("Skipping dpkg entry {} (not installed)", name),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "\
Package: base-files
Status: install ok installed
Priority: required
Installed-Size: 340
Version: 12.4+deb12u5
Description: Debian base system miscellaneous files
 This package contains the basic filesystem hierarchy.
 Version: 99 (continuation lines are ignored)

Package: libc6
Status: install ok installed
Installed-Size: 12991
Architecture: amd64
Version: 2.36-9+deb12u4

Package: old-config
Status: deinstall ok config-files
Version: 1.0

Package: no-size
Status: install ok installed
Version: 0.1
";

    #[test]
    fn test_parse_status() {
        let mut packages = PackageMap::new();
        parse_status(STATUS, &mut packages);

        assert_eq!(packages.len(), 3);
        assert_eq!(
            packages["base-files"]["12.4+deb12u5"],
            PackageRecord::new("base-files", "12.4+deb12u5", Some(340 * 1024))
        );
        assert_eq!(packages["libc6"]["2.36-9+deb12u4"].size, Some(12991 * 1024));
        assert!(!packages.contains_key("old-config"));
        assert_eq!(packages["no-size"]["0.1"].size, None);
    }

    #[test]
    fn test_parse_reads_status_and_status_d() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join(STATUS_DIR)).unwrap();
        fs::write(root.path().join(STATUS_FILE), STATUS).unwrap();
        fs::write(
            root.path().join(STATUS_DIR).join("tzdata"),
            "Package: tzdata\nVersion: 2024a-0+deb12u1\nInstalled-Size: 2000\n",
        )
        .unwrap();
        fs::write(root.path().join(STATUS_DIR).join("tzdata.md5sums"), "abc  /usr/share/zoneinfo\n").unwrap();

        let packages = AptParser.parse(root.path()).unwrap();
        assert_eq!(packages.len(), 4);
        assert!(packages["tzdata"].contains_key("2024a-0+deb12u1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_database_stays_inside_snapshot() {
        let host = tempfile::tempdir().unwrap();
        fs::write(
            host.path().join("status"),
            "Package: host-only\nStatus: install ok installed\nVersion: 1.0\n",
        )
        .unwrap();

        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("var/lib")).unwrap();
        std::os::unix::fs::symlink(host.path(), root.path().join("var/lib/dpkg")).unwrap();
        assert!(AptParser.parse(root.path()).unwrap().is_empty());

        // The same absolute target inside the image is honored.
        let image_db = root.path().join(host.path().strip_prefix("/").unwrap());
        fs::create_dir_all(&image_db).unwrap();
        fs::write(
            image_db.join("status"),
            "Package: in-image\nStatus: install ok installed\nVersion: 2.0\n",
        )
        .unwrap();
        let packages = AptParser.parse(root.path()).unwrap();
        assert_eq!(packages.keys().collect::<Vec<_>>(), vec!["in-image"]);
    }

    #[test]
    fn test_missing_database_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(AptParser.parse(root.path()).unwrap().is_empty());
    }
}

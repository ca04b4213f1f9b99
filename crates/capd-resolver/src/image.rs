use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A native library as it is currently mapped into this process.
#[derive(Debug, Clone)]
pub struct LibraryImage {
    /// Lowest mapped address belonging to this library.
    pub base: usize,
    /// Highest mapped address (exclusive) belonging to this library.
    pub end: usize,
    /// The file backing the mapping, as reported by the kernel.
    pub path: PathBuf,
}

impl LibraryImage {
    #[must_use]
    pub fn size(&self) -> usize {
        self.end.saturating_sub(self.base)
    }
}

/// Locates `library_name`'s mapped base address by scanning this process's
/// address-space map, matching on the file backing each mapping.
///
/// `library_name` is matched as a suffix of the mapped path's file name
/// (e.g. `"libcompositor.so"` matches `/system/lib64/libcompositor.so`), so
/// callers don't need to know the full install path.
pub fn probe(library_name: &str) -> Result<LibraryImage> {
    probe_maps(Path::new("/proc/self/maps"), library_name)
}

fn probe_maps(maps_path: &Path, library_name: &str) -> Result<LibraryImage> {
    let contents = fs::read_to_string(maps_path)
        .map_err(|e| Error::DeviceNotFound(format!("{}: {e}", maps_path.display())))?;

    let mut base: Option<usize> = None;
    let mut end: usize = 0;
    let mut found_path: Option<PathBuf> = None;

    for line in contents.lines() {
        let Some(entry) = parse_maps_line(line) else {
            continue;
        };
        if !path_matches(&entry.path, library_name) {
            continue;
        }
        if base.is_none() {
            base = Some(entry.start);
        }
        end = end.max(entry.end);
        found_path = Some(entry.path);
    }

    match (base, found_path) {
        (Some(base), Some(path)) => Ok(LibraryImage { base, end, path }),
        _ => Err(Error::DeviceNotFound(library_name.to_string())),
    }
}

fn path_matches(mapped: &Path, library_name: &str) -> bool {
    mapped
        .file_name()
        .and_then(|f| f.to_str())
        .map(|f| f == library_name)
        .unwrap_or(false)
}

struct MapsEntry {
    start: usize,
    end: usize,
    path: PathBuf,
}

/// Parses one `/proc/<pid>/maps` line. Anonymous mappings (no trailing
/// path) are skipped by returning `None`.
fn parse_maps_line(line: &str) -> Option<MapsEntry> {
    // "7f1234560000-7f1234561000 r-xp 00000000 08:01 123  /path/to/lib.so"
    let mut fields = line.splitn(6, char::is_whitespace);
    let range = fields.next()?;
    let _perms = fields.next()?;
    let _offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let path = fields.next()?.trim();
    if path.is_empty() {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;
    let start = usize::from_str_radix(start_str, 16).ok()?;
    let end = usize::from_str_radix(end_str, 16).ok()?;
    Some(MapsEntry {
        start,
        end,
        path: PathBuf::from(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_maps() -> &'static str {
        "7f0000000000-7f0000010000 r-xp 00000000 08:01 100 /system/lib64/libc.so\n\
         7f0000010000-7f0000050000 r-xp 00001000 08:01 101 /system/lib64/libcompositor.so\n\
         7f0000050000-7f0000060000 r--p 00000000 00:00 0 \n\
         7f0000060000-7f0000070000 r-xp 00000000 08:01 101 /system/lib64/libcompositor.so\n"
    }

    #[test]
    fn finds_library_and_merges_ranges() {
        let mut tmp = tempfile_write(sample_maps());
        let img = probe_maps(tmp.path(), "libcompositor.so").unwrap();
        assert_eq!(img.base, 0x7f0000010000);
        assert_eq!(img.end, 0x7f0000070000);
        tmp.flush().unwrap();
    }

    #[test]
    fn missing_library_is_device_not_found() {
        let tmp = tempfile_write(sample_maps());
        let err = probe_maps(tmp.path(), "libnope.so").unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    fn tempfile_write(contents: &str) -> NamedFile {
        let mut path = std::env::temp_dir();
        path.push(format!("capd-resolver-test-{:?}.maps", std::thread::current().id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        NamedFile { path, file: f }
    }

    struct NamedFile {
        path: PathBuf,
        file: fs::File,
    }

    impl NamedFile {
        fn path(&self) -> &Path {
            &self.path
        }
        fn flush(&mut self) -> std::io::Result<()> {
            use std::io::Write as _;
            self.file.flush()
        }
    }

    impl Drop for NamedFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

//! Rewrites zip archives entry by entry.
//!
//! Only the entries picked by a matcher are decompressed; every other entry is copied in its
//! compressed form, together with its CRC and metadata, so its bytes in the output are the
//! bytes it had in the input.

use log::debug;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Fixed part of a central directory file header.
const CENTRAL_HEADER_LEN: usize = 46;
/// "version made by", which also names the host system.
const MADE_BY: std::ops::Range<usize> = 4..6;
/// Internal and external file attributes.
const ATTRIBUTES: std::ops::Range<usize> = 36..42;

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug)]
pub enum ArchiveError {
    Io(io::Error),
    Zip(ZipError),
    InvalidInput(String),
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Io(err) => write!(f, "I/O error: {err}"),
            ArchiveError::Zip(err) => write!(f, "ZIP error: {err}"),
            ArchiveError::InvalidInput(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Io(err) => Some(err),
            ArchiveError::Zip(err) => Some(err),
            ArchiveError::InvalidInput(_) => None,
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(value: io::Error) -> Self {
        ArchiveError::Io(value)
    }
}

impl From<ZipError> for ArchiveError {
    fn from(value: ZipError) -> Self {
        ArchiveError::Zip(value)
    }
}

/// One entry of an archive, as listed by [`list_entries`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub compression: CompressionMethod,
    pub size: u64,
    pub crc32: u32,
    pub unix_mode: Option<u32>,
}

/// The output of [`rewrite_archive`].
#[derive(Clone, Debug)]
pub struct Rewritten {
    pub bytes: Vec<u8>,
    /// Names of the entries that went through the transform, in archive order.
    pub matched: Vec<String>,
}

/// Lists the entries of an archive in their stored order.
pub fn list_entries(archive: &[u8]) -> ArchiveResult<Vec<EntryInfo>> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;
    let mut entries = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        let entry = archive.by_index_raw(idx)?;
        entries.push(EntryInfo {
            name: entry.name().to_string(),
            is_dir: entry.is_dir(),
            compression: entry.compression(),
            size: entry.size(),
            crc32: entry.crc32(),
            unix_mode: entry.unix_mode(),
        });
    }
    Ok(entries)
}

/// Reads and decompresses one entry, `None` if the archive has no entry of that name.
pub fn read_entry(archive: &[u8], name: &str) -> ArchiveResult<Option<Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    Ok(Some(data))
}

/// Copies `input` to a new archive, passing the content of every non-directory entry for
/// which `matcher` returns true through `transform`.
///
/// Every entry keeps its name, position, compression method, timestamp, host system and file
/// attributes. The archive comment is carried over as raw bytes. The writer switches to ZIP64 records on its own
/// when the entry count or an offset needs them.
pub fn rewrite_archive<M, T, E>(input: &[u8], mut matcher: M, mut transform: T) -> Result<Rewritten, E>
where
    M: FnMut(&str) -> bool,
    T: FnMut(&str, Vec<u8>) -> Result<Vec<u8>, E>,
    E: From<ArchiveError>,
{
    let mut archive = ZipArchive::new(Cursor::new(input)).map_err(ArchiveError::from)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(input.len())));
    let mut matched = vec![];

    for idx in 0..archive.len() {
        let (name, is_dir) = {
            let entry = archive.by_index_raw(idx).map_err(ArchiveError::from)?;
            (entry.name().to_string(), entry.is_dir())
        };

        if is_dir || !matcher(&name) {
            let entry = archive.by_index_raw(idx).map_err(ArchiveError::from)?;
            writer.raw_copy_file(entry).map_err(ArchiveError::from)?;
            continue;
        }

        let (data, options) = {
            let mut entry = archive.by_index(idx).map_err(ArchiveError::from)?;
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data).map_err(ArchiveError::from)?;
            let mut options = FileOptions::default()
                .compression_method(entry.compression())
                .last_modified_time(entry.last_modified());
            if let Some(mode) = entry.unix_mode() {
                options = options.unix_permissions(mode);
            }
            (data, options)
        };

        debug!("transforming entry {} ({} bytes)", name, data.len());
        let data = transform(&name, data)?;
        let options = options.large_file(data.len() as u64 >= u32::MAX as u64);
        writer.start_file(name.as_str(), options).map_err(ArchiveError::from)?;
        writer.write_all(&data).map_err(ArchiveError::from)?;
        matched.push(name);
    }

    writer.set_raw_comment(archive.comment().to_vec());
    let mut bytes = writer.finish().map_err(ArchiveError::from)?.into_inner();
    restore_attributes(input, &mut archive, &mut bytes)?;
    Ok(Rewritten { bytes, matched })
}

/// The writer records every entry as made on unix with its own attributes. Copies "version
/// made by" and the file attributes of each input entry onto the matching central directory
/// record of `output`, which lists the same entries in the same order.
fn restore_attributes(
    input: &[u8],
    source: &mut ZipArchive<Cursor<&[u8]>>,
    output: &mut [u8],
) -> ArchiveResult<()> {
    let written = {
        let mut archive = ZipArchive::new(Cursor::new(&output[..]))?;
        let mut starts = Vec::with_capacity(archive.len());
        for idx in 0..archive.len() {
            starts.push(archive.by_index_raw(idx)?.central_header_start() as usize);
        }
        starts
    };
    if written.len() != source.len() {
        return Err(ArchiveError::InvalidInput(format!(
            "rewritten archive has {} entries, expected {}",
            written.len(),
            source.len()
        )));
    }

    for (idx, to) in written.into_iter().enumerate() {
        let from = source.by_index_raw(idx)?.central_header_start() as usize;
        let record = input
            .get(from..from + CENTRAL_HEADER_LEN)
            .ok_or_else(|| ArchiveError::InvalidInput(format!("central header of entry {} is truncated", idx)))?;
        let target = output
            .get_mut(to..to + CENTRAL_HEADER_LEN)
            .ok_or_else(|| ArchiveError::InvalidInput(format!("central header of entry {} is truncated", idx)))?;
        target[MADE_BY].copy_from_slice(&record[MADE_BY]);
        target[ATTRIBUTES].copy_from_slice(&record[ATTRIBUTES]);
    }
    Ok(())
}

/// Writes `bytes` to a temporary file next to `dest` and renames it into place, so `dest`
/// either keeps its old content or gets all of the new one.
pub fn publish_atomically(dest: &Path, bytes: &[u8]) -> ArchiveResult<()> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| ArchiveError::InvalidInput(format!("{} is not a file path", dest.display())))?;
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(".{}.{}.tmp", file_name.to_string_lossy(), std::process::id()));
    let result = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, dest));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;
    debug!("published {} ({} bytes)", dest.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory("a/", FileOptions::default()).unwrap();
        writer
            .start_file("a/one.txt", FileOptions::default().compression_method(CompressionMethod::Deflated))
            .unwrap();
        writer.write_all(b"one one one one one").unwrap();
        writer
            .start_file(
                "two.bin",
                FileOptions::default().compression_method(CompressionMethod::Stored).unix_permissions(0o755),
            )
            .unwrap();
        writer.write_all(&[1, 2, 3]).unwrap();
        writer.set_comment("built for tests");
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn untouched_entries_survive() {
        let input = sample();
        let out = rewrite_archive::<_, _, ArchiveError>(&input, |_| false, |_, d| Ok(d)).unwrap();
        assert!(out.matched.is_empty());
        let before = list_entries(&input).unwrap();
        let after = list_entries(&out.bytes).unwrap();
        assert_eq!(before, after);
        let archive = ZipArchive::new(Cursor::new(out.bytes.as_slice())).unwrap();
        assert_eq!(archive.comment(), b"built for tests");
    }

    #[test]
    fn matched_entry_keeps_its_metadata() {
        let input = sample();
        let out = rewrite_archive::<_, _, ArchiveError>(
            &input,
            |name| name.ends_with(".bin") || name.starts_with("a/"),
            |_, mut d| {
                d.push(4);
                Ok(d)
            },
        )
        .unwrap();
        // the directory entry matches the predicate's prefix but is never transformed
        assert_eq!(out.matched, vec!["a/one.txt".to_string(), "two.bin".to_string()]);
        assert_eq!(read_entry(&out.bytes, "two.bin").unwrap(), Some(vec![1, 2, 3, 4]));

        let entries = list_entries(&out.bytes).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a/", "a/one.txt", "two.bin"]);
        assert_eq!(entries[1].compression, CompressionMethod::Deflated);
        assert_eq!(entries[2].compression, CompressionMethod::Stored);
        assert_eq!(entries[2].unix_mode.map(|m| m & 0o777), Some(0o755));
    }

    #[test]
    fn transform_errors_propagate() {
        let input = sample();
        let result = rewrite_archive(&input, |n| n == "two.bin", |_, _| {
            Err(ArchiveError::InvalidInput("nope".to_string()))
        });
        assert!(matches!(result, Err(ArchiveError::InvalidInput(_))));
    }

    #[test]
    fn missing_entry_reads_as_none() {
        assert_eq!(read_entry(&sample(), "three").unwrap(), None);
        assert!(matches!(list_entries(b"not a zip"), Err(ArchiveError::Zip(_))));
    }

    #[test]
    fn publish_replaces_destination() {
        let dir = std::env::temp_dir().join(format!("classpatch-publish-{}", std::process::id()));
        let dest = dir.join("out.jar");
        publish_atomically(&dest, b"first").unwrap();
        publish_atomically(&dest, b"second").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"second");
        let leftovers = fs::read_dir(&dir).unwrap().count();
        assert_eq!(leftovers, 1);
        fs::remove_dir_all(&dir).unwrap();
    }
}

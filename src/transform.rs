//! Entry points for a build host: one archive at a time, or a batch in parallel.

use crate::archive::{publish_atomically, rewrite_archive};
use crate::classpath::{ArchiveProvider, ClassProvider, ClasspathRoot, Resolver};
use crate::error::PatchError;
use crate::patch::{patch_class, PatchSpec};
use log::{debug, info};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// The result of running an archive through [`transform_archive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformed {
    /// The `PatchSpec` does not apply to the archive; these are its input bytes.
    Copied(Vec<u8>),
    Patched(Vec<u8>),
}

impl Transformed {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Transformed::Copied(b) | Transformed::Patched(b) => b,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Transformed::Copied(b) | Transformed::Patched(b) => b,
        }
    }
}

/// One archive of a batch: its name (as the host knows it), where to read it and where to
/// publish the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub input: PathBuf,
    pub dest: PathBuf,
}

/// Patches the archive called `name` if `spec` applies to it.
///
/// Symbols are resolved against the archive itself first, then against `classpath` in order.
pub fn transform_archive(
    name: &str,
    bytes: Vec<u8>,
    classpath: &[ClasspathRoot],
    spec: &PatchSpec,
) -> Result<Transformed, PatchError> {
    if !spec.applies_to(name) {
        info!("Copy {} without modifications", name);
        return Ok(Transformed::Copied(bytes));
    }
    info!("Patching {}", name);

    let own: Box<dyn ClassProvider> = Box::new(ArchiveProvider::from_bytes(bytes.clone(), name)?);
    let mut resolver = Resolver::new(vec![own]);
    for root in classpath {
        resolver.push_root(root.open()?);
    }

    let target = spec.entry_name();
    let rewritten = rewrite_archive(
        &bytes,
        |entry| entry == target,
        |entry, data| {
            info!("Writing back modified {} to archive", entry);
            patch_class(&data, spec, &mut resolver)
        },
    )?;
    if rewritten.matched.is_empty() {
        return Err(PatchError::EntryNotFound { entry: target });
    }
    debug!("{}: {} bytes in, {} bytes out", name, bytes.len(), rewritten.bytes.len());
    Ok(Transformed::Patched(rewritten.bytes))
}

/// Reads `input`, transforms it in memory and publishes the result at `dest`. On error
/// nothing is written.
pub fn transform_archive_file(
    name: &str,
    input: &Path,
    classpath: &[ClasspathRoot],
    spec: &PatchSpec,
    dest: &Path,
) -> Result<Transformed, PatchError> {
    let bytes = fs::read(input).map_err(crate::archive::ArchiveError::from)?;
    let transformed = transform_archive(name, bytes, classpath, spec)?;
    publish_atomically(dest, transformed.bytes())?;
    Ok(transformed)
}

/// Runs independent jobs in parallel, each with its own resolver. Results are in job order.
pub fn transform_all(jobs: &[Job], classpath: &[ClasspathRoot], spec: &PatchSpec) -> Vec<Result<Transformed, PatchError>> {
    jobs.par_iter()
        .map(|job| transform_archive_file(&job.name, &job.input, classpath, spec, &job.dest))
        .collect()
}

//! # classpatch
//!
//! A library for patching one method of one class inside a JAR, at build time.
//!
//! The class file is decoded, the target method is renamed, a replacement written in a small
//! Java-like language is compiled into the class under the original name, and the archive is
//! written back with every other entry copied byte for byte.
//!
//! ```no_run
//!  use classpatch::classpath::ClasspathRoot;
//!  use classpatch::patch::PatchSpec;
//!  use classpatch::transform::transform_archive_file;
//!  use std::path::Path;
//!
//!  let spec = PatchSpec::flutter_accessibility("RealWear");
//!  let classpath = vec![ClasspathRoot::from_path(Path::new("android.jar"))];
//!  transform_archive_file(
//!      "io.flutter:flutter_embedding_debug:1.0.0",
//!      Path::new("flutter_embedding_debug.jar"),
//!      &classpath,
//!      &spec,
//!      Path::new("out/flutter_embedding_debug.jar"),
//!  )
//!  .unwrap();
//! ```

#[macro_use]
pub mod class;

pub mod archive;
pub mod classpath;
pub mod error;
pub mod patch;
pub mod synth;
pub mod transform;

#[cfg(test)]
mod tests;

pub use crate::error::PatchError;
pub use crate::patch::{patch_class, PatchSpec};
pub use crate::transform::{transform_all, transform_archive, transform_archive_file, Job, Transformed};

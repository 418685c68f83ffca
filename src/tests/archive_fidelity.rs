use crate::archive::{list_entries, read_entry};
use crate::class::ClassFile;
use crate::error::PatchError;
use crate::patch::PatchSpec;
use crate::tests::fixtures::*;
use crate::transform::{transform_all, transform_archive, transform_archive_file, Job, Transformed};
use std::fs;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const EMBEDDING: &str = "io.flutter:flutter_embedding_debug:1.0.0-abc";
const BRIDGE_ENTRY: &str = "io/flutter/view/AccessibilityBridge.class";

fn comment(archive: &[u8]) -> Vec<u8> {
    ZipArchive::new(Cursor::new(archive)).unwrap().comment().to_vec()
}

#[test]
fn only_the_target_entry_changes() {
    let dir = scratch_dir("fidelity");
    let classpath = stub_classpath(&dir);
    let input = archive_with(&accessibility_bridge());
    let spec = PatchSpec::flutter_accessibility("RealWear");

    let output = match transform_archive(EMBEDDING, input.clone(), &classpath, &spec).unwrap() {
        Transformed::Patched(bytes) => bytes,
        other => panic!("archive was not patched: {:?}", other.bytes().len()),
    };

    let before = list_entries(&input).unwrap();
    let after = list_entries(&output).unwrap();
    let names = |entries: &[crate::archive::EntryInfo]| entries.iter().map(|e| e.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(&before), names(&after));
    for (old, new) in before.iter().zip(&after) {
        if old.name == BRIDGE_ENTRY {
            assert_eq!(old.compression, new.compression);
            assert_ne!(old.crc32, new.crc32);
        } else {
            assert_eq!(old, new);
            assert_eq!(read_entry(&input, &old.name).unwrap(), read_entry(&output, &new.name).unwrap());
        }
    }
    assert_eq!(comment(&output), b"fixture archive");

    let class = ClassFile::decode(&read_entry(&output, BRIDGE_ENTRY).unwrap().unwrap()).unwrap();
    assert!(class
        .find_method("createAccessibilityNodeInfo_original", "(I)Landroid/view/accessibility/AccessibilityNodeInfo;")
        .unwrap()
        .is_some());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn jar_tool_entries_keep_their_attributes() {
    let dir = scratch_dir("jar-tool");
    let classpath = stub_classpath(&dir);
    let input = as_jar_tool(archive_with(&accessibility_bridge()));
    let before = list_entries(&input).unwrap();
    assert!(before.iter().all(|e| e.unix_mode.is_none()));
    assert!(before.iter().any(|e| e.is_dir));

    let spec = PatchSpec::flutter_accessibility("RealWear");
    let output = transform_archive(EMBEDDING, input, &classpath, &spec).unwrap().into_bytes();
    let after = list_entries(&output).unwrap();
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!((old.is_dir, old.unix_mode), (new.is_dir, new.unix_mode), "{}", old.name);
    }
    let mut archive = ZipArchive::new(Cursor::new(output.as_slice())).unwrap();
    for idx in 0..archive.len() {
        assert_eq!(archive.by_index_raw(idx).unwrap().version_made_by(), (2, 0));
    }
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn raw_archive_comment_is_kept() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(BRIDGE_ENTRY, FileOptions::default()).unwrap();
    writer.write_all(&accessibility_bridge().encode().unwrap()).unwrap();
    writer.set_raw_comment(vec![b'j', 0xff, 0xfe, 0x80]);
    let input = writer.finish().unwrap().into_inner();

    let spec = PatchSpec::flutter_accessibility("RealWear");
    let copied = transform_archive("demo:other:1.0", input.clone(), &[], &spec).unwrap();
    assert_eq!(comment(copied.bytes()), vec![b'j', 0xff, 0xfe, 0x80]);

    let dir = scratch_dir("raw-comment");
    let classpath = stub_classpath(&dir);
    let patched = transform_archive(EMBEDDING, input, &classpath, &spec).unwrap().into_bytes();
    assert_eq!(comment(&patched), vec![b'j', 0xff, 0xfe, 0x80]);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn other_archives_are_copied() {
    let input = archive_with(&accessibility_bridge());
    let spec = PatchSpec::flutter_accessibility("RealWear");
    let result = transform_archive("androidx.core:core:1.6.0", input.clone(), &[], &spec).unwrap();
    assert_eq!(result, Transformed::Copied(input));
}

#[test]
fn archive_without_the_class() {
    let dir = scratch_dir("no-entry");
    let classpath = stub_classpath(&dir);
    let input = archive_with(&target_class());
    let spec = PatchSpec::flutter_accessibility("RealWear");
    match transform_archive(EMBEDDING, input, &classpath, &spec) {
        Err(PatchError::EntryNotFound { entry }) => assert_eq!(entry, BRIDGE_ENTRY),
        other => panic!("unexpected {:?}", other.map(|t| t.bytes().len())),
    }
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn failed_patch_writes_nothing() {
    let dir = scratch_dir("no-output");
    let classpath = stub_classpath(&dir);
    let input = dir.join("in.jar");
    fs::write(&input, archive_with(&accessibility_bridge())).unwrap();
    let dest = dir.join("out").join("patched.jar");

    let mut spec = PatchSpec::flutter_accessibility("RealWear");
    spec.method_name = "createAccessibilityNodeInfoCompat".to_string();
    let result = transform_archive_file(EMBEDDING, &input, &classpath, &spec, &dest);
    assert!(matches!(result, Err(PatchError::MethodNotFound { .. })));
    assert!(!dest.exists());

    let missing = transform_archive_file(EMBEDDING, &dir.join("absent.jar"), &classpath, &spec, &dest);
    assert!(matches!(missing, Err(PatchError::ArchiveIo(_))));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn batch_runs_each_job() {
    let dir = scratch_dir("batch");
    let classpath = stub_classpath(&dir);
    let embedding = dir.join("embedding.jar");
    let other = dir.join("other.jar");
    fs::write(&embedding, archive_with(&accessibility_bridge())).unwrap();
    fs::write(&other, archive_with(&target_class())).unwrap();

    let jobs = vec![
        Job { name: EMBEDDING.to_string(), input: embedding, dest: dir.join("out/embedding.jar") },
        Job { name: "demo:target:1.0".to_string(), input: other.clone(), dest: dir.join("out/other.jar") },
    ];
    let results = transform_all(&jobs, &classpath, &PatchSpec::flutter_accessibility("RealWear"));
    assert!(matches!(results[0], Ok(Transformed::Patched(_))));
    assert!(matches!(results[1], Ok(Transformed::Copied(_))));
    assert_eq!(fs::read(dir.join("out/other.jar")).unwrap(), fs::read(&other).unwrap());
    assert!(dir.join("out/embedding.jar").is_file());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn many_entries_use_zip64() {
    let dir = scratch_dir("zip64");
    let classpath = stub_classpath(&dir);

    let count = 70_000;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    for i in 0..count {
        writer.start_file(format!("assets/{:05}.txt", i), stored).unwrap();
        writer.write_all(&(i as u32).to_be_bytes()).unwrap();
    }
    writer.start_file(BRIDGE_ENTRY, FileOptions::default()).unwrap();
    writer.write_all(&accessibility_bridge().encode().unwrap()).unwrap();
    let input = writer.finish().unwrap().into_inner();

    let spec = PatchSpec::flutter_accessibility("RealWear");
    let output = transform_archive(EMBEDDING, input, &classpath, &spec).unwrap().into_bytes();

    // zip64 end of central directory record
    assert!(output.windows(4).any(|w| w == [0x50, 0x4b, 0x06, 0x06]));
    let mut archive = ZipArchive::new(Cursor::new(output.as_slice())).unwrap();
    assert_eq!(archive.len(), count + 1);
    let mut last = vec![];
    archive.by_name("assets/69999.txt").unwrap().read_to_end(&mut last).unwrap();
    assert_eq!(last, 69_999u32.to_be_bytes());
    fs::remove_dir_all(&dir).unwrap();
}

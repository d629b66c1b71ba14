mod common;

use common::*;
use condprobe::instrument::batch::{instrument_tree, BatchOptions};
use condprobe::instrument::Error;
use condprobe::jvm::class_file::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_class(root: &Path, relative: &str, name: &str, methods: Vec<MethodDef>) {
    let mut class = ClassAssembler::new(name, Version::JAVA8);
    for method in methods {
        class.method(method);
    }
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, class.finish()).unwrap();
}

/// Every file under `root`, relative to it
fn tree(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

#[test]
fn output_mirrors_input_tree() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_class(input.path(), "a/Foo.class", "a/Foo", vec![positive_method()]);
    write_class(input.path(), "a/b/Bar.class", "a/b/Bar", vec![sum_method()]);
    fs::write(input.path().join("a/README"), b"not a class").unwrap();

    let out = output.path().join("trans_classes");
    let report = instrument_tree(input.path(), &out, &BatchOptions::default()).unwrap();
    assert_eq!(
        report.written,
        vec![out.join("a/Foo.class"), out.join("a/b/Bar.class")]
    );
    assert!(report.failed.is_empty());
    assert_eq!(
        tree(&out),
        vec![PathBuf::from("a/Foo.class"), PathBuf::from("a/b/Bar.class")]
    );

    let foo = LoadedClass::parse(&fs::read(out.join("a/Foo.class")).unwrap());
    foo.assert_well_formed();
    assert_eq!(foo.helper_call_sites("positive", "(I)I"), 1);
    assert_eq!(Interpreter::new(&foo).call("positive", "(I)I", &[1]), Some(1));

    let bar = LoadedClass::parse(&fs::read(out.join("a/b/Bar.class")).unwrap());
    bar.assert_well_formed();
    assert_eq!(Interpreter::new(&bar).call("sum", "(I)I", &[4]), Some(6));

    // Inputs are untouched
    let original = LoadedClass::parse(&fs::read(input.path().join("a/Foo.class")).unwrap());
    assert!(original.methods_named(HELPER, "(Z)Z").is_empty());
}

#[test]
fn empty_tree_writes_nothing() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let out = output.path().join("out");

    let report = instrument_tree(input.path(), &out, &BatchOptions::default()).unwrap();
    assert!(report.written.is_empty());
    assert!(!out.exists());
}

#[test]
fn first_failure_stops_the_batch() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_class(input.path(), "a/A.class", "a/A", vec![positive_method()]);
    write_class(input.path(), "a/B.class", "a/B", vec![switch_method()]);
    write_class(input.path(), "a/C.class", "a/C", vec![positive_method()]);

    let out = output.path().join("out");
    let err = instrument_tree(input.path(), &out, &BatchOptions::default()).unwrap_err();
    assert_eq!(err.input, input.path().join("a/B.class"));
    assert!(matches!(err.error, Error::UnsupportedConstruct(_)));
    assert!(err.to_string().contains("B.class"));

    // Files before the failure stay written, nothing is left for the failing one
    assert_eq!(tree(&out), vec![PathBuf::from("a/A.class")]);
}

#[test]
fn keep_going_skips_failures() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_class(input.path(), "A.class", "A", vec![positive_method()]);
    fs::write(input.path().join("B.class"), b"\xca\xfe\xba\xbe").unwrap();
    write_class(input.path(), "C.class", "C", vec![zero_method()]);

    let out = output.path().join("out");
    let options = BatchOptions {
        keep_going: true,
        ..BatchOptions::default()
    };
    let report = instrument_tree(input.path(), &out, &options).unwrap();
    assert_eq!(report.written, vec![out.join("A.class"), out.join("C.class")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].input, input.path().join("B.class"));
    assert!(matches!(report.failed[0].error, Error::Parse(_)));
    assert_eq!(
        tree(&out),
        vec![PathBuf::from("A.class"), PathBuf::from("C.class")]
    );
}

#[test]
fn custom_extension() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_class(input.path(), "p/Foo.bin", "p/Foo", vec![positive_method()]);
    write_class(input.path(), "p/Bar.class", "p/Bar", vec![positive_method()]);

    let out = output.path().join("out");
    let options = BatchOptions {
        extension: String::from("bin"),
        ..BatchOptions::default()
    };
    let report = instrument_tree(input.path(), &out, &options).unwrap();
    assert_eq!(report.written, vec![out.join("p/Foo.bin")]);
    assert_eq!(tree(&out), vec![PathBuf::from("p/Foo.bin")]);
}

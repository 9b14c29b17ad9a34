//! Main test module for hdfsync
//!
//! This module includes all test suites:
//! - Integration tests for complete reconciliation runs
//! - Property-based tests for comparison and path-mapping invariants
//! - Edge cases around unusual remote trees

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use super::integration::SyncHarness;
    use std::fs;

    #[test]
    fn test_empty_remote() {
        let harness = SyncHarness::new();
        let report = harness.run().unwrap();
        assert_eq!(report.available, 0);
        assert_eq!(report.indexed, 0);
        assert!(report.persisted);
        assert!(harness.mirror().is_dir());
        assert!(harness.unpack().is_dir());
    }

    #[test]
    fn test_special_filenames() {
        let harness = SyncHarness::new();
        let names = [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
        ];
        for name in &names {
            harness.put(name, name.as_bytes(), 1_000);
        }

        let report = harness.run().unwrap();
        assert_eq!(report.fetched, names.len());
        for name in &names {
            assert_eq!(fs::read_to_string(harness.mirror().join(name)).unwrap(), *name);
        }

        let report = harness.run().unwrap();
        assert_eq!(report.fetched, 0);
    }

    #[test]
    fn test_unicode_filenames() {
        let harness = SyncHarness::new();
        let names = ["файл.txt", "文件.txt", "αρχείο.txt"];
        let mut created = Vec::new();
        for name in &names {
            let path = harness.remote_dir.path().join(name);
            if fs::write(&path, "unicode").is_ok() {
                harness.put(name, b"unicode", 1_000);
                created.push(*name);
            }
        }
        if created.is_empty() {
            return;
        }

        let report = harness.run().unwrap();
        assert_eq!(report.fetched, created.len());
        for name in &created {
            assert!(harness.mirror().join(name).exists());
        }
    }

    #[test]
    fn test_empty_remote_file() {
        let harness = SyncHarness::new();
        harness.put("empty.dat", b"", 1_000);

        let report = harness.run().unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(fs::metadata(harness.mirror().join("empty.dat")).unwrap().len(), 0);
    }

    #[test]
    fn test_everything_removed_remotely() {
        let harness = SyncHarness::new();
        harness.put("a/b/c.txt", b"c", 1_000);
        harness.put("d.txt", b"d", 1_000);
        harness.run().unwrap();

        harness.delete("a/b/c.txt");
        harness.delete("d.txt");
        let report = harness.run().unwrap();
        assert_eq!(report.purged, 2);
        assert_eq!(report.indexed, 0);
        assert_eq!(fs::read_dir(harness.mirror()).unwrap().count(), 0);
    }
}

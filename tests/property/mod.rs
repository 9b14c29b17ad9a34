//! Property-based testing for hdfsync
//!
//! Uses proptest to check the comparison, filtering and path-mapping rules
//! over randomly generated inputs.

use ::hdfsync::archive::{ArchiveKind, ARCHIVE_SUFFIXES};
use ::hdfsync::index::LocalIndex;
use ::hdfsync::runner::diff;
use ::hdfsync::state::{build_includes, AvailableSet};
use ::hdfsync::*;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::path::PathBuf;

/// Generate a relative remote path of one to four components
fn relative_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9_]{0,7}", 1..=4).prop_map(|parts| parts.join("/"))
}

fn entry(relative: &str, size: u64, secs: i64) -> SyncEntry {
    SyncEntry::new(
        RemoteObject::file(
            format!("/remote/{}", relative),
            size,
            Utc.timestamp_opt(secs, 0).unwrap(),
        ),
        "/remote",
        "/local/mirror",
        "/local/unpack",
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_equal_iff_size_and_date_match(
        path in relative_path_strategy(),
        size_a in 0u64..4,
        size_b in 0u64..4,
        secs_a in 0i64..4,
        secs_b in 0i64..4,
    ) {
        let a = entry(&path, size_a, secs_a);
        let b = entry(&path, size_b, secs_b);
        prop_assert_eq!(a.equal(&b), size_a == size_b && secs_a == secs_b);
        prop_assert_eq!(a.equal(&b), b.equal(&a));
    }

    #[test]
    fn prop_fetch_plan_is_exactly_the_unequal_keys(
        local_set in prop::collection::btree_map(relative_path_strategy(), (0u64..3, 0i64..3), 0..8),
        remote_set in prop::collection::btree_map(relative_path_strategy(), (0u64..3, 0i64..3), 0..8),
    ) {
        let local: LocalIndex = local_set
            .iter()
            .map(|(p, (size, secs))| (format!("/remote/{}", p), entry(p, *size, *secs)))
            .collect();
        let available: AvailableSet = remote_set
            .iter()
            .map(|(p, (size, secs))| (format!("/remote/{}", p), entry(p, *size, *secs)))
            .collect();

        let plan = diff(&local, &available);

        for (key, candidate) in &available {
            let skipped = local.get(key).map_or(false, |known| known.equal(candidate));
            let planned = plan.fetch.iter().any(|(k, _)| k == key);
            prop_assert_eq!(planned, !skipped);
        }
        for key in &plan.purge {
            prop_assert!(local.contains(key));
            prop_assert!(!available.contains_key(key));
        }
        prop_assert_eq!(
            plan.purge.len(),
            local.iter().filter(|(k, _)| !available.contains_key(*k)).count()
        );
    }

    #[test]
    fn prop_default_includes_match_everything(path in relative_path_strategy()) {
        let includes = build_includes::<&str>(&[]).unwrap();
        prop_assert!(includes.is_match(&path));
    }

    #[test]
    fn prop_csv_glob_keeps_only_data_csv(name in "[a-z]{1,8}", dir in "(data|logs|misc)") {
        let includes = build_includes(&["data/*.csv"]).unwrap();
        let path = format!("{}/{}.csv", dir, name);
        prop_assert_eq!(includes.is_match(&path), dir == "data");
    }

    #[test]
    fn prop_archive_suffix_maps_to_unpack_path(
        stem in relative_path_strategy(),
        idx in 0usize..ARCHIVE_SUFFIXES.len(),
    ) {
        let (suffix, kind) = ARCHIVE_SUFFIXES[idx];
        let relative = format!("{}{}", stem, suffix);
        let e = entry(&relative, 1, 1);

        prop_assert_eq!(e.mirror_path(), PathBuf::from("/local/mirror").join(&relative));
        prop_assert_eq!(e.archive(), Some((suffix, kind)));
        prop_assert_eq!(e.unpack_path(), Some(PathBuf::from("/local/unpack").join(&stem)));
    }

    #[test]
    fn prop_plain_files_have_no_unpack_path(stem in relative_path_strategy()) {
        let e = entry(&format!("{}.csv", stem), 1, 1);
        prop_assert!(e.unpack_path().is_none());
        prop_assert_eq!(ArchiveKind::detect(&format!("{}.csv", stem)), None);
    }
}

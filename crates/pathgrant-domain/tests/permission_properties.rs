//! Property tests for resolution, migration and the read-allowed index.

mod common;

use std::collections::BTreeSet;

use common::{engine, runtime, STORAGE};
use pathgrant_domain::model::{GrantRequest, Mask, PathRef, PathType, PermissionKey, Sid};
use proptest::prelude::*;

fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["p", "pq", "q", "r"]), 1..4)
        .prop_map(|segments| segments.join("/"))
}

fn path_type_strategy() -> impl Strategy<Value = PathType> {
    prop_oneof![Just(PathType::File), Just(PathType::Folder)]
}

fn sid_strategy() -> impl Strategy<Value = Sid> {
    prop_oneof![
        Just(Sid::user("alice")),
        Just(Sid::user("bob")),
        Just(Sid::group("lab")),
    ]
}

fn grant_strategy() -> impl Strategy<Value = GrantRequest> {
    (path_strategy(), path_type_strategy(), sid_strategy(), 1u32..8).prop_map(
        |(path, path_type, sid, bits)| GrantRequest::new(path, path_type, sid, Mask::from_bits(bits)),
    )
}

fn under(path: &str, root: &str) -> bool {
    path == root || path.starts_with(&format!("{root}/"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_resolution_is_or_combination(
        grants in prop::collection::vec(grant_strategy(), 1..20),
        target in (path_strategy(), path_type_strategy()),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(false, &[STORAGE]).await;
            engine.batch.insert_batch(STORAGE, grants).await.unwrap();
            let target = PathRef::new(target.0, target.1);

            let alice = engine.resolver.resolve(42, &target, &[Sid::user("alice")]).await.unwrap();
            let lab = engine.resolver.resolve(42, &target, &[Sid::group("lab")]).await.unwrap();
            let both = engine
                .resolver
                .resolve(42, &target, &[Sid::user("alice"), Sid::group("lab")])
                .await
                .unwrap();
            prop_assert_eq!(both, alice | lab);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_folder_grant_is_inherited_unless_overridden(
        root in path_strategy(),
        suffix in path_strategy(),
        bits in 1u32..8,
        others in prop::collection::vec(grant_strategy(), 0..10),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(false, &[STORAGE]).await;
            let alice = Sid::user("alice");
            let mut grants = others;
            grants.push(GrantRequest::new(root.clone(), PathType::Folder, alice.clone(), Mask::from_bits(bits)));
            engine.batch.insert_batch(STORAGE, grants).await.unwrap();

            let child = format!("{root}/{suffix}");
            let rows = engine.store.dump(42);
            let overridden = rows.iter().any(|row| {
                row.sid == alice
                    && row.path.len() > root.len()
                    && under(&child, &row.path)
                    && under(&row.path, &root)
                    && (row.path_type == PathType::Folder || row.path == child)
            });

            let mask = engine
                .resolver
                .resolve(42, &PathRef::file(child), &[alice])
                .await
                .unwrap();
            if !overridden {
                prop_assert!(mask.contains(Mask::from_bits(bits)));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_exact_file_row_decides(
        path in path_strategy(),
        bits in 1u32..8,
        others in prop::collection::vec(grant_strategy(), 0..10),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(false, &[STORAGE]).await;
            let alice = Sid::user("alice");
            let mut grants = others;
            grants.push(GrantRequest::new(path.clone(), PathType::File, alice.clone(), Mask::from_bits(bits)));
            engine.batch.insert_batch(STORAGE, grants).await.unwrap();

            let mask = engine.resolver.resolve(42, &PathRef::file(path), &[alice]).await.unwrap();
            prop_assert_eq!(mask, Mask::from_bits(bits));
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_move_is_a_bijection(
        grants in prop::collection::vec(grant_strategy(), 1..20),
        source in path_strategy(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(false, &[STORAGE]).await;
            engine.batch.insert_batch(STORAGE, grants).await.unwrap();
            let before = engine.store.dump(42);
            let destination = "moved/here";

            let moved = engine
                .migrator
                .move_path(STORAGE, PathRef::folder(source.clone()), PathRef::folder(destination))
                .await
                .unwrap();

            let expected: BTreeSet<_> = before
                .iter()
                .map(|row| {
                    let path = match row.path.strip_prefix(source.as_str()) {
                        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("{destination}{rest}"),
                        _ => row.path.clone(),
                    };
                    (path, row.path_type, row.sid.clone(), row.mask.bits())
                })
                .collect();
            let after: BTreeSet<_> = engine
                .store
                .dump(42)
                .into_iter()
                .map(|row| (row.path, row.path_type, row.sid, row.mask.bits()))
                .collect();

            let under_source = before.iter().filter(|row| under(&row.path, &source)).count();
            prop_assert_eq!(moved, under_source);
            prop_assert_eq!(after.len(), before.len());
            prop_assert_eq!(after, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_delete_all_respects_boundary(
        grants in prop::collection::vec(grant_strategy(), 1..20),
        root in path_strategy(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(false, &[STORAGE]).await;
            engine.batch.insert_batch(STORAGE, grants).await.unwrap();
            let before = engine.store.dump(42);

            engine
                .migrator
                .delete_all(STORAGE, PathRef::folder(root.clone()))
                .await
                .unwrap();

            let expected: BTreeSet<PermissionKey> = before
                .iter()
                .filter(|row| !under(&row.path, &root))
                .map(|row| row.key())
                .collect();
            let after: BTreeSet<PermissionKey> =
                engine.store.dump(42).iter().map(|row| row.key()).collect();
            prop_assert_eq!(after, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_cached_index_matches_store(
        ops in prop::collection::vec((grant_strategy(), any::<bool>()), 1..20),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(true, &[STORAGE]).await;
            let sids = [Sid::user("alice"), Sid::group("lab")];

            for (grant, insert) in ops {
                // Populate the cache before every write.
                engine.index.load_read_allowed_storages(&sids).await.unwrap();
                if insert {
                    engine.batch.insert_batch(STORAGE, vec![grant]).await.unwrap();
                } else {
                    engine
                        .batch
                        .delete_batch(STORAGE, vec![PermissionKey::new(grant.path, grant.path_type, grant.sid)])
                        .await
                        .unwrap();
                }

                let holds_rows = engine
                    .store
                    .dump(42)
                    .iter()
                    .any(|row| sids.contains(&row.sid));
                let listed = engine.index.load_read_allowed_storages(&sids).await.unwrap();
                prop_assert_eq!(listed.contains(&STORAGE), holds_rows);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_insert_is_idempotent(grant in grant_strategy(), later_bits in 1u32..8) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(false, &[STORAGE]).await;
            engine.batch.insert_batch(STORAGE, vec![grant.clone()]).await.unwrap();
            let mut again = grant;
            again.mask = Mask::from_bits(later_bits);
            engine.batch.insert_batch(STORAGE, vec![again]).await.unwrap();

            let rows = engine.store.dump(42);
            prop_assert_eq!(rows.len(), 1);
            prop_assert_eq!(rows[0].mask, Mask::from_bits(later_bits));
            Ok::<(), TestCaseError>(())
        })?;
    }
}

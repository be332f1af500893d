//! Property-based tests for the path algebra.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::model::PathRef;
    use crate::path::{
        ancestors, candidates, is_same_or_descendant, is_strict_descendant, normalize, rebase,
    };

    fn segment_strategy() -> impl Strategy<Value = String> {
        "[a-z0-9_]{1,6}"
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(segment_strategy(), 1..6).prop_map(|s| s.join("/"))
    }

    /// A path decorated with redundant separators and whitespace.
    fn noisy_path_strategy() -> impl Strategy<Value = (String, String)> {
        (
            prop::collection::vec((segment_strategy(), 1usize..3), 1..6),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(parts, leading, trailing)| {
                let clean = parts
                    .iter()
                    .map(|(s, _)| s.as_str())
                    .collect::<Vec<_>>()
                    .join("/");
                let mut noisy = String::new();
                if leading {
                    noisy.push_str(" /");
                }
                for (i, (segment, seps)) in parts.iter().enumerate() {
                    if i > 0 {
                        noisy.push_str(&"/".repeat(*seps));
                    }
                    noisy.push_str(segment);
                }
                if trailing {
                    noisy.push_str("// ");
                }
                (noisy, clean)
            })
    }

    proptest! {
        #[test]
        fn test_normalize_recovers_clean_form((noisy, clean) in noisy_path_strategy()) {
            prop_assert_eq!(normalize(&noisy).unwrap(), clean);
        }

        #[test]
        fn test_normalize_is_idempotent(path in path_strategy()) {
            let once = normalize(&path).unwrap();
            prop_assert_eq!(normalize(&once).unwrap(), once);
        }

        #[test]
        fn test_every_ancestor_is_a_strict_prefix(path in path_strategy()) {
            let chain = ancestors(&path);
            prop_assert_eq!(chain.len(), path.matches('/').count());
            for ancestor in &chain {
                prop_assert!(is_strict_descendant(&path, ancestor));
            }
            for pair in chain.windows(2) {
                prop_assert!(pair[0].len() > pair[1].len());
            }
        }

        #[test]
        fn test_candidates_start_with_exact(path in path_strategy()) {
            let target = PathRef::file(path.clone());
            let chain = candidates(&target);
            prop_assert_eq!(&chain[0], &target);
            prop_assert!(chain[1..].iter().all(|c| c.path_type == crate::model::PathType::Folder));
        }

        #[test]
        fn test_sibling_with_shared_prefix_is_not_descendant(
            root in path_strategy(),
            suffix in "[a-z0-9]{1,4}",
        ) {
            let sibling = format!("{root}{suffix}");
            prop_assert!(!is_same_or_descendant(&sibling, &root));
        }

        #[test]
        fn test_rebase_round_trips(
            from in path_strategy(),
            to in path_strategy(),
            tail in prop::collection::vec(segment_strategy(), 0..3),
        ) {
            let path = if tail.is_empty() { from.clone() } else { format!("{from}/{}", tail.join("/")) };
            let moved = rebase(&path, &from, &to).unwrap();
            prop_assert!(is_same_or_descendant(&moved, &to));
            prop_assert_eq!(rebase(&moved, &to, &from).unwrap(), path);
        }
    }
}

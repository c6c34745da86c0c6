//! Property tests over the reference engines: root reproducibility,
//! proof soundness on random inputs, and log consistency across sizes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use lattica_keydir_backend::{
    Ed25519Signer, InMemoryLogBackend, InMemoryMapBackend, LogBackend, MapBackend, MapLeafUpdate,
};
use lattica_keydir_test_utils::strategies;
use lattica_keydir_types::logproof::{
    consistency_path, inclusion_path, log_leaf_hash, merkle_tree_hash, LogConsistencyProof,
    LogInclusionProof,
};
use lattica_keydir_types::types::{DirectoryId, Index, SignedMapRoot};
use proptest::prelude::*;
use rand::rngs::OsRng;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn provisioned_map() -> (InMemoryMapBackend, DirectoryId) {
    let backend = InMemoryMapBackend::new();
    let dir = DirectoryId::new("prop");
    backend.provision(&dir, Ed25519Signer::generate(&mut OsRng));
    (backend, dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Writing the same leaf set in any order yields the same map root.
    #[test]
    fn prop_map_root_order_independent(indexes in strategies::arb_index_set(12)) {
        runtime().block_on(async {
            let updates: Vec<MapLeafUpdate> = indexes
                .iter()
                .enumerate()
                .map(|(n, index)| MapLeafUpdate {
                    index: *index,
                    leaf: vec![n as u8; 8],
                    extra_data: None,
                })
                .collect();
            let mut reversed = updates.clone();
            reversed.reverse();

            let (backend_a, dir_a) = provisioned_map();
            let (backend_b, dir_b) = provisioned_map();
            let root_a = backend_a.set_leaves(&dir_a, 1, updates, 1).await.unwrap();
            let root_b = backend_b.set_leaves(&dir_b, 1, reversed, 1).await.unwrap();

            prop_assert_eq!(root_a.root_hash, root_b.root_hash);
            Ok(())
        })?;
    }

    /// Every written leaf gets a verifying inclusion proof, and untouched
    /// slots get verifying absence proofs.
    #[test]
    fn prop_map_proofs_verify(
        indexes in strategies::arb_index_set(8),
        absent in strategies::arb_index(),
    ) {
        runtime().block_on(async {
            let updates: Vec<MapLeafUpdate> = indexes
                .iter()
                .enumerate()
                .map(|(n, index)| MapLeafUpdate {
                    index: *index,
                    leaf: vec![n as u8; 4],
                    extra_data: None,
                })
                .collect();

            let (backend, dir) = provisioned_map();
            let root = backend.set_leaves(&dir, 1, updates.clone(), 1).await.unwrap();

            for update in &updates {
                let leaves = backend.get_leaves(&dir, 1, &[update.index]).await.unwrap();
                prop_assert!(leaves[0].inclusion.verify(
                    &root.root_hash,
                    &update.index,
                    Some(&update.leaf),
                ));
                // The proof does not also verify a different value
                prop_assert!(!leaves[0].inclusion.verify(
                    &root.root_hash,
                    &update.index,
                    Some(b"forged"),
                ));
            }

            if !indexes.contains(&absent) {
                let leaves = backend.get_leaves(&dir, 1, &[absent]).await.unwrap();
                prop_assert!(leaves[0].leaf.is_none());
                prop_assert!(leaves[0].inclusion.verify(&root.root_hash, &absent, None));
            }
            Ok(())
        })?;
    }

    /// Inclusion and consistency proofs verify for every position and
    /// every size pair of a random log.
    #[test]
    fn prop_log_proofs_verify(leaves in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 1..32), 1..24,
    )) {
        let hashes: Vec<_> = leaves.iter().map(|leaf| log_leaf_hash(leaf)).collect();
        let root = merkle_tree_hash(&hashes);

        for (i, leaf_hash) in hashes.iter().enumerate() {
            let proof = LogInclusionProof {
                leaf_index: i as u64,
                tree_size: hashes.len() as u64,
                hashes: inclusion_path(i, &hashes),
            };
            prop_assert!(proof.verify(leaf_hash, &root), "inclusion at {}", i);
        }

        for from in 1..=hashes.len() {
            let from_root = merkle_tree_hash(&hashes[..from]);
            let proof = LogConsistencyProof {
                from_size: from as u64,
                to_size: hashes.len() as u64,
                hashes: consistency_path(from, &hashes),
            };
            prop_assert!(proof.verify(&from_root, &root), "consistency from {}", from);
        }
    }

    /// A revision chain through the engines keeps roots reproducible: the
    /// same (leaf set, watermark) sequence always gives the same root
    /// hashes, regardless of signer identity.
    #[test]
    fn prop_map_roots_signer_independent(indexes in strategies::arb_index_set(6)) {
        runtime().block_on(async {
            let build = |indexes: Vec<Index>| async move {
                let (backend, dir) = provisioned_map();
                let mut roots = Vec::new();
                for (revision, index) in indexes.into_iter().enumerate() {
                    let update =
                        MapLeafUpdate { index, leaf: b"leaf".to_vec(), extra_data: None };
                    let root = backend
                        .set_leaves(&dir, revision as u64 + 1, vec![update], revision as u64 + 1)
                        .await
                        .unwrap();
                    roots.push(root.root_hash);
                }
                roots
            };

            let roots_a = build(indexes.clone()).await;
            let roots_b = build(indexes.clone()).await;
            prop_assert_eq!(roots_a, roots_b);
            Ok(())
        })?;
    }
}

/// Appending the same roots to two logs yields identical root hashes.
#[tokio::test]
async fn test_log_root_hash_deterministic() {
    let make = || async {
        let backend = InMemoryLogBackend::new();
        let dir = DirectoryId::new("prop");
        backend.provision(&dir, Ed25519Signer::generate(&mut OsRng));
        for revision in 0..4 {
            let root = SignedMapRoot {
                revision,
                root_hash: [revision as u8; 32],
                highest_fully_completed_seq: revision,
                timestamp: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                signature: vec![0u8; 64],
            };
            backend.append(&dir, &root).await.unwrap();
        }
        backend.latest_root(&dir).await.unwrap().root_hash
    };

    assert_eq!(make().await, make().await);
}

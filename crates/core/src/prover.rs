//! Proof-carrying read path.
//!
//! Every read returns, alongside the requested value, the proofs a
//! verifier needs to establish that (i) the returned index is correct for
//! the supplied user id (VRF proof), (ii) the leaf is included in the
//! stated map root, (iii) the map root is anchored at log index
//! `revision`, and (iv) the log is consistent with the client's previously
//! verified tree size.
//!
//! A single call is served from one snapshot: one `(map_root, log_root)`
//! pair fetched at the start of the call.

use std::sync::Arc;

use lattica_keydir_backend::{LogBackend, MapBackend, QueueStore};
use lattica_keydir_types::codec;
use lattica_keydir_types::logproof::{LogConsistencyProof, LogInclusionProof};
use lattica_keydir_types::types::{
    vrf_input, Committed, DirectoryId, Index, MapLeafInclusion, MutationProof, QueuedUpdate,
    SignedLogRoot, SignedMapRoot, UserId,
};
use lattica_keydir_types::{KeydirError, Result};
use lattica_keydir_vrf::VrfKeyPair;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::paginate::{PageToken, PageTokenCodec};
use crate::sequencer::PublishedRevision;
use crate::validator;

/// Buffer size for stream channels; the sender blocks when a slow
/// receiver falls this far behind.
const STREAM_BUFFER: usize = 16;

/// Default and maximum page sizes for listings.
const DEFAULT_PAGE_SIZE: usize = 64;
const MAX_PAGE_SIZE: usize = 512;

/// Proofs tying a revision to the log.
#[derive(Debug, Clone)]
pub struct RevisionProofBundle {
    /// The signed map root at the requested revision.
    pub map_root: SignedMapRoot,
    /// The signed log root of the snapshot.
    pub log_root: SignedLogRoot,
    /// Proof that `map_root` is the leaf at log index `map_root.revision`.
    pub log_inclusion: LogInclusionProof,
    /// Consistency proof from the client's previously verified tree size,
    /// when one was supplied.
    pub log_consistency: Option<LogConsistencyProof>,
}

/// One user's leaf with its proofs.
#[derive(Debug, Clone)]
pub struct UserLeaf {
    /// The user the leaf belongs to.
    pub user_id: UserId,
    /// The VRF index of the user.
    pub index: Index,
    /// Serialized VRF proof for the index.
    pub vrf_proof: Vec<u8>,
    /// The leaf (or its absence) with its map inclusion proof.
    pub leaf: MapLeafInclusion,
    /// The commitment opening, when one was stored with the leaf.
    pub committed: Option<Committed>,
}

/// Response for a point lookup.
#[derive(Debug, Clone)]
pub struct GetUserResponse {
    /// Revision proofs shared by the lookup.
    pub revision: RevisionProofBundle,
    /// The user leaf.
    pub leaf: UserLeaf,
}

/// Response for a batch lookup at one common revision.
#[derive(Debug, Clone)]
pub struct BatchGetUsersResponse {
    /// Revision proofs shared by all leaves.
    pub revision: RevisionProofBundle,
    /// One leaf per requested user, in request order.
    pub leaves: Vec<UserLeaf>,
}

/// VRF index for a user, without a map read.
#[derive(Debug, Clone)]
pub struct UserIndexProof {
    /// The user.
    pub user_id: UserId,
    /// The VRF index.
    pub index: Index,
    /// Serialized VRF proof.
    pub vrf_proof: Vec<u8>,
}

/// One page of mutations applied at a revision.
#[derive(Debug, Clone)]
pub struct MutationsPage {
    /// The revision the mutations were applied at.
    pub revision: u64,
    /// Applied mutations in queue order, each with its pre-image leaf
    /// proven at `revision - 1`.
    pub mutations: Vec<MutationProof>,
    /// Token for the next page, when more mutations remain.
    pub next_page_token: Option<String>,
}

/// One step of a user's history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// The map root at this revision.
    pub map_root: SignedMapRoot,
    /// The user's leaf at this revision.
    pub leaf: MapLeafInclusion,
}

/// One page of user history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// History entries in ascending revision order.
    pub entries: Vec<HistoryEntry>,
    /// Token for the next page, when the range has more revisions.
    pub next_page_token: Option<String>,
}

/// The read path for one directory.
#[derive(Clone)]
pub struct Prover {
    directory_id: DirectoryId,
    vrf: Arc<VrfKeyPair>,
    map: Arc<dyn MapBackend>,
    log: Arc<dyn LogBackend>,
    queue: Arc<dyn QueueStore>,
    tokens: PageTokenCodec,
    publishes: broadcast::Sender<PublishedRevision>,
}

impl std::fmt::Debug for Prover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prover")
            .field("directory_id", &self.directory_id)
            .finish_non_exhaustive()
    }
}

impl Prover {
    /// Builds the read path over a directory's backends.
    pub fn new(
        directory_id: DirectoryId,
        vrf: Arc<VrfKeyPair>,
        map: Arc<dyn MapBackend>,
        log: Arc<dyn LogBackend>,
        queue: Arc<dyn QueueStore>,
        publishes: broadcast::Sender<PublishedRevision>,
    ) -> Self {
        Self {
            directory_id,
            vrf,
            map,
            log,
            queue,
            tokens: PageTokenCodec::with_random_key(),
            publishes,
        }
    }

    /// The latest published (log-anchored) revision number.
    pub async fn latest_revision(&self) -> Result<u64> {
        let log_root = self.log.latest_root(&self.directory_id).await?;
        if log_root.tree_size == 0 {
            return Err(KeydirError::not_found("directory has no published revisions"));
        }
        Ok(log_root.tree_size - 1)
    }

    /// Point lookup at the latest published revision.
    pub async fn get_user(
        &self,
        user_id: &UserId,
        last_verified_tree_size: Option<u64>,
    ) -> Result<GetUserResponse> {
        let mut response = self.batch_get_users(&[user_id.clone()], last_verified_tree_size).await?;
        let leaf = response.leaves.pop().ok_or_else(|| {
            KeydirError::Internal {
                message: "batch lookup returned no leaf".to_string(),
                location: snafu::location!(),
            }
        })?;
        Ok(GetUserResponse { revision: response.revision, leaf })
    }

    /// Batch lookup: all leaves at one common revision (the latest
    /// published at the moment the call starts).
    pub async fn batch_get_users(
        &self,
        user_ids: &[UserId],
        last_verified_tree_size: Option<u64>,
    ) -> Result<BatchGetUsersResponse> {
        let revision = self.latest_revision().await?;
        let bundle = self.revision_bundle(revision, last_verified_tree_size).await?;

        let indexed: Vec<(UserId, Index, Vec<u8>)> = user_ids
            .iter()
            .map(|user_id| {
                let (index, proof) =
                    self.vrf.compute(&vrf_input(&self.directory_id, user_id));
                (user_id.clone(), index, proof.to_bytes().to_vec())
            })
            .collect();
        let indexes: Vec<Index> = indexed.iter().map(|(_, index, _)| *index).collect();

        let leaves = self.map.get_leaves(&self.directory_id, revision, &indexes).await?;
        let leaves = indexed
            .into_iter()
            .zip(leaves)
            .map(|((user_id, index, vrf_proof), leaf)| {
                let committed = decode_committed(&leaf)?;
                Ok(UserLeaf { user_id, index, vrf_proof, leaf, committed })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BatchGetUsersResponse { revision: bundle, leaves })
    }

    /// VRF proofs for a set of users, with no map read.
    pub fn batch_get_user_indexes(&self, user_ids: &[UserId]) -> Vec<UserIndexProof> {
        user_ids
            .iter()
            .map(|user_id| {
                let (index, proof) =
                    self.vrf.compute(&vrf_input(&self.directory_id, user_id));
                UserIndexProof {
                    user_id: user_id.clone(),
                    index,
                    vrf_proof: proof.to_bytes().to_vec(),
                }
            })
            .collect()
    }

    /// Revision proofs for `revision`.
    pub async fn get_revision(
        &self,
        revision: u64,
        last_verified_tree_size: Option<u64>,
    ) -> Result<RevisionProofBundle> {
        let latest = self.latest_revision().await?;
        if revision > latest {
            return Err(KeydirError::OutOfRange { requested: revision, latest });
        }
        self.revision_bundle(revision, last_verified_tree_size).await
    }

    /// Revision proofs for the latest published revision.
    pub async fn get_latest_revision(
        &self,
        last_verified_tree_size: Option<u64>,
    ) -> Result<RevisionProofBundle> {
        let latest = self.latest_revision().await?;
        self.revision_bundle(latest, last_verified_tree_size).await
    }

    /// The mutations applied at `revision`, paginated.
    ///
    /// Each mutation carries the pre-image leaf inclusion proof at
    /// `revision - 1`; replaying the page stream against the map at
    /// `revision - 1` reproduces the map root at `revision`. Dropped
    /// mutations are not listed.
    pub async fn list_mutations(
        &self,
        revision: u64,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<MutationsPage> {
        let latest = self.latest_revision().await?;
        if revision > latest {
            return Err(KeydirError::OutOfRange { requested: revision, latest });
        }
        if revision == 0 {
            // Revision 0 is the empty genesis snapshot
            return Ok(MutationsPage { revision, mutations: Vec::new(), next_page_token: None });
        }

        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let after_seq = match page_token {
            Some(token) => {
                self.tokens.decode(token, self.directory_id.as_str(), revision)?.position
            },
            None => 0,
        };

        let applied = self.applied_mutations(revision).await?;
        let mut page: Vec<MutationProof> =
            applied.into_iter().filter(|m| m.seq > after_seq).collect();

        let next_page_token = if page.len() > page_size {
            page.truncate(page_size);
            let last_seq = page.last().map(|m| m.seq).unwrap_or(after_seq);
            let token = PageToken::new(self.directory_id.as_str(), revision, last_seq);
            Some(self.tokens.encode(&token))
        } else {
            None
        };

        Ok(MutationsPage { revision, mutations: page, next_page_token })
    }

    /// History of a user's leaf over `[start, end]`, every revision.
    pub async fn list_user_revisions(
        &self,
        user_id: &UserId,
        start: u64,
        end: u64,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<HistoryPage> {
        self.history(user_id, start, end, page_token, page_size, false).await
    }

    /// History of a user's leaf over `[start, end]`, only revisions where
    /// the leaf changed.
    pub async fn list_entry_history(
        &self,
        user_id: &UserId,
        start: u64,
        end: u64,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<HistoryPage> {
        self.history(user_id, start, end, page_token, page_size, true).await
    }

    /// A live stream of published revisions, starting at `start_revision`.
    ///
    /// Already-published revisions are replayed from the backends; new ones
    /// arrive as the sequencer publishes them. The stream is bounded: a
    /// slow consumer exerts back-pressure, and any publications missed
    /// while catching up are backfilled from the backends. Resume after a
    /// disconnect by resubmitting the next expected revision.
    pub async fn revision_stream(
        &self,
        start_revision: u64,
    ) -> ReceiverStream<PublishedRevision> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let prover = self.clone();
        let mut live = self.publishes.subscribe();

        tokio::spawn(async move {
            let mut next = start_revision;
            // Catch up from storage, then follow the live channel,
            // backfilling any gap the broadcast buffer dropped.
            if prover.backfill(&tx, &mut next).await.is_err() {
                return;
            }
            loop {
                match live.recv().await {
                    Ok(published) => {
                        let revision = published.map_root.revision;
                        if revision < next {
                            continue;
                        }
                        if revision > next && prover.backfill_to(&tx, &mut next, revision - 1).await.is_err() {
                            return;
                        }
                        if tx.send(published).await.is_err() {
                            return;
                        }
                        next = revision + 1;
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "revision stream lagged; backfilling");
                    },
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// A live stream of mutation pages, one per revision, starting at
    /// `start_revision`.
    pub async fn mutation_stream(&self, start_revision: u64) -> ReceiverStream<MutationsPage> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let prover = self.clone();
        let mut revisions = self.revision_stream(start_revision).await;

        tokio::spawn(async move {
            use tokio_stream::StreamExt;
            while let Some(published) = revisions.next().await {
                let revision = published.map_root.revision;
                match prover.full_mutations(revision).await {
                    Ok(page) => {
                        if tx.send(page).await.is_err() {
                            return;
                        }
                    },
                    Err(err) => {
                        warn!(revision, error = %err, "mutation stream read failed");
                        return;
                    },
                }
            }
        });

        ReceiverStream::new(rx)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn revision_bundle(
        &self,
        revision: u64,
        last_verified_tree_size: Option<u64>,
    ) -> Result<RevisionProofBundle> {
        let log_root = self.log.latest_root(&self.directory_id).await?;
        let map_root = self.map.root_at(&self.directory_id, revision).await?;
        let log_inclusion =
            self.log.inclusion_proof(&self.directory_id, revision, log_root.tree_size).await?;

        let log_consistency = match last_verified_tree_size {
            Some(from) if from > 0 => Some(
                self.log.consistency_proof(&self.directory_id, from, log_root.tree_size).await?,
            ),
            _ => None,
        };

        Ok(RevisionProofBundle { map_root, log_root, log_inclusion, log_consistency })
    }

    /// Recomputes the applied-mutation set for `revision` by folding the
    /// claimed batch exactly as the sequencer did.
    async fn applied_mutations(&self, revision: u64) -> Result<Vec<MutationProof>> {
        let prev_root = self.map.root_at(&self.directory_id, revision - 1).await?;
        let this_root = self.map.root_at(&self.directory_id, revision).await?;
        let low = prev_root.highest_fully_completed_seq;
        let high = this_root.highest_fully_completed_seq;
        if high <= low {
            return Ok(Vec::new());
        }

        let batch: Vec<QueuedUpdate> = self
            .queue
            .read_range(&self.directory_id, low, (high - low) as usize)
            .await?
            .into_iter()
            .filter(|queued| queued.seq <= high)
            .collect();

        // Group by index in queue order, mirroring the sequencer's fold
        let mut order: Vec<Index> = Vec::new();
        let mut by_index: std::collections::HashMap<Index, Vec<QueuedUpdate>> =
            std::collections::HashMap::new();
        for queued in batch {
            let input = vrf_input(&self.directory_id, &queued.update.user_id);
            let (index, _) = self.vrf.compute(&input);
            if !by_index.contains_key(&index) {
                order.push(index);
            }
            by_index.entry(index).or_default().push(queued);
        }

        let prev_leaves = self.map.get_leaves(&self.directory_id, revision - 1, &order).await?;

        let mut applied = Vec::new();
        for (index, prev_leaf) in order.iter().zip(prev_leaves) {
            let updates = by_index.remove(index).unwrap_or_default();
            let mut leaf = prev_leaf.leaf.clone();
            for queued in updates {
                match validator::validate_update(index, leaf.as_deref(), &queued.update) {
                    Ok(validated) => {
                        leaf = Some(validated.new_leaf);
                        applied.push(MutationProof {
                            seq: queued.seq,
                            mutation: queued.update.mutation,
                            prev_leaf: prev_leaf.clone(),
                        });
                    },
                    Err(_) => {
                        // Dropped at sequence time; never listed
                    },
                }
            }
        }

        applied.sort_by_key(|m| m.seq);
        Ok(applied)
    }

    /// Full (unpaginated) mutation listing for streams.
    async fn full_mutations(&self, revision: u64) -> Result<MutationsPage> {
        if revision == 0 {
            return Ok(MutationsPage { revision, mutations: Vec::new(), next_page_token: None });
        }
        let mutations = self.applied_mutations(revision).await?;
        Ok(MutationsPage { revision, mutations, next_page_token: None })
    }

    async fn history(
        &self,
        user_id: &UserId,
        start: u64,
        end: u64,
        page_token: Option<&str>,
        page_size: Option<usize>,
        changes_only: bool,
    ) -> Result<HistoryPage> {
        if start > end {
            return Err(KeydirError::invalid_argument(format!(
                "history range inverted: {start} > {end}"
            )));
        }
        let latest = self.latest_revision().await?;
        if start > latest {
            return Err(KeydirError::OutOfRange { requested: start, latest });
        }
        let end = end.min(latest);

        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let resume_from = match page_token {
            Some(token) => {
                self.tokens.decode(token, self.directory_id.as_str(), end)?.position + 1
            },
            None => start,
        };

        let (index, _) = self.vrf.compute(&vrf_input(&self.directory_id, user_id));

        let mut entries = Vec::new();
        let mut previous_leaf: Option<Option<Vec<u8>>> = None;
        let mut cursor = resume_from;
        while cursor <= end && entries.len() < page_size {
            let map_root = self.map.root_at(&self.directory_id, cursor).await?;
            let mut leaves =
                self.map.get_leaves(&self.directory_id, cursor, &[index]).await?;
            let leaf = leaves.pop().ok_or_else(|| KeydirError::Internal {
                message: "map returned no leaf for requested index".to_string(),
                location: snafu::location!(),
            })?;

            let changed = match &previous_leaf {
                Some(prev) => *prev != leaf.leaf,
                None if changes_only && cursor > start => {
                    // Page resumption: compare against the revision before
                    let mut before = self
                        .map
                        .get_leaves(&self.directory_id, cursor - 1, &[index])
                        .await?;
                    before.pop().map(|b| b.leaf != leaf.leaf).unwrap_or(true)
                },
                None => true,
            };
            previous_leaf = Some(leaf.leaf.clone());

            if !changes_only || changed {
                entries.push(HistoryEntry { map_root, leaf });
            }
            cursor += 1;
        }

        let next_page_token = if cursor <= end {
            let token = PageToken::new(self.directory_id.as_str(), end, cursor - 1);
            Some(self.tokens.encode(&token))
        } else {
            None
        };

        Ok(HistoryPage { entries, next_page_token })
    }

    /// Backfills `[next, latest]` from storage.
    async fn backfill(
        &self,
        tx: &mpsc::Sender<PublishedRevision>,
        next: &mut u64,
    ) -> std::result::Result<(), ()> {
        let latest = match self.latest_revision().await {
            Ok(latest) => latest,
            Err(_) => return Err(()),
        };
        if *next > latest {
            return Ok(());
        }
        self.backfill_to(tx, next, latest).await
    }

    /// Backfills `[next, upto]` from storage.
    async fn backfill_to(
        &self,
        tx: &mpsc::Sender<PublishedRevision>,
        next: &mut u64,
        upto: u64,
    ) -> std::result::Result<(), ()> {
        while *next <= upto {
            let map_root = match self.map.root_at(&self.directory_id, *next).await {
                Ok(root) => root,
                Err(_) => return Err(()),
            };
            let log_root = match self.log.latest_root(&self.directory_id).await {
                Ok(root) => root,
                Err(_) => return Err(()),
            };
            if tx.send(PublishedRevision { map_root, log_root }).await.is_err() {
                return Err(());
            }
            *next += 1;
        }
        Ok(())
    }
}

fn decode_committed(leaf: &MapLeafInclusion) -> Result<Option<Committed>> {
    match &leaf.extra_data {
        None => Ok(None),
        Some(bytes) => codec::decode::<Committed>(bytes).map(Some).map_err(|_| {
            KeydirError::Internal {
                message: "stored commitment opening is undecodable".to_string(),
                location: snafu::location!(),
            }
        }),
    }
}

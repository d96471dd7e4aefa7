use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::domain::criteria::GroupSize;
use crate::domain::types::RequestId;
use crate::queue::BucketKey;

use super::scoring::{candidate_order, group_score, pair_score, EnrichedRequest, MIN_PAIR_SCORE};

/// A committed candidate match awaiting finalization.
#[derive(Debug, Clone)]
pub struct CandidateMatch {
    pub bucket: BucketKey,
    /// The seed request; its owner becomes the lobby host.
    pub seed: RequestId,
    pub participants: Vec<EnrichedRequest>,
    /// Joint capacity window of all participants.
    pub capacity: GroupSize,
    pub group_score: f64,
}

/// Greedy group builder over one bucket snapshot.
///
/// Deterministic: given identical snapshots and skills the same matches come
/// out. Seeds iterate oldest-first; candidates are ranked by their weakest
/// pairwise link into the group, with preselected peers preferred on ties and
/// wait age as the final tie-break.
pub fn form_matches(
    bucket: &BucketKey,
    snapshot: &[EnrichedRequest],
    now: DateTime<Utc>,
) -> Vec<CandidateMatch> {
    // Requests listed in several regions appear once per bucket; a second
    // occurrence of the same id within one snapshot would be a caller bug,
    // but formation de-duplicates defensively all the same.
    let mut seen = HashSet::new();
    let mut pool: Vec<&EnrichedRequest> = snapshot
        .iter()
        .filter(|r| seen.insert(r.request_id))
        .collect();

    // Drop requests whose window no subset of this bucket can satisfy.
    let bucket_size = pool.len();
    pool.retain(|r| usize::from(r.group_size.min) <= bucket_size);

    pool.sort_by(|a, b| candidate_order(a, b));

    let mut used: HashSet<RequestId> = HashSet::new();
    let mut matches = Vec::new();

    for seed_index in 0..pool.len() {
        let seed = pool[seed_index];
        if used.contains(&seed.request_id) {
            continue;
        }

        let mut group: Vec<&EnrichedRequest> = vec![seed];
        let mut window = seed.group_size;
        // The seed's preferred size: its window maximum.
        let target = usize::from(seed.group_size.max);

        loop {
            if group.len() >= usize::from(window.max) {
                break;
            }

            // Rank the remaining candidates by their weakest link into the
            // current group.
            let mut best: Option<(&EnrichedRequest, f64, GroupSize)> = None;
            for candidate in &pool {
                if used.contains(&candidate.request_id)
                    || group.iter().any(|m| m.request_id == candidate.request_id)
                {
                    continue;
                }
                let Some(joint) = window.intersect(&candidate.group_size) else {
                    continue;
                };
                if group.len() + 1 > usize::from(joint.max) {
                    continue;
                }
                let mut weakest = f64::MAX;
                let mut comparable = true;
                for member in &group {
                    match pair_score(member, candidate, now) {
                        Some(score) => weakest = weakest.min(score),
                        None => {
                            comparable = false;
                            break;
                        }
                    }
                }
                if !comparable || weakest < MIN_PAIR_SCORE {
                    continue;
                }

                let better = match &best {
                    None => true,
                    Some((current, current_score, _)) => {
                        if (weakest - current_score).abs() > f64::EPSILON {
                            weakest > *current_score
                        } else {
                            // Equal scores: the seed's preselected peers win,
                            // then the older request.
                            let cand_pre = seed.preselected_users.contains(&candidate.user_id);
                            let curr_pre = seed.preselected_users.contains(&current.user_id);
                            if cand_pre != curr_pre {
                                cand_pre
                            } else {
                                candidate_order(candidate, current) == std::cmp::Ordering::Less
                            }
                        }
                    }
                };
                if better {
                    best = Some((candidate, weakest, joint));
                }
            }

            let Some((candidate, _, joint)) = best else {
                // No further improvement available.
                break;
            };
            group.push(candidate);
            window = joint;

            // Once inside the joint window and at the seed's preferred size
            // there is nothing left to improve.
            if group.len() >= target && window.contains(group.len()) {
                break;
            }
        }

        if window.contains(group.len()) && group.len() >= usize::from(window.min) {
            let participants: Vec<EnrichedRequest> = group.iter().map(|r| (*r).clone()).collect();
            for member in &participants {
                used.insert(member.request_id);
            }
            let score = group_score(&participants, now);
            matches.push(CandidateMatch {
                bucket: bucket.clone(),
                seed: seed.request_id,
                participants,
                capacity: window,
                group_score: score,
            });
        }
    }

    matches
}

//! # Candidate Ranking
//!
//! Filters and orders the discovery feed for one viewer.
//!
//! Ordering: score descending, then distance ascending, then profile id so
//! the feed is stable between calls.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use super::scoring;
use crate::geo::{distance_m, DistanceBand};
use crate::profile::{canonical_interest, Intent, Profile, ProfileId};

/// Optional narrowing of the discovery feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateFilter {
    /// Only these intents (empty means any)
    pub intents: BTreeSet<Intent>,
    /// Candidates must have all of these interests
    pub required_interests: BTreeSet<String>,
    /// Minimum compatibility score
    pub min_score: u8,
    /// Drop candidates whose intent is incompatible with the viewer's
    pub compatible_intent_only: bool,
    /// Keep profiles the viewer has already liked or passed
    pub include_acted: bool,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl CandidateFilter {
    /// Restrict to the given intents
    pub fn with_intents(mut self, intents: impl IntoIterator<Item = Intent>) -> Self {
        self.intents = intents.into_iter().collect();
        self
    }

    /// Require an interest (canonicalised)
    pub fn requiring(mut self, interest: &str) -> Self {
        if let Some(tag) = canonical_interest(interest) {
            self.required_interests.insert(tag);
        }
        self
    }

    /// Set the minimum score
    pub fn with_min_score(mut self, min_score: u8) -> Self {
        self.min_score = min_score;
        self
    }

    /// Cap the number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn admits(&self, candidate: &Profile) -> bool {
        if !self.intents.is_empty() && !self.intents.contains(&candidate.intent) {
            return false;
        }
        self.required_interests
            .iter()
            .all(|tag| candidate.interests.contains(tag))
    }
}

/// One entry of the discovery feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Candidate profile id
    pub profile_id: ProfileId,
    /// Compatibility score with the viewer
    pub score: u8,
    /// Interests in common
    pub shared_interests: BTreeSet<String>,
    /// Whether the intents are compatible
    pub intent_ok: bool,
    /// Approximate distance between cell centers (m)
    pub distance_m: f64,
    /// Display bucket for the distance
    pub band: DistanceBand,
}

/// Rank a pool of profiles for a viewer
///
/// `excluded` holds ids that must never be shown (already judged, blocked).
/// The viewer, erased profiles and profiles without a location are always
/// skipped. A negative or NaN `max_distance_km` yields nothing.
pub fn rank_candidates<'a>(
    viewer: &Profile,
    pool: impl IntoIterator<Item = &'a Profile>,
    max_distance_km: f64,
    filter: &CandidateFilter,
    excluded: &HashSet<ProfileId>,
) -> Vec<Candidate> {
    let Some(origin) = viewer.location.as_ref() else {
        return Vec::new();
    };
    let max_distance_m = max_distance_km * 1_000.0;

    let mut ranked: Vec<Candidate> = pool
        .into_iter()
        .filter(|p| p.id != viewer.id && p.is_active() && !excluded.contains(&p.id))
        .filter(|p| filter.admits(p))
        .filter_map(|p| {
            let location = p.location.as_ref()?;
            let distance = distance_m(origin, location);
            if max_distance_m.is_nan() || distance > max_distance_m {
                return None;
            }

            let compatibility = scoring::score(viewer, p);
            if compatibility.score < filter.min_score {
                return None;
            }
            if filter.compatible_intent_only && !compatibility.intent_ok {
                return None;
            }

            Some(Candidate {
                profile_id: p.id.clone(),
                score: compatibility.score,
                shared_interests: compatibility.shared,
                intent_ok: compatibility.intent_ok,
                distance_m: distance,
                band: DistanceBand::from_meters(distance),
            })
        })
        .collect();

    ranked.sort_by(|x, y| {
        y.score
            .cmp(&x.score)
            .then_with(|| {
                x.distance_m
                    .partial_cmp(&y.distance_m)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| x.profile_id.cmp(&y.profile_id))
    });

    if let Some(limit) = filter.limit {
        ranked.truncate(limit);
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoPoint, Geohash, PRECISION_NEIGHBORHOOD};

    fn at(lat: f64, lon: f64) -> Geohash {
        Geohash::encode(GeoPoint::new(lat, lon).unwrap(), PRECISION_NEIGHBORHOOD).unwrap()
    }

    fn profile(id: &str, interests: &[&str], intent: Intent, location: Geohash) -> Profile {
        Profile::new(id, interests.iter().copied(), intent, location).unwrap()
    }

    fn ids(ranked: &[Candidate]) -> Vec<&str> {
        ranked.iter().map(|c| c.profile_id.as_str()).collect()
    }

    // Berlin Mitte and a few neighbours
    fn pool() -> (Profile, Vec<Profile>) {
        let viewer = profile("me", &["coffee", "hiking", "art"], Intent::LongTerm, at(52.52, 13.405));
        let others = vec![
            profile("near_two", &["coffee", "hiking"], Intent::Open, at(52.521, 13.41)),
            profile("far_two", &["coffee", "art"], Intent::Open, at(52.40, 13.05)),
            profile("near_one", &["coffee"], Intent::Open, at(52.53, 13.40)),
            profile("paris", &["coffee", "hiking", "art"], Intent::LongTerm, at(48.8566, 2.3522)),
            profile("twin", &["coffee", "hiking", "art"], Intent::LongTerm, at(52.52, 13.405)),
        ];
        (viewer, others)
    }

    #[test]
    fn test_sorted_by_score_then_distance() {
        let (viewer, others) = pool();
        let ranked = rank_candidates(&viewer, &others, 50.0, &CandidateFilter::default(), &HashSet::new());

        assert_eq!(ids(&ranked), vec!["twin", "near_two", "far_two", "near_one"]);
        assert_eq!(ranked[0].score, 85);
        assert_eq!(ranked[0].distance_m, 0.0);
        assert_eq!(ranked[0].band, DistanceBand::UnderOneKm);
        assert!(ranked[1].distance_m < ranked[2].distance_m);
    }

    #[test]
    fn test_distance_cutoff() {
        let (viewer, others) = pool();
        let ranked = rank_candidates(&viewer, &others, 5.0, &CandidateFilter::default(), &HashSet::new());
        assert!(!ids(&ranked).contains(&"far_two"));
        assert!(!ids(&ranked).contains(&"paris"));

        let everything = rank_candidates(&viewer, &others, 2_000.0, &CandidateFilter::default(), &HashSet::new());
        assert_eq!(everything.len(), 5);

        assert!(rank_candidates(&viewer, &others, -1.0, &CandidateFilter::default(), &HashSet::new()).is_empty());
        assert!(rank_candidates(&viewer, &others, f64::NAN, &CandidateFilter::default(), &HashSet::new()).is_empty());
    }

    #[test]
    fn test_exclusions() {
        let (viewer, mut others) = pool();
        others.push(viewer.clone());
        let tomb = others[0].tombstone(others[0].updated_at + 1);
        others[0] = tomb;

        let excluded: HashSet<String> = ["twin".to_string()].into_iter().collect();
        let ranked = rank_candidates(&viewer, &others, 50.0, &CandidateFilter::default(), &excluded);

        assert_eq!(ids(&ranked), vec!["far_two", "near_one"]);
    }

    #[test]
    fn test_filters() {
        let (viewer, others) = pool();

        let only_long_term = CandidateFilter::default().with_intents([Intent::LongTerm]);
        let ranked = rank_candidates(&viewer, &others, 2_000.0, &only_long_term, &HashSet::new());
        assert_eq!(ids(&ranked), vec!["twin", "paris"]);

        let needs_art = CandidateFilter::default().requiring(" ART ");
        let ranked = rank_candidates(&viewer, &others, 50.0, &needs_art, &HashSet::new());
        assert_eq!(ids(&ranked), vec!["twin", "far_two"]);

        let strong = CandidateFilter::default().with_min_score(50).with_limit(2);
        let ranked = rank_candidates(&viewer, &others, 50.0, &strong, &HashSet::new());
        assert_eq!(ids(&ranked), vec!["twin", "near_two"]);
    }

    #[test]
    fn test_viewer_without_location_sees_nothing() {
        let (viewer, others) = pool();
        let tomb = viewer.tombstone(viewer.updated_at + 1);
        assert!(rank_candidates(&tomb, &others, 50.0, &CandidateFilter::default(), &HashSet::new()).is_empty());
    }
}

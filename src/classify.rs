//! Classification of raw reference/source associations into the four bins
//! used by completeness and photometric-depth tests.
//!
//! Given the raw match pairs for a detector together with that detector's
//! full source and reference catalogs:
//!
//! 1. count how many sources each reference object matched;
//! 2. pairs whose reference matched exactly once are `matched`, the rest
//!    `blended`;
//! 3. sources appearing in no pair are `orphan`;
//! 4. reference objects appearing in no pair are `undetected`.
//!
//! When no reference catalog is available (some repositories only persist
//! the match table), the reference side of the pairs stands in for the
//! catalog, which leaves the undetected bin empty by construction.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::records::{MatchSet, MatchedPair, RawMatch, RefObject, RefObjectSet, SourceRecord, SourceSet};

/// Join raw id-level associations against the detector's catalogs and
/// classify the result. Ids missing from a catalog get a bare record
/// carrying only the id, so a sparse store still classifies.
pub fn classify_raw_matches(
    raw: &[RawMatch],
    sources: &SourceSet,
    refs: &RefObjectSet,
) -> MatchSet {
    let pairs: Vec<MatchedPair> = raw
        .iter()
        .map(|m| MatchedPair {
            ref_obj: refs
                .iter()
                .find(|r| r.id == m.ref_id)
                .cloned()
                .unwrap_or(RefObject { id: m.ref_id, ..RefObject::default() }),
            source: sources
                .iter()
                .find(|s| s.id == m.src_id)
                .cloned()
                .unwrap_or(SourceRecord { id: m.src_id, ..SourceRecord::default() }),
            distance: m.distance,
        })
        .collect();
    classify_matches(pairs, sources, refs)
}

/// Sort raw pairs into matched/blended/orphan/undetected bins.
pub fn classify_matches(
    pairs: Vec<MatchedPair>,
    sources: &SourceSet,
    refs: &RefObjectSet,
) -> MatchSet {
    let mut ref_multiplicity: HashMap<i64, u32> = HashMap::new();
    for p in &pairs {
        *ref_multiplicity.entry(p.ref_obj.id).or_insert(0) += 1;
    }

    let matched_src: HashSet<i64> = pairs.iter().map(|p| p.source.id).collect();

    let mut out = MatchSet::default();

    let synthesize_refs = refs.is_empty();
    if !synthesize_refs {
        out.undetected = refs
            .iter()
            .filter(|r| !ref_multiplicity.contains_key(&r.id))
            .cloned()
            .collect();
    }

    out.orphan = sources
        .iter()
        .filter(|s| !matched_src.contains(&s.id))
        .cloned()
        .collect();

    for p in pairs {
        if ref_multiplicity[&p.ref_obj.id] == 1 {
            out.matched.push(p);
        } else {
            out.blended.push(p);
        }
    }

    debug!(
        matched = out.matched.len(),
        blended = out.blended.len(),
        orphan = out.orphan.len(),
        undetected = out.undetected.len(),
        ref_catalog = if synthesize_refs { "synthesized" } else { "real" },
        "matches classified"
    );
    out
}

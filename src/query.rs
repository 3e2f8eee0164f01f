//! Query evaluation: match a (possibly wildcarded) dataId against the set of
//! identifiers a repository actually contains.
//!
//! The repository hands back every identifier it knows as a schema-ordered
//! tuple. Matching is per-field: unconstrained fields pass everything, exact
//! fields require equality, and patterns anchor at one end. Camera-level
//! exclusions (e.g. HSC guide CCDs) are applied after the caller's
//! constraints, so an explicit request for an excluded detector still
//! returns nothing.

use std::collections::BTreeSet;

use tracing::debug;

use crate::camera::CameraInfo;
use crate::dataid::{DataId, DataIdSchema, IdTuple};
use crate::error::Result;

/// True when `tuple` satisfies every constraint in `query`. Fields absent
/// from the query are unconstrained.
pub fn tuple_matches(schema: &DataIdSchema, query: &DataId, tuple: &IdTuple) -> bool {
    schema.fields().iter().zip(tuple).all(|(f, value)| {
        query.get(f.name).map(|c| c.matches(value)).unwrap_or(true)
    })
}

/// Evaluate a query against the full identifier list, applying the camera's
/// built-in exclusions. Results are deduplicated and sorted so downstream
/// iteration is deterministic.
pub fn select_ids(
    camera: &CameraInfo,
    query: &DataId,
    known: &[IdTuple],
) -> Result<Vec<IdTuple>> {
    let schema = camera.schema();
    schema.validate(query)?;

    let mut out = BTreeSet::new();
    'tuples: for tuple in known {
        if !tuple_matches(schema, query, tuple) {
            continue;
        }
        if let Some(excl) = camera.exclusion() {
            for (f, value) in schema.fields().iter().zip(tuple) {
                if excl.excludes(f.name, value) {
                    continue 'tuples;
                }
            }
        }
        out.insert(tuple.clone());
    }

    debug!(
        query = %query.to_key(schema, true),
        matched = out.len(),
        available = known.len(),
        "query evaluated"
    );
    Ok(out.into_iter().collect())
}

/// Collapse matched identifiers down to the granularity used for breaking a
/// query into per-item work units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Keep only visit-like fields; everything else becomes unconstrained.
    Visit,
    /// Keep visit-like fields plus the raft.
    Raft,
    /// Keep every field: one work unit per detector.
    Ccd,
}

/// Break a query into the sorted, deduplicated list of sub-identifiers at
/// the requested granularity. Each returned dataId is re-usable as a query
/// in its own right.
pub fn break_data_id(
    camera: &CameraInfo,
    query: &DataId,
    known: &[IdTuple],
    granularity: Granularity,
) -> Result<Vec<DataId>> {
    let schema = camera.schema();
    let selected = select_ids(camera, query, known)?;

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tuple in &selected {
        let full = DataId::from_tuple(schema, tuple)?;
        let mut id = DataId::new();
        for f in schema.fields() {
            let keep = match granularity {
                Granularity::Ccd => true,
                Granularity::Raft => f.visit_like || f.name == "raft",
                Granularity::Visit => f.visit_like,
            };
            if keep {
                if let Some(v) = full.get(f.name) {
                    id.set(f.name, v.clone());
                }
            }
        }
        let key = id.to_key(schema, true);
        if seen.insert(key) {
            out.push(id);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hsc_ids() -> Vec<IdTuple> {
        let mut out = Vec::new();
        for visit in ["1000", "1002"] {
            for ccd in ["5", "50", "104"] {
                out.push(vec![visit.to_string(), ccd.to_string()]);
            }
        }
        out
    }

    #[test]
    fn exact_query_selects_one() {
        let cam = CameraInfo::hsc(None);
        let q = DataId::from_pairs([("visit", "1000"), ("ccd", "50")]).unwrap();
        let got = select_ids(&cam, &q, &hsc_ids()).unwrap();
        assert_eq!(got, vec![vec!["1000".to_string(), "50".to_string()]]);
    }

    #[test]
    fn wildcard_query_skips_guide_ccds() {
        let cam = CameraInfo::hsc(None);
        let q = DataId::from_pairs([("visit", "1000"), ("ccd", ".*")]).unwrap();
        let got = select_ids(&cam, &q, &hsc_ids()).unwrap();
        let ccds: Vec<&str> = got.iter().map(|t| t[1].as_str()).collect();
        assert_eq!(ccds, vec!["5", "50"]);
    }

    #[test]
    fn explicit_request_for_excluded_ccd_is_empty() {
        let cam = CameraInfo::hsc(None);
        let q = DataId::from_pairs([("visit", "1000"), ("ccd", "104")]).unwrap();
        assert!(select_ids(&cam, &q, &hsc_ids()).unwrap().is_empty());
    }

    #[test]
    fn prefix_pattern_constrains() {
        let cam = CameraInfo::hsc(None);
        let q = DataId::from_pairs([("visit", "100.*"), ("ccd", "5")]).unwrap();
        let got = select_ids(&cam, &q, &hsc_ids()).unwrap();
        let visits: Vec<&str> = got.iter().map(|t| t[0].as_str()).collect();
        assert_eq!(visits, vec!["1000", "1002"]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let cam = CameraInfo::hsc(None);
        let q = DataId::from_pairs([("raft", "2,2")]).unwrap();
        assert!(select_ids(&cam, &q, &hsc_ids()).is_err());
    }

    #[test]
    fn break_to_visits_dedups() {
        let cam = CameraInfo::hsc(None);
        let q = DataId::from_pairs([("visit", ".*"), ("ccd", ".*")]).unwrap();
        let visits = break_data_id(&cam, &q, &hsc_ids(), Granularity::Visit).unwrap();
        assert_eq!(visits.len(), 2);
        assert!(visits[0].get("visit").is_some());
        assert!(!visits[0].contains("ccd"));
    }

    #[test]
    fn break_to_ccds_keeps_every_field() {
        let cam = CameraInfo::hsc(None);
        let q = DataId::from_pairs([("visit", "1000"), ("ccd", ".*")]).unwrap();
        let ccds = break_data_id(&cam, &q, &hsc_ids(), Granularity::Ccd).unwrap();
        assert_eq!(ccds.len(), 2);
        assert!(ccds.iter().all(|id| id.contains("visit") && id.contains("ccd")));
    }
}

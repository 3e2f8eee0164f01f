//! Identifier ("dataId") model and the canonical-key codec.
//!
//! Every retrievable item is addressed by a dataId: a mapping from field name
//! (`visit`, `raft`, `sensor`, `ccd`, ...) to either a concrete value or a
//! wildcard. Query dataIds may leave fields unconstrained; the cache layer
//! needs a canonical, sortable string key for every dataId, and the backends
//! need a positional tuple form for the list of all known identifiers.
//!
//! Wildcards are parsed up front into a structured [`IdValue`] rather than
//! carried around as regex strings. The supported grammar is deliberately
//! narrow: a bare wildcard (`.*`, `?`, `%`), or a wildcard at one end of a
//! digit/comma string (`123.*`, `%42`). Anything else fails immediately with
//! the offending field name.

use std::collections::HashMap;
use std::fmt;

use crate::error::{QaError, Result};

/// Positional (schema-ordered) form of a concrete identifier.
pub type IdTuple = Vec<String>;

// ── Field values ────────────────────────────────────────────────────────────

/// A single dataId field value: concrete, unconstrained, or a narrow
/// prefix/suffix pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdValue {
    /// Matches exactly this string.
    Exact(String),
    /// Matches anything.
    Any,
    /// Matches values starting with `prefix` and ending with `suffix`
    /// (one of the two is always empty).
    Pattern { prefix: String, suffix: String },
}

impl IdValue {
    /// Parse the restricted wildcard grammar. `field` is used only for error
    /// reporting.
    pub fn parse(field: &str, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == ".*" || raw == "?" || raw == "%" {
            return Ok(IdValue::Any);
        }

        let is_plain = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == ',' || c == ':' || c == '_' || c == '-')
        };

        if is_plain(raw) {
            return Ok(IdValue::Exact(raw.to_string()));
        }

        // Wildcard at one end: "123.*", "123?", "123%", ".*123", "%123"
        for wild in [".*", "?", "%"] {
            if let Some(prefix) = raw.strip_suffix(wild) {
                if is_plain(prefix) {
                    return Ok(IdValue::Pattern {
                        prefix: prefix.to_string(),
                        suffix: String::new(),
                    });
                }
            }
            if let Some(suffix) = raw.strip_prefix(wild) {
                if is_plain(suffix) {
                    return Ok(IdValue::Pattern {
                        prefix: String::new(),
                        suffix: suffix.to_string(),
                    });
                }
            }
        }

        Err(QaError::malformed(
            field,
            format!("wildcards may only be '.*', '?', or '%' at the start or end of a value (got '{raw}')"),
        ))
    }

    /// True when this value constrains a candidate to a single string.
    pub fn is_exact(&self) -> bool {
        matches!(self, IdValue::Exact(_))
    }

    /// Test a concrete candidate value against this constraint.
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            IdValue::Exact(v) => v == candidate,
            IdValue::Any => true,
            IdValue::Pattern { prefix, suffix } => {
                candidate.starts_with(prefix.as_str()) && candidate.ends_with(suffix.as_str())
            }
        }
    }

    /// Render for inclusion in a canonical key. Commas are stripped so the
    /// key remains unambiguous under the fixed field ordering.
    pub fn render(&self) -> String {
        match self {
            IdValue::Exact(v) => v.replace(',', ""),
            IdValue::Any => ".*".to_string(),
            IdValue::Pattern { prefix, suffix } => {
                format!("{}.*{}", prefix.replace(',', ""), suffix.replace(',', ""))
            }
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Exact(v) => write!(f, "{v}"),
            IdValue::Any => write!(f, ".*"),
            IdValue::Pattern { prefix, suffix } => write!(f, "{prefix}.*{suffix}"),
        }
    }
}

// ── Schema ──────────────────────────────────────────────────────────────────

/// One declared identifier field for a camera.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    /// True when this field discriminates separate exposures of the same sky
    /// (used when collapsing identifiers to visits).
    pub visit_like: bool,
}

/// The fixed, ordered set of identifier fields for one camera. The ordering
/// is what makes canonical keys injective over concrete identifiers.
#[derive(Debug, Clone)]
pub struct DataIdSchema {
    fields: Vec<FieldDef>,
}

impl DataIdSchema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        DataIdSchema { fields }
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Reject any field name this camera does not declare.
    pub fn validate(&self, id: &DataId) -> Result<()> {
        for name in id.values.keys() {
            if !self.has_field(name) {
                return Err(QaError::malformed(
                    name.clone(),
                    "field not valid for this camera",
                ));
            }
        }
        Ok(())
    }
}

// ── DataId ──────────────────────────────────────────────────────────────────

/// A dataId: field name → constraint. Construction validates the wildcard
/// grammar; schema validation happens at the retrieval boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataId {
    values: HashMap<String, IdValue>,
}

impl DataId {
    pub fn new() -> Self {
        DataId::default()
    }

    /// Build from `(field, value)` string pairs, parsing each value.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut id = DataId::new();
        for (field, value) in pairs {
            id.values
                .insert(field.to_string(), IdValue::parse(field, value)?);
        }
        Ok(id)
    }

    pub fn get(&self, field: &str) -> Option<&IdValue> {
        self.values.get(field)
    }

    pub fn set(&mut self, field: &str, value: IdValue) {
        self.values.insert(field.to_string(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<IdValue> {
        self.values.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// True when every schema field is present and exact, i.e. this dataId
    /// denotes exactly one concrete identifier. `snap` is exempt because it
    /// defaults to `"0"` in the fully-defined key.
    pub fn is_concrete(&self, schema: &DataIdSchema) -> bool {
        schema.fields().iter().all(|f| {
            f.name == "snap"
                || self
                    .values
                    .get(f.name)
                    .map(IdValue::is_exact)
                    .unwrap_or(false)
        })
    }

    /// Canonical string key under a schema's fixed field ordering.
    ///
    /// With `fully_define`, unspecified fields render as `.*` (and `snap` as
    /// `"0"`), so every concrete identifier for a camera has exactly one key.
    /// Without it, unspecified fields are omitted: this is the "as-supplied"
    /// key used to record satisfied queries.
    pub fn to_key(&self, schema: &DataIdSchema, fully_define: bool) -> String {
        let mut parts = Vec::with_capacity(schema.fields().len());
        for f in schema.fields() {
            match self.values.get(f.name) {
                Some(v) => parts.push(format!("{}{}", f.name, v.render())),
                None if fully_define => {
                    if f.name == "snap" {
                        parts.push(format!("{}0", f.name));
                    } else {
                        parts.push(format!("{}.*", f.name));
                    }
                }
                None => {}
            }
        }
        parts.join("-")
    }

    /// Positional tuple form. Every schema field must be present and exact
    /// (`snap` defaults to `"0"`).
    pub fn to_tuple(&self, schema: &DataIdSchema) -> Result<IdTuple> {
        let mut out = Vec::with_capacity(schema.fields().len());
        for f in schema.fields() {
            match self.values.get(f.name) {
                Some(IdValue::Exact(v)) => out.push(v.clone()),
                None if f.name == "snap" => out.push("0".to_string()),
                Some(_) => {
                    return Err(QaError::malformed(f.name, "tuple form requires a concrete value"))
                }
                None => return Err(QaError::malformed(f.name, "field missing from identifier")),
            }
        }
        Ok(out)
    }

    /// Inverse of [`DataId::to_tuple`].
    pub fn from_tuple(schema: &DataIdSchema, tuple: &[String]) -> Result<Self> {
        if tuple.len() != schema.fields().len() {
            return Err(QaError::malformed(
                "dataId",
                format!(
                    "tuple has {} values but schema declares {} fields",
                    tuple.len(),
                    schema.fields().len()
                ),
            ));
        }
        let mut id = DataId::new();
        for (f, v) in schema.fields().iter().zip(tuple) {
            id.values
                .insert(f.name.to_string(), IdValue::Exact(v.clone()));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> DataIdSchema {
        DataIdSchema::new(vec![
            FieldDef { name: "visit", visit_like: true },
            FieldDef { name: "snap", visit_like: false },
            FieldDef { name: "raft", visit_like: false },
            FieldDef { name: "sensor", visit_like: false },
        ])
    }

    #[test]
    fn parse_wildcard_forms() {
        assert_eq!(IdValue::parse("visit", ".*").unwrap(), IdValue::Any);
        assert_eq!(IdValue::parse("visit", "%").unwrap(), IdValue::Any);
        assert_eq!(
            IdValue::parse("visit", "855").unwrap(),
            IdValue::Exact("855".into())
        );
        assert_eq!(
            IdValue::parse("visit", "855.*").unwrap(),
            IdValue::Pattern { prefix: "855".into(), suffix: String::new() }
        );
        assert_eq!(
            IdValue::parse("visit", "%55").unwrap(),
            IdValue::Pattern { prefix: String::new(), suffix: "55".into() }
        );
    }

    #[test]
    fn parse_rejects_inner_wildcards() {
        let err = IdValue::parse("visit", "8.*5").unwrap_err();
        assert!(matches!(err, QaError::MalformedIdentifier { ref field, .. } if field == "visit"));
    }

    #[test]
    fn pattern_matching() {
        let v = IdValue::parse("visit", "85.*").unwrap();
        assert!(v.matches("855"));
        assert!(v.matches("85"));
        assert!(!v.matches("955"));
    }

    #[test]
    fn key_is_ordered_and_fully_defined() {
        let s = schema();
        let id = DataId::from_pairs([("sensor", "1,1"), ("visit", "85501234")]).unwrap();
        assert_eq!(id.to_key(&s, false), "visit85501234-sensor11");
        assert_eq!(id.to_key(&s, true), "visit85501234-snap0-raft.*-sensor11");
    }

    #[test]
    fn tuple_round_trip() {
        let s = schema();
        let id = DataId::from_pairs([
            ("visit", "855"),
            ("snap", "0"),
            ("raft", "2,2"),
            ("sensor", "1,1"),
        ])
        .unwrap();
        let t = id.to_tuple(&s).unwrap();
        assert_eq!(t, vec!["855", "0", "2,2", "1,1"]);
        let back = DataId::from_tuple(&s, &t).unwrap();
        assert_eq!(back.to_key(&s, true), id.to_key(&s, true));
    }

    #[test]
    fn tuple_requires_all_fields() {
        let s = schema();
        let id = DataId::from_pairs([("visit", "855")]).unwrap();
        let err = id.to_tuple(&s).unwrap_err();
        assert!(matches!(err, QaError::MalformedIdentifier { ref field, .. } if field == "raft"));
    }

    #[test]
    fn concrete_detection() {
        let s = schema();
        let all = DataId::from_pairs([("visit", "855"), ("raft", "2,2"), ("sensor", "1,1")]).unwrap();
        assert!(all.is_concrete(&s));
        let partial = DataId::from_pairs([("visit", "855"), ("sensor", ".*")]).unwrap();
        assert!(!partial.is_concrete(&s));
    }
}

//! Usage-scoped target resolution over the delegation graph
//!
//! A [`DelegationGraph`] starts from the top-level targets role and follows
//! delegations lazily: a delegated role's document is loaded only when one of
//! its path patterns is relevant to the query. When the same identifier is
//! listed by several relevant roles, the listing from the most specific
//! delegation wins (see [`Specificity`]); ties keep the listing met first in
//! delegation order.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::metadata::{DelegatedRole, TargetRecord, TargetsRole, Usage};
use crate::pattern::PathPattern;
use crate::{Error, Result};

/// Name of the top-level targets role
pub const TOP_LEVEL_ROLE: &str = "targets";

/// Loads verified targets role documents by name
pub trait RoleSource {
    /// The top-level targets role, if one is available
    fn top_level(&self) -> Result<Option<TargetsRole>>;

    /// A delegated targets role, if one is available
    fn delegated(&self, name: &str) -> Result<Option<TargetsRole>>;
}

/// Precedence of a listing; greater wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    /// Fully literal segments in the delegation's matching pattern
    pub literal_segments: usize,
    /// Delegation depth (top-level role is 0)
    pub depth: usize,
    /// Literal characters in the delegation's matching pattern
    pub literal_chars: usize,
}

impl Specificity {
    const TOP_LEVEL: Specificity = Specificity {
        literal_segments: 0,
        depth: 0,
        literal_chars: 0,
    };
}

/// Which delegations and listings a walk visits
struct Query<'q> {
    in_scope: &'q dyn Fn(&PathPattern) -> bool,
    accept: &'q dyn Fn(&TargetRecord) -> bool,
    honor_terminating: bool,
}

/// A candidate listing found during a walk
#[derive(Debug, Clone)]
struct Candidate {
    role: String,
    specificity: Specificity,
    record: TargetRecord,
}

/// The targets delegation graph rooted at the top-level targets role
pub struct DelegationGraph<'a, S: RoleSource + ?Sized> {
    source: &'a S,
    top: TargetsRole,
}

impl<'a, S: RoleSource + ?Sized> DelegationGraph<'a, S> {
    /// Build a graph over an already loaded top-level role
    pub fn new(source: &'a S, top: TargetsRole) -> Self {
        Self { source, top }
    }

    /// Load the top-level role from `source`
    ///
    /// Returns `None` when no top-level role is available yet.
    pub fn load(source: &'a S) -> Result<Option<Self>> {
        Ok(source.top_level()?.map(|top| Self::new(source, top)))
    }

    /// The top-level targets role
    pub fn top_level(&self) -> &TargetsRole {
        &self.top
    }

    /// Active targets belonging to `usage`, ordered by identifier
    ///
    /// Walks every delegation whose path patterns intersect `<usage>/**/*`.
    /// An unrecognised usage resolves to an empty set.
    pub fn resolve_usage(&self, usage: &str) -> Result<Vec<TargetRecord>> {
        let usage = Usage::parse(usage);
        if !usage.is_recognized() {
            debug!(usage = %usage, "unrecognised usage resolves to no targets");
            return Ok(Vec::new());
        }
        let usage_pattern = PathPattern::for_usage(usage.as_str())?;

        let in_scope = |p: &PathPattern| p.intersects(&usage_pattern);
        let accept = |r: &TargetRecord| r.is_active_for(&usage);
        let found = self.walk(&Query {
            in_scope: &in_scope,
            accept: &accept,
            honor_terminating: false,
        })?;

        Ok(found.into_values().map(|c| c.record).collect())
    }

    /// Look up a single target by identifier
    ///
    /// Follows only delegations whose patterns match `name`, stopping at a
    /// matching terminating delegation.
    pub fn find_target(&self, name: &str) -> Result<Option<TargetRecord>> {
        let in_scope = |p: &PathPattern| p.matches(name);
        let accept = |r: &TargetRecord| r.name == name;
        let mut found = self.walk(&Query {
            in_scope: &in_scope,
            accept: &accept,
            honor_terminating: true,
        })?;
        Ok(found.remove(name).map(|c| c.record))
    }

    fn walk(&self, query: &Query<'_>) -> Result<BTreeMap<String, Candidate>> {
        let mut found = BTreeMap::new();
        let mut loaded = HashMap::new();
        let mut ancestors = vec![TOP_LEVEL_ROLE.to_string()];

        collect_listings(TOP_LEVEL_ROLE, &self.top, None, 0, query, &mut found)?;
        self.descend(&self.top, query, &mut ancestors, &mut loaded, &mut found)?;
        Ok(found)
    }

    /// Follow in-scope delegations of `role` depth first
    ///
    /// `ancestors` is the chain of roles leading to `role`; a delegation back
    /// into that chain is a cycle. A role reachable through several parents is
    /// visited once per path so each path scores its listings.
    fn descend(
        &self,
        role: &TargetsRole,
        query: &Query<'_>,
        ancestors: &mut Vec<String>,
        loaded: &mut HashMap<String, TargetsRole>,
        found: &mut BTreeMap<String, Candidate>,
    ) -> Result<()> {
        let depth = ancestors.len();
        for delegation in role.delegated_roles() {
            if !delegation.paths.iter().any(|p| (query.in_scope)(p)) {
                continue;
            }

            if ancestors.contains(&delegation.name) {
                warn!(role = %delegation.name, "delegation cycle skipped");
            } else {
                let doc = self.delegated_role(&delegation.name, loaded)?;
                debug!(role = %delegation.name, depth, "following delegation");

                collect_listings(&delegation.name, &doc, Some(delegation), depth, query, found)?;
                ancestors.push(delegation.name.clone());
                let result = self.descend(&doc, query, ancestors, loaded, found);
                ancestors.pop();
                result?;
            }

            if query.honor_terminating && delegation.terminating {
                break;
            }
        }
        Ok(())
    }

    fn delegated_role(
        &self,
        name: &str,
        loaded: &mut HashMap<String, TargetsRole>,
    ) -> Result<TargetsRole> {
        if let Some(role) = loaded.get(name) {
            return Ok(role.clone());
        }
        let role = self
            .source
            .delegated(name)?
            .ok_or_else(|| Error::UntrustedMetadata {
                role: name.to_string(),
                reason: "delegated role document is not available".into(),
            })?;
        loaded.insert(name.to_string(), role.clone());
        Ok(role)
    }
}

/// Record the accepted listings of `role`
///
/// A delegated listing is scored by the most specific of the delegation's
/// patterns that matches the listed identifier.
fn collect_listings(
    role_name: &str,
    role: &TargetsRole,
    delegation: Option<&DelegatedRole>,
    depth: usize,
    query: &Query<'_>,
    found: &mut BTreeMap<String, Candidate>,
) -> Result<()> {
    for (name, desc) in &role.targets {
        let specificity = match delegation {
            None => Specificity::TOP_LEVEL,
            Some(delegation) => {
                let best = delegation
                    .paths
                    .iter()
                    .filter(|p| p.matches(name))
                    .map(PathPattern::specificity)
                    .max();
                let Some((literal_segments, literal_chars)) = best else {
                    warn!(
                        role = %role_name,
                        target_name = %name,
                        "target outside delegated paths ignored"
                    );
                    continue;
                };
                Specificity {
                    literal_segments,
                    depth,
                    literal_chars,
                }
            }
        };

        let record = TargetRecord::from_description(role_name, name, desc)?;
        if !(query.accept)(&record) {
            continue;
        }

        match found.get(name) {
            Some(existing) if existing.specificity >= specificity => {
                debug!(
                    target_name = %name,
                    kept = %existing.role,
                    ignored = %role_name,
                    "less specific listing ignored"
                );
            }
            _ => {
                found.insert(
                    name.clone(),
                    Candidate {
                        role: role_name.to_string(),
                        specificity,
                        record,
                    },
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::sha256_hex;
    use serde_json::json;
    use std::cell::RefCell;

    struct MapSource {
        top: Option<TargetsRole>,
        roles: HashMap<String, TargetsRole>,
        loaded: RefCell<Vec<String>>,
    }

    impl RoleSource for MapSource {
        fn top_level(&self) -> Result<Option<TargetsRole>> {
            Ok(self.top.clone())
        }

        fn delegated(&self, name: &str) -> Result<Option<TargetsRole>> {
            self.loaded.borrow_mut().push(name.to_string());
            Ok(self.roles.get(name).cloned())
        }
    }

    fn target(content: &str, usage: &str, status: &str) -> serde_json::Value {
        json!({
            "length": content.len(),
            "hashes": { "sha256": sha256_hex(content.as_bytes()) },
            "custom": { "sigstore": { "usage": usage, "status": status } }
        })
    }

    fn role(targets: serde_json::Value, delegations: serde_json::Value) -> TargetsRole {
        serde_json::from_value(json!({
            "version": 1,
            "expires": "2099-01-01T00:00:00Z",
            "targets": targets,
            "delegations": { "keys": {}, "roles": delegations }
        }))
        .unwrap()
    }

    fn source() -> MapSource {
        let top = role(
            json!({}),
            json!([
                { "name": "ca-all", "paths": ["signing-ca/**/*"], "terminating": false },
                { "name": "ca-prod", "paths": ["signing-ca/prod/*"], "terminating": false },
                { "name": "tlog", "paths": ["transparency-log/**/*"], "terminating": false }
            ]),
        );
        let ca_all = role(
            json!({
                "signing-ca/prod/fulcio.crt.pem": target("broad", "Fulcio", "Active"),
                "signing-ca/legacy/fulcio.crt.pem": target("legacy", "Fulcio", "Expired"),
                "signing-ca/staging/fulcio.crt.pem": target("staging", "Fulcio", "Active")
            }),
            json!([]),
        );
        let ca_prod = role(
            json!({
                "signing-ca/prod/fulcio.crt.pem": target("narrow", "Fulcio", "Active"),
                "signing-ca/prod/intermediate.crt.pem": target("inter", "Fulcio", "Active")
            }),
            json!([]),
        );
        let tlog = role(
            json!({ "transparency-log/rekor.pub": target("rekor", "Rekor", "Active") }),
            json!([]),
        );
        MapSource {
            top: Some(top),
            roles: HashMap::from([
                ("ca-all".to_string(), ca_all),
                ("ca-prod".to_string(), ca_prod),
                ("tlog".to_string(), tlog),
            ]),
            loaded: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_most_specific_delegation_wins() {
        let source = source();
        let graph = DelegationGraph::load(&source).unwrap().unwrap();
        let records = graph.resolve_usage("signing-ca").unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "signing-ca/prod/fulcio.crt.pem",
                "signing-ca/prod/intermediate.crt.pem",
                "signing-ca/staging/fulcio.crt.pem",
            ]
        );
        assert_eq!(records[0].sha256, sha256_hex(b"narrow"));
    }

    #[test]
    fn test_unrelated_delegations_are_not_loaded() {
        let source = source();
        let graph = DelegationGraph::load(&source).unwrap().unwrap();
        graph.resolve_usage("transparency-log").unwrap();
        assert_eq!(*source.loaded.borrow(), ["tlog"]);
    }

    #[test]
    fn test_unknown_usage_is_empty() {
        let source = source();
        let graph = DelegationGraph::load(&source).unwrap().unwrap();
        assert!(graph.resolve_usage("bogus").unwrap().is_empty());
        assert!(graph.resolve_usage("ct-log").unwrap().is_empty());
        assert!(source.loaded.borrow().is_empty());
    }

    #[test]
    fn test_find_target_respects_terminating() {
        let top = role(
            json!({}),
            json!([
                { "name": "first", "paths": ["keys/*"], "terminating": true },
                { "name": "second", "paths": ["keys/**"], "terminating": false }
            ]),
        );
        let first = role(json!({}), json!([]));
        let second = role(
            json!({ "keys/a.pub": target("a", "Rekor", "Active") }),
            json!([]),
        );
        let source = MapSource {
            top: Some(top),
            roles: HashMap::from([("first".to_string(), first), ("second".to_string(), second)]),
            loaded: RefCell::new(Vec::new()),
        };
        let graph = DelegationGraph::load(&source).unwrap().unwrap();
        assert!(graph.find_target("keys/a.pub").unwrap().is_none());
        assert_eq!(*source.loaded.borrow(), ["first"]);
    }

    #[test]
    fn test_find_target_in_top_level() {
        let top = role(
            json!({ "rekor.pub": target("rekor", "Rekor", "Active") }),
            json!([]),
        );
        let source = MapSource {
            top: Some(top),
            roles: HashMap::new(),
            loaded: RefCell::new(Vec::new()),
        };
        let graph = DelegationGraph::load(&source).unwrap().unwrap();
        let record = graph.find_target("rekor.pub").unwrap().unwrap();
        assert_eq!(record.sha256, sha256_hex(b"rekor"));
        assert!(graph.find_target("missing.pub").unwrap().is_none());
    }

    #[test]
    fn test_targets_outside_delegated_paths_are_ignored() {
        let top = role(
            json!({}),
            json!([{ "name": "ca", "paths": ["signing-ca/**/*"], "terminating": false }]),
        );
        let ca = role(
            json!({ "transparency-log/rekor.pub": target("rekor", "Fulcio", "Active") }),
            json!([]),
        );
        let source = MapSource {
            top: Some(top),
            roles: HashMap::from([("ca".to_string(), ca)]),
            loaded: RefCell::new(Vec::new()),
        };
        let graph = DelegationGraph::load(&source).unwrap().unwrap();
        assert!(graph.resolve_usage("signing-ca").unwrap().is_empty());
    }

    #[test]
    fn test_missing_delegated_document_is_untrusted() {
        let top = role(
            json!({}),
            json!([{ "name": "ca", "paths": ["signing-ca/**/*"], "terminating": false }]),
        );
        let source = MapSource {
            top: Some(top),
            roles: HashMap::new(),
            loaded: RefCell::new(Vec::new()),
        };
        let graph = DelegationGraph::load(&source).unwrap().unwrap();
        let err = graph.resolve_usage("signing-ca").unwrap_err();
        assert!(matches!(err, Error::UntrustedMetadata { ref role, .. } if role == "ca"));
    }

    #[test]
    fn test_delegation_cycle_terminates() {
        let top = role(
            json!({}),
            json!([{ "name": "a", "paths": ["signing-ca/**/*"], "terminating": false }]),
        );
        let a = role(
            json!({ "signing-ca/x.pem": target("x", "Fulcio", "Active") }),
            json!([{ "name": "a", "paths": ["signing-ca/**/*"], "terminating": false }]),
        );
        let source = MapSource {
            top: Some(top),
            roles: HashMap::from([("a".to_string(), a)]),
            loaded: RefCell::new(Vec::new()),
        };
        let graph = DelegationGraph::load(&source).unwrap().unwrap();
        assert_eq!(graph.resolve_usage("signing-ca").unwrap().len(), 1);
    }

    #[test]
    fn test_specificity_uses_the_matching_pattern() {
        let top = role(
            json!({}),
            json!([
                { "name": "broad", "paths": ["signing-ca/**/*", "signing-ca/x/y/*"], "terminating": false },
                { "name": "prod", "paths": ["signing-ca/prod/*"], "terminating": false }
            ]),
        );
        let broad = role(
            json!({ "signing-ca/prod/a.pem": target("broad", "Fulcio", "Active") }),
            json!([]),
        );
        let prod = role(
            json!({ "signing-ca/prod/a.pem": target("prod", "Fulcio", "Active") }),
            json!([]),
        );
        let source = MapSource {
            top: Some(top),
            roles: HashMap::from([("broad".to_string(), broad), ("prod".to_string(), prod)]),
            loaded: RefCell::new(Vec::new()),
        };
        let graph = DelegationGraph::load(&source).unwrap().unwrap();

        let records = graph.resolve_usage("signing-ca").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sha256, sha256_hex(b"prod"));
        let found = graph.find_target("signing-ca/prod/a.pem").unwrap().unwrap();
        assert_eq!(found.sha256, sha256_hex(b"prod"));
    }

    #[test]
    fn test_shared_role_scored_through_each_parent() {
        let top = role(
            json!({}),
            json!([
                { "name": "ca-all", "paths": ["signing-ca/**/*"], "terminating": false },
                { "name": "ca-prod", "paths": ["signing-ca/prod/*"], "terminating": false }
            ]),
        );
        let ca_all = role(
            json!({}),
            json!([{ "name": "shared", "paths": ["signing-ca/**/*"], "terminating": false }]),
        );
        let ca_prod = role(
            json!({ "signing-ca/prod/a.pem": target("ca-prod", "Fulcio", "Active") }),
            json!([{ "name": "shared", "paths": ["signing-ca/prod/*"], "terminating": false }]),
        );
        let shared = role(
            json!({ "signing-ca/prod/a.pem": target("shared", "Fulcio", "Active") }),
            json!([]),
        );
        let source = MapSource {
            top: Some(top),
            roles: HashMap::from([
                ("ca-all".to_string(), ca_all),
                ("ca-prod".to_string(), ca_prod),
                ("shared".to_string(), shared),
            ]),
            loaded: RefCell::new(Vec::new()),
        };
        let graph = DelegationGraph::load(&source).unwrap().unwrap();

        let records = graph.resolve_usage("signing-ca").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sha256, sha256_hex(b"shared"));
        assert_eq!(*source.loaded.borrow(), ["ca-all", "shared", "ca-prod"]);
    }

    #[test]
    fn test_no_top_level_role() {
        let source = MapSource {
            top: None,
            roles: HashMap::new(),
            loaded: RefCell::new(Vec::new()),
        };
        assert!(DelegationGraph::load(&source).unwrap().is_none());
    }
}

//! Attribute rewrites applied to every blob before it reaches the sink.
//!
//! A [`Transformations`] table is an ordered list of [`Rule`]s, loaded from
//! configuration. Each rule optionally restricts itself to some event kinds
//! and to payloads carrying a given attribute, then applies one [`Rewrite`].
//! Rules are pure functions of `(kind, data)` and run in configuration order.
//!
//! ```yaml
//! transformations:
//!   - name: strip-heads
//!     kinds: [pull_request]
//!     op: drop
//!     path: pull_request.head
//!   - op: rename
//!     from: sender.login
//!     to: author
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::blob::{self, EventKind};

/// A single attribute rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Rewrite {
    /// Remove an attribute.
    Drop { path: String },
    /// Move an attribute to another path.
    Rename { from: String, to: String },
    /// Duplicate an attribute to another path.
    Copy { from: String, to: String },
    /// Set an attribute to a constant.
    Set { path: String, value: Value },
    /// Retain only the listed attributes. Paths indexing into arrays are
    /// ignored.
    Keep { paths: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub name: Option<String>,
    /// Event kinds the rule applies to. Empty means every kind.
    #[serde(default)]
    pub kinds: Vec<EventKind>,
    /// Only apply when this attribute is present.
    #[serde(default)]
    pub when: Option<String>,
    #[serde(flatten)]
    pub rewrite: Rewrite,
}

impl Rule {
    pub fn new(rewrite: Rewrite) -> Self {
        Rule {
            name: None,
            kinds: Vec::new(),
            when: None,
            rewrite,
        }
    }

    pub fn for_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn when(mut self, path: impl Into<String>) -> Self {
        self.when = Some(path.into());
        self
    }

    pub fn matches(&self, kind: &EventKind, data: &Value) -> bool {
        let kind_matches = self.kinds.is_empty() || self.kinds.contains(kind);
        let predicate_matches = match &self.when {
            Some(path) => blob::resolve(data, path).is_some(),
            None => true,
        };
        kind_matches && predicate_matches
    }

    /// Apply the rule. Data the rule does not match is returned untouched,
    /// as is data whose shape conflicts with the rewrite.
    pub fn apply(&self, kind: &EventKind, mut data: Value) -> Value {
        if !self.matches(kind, &data) {
            return data;
        }
        let outcome = match &self.rewrite {
            Rewrite::Drop { path } => {
                blob::remove(&mut data, path);
                Ok(())
            }
            // Rewritten on a copy: a failed insert must not lose `from`.
            Rewrite::Rename { from, to } => {
                let mut renamed = data.clone();
                match blob::remove(&mut renamed, from) {
                    Some(value) => blob::insert(&mut renamed, to, value).map(|()| data = renamed),
                    None => Ok(()),
                }
            }
            Rewrite::Copy { from, to } => match blob::resolve(&data, from).cloned() {
                Some(value) => blob::insert(&mut data, to, value),
                None => Ok(()),
            },
            Rewrite::Set { path, value } => blob::insert(&mut data, path, value.clone()),
            Rewrite::Keep { paths } => {
                let mut kept = Value::Object(Map::new());
                for path in paths {
                    if crosses_array(&data, path) {
                        debug!(rule = ?self.name, path = %path, "Keep paths cannot index into arrays, ignoring");
                        continue;
                    }
                    if let Some(value) = blob::resolve(&data, path) {
                        // Only objects lie along the path, so the fresh tree cannot conflict.
                        let _ = blob::insert(&mut kept, path, value.clone());
                    }
                }
                data = kept;
                Ok(())
            }
        };
        if let Err(e) = outcome {
            debug!(rule = ?self.name, kind = %kind, error = %e, "Transformation left payload unchanged");
        }
        data
    }
}

/// Whether `path` descends into an array of `data`. Such paths resolve but
/// cannot be rebuilt, since `insert` only creates objects.
fn crosses_array(data: &Value, path: &str) -> bool {
    let mut current = data;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return false,
            },
            Value::Array(_) => return true,
            _ => return false,
        }
    }
    false
}

/// Ordered list of rules applied to every indexed blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transformations {
    rules: Vec<Rule>,
}

impl Transformations {
    pub fn new(rules: Vec<Rule>) -> Self {
        Transformations { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, kind: &EventKind, data: Value) -> Value {
        self.rules
            .iter()
            .fold(data, |data, rule| rule.apply(kind, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rules_run_in_configuration_order() {
        let table = Transformations::new(vec![
            Rule::new(Rewrite::Rename {
                from: "sender.login".into(),
                to: "author".into(),
            }),
            Rule::new(Rewrite::Set {
                path: "author".into(),
                value: json!("overridden"),
            }),
        ]);
        let out = table.apply(&EventKind::Issue, json!({"sender": {"login": "octocat"}}));
        assert_eq!(out, json!({"sender": {}, "author": "overridden"}));
    }

    #[test]
    fn rename_into_a_conflicting_shape_keeps_the_source() {
        let rule = Rule::new(Rewrite::Rename {
            from: "sender.login".into(),
            to: "title.author".into(),
        });
        let data = json!({"title": "x", "sender": {"login": "octocat"}});
        assert_eq!(rule.apply(&EventKind::Issue, data.clone()), data);
    }

    #[test]
    fn rename_moves_nested_attribute() {
        let rule = Rule::new(Rewrite::Rename {
            from: "sender.login".into(),
            to: "author.login".into(),
        });
        let out = rule.apply(&EventKind::Issue, json!({"sender": {"login": "octocat", "id": 1}}));
        assert_eq!(out, json!({"sender": {"id": 1}, "author": {"login": "octocat"}}));
    }

    #[test]
    fn kind_and_predicate_restrict_a_rule() {
        let rule = Rule::new(Rewrite::Drop {
            path: "pull_request.head".into(),
        })
        .for_kinds([EventKind::PullRequest])
        .when("pull_request.merged");

        let data = json!({"pull_request": {"head": "sha", "merged": true}});
        assert_eq!(rule.apply(&EventKind::Issue, data.clone()), data);
        assert_eq!(
            rule.apply(&EventKind::PullRequest, data),
            json!({"pull_request": {"merged": true}})
        );

        let unmerged = json!({"pull_request": {"head": "sha"}});
        assert_eq!(rule.apply(&EventKind::PullRequest, unmerged.clone()), unmerged);
    }

    #[test]
    fn keep_retains_nested_paths() {
        let rule = Rule::new(Rewrite::Keep {
            paths: vec!["number".into(), "pull_request.labels".into(), "absent".into()],
        });
        let out = rule.apply(
            &EventKind::PullRequest,
            json!({"number": 1, "action": "opened", "pull_request": {"labels": [], "body": "x"}}),
        );
        assert_eq!(out, json!({"number": 1, "pull_request": {"labels": []}}));
    }

    #[test]
    fn keep_ignores_paths_into_arrays() {
        let rule = Rule::new(Rewrite::Keep {
            paths: vec!["number".into(), "pull_request.labels.0".into()],
        });
        let out = rule.apply(
            &EventKind::PullRequest,
            json!({"number": 1, "pull_request": {"labels": [{"name": "bug"}]}}),
        );
        assert_eq!(out, json!({"number": 1}));
    }

    #[test]
    fn rules_deserialize_from_yaml_shape() {
        let rules: Vec<Rule> = serde_json::from_value(json!([
            {"name": "strip", "kinds": ["pull_request"], "op": "drop", "path": "pull_request.head"},
            {"op": "copy", "from": "a", "to": "b"}
        ]))
        .unwrap();
        assert_eq!(rules[0].kinds, vec![EventKind::PullRequest]);
        assert!(matches!(rules[1].rewrite, Rewrite::Copy { .. }));
    }
}

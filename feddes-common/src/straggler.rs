//! Straggler rule parsing.
//!
//! A straggler rule slows down one or more clients by a positive cost
//! multiplier. Rules are composed into a `client id -> multiplier` map; when
//! several rules match the same client their effects multiply, independent of
//! rule order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single straggler rule.
///
/// Each rule defines an `effect` (a positive multiplier) and exactly one
/// selector: a single `client`, a list of `clients`, or an inclusive `range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StragglerRule {
    /// Cost multiplier applied to every targeted client. Must be positive.
    pub effect: f64,
    /// Single client selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<i64>,
    /// Explicit client list selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<i64>>,
    /// Inclusive range selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeSpec>,
}

/// Inclusive client id range, accepted either as a two-element array
/// `[start, end]` or as an object `{start, end}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    /// `[start, end]` form.
    Pair([i64; 2]),
    /// `{"start": .., "end": ..}` form.
    Bounds {
        /// First targeted client id.
        start: i64,
        /// Last targeted client id (inclusive).
        end: i64,
    },
}

impl RangeSpec {
    fn bounds(&self) -> (i64, i64) {
        match *self {
            RangeSpec::Pair([start, end]) => (start, end),
            RangeSpec::Bounds { start, end } => (start, end),
        }
    }
}

impl StragglerRule {
    /// Convenience constructor for a single-client rule.
    pub fn single(client: i64, effect: f64) -> Self {
        Self {
            effect,
            client: Some(client),
            clients: None,
            range: None,
        }
    }

    /// Convenience constructor for a client-list rule.
    pub fn list(clients: Vec<i64>, effect: f64) -> Self {
        Self {
            effect,
            client: None,
            clients: Some(clients),
            range: None,
        }
    }

    /// Convenience constructor for an inclusive-range rule.
    pub fn range(start: i64, end: i64, effect: f64) -> Self {
        Self {
            effect,
            client: None,
            clients: None,
            range: Some(RangeSpec::Pair([start, end])),
        }
    }

    /// Resolves this rule to the list of targeted client ids.
    fn targets(&self, rule_index: usize, total_clients: usize) -> Result<Vec<usize>> {
        let selectors = usize::from(self.client.is_some())
            + usize::from(self.clients.is_some())
            + usize::from(self.range.is_some());
        if selectors != 1 {
            return Err(Error::Config(format!(
                "straggler rule {rule_index} must define exactly one of \
                 \"client\", \"clients\" or \"range\" (found {selectors})"
            )));
        }

        let check = |id: i64| -> Result<usize> {
            if id < 0 || id as usize >= total_clients {
                return Err(Error::Config(format!(
                    "straggler rule {rule_index} targets invalid client {id} \
                     (valid range: 0-{})",
                    total_clients.saturating_sub(1)
                )));
            }
            Ok(id as usize)
        };

        let targets = if let Some(client) = self.client {
            vec![check(client)?]
        } else if let Some(clients) = &self.clients {
            clients.iter().map(|&c| check(c)).collect::<Result<_>>()?
        } else if let Some(range) = &self.range {
            let (start, end) = range.bounds();
            if start > end {
                return Err(Error::Config(format!(
                    "straggler rule {rule_index} range start {start} exceeds end {end}"
                )));
            }
            (start..=end).map(check).collect::<Result<_>>()?
        } else {
            Vec::new()
        };

        if targets.is_empty() {
            return Err(Error::Config(format!(
                "straggler rule {rule_index} must target at least one client"
            )));
        }
        Ok(targets)
    }
}

/// Builds the `client id -> multiplier` map from a rule list.
///
/// Effects of rules matching the same client compose multiplicatively.
pub fn client_effects(
    rules: &[StragglerRule],
    total_clients: usize,
) -> Result<BTreeMap<usize, f64>> {
    let mut effects = BTreeMap::new();
    for (index, rule) in rules.iter().enumerate() {
        if !(rule.effect > 0.0) {
            return Err(Error::Config(format!(
                "straggler rule {index} effect must be positive (got {})",
                rule.effect
            )));
        }
        for client in rule.targets(index, total_clients)? {
            *effects.entry(client).or_insert(1.0) *= rule.effect;
        }
    }
    Ok(effects)
}

/// Looks up the multiplier for a client, defaulting to 1.0.
pub fn effect_for(effects: &BTreeMap<usize, f64>, client: usize) -> f64 {
    effects.get(&client).copied().unwrap_or(1.0)
}

//! Rule groups evaluated one after the other.
//!
//! A [`Stratification`] is an ordered list of rule groups. Each group is run
//! to its own fixpoint before the next one starts, so a group may only read
//! derived predicates produced by itself or by earlier groups.

use indexmap::{IndexMap, IndexSet};

use crate::error::{ReasonerError, Result};
use crate::model::{PredId, Rule, RuleId};
use crate::program::Program;

/// Ordered rule groups
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stratification {
    strata: Vec<Vec<RuleId>>,
}

impl Stratification {
    /// Precomputed groups, in evaluation order
    #[must_use]
    pub fn new(strata: Vec<Vec<RuleId>>) -> Self {
        Self { strata }
    }

    /// Every rule in one group
    #[must_use]
    pub fn single(rules: &[Rule]) -> Self {
        if rules.is_empty() {
            return Self::default();
        }
        Self::new(vec![rules.iter().map(Rule::id).collect()])
    }

    /// Groups derived from the program's predicate dependencies
    ///
    /// # Errors
    ///
    /// Same as [`Stratification::from_rules`].
    pub fn compute(program: &Program) -> Result<Self> {
        Self::from_rules(program.rules())
    }

    /// One group per strongly connected component of the graph linking
    /// each body predicate to the head predicates of its rules, dependencies
    /// first. Head predicates of one rule always share a group.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::Stratification`] if the result fails
    /// [`Stratification::validate`].
    pub fn from_rules(rules: &[Rule]) -> Result<Self> {
        let mut graph: IndexMap<PredId, IndexSet<PredId>> = IndexMap::new();
        for rule in rules {
            for head in rule.heads() {
                graph.entry(head.pred_id()).or_default();
            }
        }
        for rule in rules {
            let heads: Vec<PredId> = rule.heads().iter().map(|h| h.pred_id()).collect();
            for body in rule.body().iter().filter(|b| !b.is_edb()) {
                let Some(edges) = graph.get_mut(&body.pred_id()) else {
                    continue;
                };
                edges.extend(heads.iter().copied());
            }
            for &a in &heads {
                if let Some(edges) = graph.get_mut(&a) {
                    edges.extend(heads.iter().copied().filter(|b| *b != a));
                }
            }
        }

        let mut components = Tarjan::new(&graph).run();
        // Tarjan emits a component after everything reachable from it, that
        // is after the predicates depending on it.
        components.reverse();
        let component_of: IndexMap<PredId, usize> = components
            .iter()
            .enumerate()
            .flat_map(|(i, c)| c.iter().map(move |p| (*p, i)))
            .collect();

        let mut strata = vec![Vec::new(); components.len()];
        for rule in rules {
            let Some(group) = rule
                .heads()
                .first()
                .and_then(|h| component_of.get(&h.pred_id()))
            else {
                continue;
            };
            strata[*group].push(rule.id());
        }
        strata.retain(|s| !s.is_empty());
        let stratification = Self::new(strata);
        stratification.validate(rules)?;
        log::debug!(
            "Computed {} strata for {} rules",
            stratification.len(),
            rules.len()
        );
        Ok(stratification)
    }

    /// Checks that every rule appears exactly once and that no group reads
    /// a derived predicate defined by a later group.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::Stratification`] describing the first problem.
    pub fn validate(&self, rules: &[Rule]) -> Result<()> {
        let fail = |message: String| Err(ReasonerError::Stratification(message));
        let mut seen = vec![false; rules.len()];
        for &id in self.strata.iter().flatten() {
            match seen.get_mut(id) {
                None => return fail(format!("unknown rule {id}")),
                Some(true) => return fail(format!("rule {id} appears twice")),
                Some(flag) => *flag = true,
            }
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return fail(format!("rule {missing} is not in any stratum"));
        }
        let mut last_definition: IndexMap<PredId, usize> = IndexMap::new();
        for (stratum, ids) in self.strata.iter().enumerate() {
            for &id in ids {
                for head in rules[id].heads() {
                    last_definition.insert(head.pred_id(), stratum);
                }
            }
        }
        for (stratum, ids) in self.strata.iter().enumerate() {
            for &id in ids {
                for body in rules[id].body().iter().filter(|b| !b.is_edb()) {
                    if let Some(&defined) = last_definition.get(&body.pred_id()) {
                        if defined > stratum {
                            return fail(format!(
                                "rule {id} in stratum {stratum} reads p{} defined in stratum {defined}",
                                body.pred_id()
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Groups in evaluation order
    #[must_use]
    pub fn strata(&self) -> &[Vec<RuleId>] {
        &self.strata
    }

    /// Number of groups
    #[must_use]
    pub fn len(&self) -> usize {
        self.strata.len()
    }

    /// Whether there are no groups
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strata.is_empty()
    }

    /// Group holding `rule`
    #[must_use]
    pub fn stratum_of(&self, rule: RuleId) -> Option<usize> {
        self.strata.iter().position(|s| s.contains(&rule))
    }
}

struct Tarjan<'g> {
    graph: &'g IndexMap<PredId, IndexSet<PredId>>,
    index: IndexMap<PredId, (usize, usize)>,
    stack: Vec<PredId>,
    on_stack: IndexSet<PredId>,
    components: Vec<Vec<PredId>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g IndexMap<PredId, IndexSet<PredId>>) -> Self {
        Self {
            graph,
            index: IndexMap::new(),
            stack: Vec::new(),
            on_stack: IndexSet::new(),
            components: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<PredId>> {
        let graph = self.graph;
        for &node in graph.keys() {
            if !self.index.contains_key(&node) {
                self.visit(node);
            }
        }
        self.components
    }

    fn visit(&mut self, node: PredId) {
        let order = self.index.len();
        self.index.insert(node, (order, order));
        self.stack.push(node);
        self.on_stack.insert(node);
        let graph = self.graph;
        for &next in graph.get(&node).into_iter().flatten() {
            if !self.index.contains_key(&next) {
                self.visit(next);
                let low = self.index[&next].1;
                let entry = &mut self.index[&node];
                entry.1 = entry.1.min(low);
            } else if self.on_stack.contains(&next) {
                let idx = self.index[&next].0;
                let entry = &mut self.index[&node];
                entry.1 = entry.1.min(idx);
            }
        }
        let (idx, low) = self.index[&node];
        if idx == low {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.swap_remove(&member);
                component.push(member);
                if member == node {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}

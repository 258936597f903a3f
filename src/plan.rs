//! Per-rule execution plans.
//!
//! A rule with `k` IDB body literals compiles into `k` plans, one per *pivot*.
//! The pivot reads only the facts derived since the rule last fired, IDB
//! literals before it in the body read only older facts and the ones after it
//! read everything, so every new combination is produced by exactly one plan.
//!
//! Each plan is a left-deep sequence of join steps. The intermediate result
//! after a step keeps one column per variable that a later step or the head
//! still needs; the last step writes the rule's frontier variables in
//! ascending id order, which is the row layout the head projection consumes.

use smallvec::SmallVec;

use crate::error::{ReasonerError, Result};
use crate::filter::{Operand, SelfFilter};
use crate::model::{Literal, Rule, RuleId, Term, VarId};
use crate::table::IterationRange;

/// Which facts of a body literal a plan reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    /// Every fact
    Full,
    /// Facts derived before the rule last fired
    Old,
    /// Facts derived since the rule last fired
    Delta,
}

impl RangeKind {
    /// Iteration interval given the iteration the rule last fired at
    #[must_use]
    pub fn resolve(self, last_execution: usize) -> IterationRange {
        match self {
            RangeKind::Full => IterationRange::ALL,
            RangeKind::Old => IterationRange::before(last_execution),
            RangeKind::Delta => IterationRange::since(last_execution),
        }
    }
}

/// One literal of a plan and how it combines with the result so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// Position of the literal in the rule body
    pub body_index: usize,
    /// The literal
    pub literal: Literal,
    /// Facts read
    pub range: RangeKind,
    /// `(left column, literal column)` pairs that must agree
    pub coordinates: Vec<(usize, usize)>,
    /// `(output column, left column)` carry-forward entries
    pub from_left: Vec<(usize, usize)>,
    /// `(output column, literal column)` entries
    pub from_right: Vec<(usize, usize)>,
    /// Variable held by each output column
    pub output_vars: Vec<VarId>,
}

impl PlanStep {
    /// Number of output columns
    #[must_use]
    pub fn output_width(&self) -> usize {
        self.output_vars.len()
    }

    /// Whether the step joins without any shared variable
    #[must_use]
    pub fn is_cartesian(&self) -> bool {
        self.coordinates.is_empty()
    }
}

/// Compiled evaluation order of a rule for one pivot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleExecutionPlan {
    rule: RuleId,
    pivot: Option<usize>,
    heads: Vec<Literal>,
    frontier: Vec<VarId>,
    steps: Vec<PlanStep>,
    self_filter: Option<SelfFilter>,
}

impl RuleExecutionPlan {
    /// One plan per IDB body literal, in body order; a rule reading only
    /// the fact store gets a single plan without pivot.
    ///
    /// A ground body literal shares no variable with anything, so it lands
    /// in a cartesian step against a zero-width side of zero or one row and
    /// acts as an existence check.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::MalformedPlan`] if a compiled plan breaks its
    /// invariants.
    pub fn compile(rule: &Rule) -> Result<Vec<RuleExecutionPlan>> {
        let pivots = rule.idb_body_positions();
        if pivots.is_empty() {
            return Ok(vec![Self::for_pivot(rule, None)?]);
        }
        pivots
            .into_iter()
            .map(|p| Self::for_pivot(rule, Some(p)))
            .collect()
    }

    /// Plan whose delta literal is the body literal at `pivot`
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::MalformedPlan`] if the plan breaks its invariants.
    pub fn for_pivot(rule: &Rule, pivot: Option<usize>) -> Result<RuleExecutionPlan> {
        let body = rule.body();
        let ranges: Vec<RangeKind> = body
            .iter()
            .enumerate()
            .map(|(i, l)| match pivot {
                _ if l.is_edb() => RangeKind::Full,
                Some(p) if i == p => RangeKind::Delta,
                Some(p) if i < p => RangeKind::Old,
                _ => RangeKind::Full,
            })
            .collect();
        let order = connected_order(body, pivot.unwrap_or(0));
        let literals: Vec<(usize, Literal, RangeKind)> = body
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, l)| (i, l, ranges[i]))
            .collect();
        Self::build(
            rule.id(),
            pivot,
            rule.heads().to_vec(),
            rule.frontier_vars(),
            &literals,
            &order,
        )
    }

    fn build(
        rule: RuleId,
        pivot: Option<usize>,
        heads: Vec<Literal>,
        frontier: Vec<VarId>,
        literals: &[(usize, Literal, RangeKind)],
        order: &[usize],
    ) -> Result<RuleExecutionPlan> {
        let find = |body_index: usize| {
            literals
                .iter()
                .find(|(i, _, _)| *i == body_index)
                .ok_or_else(|| {
                    ReasonerError::MalformedPlan(format!(
                        "rule {rule}: order names unknown body literal {body_index}"
                    ))
                })
        };
        let mut steps: Vec<PlanStep> = Vec::with_capacity(order.len());
        for (pos, &body_index) in order.iter().enumerate() {
            let (_, literal, range) = find(body_index)?;
            let is_last = pos + 1 == order.len();
            let mut needed: Vec<VarId> = frontier.clone();
            for &later in &order[pos + 1..] {
                needed.extend(find(later)?.1.vars());
            }
            let left: &[VarId] = steps.last().map_or(&[], |s| s.output_vars.as_slice());
            let coordinates: Vec<(usize, usize)> = left
                .iter()
                .enumerate()
                .filter_map(|(lc, v)| column_of(literal, *v).map(|rc| (lc, rc)))
                .collect();
            let output_vars: Vec<VarId> = if is_last {
                frontier.clone()
            } else {
                let mut vars: Vec<VarId> =
                    left.iter().copied().filter(|v| needed.contains(v)).collect();
                for v in literal.vars() {
                    if needed.contains(&v) && !vars.contains(&v) {
                        vars.push(v);
                    }
                }
                vars
            };
            let mut from_left = Vec::new();
            let mut from_right = Vec::new();
            for (slot, v) in output_vars.iter().enumerate() {
                if let Some(lc) = left.iter().position(|x| x == v) {
                    from_left.push((slot, lc));
                } else if let Some(rc) = column_of(literal, *v) {
                    from_right.push((slot, rc));
                } else {
                    return Err(ReasonerError::MalformedPlan(format!(
                        "rule {rule}: variable ?{v} is not bound when {literal} executes"
                    )));
                }
            }
            steps.push(PlanStep {
                body_index,
                literal: literal.clone(),
                range: *range,
                coordinates,
                from_left,
                from_right,
                output_vars,
            });
        }
        let self_filter = self_filter(&heads, &frontier, steps.last());
        let plan = RuleExecutionPlan {
            rule,
            pivot,
            heads,
            frontier,
            steps,
            self_filter,
        };
        plan.check_invariants()?;
        Ok(plan)
    }

    /// Same plan with the literals executed in `order` (body indices).
    /// The receiver is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::MalformedPlan`] unless `order` is a
    /// permutation of the plan's body indices.
    pub fn reorder(&self, order: &[usize]) -> Result<RuleExecutionPlan> {
        let mut current = self.order();
        let mut requested = order.to_vec();
        current.sort_unstable();
        requested.sort_unstable();
        if current != requested {
            return Err(ReasonerError::MalformedPlan(format!(
                "rule {}: {order:?} is not a permutation of the body",
                self.rule
            )));
        }
        let literals: Vec<(usize, Literal, RangeKind)> = self
            .steps
            .iter()
            .map(|s| (s.body_index, s.literal.clone(), s.range))
            .collect();
        Self::build(
            self.rule,
            self.pivot,
            self.heads.clone(),
            self.frontier.clone(),
            &literals,
            order,
        )
    }

    /// Execution order that puts small literals first while keeping each
    /// literal connected to the ones before it when possible.
    /// `cardinalities[i]` is the estimate for step `i` of the current order.
    #[must_use]
    pub fn order_by_cardinality(&self, cardinalities: &[usize]) -> Vec<usize> {
        let mut remaining: Vec<(usize, usize, &Literal)> = self
            .steps
            .iter()
            .zip(cardinalities)
            .map(|(s, &c)| (c, s.body_index, &s.literal))
            .collect();
        remaining.sort_by_key(|(c, i, _)| (*c, *i));
        let mut bound: Vec<VarId> = Vec::new();
        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .position(|(_, _, l)| !l.shared_vars(&bound).is_empty())
                .unwrap_or(0);
            let (_, index, literal) = remaining.remove(next);
            bound.extend(literal.vars());
            order.push(index);
        }
        order
    }

    /// Verifies that every variable a step or the head reads is bound by
    /// the time the step executes.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::MalformedPlan`] describing the first violation.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |message: String| {
            Err(ReasonerError::MalformedPlan(format!(
                "rule {}: {message}",
                self.rule
            )))
        };
        let mut left_width = 0;
        for (pos, step) in self.steps.iter().enumerate() {
            let right_width = step.literal.n_var_positions();
            if pos == 0 && !step.coordinates.is_empty() {
                return fail("first step cannot have join coordinates".to_string());
            }
            if step
                .coordinates
                .iter()
                .any(|&(l, r)| l >= left_width || r >= right_width)
            {
                return fail(format!("step {pos} joins on a column out of range"));
            }
            let mut filled = vec![false; step.output_width()];
            let slots = step
                .from_left
                .iter()
                .map(|&(s, c)| (s, c < left_width))
                .chain(step.from_right.iter().map(|&(s, c)| (s, c < right_width)));
            for (slot, in_range) in slots {
                if !in_range || slot >= filled.len() || filled[slot] {
                    return fail(format!("step {pos} fills output column {slot} badly"));
                }
                filled[slot] = true;
            }
            if filled.iter().any(|f| !f) {
                return fail(format!("step {pos} leaves an output column unbound"));
            }
            left_width = step.output_width();
        }
        match self.steps.last() {
            Some(last) if last.output_vars == self.frontier => Ok(()),
            Some(_) => fail("last step does not produce the frontier".to_string()),
            None => fail("plan has no steps".to_string()),
        }
    }

    /// Rule id
    #[must_use]
    pub fn rule(&self) -> RuleId {
        self.rule
    }

    /// Body index of the delta literal
    #[must_use]
    pub fn pivot(&self) -> Option<usize> {
        self.pivot
    }

    /// Head literals
    #[must_use]
    pub fn heads(&self) -> &[Literal] {
        &self.heads
    }

    /// Frontier variables, the layout of the last step's output
    #[must_use]
    pub fn frontier(&self) -> &[VarId] {
        &self.frontier
    }

    /// Join steps in execution order
    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Body indices in execution order
    #[must_use]
    pub fn order(&self) -> Vec<usize> {
        self.steps.iter().map(|s| s.body_index).collect()
    }

    /// Filter dropping head facts equal to the fact read by the last literal
    #[must_use]
    pub fn self_filter(&self) -> Option<&SelfFilter> {
        self.self_filter.as_ref()
    }
}

/// Result column of the first occurrence of `var` in `literal`
fn column_of(literal: &Literal, var: VarId) -> Option<usize> {
    literal.var_positions().position(|(_, v)| v == var)
}

/// Starting at `first`, repeatedly appends the first remaining literal that
/// shares a variable with those placed so far, EDB literals before IDB ones;
/// literals connected to nothing come last.
fn connected_order(body: &[Literal], first: usize) -> Vec<usize> {
    let mut order = vec![first];
    let mut bound: Vec<VarId> = body[first].vars().to_vec();
    let mut remaining: Vec<usize> = (0..body.len()).filter(|&i| i != first).collect();
    remaining.sort_by_key(|&i| (!body[i].is_edb(), i));
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|&i| !body[i].shared_vars(&bound).is_empty())
            .unwrap_or(0);
        let index = remaining.remove(next);
        bound.extend(body[index].vars());
        order.push(index);
    }
    order
}

fn self_filter(
    heads: &[Literal],
    frontier: &[VarId],
    last: Option<&PlanStep>,
) -> Option<SelfFilter> {
    let ([head], Some(last)) = (heads, last) else {
        return None;
    };
    if head.pred_id() != last.literal.pred_id() {
        return None;
    }
    let mut checks: SmallVec<[(Operand, Operand); 3]> = SmallVec::new();
    for (h, l) in head.terms().iter().zip(last.literal.terms()) {
        let produced = match h {
            Term::Constant(c) => Operand::Const(*c),
            Term::Variable(v) => Operand::Output(frontier.iter().position(|f| f == v)?),
        };
        let read = match l {
            Term::Constant(c) => Operand::Const(*c),
            Term::Variable(v) => Operand::Right(column_of(&last.literal, *v)?),
        };
        if let (Operand::Const(a), Operand::Const(b)) = (produced, read) {
            if a != b {
                return None;
            }
        }
        checks.push((produced, read));
    }
    Some(SelfFilter::new(checks.into_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Predicate, PredicateKind};
    use proptest::prelude::*;

    fn edb(id: u16) -> Predicate {
        Predicate::new(id, PredicateKind::Edb, 2).unwrap()
    }

    fn idb(id: u16) -> Predicate {
        Predicate::new(id, PredicateKind::Idb, 2).unwrap()
    }

    fn lit(p: Predicate, a: VarId, b: VarId) -> Literal {
        Literal::new(p, [Term::Variable(a), Term::Variable(b)]).unwrap()
    }

    /// `anc(X, Z) :- parent(X, Y), anc(Y, Z)`
    fn ancestor() -> Rule {
        Rule::new(1, vec![lit(idb(1), 0, 2)], vec![lit(edb(0), 0, 1), lit(idb(1), 1, 2)]).unwrap()
    }

    #[test]
    fn test_one_plan_per_idb_literal() {
        let plans = RuleExecutionPlan::compile(&ancestor()).unwrap();
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.pivot(), Some(1));
        assert_eq!(plan.order(), vec![1, 0], "The pivot literal must come first");
        assert_eq!(plan.steps()[0].range, RangeKind::Delta);
        assert_eq!(plan.steps()[1].range, RangeKind::Full);
    }

    #[test]
    fn test_join_coordinates_and_carry_forward() {
        let plan = &RuleExecutionPlan::compile(&ancestor()).unwrap()[0];
        let first = &plan.steps()[0];
        assert_eq!(first.output_vars, vec![1, 2], "anc(Y, Z) keeps Y for the join and Z for the head");
        let second = &plan.steps()[1];
        assert_eq!(second.coordinates, vec![(0, 1)], "Y is column 0 on the left and column 1 of parent(X, Y)");
        assert_eq!(second.output_vars, vec![0, 2]);
        assert_eq!(second.from_right, vec![(0, 0)]);
        assert_eq!(second.from_left, vec![(1, 1)]);
    }

    #[test]
    fn test_ranges_split_old_delta_full() {
        // p(X, Z) :- p(X, Y), e(Y, W), p(W, Z)
        let rule = Rule::new(
            0,
            vec![lit(idb(1), 0, 3)],
            vec![lit(idb(1), 0, 1), lit(edb(0), 1, 2), lit(idb(1), 2, 3)],
        )
        .unwrap();
        let plans = RuleExecutionPlan::compile(&rule).unwrap();
        assert_eq!(plans.len(), 2);
        let range_of = |plan: &RuleExecutionPlan, body: usize| {
            plan.steps().iter().find(|s| s.body_index == body).unwrap().range
        };
        assert_eq!(range_of(&plans[0], 0), RangeKind::Delta);
        assert_eq!(range_of(&plans[0], 2), RangeKind::Full);
        assert_eq!(range_of(&plans[1], 0), RangeKind::Old);
        assert_eq!(range_of(&plans[1], 2), RangeKind::Delta);
        assert_eq!(range_of(&plans[1], 1), RangeKind::Full);
        assert_eq!(plans[1].order(), vec![2, 1, 0]);
    }

    #[test]
    fn test_edb_only_rule_has_single_unpivoted_plan() {
        let rule = Rule::new(0, vec![lit(idb(1), 0, 1)], vec![lit(edb(0), 0, 1)]).unwrap();
        let plans = RuleExecutionPlan::compile(&rule).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].pivot(), None);
        assert_eq!(plans[0].steps()[0].range, RangeKind::Full);
    }

    #[test]
    fn test_disconnected_literals_are_deferred() {
        // h(X, Z) :- a(X, Y), c(Z, W), b(Y, Q)
        let rule = Rule::new(
            0,
            vec![lit(idb(9), 0, 3)],
            vec![lit(edb(1), 0, 1), lit(edb(2), 3, 4), lit(edb(3), 1, 5)],
        )
        .unwrap();
        let plan = &RuleExecutionPlan::compile(&rule).unwrap()[0];
        assert_eq!(plan.order(), vec![0, 2, 1]);
        assert!(plan.steps()[2].is_cartesian());
        assert!(plan.check_invariants().is_ok());
    }

    #[test]
    fn test_ground_literal_is_a_cartesian_step() {
        // h(X, Y) :- e(X, Y), flag(1, 2)
        let ground = Literal::new(edb(0), [Term::Constant(1), Term::Constant(2)]).unwrap();
        let rule = Rule::new(4, vec![lit(idb(1), 0, 1)], vec![lit(edb(2), 0, 1), ground]).unwrap();
        let plan = RuleExecutionPlan::compile(&rule).unwrap().remove(0);
        assert_eq!(plan.order(), vec![0, 1]);
        let check = &plan.steps()[1];
        assert!(check.is_cartesian());
        assert!(check.from_right.is_empty(), "A ground literal contributes no column");
        assert_eq!(check.from_left, vec![(0, 0), (1, 1)]);

        let first = plan.reorder(&[1, 0]).unwrap();
        assert_eq!(first.steps()[0].output_width(), 0);
        assert!(first.steps()[1].is_cartesian());
        assert!(first.check_invariants().is_ok());
    }

    #[test]
    fn test_reorder_is_side_effect_free() {
        let rule = Rule::new(
            0,
            vec![lit(idb(1), 0, 3)],
            vec![lit(idb(1), 0, 1), lit(edb(0), 1, 2), lit(idb(1), 2, 3)],
        )
        .unwrap();
        let plan = RuleExecutionPlan::compile(&rule).unwrap().remove(0);
        let snapshot = plan.clone();
        let reordered = plan.reorder(&[1, 0, 2]).unwrap();
        assert_eq!(plan, snapshot, "reorder must not touch its receiver");
        assert_eq!(reordered.order(), vec![1, 0, 2]);
        assert_eq!(reordered.pivot(), plan.pivot());
        assert!(plan.reorder(&[0, 1]).is_err());
        assert!(plan.reorder(&[0, 1, 1]).is_err());
    }

    #[test]
    fn test_order_by_cardinality_keeps_connectivity() {
        // h(X, Q) :- a(X, Y), b(Y, Z), c(Z, Q) with c smallest, a next smallest
        let rule = Rule::new(
            0,
            vec![lit(idb(9), 0, 3)],
            vec![lit(edb(1), 0, 1), lit(edb(2), 1, 2), lit(edb(3), 2, 3)],
        )
        .unwrap();
        let plan = RuleExecutionPlan::compile(&rule).unwrap().remove(0);
        assert_eq!(plan.order(), vec![0, 1, 2]);
        let order = plan.order_by_cardinality(&[5, 100, 1]);
        assert_eq!(order, vec![2, 1, 0], "b must follow c because a shares nothing with c");
    }

    #[test]
    fn test_self_filter_for_recursive_tail() {
        // p(X, Y) :- e(X, Y), p(X, Y)  (last literal reads the head predicate)
        let rule = Rule::new(0, vec![lit(idb(1), 0, 1)], vec![lit(edb(0), 0, 1), lit(idb(1), 0, 1)])
            .unwrap();
        let plan = RuleExecutionPlan::compile(&rule).unwrap().remove(0);
        let reordered = plan.reorder(&[0, 1]).unwrap();
        assert!(plan.self_filter().is_none(), "the last literal is e, not p");
        let filter = reordered.self_filter().unwrap();
        assert!(filter.rejects(&[1, 2], &[1, 2]));
        assert!(!filter.rejects(&[1, 2], &[1, 3]));
    }

    fn arb_rule() -> impl Strategy<Value = Rule> {
        let arb_lit = (0u16..4, 0u8..5, 0u8..5).prop_map(|(p, a, b)| {
            let pred = if p < 2 { edb(p) } else { idb(p) };
            lit(pred, a, b)
        });
        (prop::collection::vec(arb_lit, 1..5), 0u8..5, 0u8..5).prop_map(|(body, a, b)| {
            Rule::new(0, vec![lit(idb(2), a, b)], body).unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_every_needed_variable_is_bound(rule in arb_rule()) {
            let plans = RuleExecutionPlan::compile(&rule).unwrap();
            for plan in &plans {
                prop_assert!(plan.check_invariants().is_ok());
                let mut bound: Vec<VarId> = Vec::new();
                for step in plan.steps() {
                    bound.extend(step.literal.vars());
                    for v in &step.output_vars {
                        prop_assert!(bound.contains(v));
                    }
                }
                prop_assert_eq!(plan.steps().len(), rule.body().len());
                let reversed: Vec<usize> = plan.order().into_iter().rev().collect();
                prop_assert!(plan.reorder(&reversed).unwrap().check_invariants().is_ok());
            }
        }
    }
}

//! Semi-naive fixpoint driver.
//!
//! The [`SemiNaiver`] owns one append-only [`Table`] per derived predicate
//! and fires rules stratum by stratum until nothing new can be derived.
//!
//! Every firing gets the next value of a global iteration counter. All facts
//! a firing derives are appended as one block tagged with that iteration,
//! after all of the rule's plans have run, so the plans of one firing read
//! the same snapshot. A rule remembers the iteration of its last firing; the
//! next firing reads only facts tagged at or after it through the pivot
//! literal of each plan, older facts through the literals before the pivot
//! and everything through the literals after it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::chase::{SkolemGenerator, ValueGenerator};
use crate::config::ReasonerConfig;
use crate::edb::EdbLayer;
use crate::error::{ReasonerError, Result};
use crate::filter::{ExistingFacts, FilteringSink};
use crate::join::{FactSource, JoinExecutor, JoinStep};
use crate::model::{PredId, Rule, RuleId, TermId};
use crate::plan::{RangeKind, RuleExecutionPlan};
use crate::pool::WorkerPool;
use crate::program::Program;
use crate::segment::SegmentBuilder;
use crate::sink::{HeadSink, Sink};
use crate::stratify::Stratification;
use crate::table::Table;

/// Where a rule stands in the current stratum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RuleStatus {
    /// Not fired since its stratum started
    Idle,
    /// Fired at least once
    Fired,
    /// Recursive and derived facts on its last firing, so it will fire again
    SaturatingRecursive,
}

/// Outcome of one rule firing
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuleStats {
    /// Iteration the firing was tagged with
    pub iteration: usize,
    /// Rule fired
    pub rule: RuleId,
    /// New facts appended
    pub derived: usize,
    /// Plans executed
    pub plans_evaluated: usize,
    /// Plans skipped because some literal was estimated empty
    pub plans_skipped: usize,
    /// Join steps executed
    pub joins: usize,
    /// Wall-clock time of the firing
    pub duration: Duration,
}

/// How a materialization run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MaterializationStatus {
    /// Every stratum reached its fixpoint
    Completed,
    /// The time limit expired between two firings
    TimedOut,
}

/// Summary of a materialization run
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Materialization {
    /// How the run ended
    pub status: MaterializationStatus,
    /// Value of the iteration counter at the end of the run
    pub iterations: usize,
    /// Rule firings during the run
    pub firings: usize,
    /// New facts derived during the run
    pub derivations: usize,
    /// Whether existential evaluation stopped on a value cycle
    pub cyclic: bool,
    /// Wall-clock time of the run
    pub duration: Duration,
}

impl Materialization {
    /// Whether every stratum reached its fixpoint
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == MaterializationStatus::Completed
    }
}

#[derive(Debug)]
struct RuleState {
    rule: Rule,
    plans: Vec<RuleExecutionPlan>,
    last_execution: usize,
    status: RuleStatus,
    /// Body index of a full-range literal found empty -> iteration of the check
    empty_literals: IndexMap<usize, usize>,
}

impl RuleState {
    fn fired(&self) -> bool {
        self.last_execution > 0
    }
}

/// Forward-chaining materialization of a rule set over a fact store
#[derive(Debug)]
pub struct SemiNaiver {
    rules: Vec<RuleState>,
    stratification: Stratification,
    tables: IndexMap<PredId, Table>,
    edb: Arc<dyn EdbLayer>,
    config: ReasonerConfig,
    pool: WorkerPool,
    generator: Box<dyn ValueGenerator>,
    iteration: usize,
    stats: Vec<RuleStats>,
    joins: usize,
    cyclic: bool,
}

impl SemiNaiver {
    /// Driver for `rules`, where rule `i` must have id `i`.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::InvalidRule`] for misnumbered rules,
    /// [`ReasonerError::Stratification`] for an invalid stratification, the
    /// plan compiler's errors for unsupported rule shapes, and
    /// [`ReasonerError::ThreadPool`] if the worker pool cannot start.
    pub fn new(
        rules: Vec<Rule>,
        edb: Arc<dyn EdbLayer>,
        stratification: Stratification,
        config: ReasonerConfig,
    ) -> Result<Self> {
        if let Some((i, rule)) = rules.iter().enumerate().find(|(i, r)| r.id() != *i) {
            return Err(ReasonerError::InvalidRule {
                rule: rule.id(),
                message: format!("rule at position {i} must have id {i}"),
            });
        }
        stratification.validate(&rules)?;

        let mut tables: IndexMap<PredId, Table> = IndexMap::new();
        for literal in rules.iter().flat_map(|r| r.heads().iter().chain(r.body())) {
            if !literal.is_edb() {
                tables
                    .entry(literal.pred_id())
                    .or_insert_with(|| Table::new(literal.arity()));
            }
        }
        let states = rules
            .into_iter()
            .map(|rule| {
                let plans = RuleExecutionPlan::compile(&rule)?;
                log::trace!("Rule {} compiled into {} plans: {rule}", rule.id(), plans.len());
                Ok(RuleState {
                    rule,
                    plans,
                    last_execution: 0,
                    status: RuleStatus::Idle,
                    empty_literals: IndexMap::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let pool = WorkerPool::new(config.threads)?.with_sort_threshold(config.parallel_sort_threshold);
        log::debug!(
            "Reasoner ready: {} rules, {} strata, {} derived predicates, {} threads",
            states.len(),
            stratification.len(),
            tables.len(),
            pool.threads()
        );
        Ok(Self {
            rules: states,
            stratification,
            tables,
            edb,
            config,
            pool,
            generator: Box::new(SkolemGenerator::new()),
            iteration: 0,
            stats: Vec::new(),
            joins: 0,
            cyclic: false,
        })
    }

    /// Driver for a parsed program, its facts loaded into an in-memory store
    /// and its strata computed from the predicate dependencies.
    ///
    /// # Errors
    ///
    /// Same as [`SemiNaiver::new`] and [`Stratification::compute`].
    pub fn from_program(program: &Program, config: ReasonerConfig) -> Result<Self> {
        let edb = Arc::new(program.edb()?);
        let stratification = Stratification::compute(program)?;
        Self::new(program.rules().to_vec(), edb, stratification, config)
    }

    /// Replaces the generator minting existential values
    #[must_use]
    pub fn with_generator(mut self, generator: Box<dyn ValueGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Runs every stratum to its fixpoint, or until the time limit expires.
    ///
    /// Running again after completion derives nothing new.
    ///
    /// # Errors
    ///
    /// Propagates fact-store failures and internal shape errors.
    pub fn run(&mut self) -> Result<Materialization> {
        let started = Instant::now();
        let deadline = self.config.timeout.map(|t| started + t);
        let firings_before = self.stats.len();
        let derived_before = self.derivations();
        let strata = self.stratification.strata().to_vec();
        let mut status = MaterializationStatus::Completed;

        'strata: for (index, stratum) in strata.iter().enumerate() {
            let (existential, plain): (Vec<RuleId>, Vec<RuleId>) = stratum
                .iter()
                .copied()
                .partition(|&r| self.rules[r].rule.is_existential());
            let stratum_start = self.stats.len();
            loop {
                if self.saturate(&plain, deadline)?.is_none() {
                    status = MaterializationStatus::TimedOut;
                    break 'strata;
                }
                if existential.is_empty() {
                    break;
                }
                let Some(derived) = self.pass(&existential, deadline)? else {
                    status = MaterializationStatus::TimedOut;
                    break 'strata;
                };
                if self.generator.cycle_detected() {
                    log::warn!(
                        "Stopping existential rules of stratum {index}: fresh values feed their own generator"
                    );
                    self.cyclic = true;
                    break;
                }
                if derived == 0 {
                    break;
                }
            }
            for &r in stratum {
                self.rules[r].status = RuleStatus::Idle;
            }
            let firings = &self.stats[stratum_start..];
            log::info!(
                "Stratum {index}: {} firings, {} new facts",
                firings.len(),
                firings.iter().map(|s| s.derived).sum::<usize>()
            );
        }

        let outcome = Materialization {
            status,
            iterations: self.iteration,
            firings: self.stats.len() - firings_before,
            derivations: self.derivations() - derived_before,
            cyclic: self.cyclic,
            duration: started.elapsed(),
        };
        match outcome.status {
            MaterializationStatus::Completed => log::info!(
                "Materialization complete: {} new facts in {} firings ({:?})",
                outcome.derivations,
                outcome.firings,
                outcome.duration
            ),
            MaterializationStatus::TimedOut => log::warn!(
                "Materialization stopped after {:?}: {} new facts in {} firings",
                outcome.duration,
                outcome.derivations,
                outcome.firings
            ),
        }
        Ok(outcome)
    }

    /// Fires `rules` round-robin until a whole pass derives nothing; `None`
    /// when the deadline passed
    fn saturate(&mut self, rules: &[RuleId], deadline: Option<Instant>) -> Result<Option<usize>> {
        let mut total = 0;
        loop {
            match self.pass(rules, deadline)? {
                None => return Ok(None),
                Some(0) => return Ok(Some(total)),
                Some(derived) => total += derived,
            }
        }
    }

    /// Fires each of `rules` once if it has something new to read
    fn pass(&mut self, rules: &[RuleId], deadline: Option<Instant>) -> Result<Option<usize>> {
        let mut derived = 0;
        for &r in rules {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!("Time limit reached before firing rule {r}");
                return Ok(None);
            }
            if self.should_fire(r) {
                derived += self.fire(r)?;
            }
        }
        Ok(Some(derived))
    }

    /// Whether some body literal may match facts the rule has not seen
    fn should_fire(&self, r: RuleId) -> bool {
        let state = &self.rules[r];
        if state.rule.is_edb_only() {
            return !state.fired();
        }
        state
            .rule
            .body()
            .iter()
            .filter(|l| !l.is_edb())
            .any(|l| {
                self.tables
                    .get(&l.pred_id())
                    .is_some_and(|t| t.has_block_since(state.last_execution))
            })
    }

    fn fire(&mut self, r: RuleId) -> Result<usize> {
        let started = Instant::now();
        let Self {
            rules,
            tables,
            edb,
            config,
            pool,
            generator,
            iteration,
            stats,
            joins,
            ..
        } = self;
        let current = *iteration + 1;
        let state = &mut rules[r];
        let last = state.last_execution;
        let rule = &state.rule;
        let source = FactSource::new(tables, edb.as_ref());
        let executor = JoinExecutor::new(pool, config);

        let mut head = HeadSink::new(rule);
        let (mut evaluated, mut skipped, mut step_joins) = (0, 0, 0);
        {
            let existing = match rule.heads() {
                [h] => tables
                    .get(&h.pred_id())
                    .and_then(|t| ExistingFacts::for_rule(rule, t)),
                _ => None,
            };
            let mut filtering;
            let sink: &mut dyn Sink = match existing {
                Some(existing) => {
                    filtering = FilteringSink::new(&mut head, existing);
                    &mut filtering
                }
                None => &mut head,
            };
            for plan in &state.plans {
                let mut estimates = Vec::with_capacity(plan.steps().len());
                for step in plan.steps() {
                    let full = step.range == RangeKind::Full;
                    let memoized = full
                        && state.empty_literals.get(&step.body_index).is_some_and(|&at| {
                            step.literal.is_edb()
                                || !tables
                                    .get(&step.literal.pred_id())
                                    .is_some_and(|t| t.has_block_since(at))
                        });
                    let estimate = if memoized {
                        0
                    } else {
                        source.estimate(&step.literal, step.range.resolve(last))
                    };
                    if estimate == 0 {
                        if full {
                            state.empty_literals.insert(step.body_index, current);
                        }
                        log::trace!(
                            "Rule {r}: literal {} is empty in {:?} range{}",
                            step.literal,
                            step.range,
                            if memoized { " (memoized)" } else { "" }
                        );
                        break;
                    }
                    estimates.push(estimate);
                }
                if estimates.len() < plan.steps().len() {
                    skipped += 1;
                    continue;
                }
                evaluated += 1;
                let order = plan.order_by_cardinality(&estimates);
                let reordered;
                let plan = if order == plan.order() {
                    plan
                } else {
                    reordered = plan.reorder(&order)?;
                    &reordered
                };
                log::trace!(
                    "Rule {r}: pivot {:?}, estimates {estimates:?}, order {:?}",
                    plan.pivot(),
                    plan.order()
                );
                step_joins += execute(plan, last, &source, &executor, config, pool, sink)?;
            }
            sink.flush()?;
        }

        let fresh = head.finish(tables, generator.as_mut(), config.chase, pool)?;
        let mut derived = 0;
        for (pred, segment) in fresh {
            derived += segment.len();
            tables
                .get_mut(&pred)
                .ok_or_else(|| ReasonerError::UnknownPredicate(format!("p{pred}")))?
                .add_block(current, Some(r), segment)?;
        }

        state.last_execution = current;
        state.status = if derived > 0 && state.rule.is_recursive() {
            RuleStatus::SaturatingRecursive
        } else {
            RuleStatus::Fired
        };
        *iteration = current;
        *joins += step_joins;
        let duration = started.elapsed();
        log::debug!(
            "Rule {r} at iteration {current}: {derived} new facts, {evaluated} plans run, {skipped} skipped, {step_joins} joins ({duration:?})"
        );
        stats.push(RuleStats {
            iteration: current,
            rule: r,
            derived,
            plans_evaluated: evaluated,
            plans_skipped: skipped,
            joins: step_joins,
            duration,
        });
        Ok(derived)
    }

    /// Facts derived for `predicate`, sorted and duplicate-free
    #[must_use]
    pub fn facts(&self, predicate: PredId) -> Vec<Vec<TermId>> {
        self.tables
            .get(&predicate)
            .map(Table::sorted_facts)
            .unwrap_or_default()
    }

    /// Table of a derived predicate
    #[must_use]
    pub fn table(&self, predicate: PredId) -> Option<&Table> {
        self.tables.get(&predicate)
    }

    /// Every derived predicate's table
    #[must_use]
    pub fn tables(&self) -> &IndexMap<PredId, Table> {
        &self.tables
    }

    /// Number of facts per derived predicate
    #[must_use]
    pub fn count_all_idbs(&self) -> IndexMap<PredId, usize> {
        self.tables.iter().map(|(p, t)| (*p, t.len())).collect()
    }

    /// Total number of derived facts
    #[must_use]
    pub fn derivations(&self) -> usize {
        self.tables.values().map(Table::len).sum()
    }

    /// One entry per rule firing, in firing order
    #[must_use]
    pub fn stats(&self) -> &[RuleStats] {
        &self.stats
    }

    /// Firing statistics as pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::Config`] if serialisation fails.
    #[cfg(feature = "serde")]
    pub fn stats_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.stats)?)
    }

    /// Join steps executed so far
    #[must_use]
    pub fn joins_executed(&self) -> usize {
        self.joins
    }

    /// Current value of the iteration counter
    #[must_use]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Status of a rule within the current stratum
    #[must_use]
    pub fn rule_status(&self, rule: RuleId) -> Option<RuleStatus> {
        self.rules.get(rule).map(|s| s.status)
    }

    /// Compiled plans of a rule, one per pivot
    #[must_use]
    pub fn plans(&self, rule: RuleId) -> &[RuleExecutionPlan] {
        self.rules.get(rule).map_or(&[], |s| s.plans.as_slice())
    }

    /// Whether a value cycle stopped existential evaluation
    #[must_use]
    pub fn cyclic(&self) -> bool {
        self.cyclic
    }

    /// Values minted for existential variables
    #[must_use]
    pub fn fresh_values(&self) -> usize {
        self.generator.minted()
    }
}

/// Runs one plan into `sink` and returns the number of join steps executed.
/// The first literal is read directly; the plan stops as soon as an
/// intermediate result is empty.
fn execute(
    plan: &RuleExecutionPlan,
    last: usize,
    source: &FactSource<'_>,
    executor: &JoinExecutor<'_>,
    config: &ReasonerConfig,
    pool: &WorkerPool,
    sink: &mut dyn Sink,
) -> Result<usize> {
    let steps = plan.steps();
    let self_filter = plan
        .self_filter()
        .filter(|_| config.filter_self_derivations);
    let filter_at = |i: usize| self_filter.filter(|_| i + 1 == steps.len());

    let Some(first) = steps.first() else {
        return Ok(0);
    };
    let step = JoinStep::from_plan(first, first.range.resolve(last), filter_at(0));
    if steps.len() == 1 {
        executor.scan(source, &step, sink)?;
        return Ok(0);
    }
    let mut builder = SegmentBuilder::new(first.output_width());
    executor.scan(source, &step, &mut builder)?;
    let mut left = builder.finish();
    if config.dedup_intermediate {
        left = left.sort_unique(pool)?;
    }

    let mut joins = 0;
    for (i, plan_step) in steps.iter().enumerate().skip(1) {
        if left.is_empty() {
            log::trace!("Rule {}: intermediate result empty before step {i}", plan.rule());
            break;
        }
        let step = JoinStep::from_plan(plan_step, plan_step.range.resolve(last), filter_at(i));
        joins += 1;
        if i + 1 == steps.len() {
            executor.join(source, &left, &step, sink)?;
        } else {
            let mut builder = SegmentBuilder::new(plan_step.output_width());
            executor.join(source, &left, &step, &mut builder)?;
            left = builder.finish();
            if config.dedup_intermediate {
                left = left.sort_unique(pool)?;
            }
        }
    }
    Ok(joins)
}

#[cfg(all(test, feature = "parsing"))]
mod tests {
    use super::*;
    use crate::config::ChaseStrategy;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn reasoner(text: &str, config: ReasonerConfig) -> (Program, SemiNaiver) {
        init_logger();
        let program = Program::parse(text).unwrap();
        let reasoner = SemiNaiver::from_program(&program, config).unwrap();
        (program, reasoner)
    }

    fn named(program: &Program, reasoner: &SemiNaiver, predicate: &str) -> Vec<String> {
        let pred = program.predicate(predicate).unwrap().id();
        reasoner
            .facts(pred)
            .iter()
            .map(|f| program.display_fact(pred, f))
            .collect()
    }

    const ANCESTORS: &str = "parent(a, b). parent(b, c). parent(c, d).\n\
        anc(X, Y) :- parent(X, Y).\n\
        anc(X, Z) :- parent(X, Y), anc(Y, Z).\n";

    #[test]
    fn test_ancestor_closure() {
        let (program, mut reasoner) = reasoner(ANCESTORS, ReasonerConfig::default());
        let outcome = reasoner.run().unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.derivations, 6);
        let mut anc = named(&program, &reasoner, "anc");
        anc.sort();
        assert_eq!(
            anc,
            vec![
                "anc(a, b)", "anc(a, c)", "anc(a, d)", "anc(b, c)", "anc(b, d)", "anc(c, d)"
            ]
        );
        let table = reasoner.table(program.predicate("anc").unwrap().id()).unwrap();
        assert!(!table.has_overlapping_blocks(), "Blocks must be disjoint");
    }

    #[test]
    fn test_ancestor_closure_with_left_recursion_and_threads() {
        let text = "parent(a, b). parent(b, c). parent(c, d).\n\
            anc(X, Y) :- parent(X, Y).\n\
            anc(X, Z) :- anc(X, Y), anc(Y, Z).\n";
        let (program, mut reasoner) = reasoner(text, ReasonerConfig::default().with_threads(3));
        reasoner.run().unwrap();
        assert_eq!(named(&program, &reasoner, "anc").len(), 6);
    }

    #[test]
    fn test_empty_edb_literal_skips_the_join() {
        let text = "base(a). base(b).\n\
            s(X) :- base(X).\n\
            t(X) :- s(X), missing(X).\n";
        let (program, mut reasoner) = reasoner(text, ReasonerConfig::default());
        let outcome = reasoner.run().unwrap();
        assert_eq!(outcome.derivations, 2, "Only s is derived");
        assert!(named(&program, &reasoner, "t").is_empty());
        assert_eq!(reasoner.joins_executed(), 0, "The join with `missing` must not run");
        let t_rule = reasoner.stats().iter().find(|s| s.rule == 1).unwrap();
        assert_eq!((t_rule.plans_evaluated, t_rule.plans_skipped), (0, 1));
    }

    #[test]
    fn test_second_run_derives_nothing() {
        let (_, mut reasoner) = reasoner(ANCESTORS, ReasonerConfig::default());
        reasoner.run().unwrap();
        let counts = reasoner.count_all_idbs();
        let again = reasoner.run().unwrap();
        assert_eq!(again.derivations, 0);
        assert_eq!(again.firings, 0, "No rule has anything new to read");
        assert_eq!(reasoner.count_all_idbs(), counts);
    }

    #[test]
    fn test_blocks_grow_monotonically() {
        let (program, mut reasoner) = reasoner(ANCESTORS, ReasonerConfig::default());
        reasoner.run().unwrap();
        let table = reasoner.table(program.predicate("anc").unwrap().id()).unwrap();
        let iterations: Vec<usize> = table.blocks().iter().map(|b| b.iteration()).collect();
        assert!(iterations.windows(2).all(|w| w[0] <= w[1]), "{iterations:?}");
        let mut running = 0;
        for stat in reasoner.stats() {
            running += stat.derived;
            assert!(running <= reasoner.derivations());
        }
        assert_eq!(running, reasoner.derivations());
    }

    #[test]
    fn test_zero_timeout_stops_before_any_firing() {
        let config = ReasonerConfig::default().with_timeout(Duration::ZERO);
        let (_, mut reasoner) = reasoner(ANCESTORS, config);
        let outcome = reasoner.run().unwrap();
        assert_eq!(outcome.status, MaterializationStatus::TimedOut);
        assert_eq!(outcome.firings, 0);
        assert_eq!(reasoner.derivations(), 0);
    }

    #[test]
    fn test_value_cycle_is_flagged() {
        let text = "seed(a).\n\
            person(X) :- seed(X).\n\
            hasParent(X, Y) :- person(X).\n\
            person(Y) :- hasParent(X, Y).\n";
        let (program, mut reasoner) = reasoner(text, ReasonerConfig::default());
        let outcome = reasoner.run().unwrap();
        assert!(outcome.cyclic, "Every parent is a person with a parent");
        assert!(outcome.is_complete());
        assert!(reasoner.fresh_values() >= 2);
        assert!(named(&program, &reasoner, "hasParent").len() >= 2);
    }

    #[test]
    fn test_restricted_chase_reuses_existing_witnesses() {
        let text = "person(a). person(b). knows(a, b).\n\
            friend(X, Y) :- knows(X, Y).\n\
            friend(X, Y) :- person(X).\n";
        let config = ReasonerConfig::default().with_chase(ChaseStrategy::Restricted);
        let (program, mut reasoner) = reasoner(text, config);
        let outcome = reasoner.run().unwrap();
        assert!(!outcome.cyclic);
        assert_eq!(reasoner.fresh_values(), 1, "Only b needs a fresh friend");
        assert_eq!(named(&program, &reasoner, "friend").len(), 2);
    }

    #[test]
    fn test_strata_run_in_order() {
        let text = "e(a, b). e(b, c).\n\
            reach(X, Y) :- e(X, Y).\n\
            reach(X, Z) :- reach(X, Y), e(Y, Z).\n\
            far(X, Z) :- reach(X, Y), reach(Y, Z).\n";
        let (program, mut reasoner) = reasoner(text, ReasonerConfig::default());
        reasoner.run().unwrap();
        assert_eq!(named(&program, &reasoner, "far"), vec!["far(a, c)"]);
        assert_eq!(reasoner.rule_status(2), Some(RuleStatus::Idle));
    }

    #[test]
    fn test_misnumbered_rules_are_rejected() {
        let program = Program::parse("q(X) :- p(X).").unwrap();
        let mut rules = program.rules().to_vec();
        rules.push(rules[0].clone());
        let err = SemiNaiver::new(
            rules,
            Arc::new(program.edb().unwrap()),
            Stratification::default(),
            ReasonerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ReasonerError::InvalidRule { rule: 0, .. }), "got {err}");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_stats_json_lists_every_firing() {
        let (_, mut reasoner) = reasoner(ANCESTORS, ReasonerConfig::default());
        reasoner.run().unwrap();
        let json: serde_json::Value = serde_json::from_str(&reasoner.stats_json().unwrap()).unwrap();
        let firings = json.as_array().unwrap();
        assert_eq!(firings.len(), reasoner.stats().len());
        assert!(firings[0].get("plans_skipped").is_some());
    }
}

//! Fresh values for existential head variables.
//!
//! The driver never invents term ids itself. When a head variable does not
//! occur in the body it asks a [`ValueGenerator`] for a value keyed on the
//! rule, the variable and the frontier values of the derivation.

use std::fmt;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::model::{RuleId, TermId, Tuple, VarId};

/// Highest bit of every minted id; dictionary ids must stay below it
pub const FRESH_VALUE_BIT: TermId = 1 << 63;

const RULE_SHIFT: u32 = 40;
const VAR_SHIFT: u32 = 32;
const COUNTER_MASK: TermId = (1 << VAR_SHIFT) - 1;
const VAR_MASK: TermId = 0xFF;
const RULE_MASK: TermId = (1 << (63 - RULE_SHIFT)) - 1;

/// Mints or reuses term ids for existential variables
pub trait ValueGenerator: Send + fmt::Debug {
    /// Value of `var` in `rule` for the derivation whose frontier values are `key`
    fn generate(&mut self, rule: RuleId, var: VarId, key: &[TermId]) -> TermId;

    /// Whether a value was minted from a value minted by the same rule and variable
    fn cycle_detected(&self) -> bool;

    /// Number of values minted so far
    fn minted(&self) -> usize;
}

/// Whether `term` was produced by a [`SkolemGenerator`]
#[must_use]
pub fn is_fresh_value(term: TermId) -> bool {
    term & FRESH_VALUE_BIT != 0
}

/// Rule and variable encoded in a minted id
#[must_use]
pub fn fresh_value_origin(term: TermId) -> Option<(RuleId, VarId)> {
    if !is_fresh_value(term) {
        return None;
    }
    let rule = ((term >> RULE_SHIFT) & RULE_MASK).checked_sub(1)?;
    let var = (term >> VAR_SHIFT) & VAR_MASK;
    Some((
        usize::try_from(rule).ok()?,
        VarId::try_from(var).ok()?,
    ))
}

/// One value per `(rule, variable, frontier values)`
///
/// Minted ids carry the rule and variable in their high bits. Every minted
/// value also remembers which `(rule, variable)` pairs it was transitively
/// minted from, which is how a value feeding its own generator is spotted.
#[derive(Debug, Default)]
pub struct SkolemGenerator {
    values: IndexMap<(RuleId, VarId, Tuple), TermId>,
    ancestry: IndexMap<TermId, SmallVec<[(RuleId, VarId); 4]>>,
    counter: TermId,
    cycle: bool,
}

impl SkolemGenerator {
    /// Generator with no values minted
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(rule, variable)` pairs a minted value descends from, itself included
    #[must_use]
    pub fn ancestry(&self, value: TermId) -> &[(RuleId, VarId)] {
        self.ancestry.get(&value).map_or(&[], |a| a.as_slice())
    }

    fn mint(&mut self, rule: RuleId, var: VarId) -> TermId {
        self.counter += 1;
        let rule_bits = (TermId::try_from(rule).unwrap_or(RULE_MASK) + 1) & RULE_MASK;
        FRESH_VALUE_BIT
            | rule_bits << RULE_SHIFT
            | TermId::from(var) << VAR_SHIFT
            | (self.counter & COUNTER_MASK)
    }
}

impl ValueGenerator for SkolemGenerator {
    fn generate(&mut self, rule: RuleId, var: VarId, key: &[TermId]) -> TermId {
        let key: Tuple = key.iter().copied().collect();
        if let Some(&value) = self.values.get(&(rule, var, key.clone())) {
            return value;
        }
        let mut ancestry: SmallVec<[(RuleId, VarId); 4]> = SmallVec::new();
        for k in key.iter().filter(|k| is_fresh_value(**k)) {
            for origin in self.ancestry(*k) {
                if !ancestry.contains(origin) {
                    ancestry.push(*origin);
                }
            }
        }
        if ancestry.contains(&(rule, var)) && !self.cycle {
            log::warn!("Existential variable ?{var} of rule {rule} feeds its own generator");
            self.cycle = true;
        }
        ancestry.push((rule, var));
        let value = self.mint(rule, var);
        self.values.insert((rule, var, key), value);
        self.ancestry.insert(value, ancestry);
        value
    }

    fn cycle_detected(&self) -> bool {
        self.cycle
    }

    fn minted(&self) -> usize {
        self.values.len()
    }
}

//! Predicate registry, constant dictionary and rule list.
//!
//! The engine only ever sees integer ids. A [`Program`] is the place where
//! names become ids: predicates are registered with their arity and kind,
//! constants are interned into a dictionary, and rules get sequential ids.

use std::fmt::Write as _;

use indexmap::{IndexMap, IndexSet};

use crate::edb::InMemoryEdb;
use crate::error::{ReasonerError, Result};
use crate::model::{Literal, PredId, Predicate, PredicateKind, Rule, RuleId, TermId, Tuple};

/// Rules, predicates and ground facts of one reasoning task
#[derive(Debug, Clone, Default)]
pub struct Program {
    predicates: IndexMap<String, Predicate>,
    constants: IndexSet<String>,
    rules: Vec<Rule>,
    facts: Vec<(PredId, Tuple)>,
}

impl Program {
    /// Empty program
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a predicate, or returns the existing one when `name` is
    /// already known with the same kind and arity.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::UnsupportedArity`] for an arity outside 1 to
    /// 3, [`ReasonerError::ShapeMismatch`] when the name is known with another
    /// arity, and [`ReasonerError::InvalidRule`] when it is known with
    /// another kind.
    pub fn declare(&mut self, name: &str, kind: PredicateKind, arity: usize) -> Result<Predicate> {
        if let Some(existing) = self.predicates.get(name) {
            if existing.arity() != arity {
                return Err(ReasonerError::ShapeMismatch {
                    expected: existing.arity(),
                    found: arity,
                });
            }
            if existing.kind() != kind {
                return Err(ReasonerError::InvalidRule {
                    rule: self.rules.len(),
                    message: format!("predicate `{name}` is used both as EDB and IDB"),
                });
            }
            return Ok(*existing);
        }
        let id = PredId::try_from(self.predicates.len()).map_err(|_| {
            ReasonerError::UnknownPredicate(format!("{name} (predicate table is full)"))
        })?;
        let predicate = Predicate::new(id, kind, arity)?;
        self.predicates.insert(name.to_string(), predicate);
        Ok(predicate)
    }

    /// Predicate registered under `name`
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::UnknownPredicate`] if it was never declared.
    pub fn predicate(&self, name: &str) -> Result<Predicate> {
        self.predicates
            .get(name)
            .copied()
            .ok_or_else(|| ReasonerError::UnknownPredicate(name.to_string()))
    }

    /// Name of a predicate id
    #[must_use]
    pub fn predicate_name(&self, id: PredId) -> Option<&str> {
        self.predicates
            .get_index(usize::from(id))
            .map(|(name, _)| name.as_str())
    }

    /// Every registered predicate in id order
    pub fn predicates(&self) -> impl Iterator<Item = (&str, Predicate)> + '_ {
        self.predicates.iter().map(|(n, p)| (n.as_str(), *p))
    }

    /// Id of `constant`, interning it if needed
    pub fn intern(&mut self, constant: &str) -> TermId {
        let (index, _) = self.constants.insert_full(constant.to_string());
        index as TermId
    }

    /// Id of an already interned constant
    #[must_use]
    pub fn constant(&self, constant: &str) -> Option<TermId> {
        self.constants.get_index_of(constant).map(|i| i as TermId)
    }

    /// Text of a constant id
    #[must_use]
    pub fn resolve(&self, id: TermId) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.constants.get_index(i))
            .map(String::as_str)
    }

    /// Adds a rule and returns its id
    ///
    /// # Errors
    ///
    /// Same as [`Rule::new`].
    pub fn add_rule(&mut self, heads: Vec<Literal>, body: Vec<Literal>) -> Result<RuleId> {
        let id = self.rules.len();
        self.rules.push(Rule::new(id, heads, body)?);
        Ok(id)
    }

    /// Rules in id order
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Records a ground fact of an EDB predicate
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::UnsupportedArity`] if the fact does not match
    /// the predicate's arity, and [`ReasonerError::InvalidRule`] for a derived
    /// predicate.
    pub fn add_fact(&mut self, predicate: Predicate, fact: &[TermId]) -> Result<()> {
        if fact.len() != predicate.arity() {
            return Err(ReasonerError::UnsupportedArity {
                predicate: predicate.id(),
                arity: fact.len(),
            });
        }
        if predicate.is_idb() {
            return Err(ReasonerError::InvalidRule {
                rule: self.rules.len(),
                message: format!(
                    "facts of derived predicate p{} must come from rules",
                    predicate.id()
                ),
            });
        }
        self.facts.push((predicate.id(), fact.iter().copied().collect()));
        Ok(())
    }

    /// Ground facts recorded so far
    #[must_use]
    pub fn facts(&self) -> &[(PredId, Tuple)] {
        &self.facts
    }

    /// In-memory fact store holding the recorded facts
    ///
    /// # Errors
    ///
    /// Same as [`crate::EdbBuilder::add_fact`].
    pub fn edb(&self) -> Result<InMemoryEdb> {
        let mut builder = InMemoryEdb::builder();
        for (pred, fact) in &self.facts {
            let predicate = self
                .predicates
                .get_index(usize::from(*pred))
                .map(|(_, p)| *p)
                .ok_or_else(|| ReasonerError::UnknownPredicate(format!("p{pred}")))?;
            builder.add_fact(predicate, fact)?;
        }
        Ok(builder.build())
    }

    /// Renders a fact with predicate and constant names, e.g. `anc(a, c)`
    #[must_use]
    pub fn display_fact(&self, predicate: PredId, fact: &[TermId]) -> String {
        let mut out = self
            .predicate_name(predicate)
            .map_or_else(|| format!("p{predicate}"), str::to_string);
        out.push('(');
        for (i, term) in fact.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match self.resolve(*term) {
                Some(name) => out.push_str(name),
                None => {
                    let _ = write!(out, "#{term}");
                }
            }
        }
        out.push(')');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edb::EdbLayer;
    use crate::model::Term;

    #[test]
    fn test_declare_is_idempotent() {
        let mut program = Program::new();
        let a = program.declare("edge", PredicateKind::Edb, 2).unwrap();
        let b = program.declare("edge", PredicateKind::Edb, 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(program.predicate_name(a.id()), Some("edge"));
        assert!(matches!(
            program.declare("edge", PredicateKind::Edb, 3),
            Err(ReasonerError::ShapeMismatch { expected: 2, found: 3 })
        ));
        assert!(matches!(
            program.declare("edge", PredicateKind::Idb, 2),
            Err(ReasonerError::InvalidRule { .. })
        ));
        assert!(matches!(
            program.declare("wide", PredicateKind::Edb, 4),
            Err(ReasonerError::UnsupportedArity { arity: 4, .. })
        ));
    }

    #[test]
    fn test_dictionary_round_trip() {
        let mut program = Program::new();
        let a = program.intern("alice");
        let b = program.intern("bob");
        assert_eq!(program.intern("alice"), a, "Interning twice must reuse the id");
        assert_ne!(a, b);
        assert_eq!(program.resolve(b), Some("bob"));
        assert_eq!(program.constant("carol"), None);
    }

    #[test]
    fn test_facts_build_a_store() {
        let mut program = Program::new();
        let edge = program.declare("edge", PredicateKind::Edb, 2).unwrap();
        let (a, b) = (program.intern("a"), program.intern("b"));
        program.add_fact(edge, &[a, b]).unwrap();
        program.add_fact(edge, &[a, b]).unwrap();
        assert!(program.add_fact(edge, &[a]).is_err());
        let store = program.edb().unwrap();
        let lit = Literal::new(edge, [Term::Variable(0), Term::Variable(1)]).unwrap();
        assert_eq!(store.estimate_cardinality(&lit), 1, "Duplicate facts collapse");
        assert_eq!(program.display_fact(edge.id(), &[a, b]), "edge(a, b)");
    }

    #[test]
    fn test_rules_get_sequential_ids() {
        let mut program = Program::new();
        let edge = program.declare("edge", PredicateKind::Edb, 2).unwrap();
        let path = program.declare("path", PredicateKind::Idb, 2).unwrap();
        let vars = [Term::Variable(0), Term::Variable(1)];
        let first = program
            .add_rule(
                vec![Literal::new(path, vars).unwrap()],
                vec![Literal::new(edge, vars).unwrap()],
            )
            .unwrap();
        let second = program
            .add_rule(
                vec![Literal::new(path, vars).unwrap()],
                vec![Literal::new(path, vars).unwrap()],
            )
            .unwrap();
        assert_eq!((first, second), (0, 1));
        assert!(program.add_fact(path, &[1, 2]).is_err(), "Derived predicates take no facts");
    }
}

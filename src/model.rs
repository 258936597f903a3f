//! Terms, literals and rules.
//!
//! Everything here is immutable once built. Constants are opaque 64-bit term
//! ids handed out by an external dictionary; variables are small integers
//! scoped to a single rule.

use std::fmt;

use smallvec::SmallVec;

use crate::error::{ReasonerError, Result};

/// Identifier of a constant.
pub type TermId = u64;
/// Identifier of a variable inside one rule.
pub type VarId = u8;
/// Identifier of a predicate.
pub type PredId = u16;
/// Identifier of a rule.
pub type RuleId = usize;

/// Widest tuple a literal may have.
pub const MAX_ARITY: usize = 3;

/// A fact or a row of a literal result.
pub type Tuple = SmallVec<[TermId; MAX_ARITY]>;

/// A term of a literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// A variable scoped to the enclosing rule
    Variable(VarId),
    /// A constant term id
    Constant(TermId),
}

impl Term {
    /// Returns the variable id, if this term is a variable
    #[must_use]
    pub fn as_variable(self) -> Option<VarId> {
        match self {
            Term::Variable(v) => Some(v),
            Term::Constant(_) => None,
        }
    }

    /// Returns the constant, if this term is a constant
    #[must_use]
    pub fn as_constant(self) -> Option<TermId> {
        match self {
            Term::Constant(c) => Some(c),
            Term::Variable(_) => None,
        }
    }

    /// Whether this term is a variable
    #[must_use]
    pub fn is_variable(self) -> bool {
        matches!(self, Term::Variable(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(v) => write!(f, "?{v}"),
            Term::Constant(c) => write!(f, "{c}"),
        }
    }
}

/// Whether a predicate is stored externally or derived by rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PredicateKind {
    /// Extensional: facts come from the fact store
    Edb,
    /// Intensional: facts are derived by rules
    Idb,
}

/// A predicate symbol with a fixed arity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Predicate {
    id: PredId,
    kind: PredicateKind,
    arity: u8,
}

impl Predicate {
    /// Creates a predicate.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::UnsupportedArity`] unless `1 <= arity <= 3`.
    pub fn new(id: PredId, kind: PredicateKind, arity: usize) -> Result<Self> {
        if arity == 0 || arity > MAX_ARITY {
            return Err(ReasonerError::UnsupportedArity {
                predicate: id,
                arity,
            });
        }
        Ok(Self {
            id,
            kind,
            arity: u8::try_from(arity).unwrap_or(u8::MAX),
        })
    }

    /// Predicate id
    #[must_use]
    pub fn id(&self) -> PredId {
        self.id
    }

    /// EDB or IDB
    #[must_use]
    pub fn kind(&self) -> PredicateKind {
        self.kind
    }

    /// Number of terms
    #[must_use]
    pub fn arity(&self) -> usize {
        usize::from(self.arity)
    }

    /// Whether facts come from the fact store
    #[must_use]
    pub fn is_edb(&self) -> bool {
        self.kind == PredicateKind::Edb
    }

    /// Whether facts are derived
    #[must_use]
    pub fn is_idb(&self) -> bool {
        self.kind == PredicateKind::Idb
    }
}

/// A predicate applied to a tuple of terms (e.g. `edge(?0, 42)`)
///
/// Repeating a variable encodes an equality constraint between the two
/// positions. The result of a literal is a relation with one column per
/// *variable position*, constants dropped; this is the layout every
/// join coordinate refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal {
    predicate: Predicate,
    terms: SmallVec<[Term; MAX_ARITY]>,
}

impl Literal {
    /// Creates a literal.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::UnsupportedArity`] when the number of terms
    /// differs from the predicate arity.
    pub fn new(predicate: Predicate, terms: impl IntoIterator<Item = Term>) -> Result<Self> {
        let terms: SmallVec<[Term; MAX_ARITY]> = terms.into_iter().collect();
        if terms.len() != predicate.arity() {
            return Err(ReasonerError::UnsupportedArity {
                predicate: predicate.id(),
                arity: terms.len(),
            });
        }
        Ok(Self { predicate, terms })
    }

    /// The predicate
    #[must_use]
    pub fn predicate(&self) -> Predicate {
        self.predicate
    }

    /// Shortcut for the predicate id
    #[must_use]
    pub fn pred_id(&self) -> PredId {
        self.predicate.id()
    }

    /// The terms
    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Number of terms
    #[must_use]
    pub fn arity(&self) -> usize {
        self.terms.len()
    }

    /// Whether the literal reads the fact store
    #[must_use]
    pub fn is_edb(&self) -> bool {
        self.predicate.is_edb()
    }

    /// Term positions holding variables, paired with the variable
    pub fn var_positions(&self) -> impl Iterator<Item = (usize, VarId)> + '_ {
        self.terms
            .iter()
            .enumerate()
            .filter_map(|(pos, t)| t.as_variable().map(|v| (pos, v)))
    }

    /// Number of columns of the literal result
    #[must_use]
    pub fn n_var_positions(&self) -> usize {
        self.terms.iter().filter(|t| t.is_variable()).count()
    }

    /// Term position of the given result column
    #[must_use]
    pub fn term_position(&self, column: usize) -> Option<usize> {
        self.var_positions().nth(column).map(|(pos, _)| pos)
    }

    /// Variable of the given result column
    #[must_use]
    pub fn var_at_column(&self, column: usize) -> Option<VarId> {
        self.var_positions().nth(column).map(|(_, v)| v)
    }

    /// Distinct variables in order of first occurrence
    #[must_use]
    pub fn vars(&self) -> SmallVec<[VarId; MAX_ARITY]> {
        let mut out = SmallVec::new();
        for (_, v) in self.var_positions() {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        out
    }

    /// Distinct variables of this literal that also appear in `vars`
    #[must_use]
    pub fn shared_vars(&self, vars: &[VarId]) -> SmallVec<[VarId; MAX_ARITY]> {
        self.vars().into_iter().filter(|v| vars.contains(v)).collect()
    }

    /// Whether some term is a constant
    #[must_use]
    pub fn has_constants(&self) -> bool {
        self.terms.iter().any(|t| !t.is_variable())
    }

    /// Pairs of term positions holding the same variable
    #[must_use]
    pub fn repeated_vars(&self) -> SmallVec<[(usize, usize); MAX_ARITY]> {
        let mut out = SmallVec::new();
        for i in 0..self.terms.len() {
            if let Term::Variable(v) = self.terms[i] {
                for j in i + 1..self.terms.len() {
                    if self.terms[j] == Term::Variable(v) {
                        out.push((i, j));
                    }
                }
            }
        }
        out
    }

    /// Whether reading this literal needs more than a plain scan
    #[must_use]
    pub fn needs_filtering(&self) -> bool {
        self.has_constants() || !self.repeated_vars().is_empty()
    }

    /// Whether a stored fact satisfies the constants and equalities of this literal
    #[must_use]
    pub fn matches(&self, fact: &[TermId]) -> bool {
        if fact.len() != self.terms.len() {
            return false;
        }
        for (pos, term) in self.terms.iter().enumerate() {
            if let Term::Constant(c) = term {
                if fact[pos] != *c {
                    return false;
                }
            }
        }
        self.repeated_vars()
            .iter()
            .all(|&(a, b)| fact[a] == fact[b])
    }

    /// Projects a stored fact onto the variable positions
    #[must_use]
    pub fn project(&self, fact: &[TermId]) -> Tuple {
        self.var_positions().map(|(pos, _)| fact[pos]).collect()
    }

    /// Rebuilds the full fact from a literal result row
    #[must_use]
    pub fn instantiate(&self, row: &[TermId]) -> Tuple {
        let mut column = 0;
        self.terms
            .iter()
            .map(|t| match t {
                Term::Constant(c) => *c,
                Term::Variable(_) => {
                    let value = row[column];
                    column += 1;
                    value
                }
            })
            .collect()
    }

    /// Replaces every occurrence of the bound variables with constants
    #[must_use]
    pub fn substitute(&self, bindings: &[(VarId, TermId)]) -> Literal {
        let terms = self
            .terms
            .iter()
            .map(|t| match t {
                Term::Variable(v) => bindings
                    .iter()
                    .find(|(bv, _)| bv == v)
                    .map_or(*t, |(_, c)| Term::Constant(*c)),
                Term::Constant(_) => *t,
            })
            .collect();
        Literal {
            predicate: self.predicate,
            terms,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}(", self.predicate.id())?;
        for (i, t) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, ")")
    }
}

/// A rule (e.g. `path(?0, ?2) :- path(?0, ?1), edge(?1, ?2)`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    id: RuleId,
    heads: Vec<Literal>,
    body: Vec<Literal>,
}

impl Rule {
    /// Creates a rule.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::InvalidRule`] when the rule has no head or no
    /// body, or when a head literal uses an EDB predicate.
    pub fn new(id: RuleId, heads: Vec<Literal>, body: Vec<Literal>) -> Result<Self> {
        let invalid = |message: &str| ReasonerError::InvalidRule {
            rule: id,
            message: message.to_string(),
        };
        if heads.is_empty() {
            return Err(invalid("a rule needs at least one head literal"));
        }
        if body.is_empty() {
            return Err(invalid("a rule needs at least one body literal"));
        }
        if heads.iter().any(Literal::is_edb) {
            return Err(invalid("head literals must use IDB predicates"));
        }
        Ok(Self { id, heads, body })
    }

    /// Rule id
    #[must_use]
    pub fn id(&self) -> RuleId {
        self.id
    }

    /// Head literals
    #[must_use]
    pub fn heads(&self) -> &[Literal] {
        &self.heads
    }

    /// Body literals
    #[must_use]
    pub fn body(&self) -> &[Literal] {
        &self.body
    }

    /// Positions of the IDB literals in the body
    #[must_use]
    pub fn idb_body_positions(&self) -> Vec<usize> {
        self.body
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.is_edb())
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether every body literal reads the fact store (evaluated once)
    #[must_use]
    pub fn is_edb_only(&self) -> bool {
        self.body.iter().all(Literal::is_edb)
    }

    /// Whether some head predicate also appears in the body
    #[must_use]
    pub fn is_recursive(&self) -> bool {
        self.heads
            .iter()
            .any(|h| self.body.iter().any(|b| b.pred_id() == h.pred_id()))
    }

    /// Distinct body variables in order of first occurrence
    #[must_use]
    pub fn body_vars(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        for v in self.body.iter().flat_map(Literal::vars) {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        out
    }

    /// Head variables that do not occur in the body, sorted
    #[must_use]
    pub fn existential_vars(&self) -> Vec<VarId> {
        let body = self.body_vars();
        let mut out: Vec<VarId> = self
            .heads
            .iter()
            .flat_map(Literal::vars)
            .filter(|v| !body.contains(v))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Body variables that occur in some head, sorted
    #[must_use]
    pub fn frontier_vars(&self) -> Vec<VarId> {
        let body = self.body_vars();
        let mut out: Vec<VarId> = self
            .heads
            .iter()
            .flat_map(Literal::vars)
            .filter(|v| body.contains(v))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Whether the rule mints fresh values
    #[must_use]
    pub fn is_existential(&self) -> bool {
        !self.existential_vars().is_empty()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, h) in self.heads.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{h}")?;
        }
        write!(f, " :- ")?;
        for (i, b) in self.body.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{b}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(id: PredId, kind: PredicateKind, arity: usize) -> Predicate {
        Predicate::new(id, kind, arity).unwrap()
    }

    #[test]
    fn test_predicate_rejects_unsupported_arity() {
        assert!(Predicate::new(0, PredicateKind::Edb, 0).is_err());
        assert!(Predicate::new(0, PredicateKind::Edb, 4).is_err());
        assert!(Predicate::new(0, PredicateKind::Edb, 3).is_ok());
    }

    #[test]
    fn test_literal_arity_must_match_predicate() {
        let p = pred(1, PredicateKind::Edb, 2);
        let err = Literal::new(p, [Term::Variable(0)]).unwrap_err();
        assert!(matches!(
            err,
            ReasonerError::UnsupportedArity { predicate: 1, arity: 1 }
        ));
    }

    #[test]
    fn test_var_positions_skip_constants() {
        let p = pred(1, PredicateKind::Edb, 3);
        let lit = Literal::new(
            p,
            [Term::Variable(2), Term::Constant(7), Term::Variable(0)],
        )
        .unwrap();
        let positions: Vec<_> = lit.var_positions().collect();
        assert_eq!(positions, vec![(0, 2), (2, 0)]);
        assert_eq!(lit.n_var_positions(), 2);
        assert_eq!(lit.term_position(1), Some(2));
        assert_eq!(lit.var_at_column(0), Some(2));
    }

    #[test]
    fn test_repeated_variables_constrain_matches() {
        let p = pred(1, PredicateKind::Edb, 3);
        let lit = Literal::new(
            p,
            [Term::Variable(0), Term::Variable(0), Term::Constant(5)],
        )
        .unwrap();
        assert_eq!(lit.vars().as_slice(), &[0]);
        assert_eq!(lit.repeated_vars().as_slice(), &[(0, 1)]);
        assert!(lit.matches(&[3, 3, 5]));
        assert!(!lit.matches(&[3, 4, 5]));
        assert!(!lit.matches(&[3, 3, 6]));
        assert_eq!(lit.project(&[3, 3, 5]).as_slice(), &[3, 3]);
    }

    #[test]
    fn test_instantiate_is_inverse_of_project() {
        let p = pred(1, PredicateKind::Idb, 3);
        let lit = Literal::new(
            p,
            [Term::Variable(0), Term::Constant(9), Term::Variable(1)],
        )
        .unwrap();
        let fact = [4, 9, 8];
        let row = lit.project(&fact);
        assert_eq!(lit.instantiate(&row).as_slice(), &fact);
    }

    #[test]
    fn test_substitute_replaces_every_occurrence() {
        let p = pred(1, PredicateKind::Edb, 2);
        let lit = Literal::new(p, [Term::Variable(0), Term::Variable(0)]).unwrap();
        let bound = lit.substitute(&[(0, 11)]);
        assert_eq!(bound.terms(), &[Term::Constant(11), Term::Constant(11)]);
        assert_eq!(bound.n_var_positions(), 0);
    }

    #[test]
    fn test_rule_classification() {
        let edge = pred(0, PredicateKind::Edb, 2);
        let path = pred(1, PredicateKind::Idb, 2);
        let head = Literal::new(path, [Term::Variable(0), Term::Variable(2)]).unwrap();
        let body = vec![
            Literal::new(path, [Term::Variable(0), Term::Variable(1)]).unwrap(),
            Literal::new(edge, [Term::Variable(1), Term::Variable(2)]).unwrap(),
        ];
        let rule = Rule::new(0, vec![head], body).unwrap();
        assert!(rule.is_recursive());
        assert!(!rule.is_edb_only());
        assert!(!rule.is_existential());
        assert_eq!(rule.idb_body_positions(), vec![0]);
        assert_eq!(rule.frontier_vars(), vec![0, 2]);
    }

    #[test]
    fn test_existential_rule_detection() {
        let person = pred(0, PredicateKind::Edb, 1);
        let parent = pred(1, PredicateKind::Idb, 2);
        let head = Literal::new(parent, [Term::Variable(0), Term::Variable(1)]).unwrap();
        let body = vec![Literal::new(person, [Term::Variable(0)]).unwrap()];
        let rule = Rule::new(3, vec![head], body).unwrap();
        assert!(rule.is_existential());
        assert_eq!(rule.existential_vars(), vec![1]);
        assert_eq!(rule.frontier_vars(), vec![0]);
        assert!(rule.is_edb_only());
    }

    #[test]
    fn test_rule_rejects_edb_head() {
        let edge = pred(0, PredicateKind::Edb, 2);
        let lit = Literal::new(edge, [Term::Variable(0), Term::Variable(1)]).unwrap();
        let err = Rule::new(5, vec![lit.clone()], vec![lit]).unwrap_err();
        assert!(matches!(err, ReasonerError::InvalidRule { rule: 5, .. }));
    }

    #[test]
    fn test_display() {
        let edge = pred(4, PredicateKind::Edb, 2);
        let lit = Literal::new(edge, [Term::Variable(0), Term::Constant(12)]).unwrap();
        assert_eq!(lit.to_string(), "p4(?0,12)");
    }
}

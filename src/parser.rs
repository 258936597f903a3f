//! Text format for rules and facts.
//!
//! ```text
//! % comments run to the end of the line
//! parent(alice, bob).
//! anc(X, Y) :- parent(X, Y).
//! anc(X, Z) :- parent(X, Y), anc(Y, Z).
//! ```
//!
//! Identifiers starting with an upper-case letter are variables, everything
//! else (lower-case identifiers, numbers, `"quoted strings"`, `<iris>`) is a
//! constant. Predicates used in some rule head are derived (IDB); all others
//! are read from the fact store (EDB). Several heads are separated by commas.

use indexmap::{IndexMap, IndexSet};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while},
    character::complete::{char, digit1, multispace1, not_line_ending, satisfy},
    combinator::{cut, map, opt, recognize},
    multi::{many0_count, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::{ReasonerError, Result};
use crate::model::{Literal, PredicateKind, Term, TermId, VarId};
use crate::program::Program;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Var(&'a str),
    Const(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Atom<'a> {
    name: &'a str,
    terms: Vec<Token<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Statement<'a> {
    heads: Vec<Atom<'a>>,
    body: Option<Vec<Atom<'a>>>,
}

fn comment(input: &str) -> IResult<&str, &str> {
    preceded(char('%'), not_line_ending)(input)
}

fn blank(input: &str) -> IResult<&str, usize> {
    many0_count(alt((multispace1, comment)))(input)
}

fn lexeme<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(blank, inner, blank)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    ))(input)
}

fn token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        map(recognize(delimited(char('"'), opt(is_not("\"")), char('"'))), Token::Const),
        map(recognize(delimited(char('<'), is_not(">"), char('>'))), Token::Const),
        map(recognize(pair(opt(char('-')), digit1)), Token::Const),
        map(identifier, |id: &str| {
            if id.starts_with(|c: char| c.is_uppercase()) {
                Token::Var(id)
            } else {
                Token::Const(id)
            }
        }),
    ))(input)
}

fn atom(input: &str) -> IResult<&str, Atom<'_>> {
    map(
        tuple((
            lexeme(identifier),
            char('('),
            cut(separated_list1(char(','), lexeme(token))),
            cut(char(')')),
        )),
        |(name, _, terms, _)| Atom { name, terms },
    )(input)
}

fn atoms(input: &str) -> IResult<&str, Vec<Atom<'_>>> {
    separated_list1(char(','), lexeme(atom))(input)
}

fn statement(input: &str) -> IResult<&str, Statement<'_>> {
    map(
        terminated(
            pair(atoms, opt(preceded(tag(":-"), cut(atoms)))),
            cut(lexeme(char('.'))),
        ),
        |(heads, body)| Statement { heads, body },
    )(input)
}

fn line_of(text: &str, rest: &str) -> usize {
    let offset = text.len() - rest.len();
    text[..offset].matches('\n').count() + 1
}

impl Program {
    /// Parses rules and facts into a new program.
    ///
    /// # Errors
    ///
    /// Returns [`ReasonerError::Parse`] for malformed text, and the
    /// [`Program`] registration errors for inconsistent arities, facts of
    /// derived predicates or invalid rules.
    pub fn parse(text: &str) -> Result<Program> {
        let mut statements = Vec::new();
        let mut rest = text;
        loop {
            let (after_blank, _) = blank(rest).map_err(|_| ReasonerError::Parse {
                line: line_of(text, rest),
                message: "unreadable input".to_string(),
            })?;
            rest = after_blank;
            if rest.is_empty() {
                break;
            }
            let line = line_of(text, rest);
            match statement(rest) {
                Ok((next, parsed)) => {
                    statements.push((line, parsed));
                    rest = next;
                }
                Err(err) => {
                    let near = match &err {
                        nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
                        nom::Err::Incomplete(_) => rest,
                    };
                    let snippet: String = near.chars().take(24).collect();
                    return Err(ReasonerError::Parse {
                        line,
                        message: format!("unexpected input near `{}`", snippet.trim_end()),
                    });
                }
            }
        }
        log::debug!("Parsed {} statements", statements.len());
        Self::from_statements(&statements)
    }

    fn from_statements(statements: &[(usize, Statement<'_>)]) -> Result<Program> {
        let derived: IndexSet<&str> = statements
            .iter()
            .filter(|(_, s)| s.body.is_some())
            .flat_map(|(_, s)| s.heads.iter().map(|a| a.name))
            .collect();
        let mut program = Program::new();
        for (line, statement) in statements {
            match &statement.body {
                Some(body) => {
                    let mut vars: IndexMap<&str, VarId> = IndexMap::new();
                    let heads = program.literals(&statement.heads, &derived, &mut vars, *line)?;
                    let body = program.literals(body, &derived, &mut vars, *line)?;
                    program.add_rule(heads, body)?;
                }
                None => {
                    for atom in &statement.heads {
                        if derived.contains(atom.name) {
                            return Err(ReasonerError::Parse {
                                line: *line,
                                message: format!(
                                    "`{}` is derived by rules and cannot have facts",
                                    atom.name
                                ),
                            });
                        }
                        let predicate =
                            program.declare(atom.name, PredicateKind::Edb, atom.terms.len())?;
                        let mut fact: Vec<TermId> = Vec::with_capacity(atom.terms.len());
                        for term in &atom.terms {
                            match term {
                                Token::Const(c) => fact.push(program.intern(c)),
                                Token::Var(v) => {
                                    return Err(ReasonerError::Parse {
                                        line: *line,
                                        message: format!("fact contains variable `{v}`"),
                                    })
                                }
                            }
                        }
                        program.add_fact(predicate, &fact)?;
                    }
                }
            }
        }
        Ok(program)
    }

    fn literals<'a>(
        &mut self,
        atoms: &[Atom<'a>],
        derived: &IndexSet<&str>,
        vars: &mut IndexMap<&'a str, VarId>,
        line: usize,
    ) -> Result<Vec<Literal>> {
        atoms
            .iter()
            .map(|atom| {
                let kind = if derived.contains(atom.name) {
                    PredicateKind::Idb
                } else {
                    PredicateKind::Edb
                };
                let predicate = self.declare(atom.name, kind, atom.terms.len())?;
                let mut terms = Vec::with_capacity(atom.terms.len());
                for token in &atom.terms {
                    terms.push(match token {
                        Token::Const(c) => Term::Constant(self.intern(c)),
                        Token::Var(v) => {
                            let next = vars.len();
                            let id = match vars.get(v) {
                                Some(id) => *id,
                                None => {
                                    let id = VarId::try_from(next).map_err(|_| {
                                        ReasonerError::Parse {
                                            line,
                                            message: "too many variables in one rule".to_string(),
                                        }
                                    })?;
                                    vars.insert(*v, id);
                                    id
                                }
                            };
                            Term::Variable(id)
                        }
                    });
                }
                Literal::new(predicate, terms)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules_and_facts() {
        let program = Program::parse(
            "% family\n\
             parent(a, b). parent(b, c).\n\
             anc(X, Y) :- parent(X, Y).\n\
             anc(X, Z) :- parent(X, Y), anc(Y, Z).\n",
        )
        .unwrap();
        assert_eq!(program.rules().len(), 2);
        assert_eq!(program.facts().len(), 2);
        let anc = program.predicate("anc").unwrap();
        let parent = program.predicate("parent").unwrap();
        assert!(anc.is_idb());
        assert!(parent.is_edb());
        let recursive = &program.rules()[1];
        assert!(recursive.is_recursive());
        assert_eq!(
            recursive.body()[1].terms(),
            &[Term::Variable(2), Term::Variable(1)][..],
            "Variables are numbered per rule in order of first occurrence"
        );
    }

    #[test]
    fn test_constants_in_rules_and_multiple_heads() {
        let program = Program::parse(
            r#"tagged(X, "red"), seen(X) :- item(X, 42), kind(X, <http://x/y>)."#,
        )
        .unwrap();
        let rule = &program.rules()[0];
        assert_eq!(rule.heads().len(), 2);
        let red = program.constant("\"red\"").unwrap();
        assert_eq!(rule.heads()[0].terms()[1], Term::Constant(red));
        assert!(program.constant("42").is_some());
        assert!(program.constant("<http://x/y>").is_some());
    }

    #[test]
    fn test_existential_head_variable() {
        let program = Program::parse("hasParent(X, Y) :- person(X).").unwrap();
        assert_eq!(program.rules()[0].existential_vars(), vec![1]);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = Program::parse("p(a).\nq(X) :- p(X)\n").unwrap_err();
        assert!(
            matches!(err, ReasonerError::Parse { line: 2, .. }),
            "Missing full stop must be reported on line 2, got {err}"
        );
        let err = Program::parse("p(a).\nq(X :- p(X).").unwrap_err();
        assert!(matches!(err, ReasonerError::Parse { line: 2, .. }), "got {err}");
    }

    #[test]
    fn test_facts_of_derived_predicates_are_rejected() {
        let err = Program::parse("q(a).\nq(X) :- p(X).").unwrap_err();
        assert!(matches!(err, ReasonerError::Parse { line: 1, .. }), "got {err}");
    }

    #[test]
    fn test_arity_conflict_is_rejected() {
        let err = Program::parse("p(a).\np(a, b).").unwrap_err();
        assert!(matches!(err, ReasonerError::ShapeMismatch { .. }), "got {err}");
    }
}

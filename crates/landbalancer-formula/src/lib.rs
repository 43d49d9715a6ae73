//! Balancing-formula grammar.
//!
//! The balancer communicates with the parameter engine through small
//! algebraic expression strings ("formulas"): parameter names combined with
//! float literals, `+ - * /`, unary minus and parentheses, e.g.
//!
//! ```text
//! (1*(land_param_2 + land_param_3)-0)/(land_param_0 + land_param_1)
//! land_param_0 * scaling
//! ```
//!
//! This crate defines the typed AST for that grammar, a nom parser, an
//! evaluator against a name-lookup environment, and referenced-name
//! extraction for dependency ordering. `inf` is a valid literal: static
//! ratios over a zero denominator are formatted as IEEE infinity.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char as pchar, multispace0},
    combinator::{all_consuming, map, recognize},
    number::complete::double,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("formula parse error: {message}")]
    Parse { message: String },
    #[error("unknown parameter `{name}` in formula")]
    UnknownParameter { name: String },
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormulaExpr {
    Number(f64),
    Param(String),
    Neg(Box<FormulaExpr>),
    Binary {
        op: BinaryOp,
        lhs: Box<FormulaExpr>,
        rhs: Box<FormulaExpr>,
    },
}

impl FormulaExpr {
    fn binary(op: BinaryOp, lhs: FormulaExpr, rhs: FormulaExpr) -> Self {
        FormulaExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Evaluate against a parameter environment. Division by zero follows
    /// IEEE semantics (yields infinity), matching how static ratios are
    /// computed and serialized; an unresolved name is an error.
    pub fn eval<F>(&self, lookup: &F) -> Result<f64, FormulaError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            FormulaExpr::Number(value) => Ok(*value),
            FormulaExpr::Param(name) => lookup(name).ok_or_else(|| FormulaError::UnknownParameter {
                name: name.clone(),
            }),
            FormulaExpr::Neg(inner) => Ok(-inner.eval(lookup)?),
            FormulaExpr::Binary { op, lhs, rhs } => {
                let l = lhs.eval(lookup)?;
                let r = rhs.eval(lookup)?;
                Ok(match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                })
            }
        }
    }

    /// Names of all parameters referenced by this expression.
    pub fn params(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_params(&mut names);
        names
    }

    fn collect_params<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            FormulaExpr::Number(_) => {}
            FormulaExpr::Param(name) => {
                names.insert(name.as_str());
            }
            FormulaExpr::Neg(inner) => inner.collect_params(names),
            FormulaExpr::Binary { lhs, rhs, .. } => {
                lhs.collect_params(names);
                rhs.collect_params(names);
            }
        }
    }
}

/// Fully parenthesized rendering; parses back to the same tree.
impl fmt::Display for FormulaExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaExpr::Number(value) => write!(f, "{}", value),
            FormulaExpr::Param(name) => write!(f, "{}", name),
            FormulaExpr::Neg(inner) => write!(f, "(-{})", inner),
            FormulaExpr::Binary { op, lhs, rhs } => {
                write!(f, "({} {} {})", lhs, op.symbol(), rhs)
            }
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn primary(input: &str) -> IResult<&str, FormulaExpr> {
    preceded(
        multispace0,
        alt((
            delimited(pchar('('), expr, preceded(multispace0, pchar(')'))),
            // Identifiers before numeric literals so a name can never be
            // half-consumed as a float; `inf` is the one keyword.
            map(identifier, |name| {
                if name == "inf" {
                    FormulaExpr::Number(f64::INFINITY)
                } else {
                    FormulaExpr::Param(name.to_string())
                }
            }),
            map(double, FormulaExpr::Number),
        )),
    )(input)
}

fn factor(input: &str) -> IResult<&str, FormulaExpr> {
    preceded(
        multispace0,
        alt((
            map(preceded(pchar('-'), factor), |inner| {
                FormulaExpr::Neg(Box::new(inner))
            }),
            primary,
        )),
    )(input)
}

fn term(input: &str) -> IResult<&str, FormulaExpr> {
    let (mut input, mut acc) = factor(input)?;
    loop {
        let op = preceded(multispace0, alt((pchar('*'), pchar('/'))))(input);
        match op {
            Ok((rest, symbol)) => {
                let (rest, rhs) = factor(rest)?;
                let op = if symbol == '*' { BinaryOp::Mul } else { BinaryOp::Div };
                acc = FormulaExpr::binary(op, acc, rhs);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, acc))
}

fn expr(input: &str) -> IResult<&str, FormulaExpr> {
    let (mut input, mut acc) = term(input)?;
    loop {
        let op = preceded(multispace0, alt((pchar('+'), pchar('-'))))(input);
        match op {
            Ok((rest, symbol)) => {
                let (rest, rhs) = term(rest)?;
                let op = if symbol == '+' { BinaryOp::Add } else { BinaryOp::Sub };
                acc = FormulaExpr::binary(op, acc, rhs);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, acc))
}

/// Parse a complete formula string.
pub fn parse_formula(input: &str) -> Result<FormulaExpr, FormulaError> {
    match all_consuming(terminated(expr, multispace0))(input) {
        Ok((_, parsed)) => Ok(parsed),
        Err(e) => Err(FormulaError::Parse {
            message: e.to_string(),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn env(pairs: &[(&str, f64)]) -> impl Fn(&str) -> Option<f64> {
        let owned: Vec<(String, f64)> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        move |name: &str| {
            owned
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, value)| *value)
        }
    }

    #[test]
    fn parses_scaling_formula_shape() {
        let parsed =
            parse_formula("(2*(land_param_2 + land_param_3)-0)/(land_param_0 + land_param_1)")
                .unwrap();
        let names = parsed.params();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            ["land_param_0", "land_param_1", "land_param_2", "land_param_3"]
        );
        let value = parsed
            .eval(&env(&[
                ("land_param_0", 2.0),
                ("land_param_1", 4.0),
                ("land_param_2", 1.0),
                ("land_param_3", 2.0),
            ]))
            .unwrap();
        assert_relative_eq!(value, 1.0);
    }

    #[test]
    fn precedence_and_associativity() {
        let parsed = parse_formula("1 + 2 * 3 - 4 / 2").unwrap();
        assert_relative_eq!(parsed.eval(&env(&[])).unwrap(), 5.0);

        let parsed = parse_formula("8 / 4 / 2").unwrap();
        assert_relative_eq!(parsed.eval(&env(&[])).unwrap(), 1.0);
    }

    #[test]
    fn unary_minus() {
        let parsed = parse_formula("-x * 3").unwrap();
        assert_relative_eq!(parsed.eval(&env(&[("x", 2.0)])).unwrap(), -6.0);
    }

    #[test]
    fn inf_literal() {
        let parsed = parse_formula("(inf*out_0-0)/(in_0)").unwrap();
        let value = parsed.eval(&env(&[("out_0", 1.0), ("in_0", 2.0)])).unwrap();
        assert!(value.is_infinite());
    }

    #[test]
    fn division_by_zero_is_infinite() {
        let parsed = parse_formula("1 / 0").unwrap();
        assert!(parsed.eval(&env(&[])).unwrap().is_infinite());
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        let parsed = parse_formula("a + b").unwrap();
        let err = parsed.eval(&env(&[("a", 1.0)])).unwrap_err();
        assert_eq!(
            err,
            FormulaError::UnknownParameter {
                name: "b".to_string()
            }
        );
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(matches!(
            parse_formula("a + "),
            Err(FormulaError::Parse { .. })
        ));
        assert!(matches!(
            parse_formula("a b"),
            Err(FormulaError::Parse { .. })
        ));
    }

    fn arb_expr() -> impl Strategy<Value = FormulaExpr> {
        let leaf = prop_oneof![
            (0.001f64..1000.0).prop_map(FormulaExpr::Number),
            prop_oneof![Just("x"), Just("scaling"), Just("land_param_0")]
                .prop_map(|name| FormulaExpr::Param(name.to_string())),
        ];
        leaf.prop_recursive(4, 32, 2, |inner| {
            prop_oneof![
                inner.clone().prop_map(|e| FormulaExpr::Neg(Box::new(e))),
                (
                    prop_oneof![
                        Just(BinaryOp::Add),
                        Just(BinaryOp::Sub),
                        Just(BinaryOp::Mul),
                        Just(BinaryOp::Div)
                    ],
                    inner.clone(),
                    inner
                )
                    .prop_map(|(op, lhs, rhs)| FormulaExpr::binary(op, lhs, rhs)),
            ]
        })
    }

    proptest! {
        #[test]
        fn display_round_trips(expr in arb_expr()) {
            let rendered = expr.to_string();
            let reparsed = parse_formula(&rendered).unwrap();
            let lookup = env(&[("x", 1.5), ("scaling", 0.25), ("land_param_0", 3.0)]);
            let a = expr.eval(&lookup).unwrap();
            let b = reparsed.eval(&lookup).unwrap();
            // Same tree, so bitwise-equal evaluation (NaN possible via inf - inf).
            prop_assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }
}

//! Symbolic expressions for circuit coefficients.
//!
//! Expressions arrive from the circuit description in terms of named
//! parameters, are partially substituted with the values of parameters that are
//! held fixed over a sweep, and are finally evaluated to numbers at every sweep
//! point. Constant sub-trees are folded as soon as they are formed, so a fully
//! substituted expression is a single [`Expr::Constant`].

use std::{ fmt, ops::{ Add, Sub, Mul, Div, Neg } };
use ndarray as nd;
use rustc_hash::{ FxHashMap as HashMap, FxHashSet as HashSet };
use crate::error::{ CqedError, CqedResult };

/// Mapping from parameter symbols to numerical values.
pub type Subs = HashMap<String, f64>;

/// Matrix of symbolic expressions.
pub type SymMatrix = nd::Array2<Expr>;

/// Vector of symbolic expressions.
pub type SymVector = nd::Array1<Expr>;

/// Expression tree node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Numeric constant.
    Constant(f64),
    /// Named parameter.
    Symbol(String),
    /// Binary operation.
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation.
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

/// Binary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn apply(self, l: f64, r: f64) -> f64 {
        match self {
            Self::Add => l + r,
            Self::Sub => l - r,
            Self::Mul => l * r,
            Self::Div => l / r,
            Self::Pow => l.powf(r),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
        }
    }
}

/// Unary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Sqrt,
}

impl UnaryOp {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Neg => -x,
            Self::Sqrt => x.sqrt(),
        }
    }
}

impl Default for Expr {
    fn default() -> Self { Self::Constant(0.0) }
}

impl From<f64> for Expr {
    fn from(x: f64) -> Self { Self::Constant(x) }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self { Self::Symbol(name.to_string()) }
}

impl Expr {
    /// Create a new named parameter.
    pub fn sym<S>(name: S) -> Self
    where S: Into<String>
    {
        Self::Symbol(name.into())
    }

    /// Create a new numeric constant.
    pub fn constant(x: f64) -> Self { Self::Constant(x) }

    /// Return the value of `self` if it is a constant.
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Self::Constant(x) => Some(*x),
            _ => None,
        }
    }

    /// Return `true` if `self` is the constant zero.
    pub fn is_zero(&self) -> bool { self.as_constant() == Some(0.0) }

    pub fn sqrt(self) -> Self { Self::unary(UnaryOp::Sqrt, self) }

    pub fn recip(self) -> Self { Self::binary(BinaryOp::Div, 1.0.into(), self) }

    pub fn pow(self, exp: Self) -> Self {
        Self::binary(BinaryOp::Pow, self, exp)
    }

    fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        use BinaryOp as Op;
        match (op, left.as_constant(), right.as_constant()) {
            (_, Some(l), Some(r)) => Self::Constant(op.apply(l, r)),
            (Op::Add, Some(z), None) if z == 0.0 => right,
            (Op::Add | Op::Sub, None, Some(z)) if z == 0.0 => left,
            (Op::Mul, Some(z), _) | (Op::Mul, _, Some(z)) if z == 0.0
                => Self::Constant(0.0),
            (Op::Mul, Some(u), None) if u == 1.0 => right,
            (Op::Mul | Op::Div | Op::Pow, None, Some(u)) if u == 1.0 => left,
            _ => Self::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    fn unary(op: UnaryOp, operand: Self) -> Self {
        match operand.as_constant() {
            Some(x) => Self::Constant(op.apply(x)),
            None => Self::UnaryOp { op, operand: Box::new(operand) },
        }
    }

    /// Replace every symbol with a value in `vals` and fold the resulting
    /// constants. Symbols without a value are left in place.
    pub fn subs(&self, vals: &Subs) -> Self {
        match self {
            Self::Constant(x) => Self::Constant(*x),
            Self::Symbol(name) => match vals.get(name) {
                Some(x) => Self::Constant(*x),
                None => self.clone(),
            },
            Self::BinaryOp { op, left, right }
                => Self::binary(*op, left.subs(vals), right.subs(vals)),
            Self::UnaryOp { op, operand }
                => Self::unary(*op, operand.subs(vals)),
        }
    }

    /// Replace every occurrence of `symbol` with another expression.
    pub fn subs_expr(&self, symbol: &str, replacement: &Self) -> Self {
        match self {
            Self::Constant(x) => Self::Constant(*x),
            Self::Symbol(name) if name == symbol => replacement.clone(),
            Self::Symbol(_) => self.clone(),
            Self::BinaryOp { op, left, right }
                => Self::binary(
                    *op,
                    left.subs_expr(symbol, replacement),
                    right.subs_expr(symbol, replacement),
                ),
            Self::UnaryOp { op, operand }
                => Self::unary(*op, operand.subs_expr(symbol, replacement)),
        }
    }

    /// Evaluate to a number, failing on the first symbol without a value.
    pub fn eval(&self, vals: &Subs) -> CqedResult<f64> {
        match self {
            Self::Constant(x) => Ok(*x),
            Self::Symbol(name) => vals.get(name).copied()
                .ok_or_else(|| CqedError::unresolved(name.as_str())),
            Self::BinaryOp { op, left, right }
                => Ok(op.apply(left.eval(vals)?, right.eval(vals)?)),
            Self::UnaryOp { op, operand }
                => Ok(op.apply(operand.eval(vals)?)),
        }
    }

    fn collect_symbols<'a>(&'a self, acc: &mut HashSet<&'a str>) {
        match self {
            Self::Constant(_) => { },
            Self::Symbol(name) => { acc.insert(name.as_str()); },
            Self::BinaryOp { left, right, .. } => {
                left.collect_symbols(acc);
                right.collect_symbols(acc);
            },
            Self::UnaryOp { operand, .. } => { operand.collect_symbols(acc); },
        }
    }

    /// Return the sorted list of free symbols in `self`.
    pub fn symbols(&self) -> Vec<String> {
        let mut acc: HashSet<&str> = HashSet::default();
        self.collect_symbols(&mut acc);
        let mut syms: Vec<String>
            = acc.into_iter().map(|s| s.to_string()).collect();
        syms.sort();
        syms
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(x) => write!(f, "{x}"),
            Self::Symbol(name) => write!(f, "{name}"),
            Self::BinaryOp { op, left, right }
                => write!(f, "({} {} {})", left, op.symbol(), right),
            Self::UnaryOp { op: UnaryOp::Neg, operand }
                => write!(f, "-{operand}"),
            Self::UnaryOp { op: UnaryOp::Sqrt, operand }
                => write!(f, "sqrt({operand})"),
        }
    }
}

macro_rules! impl_binop {
    ( $trait:ident, $method:ident, $op:ident ) => {
        impl $trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary(BinaryOp::$op, self, rhs)
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;

            fn $method(self, rhs: f64) -> Expr {
                Expr::binary(BinaryOp::$op, self, Expr::Constant(rhs))
            }
        }
    }
}
impl_binop!(Add, add, Add);
impl_binop!(Sub, sub, Sub);
impl_binop!(Mul, mul, Mul);
impl_binop!(Div, div, Div);

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr { Expr::unary(UnaryOp::Neg, self) }
}

/// Evaluate every element of a symbolic array.
///
/// Errors name the offending element as `label[index]`.
pub fn eval_array<D>(arr: &nd::Array<Expr, D>, vals: &Subs, label: &str)
    -> CqedResult<nd::Array<f64, D>>
where D: nd::Dimension
{
    let mut values: Vec<f64> = Vec::with_capacity(arr.len());
    for (idx, e) in arr.indexed_iter() {
        let x = e.eval(vals)
            .map_err(|err| match err {
                CqedError::Substitution { symbol, detail } => {
                    CqedError::Substitution {
                        symbol,
                        detail: format!("{detail} (in {label}{idx:?})"),
                    }
                },
                other => other,
            })?;
        if !x.is_finite() {
            return Err(CqedError::non_finite(format!("{label}{idx:?}"), x));
        }
        values.push(x);
    }
    Ok(nd::Array::from_shape_vec(arr.raw_dim(), values)?)
}

/// Compute `L · M · R` for numeric `L`, `R` and symbolic `M`.
pub fn sandwich(L: &nd::Array2<f64>, M: &SymMatrix, R: &nd::Array2<f64>)
    -> CqedResult<SymMatrix>
{
    if L.ncols() != M.nrows() || M.ncols() != R.nrows() {
        return Err(CqedError::config(format!(
            "cannot form a {}x{} * {}x{} * {}x{} product",
            L.nrows(), L.ncols(), M.nrows(), M.ncols(), R.nrows(), R.ncols(),
        )));
    }
    let mut out: SymMatrix = SymMatrix::default((L.nrows(), R.ncols()));
    for ((i, j), elem) in out.indexed_iter_mut() {
        let mut acc = Expr::Constant(0.0);
        for ((k, l), m) in M.indexed_iter() {
            let coeff = L[[i, k]] * R[[l, j]];
            if coeff == 0.0 || m.is_zero() { continue; }
            acc = acc + m.clone() * coeff;
        }
        *elem = acc;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn subs(pairs: &[(&str, f64)]) -> Subs {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn partial_substitution_keeps_free_symbols() {
        let e = Expr::sym("a") * Expr::sym("b") + 2.0;
        let p = e.subs(&subs(&[("a", 3.0)]));
        assert_eq!(p.symbols(), vec!["b".to_string()]);
        assert_relative_eq!(p.eval(&subs(&[("b", 4.0)])).unwrap(), 14.0);
    }

    #[test]
    fn full_substitution_folds_to_constant() {
        let e = (Expr::sym("C") * 2.0).recip().sqrt();
        let p = e.subs(&subs(&[("C", 2.0)]));
        assert_eq!(p, Expr::Constant(0.5));
    }

    #[test]
    fn unresolved_symbol_is_named() {
        let e = Expr::sym("EJ") + Expr::sym("EC");
        match e.eval(&subs(&[("EJ", 1.0)])) {
            Err(CqedError::Substitution { symbol, .. })
                => assert_eq!(symbol, "EC"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn non_finite_element_is_rejected() {
        let m: SymVector = nd::array![Expr::sym("C").recip()];
        let res = eval_array(&m, &subs(&[("C", 0.0)]), "Cinv");
        assert!(matches!(res, Err(CqedError::Substitution { .. })));
    }

    #[test]
    fn subs_expr_reparameterises() {
        let e = Expr::sym("C1").recip();
        let r = e.subs_expr("C1", &(Expr::sym("Ca") + Expr::sym("Cb")));
        assert_relative_eq!(
            r.eval(&subs(&[("Ca", 1.0), ("Cb", 3.0)])).unwrap(), 0.25);
    }

    #[test]
    fn sandwich_transforms_matrix() {
        let M: SymMatrix = nd::array![
            [Expr::sym("a"), Expr::Constant(0.0)],
            [Expr::Constant(0.0), Expr::sym("b")],
        ];
        let R = nd::array![[1.0, 1.0], [0.0, 1.0]];
        let T = sandwich(&R, &M, &R.t().to_owned()).unwrap();
        let v = eval_array(&T, &subs(&[("a", 2.0), ("b", 5.0)]), "T").unwrap();
        assert_eq!(v, nd::array![[7.0, 5.0], [5.0, 5.0]]);
    }
}

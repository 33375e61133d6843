//! Coercion of native values into terms, and the `r` query root.
//!
//! Every value attached to a query goes through one of two traits:
//!
//! - [`IntoTerm`]: infallible, for terms and scalars. Builder methods take this.
//! - [`ToTerm`]: checked, for nested data (`Datum`, `serde_json::Value`,
//!   vectors, maps). Sequences become MAKE_ARRAY terms and mappings become
//!   MAKE_OBJ terms, recursively, with the nesting depth bounded by
//!   [`NESTING_DEPTH`].
//!
//! Functions are built through [`Reql::func`], which allocates fresh variable
//! ids from a [`VarIdAllocator`] shared by every clone of the root.

use super::ast::Term;
use super::datum::Datum;
use super::terms::TermType;
use crate::error::{ReqlError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Default ceiling on container nesting accepted by [`Reql::expr`].
pub const NESTING_DEPTH: usize = 20;

/// Infallible conversion for terms and scalars.
pub trait IntoTerm {
    fn into_term(self) -> Term;
}

impl IntoTerm for Term {
    fn into_term(self) -> Term {
        self
    }
}

impl IntoTerm for &Term {
    fn into_term(self) -> Term {
        self.clone()
    }
}

impl IntoTerm for &str {
    fn into_term(self) -> Term {
        Term::datum(Datum::from(self))
    }
}

impl IntoTerm for String {
    fn into_term(self) -> Term {
        Term::datum(Datum::String(self))
    }
}

impl IntoTerm for &String {
    fn into_term(self) -> Term {
        Term::datum(Datum::String(self.clone()))
    }
}

impl IntoTerm for bool {
    fn into_term(self) -> Term {
        Term::datum(Datum::Boolean(self))
    }
}

macro_rules! numeric_terms {
    ($($ty:ty),*) => {
        $(
            impl IntoTerm for $ty {
                fn into_term(self) -> Term {
                    Term::datum(Datum::Number(self as f64))
                }
            }

            impl ToTerm for $ty {
                fn to_term_depth(self, depth: usize) -> Result<Term> {
                    check_depth(depth)?;
                    let n = self as f64;
                    if !n.is_finite() {
                        return Err(ReqlError::driver(format!(
                            "Cannot convert non-finite number {} to a query term.",
                            n
                        )));
                    }
                    Ok(Term::datum(Datum::Number(n)))
                }
            }
        )*
    };
}

numeric_terms!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

/// Checked conversion into a term, bounded by a nesting depth.
pub trait ToTerm {
    /// Convert with `depth` levels of nesting still allowed.
    fn to_term_depth(self, depth: usize) -> Result<Term>;

    fn to_term(self) -> Result<Term>
    where
        Self: Sized,
    {
        self.to_term_depth(NESTING_DEPTH)
    }
}

fn check_depth(depth: usize) -> Result<()> {
    if depth == 0 {
        return Err(ReqlError::driver("Nesting depth limit exceeded."));
    }
    Ok(())
}

impl ToTerm for Term {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        Ok(self)
    }
}

impl ToTerm for &Term {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        Ok(self.clone())
    }
}

impl ToTerm for bool {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        Ok(self.into_term())
    }
}

impl ToTerm for &str {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        Ok(self.into_term())
    }
}

impl ToTerm for String {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        Ok(self.into_term())
    }
}

impl ToTerm for Datum {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        match self {
            Datum::Number(n) => n.to_term_depth(depth),
            Datum::Array(items) => items.to_term_depth(depth),
            Datum::Object(obj) => obj.to_term_depth(depth),
            other => Ok(Term::datum(other)),
        }
    }
}

impl ToTerm for serde_json::Value {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        Datum::from(self).to_term_depth(depth)
    }
}

impl<T: ToTerm> ToTerm for Option<T> {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        match self {
            Some(value) => value.to_term_depth(depth),
            None => {
                check_depth(depth)?;
                Ok(Term::datum(Datum::Null))
            }
        }
    }
}

impl<T: ToTerm> ToTerm for Vec<T> {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        let items = self
            .into_iter()
            .map(|item| item.to_term_depth(depth - 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Term::new(TermType::MakeArray).with_args(items))
    }
}

impl<T: ToTerm> ToTerm for BTreeMap<String, T> {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        let fields = self
            .into_iter()
            .map(|(k, v)| v.to_term_depth(depth - 1).map(|t| (k, t)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Term::new(TermType::MakeObj).with_optargs(fields))
    }
}

impl<T: ToTerm> ToTerm for HashMap<String, T> {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        self.into_iter().collect::<BTreeMap<_, _>>().to_term_depth(depth)
    }
}

impl ToTerm for DateTime<FixedOffset> {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        check_depth(depth)?;
        Ok(Term::datum(Datum::Time(self)))
    }
}

impl ToTerm for DateTime<Utc> {
    fn to_term_depth(self, depth: usize) -> Result<Term> {
        self.fixed_offset().to_term_depth(depth)
    }
}

/// Hands out function parameter ids. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct VarIdAllocator {
    next: Arc<Mutex<u64>>,
}

impl VarIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `n` consecutive ids, starting at 1 for a fresh allocator.
    pub fn allocate(&self, n: usize) -> Vec<u64> {
        let mut next = self.next.lock();
        (0..n)
            .map(|_| {
                *next += 1;
                *next
            })
            .collect()
    }
}

/// The query root, conventionally bound as `r`.
#[derive(Debug, Clone, Default)]
pub struct Reql {
    vars: VarIdAllocator,
}

impl Reql {
    pub fn new() -> Self {
        Self::default()
    }

    /// A root drawing variable ids from an existing allocator.
    pub fn with_allocator(vars: VarIdAllocator) -> Self {
        Self { vars }
    }

    /// Coerce any value into a term (the `r.expr` entry point).
    pub fn expr<T: ToTerm>(&self, value: T) -> Result<Term> {
        value.to_term_depth(NESTING_DEPTH)
    }

    pub fn expr_with_depth<T: ToTerm>(&self, value: T, depth: usize) -> Result<Term> {
        value.to_term_depth(depth)
    }

    /// Build a function term: allocates `arity` fresh variables, hands them
    /// to `body` and wraps the result as `FUNC([ids...], body)`.
    pub fn func<F, T>(&self, arity: usize, body: F) -> Term
    where
        F: FnOnce(&[Term]) -> T,
        T: IntoTerm,
    {
        let ids = self.vars.allocate(arity);
        let vars: Vec<Term> = ids.iter().map(|id| Term::var(*id)).collect();
        let body = body(&vars).into_term();
        let params = Term::new(TermType::MakeArray)
            .with_args(ids.into_iter().map(|id| Term::datum(Datum::Number(id as f64))));
        Term::new(TermType::Func).with_arg(params).with_arg(body)
    }

    pub fn func1<F, T>(&self, body: F) -> Term
    where
        F: FnOnce(Term) -> T,
        T: IntoTerm,
    {
        self.func(1, |vars| body(vars[0].clone()))
    }

    pub fn func2<F, T>(&self, body: F) -> Term
    where
        F: FnOnce(Term, Term) -> T,
        T: IntoTerm,
    {
        self.func(2, |vars| body(vars[0].clone(), vars[1].clone()))
    }

    /// `r.row`, the implicit variable of the innermost function.
    pub fn row(&self) -> Term {
        Term::new(TermType::ImplicitVar)
    }

    pub fn db(&self, name: impl IntoTerm) -> Term {
        Term::db(name)
    }

    pub fn db_list(&self) -> Term {
        Term::db_list()
    }

    pub fn db_create(&self, name: impl IntoTerm) -> Term {
        Term::db_create(name)
    }

    pub fn db_drop(&self, name: impl IntoTerm) -> Term {
        Term::db_drop(name)
    }

    /// A table in the connection's default database.
    pub fn table(&self, name: impl IntoTerm) -> Term {
        Term::new(TermType::Table).with_arg(name.into_term())
    }

    pub fn now(&self) -> Term {
        Term::new(TermType::Now)
    }

    pub fn uuid(&self) -> Term {
        Term::new(TermType::Uuid)
    }

    pub fn epoch_time(&self, seconds: impl IntoTerm) -> Term {
        Term::new(TermType::EpochTime).with_arg(seconds.into_term())
    }

    pub fn iso8601(&self, text: impl IntoTerm) -> Term {
        Term::new(TermType::Iso8601).with_arg(text.into_term())
    }

    pub fn range(&self, start: impl IntoTerm, end: impl IntoTerm) -> Term {
        Term::new(TermType::Range)
            .with_arg(start.into_term())
            .with_arg(end.into_term())
    }

    pub fn asc(&self, key: impl IntoTerm) -> Term {
        Term::new(TermType::Asc).with_arg(key.into_term().func_wrap())
    }

    pub fn desc(&self, key: impl IntoTerm) -> Term {
        Term::new(TermType::Desc).with_arg(key.into_term().func_wrap())
    }

    pub fn literal(&self, value: impl IntoTerm) -> Term {
        Term::new(TermType::Literal).with_arg(value.into_term())
    }

    pub fn branch(&self, test: impl IntoTerm, then: impl IntoTerm, otherwise: impl IntoTerm) -> Term {
        Term::new(TermType::Branch)
            .with_arg(test.into_term())
            .with_arg(then.into_term())
            .with_arg(otherwise.into_term())
    }

    pub fn error(&self, message: impl IntoTerm) -> Term {
        Term::new(TermType::Error).with_arg(message.into_term())
    }

    pub fn js(&self, source: impl IntoTerm) -> Term {
        Term::new(TermType::Javascript).with_arg(source.into_term())
    }

    pub fn json(&self, text: impl IntoTerm) -> Term {
        Term::new(TermType::Json).with_arg(text.into_term())
    }

    pub fn binary(&self, bytes: Vec<u8>) -> Term {
        Term::datum(Datum::Binary(bytes))
    }

    pub fn minval(&self) -> Term {
        Term::new(TermType::Minval)
    }

    pub fn maxval(&self) -> Term {
        Term::new(TermType::Maxval)
    }
}

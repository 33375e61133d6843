//! ReQL Abstract Syntax Tree (AST) implementation.
//!
//! A query is a tree of `Term` nodes, where each node has:
//!
//! - A `TermType` specifying the operation
//! - Positional arguments (`args`): child terms
//! - Optional named arguments (`optargs`): unique keys, child terms
//! - A datum value, for literal `DATUM` nodes only
//!
//! Terms are immutable once built; builder methods consume `self` and return
//! a new node.
//!
//! # Wire form
//!
//! [`Term::build`] produces the JSON the server reads:
//!
//! ```json
//! [39, [[15, ["users"]], {"active": true}], {"default": false}]
//! ```
//!
//! i.e. `[code, [args...], {optargs...}]`, with the optargs element omitted
//! when empty. Literal scalars are written as raw JSON, literal arrays as
//! `[2, [...]]` (MAKE_ARRAY) and literal objects as plain JSON objects.
//!
//! # Example
//!
//! Building a query: `r.db("test").table("users").filter({age: 25})`
//!
//! ```rust,ignore
//! use reql_driver::reql::{Reql, Term};
//! use serde_json::json;
//!
//! let r = Reql::new();
//! let query = Term::db("test")
//!     .table("users")
//!     .filter(r.expr(json!({"age": 25}))?);
//! ```

use super::codec;
use super::datum::Datum;
use super::expr::IntoTerm;
use super::terms::TermType;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A ReQL Term - the fundamental building block of queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    term_type: TermType,
    args: Vec<Term>,
    optargs: BTreeMap<String, Term>,
    datum: Option<Datum>,
}

impl Term {
    /// Create a new term with given type
    pub fn new(term_type: TermType) -> Self {
        Self {
            term_type,
            args: Vec::new(),
            optargs: BTreeMap::new(),
            datum: None,
        }
    }

    /// Create a datum term
    pub fn datum(datum: Datum) -> Self {
        Self {
            term_type: TermType::Datum,
            args: Vec::new(),
            optargs: BTreeMap::new(),
            datum: Some(datum),
        }
    }

    /// Reference to a function parameter.
    pub fn var(id: u64) -> Self {
        Term::new(TermType::Var).with_arg(Term::datum(Datum::Number(id as f64)))
    }

    /// Add a positional argument
    pub fn with_arg(mut self, arg: Term) -> Self {
        self.args.push(arg);
        self
    }

    /// Add multiple positional arguments
    pub fn with_args<I: IntoIterator<Item = Term>>(mut self, args: I) -> Self {
        self.args.extend(args);
        self
    }

    /// Add an optional named argument. A repeated key replaces the earlier value.
    pub fn with_optarg<S: Into<String>>(mut self, name: S, value: Term) -> Self {
        self.optargs.insert(name.into(), value);
        self
    }

    /// Add multiple optional arguments
    pub fn with_optargs<I: IntoIterator<Item = (String, Term)>>(mut self, optargs: I) -> Self {
        self.optargs.extend(optargs);
        self
    }

    /// Builder sugar for a single optarg with any term-convertible value.
    pub fn opt<S: Into<String>>(self, name: S, value: impl IntoTerm) -> Self {
        self.with_optarg(name, value.into_term())
    }

    pub fn term_type(&self) -> TermType {
        self.term_type
    }

    pub fn args(&self) -> &[Term] {
        &self.args
    }

    pub fn optargs(&self) -> &BTreeMap<String, Term> {
        &self.optargs
    }

    /// Get the first argument
    pub fn first_arg(&self) -> Option<&Term> {
        self.args.first()
    }

    /// Get argument at index
    pub fn arg(&self, index: usize) -> Option<&Term> {
        self.args.get(index)
    }

    /// Get optional argument by name
    pub fn optarg(&self, name: &str) -> Option<&Term> {
        self.optargs.get(name)
    }

    /// Check if this is a datum term
    pub fn is_datum(&self) -> bool {
        self.term_type == TermType::Datum
    }

    /// Get datum value if this is a datum term
    pub fn as_datum(&self) -> Option<&Datum> {
        self.datum.as_ref()
    }

    /// Evaluates literal-only trees (DATUM, MAKE_ARRAY, MAKE_OBJ) back into a datum.
    pub fn as_literal(&self) -> Option<Datum> {
        match self.term_type {
            TermType::Datum => self.datum.clone(),
            TermType::MakeArray if self.optargs.is_empty() => self
                .args
                .iter()
                .map(Term::as_literal)
                .collect::<Option<Vec<_>>>()
                .map(Datum::Array),
            TermType::MakeObj if self.args.is_empty() => self
                .optargs
                .iter()
                .map(|(k, v)| v.as_literal().map(|d| (k.clone(), d)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Datum::Object),
            _ => None,
        }
    }

    /// True if `r.row` appears anywhere in the tree.
    pub fn contains_implicit_var(&self) -> bool {
        self.term_type == TermType::ImplicitVar
            || self.args.iter().any(Term::contains_implicit_var)
            || self.optargs.values().any(Term::contains_implicit_var)
    }

    /// Largest `VAR` id referenced in the tree, 0 if none.
    pub(crate) fn max_var_id(&self) -> u64 {
        let own = match (self.term_type, self.args.first().and_then(Term::as_datum)) {
            (TermType::Var, Some(Datum::Number(n))) => *n as u64,
            _ => 0,
        };
        self.args
            .iter()
            .chain(self.optargs.values())
            .map(Term::max_var_id)
            .fold(own, u64::max)
    }

    /// True if a NaN or infinite number appears anywhere in the tree. JSON
    /// has no encoding for them.
    pub fn has_non_finite(&self) -> bool {
        self.datum.as_ref().is_some_and(datum_has_non_finite)
            || self.args.iter().any(Term::has_non_finite)
            || self.optargs.values().any(Term::has_non_finite)
    }

    /// Wraps a term that uses `r.row` into a one-argument function. Other
    /// terms are returned unchanged.
    pub fn func_wrap(self) -> Term {
        if !self.contains_implicit_var() {
            return self;
        }
        // A fresh parameter id that cannot capture any variable used in the body.
        let id = self.max_var_id() + 1;
        Term::new(TermType::Func)
            .with_arg(Term::new(TermType::MakeArray).with_arg(Term::datum(Datum::Number(id as f64))))
            .with_arg(self)
    }

    /// Serialize to the wire JSON form.
    pub fn build(&self) -> Value {
        match self.term_type {
            TermType::Datum => build_datum(self.datum.as_ref().unwrap_or(&Datum::Null)),
            TermType::MakeObj if self.args.is_empty() => Value::Object(
                self.optargs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.build()))
                    .collect(),
            ),
            _ => {
                let mut wire = vec![
                    Value::from(self.term_type.to_u64()),
                    Value::Array(self.args.iter().map(Term::build).collect()),
                ];
                if !self.optargs.is_empty() {
                    let optargs: Map<String, Value> = self
                        .optargs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.build()))
                        .collect();
                    wire.push(Value::Object(optargs));
                }
                Value::Array(wire)
            }
        }
    }
}

fn datum_has_non_finite(datum: &Datum) -> bool {
    match datum {
        Datum::Number(n) => !n.is_finite(),
        Datum::Array(items) => items.iter().any(datum_has_non_finite),
        Datum::Object(obj) => obj.values().any(datum_has_non_finite),
        Datum::Grouped(groups) => groups
            .iter()
            .any(|(k, v)| datum_has_non_finite(k) || datum_has_non_finite(v)),
        _ => false,
    }
}

/// Literal data inside a query: nested arrays must become MAKE_ARRAY terms,
/// since a bare JSON array in a query is read as a term.
fn build_datum(datum: &Datum) -> Value {
    match datum {
        Datum::Array(items) => Value::Array(vec![
            Value::from(TermType::MakeArray.to_u64()),
            Value::Array(items.iter().map(build_datum).collect()),
        ]),
        Datum::Object(obj) => {
            Value::Object(obj.iter().map(|(k, v)| (k.clone(), build_datum(v))).collect())
        }
        Datum::Time(_) | Datum::Binary(_) | Datum::Grouped(_) => {
            codec::encode_pseudotype(datum, build_datum).unwrap_or(Value::Null)
        }
        scalar => codec::encode(scalar),
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", super::printer::QueryPrinter::new(self, &[]).print_query())
    }
}

// === Top-level constructors ===

impl Term {
    pub fn db(name: impl IntoTerm) -> Self {
        Term::new(TermType::Db).with_arg(name.into_term())
    }

    pub fn db_list() -> Self {
        Term::new(TermType::DbList)
    }

    pub fn db_create(name: impl IntoTerm) -> Self {
        Term::new(TermType::DbCreate).with_arg(name.into_term())
    }

    pub fn db_drop(name: impl IntoTerm) -> Self {
        Term::new(TermType::DbDrop).with_arg(name.into_term())
    }
}

// === Method-style constructors: `self` becomes the first argument ===

impl Term {
    fn method(self, term_type: TermType, rest: Vec<Term>) -> Term {
        Term::new(term_type).with_arg(self).with_args(rest)
    }

    // Tables and indexes
    pub fn table(self, name: impl IntoTerm) -> Term {
        self.method(TermType::Table, vec![name.into_term()])
    }

    pub fn table_create(self, name: impl IntoTerm) -> Term {
        self.method(TermType::TableCreate, vec![name.into_term()])
    }

    pub fn table_drop(self, name: impl IntoTerm) -> Term {
        self.method(TermType::TableDrop, vec![name.into_term()])
    }

    pub fn table_list(self) -> Term {
        self.method(TermType::TableList, vec![])
    }

    pub fn index_create(self, name: impl IntoTerm) -> Term {
        self.method(TermType::IndexCreate, vec![name.into_term()])
    }

    pub fn index_drop(self, name: impl IntoTerm) -> Term {
        self.method(TermType::IndexDrop, vec![name.into_term()])
    }

    pub fn index_list(self) -> Term {
        self.method(TermType::IndexList, vec![])
    }

    pub fn index_wait(self) -> Term {
        self.method(TermType::IndexWait, vec![])
    }

    pub fn config(self) -> Term {
        self.method(TermType::Config, vec![])
    }

    pub fn status(self) -> Term {
        self.method(TermType::Status, vec![])
    }

    pub fn sync(self) -> Term {
        self.method(TermType::Sync, vec![])
    }

    // Data access
    pub fn get(self, key: impl IntoTerm) -> Term {
        self.method(TermType::Get, vec![key.into_term()])
    }

    pub fn get_all<I, T>(self, keys: I) -> Term
    where
        I: IntoIterator<Item = T>,
        T: IntoTerm,
    {
        let keys = keys.into_iter().map(IntoTerm::into_term).collect();
        self.method(TermType::GetAll, keys)
    }

    pub fn between(self, lower: impl IntoTerm, upper: impl IntoTerm) -> Term {
        self.method(TermType::Between, vec![lower.into_term(), upper.into_term()])
    }

    pub fn changes(self) -> Term {
        self.method(TermType::Changes, vec![])
    }

    // Transformations
    pub fn filter(self, predicate: impl IntoTerm) -> Term {
        self.method(TermType::Filter, vec![predicate.into_term().func_wrap()])
    }

    pub fn map(self, mapping: impl IntoTerm) -> Term {
        self.method(TermType::Map, vec![mapping.into_term().func_wrap()])
    }

    pub fn concat_map(self, mapping: impl IntoTerm) -> Term {
        self.method(TermType::ConcatMap, vec![mapping.into_term().func_wrap()])
    }

    pub fn order_by(self, key: impl IntoTerm) -> Term {
        self.method(TermType::OrderBy, vec![key.into_term().func_wrap()])
    }

    pub fn distinct(self) -> Term {
        self.method(TermType::Distinct, vec![])
    }

    pub fn limit(self, n: impl IntoTerm) -> Term {
        self.method(TermType::Limit, vec![n.into_term()])
    }

    pub fn skip(self, n: impl IntoTerm) -> Term {
        self.method(TermType::Skip, vec![n.into_term()])
    }

    pub fn nth(self, n: impl IntoTerm) -> Term {
        self.method(TermType::Nth, vec![n.into_term()])
    }

    pub fn slice(self, start: impl IntoTerm, end: impl IntoTerm) -> Term {
        self.method(TermType::Slice, vec![start.into_term(), end.into_term()])
    }

    pub fn union(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Union, vec![other.into_term()])
    }

    pub fn eq_join(self, field: impl IntoTerm, table: impl IntoTerm) -> Term {
        self.method(TermType::EqJoin, vec![field.into_term().func_wrap(), table.into_term()])
    }

    pub fn zip(self) -> Term {
        self.method(TermType::Zip, vec![])
    }

    pub fn for_each(self, write: impl IntoTerm) -> Term {
        self.method(TermType::ForEach, vec![write.into_term().func_wrap()])
    }

    // Aggregations
    pub fn count(self) -> Term {
        self.method(TermType::Count, vec![])
    }

    pub fn sum(self, field: impl IntoTerm) -> Term {
        self.method(TermType::Sum, vec![field.into_term().func_wrap()])
    }

    pub fn avg(self, field: impl IntoTerm) -> Term {
        self.method(TermType::Avg, vec![field.into_term().func_wrap()])
    }

    pub fn min(self, field: impl IntoTerm) -> Term {
        self.method(TermType::Min, vec![field.into_term().func_wrap()])
    }

    pub fn max(self, field: impl IntoTerm) -> Term {
        self.method(TermType::Max, vec![field.into_term().func_wrap()])
    }

    pub fn group(self, field: impl IntoTerm) -> Term {
        self.method(TermType::Group, vec![field.into_term().func_wrap()])
    }

    pub fn ungroup(self) -> Term {
        self.method(TermType::Ungroup, vec![])
    }

    pub fn reduce(self, reducer: impl IntoTerm) -> Term {
        self.method(TermType::Reduce, vec![reducer.into_term()])
    }

    // Writes
    pub fn insert(self, documents: impl IntoTerm) -> Term {
        self.method(TermType::Insert, vec![documents.into_term()])
    }

    pub fn update(self, changes: impl IntoTerm) -> Term {
        self.method(TermType::Update, vec![changes.into_term().func_wrap()])
    }

    pub fn replace(self, document: impl IntoTerm) -> Term {
        self.method(TermType::Replace, vec![document.into_term().func_wrap()])
    }

    pub fn delete(self) -> Term {
        self.method(TermType::Delete, vec![])
    }

    // Documents
    pub fn get_field(self, name: impl IntoTerm) -> Term {
        self.method(TermType::GetField, vec![name.into_term()])
    }

    pub fn bracket(self, key: impl IntoTerm) -> Term {
        self.method(TermType::Bracket, vec![key.into_term()])
    }

    pub fn pluck<I, T>(self, fields: I) -> Term
    where
        I: IntoIterator<Item = T>,
        T: IntoTerm,
    {
        let fields = fields.into_iter().map(IntoTerm::into_term).collect();
        self.method(TermType::Pluck, fields)
    }

    pub fn without<I, T>(self, fields: I) -> Term
    where
        I: IntoIterator<Item = T>,
        T: IntoTerm,
    {
        let fields = fields.into_iter().map(IntoTerm::into_term).collect();
        self.method(TermType::Without, fields)
    }

    pub fn merge(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Merge, vec![other.into_term().func_wrap()])
    }

    pub fn has_fields(self, field: impl IntoTerm) -> Term {
        self.method(TermType::HasFields, vec![field.into_term()])
    }

    pub fn keys(self) -> Term {
        self.method(TermType::Keys, vec![])
    }

    pub fn values(self) -> Term {
        self.method(TermType::Values, vec![])
    }

    pub fn contains(self, value: impl IntoTerm) -> Term {
        self.method(TermType::Contains, vec![value.into_term().func_wrap()])
    }

    pub fn append(self, value: impl IntoTerm) -> Term {
        self.method(TermType::Append, vec![value.into_term()])
    }

    pub fn prepend(self, value: impl IntoTerm) -> Term {
        self.method(TermType::Prepend, vec![value.into_term()])
    }

    pub fn default(self, value: impl IntoTerm) -> Term {
        self.method(TermType::Default, vec![value.into_term()])
    }

    pub fn coerce_to(self, type_name: impl IntoTerm) -> Term {
        self.method(TermType::CoerceTo, vec![type_name.into_term()])
    }

    pub fn type_of(self) -> Term {
        self.method(TermType::TypeOf, vec![])
    }

    pub fn info(self) -> Term {
        self.method(TermType::Info, vec![])
    }

    // Math & logic
    pub fn eq(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Eq, vec![other.into_term()])
    }

    pub fn ne(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Ne, vec![other.into_term()])
    }

    pub fn lt(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Lt, vec![other.into_term()])
    }

    pub fn le(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Le, vec![other.into_term()])
    }

    pub fn gt(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Gt, vec![other.into_term()])
    }

    pub fn ge(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Ge, vec![other.into_term()])
    }

    pub fn add(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Add, vec![other.into_term()])
    }

    pub fn sub(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Sub, vec![other.into_term()])
    }

    pub fn mul(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Mul, vec![other.into_term()])
    }

    pub fn div(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Div, vec![other.into_term()])
    }

    pub fn rem(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Mod, vec![other.into_term()])
    }

    pub fn and(self, other: impl IntoTerm) -> Term {
        self.method(TermType::And, vec![other.into_term()])
    }

    pub fn or(self, other: impl IntoTerm) -> Term {
        self.method(TermType::Or, vec![other.into_term()])
    }

    pub fn not(self) -> Term {
        self.method(TermType::Not, vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_term_creation() {
        let term = Term::new(TermType::Db);
        assert_eq!(term.term_type(), TermType::Db);
        assert!(term.args().is_empty());
    }

    #[test]
    fn test_datum_term() {
        let term = Term::datum(Datum::String("test".to_string()));
        assert!(term.is_datum());
        assert_eq!(term.as_datum().unwrap().as_string(), Some("test"));
        assert_eq!(term.build(), json!("test"));
    }

    #[test]
    fn test_db_table_build() {
        let term = Term::db("blog").table("posts");
        assert_eq!(term.build(), json!([15, [[14, ["blog"]], "posts"]]));
    }

    #[test]
    fn test_optargs_element_omitted_when_empty() {
        let plain = Term::db("test").table("users").get(1);
        assert_eq!(plain.build().as_array().unwrap().len(), 2);

        let with_opt = Term::db("test").table("users").opt("read_mode", "outdated");
        let wire = with_opt.build();
        assert_eq!(wire.as_array().unwrap().len(), 3);
        assert_eq!(wire[2], json!({"read_mode": "outdated"}));
    }

    #[test]
    fn test_datum_array_builds_make_array() {
        let term = Term::datum(Datum::from(vec![Datum::from(1), Datum::from(vec![2])]));
        assert_eq!(term.build(), json!([2, [1, [2, [2]]]]));
    }

    #[test]
    fn test_make_obj_builds_plain_object() {
        let term = Term::new(TermType::MakeObj)
            .with_optarg("a", Term::datum(Datum::from(1)))
            .with_optarg("b", Term::new(TermType::MakeArray).with_arg(Term::datum(Datum::Null)));
        assert_eq!(term.build(), json!({"a": 1, "b": [2, [null]]}));
    }

    #[test]
    fn test_as_literal() {
        let term = Term::new(TermType::MakeArray)
            .with_arg(Term::datum(Datum::from("x")))
            .with_arg(Term::new(TermType::MakeObj).with_optarg("k", Term::datum(Datum::Null)));
        let literal = term.as_literal().unwrap();
        assert_eq!(literal, Datum::from(json!(["x", {"k": null}])));
        assert!(Term::db("x").as_literal().is_none());
    }

    #[test]
    fn test_func_wrap_implicit_var() {
        let predicate = Term::new(TermType::ImplicitVar).get_field("age").gt(30);
        let wrapped = predicate.clone().func_wrap();
        assert_eq!(wrapped.term_type(), TermType::Func);
        assert_eq!(wrapped.arg(1), Some(&predicate));

        let plain = Term::datum(Datum::from(true));
        assert_eq!(plain.clone().func_wrap(), plain);
    }

    #[test]
    fn test_func_wrap_avoids_captured_vars() {
        let body = Term::new(TermType::ImplicitVar).eq(Term::var(7));
        let wrapped = body.func_wrap();
        let params = wrapped.first_arg().unwrap();
        assert_eq!(params.first_arg().and_then(Term::as_datum), Some(&Datum::Number(8.0)));
    }

    #[test]
    fn test_filter_chain() {
        let term = Term::db("test")
            .table("users")
            .filter(Term::new(TermType::ImplicitVar).get_field("active"))
            .limit(10);
        assert_eq!(term.term_type(), TermType::Limit);
        let filter = term.first_arg().unwrap();
        assert_eq!(filter.term_type(), TermType::Filter);
        assert_eq!(filter.arg(1).unwrap().term_type(), TermType::Func);
    }
}

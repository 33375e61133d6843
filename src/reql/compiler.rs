//! Wire JSON to term compiler.
//!
//! The inverse of [`Term::build`]: parses the JSON form of a query back into
//! a `Term` tree. The CLI uses it to run raw wire queries, and it lets tests
//! check serialization without a server.
//!
//! # Wire Format
//!
//! ```json
//! [term_type, [arg1, arg2, ...], {"optarg1": value1, ...}]
//! ```
//!
//! - `term_type` is the numeric code of the operation
//! - the second element holds the positional arguments
//! - the third element (optional) holds the named arguments
//!
//! Bare scalars are literal datums and bare objects are MAKE_OBJ terms.
//!
//! # Example
//!
//! JSON query for `r.table("users").filter({active: true})`:
//!
//! ```json
//! [39,  // FILTER
//!   [
//!     [15, ["users"]],  // TABLE("users")
//!     {"active": true}  // MAKE_OBJ
//!   ]
//! ]
//! ```

use super::{Datum, Term, TermType};
use crate::error::{ReqlError, Result};
use serde_json::Value;

/// Parses wire-encoded queries into terms.
pub struct TermCompiler;

impl TermCompiler {
    /// Compile a JSON value into a ReQL Term
    pub fn compile(query: &Value) -> Result<Term> {
        Self::compile_term(query)
    }

    /// Parse query text, e.g. from the command line.
    pub fn compile_str(text: &str) -> Result<Term> {
        let json: Value = serde_json::from_str(text)?;
        Self::compile(&json)
    }

    fn compile_term(json: &Value) -> Result<Term> {
        let arr = match json {
            Value::Array(arr) => arr,
            Value::Object(obj) => {
                let fields = obj
                    .iter()
                    .map(|(key, value)| Self::compile_term(value).map(|term| (key.clone(), term)))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Term::new(TermType::MakeObj).with_optargs(fields));
            }
            scalar => return Ok(Term::datum(Datum::from(scalar.clone()))),
        };

        let code = arr
            .first()
            .ok_or_else(|| ReqlError::driver("Empty term array"))?;
        let code = code.as_u64().ok_or_else(|| {
            ReqlError::driver(format!("Invalid term type: expected number, got {}", code))
        })?;
        let term_type = TermType::from_u64(code)
            .ok_or_else(|| ReqlError::driver(format!("Unknown term type: {}", code)))?;

        if term_type == TermType::Datum {
            let value = arr
                .get(1)
                .ok_or_else(|| ReqlError::driver("DATUM term requires value argument"))?;
            return Ok(Term::datum(Datum::from(value.clone())));
        }

        let args = match arr.get(1) {
            Some(Value::Array(args)) => args
                .iter()
                .map(Self::compile_term)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(ReqlError::driver(format!(
                    "Term arguments must be an array, got {}",
                    other
                )))
            }
            None => Vec::new(),
        };

        let optargs = match arr.get(2) {
            Some(Value::Object(obj)) => obj
                .iter()
                .map(|(key, value)| Self::compile_term(value).map(|term| (key.clone(), term)))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(ReqlError::driver(format!(
                    "Term optional arguments must be an object, got {}",
                    other
                )))
            }
            None => Vec::new(),
        };

        Ok(Term::new(term_type).with_args(args).with_optargs(optargs))
    }
}

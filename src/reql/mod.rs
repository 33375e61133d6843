//! ReQL (RethinkDB Query Language) client side.
//!
//! - **Terms** (`terms.rs`): every operation code as an enum
//! - **AST** (`ast.rs`): immutable `Term` trees and their wire serialization
//! - **Expressions** (`expr.rs`): converting native values into terms, the `r` namespace
//! - **Datum** (`datum.rs`) and **codec** (`codec.rs`): result values and pseudo-type decoding
//! - **Printer** (`printer.rs`): query rendering for error messages
//! - **Compiler** (`compiler.rs`): wire JSON back into terms
//!
//! # Example
//!
//! ```rust,ignore
//! use reql_driver::reql::Reql;
//!
//! let r = Reql::new();
//! // r.db("test").table("users").filter(|u| u("age") > 30)
//! let query = r
//!     .db("test")
//!     .table("users")
//!     .filter(r.func1(|u| u.bracket("age").gt(30)));
//! ```

pub mod ast;
pub mod codec;
pub mod compiler;
pub mod datum;
pub mod expr;
pub mod printer;
pub mod terms;
pub mod types;

pub use ast::Term;
pub use codec::{FormatOptions, PseudoFormat};
pub use compiler::TermCompiler;
pub use datum::Datum;
pub use expr::{IntoTerm, Reql, ToTerm, VarIdAllocator};
pub use printer::QueryPrinter;
pub use terms::TermType;
pub use types::*;

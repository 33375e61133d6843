//! Query pretty printer.
//!
//! Renders a term tree the way it would be written with the builder, and
//! underlines the sub-term a server backtrace points at:
//!
//! ```text
//! r.db("test").table("users").filter(|var_1| (var_1.get_field("age") > 18))
//!                                             ^^^^^^^^^^^^^^^^^^^^^^^
//! ```

use super::{Datum, Term, TermType};
use crate::network::protocol::Frame;

pub struct QueryPrinter<'a> {
    root: &'a Term,
    frames: &'a [Frame],
}

impl<'a> QueryPrinter<'a> {
    pub fn new(root: &'a Term, frames: &'a [Frame]) -> Self {
        Self { root, frames }
    }

    pub fn print_query(&self) -> String {
        self.render().out
    }

    /// A line of `^` under the backtraced sub-term, empty if the backtrace
    /// does not resolve inside the query.
    pub fn print_carrots(&self) -> String {
        let rendered = self.render();
        match rendered.span {
            Some((start, end)) => {
                let lead = rendered.out[..start].chars().count();
                let width = rendered.out[start..end].chars().count();
                format!("{}{}", " ".repeat(lead), "^".repeat(width))
            }
            None => String::new(),
        }
    }

    fn render(&self) -> Writer<'a> {
        let mut writer = Writer {
            out: String::new(),
            target: self.frames,
            path: Vec::new(),
            span: None,
        };
        writer.term(self.root);
        writer
    }
}

struct Writer<'a> {
    out: String,
    target: &'a [Frame],
    path: Vec<Frame>,
    span: Option<(usize, usize)>,
}

impl Writer<'_> {
    fn term(&mut self, term: &Term) {
        let start = self.out.len();
        self.body(term);
        if self.span.is_none() && self.path.as_slice() == self.target {
            self.span = Some((start, self.out.len()));
        }
    }

    fn child(&mut self, frame: Frame, term: &Term) {
        self.path.push(frame);
        self.term(term);
        self.path.pop();
    }

    fn body(&mut self, term: &Term) {
        let term_type = term.term_type();
        match term_type {
            TermType::Datum => {
                let datum = term.as_datum().cloned().unwrap_or(Datum::Null);
                self.out.push_str(&datum.to_string());
            }
            TermType::MakeArray => {
                self.out.push('[');
                self.args(term, 0);
                self.out.push(']');
            }
            TermType::MakeObj if term.args().is_empty() => {
                self.out.push('{');
                for (i, (key, value)) in term.optargs().iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.out.push_str(&serde_json::Value::String(key.clone()).to_string());
                    self.out.push_str(": ");
                    self.child(Frame::Opt(key.clone()), value);
                }
                self.out.push('}');
            }
            TermType::Var => {
                self.out.push_str("var_");
                if let Some(id) = term.first_arg().and_then(Term::as_datum) {
                    self.out.push_str(&id.to_string());
                }
            }
            TermType::ImplicitVar => self.out.push_str("r.row"),
            TermType::Func if term.args().len() == 2 => {
                let params = term.args()[0]
                    .as_literal()
                    .and_then(|d| d.as_array().cloned())
                    .unwrap_or_default();
                let names: Vec<String> = params.iter().map(|id| format!("var_{}", id)).collect();
                self.out.push('|');
                self.out.push_str(&names.join(", "));
                self.out.push_str("| ");
                self.child(Frame::Pos(1), &term.args()[1]);
            }
            _ if term_type.infix_operator().is_some() && term.args().len() >= 2 => {
                let op = term_type.infix_operator().unwrap_or_default();
                self.out.push('(');
                for (i, arg) in term.args().iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(&format!(" {} ", op));
                    }
                    self.child(Frame::Pos(i), arg);
                }
                self.out.push(')');
            }
            _ if Self::prints_top_level(term) => {
                self.out.push_str("r.");
                self.out.push_str(&term_type.method_name());
                self.out.push('(');
                self.arguments(term, 0);
                self.out.push(')');
            }
            _ => {
                self.child(Frame::Pos(0), &term.args()[0]);
                self.out.push('.');
                self.out.push_str(&term_type.method_name());
                self.out.push('(');
                self.arguments(term, 1);
                self.out.push(')');
            }
        }
    }

    fn prints_top_level(term: &Term) -> bool {
        let first = match term.first_arg() {
            Some(first) => first,
            None => return true,
        };
        match term.term_type() {
            TermType::Table | TermType::TableCreate | TermType::TableDrop | TermType::TableList => {
                first.term_type() != TermType::Db
            }
            other => other.is_top_level(),
        }
    }

    /// Positional args from `from` on, then `key=value` optargs.
    fn arguments(&mut self, term: &Term, from: usize) {
        let wrote_args = self.args(term, from);
        for (i, (key, value)) in term.optargs().iter().enumerate() {
            if wrote_args || i > 0 {
                self.out.push_str(", ");
            }
            self.out.push_str(key);
            self.out.push('=');
            self.child(Frame::Opt(key.clone()), value);
        }
    }

    fn args(&mut self, term: &Term, from: usize) -> bool {
        for (i, arg) in term.args().iter().enumerate().skip(from) {
            if i > from {
                self.out.push_str(", ");
            }
            self.child(Frame::Pos(i), arg);
        }
        term.args().len() > from
    }
}

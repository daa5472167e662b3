//! Parsed statements: literal fragments separated by parameter slots.
//!
//! Statement text is opaque. Parsing only tracks enough quoting to tell a
//! `?` placeholder or `;` separator from one inside a string literal or a
//! quoted identifier.

use std::fmt;

use crate::params::{CompositeParameterList, ParameterList, SimpleParameterList};

/// One statement: `param_count() + 1` literal fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleQuery {
    fragments: Vec<String>,
}

impl SimpleQuery {
    /// Build from fragments. An empty list is treated as one empty fragment.
    pub fn new(mut fragments: Vec<String>) -> Self {
        if fragments.is_empty() {
            fragments.push(String::new());
        }
        Self { fragments }
    }

    /// The empty statement.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn param_count(&self) -> usize {
        self.fragments.len() - 1
    }

    /// Whether the statement has no text at all.
    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(String::is_empty)
    }

    /// Statement text with `$1..$n` placeholders, as the v3 Parse message wants it.
    pub fn native_sql(&self) -> String {
        let mut sql = String::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            if i > 0 {
                sql.push('$');
                sql.push_str(&i.to_string());
            }
            sql.push_str(fragment);
        }
        sql
    }

    /// Statement text with parameters rendered inline.
    ///
    /// Unset slots render as `?`; with no list every slot does.
    pub fn render(&self, params: Option<&SimpleParameterList>) -> String {
        let mut sql = String::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            if i > 0 {
                match params {
                    Some(params) => sql.push_str(&params.render(i)),
                    None => sql.push('?'),
                }
            }
            sql.push_str(fragment);
        }
        sql
    }
}

/// Several statements sharing one flattened parameter index space.
///
/// `offsets[i]` is the number of parameters owned by statements before `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeQuery {
    statements: Vec<SimpleQuery>,
    offsets: Vec<usize>,
}

impl CompositeQuery {
    pub fn new(statements: Vec<SimpleQuery>) -> Self {
        let mut offsets = Vec::with_capacity(statements.len());
        let mut total = 0;
        for statement in &statements {
            offsets.push(total);
            total += statement.param_count();
        }
        Self {
            statements,
            offsets,
        }
    }

    pub fn statements(&self) -> &[SimpleQuery] {
        &self.statements
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn param_count(&self) -> usize {
        self.statements.iter().map(SimpleQuery::param_count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Simple(SimpleQuery),
    Composite(CompositeQuery),
}

impl Query {
    /// Split statement text into statements and fragments.
    ///
    /// With `parameterized == false`, `?` is ordinary text. A backslash inside
    /// a single-quoted literal escapes the next character. Blank statements
    /// between separators are dropped; text with no statements at all yields
    /// the empty query.
    pub fn parse(sql: &str, parameterized: bool) -> Query {
        let mut statements = Vec::new();
        let mut fragments = Vec::new();
        let mut current = String::new();
        let mut in_single = false;
        let mut in_double = false;

        let mut chars = sql.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    current.push(c);
                    if in_single {
                        if let Some(next) = chars.next() {
                            current.push(next);
                        }
                    }
                }
                '\'' => {
                    in_single = !in_double && !in_single;
                    current.push(c);
                }
                '"' => {
                    in_double = !in_single && !in_double;
                    current.push(c);
                }
                '?' if parameterized && !in_single && !in_double => {
                    fragments.push(std::mem::take(&mut current));
                }
                ';' if !in_single && !in_double => {
                    fragments.push(std::mem::take(&mut current));
                    push_statement(&mut statements, std::mem::take(&mut fragments));
                }
                _ => current.push(c),
            }
        }
        fragments.push(current);
        push_statement(&mut statements, fragments);

        match statements.len() {
            0 => Query::Simple(SimpleQuery::empty()),
            1 => match statements.pop() {
                Some(only) => Query::Simple(only),
                None => Query::Simple(SimpleQuery::empty()),
            },
            _ => Query::Composite(CompositeQuery::new(statements)),
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Query::Simple(query) => query.param_count(),
            Query::Composite(query) => query.param_count(),
        }
    }

    /// The statements in send order.
    pub fn statements(&self) -> &[SimpleQuery] {
        match self {
            Query::Simple(query) => std::slice::from_ref(query),
            Query::Composite(query) => query.statements(),
        }
    }

    /// A parameter list shaped for this query, with every slot unset.
    pub fn create_parameter_list(&self) -> ParameterList {
        match self {
            Query::Simple(query) => {
                ParameterList::Simple(SimpleParameterList::new(query.param_count()))
            }
            Query::Composite(query) => ParameterList::Composite(CompositeParameterList::new(
                query
                    .statements()
                    .iter()
                    .map(|s| SimpleParameterList::new(s.param_count()))
                    .collect(),
                query.offsets().to_vec(),
            )),
        }
    }

    /// Text with parameters rendered inline; statements are joined with `;`.
    pub fn render(&self, params: Option<&ParameterList>) -> String {
        let statements = self.statements();
        let mut sql = String::new();
        for (i, statement) in statements.iter().enumerate() {
            if i > 0 {
                sql.push(';');
            }
            let sub = params.and_then(|p| p.subparams().get(i));
            sql.push_str(&statement.render(sub));
        }
        sql
    }
}

fn push_statement(statements: &mut Vec<SimpleQuery>, fragments: Vec<String>) {
    let has_text = fragments.first().is_some_and(|f| !f.trim().is_empty());
    if fragments.len() > 1 || has_text {
        statements.push(SimpleQuery::new(fragments));
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(None))
    }
}

//! SQL statement tree handed to a [`Renderer`](crate::render::Renderer).
//!
//! Parameters never appear inline. An [`Expr::Param`] carries the 1-based
//! index of its value in the statement's parameter list, so rendering is a
//! pure function of the tree.

use sqlpersist_core::Value;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Get the SQL operator string.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table alias
    Column { table: Option<String>, name: String },
    /// Bound parameter (1-based index)
    Param(usize),
    /// Binary operation
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// Conjunction; an empty list is TRUE
    And(Vec<Expr>),
    /// Disjunction; an empty list is FALSE
    Or(Vec<Expr>),
    Not(Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        escape: Option<Box<Expr>>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// Function call such as `SUM(x)` or `COUNT(DISTINCT x)`
    Function {
        name: &'static str,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// `COUNT(*)`
    CountStar,
}

impl Expr {
    /// Column reference qualified by a table alias.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Unqualified column reference.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::binary(self, BinaryOp::Eq, other)
    }

    /// Conjunction of several expressions, flattened when there is only one.
    pub fn all(mut exprs: Vec<Expr>) -> Self {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::And(exprs)
        }
    }
}

/// One item of a SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub label: Option<String>,
}

impl SelectItem {
    pub fn labeled(expr: Expr, label: impl Into<String>) -> Self {
        Self {
            expr,
            label: Some(label.into()),
        }
    }
}

/// A table with its alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
        }
    }

    pub fn aliased(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: Some(alias.into()),
        }
    }
}

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Expr,
}

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub for_update: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Expr>,
}

/// A complete statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    /// Fetch the next value of a named sequence
    NextValue(String),
}

/// Parameter list builder that hands out placeholder indices in push order.
#[derive(Debug, Default, Clone)]
pub struct Params {
    values: Vec<Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return the parameter expression standing for it.
    pub fn bind(&mut self, value: Value) -> Expr {
        self.values.push(value);
        Expr::Param(self.values.len())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// `col1 = ? AND col2 = ?` over a table alias, one bound value per column.
pub fn key_equals<'a>(
    table: Option<&str>,
    columns: impl IntoIterator<Item = &'a str>,
    values: &[Value],
    params: &mut Params,
) -> Expr {
    let parts = columns
        .into_iter()
        .zip(values)
        .map(|(name, value)| {
            let column = Expr::Column {
                table: table.map(str::to_string),
                name: name.to_string(),
            };
            column.eq(params.bind(value.clone()))
        })
        .collect();
    Expr::all(parts)
}

//! Criteria queries: a typed description of what to select.
//!
//! A [`CriteriaQuery`] names entities and attributes, not tables and
//! columns. The [`StatementFactory`](crate::factory::StatementFactory)
//! resolves it against the entity model.

use serde::{Deserialize, Serialize};
use sqlpersist_core::{SqlType, Value};

use crate::ast::JoinType;

/// Row lock requested by a query or a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    None,
    Optimistic,
    PessimisticRead,
    /// The only mode that takes a row lock (`FOR UPDATE`).
    PessimisticWrite,
}

/// Comparison operators for [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    pub const fn sql_name(self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A value-producing expression over query aliases.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Attribute path under an alias; embedded fields use dots (`address.city`).
    Path { alias: String, attribute: String },
    /// The entity bound to an alias.
    Entity(String),
    Literal(Value),
    Aggregate {
        func: AggregateFn,
        arg: Box<Expression>,
        distinct: bool,
    },
    CountAll,
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

/// Attribute path under an alias.
pub fn path(alias: impl Into<String>, attribute: impl Into<String>) -> Expression {
    Expression::Path {
        alias: alias.into(),
        attribute: attribute.into(),
    }
}

/// The entity bound to an alias.
pub fn entity(alias: impl Into<String>) -> Expression {
    Expression::Entity(alias.into())
}

pub fn lit(value: impl Into<Value>) -> Expression {
    Expression::Literal(value.into())
}

pub fn count(arg: Expression) -> Expression {
    aggregate(AggregateFn::Count, arg)
}

pub fn count_distinct(arg: Expression) -> Expression {
    Expression::Aggregate {
        func: AggregateFn::Count,
        arg: Box::new(arg),
        distinct: true,
    }
}

pub fn count_all() -> Expression {
    Expression::CountAll
}

pub fn sum(arg: Expression) -> Expression {
    aggregate(AggregateFn::Sum, arg)
}

pub fn avg(arg: Expression) -> Expression {
    aggregate(AggregateFn::Avg, arg)
}

pub fn min(arg: Expression) -> Expression {
    aggregate(AggregateFn::Min, arg)
}

pub fn max(arg: Expression) -> Expression {
    aggregate(AggregateFn::Max, arg)
}

fn aggregate(func: AggregateFn, arg: Expression) -> Expression {
    Expression::Aggregate {
        func,
        arg: Box::new(arg),
        distinct: false,
    }
}

impl Expression {
    fn arithmetic(self, op: ArithmeticOp, other: Expression) -> Expression {
        Expression::Arithmetic {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn plus(self, other: Expression) -> Expression {
        self.arithmetic(ArithmeticOp::Add, other)
    }

    pub fn minus(self, other: Expression) -> Expression {
        self.arithmetic(ArithmeticOp::Sub, other)
    }

    pub fn times(self, other: Expression) -> Expression {
        self.arithmetic(ArithmeticOp::Mul, other)
    }

    pub fn divided_by(self, other: Expression) -> Expression {
        self.arithmetic(ArithmeticOp::Div, other)
    }

    pub fn eq(self, other: Expression) -> Predicate {
        Predicate::Equal(self, other)
    }

    pub fn ne(self, other: Expression) -> Predicate {
        Predicate::NotEqual(self, other)
    }

    pub fn lt(self, other: Expression) -> Predicate {
        Predicate::Compare(CompareOp::Lt, self, other)
    }

    pub fn le(self, other: Expression) -> Predicate {
        Predicate::Compare(CompareOp::Le, self, other)
    }

    pub fn gt(self, other: Expression) -> Predicate {
        Predicate::Compare(CompareOp::Gt, self, other)
    }

    pub fn ge(self, other: Expression) -> Predicate {
        Predicate::Compare(CompareOp::Ge, self, other)
    }

    pub fn between(self, low: Expression, high: Expression) -> Predicate {
        Predicate::Between {
            expr: self,
            low,
            high,
        }
    }

    pub fn like(self, pattern: Expression) -> Predicate {
        Predicate::Like {
            expr: self,
            pattern,
            negated: false,
            escape: None,
        }
    }

    pub fn not_like(self, pattern: Expression) -> Predicate {
        Predicate::Like {
            expr: self,
            pattern,
            negated: true,
            escape: None,
        }
    }

    pub fn in_list(self, values: Vec<Expression>) -> Predicate {
        Predicate::In {
            expr: self,
            values,
            negated: false,
        }
    }

    pub fn not_in(self, values: Vec<Expression>) -> Predicate {
        Predicate::In {
            expr: self,
            values,
            negated: true,
        }
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull(self)
    }

    pub fn is_not_null(self) -> Predicate {
        Predicate::IsNotNull(self)
    }

    /// Aliases this expression refers to.
    pub fn aliases(&self, out: &mut Vec<String>) {
        match self {
            Expression::Path { alias, .. } | Expression::Entity(alias) => out.push(alias.clone()),
            Expression::Literal(_) | Expression::CountAll => {}
            Expression::Aggregate { arg, .. } => arg.aliases(out),
            Expression::Arithmetic { left, right, .. } => {
                left.aliases(out);
                right.aliases(out);
            }
        }
    }
}

/// Closed set of predicates a criteria query can filter on.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equal(Expression, Expression),
    NotEqual(Expression, Expression),
    Compare(CompareOp, Expression, Expression),
    Between {
        expr: Expression,
        low: Expression,
        high: Expression,
    },
    Like {
        expr: Expression,
        pattern: Expression,
        negated: bool,
        escape: Option<char>,
    },
    In {
        expr: Expression,
        values: Vec<Expression>,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    IsNull(Expression),
    IsNotNull(Expression),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Set the escape character of a LIKE predicate; other predicates are unchanged.
    pub fn escape(self, ch: char) -> Predicate {
        match self {
            Predicate::Like {
                expr,
                pattern,
                negated,
                ..
            } => Predicate::Like {
                expr,
                pattern,
                negated,
                escape: Some(ch),
            },
            other => other,
        }
    }

    /// Top-level conjuncts of this predicate.
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        match self {
            Predicate::And(parts) => parts.iter().flat_map(Predicate::conjuncts).collect(),
            other => vec![other],
        }
    }

    /// Aliases this predicate refers to.
    pub fn aliases(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_aliases(&mut out);
        out
    }

    fn collect_aliases(&self, out: &mut Vec<String>) {
        match self {
            Predicate::Equal(a, b) | Predicate::NotEqual(a, b) | Predicate::Compare(_, a, b) => {
                a.aliases(out);
                b.aliases(out);
            }
            Predicate::Between { expr, low, high } => {
                expr.aliases(out);
                low.aliases(out);
                high.aliases(out);
            }
            Predicate::Like { expr, pattern, .. } => {
                expr.aliases(out);
                pattern.aliases(out);
            }
            Predicate::In { expr, values, .. } => {
                expr.aliases(out);
                for v in values {
                    v.aliases(out);
                }
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                for p in parts {
                    p.collect_aliases(out);
                }
            }
            Predicate::Not(inner) => inner.collect_aliases(out),
            Predicate::IsNull(e) | Predicate::IsNotNull(e) => e.aliases(out),
        }
    }
}

/// A join from an already-bound alias along a relationship attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub parent_alias: String,
    pub attribute: String,
    pub alias: String,
    pub join_type: JoinType,
    /// Select the joined entity too and attach it to its parent.
    pub fetch: bool,
}

/// What a query returns.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Selection {
    /// The root entity.
    #[default]
    Root,
    /// A single expression.
    Single(Expression),
    /// Several expressions, returned as tuples.
    Multi(Vec<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub expr: Expression,
    pub descending: bool,
}

/// Description of a criteria query.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaQuery {
    pub entity: String,
    pub alias: String,
    pub joins: Vec<JoinSpec>,
    pub selection: Selection,
    pub filter: Option<Predicate>,
    pub group_by: Vec<Expression>,
    pub order_by: Vec<OrderSpec>,
    pub distinct: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub lock: LockMode,
    /// Declared type of a scalar result; inferred when absent.
    pub result_type: Option<SqlType>,
}

impl CriteriaQuery {
    /// Query rooted at `entity`, bound to `alias`.
    pub fn from(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: alias.into(),
            joins: Vec::new(),
            selection: Selection::Root,
            filter: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            distinct: false,
            limit: None,
            offset: None,
            lock: LockMode::None,
            result_type: None,
        }
    }

    fn push_join(
        mut self,
        parent_alias: &str,
        attribute: &str,
        alias: &str,
        join_type: JoinType,
        fetch: bool,
    ) -> Self {
        self.joins.push(JoinSpec {
            parent_alias: parent_alias.to_string(),
            attribute: attribute.to_string(),
            alias: alias.to_string(),
            join_type,
            fetch,
        });
        self
    }

    pub fn join(self, parent_alias: &str, attribute: &str, alias: &str) -> Self {
        self.push_join(parent_alias, attribute, alias, JoinType::Inner, false)
    }

    pub fn left_join(self, parent_alias: &str, attribute: &str, alias: &str) -> Self {
        self.push_join(parent_alias, attribute, alias, JoinType::Left, false)
    }

    /// Left join that also loads the joined entities into the parent attribute.
    pub fn fetch_join(self, parent_alias: &str, attribute: &str, alias: &str) -> Self {
        self.push_join(parent_alias, attribute, alias, JoinType::Left, true)
    }

    /// Add a filter, AND-ed with any existing one.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn select(mut self, expr: Expression) -> Self {
        self.selection = Selection::Single(expr);
        self
    }

    pub fn multiselect(mut self, exprs: Vec<Expression>) -> Self {
        self.selection = Selection::Multi(exprs);
        self
    }

    pub fn group_by(mut self, expr: Expression) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, expr: Expression) -> Self {
        self.order_by.push(OrderSpec {
            expr,
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, expr: Expression) -> Self {
        self.order_by.push(OrderSpec {
            expr,
            descending: true,
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn lock(mut self, lock: LockMode) -> Self {
        self.lock = lock;
        self
    }

    pub fn result_type(mut self, sql_type: SqlType) -> Self {
        self.result_type = Some(sql_type);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_accumulate_as_conjunction() {
        let q = CriteriaQuery::from("Book", "b")
            .filter(path("b", "pages").gt(lit(100)))
            .filter(path("b", "title").like(lit("D%")));
        let filter = q.filter.unwrap();
        assert_eq!(filter.conjuncts().len(), 2);
    }

    #[test]
    fn nested_conjunctions_flatten() {
        let p = path("a", "x")
            .eq(lit(1))
            .and(Predicate::And(vec![
                path("b", "y").is_null(),
                path("c", "z").eq(lit(2)),
            ]))
            .or(path("d", "w").is_not_null());
        assert_eq!(p.conjuncts().len(), 1);

        let q = path("a", "x").eq(lit(1)).and(Predicate::And(vec![
            path("b", "y").is_null(),
            path("c", "z").eq(lit(2)),
        ]));
        assert_eq!(q.conjuncts().len(), 3);
        assert_eq!(q.aliases(), vec!["a", "b", "c"]);
    }

    #[test]
    fn escape_applies_to_like_only() {
        let like = path("b", "title").like(lit("50!%")).escape('!');
        assert!(matches!(like, Predicate::Like { escape: Some('!'), .. }));
        let eq = path("b", "title").eq(lit("x")).escape('!');
        assert!(matches!(eq, Predicate::Equal(..)));
    }

    #[test]
    fn lock_mode_serde() {
        let json = serde_json::to_string(&LockMode::PessimisticWrite).unwrap();
        assert_eq!(json, "\"pessimistic_write\"");
    }
}

//! Rendering statement trees to SQL text.

use sqlpersist_core::Dialect;

use crate::ast::{BinaryOp, Delete, Expr, Insert, Join, Select, Statement, TableRef, Update};

/// Turns a statement tree into SQL text.
pub trait Renderer {
    fn render(&self, statement: &Statement) -> String;

    /// Dialect the rendered text targets.
    fn dialect(&self) -> Dialect;
}

/// Default renderer: quoted identifiers and numbered placeholders per dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlRenderer {
    dialect: Dialect,
}

impl SqlRenderer {
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn ident(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.dialect.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn table(&self, table: &TableRef) -> String {
        match &table.alias {
            Some(alias) => format!("{} AS {}", self.ident(&table.table), self.ident(alias)),
            None => self.ident(&table.table),
        }
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    self.dialect.quote_identifier(t),
                    self.dialect.quote_identifier(name)
                ),
                None => self.dialect.quote_identifier(name),
            },
            Expr::Param(index) => self.dialect.placeholder(*index),
            Expr::Binary { left, op, right } => {
                format!("{} {} {}", self.operand(left), op.as_str(), self.operand(right))
            }
            Expr::And(parts) if parts.is_empty() => "1 = 1".to_string(),
            Expr::Or(parts) if parts.is_empty() => "1 = 0".to_string(),
            Expr::And(parts) => self.junction(parts, " AND "),
            Expr::Or(parts) => self.junction(parts, " OR "),
            Expr::Not(inner) => format!("NOT ({})", self.expr(inner)),
            Expr::IsNull { expr, negated } => {
                let not_str = if *negated { " NOT" } else { "" };
                format!("{} IS{not_str} NULL", self.operand(expr))
            }
            Expr::Between { expr, low, high } => format!(
                "{} BETWEEN {} AND {}",
                self.operand(expr),
                self.operand(low),
                self.operand(high)
            ),
            Expr::Like {
                expr,
                pattern,
                negated,
                escape,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                let mut sql = format!(
                    "{} {not_str}LIKE {}",
                    self.operand(expr),
                    self.operand(pattern)
                );
                if let Some(escape) = escape {
                    sql.push_str(&format!(" ESCAPE {}", self.operand(escape)));
                }
                sql
            }
            Expr::In { list, negated, .. } if list.is_empty() => {
                let sql = if *negated { "1 = 1" } else { "1 = 0" };
                sql.to_string()
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let items: Vec<_> = list.iter().map(|e| self.expr(e)).collect();
                let not_str = if *negated { "NOT " } else { "" };
                format!("{} {not_str}IN ({})", self.operand(expr), items.join(", "))
            }
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                let args: Vec<_> = args.iter().map(|a| self.expr(a)).collect();
                let distinct = if *distinct { "DISTINCT " } else { "" };
                format!("{name}({distinct}{})", args.join(", "))
            }
            Expr::CountStar => "COUNT(*)".to_string(),
        }
    }

    /// Render an operand, parenthesized when it is itself compound.
    fn operand(&self, expr: &Expr) -> String {
        match expr {
            Expr::Binary { op, .. } if is_arithmetic(*op) => format!("({})", self.expr(expr)),
            Expr::Column { .. }
            | Expr::Param(_)
            | Expr::Function { .. }
            | Expr::CountStar => self.expr(expr),
            _ => format!("({})", self.expr(expr)),
        }
    }

    fn junction(&self, parts: &[Expr], sep: &str) -> String {
        parts
            .iter()
            .map(|p| match p {
                Expr::And(_) | Expr::Or(_) => format!("({})", self.expr(p)),
                _ => self.expr(p),
            })
            .collect::<Vec<_>>()
            .join(sep)
    }

    fn join(&self, join: &Join) -> String {
        format!(
            " {} {} ON {}",
            join.join_type.as_str(),
            self.table(&join.table),
            self.expr(&join.on)
        )
    }

    fn select(&self, select: &Select) -> String {
        let mut sql = String::from("SELECT ");
        if select.distinct {
            sql.push_str("DISTINCT ");
        }
        if select.items.is_empty() {
            sql.push('*');
        } else {
            let items: Vec<_> = select
                .items
                .iter()
                .map(|item| match &item.label {
                    Some(label) => format!("{} AS {}", self.expr(&item.expr), self.ident(label)),
                    None => self.expr(&item.expr),
                })
                .collect();
            sql.push_str(&items.join(", "));
        }

        if let Some(from) = &select.from {
            sql.push_str(" FROM ");
            sql.push_str(&self.table(from));
        }
        for join in &select.joins {
            sql.push_str(&self.join(join));
        }
        if let Some(filter) = &select.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.expr(filter));
        }
        if !select.group_by.is_empty() {
            let exprs: Vec<_> = select.group_by.iter().map(|e| self.expr(e)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&exprs.join(", "));
        }
        if !select.order_by.is_empty() {
            let items: Vec<_> = select
                .order_by
                .iter()
                .map(|o| {
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("{} {dir}", self.expr(&o.expr))
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }

        match (select.limit, select.offset) {
            (Some(n), _) => sql.push_str(&format!(" LIMIT {n}")),
            (None, Some(_)) => match self.dialect {
                Dialect::Sqlite => sql.push_str(" LIMIT -1"),
                Dialect::Mysql => sql.push_str(" LIMIT 18446744073709551615"),
                Dialect::Postgres => {}
            },
            (None, None) => {}
        }
        if let Some(n) = select.offset {
            sql.push_str(&format!(" OFFSET {n}"));
        }

        if select.for_update && self.dialect.supports_for_update() {
            sql.push_str(" FOR UPDATE");
        }
        sql
    }

    fn insert(&self, insert: &Insert) -> String {
        if insert.columns.is_empty() {
            return match self.dialect {
                Dialect::Mysql => format!("INSERT INTO {} () VALUES ()", self.ident(&insert.table)),
                _ => format!("INSERT INTO {} DEFAULT VALUES", self.ident(&insert.table)),
            };
        }
        let columns: Vec<_> = insert.columns.iter().map(|c| self.ident(c)).collect();
        let values: Vec<_> = insert.values.iter().map(|v| self.expr(v)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.ident(&insert.table),
            columns.join(", "),
            values.join(", ")
        )
    }

    fn update(&self, update: &Update) -> String {
        let sets: Vec<_> = update
            .assignments
            .iter()
            .map(|(column, value)| format!("{} = {}", self.ident(column), self.expr(value)))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.ident(&update.table), sets.join(", "));
        if let Some(filter) = &update.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.expr(filter));
        }
        sql
    }

    fn delete(&self, delete: &Delete) -> String {
        let mut sql = format!("DELETE FROM {}", self.ident(&delete.table));
        if let Some(filter) = &delete.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.expr(filter));
        }
        sql
    }
}

fn is_arithmetic(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
    )
}

impl Renderer for SqlRenderer {
    fn render(&self, statement: &Statement) -> String {
        match statement {
            Statement::Select(s) => self.select(s),
            Statement::Insert(i) => self.insert(i),
            Statement::Update(u) => self.update(u),
            Statement::Delete(d) => self.delete(d),
            Statement::NextValue(sequence) => {
                let name = sequence.replace('\'', "''");
                match self.dialect {
                    Dialect::Mysql => format!("SELECT NEXTVAL({})", self.ident(sequence)),
                    _ => format!("SELECT nextval('{name}')"),
                }
            }
        }
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

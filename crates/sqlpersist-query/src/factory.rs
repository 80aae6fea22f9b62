//! Statement factory: criteria queries and relationship lookups to SQL trees.

use std::collections::{HashMap, HashSet};

use sqlpersist_core::{
    AttrId, AttributeKind, EntityKey, EntityModel, EntityType, EntityTypeId, Error, JoinMapping,
    Relationship, Result, SqlType, Value,
};

use crate::ast::{
    BinaryOp, Expr, Join, JoinType, OrderItem, Params, Select, SelectItem, Statement, TableRef,
    key_equals,
};
use crate::criteria::{
    AggregateFn, ArithmeticOp, CompareOp, CriteriaQuery, Expression, JoinSpec, LockMode,
    Predicate, Selection,
};
use crate::params::{
    FetchJoin, FetchParameter, ResultShape, StatementKind, StatementParameters, column_label,
};

/// Alias used for the entity selected by key and relationship lookups.
const LOOKUP_ALIAS: &str = "t";
/// Alias used for the join table of a relationship lookup.
const LINK_ALIAS: &str = "j";

/// Builds statements against one entity model.
#[derive(Debug, Clone, Copy)]
pub struct StatementFactory<'m> {
    model: &'m EntityModel,
    split_fetch_joins: bool,
}

/// A criteria join resolved against the model.
struct ResolvedJoin<'a> {
    spec: &'a JoinSpec,
    attribute: AttrId,
    relationship: &'a Relationship,
    target: EntityTypeId,
}

impl ResolvedJoin<'_> {
    fn is_collection_fetch(&self) -> bool {
        self.spec.fetch && self.relationship.kind.is_to_many()
    }
}

impl<'m> StatementFactory<'m> {
    pub fn new(model: &'m EntityModel) -> Self {
        Self {
            model,
            split_fetch_joins: false,
        }
    }

    /// Issue one statement per collection fetch join when there are two or more.
    pub fn split_fetch_joins(mut self, split: bool) -> Self {
        self.split_fetch_joins = split;
        self
    }

    pub fn model(&self) -> &'m EntityModel {
        self.model
    }

    /// SELECT items for every column of `ty`, labeled `<alias>__<column>`.
    pub fn entity_items(ty: &EntityType, alias: &str) -> Vec<SelectItem> {
        let mut seen = HashSet::new();
        ty.attributes()
            .iter()
            .flat_map(|a| a.own_columns())
            .filter(|c| seen.insert(c.name.as_str()))
            .map(|c| SelectItem::labeled(Expr::qualified(alias, &c.name), column_label(alias, &c.name)))
            .collect()
    }

    /// `SELECT ... WHERE <pk> = ?`, optionally locking the row.
    #[tracing::instrument(level = "debug", skip(self, key))]
    pub fn find_by_key(
        &self,
        entity: EntityTypeId,
        key: &EntityKey,
        lock: LockMode,
    ) -> Result<StatementParameters> {
        let ty = self.model.get(entity);
        let pk: Vec<&str> = ty.pk_columns().iter().map(|c| c.name.as_str()).collect();
        if pk.len() != key.len() {
            return Err(Error::mapping(
                &ty.name,
                format!("key {} does not match {} key columns", key, pk.len()),
            ));
        }
        let mut params = Params::new();
        let filter = key_equals(Some(LOOKUP_ALIAS), pk, key.values(), &mut params);
        let select = Select {
            items: Self::entity_items(ty, LOOKUP_ALIAS),
            from: Some(TableRef::aliased(&ty.table, LOOKUP_ALIAS)),
            filter: Some(filter),
            for_update: lock == LockMode::PessimisticWrite,
            ..Select::default()
        };
        Ok(StatementParameters::plain(
            Statement::Select(select),
            params.into_values(),
            ResultShape::Entity {
                entity,
                alias: LOOKUP_ALIAS.to_string(),
            },
        ))
    }

    /// Select the instances related to `owner_key` through relationship `attr`.
    ///
    /// Covers every relationship resolved by querying the target: to-manys of
    /// all shapes and non-owning to-ones. Owning to-ones are resolved through
    /// their foreign key with [`Self::find_by_key`] instead.
    pub fn related(
        &self,
        owner: EntityTypeId,
        attr: AttrId,
        owner_key: &EntityKey,
    ) -> Result<StatementParameters> {
        let owner_ty = self.model.get(owner);
        let (target_id, rel) = self.model.target_of(owner, attr)?;
        let target = self.model.get(target_id);
        let attr_name = &owner_ty.attribute(attr).name;
        let target_pk: Vec<&str> = target.pk_columns().iter().map(|c| c.name.as_str()).collect();

        let mut params = Params::new();
        let mut joins = Vec::new();
        let mut via_table = |table: &str, near: Vec<&str>, far: Vec<&str>, params: &mut Params| {
            joins.push(Join {
                join_type: JoinType::Inner,
                table: TableRef::aliased(table, LINK_ALIAS),
                on: pairs_equal(LINK_ALIAS, &far, LOOKUP_ALIAS, &target_pk),
            });
            key_equals(Some(LINK_ALIAS), near, owner_key.values(), params)
        };

        let filter = match &rel.mapping {
            JoinMapping::Columns(cols) if rel.kind.is_to_many() => key_equals(
                Some(LOOKUP_ALIAS),
                cols.iter().map(|c| c.column.name.as_str()),
                owner_key.values(),
                &mut params,
            ),
            JoinMapping::Columns(_) => {
                return Err(Error::mapping_attr(
                    &owner_ty.name,
                    attr_name,
                    "owning to-one is resolved through its foreign key",
                ));
            }
            JoinMapping::Table(t) => via_table(
                t.table.as_str(),
                names(&t.owner_columns),
                names(&t.target_columns),
                &mut params,
            ),
            JoinMapping::Inverse { mapped_by } => {
                let owning = target
                    .attribute_id(mapped_by)
                    .and_then(|id| target.attribute(id).relationship())
                    .ok_or_else(|| {
                        Error::mapping_attr(&owner_ty.name, attr_name, "unresolved mapped_by")
                    })?;
                match &owning.mapping {
                    JoinMapping::Columns(cols) if owning.kind.is_to_one() => key_equals(
                        Some(LOOKUP_ALIAS),
                        cols.iter().map(|c| c.column.name.as_str()),
                        owner_key.values(),
                        &mut params,
                    ),
                    JoinMapping::Table(t) => via_table(
                        t.table.as_str(),
                        names(&t.target_columns),
                        names(&t.owner_columns),
                        &mut params,
                    ),
                    _ => {
                        return Err(Error::mapping_attr(
                            &owner_ty.name,
                            attr_name,
                            "mapped_by must name a foreign-key to-one or a join-table owner",
                        ));
                    }
                }
            }
        };

        let order_by = target_pk
            .iter()
            .map(|c| OrderItem {
                expr: Expr::qualified(LOOKUP_ALIAS, *c),
                descending: false,
            })
            .collect();
        let select = Select {
            items: Self::entity_items(target, LOOKUP_ALIAS),
            from: Some(TableRef::aliased(&target.table, LOOKUP_ALIAS)),
            joins,
            filter: Some(filter),
            order_by,
            ..Select::default()
        };
        Ok(StatementParameters::plain(
            Statement::Select(select),
            params.into_values(),
            ResultShape::Entity {
                entity: target_id,
                alias: LOOKUP_ALIAS.to_string(),
            },
        ))
    }

    /// Translate a criteria query.
    ///
    /// Returns one statement, or one per collection fetch join when splitting
    /// is enabled and the query fetches two or more collections.
    #[tracing::instrument(level = "debug", skip(self, query), fields(entity = %query.entity))]
    pub fn build(&self, query: &CriteriaQuery) -> Result<Vec<StatementParameters>> {
        let root = self.model.entity_id(&query.entity)?;
        let mut aliases: HashMap<&str, EntityTypeId> = HashMap::new();
        aliases.insert(&query.alias, root);

        let mut joins = Vec::with_capacity(query.joins.len());
        for spec in &query.joins {
            let parent = *aliases.get(spec.parent_alias.as_str()).ok_or_else(|| {
                Error::mapping(&query.entity, format!("unknown alias '{}'", spec.parent_alias))
            })?;
            let parent_ty = self.model.get(parent);
            let (attribute, attr) = parent_ty.require_attribute(&spec.attribute)?;
            let relationship = attr.relationship().ok_or_else(|| {
                Error::mapping_attr(&parent_ty.name, &spec.attribute, "cannot join a non-relationship")
            })?;
            let (target, _) = self.model.target_of(parent, attribute)?;
            if aliases.insert(&spec.alias, target).is_some() {
                return Err(Error::mapping(
                    &query.entity,
                    format!("alias '{}' is bound twice", spec.alias),
                ));
            }
            joins.push(ResolvedJoin {
                spec,
                attribute,
                relationship,
                target,
            });
        }

        let collections: Vec<&str> = joins
            .iter()
            .filter(|j| j.is_collection_fetch())
            .map(|j| j.spec.alias.as_str())
            .collect();
        let entity_shaped = matches!(query.selection, Selection::Root | Selection::Single(Expression::Entity(_)));

        if !(self.split_fetch_joins && entity_shaped && collections.len() >= 2) {
            let statement = self.build_one(query, root, &aliases, &joins, &HashSet::new())?;
            return Ok(vec![statement]);
        }

        if collections.len() > 2 {
            tracing::warn!(
                entity = %query.entity,
                collections = collections.len(),
                "splitting more than two collection fetch joins"
            );
        }
        tracing::debug!(statements = collections.len(), "splitting collection fetch joins");

        let mut statements = Vec::with_capacity(collections.len());
        for keep in &collections {
            let mut excluded: HashSet<&str> =
                collections.iter().copied().filter(|a| a != keep).collect();
            for join in &joins {
                if excluded.contains(join.spec.parent_alias.as_str()) {
                    excluded.insert(&join.spec.alias);
                }
            }
            statements.push(self.build_one(query, root, &aliases, &joins, &excluded)?);
        }
        Ok(statements)
    }

    fn build_one(
        &self,
        query: &CriteriaQuery,
        root: EntityTypeId,
        aliases: &HashMap<&str, EntityTypeId>,
        joins: &[ResolvedJoin<'_>],
        excluded: &HashSet<&str>,
    ) -> Result<StatementParameters> {
        let root_ty = self.model.get(root);
        let scope = Scope {
            model: self.model,
            aliases,
        };
        let mut params = Params::new();
        let included: Vec<&ResolvedJoin<'_>> = joins
            .iter()
            .filter(|j| !excluded.contains(j.spec.alias.as_str()))
            .collect();

        let mut items = Vec::new();
        let mut fetches = Vec::new();
        let shape = match &query.selection {
            Selection::Root => {
                items.extend(Self::entity_items(root_ty, &query.alias));
                ResultShape::Entity {
                    entity: root,
                    alias: query.alias.clone(),
                }
            }
            Selection::Single(Expression::Entity(alias)) => {
                let entity = scope.entity(alias)?;
                items.extend(Self::entity_items(self.model.get(entity), alias));
                ResultShape::Entity {
                    entity,
                    alias: alias.clone(),
                }
            }
            Selection::Single(expr) => {
                let (sql, inferred) = scope.expression(expr, &mut params)?;
                let sql_type = query
                    .result_type
                    .clone()
                    .or(inferred)
                    .ok_or_else(|| Error::mapping(&query.entity, "cannot infer the result type"))?;
                let label = "c0".to_string();
                items.push(SelectItem::labeled(sql, &label));
                ResultShape::Scalar(FetchParameter::Column { label, sql_type })
            }
            Selection::Multi(exprs) => {
                let mut parts = Vec::with_capacity(exprs.len());
                for (i, expr) in exprs.iter().enumerate() {
                    if let Expression::Entity(alias) = expr {
                        let entity = scope.entity(alias)?;
                        items.extend(Self::entity_items(self.model.get(entity), alias));
                        parts.push(FetchParameter::Entity {
                            entity,
                            alias: alias.clone(),
                        });
                    } else {
                        let (sql, inferred) = scope.expression(expr, &mut params)?;
                        let label = format!("c{i}");
                        let sql_type = inferred.ok_or_else(|| {
                            Error::mapping(&query.entity, format!("cannot infer the type of item {i}"))
                        })?;
                        items.push(SelectItem::labeled(sql, &label));
                        parts.push(FetchParameter::Column { label, sql_type });
                    }
                }
                ResultShape::Tuple(parts)
            }
        };

        if matches!(shape, ResultShape::Entity { .. }) {
            for join in included.iter().filter(|j| j.spec.fetch) {
                items.extend(Self::entity_items(self.model.get(join.target), &join.spec.alias));
                fetches.push(FetchJoin {
                    alias: join.spec.alias.clone(),
                    parent_alias: join.spec.parent_alias.clone(),
                    entity: join.target,
                    attribute: join.attribute,
                    collection: join.relationship.kind.is_to_many(),
                });
            }
        }

        let mut sql_joins = Vec::new();
        for join in &included {
            let parent = scope.entity(&join.spec.parent_alias)?;
            sql_joins.extend(relationship_joins(
                self.model,
                parent,
                &join.spec.parent_alias,
                join.relationship,
                join.target,
                &join.spec.alias,
                join.spec.join_type,
            )?);
        }

        let filter = match &query.filter {
            None => None,
            Some(predicate) if excluded.is_empty() => Some(scope.predicate(predicate, &mut params)?),
            Some(predicate) => {
                let kept: Vec<&Predicate> = predicate
                    .conjuncts()
                    .into_iter()
                    .filter(|p| p.aliases().iter().all(|a| !excluded.contains(a.as_str())))
                    .collect();
                if kept.is_empty() {
                    None
                } else {
                    let mut parts = Vec::with_capacity(kept.len());
                    for p in kept {
                        parts.push(scope.predicate(p, &mut params)?);
                    }
                    Some(Expr::all(parts))
                }
            }
        };

        let mut group_by = Vec::with_capacity(query.group_by.len());
        for expr in &query.group_by {
            group_by.push(scope.expression(expr, &mut params)?.0);
        }
        let mut order_by = Vec::with_capacity(query.order_by.len());
        for order in &query.order_by {
            let mut refs = Vec::new();
            order.expr.aliases(&mut refs);
            if refs.iter().any(|a| excluded.contains(a.as_str())) {
                continue;
            }
            order_by.push(OrderItem {
                expr: scope.expression(&order.expr, &mut params)?.0,
                descending: order.descending,
            });
        }

        let select = Select {
            distinct: query.distinct,
            items,
            from: Some(TableRef::aliased(&root_ty.table, &query.alias)),
            joins: sql_joins,
            filter,
            group_by,
            order_by,
            limit: query.limit,
            offset: query.offset,
            for_update: query.lock == LockMode::PessimisticWrite,
        };
        let kind = if fetches.is_empty() {
            StatementKind::Plain
        } else {
            StatementKind::FetchJoin
        };
        Ok(StatementParameters {
            statement: Statement::Select(select),
            params: params.into_values(),
            kind,
            fetches,
            shape,
        })
    }
}

fn names(cols: &[sqlpersist_core::JoinColumnMapping]) -> Vec<&str> {
    cols.iter().map(|c| c.column.name.as_str()).collect()
}

/// `l.a1 = r.b1 AND l.a2 = r.b2 ...`
fn pairs_equal(left: &str, left_cols: &[&str], right: &str, right_cols: &[&str]) -> Expr {
    Expr::all(
        left_cols
            .iter()
            .zip(right_cols)
            .map(|(l, r)| Expr::qualified(left, *l).eq(Expr::qualified(right, *r)))
            .collect(),
    )
}

/// JOIN clauses walking `rel` from `parent_alias` to `alias`.
///
/// A join table yields two joins: parent to join table, join table to target.
pub fn relationship_joins(
    model: &EntityModel,
    parent: EntityTypeId,
    parent_alias: &str,
    rel: &Relationship,
    target: EntityTypeId,
    alias: &str,
    join_type: JoinType,
) -> Result<Vec<Join>> {
    let parent_ty = model.get(parent);
    let target_ty = model.get(target);
    let parent_pk: Vec<&str> = parent_ty.pk_columns().iter().map(|c| c.name.as_str()).collect();
    let target_pk: Vec<&str> = target_ty.pk_columns().iter().map(|c| c.name.as_str()).collect();
    let link_alias = format!("{alias}_jt");

    let direct = |on: Expr| {
        vec![Join {
            join_type,
            table: TableRef::aliased(&target_ty.table, alias),
            on,
        }]
    };
    let through = |table: &str, parent_side: Vec<&str>, target_side: Vec<&str>| {
        vec![
            Join {
                join_type,
                table: TableRef::aliased(table, &link_alias),
                on: pairs_equal(parent_alias, &parent_pk, &link_alias, &parent_side),
            },
            Join {
                join_type,
                table: TableRef::aliased(&target_ty.table, alias),
                on: pairs_equal(&link_alias, &target_side, alias, &target_pk),
            },
        ]
    };

    let joins = match &rel.mapping {
        JoinMapping::Columns(cols) if rel.kind.is_to_one() => {
            direct(pairs_equal(parent_alias, &names(cols), alias, &target_pk))
        }
        JoinMapping::Columns(cols) => direct(pairs_equal(alias, &names(cols), parent_alias, &parent_pk)),
        JoinMapping::Table(t) => through(t.table.as_str(), names(&t.owner_columns), names(&t.target_columns)),
        JoinMapping::Inverse { mapped_by } => {
            let owning = target_ty
                .attribute_id(mapped_by)
                .and_then(|id| target_ty.attribute(id).relationship())
                .ok_or_else(|| Error::mapping(&parent_ty.name, format!("unresolved mapped_by '{mapped_by}'")))?;
            match &owning.mapping {
                JoinMapping::Columns(cols) if owning.kind.is_to_one() => {
                    direct(pairs_equal(alias, &names(cols), parent_alias, &parent_pk))
                }
                JoinMapping::Columns(cols) => {
                    direct(pairs_equal(parent_alias, &names(cols), alias, &target_pk))
                }
                JoinMapping::Table(t) => {
                    through(t.table.as_str(), names(&t.target_columns), names(&t.owner_columns))
                }
                JoinMapping::Inverse { .. } => {
                    return Err(Error::mapping(
                        &parent_ty.name,
                        format!("mapped_by '{mapped_by}' names another inverse side"),
                    ));
                }
            }
        }
    };
    Ok(joins)
}

/// Alias bindings used while translating expressions.
struct Scope<'a> {
    model: &'a EntityModel,
    aliases: &'a HashMap<&'a str, EntityTypeId>,
}

impl Scope<'_> {
    fn entity(&self, alias: &str) -> Result<EntityTypeId> {
        self.aliases
            .get(alias)
            .copied()
            .ok_or_else(|| Error::mapping("", format!("unknown alias '{alias}'")))
    }

    /// Column and type named by `attribute` under `alias`.
    fn column(&self, alias: &str, attribute: &str) -> Result<(Expr, SqlType)> {
        let ty = self.model.get(self.entity(alias)?);
        let mut segments = attribute.split('.');
        let head = segments.next().unwrap_or_default();
        let rest: Vec<&str> = segments.collect();
        let (_, attr) = ty.require_attribute(head)?;
        let column = match (&attr.kind, rest.is_empty()) {
            (AttributeKind::Basic(c), true) => Some(c),
            (AttributeKind::Embedded(e), false) => e.column_at(&rest),
            (AttributeKind::Relationship(r), true) => match r.join_columns() {
                Some([single]) if r.kind.is_to_one() => Some(&single.column),
                _ => None,
            },
            _ => None,
        };
        let column = column.ok_or_else(|| {
            Error::mapping_attr(&ty.name, attribute, "path does not name a single column")
        })?;
        Ok((Expr::qualified(alias, &column.name), column.sql_type.clone()))
    }

    fn expression(&self, expr: &Expression, params: &mut Params) -> Result<(Expr, Option<SqlType>)> {
        match expr {
            Expression::Path { alias, attribute } => {
                let (sql, ty) = self.column(alias, attribute)?;
                Ok((sql, Some(ty)))
            }
            Expression::Entity(alias) => {
                let ty = self.model.get(self.entity(alias)?);
                match ty.pk_columns().as_slice() {
                    [single] => Ok((Expr::qualified(alias, &single.name), Some(single.sql_type.clone()))),
                    _ => Err(Error::mapping(
                        &ty.name,
                        "an entity with a composite key cannot be used as a value",
                    )),
                }
            }
            Expression::Literal(value) => {
                let ty = literal_type(value);
                Ok((params.bind(value.clone()), ty))
            }
            Expression::CountAll => Ok((Expr::CountStar, Some(SqlType::BigInt))),
            Expression::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let (arg_sql, arg_ty) = self.expression(arg, params)?;
                let ty = match func {
                    AggregateFn::Count => Some(SqlType::BigInt),
                    AggregateFn::Avg => Some(SqlType::Double),
                    AggregateFn::Sum => arg_ty.map(|t| t.sum_type()),
                    AggregateFn::Min | AggregateFn::Max => arg_ty,
                };
                Ok((
                    Expr::Function {
                        name: func.sql_name(),
                        args: vec![arg_sql],
                        distinct: *distinct,
                    },
                    ty,
                ))
            }
            Expression::Arithmetic { op, left, right } => {
                let (l, lt) = self.expression(left, params)?;
                let (r, rt) = self.expression(right, params)?;
                let op = match op {
                    ArithmeticOp::Add => BinaryOp::Add,
                    ArithmeticOp::Sub => BinaryOp::Sub,
                    ArithmeticOp::Mul => BinaryOp::Mul,
                    ArithmeticOp::Div => BinaryOp::Div,
                };
                let ty = match (lt, rt) {
                    (Some(l), Some(r)) => Some(SqlType::promote(&l, &r)),
                    (l, r) => l.or(r),
                };
                Ok((Expr::binary(l, op, r), ty))
            }
        }
    }

    fn value(&self, expr: &Expression, params: &mut Params) -> Result<Expr> {
        Ok(self.expression(expr, params)?.0)
    }

    fn predicate(&self, predicate: &Predicate, params: &mut Params) -> Result<Expr> {
        let sql = match predicate {
            Predicate::Equal(a, b) => {
                Expr::binary(self.value(a, params)?, BinaryOp::Eq, self.value(b, params)?)
            }
            Predicate::NotEqual(a, b) => {
                Expr::binary(self.value(a, params)?, BinaryOp::Ne, self.value(b, params)?)
            }
            Predicate::Compare(op, a, b) => {
                let op = match op {
                    CompareOp::Lt => BinaryOp::Lt,
                    CompareOp::Le => BinaryOp::Le,
                    CompareOp::Gt => BinaryOp::Gt,
                    CompareOp::Ge => BinaryOp::Ge,
                };
                Expr::binary(self.value(a, params)?, op, self.value(b, params)?)
            }
            Predicate::Between { expr, low, high } => Expr::Between {
                expr: Box::new(self.value(expr, params)?),
                low: Box::new(self.value(low, params)?),
                high: Box::new(self.value(high, params)?),
            },
            Predicate::Like {
                expr,
                pattern,
                negated,
                escape,
            } => {
                let expr = self.value(expr, params)?;
                let pattern = self.value(pattern, params)?;
                let escape = escape.map(|c| Box::new(params.bind(Value::Text(c.to_string()))));
                Expr::Like {
                    expr: Box::new(expr),
                    pattern: Box::new(pattern),
                    negated: *negated,
                    escape,
                }
            }
            Predicate::In {
                expr,
                values,
                negated,
            } => {
                let expr = self.value(expr, params)?;
                let mut list = Vec::with_capacity(values.len());
                for v in values {
                    list.push(self.value(v, params)?);
                }
                Expr::In {
                    expr: Box::new(expr),
                    list,
                    negated: *negated,
                }
            }
            Predicate::And(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for p in parts {
                    out.push(self.predicate(p, params)?);
                }
                Expr::And(out)
            }
            Predicate::Or(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for p in parts {
                    out.push(self.predicate(p, params)?);
                }
                Expr::Or(out)
            }
            Predicate::Not(inner) => Expr::Not(Box::new(self.predicate(inner, params)?)),
            Predicate::IsNull(e) => Expr::IsNull {
                expr: Box::new(self.value(e, params)?),
                negated: false,
            },
            Predicate::IsNotNull(e) => Expr::IsNull {
                expr: Box::new(self.value(e, params)?),
                negated: true,
            },
        };
        Ok(sql)
    }
}

fn literal_type(value: &Value) -> Option<SqlType> {
    let ty = match value {
        Value::Null => return None,
        Value::Bool(_) => SqlType::Boolean,
        Value::TinyInt(_) => SqlType::TinyInt,
        Value::SmallInt(_) => SqlType::SmallInt,
        Value::Int(_) => SqlType::Integer,
        Value::BigInt(_) => SqlType::BigInt,
        Value::Float(_) => SqlType::Real,
        Value::Double(_) => SqlType::Double,
        Value::Decimal(_) => SqlType::Decimal {
            precision: 38,
            scale: 10,
        },
        Value::Text(_) => SqlType::Text,
        Value::Bytes(_) => SqlType::Blob,
        Value::Date(_) => SqlType::Date,
        Value::Time(_) => SqlType::Time,
        Value::Timestamp(_) => SqlType::Timestamp,
        Value::Uuid(_) => SqlType::Uuid,
        Value::Json(_) => SqlType::Json,
    };
    Some(ty)
}

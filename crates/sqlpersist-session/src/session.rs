//! The session: one unit of work bound to one connection.

use std::sync::Arc;

use sqlpersist_core::{
    AttrId, AttrValue, Connection, EntityId, EntityKey, EntityModel, EntityType, Error, Result,
    TypeError, Value,
};
use sqlpersist_query::{
    CriteriaQuery, LockMode, Renderer, SqlRenderer, StatementFactory, StatementParameters,
};

use crate::config::SessionConfig;
use crate::context::PersistenceContext;
use crate::handler::{EntityHandler, FlushResult};
use crate::records::{QueryResult, RecordStrategy, merge_roots};
use crate::status::EntityStatus;
use crate::unit::PersistenceUnit;

/// A unit of work: the persistence context plus the connection it flushes to.
///
/// Instances are handed to the session by value and addressed afterwards by
/// [`EntityId`]. Within one session a database row is represented by at most
/// one instance.
///
/// ```ignore
/// let mut session = unit.session(conn);
/// let book = session.persist_new(Book { title: "Dune".into(), ..Book::default() })?;
/// session.flush()?;
/// assert_eq!(session.get::<Book>(book)?.title, "Dune");
/// ```
pub struct Session<C: Connection> {
    connection: C,
    context: PersistenceContext,
    renderer: Box<dyn Renderer>,
    config: SessionConfig,
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.context)
            .field("dialect", &self.renderer.dialect())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Session<C> {
    /// Open a session of `unit` over `connection`.
    ///
    /// Statements render in the unit's dialect, or the connection's when the
    /// unit does not name one.
    pub fn new(unit: &PersistenceUnit, connection: C) -> Self {
        let dialect = unit.dialect().unwrap_or_else(|| connection.dialect());
        Self {
            context: PersistenceContext::new(Arc::clone(unit.model())),
            renderer: Box::new(SqlRenderer::new(dialect)),
            config: unit.config().clone(),
            connection,
        }
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn context(&self) -> &PersistenceContext {
        &self.context
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        self.context.model()
    }

    fn handler(&mut self) -> EntityHandler<'_, C> {
        EntityHandler::new(
            &mut self.context,
            &self.connection,
            self.renderer.as_ref(),
            &self.config,
        )
    }

    fn entity_type_of(&self, id: EntityId) -> Result<&EntityType> {
        Ok(self.context.model().get(self.context.entity_type(id)?))
    }

    fn attribute_id(&self, id: EntityId, name: &str) -> Result<AttrId> {
        Ok(self.entity_type_of(id)?.require_attribute(name)?.0)
    }

    // ---- lifecycle -------------------------------------------------------

    /// Hand an instance to the session without scheduling it (status `New`).
    pub fn track<E: 'static>(&mut self, entity: E) -> Result<EntityId> {
        self.context.insert_new(Box::new(entity))
    }

    /// Schedule an instance for INSERT on the next flush.
    pub fn persist(&mut self, id: EntityId) -> Result<()> {
        self.handler().persist(id)
    }

    /// [`track`](Self::track) followed by [`persist`](Self::persist).
    pub fn persist_new<E: 'static>(&mut self, entity: E) -> Result<EntityId> {
        let id = self.track(entity)?;
        self.persist(id)?;
        Ok(id)
    }

    /// Write every pending change.
    pub fn flush(&mut self) -> Result<FlushResult> {
        self.handler().flush()
    }

    pub fn remove(&mut self, id: EntityId) -> Result<()> {
        self.handler().remove(id)
    }

    pub fn detach(&mut self, id: EntityId) -> Result<()> {
        self.handler().detach(id)
    }

    pub fn detach_all(&mut self) {
        self.context.detach_all();
    }

    /// Overwrite an instance from its row. Fails with `NotFound` when the row is gone.
    pub fn refresh(&mut self, id: EntityId) -> Result<()> {
        self.handler().refresh(id)
    }

    /// Move the object out of the session.
    pub fn take<E: 'static>(&mut self, id: EntityId) -> Result<E> {
        let entity = self.context.entity_type(id)?;
        let name = self.context.model().get(entity).name.clone();
        let object = self.context.take(id)?;
        object.downcast::<E>().map(|boxed| *boxed).map_err(|_| {
            Error::Type(TypeError {
                expected: std::any::type_name::<E>(),
                actual: name,
                column: None,
            })
        })
    }

    // ---- lookup ----------------------------------------------------------

    /// Find by primary key: identity map first, then the database.
    pub fn find_by_id(
        &mut self,
        entity: &str,
        key: impl Into<EntityKey>,
        lock: LockMode,
    ) -> Result<Option<EntityId>> {
        let entity = self.context.model().entity_id(entity)?;
        self.handler().find_by_id(entity, &key.into(), lock)
    }

    pub fn find<E: 'static>(&mut self, key: impl Into<EntityKey>) -> Result<Option<EntityId>> {
        let entity = self.context.model().type_of::<E>()?;
        self.handler().find_by_id(entity, &key.into(), LockMode::None)
    }

    // ---- queries ---------------------------------------------------------

    /// Translate a criteria query into the statements it runs as.
    pub fn statements(&self, query: &CriteriaQuery) -> Result<Vec<StatementParameters>> {
        StatementFactory::new(self.context.model())
            .split_fetch_joins(self.config.split_fetch_joins)
            .build(query)
    }

    pub fn execute_query(
        &mut self,
        statement: &StatementParameters,
        strategy: &RecordStrategy,
    ) -> Result<Vec<QueryResult>> {
        self.handler().execute_query(statement, strategy)
    }

    /// Run a criteria query. Split fetch-join statements are merged on root identity.
    pub fn query_results(&mut self, query: &CriteriaQuery) -> Result<Vec<QueryResult>> {
        if self.config.auto_flush {
            self.flush()?;
        }
        let statements = self.statements(query)?;
        let mut results = Vec::new();
        for statement in &statements {
            let batch = self.execute_query(statement, &RecordStrategy::Shape)?;
            if statements.len() > 1 {
                merge_roots(&mut results, batch);
            } else {
                results = batch;
            }
        }
        Ok(results)
    }

    pub fn query_entities(&mut self, query: &CriteriaQuery) -> Result<Vec<EntityId>> {
        self.query_results(query)?
            .into_iter()
            .filter(|r| r.as_value().is_none_or(|v| !v.is_null()))
            .map(|r| {
                r.as_entity().ok_or_else(|| {
                    Error::Type(TypeError {
                        expected: "entity",
                        actual: format!("{r:?}"),
                        column: None,
                    })
                })
            })
            .collect()
    }

    pub fn query_values(&mut self, query: &CriteriaQuery) -> Result<Vec<Value>> {
        self.query_results(query)?
            .into_iter()
            .map(|r| match r {
                QueryResult::Value(v) => Ok(v),
                other => Err(Error::Type(TypeError {
                    expected: "value",
                    actual: format!("{other:?}"),
                    column: None,
                })),
            })
            .collect()
    }

    pub fn query_tuples(&mut self, query: &CriteriaQuery) -> Result<Vec<Vec<QueryResult>>> {
        self.query_results(query)?
            .into_iter()
            .map(|r| match r {
                QueryResult::Tuple(items) => Ok(items),
                single => Ok(vec![single]),
            })
            .collect()
    }

    // ---- attribute access ------------------------------------------------

    pub fn get<E: 'static>(&self, id: EntityId) -> Result<&E> {
        self.context.get(id)
    }

    /// Mutable access. Column changes are found by the snapshot diff at flush.
    ///
    /// Owning to-one references that are still lazy are resolved first, which
    /// may run a SELECT per reference not yet in the identity map.
    pub fn get_mut<E: 'static>(&mut self, id: EntityId) -> Result<&mut E> {
        self.handler().resolve_lazy_references(id)?;
        self.context.get_mut(id)
    }

    /// Write one attribute by name and mark it dirty.
    pub fn set(&mut self, id: EntityId, name: &str, value: impl Into<AttrValue>) -> Result<()> {
        let attr = self.attribute_id(id, name)?;
        let is_relationship = self.entity_type_of(id)?.attribute(attr).is_relationship();
        self.context.write(id, attr, value.into())?;
        if is_relationship {
            self.context.set_loaded(id, attr);
            self.context.set_lazy_key(id, attr, None);
        }
        self.context.mark_dirty(id, attr);
        Ok(())
    }

    pub fn mark_dirty(&mut self, id: EntityId, name: &str) -> Result<()> {
        let attr = self.attribute_id(id, name)?;
        self.context.mark_dirty(id, attr);
        Ok(())
    }

    /// Value of an attribute, resolving a lazy relationship on first access.
    pub fn load_attribute(&mut self, id: EntityId, name: &str) -> Result<AttrValue> {
        let attr = self.attribute_id(id, name)?;
        self.handler().load_attribute(id, attr)
    }

    pub fn status(&self, id: EntityId) -> Option<EntityStatus> {
        self.context.status(id)
    }

    /// Whether the session tracks `id` as a managed instance.
    pub fn contains(&self, id: EntityId) -> bool {
        self.context.is_managed(id)
    }

    // ---- transactions ----------------------------------------------------

    pub fn begin(&self) -> Result<()> {
        self.connection.begin()
    }

    /// Flush, then commit.
    pub fn commit(&mut self) -> Result<FlushResult> {
        let result = self.flush()?;
        self.connection.commit()?;
        Ok(result)
    }

    /// Roll back and detach everything: in-memory state no longer matches the rows.
    pub fn rollback(&mut self) -> Result<()> {
        let result = self.connection.rollback();
        self.context.detach_all();
        result
    }
}

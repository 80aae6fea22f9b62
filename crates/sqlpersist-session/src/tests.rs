use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sqlpersist_core::{
    Accessor, Column, Connection, Dialect, EntityId, EntityModel, EntityType, GenerationStrategy,
    JoinColumnMapping, Relationship, Result, Row, SqlType, Value,
};
use sqlpersist_query::LockMode;

use crate::{EntityStatus, PersistenceUnit};

#[derive(Debug, Default)]
struct MockState {
    query_calls: usize,
    execute_calls: usize,
    executed: Vec<(String, Vec<Value>)>,
    scripted_rows: VecDeque<Vec<Row>>,
    affected: Option<u64>,
    commits: usize,
    rollbacks: usize,
}

#[derive(Debug, Clone)]
struct MockConnection {
    state: Arc<Mutex<MockState>>,
    dialect: Dialect,
}

impl MockConnection {
    fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self {
            state,
            dialect: Dialect::Postgres,
        }
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.query_calls += 1;
        guard.executed.push((sql.to_string(), params.to_vec()));
        if sql.contains("nextval") {
            return Ok(vec![Row::new(
                vec!["nextval".to_string()],
                vec![Value::BigInt(42)],
            )]);
        }
        Ok(guard.scripted_rows.pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.execute_calls += 1;
        guard.executed.push((sql.to_string(), params.to_vec()));
        Ok(guard.affected.unwrap_or(1))
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.execute_calls += 1;
        guard.executed.push((sql.to_string(), params.to_vec()));
        Ok(None)
    }

    fn begin(&self) -> Result<()> {
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.state.lock().expect("lock poisoned").commits += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.state.lock().expect("lock poisoned").rollbacks += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Ticket {
    id: Option<i64>,
    title: String,
    version: Option<i64>,
}

#[derive(Debug, Default)]
struct Author {
    id: i64,
    name: String,
}

#[derive(Debug, Default)]
struct Book {
    id: i64,
    title: String,
    author: Option<EntityId>,
}

fn ticket() -> EntityType {
    EntityType::builder::<Ticket>("Ticket", "tickets")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Sequence("ticket_seq".to_string()),
            Accessor::value(
                |t: &Ticket| t.id.into(),
                |t: &mut Ticket, v| {
                    t.id = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "title",
            Column::new("title", SqlType::Text).not_null(),
            Accessor::value(
                |t: &Ticket| t.title.clone().into(),
                |t: &mut Ticket, v| {
                    t.title = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .version(
            "version",
            Column::new("version", SqlType::BigInt),
            Accessor::value(
                |t: &Ticket| t.version.into(),
                |t: &mut Ticket, v| {
                    t.version = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .build()
        .unwrap()
}

fn author() -> EntityType {
    EntityType::builder::<Author>("Author", "authors")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Plain,
            Accessor::value(
                |a: &Author| a.id.into(),
                |a: &mut Author, v| {
                    a.id = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "name",
            Column::new("name", SqlType::Text),
            Accessor::value(
                |a: &Author| a.name.clone().into(),
                |a: &mut Author, v| {
                    a.name = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .build()
        .unwrap()
}

fn book() -> EntityType {
    EntityType::builder::<Book>("Book", "books")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Plain,
            Accessor::value(
                |b: &Book| b.id.into(),
                |b: &mut Book, v| {
                    b.id = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "title",
            Column::new("title", SqlType::Text),
            Accessor::value(
                |b: &Book| b.title.clone().into(),
                |b: &mut Book, v| {
                    b.title = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .relationship(
            "author",
            Relationship::many_to_one(
                "Author",
                vec![JoinColumnMapping::new("author_id", SqlType::BigInt, "id")],
            ),
            Accessor::one(|b: &Book| b.author, |b: &mut Book, v| b.author = v),
        )
        .build()
        .unwrap()
}

fn unit() -> PersistenceUnit {
    let model = EntityModel::builder()
        .entity(ticket())
        .entity(author())
        .entity(book())
        .build()
        .unwrap();
    PersistenceUnit::new("test", model)
}

fn ticket_row(id: i64, title: &str, version: i64) -> Row {
    Row::new(
        vec!["t__id".to_string(), "t__title".to_string(), "t__version".to_string()],
        vec![
            Value::BigInt(id),
            Value::Text(title.to_string()),
            Value::BigInt(version),
        ],
    )
}

fn statements(state: &Arc<Mutex<MockState>>) -> Vec<String> {
    state
        .lock()
        .unwrap()
        .executed
        .iter()
        .map(|(sql, _)| sql.clone())
        .collect()
}

#[test]
fn sequence_value_is_fetched_before_the_insert() {
    let state = Arc::new(Mutex::new(MockState::default()));
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let id = session
        .persist_new(Ticket {
            title: "broken build".to_string(),
            ..Ticket::default()
        })
        .unwrap();
    let result = session.flush().unwrap();
    assert_eq!(result.inserted, 1);

    let sql = statements(&state);
    assert_eq!(sql.len(), 2);
    assert_eq!(sql[0], "SELECT nextval('ticket_seq')");
    assert!(sql[1].starts_with("INSERT INTO \"tickets\""));

    let guard = state.lock().unwrap();
    assert!(guard.executed[1].1.contains(&Value::BigInt(42)));
    drop(guard);

    let ticket = session.get::<Ticket>(id).unwrap();
    assert_eq!(ticket.id, Some(42));
    assert_eq!(ticket.version, Some(1));
    assert_eq!(session.status(id), Some(EntityStatus::Flushed));
}

#[test]
fn referenced_row_is_inserted_first() {
    let state = Arc::new(Mutex::new(MockState::default()));
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let author = session
        .track(Author {
            id: 7,
            name: "Le Guin".to_string(),
        })
        .unwrap();
    session
        .persist_new(Book {
            id: 1,
            title: "The Dispossessed".to_string(),
            author: Some(author),
        })
        .unwrap();
    session.persist(author).unwrap();

    let result = session.flush().unwrap();
    assert_eq!(result.inserted, 2);

    let sql = statements(&state);
    assert!(sql[0].starts_with("INSERT INTO \"authors\""));
    assert!(sql[1].starts_with("INSERT INTO \"books\""));
    let guard = state.lock().unwrap();
    assert!(guard.executed[1].1.contains(&Value::BigInt(7)));
}

#[test]
fn reference_to_unpersisted_instance_fails_the_flush() {
    let state = Arc::new(Mutex::new(MockState::default()));
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let author = session.track(Author::default()).unwrap();
    session
        .persist_new(Book {
            id: 1,
            author: Some(author),
            ..Book::default()
        })
        .unwrap();

    let err = session.flush().unwrap_err();
    assert!(matches!(err, sqlpersist_core::Error::IntegrityViolation(_)));
    assert!(statements(&state).is_empty());
}

#[test]
fn identity_map_hit_issues_no_query() {
    let state = Arc::new(Mutex::new(MockState::default()));
    state
        .lock()
        .unwrap()
        .scripted_rows
        .push_back(vec![ticket_row(5, "flaky test", 3)]);
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let first = session
        .find_by_id("Ticket", 5_i64, LockMode::None)
        .unwrap()
        .unwrap();
    let second = session.find::<Ticket>(5_i64).unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(state.lock().unwrap().query_calls, 1);
    assert_eq!(session.status(first), Some(EntityStatus::FlushedLoadedFromDb));
    assert_eq!(session.get::<Ticket>(first).unwrap().version, Some(3));
}

#[test]
fn missing_row_is_none() {
    let state = Arc::new(Mutex::new(MockState::default()));
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    assert_eq!(session.find::<Ticket>(99_i64).unwrap(), None);
    assert_eq!(state.lock().unwrap().query_calls, 1);
}

#[test]
fn update_carries_the_version_guard() {
    let state = Arc::new(Mutex::new(MockState::default()));
    state
        .lock()
        .unwrap()
        .scripted_rows
        .push_back(vec![ticket_row(5, "flaky test", 3)]);
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let id = session.find::<Ticket>(5_i64).unwrap().unwrap();
    session.get_mut::<Ticket>(id).unwrap().title = "fixed test".to_string();
    let result = session.flush().unwrap();
    assert_eq!(result.updated, 1);

    let guard = state.lock().unwrap();
    let (sql, params) = guard.executed.last().unwrap();
    assert!(sql.starts_with("UPDATE \"tickets\" SET"));
    assert!(sql.contains("\"version\""));
    assert!(params.contains(&Value::BigInt(3)));
    assert!(params.contains(&Value::BigInt(4)));
    drop(guard);

    assert_eq!(session.get::<Ticket>(id).unwrap().version, Some(4));

    // Nothing changed since: a second flush is silent.
    assert!(session.flush().unwrap().is_empty());
}

#[test]
fn lost_update_is_an_optimistic_lock_failure() {
    let state = Arc::new(Mutex::new(MockState::default()));
    {
        let mut guard = state.lock().unwrap();
        guard.scripted_rows.push_back(vec![ticket_row(5, "flaky test", 3)]);
        guard.affected = Some(0);
    }
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let id = session.find::<Ticket>(5_i64).unwrap().unwrap();
    session.get_mut::<Ticket>(id).unwrap().title = "fixed test".to_string();
    let err = session.flush().unwrap_err();
    assert!(err.is_optimistic_lock());
}

#[test]
fn exhausted_version_fails_before_any_update() {
    let state = Arc::new(Mutex::new(MockState::default()));
    state
        .lock()
        .unwrap()
        .scripted_rows
        .push_back(vec![ticket_row(5, "flaky test", i64::MAX)]);
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let id = session.find::<Ticket>(5_i64).unwrap().unwrap();
    session.get_mut::<Ticket>(id).unwrap().title = "fixed test".to_string();
    let err = session.flush().unwrap_err();
    assert!(matches!(err, sqlpersist_core::Error::IntegrityViolation(_)));
    assert_eq!(state.lock().unwrap().execute_calls, 0);
}

#[test]
fn commit_flushes_and_rollback_detaches() {
    let state = Arc::new(Mutex::new(MockState::default()));
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    session.begin().unwrap();
    let id = session
        .persist_new(Ticket {
            title: "release".to_string(),
            ..Ticket::default()
        })
        .unwrap();
    let result = session.commit().unwrap();
    assert_eq!(result.inserted, 1);
    assert_eq!(state.lock().unwrap().commits, 1);
    assert!(session.contains(id));

    session.rollback().unwrap();
    assert_eq!(state.lock().unwrap().rollbacks, 1);
    assert!(!session.contains(id));
}

#[test]
fn removing_a_pending_insert_issues_nothing() {
    let state = Arc::new(Mutex::new(MockState::default()));
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let id = session
        .persist_new(Author {
            id: 1,
            name: "Butler".to_string(),
        })
        .unwrap();
    session.remove(id).unwrap();
    assert_eq!(session.status(id), Some(EntityStatus::New));

    assert!(session.flush().unwrap().is_empty());
    assert!(statements(&state).is_empty());
}

#[test]
fn removed_instance_is_deleted() {
    let state = Arc::new(Mutex::new(MockState::default()));
    state
        .lock()
        .unwrap()
        .scripted_rows
        .push_back(vec![ticket_row(5, "stale", 2)]);
    let unit = unit();
    let mut session = unit.session(MockConnection::new(Arc::clone(&state)));

    let id = session.find::<Ticket>(5_i64).unwrap().unwrap();
    session.remove(id).unwrap();
    assert_eq!(session.find::<Ticket>(5_i64).unwrap(), None);

    let result = session.flush().unwrap();
    assert_eq!(result.deleted, 1);
    let sql = statements(&state);
    assert!(sql.last().unwrap().starts_with("DELETE FROM \"tickets\""));
    assert_eq!(session.status(id), Some(EntityStatus::Removed));
}

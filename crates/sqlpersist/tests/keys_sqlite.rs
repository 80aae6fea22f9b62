use std::cell::Cell;

use sqlpersist::Embeddable;
use sqlpersist::prelude::*;

#[derive(Debug, Default)]
struct Shelf {
    room: String,
    position: i32,
    label: String,
}

#[derive(Debug, Default)]
struct Volume {
    id: Option<i64>,
    title: String,
    shelf: Option<EntityId>,
}

#[derive(Debug, Default)]
struct Edition {
    isbn: String,
    printing: i32,
    note: String,
}

#[derive(Debug, Default)]
struct Checkout {
    member: i32,
    day: String,
    renewals: i32,
}

#[derive(Debug, Default)]
struct Member {
    id: Option<i64>,
    name: String,
    card: Option<EntityId>,
}

#[derive(Debug, Default)]
struct Card {
    id: Option<i64>,
    number: String,
    member: Option<EntityId>,
}

const SCHEMA: &str = "
    CREATE TABLE shelves (
        room TEXT NOT NULL,
        position INTEGER NOT NULL,
        label TEXT NOT NULL,
        PRIMARY KEY (room, position)
    );
    CREATE TABLE volumes (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        shelf_room TEXT,
        shelf_position INTEGER,
        FOREIGN KEY (shelf_room, shelf_position) REFERENCES shelves(room, position)
    );
    CREATE TABLE editions (
        isbn TEXT NOT NULL,
        printing INTEGER NOT NULL,
        note TEXT NOT NULL,
        PRIMARY KEY (isbn, printing)
    );
    CREATE TABLE checkouts (
        member_id INTEGER NOT NULL,
        day TEXT NOT NULL,
        renewals INTEGER NOT NULL,
        PRIMARY KEY (member_id, day)
    );
    CREATE TABLE members (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE cards (
        id INTEGER PRIMARY KEY,
        number TEXT NOT NULL,
        member_id INTEGER REFERENCES members(id)
    );
";

/// Counts the SELECTs a session sends to the wrapped connection.
struct Counting<'c> {
    inner: &'c SqliteConnection,
    queries: Cell<usize>,
}

impl Connection for Counting<'_> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.queries.set(self.queries.get() + 1);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner.execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        self.inner.insert(sql, params)
    }

    fn begin(&self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }
}

fn shelf() -> EntityType {
    EntityType::builder::<Shelf>("Shelf", "shelves")
        .basic(
            "room",
            Column::new("room", SqlType::Text).not_null(),
            Accessor::value(
                |s: &Shelf| s.room.clone().into(),
                |s: &mut Shelf, v| {
                    s.room = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "position",
            Column::new("position", SqlType::Integer).not_null(),
            Accessor::value(
                |s: &Shelf| s.position.into(),
                |s: &mut Shelf, v| {
                    s.position = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .composite_key(&["room", "position"])
        .basic(
            "label",
            Column::new("label", SqlType::Text).not_null(),
            Accessor::value(
                |s: &Shelf| s.label.clone().into(),
                |s: &mut Shelf, v| {
                    s.label = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .build()
        .expect("shelf type")
}

fn volume() -> EntityType {
    EntityType::builder::<Volume>("Volume", "volumes")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Identity,
            Accessor::value(
                |v: &Volume| v.id.into(),
                |v: &mut Volume, value| {
                    v.id = value.try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "title",
            Column::new("title", SqlType::Text).not_null(),
            Accessor::value(
                |v: &Volume| v.title.clone().into(),
                |v: &mut Volume, value| {
                    v.title = value.try_into()?;
                    Ok(())
                },
            ),
        )
        .relationship(
            "shelf",
            Relationship::many_to_one(
                "Shelf",
                vec![
                    JoinColumnMapping::new("shelf_position", SqlType::Integer, "position"),
                    JoinColumnMapping::new("shelf_room", SqlType::Text, "room"),
                ],
            ),
            Accessor::one(|v: &Volume| v.shelf, |v: &mut Volume, s| v.shelf = s),
        )
        .build()
        .expect("volume type")
}

fn edition() -> EntityType {
    EntityType::builder::<Edition>("Edition", "editions")
        .basic(
            "isbn",
            Column::new("isbn", SqlType::Text).not_null(),
            Accessor::value(
                |e: &Edition| e.isbn.clone().into(),
                |e: &mut Edition, v| {
                    e.isbn = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "printing",
            Column::new("printing", SqlType::Integer).not_null(),
            Accessor::value(
                |e: &Edition| e.printing.into(),
                |e: &mut Edition, v| {
                    e.printing = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .id_class("EditionId", &["isbn", "printing"])
        .basic(
            "note",
            Column::new("note", SqlType::Text).not_null(),
            Accessor::value(
                |e: &Edition| e.note.clone().into(),
                |e: &mut Edition, v| {
                    e.note = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .build()
        .expect("edition type")
}

fn checkout() -> EntityType {
    let key = Embeddable::new("CheckoutId")
        .column("member", Column::new("member_id", SqlType::Integer).not_null())
        .column("day", Column::new("day", SqlType::Text).not_null());
    EntityType::builder::<Checkout>("Checkout", "checkouts")
        .embedded_id(
            "id",
            key,
            Accessor::new(
                |c: &Checkout| {
                    AttrValue::Embedded(vec![
                        AttrValue::Basic(c.member.into()),
                        AttrValue::Basic(c.day.clone().into()),
                    ])
                },
                |c: &mut Checkout, v| {
                    let AttrValue::Embedded(parts) = v else {
                        return Err(Error::Custom("checkout id must be embedded".to_string()));
                    };
                    let mut values = parts.into_iter().filter_map(AttrValue::into_value);
                    c.member = values.next().unwrap_or(Value::Null).try_into()?;
                    c.day = values.next().unwrap_or(Value::Null).try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "renewals",
            Column::new("renewals", SqlType::Integer).not_null(),
            Accessor::value(
                |c: &Checkout| c.renewals.into(),
                |c: &mut Checkout, v| {
                    c.renewals = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .build()
        .expect("checkout type")
}

fn member() -> EntityType {
    EntityType::builder::<Member>("Member", "members")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Identity,
            Accessor::value(
                |m: &Member| m.id.into(),
                |m: &mut Member, v| {
                    m.id = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "name",
            Column::new("name", SqlType::Text).not_null(),
            Accessor::value(
                |m: &Member| m.name.clone().into(),
                |m: &mut Member, v| {
                    m.name = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .relationship(
            "card",
            Relationship::mapped_by(RelationshipKind::OneToOne, "Card", "member"),
            Accessor::one(|m: &Member| m.card, |m: &mut Member, c| m.card = c),
        )
        .build()
        .expect("member type")
}

fn card() -> EntityType {
    EntityType::builder::<Card>("Card", "cards")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Identity,
            Accessor::value(
                |c: &Card| c.id.into(),
                |c: &mut Card, v| {
                    c.id = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .basic(
            "number",
            Column::new("number", SqlType::Text).not_null(),
            Accessor::value(
                |c: &Card| c.number.clone().into(),
                |c: &mut Card, v| {
                    c.number = v.try_into()?;
                    Ok(())
                },
            ),
        )
        .relationship(
            "member",
            Relationship::one_to_one(
                "Member",
                vec![JoinColumnMapping::new("member_id", SqlType::BigInt, "id")],
            ),
            Accessor::one(|c: &Card| c.member, |c: &mut Card, m| c.member = m),
        )
        .build()
        .expect("card type")
}

fn unit() -> PersistenceUnit {
    let model = EntityModel::builder()
        .entity(shelf())
        .entity(volume())
        .entity(edition())
        .entity(checkout())
        .entity(member())
        .entity(card())
        .build()
        .expect("build model");
    PersistenceUnit::new("branch", model)
}

fn open() -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    conn.execute_raw(SCHEMA).expect("create schema");
    conn
}

#[test]
fn composite_key_round_trips_through_a_two_column_reference() {
    let conn = open();
    let unit = unit();
    let mut session = unit.session(&conn);

    let shelf = session
        .persist_new(Shelf {
            room: "A".to_string(),
            position: 3,
            label: "poetry".to_string(),
        })
        .expect("persist shelf");
    let volume = session
        .persist_new(Volume {
            title: "Leaves of Grass".to_string(),
            shelf: Some(shelf),
            ..Volume::default()
        })
        .expect("persist volume");
    let result = session.flush().expect("flush");
    assert_eq!(result.inserted, 2);
    let volume_key = session.get::<Volume>(volume).unwrap().id.expect("generated key");

    let rows = conn
        .query("SELECT shelf_room, shelf_position FROM volumes", &[])
        .expect("read back");
    assert_eq!(rows[0].get(0), Some(&Value::Text("A".to_string())));
    assert_eq!(rows[0].get(1).and_then(Value::as_i64), Some(3));

    let mut reader = unit.session(&conn);
    let key = EntityKey::new(vec![Value::Text("A".to_string()), Value::Int(3)]);
    let found = reader.find::<Shelf>(key).expect("find").expect("row");
    assert_eq!(reader.get::<Shelf>(found).unwrap().label, "poetry");

    let loaded = reader.find::<Volume>(volume_key).expect("find").expect("row");
    assert_eq!(reader.get::<Volume>(loaded).unwrap().shelf, Some(found));

    // Same key, other integer width: still the same instance.
    let again = EntityKey::new(vec![Value::Text("A".to_string()), Value::BigInt(3)]);
    assert_eq!(reader.find::<Shelf>(again).expect("find"), Some(found));
}

#[test]
fn id_class_key_finds_and_updates_the_row() {
    let conn = open();
    let unit = unit();
    let mut writer = unit.session(&conn);
    writer
        .persist_new(Edition {
            isbn: "978-0-14-118776-1".to_string(),
            printing: 2,
            note: "first paperback".to_string(),
        })
        .expect("persist edition");
    writer.flush().expect("flush");

    let mut session = unit.session(&conn);
    let key = EntityKey::new(vec![
        Value::Text("978-0-14-118776-1".to_string()),
        Value::Int(2),
    ]);
    let edition = session
        .find_by_id("Edition", key, LockMode::None)
        .expect("find")
        .expect("row");
    assert_eq!(session.get::<Edition>(edition).unwrap().note, "first paperback");

    session.get_mut::<Edition>(edition).unwrap().note = "corrected".to_string();
    assert_eq!(session.flush().expect("flush").updated, 1);

    let rows = conn
        .query("SELECT note FROM editions WHERE isbn = ?1 AND printing = ?2", &[
            Value::Text("978-0-14-118776-1".to_string()),
            Value::Int(2),
        ])
        .expect("read back");
    assert_eq!(rows[0].get(0), Some(&Value::Text("corrected".to_string())));
}

#[test]
fn embedded_key_round_trips() {
    let conn = open();
    let unit = unit();
    let mut writer = unit.session(&conn);
    writer
        .persist_new(Checkout {
            member: 7,
            day: "2024-05-01".to_string(),
            renewals: 0,
        })
        .expect("persist checkout");
    assert_eq!(writer.flush().expect("flush").inserted, 1);

    let mut session = unit.session(&conn);
    let key = EntityKey::new(vec![Value::Int(7), Value::Text("2024-05-01".to_string())]);
    let checkout = session.find::<Checkout>(key).expect("find").expect("row");
    let loaded = session.get::<Checkout>(checkout).unwrap();
    assert_eq!(loaded.member, 7);
    assert_eq!(loaded.day, "2024-05-01");

    session.get_mut::<Checkout>(checkout).unwrap().renewals = 1;
    assert_eq!(session.flush().expect("flush").updated, 1);

    let missing = EntityKey::new(vec![Value::Int(7), Value::Text("2024-05-02".to_string())]);
    assert_eq!(session.find::<Checkout>(missing).expect("find"), None);
}

#[test]
fn one_to_one_back_reference_needs_no_second_select() {
    let conn = open();
    let unit = unit();
    let mut writer = unit.session(&conn);
    let member = writer
        .persist_new(Member {
            name: "Jo March".to_string(),
            ..Member::default()
        })
        .expect("persist member");
    let card = writer
        .persist_new(Card {
            number: "0042".to_string(),
            member: Some(member),
            ..Card::default()
        })
        .expect("persist card");
    writer.flush().expect("flush");
    let card_key = writer.get::<Card>(card).unwrap().id.expect("generated key");

    let counting = Counting {
        inner: &conn,
        queries: Cell::new(0),
    };
    let mut session = unit.session(&counting);
    let card = session.find::<Card>(card_key).expect("find").expect("row");
    let member = session.get::<Card>(card).unwrap().member.expect("member loaded");

    // One SELECT for the card, one for its member; the member's inverse
    // side is filled from the card already in hand.
    assert_eq!(counting.queries.get(), 2);
    assert_eq!(session.get::<Member>(member).unwrap().card, Some(card));
    assert_eq!(
        session.load_attribute(member, "card").expect("load").as_one(),
        Some(card)
    );
    assert_eq!(counting.queries.get(), 2);
}

use sqlpersist::prelude::*;

#[derive(Debug, Default)]
struct Studio {
    id: Option<i64>,
    name: String,
    films: Vec<EntityId>,
    awards: Vec<EntityId>,
}

#[derive(Debug, Default)]
struct Film {
    id: Option<i64>,
    title: String,
    studio: Option<EntityId>,
    director: Option<EntityId>,
}

#[derive(Debug, Default)]
struct Director {
    id: Option<i64>,
    name: String,
}

#[derive(Debug, Default)]
struct Award {
    id: Option<i64>,
    title: String,
}

const SCHEMA: &str = "
    CREATE TABLE studios (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE directors (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE films (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        studio_id INTEGER REFERENCES studios(id),
        director_id INTEGER REFERENCES directors(id)
    );
    CREATE TABLE awards (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        studio_id INTEGER REFERENCES studios(id)
    );
";

fn generated_id<E: 'static>(
    get: impl Fn(&E) -> Option<i64> + Send + Sync + 'static,
    set: impl Fn(&mut E, Option<i64>) + Send + Sync + 'static,
) -> Accessor {
    Accessor::value(
        move |e: &E| get(e).into(),
        move |e: &mut E, v| {
            set(e, v.try_into()?);
            Ok(())
        },
    )
}

fn text<E: 'static>(
    get: impl Fn(&E) -> String + Send + Sync + 'static,
    set: impl Fn(&mut E, String) + Send + Sync + 'static,
) -> Accessor {
    Accessor::value(
        move |e: &E| get(e).into(),
        move |e: &mut E, v| {
            set(e, v.try_into()?);
            Ok(())
        },
    )
}

fn studio() -> EntityType {
    EntityType::builder::<Studio>("Studio", "studios")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Identity,
            generated_id(|s: &Studio| s.id, |s: &mut Studio, v| s.id = v),
        )
        .basic(
            "name",
            Column::new("name", SqlType::Text).not_null(),
            text(|s: &Studio| s.name.clone(), |s: &mut Studio, v| s.name = v),
        )
        .relationship(
            "films",
            Relationship::mapped_by(RelationshipKind::OneToMany, "Film", "studio")
                .cascade(Cascade::PERSIST),
            Accessor::many(|s: &Studio| s.films.clone(), |s: &mut Studio, v| s.films = v),
        )
        .relationship(
            "awards",
            Relationship::one_to_many(
                "Award",
                vec![JoinColumnMapping::new("studio_id", SqlType::BigInt, "id")],
            )
            .cascade(Cascade::PERSIST),
            Accessor::many(|s: &Studio| s.awards.clone(), |s: &mut Studio, v| s.awards = v),
        )
        .build()
        .expect("studio type")
}

fn film() -> EntityType {
    EntityType::builder::<Film>("Film", "films")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Identity,
            generated_id(|f: &Film| f.id, |f: &mut Film, v| f.id = v),
        )
        .basic(
            "title",
            Column::new("title", SqlType::Text).not_null(),
            text(|f: &Film| f.title.clone(), |f: &mut Film, v| f.title = v),
        )
        .relationship(
            "studio",
            Relationship::many_to_one(
                "Studio",
                vec![JoinColumnMapping::new("studio_id", SqlType::BigInt, "id")],
            ),
            Accessor::one(|f: &Film| f.studio, |f: &mut Film, v| f.studio = v),
        )
        .relationship(
            "director",
            Relationship::many_to_one(
                "Director",
                vec![JoinColumnMapping::new("director_id", SqlType::BigInt, "id")],
            ),
            Accessor::one(|f: &Film| f.director, |f: &mut Film, v| f.director = v),
        )
        .build()
        .expect("film type")
}

fn director() -> EntityType {
    EntityType::builder::<Director>("Director", "directors")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Identity,
            generated_id(|d: &Director| d.id, |d: &mut Director, v| d.id = v),
        )
        .basic(
            "name",
            Column::new("name", SqlType::Text).not_null(),
            text(|d: &Director| d.name.clone(), |d: &mut Director, v| d.name = v),
        )
        .build()
        .expect("director type")
}

fn award() -> EntityType {
    EntityType::builder::<Award>("Award", "awards")
        .id(
            "id",
            Column::new("id", SqlType::BigInt),
            GenerationStrategy::Identity,
            generated_id(|a: &Award| a.id, |a: &mut Award, v| a.id = v),
        )
        .basic(
            "title",
            Column::new("title", SqlType::Text).not_null(),
            text(|a: &Award| a.title.clone(), |a: &mut Award, v| a.title = v),
        )
        .build()
        .expect("award type")
}

fn unit() -> PersistenceUnit {
    let model = EntityModel::builder()
        .entity(studio())
        .entity(film())
        .entity(director())
        .entity(award())
        .build()
        .expect("build model");
    PersistenceUnit::new("studios", model)
}

fn open() -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    conn.execute_raw(SCHEMA).expect("create schema");
    conn
}

fn count_rows(conn: &SqliteConnection, table: &str) -> i64 {
    let rows = conn
        .query(&format!("SELECT COUNT(*) FROM {table}"), &[])
        .expect("count rows");
    rows[0].get(0).and_then(Value::as_i64).expect("integer count")
}

/// A studio with two films and three awards, persisted through the studio.
fn seed(conn: &SqliteConnection, unit: &PersistenceUnit) -> i64 {
    let mut session = unit.session(conn);
    let films = ["Spirited Away", "Princess Mononoke"]
        .into_iter()
        .map(|title| {
            session
                .track(Film {
                    title: title.to_string(),
                    ..Film::default()
                })
                .expect("track film")
        })
        .collect();
    let awards = ["Golden Bear", "Academy Award", "Annie Award"]
        .into_iter()
        .map(|title| {
            session
                .track(Award {
                    title: title.to_string(),
                    ..Award::default()
                })
                .expect("track award")
        })
        .collect();
    let studio = session
        .persist_new(Studio {
            name: "Ghibli".to_string(),
            films,
            awards,
            ..Studio::default()
        })
        .expect("persist studio");

    let result = session.flush().expect("flush");
    assert_eq!(result.inserted, 6);
    assert_eq!(result.link_inserts, 3);
    session.get::<Studio>(studio).unwrap().id.expect("generated key")
}

#[test]
fn split_fetch_joins_fill_both_collections_once_per_root() {
    let conn = open();
    let unit = unit();
    seed(&conn, &unit);

    let mut session = unit.session(&conn);
    let query = CriteriaQuery::from("Studio", "s")
        .fetch_join("s", "films", "f")
        .fetch_join("s", "awards", "w");
    assert_eq!(session.statements(&query).expect("translate").len(), 2);

    let studios = session.query_entities(&query).expect("query");
    assert_eq!(studios.len(), 1);
    let studio = session.get::<Studio>(studios[0]).unwrap();
    assert_eq!(studio.films.len(), 2);
    assert_eq!(studio.awards.len(), 3);

    let film = studio.films[0];
    assert_eq!(session.get::<Film>(film).unwrap().studio, Some(studios[0]));
    assert!(session.flush().expect("flush").is_empty());
}

#[test]
fn single_statement_fetch_join_repeats_no_root() {
    let conn = open();
    let unit = unit().with_session_config(SessionConfig::default().split_fetch_joins(false));
    seed(&conn, &unit);

    let mut session = unit.session(&conn);
    let query = CriteriaQuery::from("Studio", "s")
        .fetch_join("s", "films", "f")
        .fetch_join("s", "awards", "w");
    assert_eq!(session.statements(&query).expect("translate").len(), 1);

    let studios = session.query_entities(&query).expect("query");
    assert_eq!(studios.len(), 1);
    let studio = session.get::<Studio>(studios[0]).unwrap();
    assert_eq!(studio.films.len(), 2);
    assert_eq!(studio.awards.len(), 3);
}

#[test]
fn parent_removed_before_its_child_is_deleted_after_it() {
    let conn = open();
    let unit = unit();
    let mut session = unit.session(&conn);

    let miyazaki = session
        .persist_new(Director {
            name: "Hayao Miyazaki".to_string(),
            ..Director::default()
        })
        .expect("persist director");
    let film = session
        .persist_new(Film {
            title: "Porco Rosso".to_string(),
            director: Some(miyazaki),
            ..Film::default()
        })
        .expect("persist film");
    session.flush().expect("flush");

    // Director has no collection of films, so nothing links the two but the key.
    session.remove(miyazaki).expect("remove director");
    session.remove(film).expect("remove film");
    let result = session.flush().expect("flush");
    assert_eq!(result.deleted, 2);
    assert_eq!(count_rows(&conn, "films"), 0);
    assert_eq!(count_rows(&conn, "directors"), 0);
    assert_eq!(session.status(miyazaki), Some(EntityStatus::Removed));
    assert_eq!(session.status(film), Some(EntityStatus::Removed));
}

#[test]
fn unloaded_inverse_collection_still_deletes_children_first() {
    let conn = open();
    let unit = unit();
    let studio_key = seed(&conn, &unit);

    let mut session = unit.session(&conn);
    let studio = session.find::<Studio>(studio_key).expect("find").expect("row");
    let films = session
        .query_entities(&CriteriaQuery::from("Film", "f").order_by(path("f", "title")))
        .expect("query films");
    assert_eq!(films.len(), 2);
    assert!(session.get::<Studio>(studio).unwrap().films.is_empty());

    session.remove(studio).expect("remove studio");
    for film in &films {
        session.remove(*film).expect("remove film");
    }
    let result = session.flush().expect("flush");
    assert_eq!(result.deleted, 3);
    assert_eq!(result.link_deletes, 3);
    assert_eq!(count_rows(&conn, "films"), 0);
    assert_eq!(count_rows(&conn, "studios"), 0);
    assert_eq!(count_rows(&conn, "awards WHERE studio_id IS NULL"), 3);
}

#[test]
fn moving_a_child_off_a_removed_parent_updates_it_first() {
    let conn = open();
    let unit = unit();
    let mut session = unit.session(&conn);

    let old = session
        .persist_new(Director {
            name: "Isao Takahata".to_string(),
            ..Director::default()
        })
        .expect("persist director");
    let film = session
        .persist_new(Film {
            title: "Pom Poko".to_string(),
            director: Some(old),
            ..Film::default()
        })
        .expect("persist film");
    session.flush().expect("flush");

    session.remove(old).expect("remove director");
    session.set(film, "director", AttrValue::One(None)).expect("unlink");
    let result = session.flush().expect("flush");
    assert_eq!(result.deleted, 1);
    assert_eq!(result.updated, 1);
    assert_eq!(count_rows(&conn, "films WHERE director_id IS NULL"), 1);
}

//! Owned relationships and lazy target resolution

mod common;

use common::*;
use elif_orm_core::{
    DatabaseValue, EntityDescriptor, EntityRecord, EntityRegistry, ExecutionContext, OrmError,
    OwnedToMany, OwnedToOne, OwningToOne, Record, RouteHint, StatementExecutor,
};

fn author(id: Option<i64>) -> EntityRecord {
    EntityRecord::new("Author", Record::new().with("id", id).with("name", "Ursula"))
}

fn book(id: Option<i64>, title: &str, author_id: Option<i64>) -> EntityRecord {
    EntityRecord::new(
        "Book",
        Record::new()
            .with("id", id)
            .with("title", title)
            .with("author_id", author_id),
    )
}

#[tokio::test]
async fn test_unsaved_author_has_no_books() {
    let blog = blog().await;
    let books = OwnedToMany::new("Book");

    let loaded: Vec<Record> = blog.ctx.load(&books, &author(None)).await.unwrap();
    assert!(loaded.is_empty());
    assert_eq!(blog.pool.acquire_count(), 1);
    assert_eq!(blog.pool.active_connections(), 0);
}

#[tokio::test]
async fn test_owned_to_many_create_save_count_delete() {
    let blog = blog().await;
    let books = OwnedToMany::new("Book");
    let ursula = author(Some(7));
    let mut conn = blog.ctx.connection(RouteHint::Write).await.unwrap();

    let created = books
        .create(&blog.registry, &ursula, &[("title", "The Dispossessed".into())], &mut conn)
        .await
        .unwrap();
    assert_eq!(created.get::<i64>("author_id").unwrap(), 7);
    assert!(created.get::<i64>("id").is_ok());

    let orphan = book(None, "Lathe of Heaven", None);
    let stray = blog
        .db
        .insert_row("book", Record::new().with("title", "Earthsea").with("author_id", 99i64))
        .await
        .unwrap();
    let stray = book(Some(stray.get::<i64>("id").unwrap()), "Earthsea", Some(99));

    let saved = books
        .save_many(&blog.registry, &ursula, &[&orphan, &stray], &mut conn)
        .await
        .unwrap();
    assert_eq!(saved, 2);
    assert_eq!(books.count(&blog.registry, &ursula, &mut conn).await.unwrap(), 3);

    let titles: Vec<String> = books
        .load::<Record>(&blog.registry, &ursula, &mut conn)
        .await
        .unwrap()
        .iter()
        .map(|b| b.get::<String>("title").unwrap())
        .collect();
    assert!(titles.contains(&"Earthsea".to_string()));

    assert_eq!(books.delete_all(&blog.registry, &ursula, &mut conn).await.unwrap(), 3);
    assert_eq!(books.count(&blog.registry, &ursula, &mut conn).await.unwrap(), 0);
    conn.release().await.unwrap();
}

#[tokio::test]
async fn test_owned_operations_through_the_context() {
    let blog = blog().await;
    let books = OwnedToMany::new("Book");
    let ursula = author(Some(7));

    let first: &[(&str, DatabaseValue)] = &[("title", DatabaseValue::from("The Dispossessed"))];
    let second: &[(&str, DatabaseValue)] = &[("title", DatabaseValue::from("Always Coming Home"))];
    let created = blog
        .ctx
        .create_many(&books, &ursula, &[first, second])
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|b| b.get::<i64>("author_id").unwrap() == 7));
    assert_ne!(
        created[0].get::<i64>("id").unwrap(),
        created[1].get::<i64>("id").unwrap()
    );

    let single = blog
        .ctx
        .create(&books, &ursula, &[("title", "The Word for World Is Forest".into())])
        .await
        .unwrap();
    assert_eq!(single.get::<i64>("author_id").unwrap(), 7);

    let orphan = book(None, "Lathe of Heaven", None);
    assert_eq!(blog.ctx.save(&books, &ursula, &orphan).await.unwrap(), 1);
    assert_eq!(blog.ctx.count(&books, &ursula).await.unwrap(), 4);

    let none: [&[(&str, DatabaseValue)]; 0] = [];
    assert!(blog.ctx.create_many(&books, &ursula, &none).await.unwrap().is_empty());

    assert_eq!(blog.ctx.delete_all(&books, &ursula).await.unwrap(), 4);
    assert_eq!(blog.ctx.count(&books, &ursula).await.unwrap(), 0);
    assert_eq!(blog.pool.active_connections(), 0);
}

#[tokio::test]
async fn test_create_many_rejects_uneven_rows_before_writing() {
    let blog = blog().await;
    let books = OwnedToMany::new("Book");
    let ursula = author(Some(7));

    let titled: &[(&str, DatabaseValue)] = &[("title", DatabaseValue::from("Rocannon's World"))];
    let empty: &[(&str, DatabaseValue)] = &[];
    let err = blog
        .ctx
        .create_many(&books, &ursula, &[titled, empty])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Configuration(_)));
    assert!(blog.db.rows("book").await.unwrap().is_empty());

    let err = blog
        .ctx
        .create_many(&books, &author(None), &[titled])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::MissingKey { .. }));
    assert_eq!(blog.pool.active_connections(), 0);
}

#[tokio::test]
async fn test_owning_to_one_through_the_context() {
    let blog = blog().await;
    let profile = OwningToOne::new("Profile");
    let user = EntityRecord::new("User", Record::new().with("id", 3i64).with("email", "a@b.c"));

    blog.ctx
        .create_one(&profile, &user, &[("bio", "hello".into())])
        .await
        .unwrap();
    let loaded: Option<Record> = blog.ctx.load_first(&profile, &user).await.unwrap();
    assert_eq!(loaded.unwrap().get::<String>("bio").unwrap(), "hello");

    let detached = EntityRecord::new(
        "Profile",
        Record::new().with("id", Option::<i64>::None).with("bio", "second"),
    );
    assert_eq!(blog.ctx.save_one(&profile, &user, &detached).await.unwrap(), 1);
    assert_eq!(blog.ctx.count(&profile, &user).await.unwrap(), 2);

    assert_eq!(blog.ctx.delete_one(&profile, &user).await.unwrap(), 2);
    assert_eq!(blog.ctx.count(&profile, &user).await.unwrap(), 0);
    assert_eq!(blog.pool.active_connections(), 0);
}

#[tokio::test]
async fn test_save_rejects_wrong_entity() {
    let blog = blog().await;
    let books = OwnedToMany::new("Book");
    let mut conn = blog.ctx.connection(RouteHint::Write).await.unwrap();

    let err = books
        .save(&blog.registry, &author(Some(1)), &post(Some(1)), &mut conn)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Configuration(_)));
    conn.release().await.unwrap();
}

#[tokio::test]
async fn test_owned_to_one_follows_the_parent_foreign_key() {
    let blog = blog().await;
    blog.db
        .insert_row("author", Record::new().with("id", 7i64).with("name", "Ursula"))
        .await
        .unwrap();
    let written_by = OwnedToOne::new("Author");

    let found: Option<Record> = blog
        .ctx
        .load_first(&written_by, &book(Some(1), "Dispossessed", Some(7)))
        .await
        .unwrap();
    assert_eq!(found.unwrap().get::<String>("name").unwrap(), "Ursula");

    let none: Option<Record> = blog
        .ctx
        .load_first(&written_by, &book(Some(2), "Anonymous", None))
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_owning_to_one_lifecycle() {
    let blog = blog().await;
    let profile = OwningToOne::new("Profile");
    let user = EntityRecord::new("User", Record::new().with("id", 3i64).with("email", "a@b.c"));
    let mut conn = blog.ctx.connection(RouteHint::Write).await.unwrap();

    assert!(profile
        .load::<Record>(&blog.registry, &user, &mut conn)
        .await
        .unwrap()
        .is_none());

    profile
        .create(&blog.registry, &user, &[("bio", "hello".into())], &mut conn)
        .await
        .unwrap();
    let loaded = profile
        .load::<Record>(&blog.registry, &user, &mut conn)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.get::<i64>("user_id").unwrap(), 3);

    assert_eq!(profile.delete(&blog.registry, &user, &mut conn).await.unwrap(), 1);
    conn.release().await.unwrap();
}

#[tokio::test]
async fn test_lazy_resolution_succeeds_after_late_registration() {
    let blog = blog().await;
    let registry = std::sync::Arc::new(EntityRegistry::new());
    registry
        .register(EntityDescriptor::builder("Post").attribute("title").build().unwrap())
        .unwrap();
    let ctx = ExecutionContext::new(
        std::sync::Arc::new(elif_orm_core::ConnectionRouter::new(
            elif_orm_core::ManagedPool::new(
                elif_orm_core::PoolRole::Write,
                "memory://blog",
                blog.pool.clone(),
            ),
            None,
            Default::default(),
            Default::default(),
        )),
        registry.clone(),
    );

    let tags = elif_orm_core::ManyToMany::new("Tag");
    let err = ctx.load::<Record>(&tags, &post(Some(1))).await.unwrap_err();
    match err {
        OrmError::Resolution { name } => assert_eq!(name, "Tag"),
        other => panic!("expected Resolution, got {:?}", other),
    }

    registry
        .register(EntityDescriptor::builder("Tag").attribute("name").build().unwrap())
        .unwrap();
    ctx.attach(&tags, &post(Some(1)), [10i64], &[]).await.unwrap();
    let loaded: Vec<Tag> = ctx.load(&tags, &post(Some(1))).await.unwrap();
    assert_eq!(loaded, vec![Tag { id: 10, name: "rust".to_string() }]);
}

#[tokio::test]
async fn test_transaction_scope_makes_sync_atomic() {
    let blog = blog().await;
    let tags = elif_orm_core::ManyToMany::new("Tag");
    let post = post(Some(1));
    blog.ctx.attach(&tags, &post, [10i64], &[]).await.unwrap();

    let mut scope = blog.ctx.begin().await.unwrap();
    let registry = scope.registry();
    tags.sync(&registry, &post, [20i64, 30], &[], &mut scope).await.unwrap();
    let inside: Vec<Tag> = scope.load(&tags, &post).await.unwrap();
    assert_eq!(inside.len(), 2);
    scope.rollback().await.unwrap();

    let after: Vec<Tag> = blog.ctx.load(&tags, &post).await.unwrap();
    assert_eq!(after.iter().map(|t| t.id).collect::<Vec<_>>(), vec![10]);

    let mut scope = blog.ctx.begin().await.unwrap();
    let count = tags.count(&registry, &post, &mut scope).await.unwrap();
    assert_eq!(count, 1);
    scope.execute(&elif_orm_core::query::DeleteStatement::from(
        &elif_orm_core::Identifier::parse("post_tag").unwrap(),
    )
    .into())
    .await
    .unwrap();
    scope.commit().await.unwrap();
    assert!(blog.db.rows("post_tag").await.unwrap().is_empty());
}

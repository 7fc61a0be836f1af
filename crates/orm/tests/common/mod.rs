#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use elif_orm_core::backends::{InMemoryDatabase, InMemoryPool, TableSpec};
use elif_orm_core::{
    ConnectionRouter, DatabaseValue, EntityDescriptor, EntityRecord, EntityRegistry,
    ExecutionContext, HealthMonitorConfig, ManagedPool, PoolRole, Record, RouterConfig,
};
use serde::Deserialize;

/// Blog schema on a single in-memory pool
pub struct Blog {
    pub db: Arc<InMemoryDatabase>,
    pub pool: Arc<InMemoryPool>,
    pub registry: Arc<EntityRegistry>,
    pub ctx: ExecutionContext,
}

pub fn blog_registry() -> Arc<EntityRegistry> {
    let registry = EntityRegistry::new();
    registry
        .register(EntityDescriptor::builder("Post").attribute("title").build().unwrap())
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Tag")
                .attribute("name")
                .soft_deletes("deleted_at")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(EntityDescriptor::builder("Author").attribute("name").build().unwrap())
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Book")
                .attribute("title")
                .attribute("author_id")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(EntityDescriptor::builder("User").attribute("email").build().unwrap())
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Profile")
                .attribute("bio")
                .attribute("user_id")
                .build()
                .unwrap(),
        )
        .unwrap();
    Arc::new(registry)
}

pub async fn blog_database() -> Arc<InMemoryDatabase> {
    let db = InMemoryDatabase::new();
    db.create_table(TableSpec::new("post").auto_increment("id")).await;
    db.create_table(TableSpec::new("tag").auto_increment("id")).await;
    db.create_table(TableSpec::new("post_tag").unique(&["post_id", "tag_id"]))
        .await;
    db.create_table(TableSpec::new("author").auto_increment("id")).await;
    db.create_table(TableSpec::new("book").auto_increment("id")).await;
    db.create_table(TableSpec::new("user").auto_increment("id")).await;
    db.create_table(TableSpec::new("profile").auto_increment("id")).await;

    for (id, name) in [(10i64, "rust"), (20, "sql"), (30, "async")] {
        db.insert_row("tag", Record::new().with("id", id).with("name", name))
            .await
            .unwrap();
    }
    db
}

pub async fn blog() -> Blog {
    blog_on(blog_database().await)
}

/// Blog fixture over an existing database
pub fn blog_on(db: Arc<InMemoryDatabase>) -> Blog {
    let pool = Arc::new(InMemoryPool::new("blog", db.clone()));
    let router = ConnectionRouter::new(
        ManagedPool::new(PoolRole::Write, "memory://blog", pool.clone()),
        None,
        RouterConfig::default(),
        HealthMonitorConfig::default(),
    );
    let registry = blog_registry();
    let ctx = ExecutionContext::new(Arc::new(router), registry.clone());
    Blog {
        db,
        pool,
        registry,
        ctx,
    }
}

/// Primary and replica with distinguishable data in `post`
pub struct Replicated {
    pub primary: Arc<InMemoryPool>,
    pub replica: Arc<InMemoryPool>,
    pub router: Arc<ConnectionRouter>,
    pub ctx: ExecutionContext,
}

pub async fn replicated(config: RouterConfig, health: HealthMonitorConfig) -> Replicated {
    let primary_db = blog_database().await;
    let replica_db = blog_database().await;
    primary_db
        .insert_row("post", Record::new().with("id", 1i64).with("title", "from primary"))
        .await
        .unwrap();
    replica_db
        .insert_row("post", Record::new().with("id", 1i64).with("title", "from replica"))
        .await
        .unwrap();

    let primary = Arc::new(InMemoryPool::new("primary", primary_db));
    let replica = Arc::new(InMemoryPool::new("replica", replica_db));
    let router = Arc::new(ConnectionRouter::new(
        ManagedPool::new(PoolRole::Write, "memory://primary", primary.clone()),
        Some(ManagedPool::new(PoolRole::Read, "memory://replica", replica.clone())),
        config,
        health,
    ));
    let ctx = ExecutionContext::new(router.clone(), blog_registry());
    Replicated {
        primary,
        replica,
        router,
        ctx,
    }
}

pub fn split_config() -> RouterConfig {
    RouterConfig {
        split_enabled: true,
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

pub fn post(id: Option<i64>) -> EntityRecord {
    EntityRecord::new("Post", Record::new().with("id", id).with("title", "hello"))
}

pub fn ids(values: &[i64]) -> Vec<DatabaseValue> {
    values.iter().map(|v| DatabaseValue::Int64(*v)).collect()
}

pub fn as_ids(values: &[DatabaseValue]) -> Vec<i64> {
    let mut ids: Vec<i64> = values.iter().filter_map(DatabaseValue::as_i64).collect();
    ids.sort();
    ids
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl elif_orm_core::FromRow for Tag {
    fn from_row(record: &Record) -> elif_orm_core::OrmResult<Self> {
        record.deserialize()
    }
}

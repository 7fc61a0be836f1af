//! In-memory backend
//!
//! Interprets structured statements against tables held in process memory.
//! Each [`InMemoryPool`] stands in for one server: several pools can share a
//! database (a primary and its replica) and each can be made unavailable,
//! slow, or failing independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::core::*;
use crate::error::{OrmError, OrmResult};
use crate::query::{
    ColumnRef, Condition, DeleteStatement, InsertStatement, JoinType, OnConflict, Projection,
    QueryOperator, SelectStatement, Statement, UpdateStatement,
};

/// Table definition for the in-memory engine
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    name: String,
    auto_increment: Option<String>,
    unique: Vec<Vec<String>>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_increment: None,
            unique: Vec::new(),
        }
    }

    /// Integer key assigned on insert when not supplied; also unique
    pub fn auto_increment(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.unique.push(vec![column.clone()]);
        self.auto_increment = Some(column);
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

#[derive(Debug, Clone)]
struct Table {
    spec: TableSpec,
    rows: Vec<Record>,
    next_id: i64,
}

type Tables = HashMap<String, Table>;

/// Shared storage behind one or more in-memory pools
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    tables: Mutex<Tables>,
}

impl InMemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn create_table(&self, spec: TableSpec) {
        let mut tables = self.tables.lock().await;
        tables.insert(
            spec.name.clone(),
            Table {
                spec,
                rows: Vec::new(),
                next_id: 1,
            },
        );
    }

    /// Insert one row directly, bypassing statements
    pub async fn insert_row(&self, table: &str, record: Record) -> OrmResult<Record> {
        let mut tables = self.tables.lock().await;
        let table = table_mut(&mut tables, table)?;
        insert_record(table, record, &OnConflict::Fail)?
            .ok_or_else(|| OrmError::Database("row was not inserted".to_string()))
    }

    /// Snapshot of a table's rows in insertion order
    pub async fn rows(&self, table: &str) -> OrmResult<Vec<Record>> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| missing_table(table))
    }
}

/// Per-pool fault switches
#[derive(Debug)]
struct PoolFaults {
    available: AtomicBool,
    fail_statements: AtomicBool,
    probe_latency_ms: AtomicU64,
    acquired: AtomicU64,
    active: AtomicU32,
    closed: AtomicBool,
}

impl PoolFaults {
    fn check_available(&self, name: &str) -> OrmResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OrmError::Connection(format!("pool '{}' is closed", name)));
        }
        if !self.available.load(Ordering::Acquire) {
            return Err(OrmError::Connection(format!("server '{}' is unreachable", name)));
        }
        Ok(())
    }

    fn check_statement(&self) -> OrmResult<()> {
        if self.fail_statements.load(Ordering::Acquire) {
            return Err(OrmError::Connection(
                "connection reset while running statement".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool over an [`InMemoryDatabase`]
#[derive(Debug)]
pub struct InMemoryPool {
    name: String,
    database: Arc<InMemoryDatabase>,
    faults: Arc<PoolFaults>,
}

impl InMemoryPool {
    pub fn new(name: impl Into<String>, database: Arc<InMemoryDatabase>) -> Self {
        Self {
            name: name.into(),
            database,
            faults: Arc::new(PoolFaults {
                available: AtomicBool::new(true),
                fail_statements: AtomicBool::new(false),
                probe_latency_ms: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
                active: AtomicU32::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Arc<InMemoryDatabase> {
        &self.database
    }

    /// Make acquisition and health probes fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.faults.available.store(available, Ordering::Release);
    }

    /// Make statements on connections from this pool fail with a connection error
    pub fn set_fail_statements(&self, fail: bool) {
        self.faults.fail_statements.store(fail, Ordering::Release);
    }

    /// Delay every health probe by `latency`
    pub fn set_probe_latency(&self, latency: Duration) {
        self.faults
            .probe_latency_ms
            .store(latency.as_millis() as u64, Ordering::Release);
    }

    /// Connections handed out so far
    pub fn acquire_count(&self) -> u64 {
        self.faults.acquired.load(Ordering::Acquire)
    }

    /// Connections currently checked out
    pub fn active_connections(&self) -> u32 {
        self.faults.active.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DatabasePool for InMemoryPool {
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        self.faults.check_available(&self.name)?;
        self.faults.acquired.fetch_add(1, Ordering::AcqRel);
        self.faults.active.fetch_add(1, Ordering::AcqRel);

        Ok(Box::new(InMemoryConnection {
            database: self.database.clone(),
            faults: self.faults.clone(),
            open: true,
        }))
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        self.faults.check_available(&self.name)?;
        self.faults.acquired.fetch_add(1, Ordering::AcqRel);

        let snapshot = self.database.tables.lock().await.clone();
        Ok(Box::new(InMemoryTransaction {
            database: self.database.clone(),
            faults: self.faults.clone(),
            working: Some(snapshot),
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        self.faults.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn stats(&self) -> DatabasePoolStats {
        let active = self.faults.active.load(Ordering::Acquire);
        DatabasePoolStats {
            total_connections: active,
            idle_connections: 0,
            active_connections: active,
        }
    }

    async fn health_check(&self) -> OrmResult<Duration> {
        let start = Instant::now();
        self.faults.check_available(&self.name)?;

        let latency = self.faults.probe_latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        Ok(start.elapsed())
    }
}

/// Connection handed out by [`InMemoryPool`]
pub struct InMemoryConnection {
    database: Arc<InMemoryDatabase>,
    faults: Arc<PoolFaults>,
    open: bool,
}

impl InMemoryConnection {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.faults.active.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn check_open(&self) -> OrmResult<()> {
        if !self.open {
            return Err(OrmError::Connection("Connection already closed".to_string()));
        }
        self.faults.check_statement()
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl StatementExecutor for InMemoryConnection {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        self.check_open()?;
        let mut tables = self.database.tables.lock().await;
        run_statement(&mut tables, statement).map(|rows| rows.affected)
    }

    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>> {
        self.check_open()?;
        let mut tables = self.database.tables.lock().await;
        run_statement(&mut tables, statement).map(|rows| rows.records)
    }
}

#[async_trait]
impl DatabaseConnection for InMemoryConnection {
    async fn close(&mut self) -> OrmResult<()> {
        self.release();
        Ok(())
    }
}

/// Transaction over a snapshot; commit replaces the shared tables wholesale
pub struct InMemoryTransaction {
    database: Arc<InMemoryDatabase>,
    faults: Arc<PoolFaults>,
    working: Option<Tables>,
}

impl InMemoryTransaction {
    fn working(&mut self) -> OrmResult<&mut Tables> {
        self.faults.check_statement()?;
        self.working
            .as_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl StatementExecutor for InMemoryTransaction {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        run_statement(self.working()?, statement).map(|rows| rows.affected)
    }

    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>> {
        run_statement(self.working()?, statement).map(|rows| rows.records)
    }
}

#[async_trait]
impl DatabaseTransaction for InMemoryTransaction {
    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let working = self
            .working
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        *self.database.tables.lock().await = working;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        self.working
            .take()
            .map(|_| ())
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

/// Backend for `memory://<name>` URLs; pools with the same name share storage
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    databases: std::sync::Mutex<HashMap<String, Arc<InMemoryDatabase>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseBackend for InMemoryBackend {
    async fn create_pool(
        &self,
        database_url: &str,
        _config: DatabasePoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>> {
        let parsed = url::Url::parse(database_url)
            .map_err(|e| OrmError::Configuration(format!("Invalid database URL: {}", e)))?;
        let name = parsed.host_str().unwrap_or("default").to_string();

        let database = {
            let mut databases = self
                .databases
                .lock()
                .map_err(|_| OrmError::Connection("in-memory registry poisoned".to_string()))?;
            databases
                .entry(name.clone())
                .or_insert_with(InMemoryDatabase::new)
                .clone()
        };

        Ok(Arc::new(InMemoryPool::new(name, database)))
    }

    fn backend_type(&self) -> crate::backends::DatabaseBackendType {
        crate::backends::DatabaseBackendType::Memory
    }

    fn validate_database_url(&self, url: &str) -> OrmResult<()> {
        if !url.starts_with("memory://") {
            return Err(OrmError::Configuration(
                "Invalid in-memory URL scheme".to_string(),
            ));
        }
        Ok(())
    }
}

struct StatementOutput {
    affected: u64,
    records: Vec<Record>,
}

fn missing_table(name: &str) -> OrmError {
    OrmError::Database(format!("relation \"{}\" does not exist", name))
}

fn table_ref<'a>(tables: &'a Tables, name: &str) -> OrmResult<&'a Table> {
    tables.get(name).ok_or_else(|| missing_table(name))
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> OrmResult<&'a mut Table> {
    tables.get_mut(name).ok_or_else(|| missing_table(name))
}

fn run_statement(tables: &mut Tables, statement: &Statement) -> OrmResult<StatementOutput> {
    match statement {
        Statement::Select(select) => {
            let records = run_select(tables, select)?;
            Ok(StatementOutput {
                affected: records.len() as u64,
                records,
            })
        }
        Statement::Insert(insert) => run_insert(tables, insert),
        Statement::Update(update) => run_update(tables, update),
        Statement::Delete(delete) => run_delete(tables, delete),
    }
}

/// Rows from each joined table, tagged with the table name
type JoinedRow<'a> = Vec<(&'a str, &'a Record)>;

fn lookup<'a>(row: &JoinedRow<'a>, column: &ColumnRef) -> Option<&'a DatabaseValue> {
    let name = column.column.as_str();
    match &column.table {
        Some(table) => row
            .iter()
            .find(|(t, _)| *t == table.as_str())
            .and_then(|(_, record)| record.get_value(name)),
        None => row.iter().find_map(|(_, record)| record.get_value(name)),
    }
}

fn matches(row: &JoinedRow<'_>, condition: &Condition) -> bool {
    let value = lookup(row, &condition.column);
    let is_null = value.map_or(true, DatabaseValue::is_null);

    match condition.operator {
        QueryOperator::Equal => match (value, condition.values.first()) {
            (Some(v), Some(expected)) => v.sql_eq(expected),
            _ => false,
        },
        QueryOperator::In => value.map_or(false, |v| condition.values.iter().any(|c| v.sql_eq(c))),
        QueryOperator::NotIn => {
            !is_null && value.map_or(false, |v| !condition.values.iter().any(|c| v.sql_eq(c)))
        }
        QueryOperator::IsNull => is_null,
        QueryOperator::IsNotNull => !is_null,
    }
}

fn matches_all(row: &JoinedRow<'_>, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| matches(row, condition))
}

fn run_select(tables: &Tables, select: &SelectStatement) -> OrmResult<Vec<Record>> {
    let base = table_ref(tables, select.table.as_str())?;
    let mut rows: Vec<JoinedRow<'_>> = base
        .rows
        .iter()
        .map(|record| vec![(select.table.as_str(), record)])
        .collect();

    for join in &select.joins {
        let joined = table_ref(tables, join.table.as_str())?;
        let mut next = Vec::new();
        for row in rows {
            let mut matched = false;
            for record in &joined.rows {
                let mut candidate = row.clone();
                candidate.push((join.table.as_str(), record));
                let left = lookup(&candidate, &join.left);
                let right = lookup(&candidate, &join.right);
                if let (Some(l), Some(r)) = (left, right) {
                    if l.sql_eq(r) {
                        matched = true;
                        next.push(candidate);
                    }
                }
            }
            if !matched && join.join_type == JoinType::Left {
                next.push(row);
            }
        }
        rows = next;
    }

    let mut filtered: Vec<JoinedRow<'_>> = rows
        .into_iter()
        .filter(|row| matches_all(row, &select.conditions))
        .collect();
    if let Some(limit) = select.limit {
        filtered.truncate(limit as usize);
    }

    let records = match &select.projection {
        Projection::Count => vec![Record::new().with("count", filtered.len() as i64)],
        Projection::AllFrom(table) => filtered
            .iter()
            .map(|row| {
                row.iter()
                    .find(|(t, _)| *t == table.as_str())
                    .map(|(_, record)| (*record).clone())
                    .unwrap_or_default()
            })
            .collect(),
        Projection::Columns(columns) => filtered
            .iter()
            .map(|row| {
                let mut record = Record::new();
                for column in columns {
                    let value = lookup(row, column).cloned().unwrap_or(DatabaseValue::Null);
                    record.set(column.column.as_str(), value);
                }
                record
            })
            .collect(),
    };
    Ok(records)
}

fn same_key(a: &Record, b: &Record, columns: &[String]) -> bool {
    columns.iter().all(|column| match (a.get_value(column), b.get_value(column)) {
        (Some(x), Some(y)) => x.sql_eq(y),
        _ => false,
    })
}

/// Insert one record; `Ok(None)` when the conflict clause skipped it
fn insert_record(
    table: &mut Table,
    mut record: Record,
    on_conflict: &OnConflict,
) -> OrmResult<Option<Record>> {
    if let Some(column) = table.spec.auto_increment.clone() {
        match record.get_value(&column).and_then(DatabaseValue::as_i64) {
            Some(id) => table.next_id = table.next_id.max(id + 1),
            None => {
                record.set(column, table.next_id);
                table.next_id += 1;
            }
        }
    }

    let mut keys = table.spec.unique.clone();
    if let OnConflict::Ignore { target } = on_conflict {
        let target: Vec<String> = target.iter().map(|c| c.as_str().to_string()).collect();
        if !target.is_empty() && !keys.contains(&target) {
            keys.push(target);
        }
    }

    for key in &keys {
        if table.rows.iter().any(|existing| same_key(existing, &record, key)) {
            let ignored = match on_conflict {
                OnConflict::Fail => false,
                OnConflict::Ignore { target } => {
                    target.is_empty()
                        || target.iter().map(|c| c.as_str()).eq(key.iter().map(String::as_str))
                }
            };
            if ignored {
                return Ok(None);
            }
            return Err(OrmError::UniqueViolation(format!(
                "duplicate key value violates unique constraint on {}({})",
                table.spec.name,
                key.join(", ")
            )));
        }
    }

    table.rows.push(record.clone());
    Ok(Some(record))
}

/// All rows or none: rows go into a staged copy that replaces the table
/// only when every row was accepted
fn run_insert(tables: &mut Tables, insert: &InsertStatement) -> OrmResult<StatementOutput> {
    let table = table_mut(tables, insert.table.as_str())?;
    let mut staged = table.clone();

    let mut inserted = Vec::new();
    for values in &insert.rows {
        let mut record = Record::new();
        for (column, value) in insert.columns.iter().zip(values) {
            record.set(column.as_str(), value.clone());
        }
        if let Some(record) = insert_record(&mut staged, record, &insert.on_conflict)? {
            inserted.push(record);
        }
    }
    *table = staged;

    Ok(StatementOutput {
        affected: inserted.len() as u64,
        records: if insert.returning { inserted } else { Vec::new() },
    })
}

fn run_update(tables: &mut Tables, update: &UpdateStatement) -> OrmResult<StatementOutput> {
    let name = update.table.as_str();
    let table = table_mut(tables, name)?;

    let mut affected = 0;
    for record in table.rows.iter_mut() {
        if matches_all(&vec![(name, &*record)], &update.conditions) {
            for (column, value) in &update.assignments {
                record.set(column.as_str(), value.clone());
            }
            affected += 1;
        }
    }

    Ok(StatementOutput {
        affected,
        records: Vec::new(),
    })
}

fn run_delete(tables: &mut Tables, delete: &DeleteStatement) -> OrmResult<StatementOutput> {
    let name = delete.table.as_str();
    let table = table_mut(tables, name)?;

    let before = table.rows.len();
    table
        .rows
        .retain(|record| !matches_all(&vec![(name, record)], &delete.conditions));

    Ok(StatementOutput {
        affected: (before - table.rows.len()) as u64,
        records: Vec::new(),
    })
}

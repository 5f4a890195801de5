use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{Transaction, TransactionManager};
use crate::error::StoreError;

type Table = BTreeMap<String, Value>;

struct Shared {
    tables: RwLock<HashMap<String, Table>>,
    begin_faults: Mutex<VecDeque<StoreError>>,
    commit_faults: Mutex<VecDeque<StoreError>>,
    commits: AtomicU64,
}

/// Thread-safe in-memory database with atomic multi-table transactions.
///
/// Rows are JSON values grouped into named tables and keyed by string.
/// `insert` enforces a unique key per table. Writes staged in an
/// [`InMemoryTransaction`] become visible only when it commits, all at once.
///
/// Begin and commit failures can be injected to exercise retry paths:
///
/// ```
/// use integration_outbox::{InMemoryDatabase, StoreError};
///
/// let db = InMemoryDatabase::new();
/// db.fail_next_commit(StoreError::Transient("deadlock victim".into()));
/// ```
#[derive(Clone)]
pub struct InMemoryDatabase {
    shared: Arc<Shared>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(HashMap::new()),
                begin_faults: Mutex::new(VecDeque::new()),
                commit_faults: Mutex::new(VecDeque::new()),
                commits: AtomicU64::new(0),
            }),
        }
    }

    /// Make the next `begin` fail with `err`. Calls queue up.
    pub fn fail_next_begin(&self, err: StoreError) {
        if let Ok(mut faults) = self.shared.begin_faults.lock() {
            faults.push_back(err);
        }
    }

    /// Make the next commit fail with `err` without applying anything.
    /// Calls queue up; each commit consumes one.
    pub fn fail_next_commit(&self, err: StoreError) {
        if let Ok(mut faults) = self.shared.commit_faults.lock() {
            faults.push_back(err);
        }
    }

    /// Number of transactions committed so far.
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Read a committed row.
    pub fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let tables = self
            .shared
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        match tables.get(table).and_then(|rows| rows.get(key)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// All committed rows of a table, in key order.
    pub fn scan<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, StoreError> {
        let tables = self
            .shared
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("scan"))?;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        rows.values()
            .map(|value| serde_json::from_value(value.clone()).map_err(StoreError::from))
            .collect()
    }

    pub fn count(&self, table: &str) -> Result<usize, StoreError> {
        let tables = self
            .shared
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("count"))?;
        Ok(tables.get(table).map(|rows| rows.len()).unwrap_or(0))
    }

    /// Auto-committed read-modify-write of a single row.
    ///
    /// The row is locked for the duration of `f`; if `f` fails the row is left
    /// untouched. Returns `None` when the row does not exist.
    pub fn update<T, R, F>(&self, table: &str, key: &str, f: F) -> Result<Option<R>, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<R, StoreError>,
    {
        let mut tables = self
            .shared
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("update"))?;
        let Some(slot) = tables.get_mut(table).and_then(|rows| rows.get_mut(key)) else {
            return Ok(None);
        };
        let mut row: T = serde_json::from_value(slot.clone())?;
        let result = f(&mut row)?;
        *slot = serde_json::to_value(&row)?;
        Ok(Some(result))
    }

    fn apply(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut tables = self
            .shared
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;

        if let Some(fault) = self
            .shared
            .commit_faults
            .lock()
            .map_err(|_| StoreError::LockPoisoned("commit faults"))?
            .pop_front()
        {
            return Err(fault);
        }

        // Validate everything before touching a single row.
        let mut overlay: HashMap<(&str, &str), bool> = HashMap::new();
        for write in &writes {
            let (table, key) = write.location();
            let present = overlay.get(&(table, key)).copied().unwrap_or_else(|| {
                tables
                    .get(table)
                    .map(|rows| rows.contains_key(key))
                    .unwrap_or(false)
            });
            match write {
                Write::Insert { .. } if present => {
                    return Err(StoreError::UniqueViolation {
                        table: table.to_string(),
                        key: key.to_string(),
                    });
                }
                Write::Insert { .. } | Write::Upsert { .. } => {
                    overlay.insert((table, key), true);
                }
                Write::Delete { .. } => {
                    overlay.insert((table, key), false);
                }
            }
        }
        drop(overlay);

        for write in writes {
            match write {
                Write::Insert { table, key, value } | Write::Upsert { table, key, value } => {
                    tables.entry(table).or_default().insert(key, value);
                }
                Write::Delete { table, key } => {
                    if let Some(rows) = tables.get_mut(&table) {
                        rows.remove(&key);
                    }
                }
            }
        }

        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for InMemoryDatabase {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        if let Some(fault) = self
            .shared
            .begin_faults
            .lock()
            .map_err(|_| StoreError::LockPoisoned("begin faults"))?
            .pop_front()
        {
            return Err(fault);
        }
        Ok(InMemoryTransaction {
            id: Uuid::new_v4(),
            db: self.clone(),
            writes: Vec::new(),
        })
    }
}

enum Write {
    Insert {
        table: String,
        key: String,
        value: Value,
    },
    Upsert {
        table: String,
        key: String,
        value: Value,
    },
    Delete {
        table: String,
        key: String,
    },
}

impl Write {
    fn location(&self) -> (&str, &str) {
        match self {
            Write::Insert { table, key, .. }
            | Write::Upsert { table, key, .. }
            | Write::Delete { table, key } => (table.as_str(), key.as_str()),
        }
    }

    fn targets(&self, table: &str, key: &str) -> bool {
        self.location() == (table, key)
    }
}

/// Transaction over an [`InMemoryDatabase`].
///
/// Reads see the transaction's own staged writes layered over committed data.
pub struct InMemoryTransaction {
    id: Uuid,
    db: InMemoryDatabase,
    writes: Vec<Write>,
}

impl InMemoryTransaction {
    /// Stage a new row; the commit fails if the key already exists.
    pub fn insert<T: Serialize>(
        &mut self,
        table: &str,
        key: &str,
        row: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(row)?;
        self.writes.push(Write::Insert {
            table: table.to_string(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    /// Stage an insert-or-replace.
    pub fn upsert<T: Serialize>(
        &mut self,
        table: &str,
        key: &str,
        row: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(row)?;
        self.writes.push(Write::Upsert {
            table: table.to_string(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    pub fn delete(&mut self, table: &str, key: &str) {
        self.writes.push(Write::Delete {
            table: table.to_string(),
            key: key.to_string(),
        });
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.writes.iter().rev().find(|w| w.targets(table, key)) {
            Some(Write::Insert { value, .. }) | Some(Write::Upsert { value, .. }) => {
                Ok(Some(serde_json::from_value(value.clone())?))
            }
            Some(Write::Delete { .. }) => Ok(None),
            None => self.db.get(table, key),
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.db.apply(self.writes)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        tracing::debug!(
            transaction_id = %self.id,
            staged = self.writes.len(),
            "rolling back transaction"
        );
        Ok(())
    }
}

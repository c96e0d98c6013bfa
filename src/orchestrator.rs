//! Keeps the schema registry and the physical tables consistent, and gates every data operation
//! through the registered column set.

use serde::Serialize;
use tracing::*;

use crate::constructs::{
    components::{ID_COLUMN, UPDATED_AT_COLUMN},
    conform_row,
    functions::Function,
    serialize_columns, ColumnSpec, Row, SchemaDefinition, Validatable, Value,
};
use crate::errors::{Error, Result};
use crate::executor::{Engine, ReadQuery, TableOutcome};
use crate::storage::{system::is_reserved_table_name, Database, Registry, SchemaRecord};

/// Page of table rows, together with the columns needed to interpret them.
#[derive(Debug, PartialEq, Serialize)]
pub struct TableData {
    pub data: Vec<Row>,
    pub columns: Vec<ColumnSpec>,
}

/// What a write through the orchestrator produced.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WriteOutcome {
    Inserted(Row),
    Updated { message: String, affected: usize },
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Registry,
    engine: Engine,
}

impl Orchestrator {
    pub fn new(database: Database) -> Self {
        Orchestrator {
            registry: Registry::new(database.clone()),
            engine: Engine::new(database),
        }
    }

    /// Create the physical table, then register it. Nothing is registered unless the table exists.
    pub fn create(&self, definition: &SchemaDefinition) -> Result<SchemaRecord> {
        definition.validate()?;
        if is_reserved_table_name(&definition.table_name) {
            return Err(Error::Validation(format!(
                "Table name `{}` is reserved",
                definition.table_name
            )));
        }
        if self.registry.find_by_name(&definition.table_name)?.is_some() {
            return Err(Error::DuplicateName("Duplicate table name".to_string()));
        }

        let outcome = self
            .engine
            .create_table(&definition.table_name, &definition.columns)?;
        if outcome.error {
            return Err(Error::Database(outcome.message));
        }

        self.register(definition)
    }

    /// Persist the record of a table that already exists, dropping the table if that fails.
    fn register(&self, definition: &SchemaDefinition) -> Result<SchemaRecord> {
        let registered = serialize_columns(&definition.metadata())
            .and_then(|metadata| self.registry.create(&definition.table_name, metadata));
        match registered {
            Ok(record) => {
                info!("📐 Registered schema `{}`", record.name);
                Ok(record)
            }
            // A concurrent create registered the name first, so the table is its to keep
            Err(error @ Error::DuplicateName(_)) => {
                warn!(
                    "Table `{}` was registered concurrently: {}",
                    definition.table_name, error
                );
                Err(error)
            }
            Err(error) => {
                warn!(
                    "Failed to register table `{}`, dropping it: {}",
                    definition.table_name, error
                );
                self.drop_orphan(&definition.table_name);
                Err(error)
            }
        }
    }

    /// Best-effort removal of a table whose registration failed.
    fn drop_orphan(&self, table_name: &str) {
        match self.engine.drop_table(table_name) {
            Ok(outcome) if !outcome.error => debug!("Dropped orphan table `{}`", table_name),
            Ok(outcome) => error!(
                "‼️ Table `{}` left without a schema record: {}",
                table_name, outcome.message
            ),
            Err(error) => error!(
                "‼️ Table `{}` left without a schema record: {}",
                table_name, error
            ),
        }
    }

    pub fn list(&self) -> Result<Vec<SchemaRecord>> {
        self.registry.list_all()
    }

    pub fn find(&self, id: &str) -> Result<SchemaRecord> {
        self.registry
            .find_by_id(id)?
            .ok_or_else(|| Error::NotFound("Table not found".to_string()))
    }

    /// Drop the table, then forget it. The record stays if the drop fails.
    pub fn delete(&self, id: &str) -> Result<TableOutcome> {
        let record = self.find(id)?;
        let outcome = self.engine.drop_table(&record.name)?;
        if outcome.error {
            return Err(Error::Database(outcome.message));
        }
        self.registry.remove(&record.id)?;
        info!("🧹 Deleted schema `{}`", record.name);
        Ok(outcome)
    }

    /// Registry record for a table name. Unregistered tables are never touched, even if they exist.
    fn registered(&self, table_name: &str) -> Result<SchemaRecord> {
        self.registry
            .find_by_name(table_name)?
            .ok_or_else(|| Error::NotFound("Schema not found".to_string()))
    }

    pub fn read_table_data(&self, table_name: &str, query: &ReadQuery) -> Result<TableData> {
        let record = self.registered(table_name)?;
        let columns = record.columns()?;
        if columns.is_empty() {
            return Err(Error::SchemaCorrupt(format!(
                "Schema `{}` has no columns",
                record.name
            )));
        }
        let data = self
            .engine
            .read_rows(&record.name, query)?
            .into_iter()
            .map(|row| conform_row(row, &columns))
            .collect();
        Ok(TableData { data, columns })
    }

    /// Insert when `id` is `None`, update the row with that id otherwise.
    ///
    /// Only keys that are registered columns reach the engine, the rest are dropped silently.
    pub fn write_table_data(
        &self,
        table_name: &str,
        id: Option<&str>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<WriteOutcome> {
        let record = self.registered(table_name)?;
        let columns = match record.columns() {
            Ok(columns) if !columns.is_empty() => columns,
            _ => {
                return Err(Error::SchemaInvalid(
                    "Schema metadata is invalid".to_string(),
                ))
            }
        };
        let mut filtered = filter_payload(&columns, data);
        if id.is_some() {
            // The surrogate identifier of an existing row never changes
            filtered.shift_remove(ID_COLUMN);
        }
        if filtered.is_empty() {
            return Err(Error::EmptyPayload);
        }

        match id {
            None => {
                let row = self.engine.insert_row(&record.name, filtered)?;
                Ok(WriteOutcome::Inserted(conform_row(row, &columns)))
            }
            Some(id) => {
                if columns.iter().any(|column| column.name == UPDATED_AT_COLUMN) {
                    filtered
                        .entry(UPDATED_AT_COLUMN.to_string())
                        .or_insert_with(|| Function::Now.call());
                }
                let affected = self.engine.update_row(&record.name, id, filtered)?;
                if affected == 0 {
                    return Err(Error::NotFound("Record not found".to_string()));
                }
                Ok(WriteOutcome::Updated {
                    message: "Record updated successfully".to_string(),
                    affected,
                })
            }
        }
    }

    /// Delete one row of a registered table and return it.
    pub fn delete_table_data(&self, table_name: &str, id: &str) -> Result<Row> {
        let record = self.registered(table_name)?;
        let row = self.engine.delete_row(&record.name, id)?;
        Ok(match record.columns() {
            Ok(columns) => conform_row(row, &columns),
            Err(_) => row,
        })
    }
}

/// Keep only the payload entries whose key is a registered column, in column order.
fn filter_payload(
    columns: &[ColumnSpec],
    mut data: serde_json::Map<String, serde_json::Value>,
) -> Row {
    columns
        .iter()
        .filter_map(|column| {
            data.remove(&column.name)
                .map(|value| (column.name.clone(), Value::from(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::DataType;
    use crate::executor::SortOrder;
    use crate::storage::{table_exists, table_names, test_utils::TestDatabase};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn get_users_definition() -> SchemaDefinition {
        SchemaDefinition::new(
            "users",
            vec![ColumnSpec::new("email", DataType::Varchar).unique().not_null()],
        )
    }

    fn payload(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("Expected an object, got {}", other),
        }
    }

    fn inserted_id(outcome: &WriteOutcome) -> String {
        match outcome {
            WriteOutcome::Inserted(row) => match &row["id"] {
                Value::Text(id) => id.clone(),
                other => panic!("Unexpected id {:?}", other),
            },
            other => panic!("Expected an insert, got {:?}", other),
        }
    }

    fn physical_table_count(test_db: &TestDatabase) -> usize {
        let conn = test_db.database.connection().unwrap();
        table_names(&conn).unwrap().len()
    }

    #[test]
    fn created_schema_is_listed_with_managed_columns() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator.create(&get_users_definition()).unwrap();

        let records = orchestrator.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "users");
        let names: Vec<String> = records[0]
            .columns()
            .unwrap()
            .into_iter()
            .map(|column| column.name)
            .collect();
        assert_eq!(names, vec!["id", "email", "createdAt", "updatedAt"]);
    }

    #[test]
    fn duplicate_create_leaves_tables_alone() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator.create(&get_users_definition()).unwrap();
        let table_count = physical_table_count(&test_db);

        assert_eq!(
            orchestrator.create(&get_users_definition()),
            Err(Error::DuplicateName("Duplicate table name".into()))
        );
        assert_eq!(
            orchestrator.create(&SchemaDefinition::new("USERS", vec![])),
            Err(Error::DuplicateName("Duplicate table name".into()))
        );
        assert_eq!(physical_table_count(&test_db), table_count);
        assert_eq!(orchestrator.list().unwrap().len(), 1);
    }

    #[test]
    fn failed_ddl_registers_nothing() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        let definition = SchemaDefinition::new(
            "people",
            vec![ColumnSpec::new("code", DataType::Text).primary_key()],
        );
        assert!(matches!(
            orchestrator.create(&definition),
            Err(Error::Database(_))
        ));
        assert!(orchestrator.list().unwrap().is_empty());
    }

    #[test]
    fn losing_a_registration_race_keeps_the_table() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        let winner = orchestrator.create(&get_users_definition()).unwrap();

        // Registration of a table whose name got taken after the pre-check
        assert_eq!(
            orchestrator.register(&get_users_definition()),
            Err(Error::DuplicateName("Duplicate table name `users`".into()))
        );
        let conn = test_db.database.connection().unwrap();
        assert!(table_exists(&conn, "users").unwrap());
        assert_eq!(orchestrator.list().unwrap(), vec![winner]);
    }

    #[test]
    fn concurrent_creates_leave_one_consistent_schema() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        for round in 0..5 {
            let table_name = format!("race_{}", round);
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let orchestrator = orchestrator.clone();
                    let barrier = barrier.clone();
                    let definition = SchemaDefinition::new(
                        table_name.clone(),
                        vec![ColumnSpec::new("title", DataType::Text)],
                    );
                    thread::spawn(move || {
                        barrier.wait();
                        orchestrator.create(&definition)
                    })
                })
                .collect();
            let results: Vec<Result<SchemaRecord>> = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect();

            assert_eq!(
                results.iter().filter(|result| result.is_ok()).count(),
                1,
                "{:?}",
                results
            );
            assert!(
                results
                    .iter()
                    .any(|result| matches!(result, Err(Error::DuplicateName(_)))),
                "{:?}",
                results
            );
            let conn = test_db.database.connection().unwrap();
            assert!(table_exists(&conn, &table_name).unwrap());
        }
        assert_eq!(orchestrator.list().unwrap().len(), 5);
    }

    #[test]
    fn failed_registration_drops_the_new_table() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        test_db
            .database
            .connection()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_schemas BEFORE INSERT ON \"_tabula_schemas\" \
                 BEGIN SELECT RAISE(ABORT, 'registry is read-only'); END",
            )
            .unwrap();
        let table_count = physical_table_count(&test_db);

        let result = orchestrator.create(&get_users_definition());
        assert!(
            matches!(&result, Err(Error::Database(message)) if message.contains("registry is read-only")),
            "{:?}",
            result
        );
        assert_eq!(physical_table_count(&test_db), table_count);
        let conn = test_db.database.connection().unwrap();
        assert!(!table_exists(&conn, "users").unwrap());
        assert!(orchestrator.list().unwrap().is_empty());
    }

    #[test]
    fn supplied_row_ids_must_be_uuids() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator.create(&get_users_definition()).unwrap();
        assert_eq!(
            orchestrator.write_table_data(
                "users",
                None,
                payload(json!({"id": "abc", "email": "a@b.com"}))
            ),
            Err(Error::Validation("Invalid UUID format `abc`".into()))
        );

        let id = "0d1c6b2e-5f0a-4c7e-9c59-5b0b1a6d3f10";
        let outcome = orchestrator
            .write_table_data("users", None, payload(json!({"id": id, "email": "a@b.com"})))
            .unwrap();
        assert_eq!(inserted_id(&outcome), id);
        orchestrator
            .write_table_data("users", Some(id), payload(json!({"email": "c@d.com"})))
            .unwrap();
        assert_eq!(
            orchestrator.delete_table_data("users", id).unwrap()["email"],
            Value::Text("c@d.com".into())
        );
    }

    #[test]
    fn invalid_or_reserved_definitions_are_rejected() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        assert!(matches!(
            orchestrator.create(&SchemaDefinition::new("my-table", vec![])),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            orchestrator.create(&SchemaDefinition::new("sqlite_stuff", vec![])),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            orchestrator.create(&SchemaDefinition::new(
                "users",
                vec![ColumnSpec::new("id", DataType::Uuid)]
            )),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn inserted_row_is_read_back() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator.create(&get_users_definition()).unwrap();
        let outcome = orchestrator
            .write_table_data("users", None, payload(json!({"email": "a@b.com"})))
            .unwrap();
        let id = inserted_id(&outcome);

        let query = ReadQuery {
            page: 1,
            limit: 10,
            ..Default::default()
        };
        let table = orchestrator.read_table_data("users", &query).unwrap();
        assert_eq!(table.columns.len(), 4);
        assert_eq!(table.data.len(), 1);
        let row = &table.data[0];
        assert_eq!(row["id"], Value::Text(id));
        assert_eq!(row["email"], Value::Text("a@b.com".into()));
        assert!(matches!(row["createdAt"], Value::Timestamp(_)));
        assert_eq!(row["updatedAt"], Value::Null);
    }

    #[test]
    fn unknown_payload_keys_are_dropped() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator.create(&get_users_definition()).unwrap();
        let outcome = orchestrator
            .write_table_data(
                "users",
                None,
                payload(json!({"email": "a@b.com", "isAdmin": true})),
            )
            .unwrap();
        match outcome {
            WriteOutcome::Inserted(row) => assert!(!row.contains_key("isAdmin")),
            other => panic!("Expected an insert, got {:?}", other),
        }
        assert_eq!(
            orchestrator.write_table_data("users", None, payload(json!({"isAdmin": true}))),
            Err(Error::EmptyPayload)
        );
    }

    #[test]
    fn update_changes_row_and_stamps_updated_at() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator.create(&get_users_definition()).unwrap();
        let id = inserted_id(
            &orchestrator
                .write_table_data("users", None, payload(json!({"email": "a@b.com"})))
                .unwrap(),
        );
        assert_eq!(
            orchestrator
                .write_table_data("users", Some(id.as_str()), payload(json!({"email": "c@d.com"})))
                .unwrap(),
            WriteOutcome::Updated {
                message: "Record updated successfully".into(),
                affected: 1
            }
        );
        let row = &orchestrator
            .read_table_data("users", &ReadQuery::default())
            .unwrap()
            .data[0];
        assert_eq!(row["email"], Value::Text("c@d.com".into()));
        assert!(matches!(row["updatedAt"], Value::Timestamp(_)));
    }

    #[test]
    fn update_of_missing_row_is_not_found() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator.create(&get_users_definition()).unwrap();
        assert_eq!(
            orchestrator.write_table_data(
                "users",
                Some("0d1c6b2e-5f0a-4c7e-9c59-5b0b1a6d3f10"),
                payload(json!({"email": "c@d.com"}))
            ),
            Err(Error::NotFound("Record not found".into()))
        );
        assert_eq!(
            orchestrator.write_table_data(
                "users",
                Some("0d1c6b2e-5f0a-4c7e-9c59-5b0b1a6d3f10"),
                payload(json!({"id": "0d1c6b2e-5f0a-4c7e-9c59-5b0b1a6d3f11"}))
            ),
            Err(Error::EmptyPayload)
        );
    }

    #[test]
    fn row_deletion_returns_row_and_removes_it() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator.create(&get_users_definition()).unwrap();
        let id = inserted_id(
            &orchestrator
                .write_table_data("users", None, payload(json!({"email": "a@b.com"})))
                .unwrap(),
        );

        assert_eq!(
            orchestrator.delete_table_data("users", "0d1c6b2e-5f0a-4c7e-9c59-5b0b1a6d3f10"),
            Err(Error::NotFound("Record not found in table `users`".into()))
        );
        let deleted = orchestrator.delete_table_data("users", &id).unwrap();
        assert_eq!(deleted["email"], Value::Text("a@b.com".into()));
        assert!(orchestrator
            .read_table_data("users", &ReadQuery::default())
            .unwrap()
            .data
            .is_empty());
    }

    #[test]
    fn deleted_schema_is_not_found_afterwards() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        let record = orchestrator.create(&get_users_definition()).unwrap();
        let outcome = orchestrator.delete(&record.id.to_string()).unwrap();
        assert!(!outcome.error);

        assert_eq!(
            orchestrator.read_table_data("users", &ReadQuery::default()),
            Err(Error::NotFound("Schema not found".into()))
        );
        assert_eq!(
            orchestrator.delete(&record.id.to_string()),
            Err(Error::NotFound("Table not found".into()))
        );
        let conn = test_db.database.connection().unwrap();
        assert!(!crate::storage::table_exists(&conn, "users").unwrap());
    }

    #[test]
    fn failed_drop_keeps_the_record() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        let record = orchestrator.create(&get_users_definition()).unwrap();
        {
            let conn = test_db.database.connection().unwrap();
            conn.execute_batch("DROP TABLE \"users\"").unwrap();
        }
        assert_eq!(
            orchestrator.delete(&record.id.to_string()),
            Err(Error::Database("Table \"users\" does not exist.".into()))
        );
        assert_eq!(orchestrator.list().unwrap(), vec![record]);
    }

    #[test]
    fn unregistered_tables_are_never_queried() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        {
            let conn = test_db.database.connection().unwrap();
            conn.execute_batch("CREATE TABLE \"secrets\" (\"id\" TEXT)").unwrap();
        }
        assert_eq!(
            orchestrator.read_table_data("secrets", &ReadQuery::default()),
            Err(Error::NotFound("Schema not found".into()))
        );
    }

    #[test]
    fn broken_metadata_is_reported() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        let registry = Registry::new(test_db.database.clone());
        registry.create("empty", "[]".into()).unwrap();
        registry.create("garbled", "{oops".into()).unwrap();

        assert!(matches!(
            orchestrator.read_table_data("empty", &ReadQuery::default()),
            Err(Error::SchemaCorrupt(_))
        ));
        assert!(matches!(
            orchestrator.read_table_data("garbled", &ReadQuery::default()),
            Err(Error::SchemaCorrupt(_))
        ));
        assert_eq!(
            orchestrator.write_table_data("garbled", None, payload(json!({"a": 1}))),
            Err(Error::SchemaInvalid("Schema metadata is invalid".into()))
        );
    }

    #[test]
    fn reads_conform_types_and_honour_sorting() {
        let test_db = TestDatabase::new();
        let orchestrator = Orchestrator::new(test_db.database.clone());
        orchestrator
            .create(&SchemaDefinition::new(
                "tasks",
                vec![
                    ColumnSpec::new("title", DataType::Text).not_null(),
                    ColumnSpec::new("done", DataType::Boolean),
                    ColumnSpec::new("tags", DataType::Json),
                ],
            ))
            .unwrap();
        for (title, done) in [("b", true), ("a", false)] {
            orchestrator
                .write_table_data(
                    "tasks",
                    None,
                    payload(json!({"title": title, "done": done, "tags": ["x"]})),
                )
                .unwrap();
        }
        let query = ReadQuery {
            sort_column: Some("title".into()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let table = orchestrator.read_table_data("tasks", &query).unwrap();
        assert_eq!(table.data[0]["title"], Value::Text("a".into()));
        assert_eq!(table.data[0]["done"], Value::Boolean(false));
        assert_eq!(table.data[1]["done"], Value::Boolean(true));
        assert_eq!(table.data[1]["tags"], Value::Json(json!(["x"])));
    }
}

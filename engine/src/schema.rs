//! Schema registry for dynamically addressed cells.
//!
//! Messages name their target by string. The registry turns that into a
//! checked capability: only registered `(dataset, column)` pairs can be
//! written, and only with values of the registered type.

use crate::{error::Result, ColumnName, DatasetName, Error, Value, LOCAL_ONLY_DATASET};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the primary key column in every dataset table.
pub const ID_COLUMN: &str = "id";

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Reference to another row's id
    Id,
    Text,
    Integer,
    Float,
    /// Stored as 0 or 1
    Boolean,
    /// Calendar date as YYYYMMDD
    Date,
}

impl FieldType {
    /// Whether values of this type are stored as numbers.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::Float | FieldType::Boolean | FieldType::Date
        )
    }

    /// Check a value against this type. Null is always accepted.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Id | FieldType::Text, Value::Text(_)) => true,
            (FieldType::Float, Value::Number(n)) => !n.is_nan(),
            (FieldType::Integer, Value::Number(n)) => n.is_finite() && n.fract() == 0.0,
            (FieldType::Boolean, Value::Number(n)) => *n == 0.0 || *n == 1.0,
            (FieldType::Date, Value::Number(n)) => {
                n.fract() == 0.0 && (10_000_101.0..=99_991_231.0).contains(n)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Id => write!(f, "Id"),
            FieldType::Text => write!(f, "Text"),
            FieldType::Integer => write!(f, "Integer"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Boolean => write!(f, "Boolean"),
            FieldType::Date => write!(f, "Date"),
        }
    }
}

/// Definition of a column in a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: ColumnName,
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<ColumnName>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Validate a value for this field.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if self.field_type.accepts(value) {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                column: self.name.clone(),
                expected: self.field_type.to_string(),
                got: value.kind().to_string(),
            })
        }
    }
}

/// Schema for one dataset (one physical table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSchema {
    pub name: DatasetName,
    pub fields: Vec<FieldDef>,
}

impl DatasetSchema {
    pub fn new(name: impl Into<DatasetName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Look up a column. The id column is not addressable.
    pub fn field(&self, column: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == column)
    }
}

/// Registry of all synced datasets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    datasets: BTreeMap<DatasetName, DatasetSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset.
    ///
    /// Names become SQL identifiers downstream, so they are restricted to
    /// `[a-z_][a-z0-9_]*`. The reserved `prefs` dataset and the `id` column
    /// cannot be registered.
    pub fn register(&mut self, dataset: DatasetSchema) -> Result<&mut Self> {
        if !is_identifier(&dataset.name) || dataset.name == LOCAL_ONLY_DATASET {
            return Err(Error::UnknownDataset(dataset.name));
        }
        for field in &dataset.fields {
            if !is_identifier(&field.name) || field.name == ID_COLUMN {
                return Err(Error::UnknownColumn {
                    dataset: dataset.name.clone(),
                    column: field.name.clone(),
                });
            }
        }
        self.datasets.insert(dataset.name.clone(), dataset);
        Ok(self)
    }

    /// Builder-style registration.
    pub fn with_dataset(mut self, dataset: DatasetSchema) -> Result<Self> {
        self.register(dataset)?;
        Ok(self)
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetSchema> {
        self.datasets.get(name)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &DatasetSchema> {
        self.datasets.values()
    }

    /// Resolve and type-check one cell write.
    pub fn check(&self, dataset: &str, column: &str, value: &Value) -> Result<&FieldDef> {
        self.resolve(dataset, column, value).map(|(_, field)| field)
    }

    /// Like [`check`](Self::check), also returning the dataset schema.
    pub fn resolve(
        &self,
        dataset: &str,
        column: &str,
        value: &Value,
    ) -> Result<(&DatasetSchema, &FieldDef)> {
        let schema = self
            .datasets
            .get(dataset)
            .ok_or_else(|| Error::UnknownDataset(dataset.to_string()))?;
        let field = schema.field(column).ok_or_else(|| Error::UnknownColumn {
            dataset: dataset.to_string(),
            column: column.to_string(),
        })?;
        field.validate(value)?;
        Ok((schema, field))
    }

    /// The finance datasets synced between devices.
    pub fn finance() -> Self {
        use FieldType::*;

        let datasets = [
            DatasetSchema::new(
                "accounts",
                vec![
                    FieldDef::new("name", Text),
                    FieldDef::new("offbudget", Boolean),
                    FieldDef::new("closed", Boolean),
                    FieldDef::new("sort_order", Float),
                    FieldDef::new("tombstone", Boolean),
                ],
            ),
            DatasetSchema::new(
                "category_groups",
                vec![
                    FieldDef::new("name", Text),
                    FieldDef::new("is_income", Boolean),
                    FieldDef::new("sort_order", Float),
                    FieldDef::new("hidden", Boolean),
                    FieldDef::new("tombstone", Boolean),
                ],
            ),
            DatasetSchema::new(
                "categories",
                vec![
                    FieldDef::new("name", Text),
                    FieldDef::new("is_income", Boolean),
                    FieldDef::new("cat_group", Id),
                    FieldDef::new("sort_order", Float),
                    FieldDef::new("hidden", Boolean),
                    FieldDef::new("tombstone", Boolean),
                ],
            ),
            DatasetSchema::new(
                "payees",
                vec![
                    FieldDef::new("name", Text),
                    FieldDef::new("transfer_acct", Id),
                    FieldDef::new("tombstone", Boolean),
                ],
            ),
            DatasetSchema::new(
                "transactions",
                vec![
                    FieldDef::new("account", Id),
                    FieldDef::new("category", Id),
                    FieldDef::new("payee", Id),
                    FieldDef::new("amount", Integer),
                    FieldDef::new("notes", Text),
                    FieldDef::new("date", Date),
                    FieldDef::new("cleared", Boolean),
                    FieldDef::new("reconciled", Boolean),
                    FieldDef::new("is_parent", Boolean),
                    FieldDef::new("is_child", Boolean),
                    FieldDef::new("parent_id", Id),
                    FieldDef::new("sort_order", Float),
                    FieldDef::new("starting_balance_flag", Boolean),
                    FieldDef::new("tombstone", Boolean),
                ],
            ),
        ];

        let mut registry = Self::new();
        for dataset in datasets {
            registry.datasets.insert(dataset.name.clone(), dataset);
        }
        registry
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

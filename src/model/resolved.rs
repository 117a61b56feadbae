//! Entity model descriptors: table, columns, primary key and associations.
//! Storage backends and the manager work only from these; identifiers never come from requests.

use std::collections::HashMap;
use std::sync::Arc;

/// Storage kind of a column. Drives SQL casts, DDL and querystring coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
    Timestamp,
    Json,
}

impl ColumnKind {
    /// PostgreSQL type name used for parameter casts and DDL.
    pub fn pg_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "bigint",
            ColumnKind::Float => "double precision",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Text => "text",
            ColumnKind::Timestamp => "timestamptz",
            ColumnKind::Json => "jsonb",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub unique: bool,
    /// Whether the column has a storage default (sequence, NOW()).
    pub has_default: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Column {
            name: name.into(),
            kind,
            nullable: true,
            unique: false,
            has_default: false,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Column::new(name, ColumnKind::Integer)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Column::new(name, ColumnKind::Text)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Column::new(name, ColumnKind::Timestamp)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}

/// How an association is joined. `ToMany`: the target holds a FK to our primary key.
/// `ToOne`: we hold a FK to the target's primary key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssociationKind {
    ToMany { remote_column: String },
    ToOne { local_column: String },
}

#[derive(Clone, Debug)]
pub struct Association {
    pub name: String,
    /// Table name of the target model in the registry.
    pub target: String,
    pub kind: AssociationKind,
}

#[derive(Clone, Debug)]
pub struct Model {
    pub name: String,
    pub primary_key: String,
    pub columns: Vec<Column>,
    pub associations: Vec<Association>,
}

impl Model {
    /// New model with an auto-assigned integer primary key `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            primary_key: "id".into(),
            columns: vec![Column::integer("id").not_null().with_default()],
            associations: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.retain(|c| c.name != column.name);
        self.columns.push(column);
        self
    }

    pub fn has_many(mut self, name: &str, target: &str, remote_column: &str) -> Self {
        self.associations.push(Association {
            name: name.into(),
            target: target.into(),
            kind: AssociationKind::ToMany {
                remote_column: remote_column.into(),
            },
        });
        self
    }

    pub fn belongs_to(mut self, name: &str, target: &str, local_column: &str) -> Self {
        self.associations.push(Association {
            name: name.into(),
            target: target.into(),
            kind: AssociationKind::ToOne {
                local_column: local_column.into(),
            },
        });
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }
}

/// All models known to an Api, keyed by table name. Built once at startup.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and build the registry. See [`crate::model::validate`].
    pub fn from_models(models: Vec<Model>) -> Result<Self, crate::error::ConfigError> {
        crate::model::validate(&models)?;
        let models = models
            .into_iter()
            .map(|m| (m.name.clone(), Arc::new(m)))
            .collect();
        Ok(ModelRegistry { models })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Model>> {
        self.models.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }
}

//! Model validation: primary keys and association references.

use crate::error::ConfigError;
use crate::model::{AssociationKind, Model};
use std::collections::{HashMap, HashSet};

pub fn validate(models: &[Model]) -> Result<(), ConfigError> {
    let mut by_name: HashMap<&str, &Model> = HashMap::new();
    for m in models {
        if by_name.insert(m.name.as_str(), m).is_some() {
            return Err(ConfigError::DuplicateModel(m.name.clone()));
        }
    }

    for m in models {
        let columns: HashSet<&str> = m.columns.iter().map(|c| c.name.as_str()).collect();
        if !columns.contains(m.primary_key.as_str()) {
            return Err(ConfigError::InvalidPrimaryKey {
                table: m.name.clone(),
                column: m.primary_key.clone(),
            });
        }

        for a in &m.associations {
            let target = by_name.get(a.target.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: a.target.clone(),
            })?;
            let (owner, column) = match &a.kind {
                AssociationKind::ToMany { remote_column } => (*target, remote_column),
                AssociationKind::ToOne { local_column } => (m, local_column),
            };
            if owner.get_column(column).is_none() {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", owner.name, column),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;

    #[test]
    fn rejects_association_to_unknown_model() {
        let bank = Model::new("bank").has_many("accounts", "bank_account", "bank_id");
        let err = validate(&[bank]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReference { kind: "model", .. }));
    }

    #[test]
    fn rejects_missing_remote_column() {
        let bank = Model::new("bank").has_many("accounts", "bank_account", "bank_id");
        let account = Model::new("bank_account").column(Column::text("cbu"));
        let err = validate(&[bank, account]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReference { kind: "column", .. }));
    }

    #[test]
    fn rejects_duplicate_model() {
        let err = validate(&[Model::new("bank"), Model::new("bank")]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateModel(name) if name == "bank"));
    }

    #[test]
    fn accepts_consistent_models() {
        let bank = Model::new("bank").has_many("accounts", "bank_account", "bank_id");
        let account = Model::new("bank_account")
            .column(Column::integer("bank_id").not_null())
            .belongs_to("bank", "bank", "bank_id");
        assert!(validate(&[bank, account]).is_ok());
    }
}

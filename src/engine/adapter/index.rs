//! Index generation from model descriptors

use crate::engine::client::{keys, CreateIndexRequest, IndexFields, SortField};

/// Indexes a model asks for: its table plus the fields it is queried or sorted by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIndexes {
    pub table: String,
    pub fields: Vec<String>,
}

impl ModelIndexes {
    pub fn new(table: &str, fields: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// One table index per model, plus a `(table, field)` index per indexed field
pub fn generate_indexes(models: &[ModelIndexes]) -> Vec<CreateIndexRequest> {
    let mut indexes = Vec::new();

    for model in models {
        let name = index_name(&[&model.table]);
        indexes.push(CreateIndexRequest {
            index: IndexFields {
                fields: vec![SortField::from(keys::TABLE)],
            },
            ddoc: Some(name.clone()),
            name: Some(name),
            kind: Some("json".to_string()),
        });

        for field in &model.fields {
            let name = index_name(&[&model.table, field]);
            indexes.push(CreateIndexRequest {
                index: IndexFields {
                    fields: vec![SortField::from(keys::TABLE), SortField::from(field.as_str())],
                },
                ddoc: Some(name.clone()),
                name: Some(name),
                kind: Some("json".to_string()),
            });
        }
    }

    indexes
}

fn index_name(parts: &[&str]) -> String {
    let mut name = parts.join(keys::SEPARATOR);
    name.push_str(keys::SEPARATOR);
    name.push_str("index");
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_indexes() {
        let indexes = generate_indexes(&[
            ModelIndexes::new("tst_user", &["name", "age"]),
            ModelIndexes::new("tst_post", &[]),
        ]);

        let names: Vec<&str> = indexes.iter().filter_map(|i| i.name.as_deref()).collect();
        assert_eq!(
            names,
            vec![
                "tst_user__index",
                "tst_user__name__index",
                "tst_user__age__index",
                "tst_post__index"
            ]
        );
        assert_eq!(indexes[1].field_names(), vec!["??table", "name"]);
    }
}

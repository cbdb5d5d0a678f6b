//! Tantivy schema definition for node search.
//!
//! One tantivy document per node, keyed by its uid.

use tantivy::schema::{Field, Schema, FAST, STORED, STRING, TEXT};

use crate::SearchError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct SearchSchema {
    schema: Schema,
    /// Primary key: `DOCUMENT_ID:NODE_GUID` (STRING | STORED)
    pub uid: Field,
    /// Owning document, used for delete-by-document and scope filters (STRING | STORED)
    pub document_id: Field,
    /// Node title (TEXT | STORED), boosted at query time
    pub title: Field,
    /// Plain-text body with link markup reduced to display text (TEXT)
    pub body: Field,
    /// Tags, one value per tag (TEXT | STORED)
    pub tags: Field,
    /// Semantic type tag (STRING | STORED)
    pub semantic_type: Field,
    /// Last update in milliseconds, used as ranking tie-break (i64 STORED | FAST)
    pub updated_at: Field,
}

impl SearchSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a SearchSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
        };
        let uid = field("uid")?;
        let document_id = field("document_id")?;
        let title = field("title")?;
        let body = field("body")?;
        let tags = field("tags")?;
        let semantic_type = field("semantic_type")?;
        let updated_at = field("updated_at")?;

        Ok(Self {
            schema,
            uid,
            document_id,
            title,
            body,
            tags,
            semantic_type,
            updated_at,
        })
    }
}

/// Build the node search schema.
pub fn build_node_schema() -> SearchSchema {
    let mut schema_builder = Schema::builder();

    let uid = schema_builder.add_text_field("uid", STRING | STORED);
    let document_id = schema_builder.add_text_field("document_id", STRING | STORED);
    let title = schema_builder.add_text_field("title", TEXT | STORED);
    let body = schema_builder.add_text_field("body", TEXT);
    let tags = schema_builder.add_text_field("tags", TEXT | STORED);
    let semantic_type = schema_builder.add_text_field("semantic_type", STRING | STORED);
    let updated_at = schema_builder.add_i64_field("updated_at", STORED | FAST);

    let schema = schema_builder.build();

    SearchSchema {
        schema,
        uid,
        document_id,
        title,
        body,
        tags,
        semantic_type,
        updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schema() {
        let schema = build_node_schema();
        assert!(schema.schema.get_field("uid").is_ok());
        assert!(schema.schema.get_field("title").is_ok());
        assert!(schema.schema.get_field("updated_at").is_ok());
    }

    #[test]
    fn test_from_schema() {
        let original = build_node_schema();
        let rebuilt = SearchSchema::from_schema(original.schema().clone()).unwrap();
        assert_eq!(rebuilt.uid, original.uid);
        assert_eq!(rebuilt.title, original.title);
        assert_eq!(rebuilt.updated_at, original.updated_at);
    }

    #[test]
    fn test_from_schema_rejects_foreign_schema() {
        let mut builder = Schema::builder();
        builder.add_text_field("uid", STRING);
        let err = SearchSchema::from_schema(builder.build()).unwrap_err();
        assert!(matches!(err, SearchError::SchemaMismatch(_)));
    }
}

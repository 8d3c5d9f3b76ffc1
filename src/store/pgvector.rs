//! PostgreSQL + pgvector store.
//!
//! Threshold, metadata filter, rank assignment and page selection run as one
//! SQL statement, so a page never mixes two snapshots of the table.
//!
//! The store holds a single connection and does not reconnect. Once the
//! connection task ends every call fails with `Upstream`, and the process has
//! to be restarted to recover.

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::json;
use tokio_postgres::types::{Json, ToSql};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use crate::payload_storage::filters::Filter;
use crate::ranking::page::Neighbor;
use crate::store::{
    IndexedEntity, NewEntity, RankedQuery, RankedRow, VectorStore, check_dimension,
};
use crate::utils::errors::{Result, SearchError};
use crate::utils::metadata::{ComparisonOp, Metadata, MetadataValue};
use crate::utils::types::EntityId;

const SERVICE: &str = "vector store";

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(SearchError::validation("schema name is required"));
        }
        if table.trim().is_empty() {
            return Err(SearchError::validation("table name is required"));
        }
        Ok(Self { schema, table })
    }

    /// Table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}

pub struct PgVectorStore {
    client: Client,
    table: TableName,
    dim: usize,
}

impl PgVectorStore {
    pub async fn connect(database_url: &str, table: TableName, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(SearchError::validation("collection dimension must be positive"));
        }
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(pg_error)?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(%err, "postgres connection error");
            }
        });
        info!(table = %table.qualified(), dim, "connected to pgvector store");
        Ok(Self { client, table, dim })
    }

    fn client(&self) -> Result<&Client> {
        if self.client.is_closed() {
            return Err(SearchError::upstream(SERVICE, "connection closed"));
        }
        Ok(&self.client)
    }

    /// Creates the vector extension and the entity table when missing.
    pub async fn prepare(&self) -> Result<()> {
        self.client()?
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .map_err(pg_error)?;
        self.client()?
            .execute(&create_table_sql(&self.table, self.dim), &[])
            .await
            .map_err(pg_error)?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &'static str {
        "pgvector"
    }

    async fn insert(&self, entity: NewEntity) -> Result<EntityId> {
        check_dimension(self.dim, &entity.vector)?;
        if entity.vector.iter().any(|x| !x.is_finite()) {
            return Err(SearchError::validation("vector contains non-finite values"));
        }

        let sql = format!(
            "INSERT INTO {} (embedding, metadata) VALUES ($1, $2::jsonb) RETURNING id",
            self.table.qualified()
        );
        let vector = Vector::from(entity.vector);
        let metadata = Json(&entity.metadata);
        let row = self
            .client()?
            .query_one(&sql, &[&vector, &metadata])
            .await
            .map_err(pg_error)?;
        let id = entity_id(&row)?;
        debug!(id, "stored entity");
        Ok(id)
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let Ok(key) = i64::try_from(id) else {
            return Ok(());
        };
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table.qualified());
        let removed = self
            .client()?
            .execute(&sql, &[&key])
            .await
            .map_err(pg_error)?;
        if removed > 0 {
            info!(id, "deleted entity");
        }
        Ok(())
    }

    async fn get(&self, id: EntityId) -> Result<Option<IndexedEntity>> {
        let Ok(key) = i64::try_from(id) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT id, embedding, metadata FROM {} WHERE id = $1",
            self.table.qualified()
        );
        let row = self
            .client()?
            .query_opt(&sql, &[&key])
            .await
            .map_err(pg_error)?;
        row.map(|row| {
            let vector: Vector = row.try_get("embedding").map_err(pg_error)?;
            Ok(IndexedEntity {
                id: entity_id(&row)?,
                vector: vector.to_vec(),
                metadata: metadata(&row)?,
            })
        })
        .transpose()
    }

    async fn len(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) AS total FROM {}", self.table.qualified());
        let row = self.client()?.query_one(&sql, &[]).await.map_err(pg_error)?;
        let total: i64 = row.try_get("total").map_err(pg_error)?;
        Ok(usize::try_from(total).unwrap_or(0))
    }

    async fn query_nearest(&self, embedding: &[f32], limit: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.dim, embedding)?;
        let sql = nearest_sql(&self.table);
        let vector = Vector::from(embedding.to_vec());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .client()?
            .query(&sql, &[&vector, &limit])
            .await
            .map_err(pg_error)?;

        rows.iter()
            .map(|row| {
                Ok(Neighbor {
                    id: entity_id(row)?,
                    distance: row.try_get("distance").map_err(pg_error)?,
                })
            })
            .collect()
    }

    async fn query_ranked(&self, query: RankedQuery<'_>) -> Result<Vec<RankedRow>> {
        check_dimension(self.dim, query.embedding)?;

        let vector = Vector::from(query.embedding.to_vec());
        let first = i64::try_from(query.ranks.first).unwrap_or(i64::MAX);
        let last = i64::try_from(query.ranks.last).unwrap_or(i64::MAX);
        let filter = query.filter.map(|f| FilterSql::build(f, 5));
        let sql = ranked_sql(&self.table, filter.as_ref().map(|f| f.clause.as_str()));

        let mut params: Vec<&(dyn ToSql + Sync)> =
            vec![&vector, &query.min_similarity, &first, &last];
        if let Some(filter) = &filter {
            params.extend(filter.params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)));
        }

        let rows = self.client()?.query(&sql, &params).await.map_err(pg_error)?;
        rows.iter()
            .map(|row| {
                let rank: i64 = row.try_get("rank").map_err(pg_error)?;
                Ok(RankedRow {
                    id: entity_id(row)?,
                    distance: row.try_get("distance").map_err(pg_error)?,
                    rank: u64::try_from(rank).unwrap_or(0),
                    metadata: metadata(row)?,
                })
            })
            .collect()
    }
}

fn pg_error(err: tokio_postgres::Error) -> SearchError {
    SearchError::upstream(SERVICE, err.to_string())
}

fn entity_id(row: &Row) -> Result<EntityId> {
    let id: i64 = row.try_get("id").map_err(pg_error)?;
    EntityId::try_from(id)
        .map_err(|_| SearchError::upstream(SERVICE, format!("negative entity id {id}")))
}

fn metadata(row: &Row) -> Result<Metadata> {
    let Json(metadata): Json<Metadata> = row.try_get("metadata").map_err(pg_error)?;
    Ok(metadata)
}

fn create_table_sql(table: &TableName, dim: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id BIGSERIAL PRIMARY KEY,
            embedding VECTOR({dim}) NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        table.qualified()
    )
}

/// Cosine distance to `$1`. pgvector yields NaN for zero vectors; those are
/// mapped to 1, matching the in-memory metric.
const DISTANCE: &str = "COALESCE(NULLIF(embedding <=> $1, 'NaN'::float8), 1.0)";

fn nearest_sql(table: &TableName) -> String {
    format!(
        "SELECT id, {DISTANCE} AS distance \
         FROM {} \
         ORDER BY distance ASC, id ASC \
         LIMIT $2::int8",
        table.qualified()
    )
}

/// `$1` query vector, `$2` min similarity, `$3..=$4` rank range; filter
/// parameters start at `$5`.
fn ranked_sql(table: &TableName, filter: Option<&str>) -> String {
    let filter = filter.map(|f| format!(" AND ({f})")).unwrap_or_default();
    format!(
        "WITH scored AS ( \
             SELECT id, metadata, {DISTANCE} AS distance \
             FROM {table} \
             WHERE TRUE{filter} \
         ), ranked AS ( \
             SELECT id, metadata, distance, \
                    ROW_NUMBER() OVER (ORDER BY distance ASC, id ASC) AS rank \
             FROM scored \
             WHERE (1 - distance) > $2::float8 \
         ) \
         SELECT id, metadata, distance, rank FROM ranked \
         WHERE rank BETWEEN $3::int8 AND $4::int8 \
         ORDER BY rank",
        table = table.qualified()
    )
}

/// A metadata filter rendered as a SQL boolean expression over the `metadata`
/// JSONB column. Each leaf is wrapped in `COALESCE(.., FALSE)` so a missing
/// key or a type mismatch is false, as in the in-memory evaluator.
struct FilterSql {
    clause: String,
    params: Vec<Box<dyn ToSql + Sync + Send>>,
    first_param: usize,
}

impl FilterSql {
    fn build(filter: &Filter, first_param: usize) -> Self {
        let mut sql = Self {
            clause: String::new(),
            params: Vec::new(),
            first_param,
        };
        sql.clause = sql.render(filter);
        sql
    }

    fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.params.push(Box::new(value));
        format!("${}", self.first_param + self.params.len() - 1)
    }

    fn render(&mut self, filter: &Filter) -> String {
        match filter {
            Filter::Match { key, value } => {
                let k = self.bind(key.clone());
                let v = self.bind(Json(value.to_json()));
                format!("COALESCE((metadata -> {k}::text) = {v}::jsonb, FALSE)")
            }
            Filter::Contains { key, value } => {
                let k = self.bind(key.clone());
                let v = self.bind(Json(json!([value.to_json()])));
                format!(
                    "COALESCE(jsonb_typeof(metadata -> {k}::text) = 'array' \
                     AND (metadata -> {k}::text) @> {v}::jsonb, FALSE)"
                )
            }
            Filter::Compare { key, op, value } => self.render_compare(key, *op, value),
            Filter::And(conditions) if conditions.is_empty() => "TRUE".to_string(),
            Filter::Or(conditions) if conditions.is_empty() => "FALSE".to_string(),
            Filter::And(conditions) => self.render_all(conditions, " AND "),
            Filter::Or(conditions) => self.render_all(conditions, " OR "),
            Filter::Not(inner) => format!("NOT ({})", self.render(inner)),
        }
    }

    fn render_all(&mut self, conditions: &[Filter], joiner: &str) -> String {
        let parts: Vec<String> = conditions
            .iter()
            .map(|c| format!("({})", self.render(c)))
            .collect();
        parts.join(joiner)
    }

    fn render_numeric(&mut self, key: &str, op_sql: &str, number: f64) -> String {
        let k = self.bind(key.to_string());
        let v = self.bind(number);
        format!(
            "COALESCE(CASE WHEN jsonb_typeof(metadata -> {k}::text) = 'number' \
             THEN (metadata ->> {k}::text)::float8 {op_sql} {v}::float8 END, FALSE)"
        )
    }

    fn render_compare(&mut self, key: &str, op: ComparisonOp, value: &MetadataValue) -> String {
        let op_sql = op.sql();
        match value {
            MetadataValue::Int(i) => self.render_numeric(key, op_sql, *i as f64),
            MetadataValue::Float(f) => self.render_numeric(key, op_sql, f.into_inner()),
            MetadataValue::Str(s) => {
                let k = self.bind(key.to_string());
                let v = self.bind(s.clone());
                format!(
                    "COALESCE(CASE WHEN jsonb_typeof(metadata -> {k}::text) = 'string' \
                     THEN (metadata ->> {k}::text) COLLATE \"C\" {op_sql} {v}::text END, FALSE)"
                )
            }
            MetadataValue::Bool(b) if matches!(op, ComparisonOp::Eq | ComparisonOp::Neq) => {
                let k = self.bind(key.to_string());
                let v = self.bind(*b);
                format!(
                    "COALESCE(CASE WHEN jsonb_typeof(metadata -> {k}::text) = 'boolean' \
                     THEN (metadata ->> {k}::text)::boolean {op_sql} {v}::boolean END, FALSE)"
                )
            }
            _ => "FALSE".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images() -> TableName {
        TableName::new("public", "images").unwrap()
    }

    #[test]
    fn table_names_are_quoted() {
        let table = TableName::new("app", "we\"ird").unwrap();
        assert_eq!(table.qualified(), "\"app\".\"we\"\"ird\"");
        assert!(TableName::new(" ", "images").is_err());
    }

    #[test]
    fn ranked_sql_filters_ranks_and_pages_in_one_statement() {
        let sql = ranked_sql(&images(), None);
        assert!(sql.contains("ROW_NUMBER() OVER (ORDER BY distance ASC, id ASC)"));
        assert!(sql.contains("WHERE (1 - distance) > $2::float8"));
        assert!(sql.contains("NULLIF(embedding <=> $1, 'NaN'::float8)"));
        assert!(sql.contains("BETWEEN $3::int8 AND $4::int8"));
        assert!(!sql.contains("$5"));
    }

    #[test]
    fn nearest_sql_breaks_ties_by_id_and_limits() {
        let sql = nearest_sql(&images());
        assert!(sql.contains("FROM \"public\".\"images\""));
        assert!(sql.contains("NULLIF(embedding <=> $1, 'NaN'::float8)"));
        assert!(sql.contains("ORDER BY distance ASC, id ASC"));
        assert!(sql.trim_end().ends_with("LIMIT $2::int8"));
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn filter_parameters_continue_after_fixed_ones() {
        let filter = Filter::And(vec![
            Filter::matches("is_ai", true),
            Filter::Not(Box::new(Filter::compare("likes", ComparisonOp::Lt, 10i64))),
        ]);
        let rendered = FilterSql::build(&filter, 5);
        assert_eq!(rendered.params.len(), 4);
        assert!(rendered.clause.contains("$5::text"));
        assert!(rendered.clause.contains("$6::jsonb"));
        assert!(rendered.clause.contains("$8::float8"));
        assert!(rendered.clause.contains(" AND "));
        assert!(rendered.clause.contains("NOT ("));

        let sql = ranked_sql(&images(), Some(&rendered.clause));
        assert!(sql.contains(&format!(" AND ({})", rendered.clause)));
    }

    #[test]
    fn empty_boolean_groups_are_constants() {
        assert_eq!(FilterSql::build(&Filter::And(vec![]), 5).clause, "TRUE");
        assert_eq!(FilterSql::build(&Filter::Or(vec![]), 5).clause, "FALSE");
    }

    #[test]
    fn ordering_on_booleans_never_matches() {
        let filter = Filter::compare("is_ai", ComparisonOp::Gt, true);
        let rendered = FilterSql::build(&filter, 5);
        assert_eq!(rendered.clause, "FALSE");
        assert!(rendered.params.is_empty());
    }
}

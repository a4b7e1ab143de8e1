//! HTTP API handlers for the PDF search service.
//!
//! Every handler is a single pass: validate parameters, probe the shared
//! response cache, hit storage (or the search engine) on a miss, shape
//! the JSON, store it back, respond. Serialized bodies are cached as raw
//! bytes so a hit costs one hash lookup and one copy.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;

use crate::ai::AiClient;
use crate::cache::ResponseCache;
use crate::error::Error;
use crate::pdf;
use crate::search::{self, SearchResult};

/// TTL for volatile entries: search responses and rendered pages.
const VOLATILE_TTL: Duration = Duration::from_secs(60);

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub db: PgPool,
    pub cache: Arc<ResponseCache>,
    pub ai: Arc<AiClient>,
}

fn json_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

fn png_response(bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        bytes,
    )
        .into_response()
}

fn to_body<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(value).map_err(|e| Error::Internal(format!("JSON serialization: {e}")))
}

// Path and query parameters arrive as strings and are parsed by hand:
// axum's typed extractors reject bad input before the handler runs, with
// a plain-text body instead of the JSON error envelope this API promises.

fn parse_file_id(raw: &str) -> Result<i64, Error> {
    raw.parse()
        .map_err(|_| Error::InvalidInput("Invalid file ID: must be a valid integer".into()))
}

fn parse_page_num(raw: &str) -> Result<i32, Error> {
    raw.parse()
        .map_err(|_| Error::InvalidInput("Invalid page number: must be a valid integer".into()))
}

fn parse_query_int(raw: &str, name: &str) -> Result<i64, Error> {
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("Invalid {name}: must be a valid integer")))
}

fn parse_query_bool(raw: &str, name: &str) -> Result<bool, Error> {
    raw.parse().map_err(|_| Error::InvalidInput(format!("Invalid {name}: must be true or false")))
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    file_id: Option<String>,
    ai_enabled: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    count: usize,
    query: String,
    ai_summary: Option<String>,
}

/// `GET /api/search?q=&file_id=&ai_enabled=`
///
/// Ranked full-text search, optionally restricted to one file. The AI
/// summary is skipped for within-book searches: those are lookups, not
/// questions, and the model adds latency without value there.
pub async fn api_search(
    State(ctx): State<AppContext>,
    Query(params): Query<SearchParams>,
) -> Result<Response, Error> {
    let q = params.q.unwrap_or_default();
    if q.trim().is_empty() {
        return Err(Error::InvalidInput("Missing search query".into()));
    }

    let file_filter = match params.file_id.as_deref() {
        Some(raw) => Some(parse_file_id(raw)?),
        None => None,
    };
    let ai_requested = match params.ai_enabled.as_deref() {
        Some(raw) => parse_query_bool(raw, "ai_enabled")?,
        None => true,
    };

    let cache_key = match file_filter {
        Some(file_id) => format!("search:{q}:{file_id}"),
        None => format!("search:{q}:all"),
    };
    if let Some(hit) = ctx.cache.get(&cache_key) {
        return Ok(json_response(hit));
    }

    let outcome = search::search_pages(&ctx.db, &q, file_filter).await?;

    let ai_summary = if ai_requested && file_filter.is_none() && !outcome.results.is_empty() {
        ctx.ai.summarize(&q, &outcome.context).await
    } else {
        None
    };

    let body = SearchResponse {
        count: outcome.results.len(),
        results: outcome.results,
        query: q,
        ai_summary,
    };
    let bytes = to_body(&body)?;
    ctx.cache.set(&cache_key, &bytes, Some(VOLATILE_TTL));
    Ok(json_response(bytes))
}

// ---------------------------------------------------------------------------
// File listing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListParams {
    page: Option<String>,
    limit: Option<String>,
    name: Option<String>,
}

#[derive(Serialize)]
struct FileRecord {
    id: i64,
    name: String,
    path: String,
    num_pages: i32,
}

#[derive(Serialize)]
struct ListResponse {
    results: Vec<FileRecord>,
    page: i64,
    limit: i64,
    total_count: i64,
    total_pages: i64,
    has_next: bool,
    has_prev: bool,
}

fn clamp_page(page: Option<i64>) -> i64 {
    page.unwrap_or(1).max(1)
}

// An absent limit defaults to 10 but an out-of-range one snaps to 25;
// clients have come to depend on both values.
fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        None => 10,
        Some(l) if l < 1 => 25,
        Some(l) if l > 100 => 100,
        Some(l) => l,
    }
}

fn file_from_row(row: &sqlx::postgres::PgRow) -> Result<FileRecord, sqlx::Error> {
    Ok(FileRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        num_pages: row.try_get("num_pages")?,
    })
}

/// `GET /api/list-files?page=&limit=&name=`
pub async fn api_list_files(
    State(ctx): State<AppContext>,
    Query(params): Query<ListParams>,
) -> Result<Response, Error> {
    let page = clamp_page(match params.page.as_deref() {
        Some(raw) => Some(parse_query_int(raw, "page")?),
        None => None,
    });
    let limit = clamp_limit(match params.limit.as_deref() {
        Some(raw) => Some(parse_query_int(raw, "limit")?),
        None => None,
    });
    let name = params.name.filter(|n| !n.is_empty());

    let cache_key = match &name {
        Some(n) => format!("list:p{page}:l{limit}:n{n}"),
        None => format!("list:p{page}:l{limit}"),
    };
    if let Some(hit) = ctx.cache.get(&cache_key) {
        return Ok(json_response(hit));
    }

    let total_count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM files")
        .fetch_one(&ctx.db)
        .await?
        .try_get("count")?;

    let offset = (page - 1) * limit;
    let rows = match &name {
        Some(n) => {
            sqlx::query(
                "SELECT id, name, path, num_pages FROM files \
                 WHERE name ILIKE $1 ORDER BY name LIMIT $2 OFFSET $3",
            )
            .bind(format!("%{n}%"))
            .bind(limit)
            .bind(offset)
            .fetch_all(&ctx.db)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, name, path, num_pages FROM files ORDER BY name LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&ctx.db)
            .await?
        }
    };

    let results =
        rows.iter().map(file_from_row).collect::<Result<Vec<_>, _>>().map_err(Error::Storage)?;

    let total_pages = ((total_count + limit - 1) / limit).max(1);
    let body = ListResponse {
        results,
        page,
        limit,
        total_count,
        total_pages,
        has_next: page < total_pages,
        has_prev: page > 1,
    };
    let bytes = to_body(&body)?;
    ctx.cache.set(&cache_key, &bytes, None);
    Ok(json_response(bytes))
}

/// `GET /api/list-files/{file_id}`
pub async fn api_get_file(
    State(ctx): State<AppContext>,
    Path(file_id): Path<String>,
) -> Result<Response, Error> {
    let file_id = parse_file_id(&file_id)?;

    let cache_key = format!("file:{file_id}");
    if let Some(hit) = ctx.cache.get(&cache_key) {
        return Ok(json_response(hit));
    }

    let row = sqlx::query("SELECT id, name, path, num_pages FROM files WHERE id = $1 LIMIT 1")
        .bind(file_id)
        .fetch_optional(&ctx.db)
        .await?
        .ok_or(Error::NotFound("No file matches the requested ID"))?;

    let body = file_from_row(&row).map_err(Error::Storage)?;
    let bytes = to_body(&body)?;
    ctx.cache.set(&cache_key, &bytes, None);
    Ok(json_response(bytes))
}

// ---------------------------------------------------------------------------
// Page text
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PageResponse {
    file_id: i64,
    page_num: i32,
    text: String,
}

/// `GET /api/file/{file_id}/page/{page_num}`
pub async fn api_get_page(
    State(ctx): State<AppContext>,
    Path((file_id, page_num)): Path<(String, String)>,
) -> Result<Response, Error> {
    let file_id = parse_file_id(&file_id)?;
    let page_num = parse_page_num(&page_num)?;
    if page_num < 1 {
        return Err(Error::InvalidInput("Page number must be at least 1".into()));
    }

    let cache_key = format!("file:{file_id}:page:{page_num}");
    if let Some(hit) = ctx.cache.get(&cache_key) {
        return Ok(json_response(hit));
    }

    let row = sqlx::query("SELECT text FROM pages WHERE file_id = $1 AND page_num = $2 LIMIT 1")
        .bind(file_id)
        .bind(page_num)
        .fetch_optional(&ctx.db)
        .await?
        .ok_or(Error::NotFound("No page found for the requested file and page number"))?;

    let body = PageResponse { file_id, page_num, text: row.try_get("text")? };
    let bytes = to_body(&body)?;
    ctx.cache.set(&cache_key, &bytes, None);
    Ok(json_response(bytes))
}

// ---------------------------------------------------------------------------
// Page rendering
// ---------------------------------------------------------------------------

/// `GET /api/file/{file_id}/render-page/{page_num}`
///
/// Renders one page to PNG. Rendered bytes are cached briefly; rendering
/// is serialized behind the pdfium lock, so cache hits matter here.
pub async fn api_render_page(
    State(ctx): State<AppContext>,
    Path((file_id, page_num)): Path<(String, String)>,
) -> Result<Response, Error> {
    let file_id = parse_file_id(&file_id)?;
    let page_num = parse_page_num(&page_num)?;
    if page_num < 1 {
        return Err(Error::InvalidInput("Page number must be at least 1".into()));
    }

    let cache_key = format!("render-page:file:{file_id}:page:{page_num}");
    if let Some(hit) = ctx.cache.get(&cache_key) {
        return Ok(png_response(hit));
    }

    let row = sqlx::query("SELECT path, num_pages FROM files WHERE id = $1 LIMIT 1")
        .bind(file_id)
        .fetch_optional(&ctx.db)
        .await?
        .ok_or(Error::NotFound("No file matches the requested ID"))?;

    let path: String = row.try_get("path")?;
    let num_pages: i32 = row.try_get("num_pages")?;
    if page_num > num_pages {
        return Err(Error::NotFound("Page out of range"));
    }

    let png = tokio::task::spawn_blocking(move || {
        pdf::render_page_png(std::path::Path::new(&path), page_num as u32 - 1)
    })
    .await
    .map_err(|e| Error::Raster(format!("render task panicked: {e}")))??;

    ctx.cache.set(&cache_key, &png, Some(VOLATILE_TTL));
    Ok(png_response(png))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamps() {
        assert_eq!(clamp_page(None), 1);
        assert_eq!(clamp_page(Some(0)), 1);
        assert_eq!(clamp_page(Some(-3)), 1);
        assert_eq!(clamp_page(Some(7)), 7);
    }

    #[test]
    fn limit_clamps() {
        assert_eq!(clamp_limit(None), 10);
        assert_eq!(clamp_limit(Some(0)), 25);
        assert_eq!(clamp_limit(Some(-1)), 25);
        assert_eq!(clamp_limit(Some(1)), 1);
        assert_eq!(clamp_limit(Some(100)), 100);
        assert_eq!(clamp_limit(Some(999)), 100);
    }

    #[test]
    fn numeric_params_reject_garbage_as_invalid_input() {
        assert_eq!(parse_file_id("17").unwrap(), 17);
        assert!(matches!(parse_file_id("abc"), Err(Error::InvalidInput(_))));
        assert!(matches!(parse_file_id("1.5"), Err(Error::InvalidInput(_))));
        assert!(matches!(parse_file_id(""), Err(Error::InvalidInput(_))));

        assert_eq!(parse_page_num("3").unwrap(), 3);
        assert_eq!(parse_page_num("-1").unwrap(), -1); // range-checked by the handler
        assert!(matches!(parse_page_num("three"), Err(Error::InvalidInput(_))));

        assert_eq!(parse_query_int("42", "limit").unwrap(), 42);
        assert!(matches!(parse_query_int("4x", "limit"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn bool_param_rejects_garbage_as_invalid_input() {
        assert!(parse_query_bool("true", "ai_enabled").unwrap());
        assert!(!parse_query_bool("false", "ai_enabled").unwrap());
        assert!(matches!(parse_query_bool("1", "ai_enabled"), Err(Error::InvalidInput(_))));
        assert!(matches!(parse_query_bool("yes", "ai_enabled"), Err(Error::InvalidInput(_))));
    }
}

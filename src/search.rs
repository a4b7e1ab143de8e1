//! Full-text search over indexed pages.
//!
//! Ranking happens inside Postgres: a web-search-grammar query scores
//! each page with `ts_rank_cd`, a matching phrase query adds a flat
//! boost, and low-signal pages fall below a rank floor. The handler
//! returns highlighted headline snippets; a longer extended snippet per
//! page never leaves the server — it feeds the AI synthesis context.

use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::error::Error;

/// Rows whose extended snippets feed the AI context.
const CONTEXT_MAX_ROWS: usize = 15;

/// Hard stop for assembled AI context.
const CONTEXT_MAX_BYTES: usize = 30 * 1024;

const SEARCH_SQL: &str = "\
WITH query AS ( \
  SELECT websearch_to_tsquery('english', $1) AS broad, \
         phraseto_tsquery('english', $1) AS phrase \
), \
ranked AS ( \
  SELECT p.file_id, p.page_num, \
         ts_rank_cd(p.text_vector, query.broad) \
           + 10.0 * CASE WHEN p.text_vector @@ query.phrase THEN 1.0 ELSE 0.0 END AS rank \
  FROM pages p \
  CROSS JOIN query \
  WHERE p.text_vector @@ query.broad \
), \
unique_pages AS ( \
  SELECT DISTINCT ON (file_id, page_num) file_id, page_num, rank \
  FROM ranked \
  WHERE rank >= 0.005 \
  ORDER BY file_id, page_num, rank DESC \
) \
SELECT u.file_id, f.name, f.num_pages, u.page_num, \
       ts_headline('english', p.text, (SELECT broad FROM query), \
         'StartSel=<b>, StopSel=</b>, MinWords=10, MaxWords=200, MaxFragments=3') AS snippet, \
       LEFT(p.text, 2000) AS extended_snippet, \
       u.rank \
FROM unique_pages u \
JOIN files f ON u.file_id = f.id \
JOIN pages p ON u.file_id = p.file_id AND u.page_num = p.page_num \
ORDER BY u.rank DESC, f.name, u.page_num \
LIMIT 100";

/// Same plan restricted to a single file.
const SEARCH_SQL_FILTERED: &str = "\
WITH query AS ( \
  SELECT websearch_to_tsquery('english', $1) AS broad, \
         phraseto_tsquery('english', $1) AS phrase \
), \
ranked AS ( \
  SELECT p.file_id, p.page_num, \
         ts_rank_cd(p.text_vector, query.broad) \
           + 10.0 * CASE WHEN p.text_vector @@ query.phrase THEN 1.0 ELSE 0.0 END AS rank \
  FROM pages p \
  CROSS JOIN query \
  WHERE p.text_vector @@ query.broad AND p.file_id = $2 \
), \
unique_pages AS ( \
  SELECT DISTINCT ON (file_id, page_num) file_id, page_num, rank \
  FROM ranked \
  WHERE rank >= 0.005 \
  ORDER BY file_id, page_num, rank DESC \
) \
SELECT u.file_id, f.name, f.num_pages, u.page_num, \
       ts_headline('english', p.text, (SELECT broad FROM query), \
         'StartSel=<b>, StopSel=</b>, MinWords=10, MaxWords=200, MaxFragments=3') AS snippet, \
       LEFT(p.text, 2000) AS extended_snippet, \
       u.rank \
FROM unique_pages u \
JOIN files f ON u.file_id = f.id \
JOIN pages p ON u.file_id = p.file_id AND u.page_num = p.page_num \
ORDER BY u.rank DESC, f.name, u.page_num \
LIMIT 100";

/// One search hit as returned to the client.
#[derive(Serialize, Clone)]
pub struct SearchResult {
    pub file_id: i64,
    pub file_name: String,
    pub page_num: i32,
    pub num_pages: i32,
    pub snippet: String,
}

/// Shaped results plus the assembled AI context.
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub context: String,
}

struct Excerpt {
    file_name: String,
    page_num: i32,
    num_pages: i32,
    text: String,
}

/// Runs the ranked full-text query and shapes the rows. `file_filter`
/// restricts candidates to one file.
pub async fn search_pages(
    db: &PgPool,
    q: &str,
    file_filter: Option<i64>,
) -> Result<SearchOutcome, Error> {
    let rows = match file_filter {
        Some(file_id) => {
            sqlx::query(SEARCH_SQL_FILTERED).bind(q).bind(file_id).fetch_all(db).await?
        }
        None => sqlx::query(SEARCH_SQL).bind(q).fetch_all(db).await?,
    };

    let mut results = Vec::with_capacity(rows.len());
    let mut excerpts = Vec::new();

    for row in &rows {
        let result = SearchResult {
            file_id: row.try_get("file_id")?,
            file_name: row.try_get("name")?,
            page_num: row.try_get("page_num")?,
            num_pages: row.try_get("num_pages")?,
            snippet: row.try_get("snippet")?,
        };

        if excerpts.len() < CONTEXT_MAX_ROWS {
            excerpts.push(Excerpt {
                file_name: result.file_name.clone(),
                page_num: result.page_num,
                num_pages: result.num_pages,
                text: row.try_get("extended_snippet")?,
            });
        }

        results.push(result);
    }

    Ok(SearchOutcome { context: build_context(&excerpts), results })
}

/// Concatenates excerpt blocks under numbered headers, stopping before
/// the accumulated context would exceed [`CONTEXT_MAX_BYTES`].
fn build_context(excerpts: &[Excerpt]) -> String {
    let mut context = String::new();
    for (i, excerpt) in excerpts.iter().enumerate() {
        let header = format!(
            "\n=== EXCERPT {}: [{}, Page {} of {}] ===\n",
            i + 1,
            excerpt.file_name,
            excerpt.page_num,
            excerpt.num_pages
        );
        if context.len() + header.len() + excerpt.text.len() + 2 > CONTEXT_MAX_BYTES {
            break;
        }
        context.push_str(&header);
        context.push_str(&excerpt.text);
        context.push_str("\n\n");
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excerpt(name: &str, page: i32, total: i32, text: &str) -> Excerpt {
        Excerpt {
            file_name: name.to_string(),
            page_num: page,
            num_pages: total,
            text: text.to_string(),
        }
    }

    #[test]
    fn context_headers_are_numbered_and_labeled() {
        let excerpts = vec![
            excerpt("anatomy.pdf", 12, 980, "The femur is the longest bone."),
            excerpt("physiology.pdf", 3, 410, "Cardiac output rises under load."),
        ];
        let context = build_context(&excerpts);
        assert!(context.contains("=== EXCERPT 1: [anatomy.pdf, Page 12 of 980] ==="));
        assert!(context.contains("=== EXCERPT 2: [physiology.pdf, Page 3 of 410] ==="));
        assert!(context.contains("The femur is the longest bone."));
    }

    #[test]
    fn context_stops_at_size_cap() {
        let big = "x".repeat(2100);
        let excerpts: Vec<Excerpt> =
            (0..15).map(|i| excerpt("big.pdf", i + 1, 100, &big)).collect();
        let context = build_context(&excerpts);
        assert!(context.len() <= CONTEXT_MAX_BYTES);
        // 15 * ~2KB overflows 30 KiB, so the tail must be dropped.
        assert!(!context.contains("=== EXCERPT 15:"));
        assert!(context.contains("=== EXCERPT 1:"));
    }

    #[test]
    fn empty_excerpts_build_empty_context() {
        assert_eq!(build_context(&[]), "");
    }
}

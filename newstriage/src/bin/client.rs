/*!
newstriage-client: the terminal review workstation (C10's UI half).
Grounded on the `dhofheinz-skim` example's ratatui event-loop shape (raw
mode + alternate screen + polling crossterm events on a tick) layered
over the channel-relayed `TriageSession` from `session.rs`.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use newstriage::cluster;
use newstriage::embedding::{self, RemoteEmbeddingProvider};
use newstriage::session::{Mode, TriageSession};
use newstriage::store;
use newstriage::topics;
use newstriage::types::{Article, Cluster, Topic};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use ratatui::{Frame, Terminal};
use std::collections::{HashMap, HashSet};
use std::io::Stdout;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

const PAGE_SIZE: usize = 20;
const TICK: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "newstriage-client", about = "Terminal review workstation for triaged candidates")]
struct Args {
    #[arg(long, value_name = "FILE", default_value = "adapters.toml")]
    adapters: std::path::PathBuf,

    #[arg(long, value_name = "FILE", default_value = "topics.txt")]
    topics: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_env(Some(&args.adapters)).context("failed to load configuration")?;

    let pool = common::init_db_pool(&config.database_url).await.context("failed to connect to postgres")?;

    let articles = store::load_unprocessed(&pool).await.context("failed to load unprocessed articles")?;

    let topics = if args.topics.exists() {
        let text = std::fs::read_to_string(&args.topics).context("failed to read topics.txt")?;
        topics::load_topics_or_log(&text)
    } else {
        Vec::new()
    };

    let clusters = if config.random_clusters {
        cluster::random_clusters(articles.len())
    } else {
        let texts: Vec<String> = articles
            .iter()
            .map(|a| format!("{}\n{}", a.title, a.summary))
            .collect();
        let provider = RemoteEmbeddingProvider::new(
            "https://api.openai.com/v1/embeddings",
            config.openai_key.clone(),
            "text-embedding-3-small",
        );
        match embedding::embed_batch(&provider, &texts).await {
            Ok(vectors) => cluster::cluster(&vectors),
            Err(e) => {
                tracing::error!(%e, "embedding failed, continuing without clusters");
                Vec::new()
            }
        }
    };

    let (articles, clusters) = group_and_order(articles, clusters, &topics);

    let session = TriageSession::new(articles, clusters, pool, config.minutes_folder.clone(), PAGE_SIZE);

    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to init terminal")?;

    let result = run(&mut terminal, session, config.brave_key.clone()).await;

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    result
}

/// Wires C8's clusters into C9's topic orderer (spec §4.9): build one
/// group per cluster (central ∪ outlier members, in ascending index
/// order) plus a singleton group for every article `clusters` left
/// unclustered, then let `topics::order_groups` reorder those groups.
/// Flattening the reordered groups changes each article's position, so
/// `clusters`' index fields — which `session.rs`'s `locate_cluster`
/// treats as positions into the session's article list — are remapped
/// by article id to the new positions before the session is built.
fn group_and_order(articles: Vec<Article>, clusters: Vec<Cluster>, topics: &[Topic]) -> (Vec<Article>, Vec<Cluster>) {
    let mut clustered: HashSet<usize> = HashSet::new();
    let mut index_groups: Vec<Vec<usize>> = Vec::new();
    for cluster in &clusters {
        let mut members: Vec<usize> = cluster.central.iter().chain(cluster.outliers.iter()).copied().collect();
        members.sort_unstable();
        clustered.extend(members.iter().copied());
        index_groups.push(members);
    }
    for i in 0..articles.len() {
        if !clustered.contains(&i) {
            index_groups.push(vec![i]);
        }
    }

    let article_groups: Vec<Vec<Article>> =
        index_groups.iter().map(|g| g.iter().map(|&i| articles[i].clone()).collect()).collect();
    let ordered_groups = topics::order_groups(article_groups, topics);

    let new_articles: Vec<Article> = ordered_groups.into_iter().flatten().collect();
    let new_index_of_id: HashMap<i64, usize> = new_articles.iter().enumerate().map(|(i, a)| (a.id, i)).collect();

    let remapped_clusters: Vec<Cluster> = clusters
        .into_iter()
        .map(|c| Cluster {
            id: c.id,
            central: c.central.iter().map(|&old_i| new_index_of_id[&articles[old_i].id]).collect(),
            outliers: c.outliers.iter().map(|&old_i| new_index_of_id[&articles[old_i].id]).collect(),
            centroid: c.centroid,
        })
        .collect();

    (new_articles, remapped_clusters)
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut session: TriageSession,
    brave_key: String,
) -> Result<()> {
    let mut filter_input: Option<String> = None;

    loop {
        session.expire_status();
        session.poll_background_events();

        terminal.draw(|f| draw(f, &session, filter_input.as_deref()))?;

        if !event::poll(TICK)? {
            continue;
        }
        let Event::Key(key) = event::read()? else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if let Some(buffer) = filter_input.as_mut() {
            match key.code {
                KeyCode::Enter => {
                    let pattern = buffer.clone();
                    filter_input = None;
                    match session.apply_filter(&pattern) {
                        Ok(n) => tracing::info!(n, pattern, "filter applied"),
                        Err(e) => tracing::warn!(%e, pattern, "invalid filter pattern"),
                    }
                }
                KeyCode::Esc => filter_input = None,
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(c) => buffer.push(c),
                _ => {}
            }
            continue;
        }

        match session.mode {
            Mode::List => match key.code {
                KeyCode::Char('q') => break,
                KeyCode::Char('j') | KeyCode::Down => session.move_down(),
                KeyCode::Char('k') | KeyCode::Up => session.move_up(),
                KeyCode::Char('n') => session.page_forward(),
                KeyCode::Char('p') => session.page_back(),
                KeyCode::Enter => session.mode = Mode::Detail,
                KeyCode::Char('t') => {
                    let selected = session.selected;
                    session.toggle_processed(selected);
                }
                KeyCode::Char('m') => {
                    if let Err(e) = session.save_to_minutes(session.selected) {
                        tracing::warn!(%e, "failed to save to minutes");
                    }
                }
                KeyCode::Char('c') => session.cluster_mark(),
                KeyCode::Char('/') => filter_input = Some(String::new()),
                KeyCode::Char('s') => session.start_web_search(brave_key.clone()),
                KeyCode::Char('?') => session.mode = Mode::Help,
                _ => {}
            },
            Mode::Detail => match key.code {
                KeyCode::Esc | KeyCode::Char('q') => session.mode = Mode::List,
                KeyCode::Char('t') => {
                    let selected = session.selected;
                    session.toggle_processed(selected);
                }
                KeyCode::Char('m') => {
                    if let Err(e) = session.save_to_minutes(session.selected) {
                        tracing::warn!(%e, "failed to save to minutes");
                    }
                }
                KeyCode::Char('i') => {
                    session.importance_shown.insert(session.selected);
                }
                _ => {}
            },
            Mode::Help => {
                session.mode = Mode::List;
            }
            Mode::Search => match key.code {
                KeyCode::Esc | KeyCode::Char('q') => session.mode = Mode::List,
                KeyCode::Char('j') | KeyCode::Down => {
                    if session.search_selected + 1 < session.search_results.len() {
                        session.search_selected += 1;
                    }
                }
                KeyCode::Char('k') | KeyCode::Up => {
                    session.search_selected = session.search_selected.saturating_sub(1);
                }
                _ => {}
            },
        }
    }

    session.quit().await;
    Ok(())
}

fn draw(f: &mut Frame, session: &TriageSession, filter_input: Option<&str>) {
    match session.mode {
        Mode::Help => draw_help(f),
        Mode::Search => draw_search(f, session),
        Mode::Detail => draw_detail(f, session),
        Mode::List => draw_list(f, session, filter_input),
    }
}

fn status_line(session: &TriageSession, filter_input: Option<&str>) -> Line<'static> {
    if let Some(buf) = filter_input {
        return Line::from(format!("filter> {buf}"));
    }
    if let Some(status) = &session.status {
        let style = if session.failure_marker {
            Style::default().fg(Color::Red)
        } else {
            Style::default().fg(Color::Green)
        };
        return Line::from(Span::styled(status.text.clone(), style));
    }
    Line::from("j/k move  enter detail  t toggle  m minutes  c cluster  / filter  s search  ? help  q quit")
}

fn draw_list(f: &mut Frame, session: &TriageSession, filter_input: Option<&str>) {
    let area = f.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);

    let start = session.page * session.page_size;
    let end = (start + session.page_size).min(session.articles.len());
    let items: Vec<ListItem> = session.articles[start.min(session.articles.len())..end]
        .iter()
        .enumerate()
        .map(|(offset, a)| {
            let idx = start + offset;
            let marker = if a.processed { "[x]" } else { "[ ]" };
            let style = if idx == session.selected {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            ListItem::new(format!("{marker} {}", a.title)).style(style)
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(format!(
        "Candidates ({}/{})",
        session.articles.len().min(end),
        session.articles.len()
    )));
    f.render_widget(list, chunks[0]);
    f.render_widget(Paragraph::new(status_line(session, filter_input)), chunks[1]);
}

fn draw_detail(f: &mut Frame, session: &TriageSession) {
    let area = f.size();
    let Some(article) = session.articles.get(session.selected) else {
        f.render_widget(Paragraph::new("no article selected"), area);
        return;
    };

    let mut lines = vec![
        Line::from(Span::styled(article.title.clone(), Style::default().add_modifier(Modifier::BOLD))),
        Line::from(article.link.clone()),
        Line::from(""),
        Line::from(article.summary.clone()),
    ];
    if session.importance_shown.contains(&session.selected) {
        lines.push(Line::from(""));
        lines.push(Line::from(format!(
            "important: {} — {}",
            article.importance_bool, article.importance_reasoning
        )));
    }

    let block = Block::default().borders(Borders::ALL).title("Detail (esc back, i importance, t toggle, m minutes)");
    f.render_widget(Paragraph::new(lines).block(block).wrap(ratatui::widgets::Wrap { trim: false }), area);
}

fn draw_search(f: &mut Frame, session: &TriageSession) {
    let area = f.size();
    let items: Vec<ListItem> = session
        .search_results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let style = if i == session.search_selected {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            ListItem::new(format!("{}\n  {}", r.title, r.url)).style(style)
        })
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Side search (esc back)"));
    f.render_widget(list, area);
}

fn draw_help(f: &mut Frame) {
    let area = f.size();
    let text = vec![
        Line::from("j/k, up/down   move selection"),
        Line::from("n/p            next/prev page"),
        Line::from("enter          open detail view"),
        Line::from("t              toggle processed"),
        Line::from("m              save to this week's minutes"),
        Line::from("c              mark current cluster (central/outlier) processed"),
        Line::from("/              enter a filter regex, ANY(a,b) expands to a lookahead"),
        Line::from("s              side search on the cleaned title"),
        Line::from("i              (in detail view) reveal importance reasoning"),
        Line::from("q / esc        back / quit"),
        Line::from(""),
        Line::from("press any key to return"),
    ];
    f.render_widget(
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Help")),
        area,
    );
}

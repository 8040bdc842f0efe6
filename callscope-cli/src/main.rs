//! callscope: command-line client for a running callscope-server.
//!
//! Talks to the server's HTTP API. `ask` keeps a local conversation log so
//! follow-up questions carry their history.
//!
//! # Subcommands
//! - `status`                                  server and index health
//! - `rebuild [--force]`                       load or rebuild the vector index
//! - `clear`                                   delete the persisted index
//! - `search <query> [-n <limit>] [--json]`    most similar call summaries
//! - `ask <query> [--direct] [--stream]`       answer a question about the calls

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use callscope_core::{ConversationLog, RetrievedDocument};
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";
const DEFAULT_HISTORY: &str = "chat_history.json";
const PREVIEW_CHARS: usize = 200;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "callscope",
    version,
    about = "Ask questions about analysed call-center summaries"
)]
struct Cli {
    /// Callscope HTTP server URL (overrides CALLSCOPE_HTTP_URL env var)
    #[arg(long, env = "CALLSCOPE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server and index status
    Status,

    /// Load the persisted index, or build one if none is usable
    Rebuild {
        /// Discard the persisted index and re-embed every summary
        #[arg(long)]
        force: bool,
    },

    /// Delete the persisted index
    Clear,

    /// Show the call summaries most similar to a query
    Search {
        /// Query text to search for
        query: String,

        /// Maximum number of results (defaults to the server's retrieval.k)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print the raw results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask a question about the analysed calls
    Ask {
        /// The question
        query: String,

        /// Put every summary in the prompt instead of retrieving the top matches
        #[arg(long)]
        direct: bool,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,

        /// Conversation log carried between questions
        #[arg(long, env = "CALLSCOPE_HISTORY", default_value = DEFAULT_HISTORY)]
        history: PathBuf,

        /// Start a fresh conversation, discarding the saved log
        #[arg(long)]
        reset: bool,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

/// Body of `POST /search`.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<RetrievedDocument>,
    pub took_ms: Option<u64>,
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
}

// ============================================================================
// HTTP Client
// ============================================================================

struct Client {
    http: reqwest::blocking::Client,
    base: String,
}

impl Client {
    fn new(base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn get(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let url = self.url(path);
        let resp = self
            .http
            .get(&url)
            .send()
            .map_err(|e| anyhow::anyhow!("cannot reach {}: {}", url, e))?;
        read_json(resp)
    }

    fn delete(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let url = self.url(path);
        let resp = self
            .http
            .delete(&url)
            .send()
            .map_err(|e| anyhow::anyhow!("cannot reach {}: {}", url, e))?;
        read_json(resp)
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        read_json(self.post_raw(path, body)?)
    }

    /// POST and return the response once its status is known to be a success.
    fn post_raw(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<reqwest::blocking::Response> {
        let url = self.url(path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| anyhow::anyhow!("cannot reach {}: {}", url, e))?;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(error_from(resp))
        }
    }
}

fn read_json(resp: reqwest::blocking::Response) -> anyhow::Result<serde_json::Value> {
    if !resp.status().is_success() {
        return Err(error_from(resp));
    }
    Ok(resp.json()?)
}

fn error_from(resp: reqwest::blocking::Response) -> anyhow::Error {
    let status = resp.status().as_u16();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    anyhow::anyhow!(server_error(status, &body))
}

/// Human-readable form of a server error body (`{"error", "kind"}`).
pub fn server_error(status: u16, body: &serde_json::Value) -> String {
    let message = body["error"].as_str().unwrap_or("no error message");
    match body["kind"].as_str() {
        Some(kind) => format!("server returned {} ({}): {}", status, kind, message),
        None => format!("server returned {}: {}", status, message),
    }
}

// ============================================================================
// Rendering
// ============================================================================

pub fn render_status(body: &serde_json::Value) -> String {
    let index = &body["index"];
    let persisted = if index["persisted"].as_bool().unwrap_or(false) {
        "yes"
    } else {
        "no"
    };
    let mut out = format!(
        "Callscope server: {} (v{})\n\
         Socket:           {}\n\
         Index:            {}\n\
         Documents:        {}\n\
         Records:          {}\n\
         Persisted:        {}",
        body["status"].as_str().unwrap_or("unknown"),
        body["version"].as_str().unwrap_or("?"),
        body["socket"].as_str().unwrap_or("?"),
        index["status"].as_str().unwrap_or("?"),
        index["document_count"],
        index["record_count"],
        persisted,
    );
    if index["status"] == "STALE" {
        out.push_str("\nNew summaries are not indexed yet; run `callscope rebuild --force`.");
    }
    out
}

/// The `Summary:` line of a rendered document, or its first characters.
pub fn summary_line(content: &str) -> String {
    content
        .lines()
        .find_map(|l| l.strip_prefix("Summary: "))
        .unwrap_or(content)
        .chars()
        .take(PREVIEW_CHARS)
        .collect()
}

pub fn render_hit(rank: usize, hit: &RetrievedDocument) -> String {
    let m = &hit.metadata;
    let agent = if m.agent_name.is_empty() {
        "Unknown"
    } else {
        m.agent_name.as_str()
    };
    let category = if m.issue_category.is_empty() {
        "N/A"
    } else {
        m.issue_category.as_str()
    };
    format!(
        "{}. Call {} | {} | {} | score {:.0}%\n   {}",
        rank,
        m.call_id,
        agent,
        category,
        hit.score * 100.0,
        summary_line(&hit.content)
    )
}

// ============================================================================
// Chat helpers
// ============================================================================

pub fn chat_body(query: &str, log: &ConversationLog, direct: bool) -> serde_json::Value {
    serde_json::json!({
        "query": query,
        "history": log.turns(),
        "mode": if direct { "direct" } else { "rag" },
    })
}

/// Read a server-sent-event chat stream until its `done` event, handing each
/// data chunk to `on_chunk`. Returns the concatenated answer.
pub fn read_sse<R: BufRead>(reader: R, mut on_chunk: impl FnMut(&str)) -> anyhow::Result<String> {
    let mut answer = String::new();
    let mut event: Option<String> = None;
    let mut data: Option<String> = None;

    for line in reader.lines() {
        let line = line?;

        if line.is_empty() {
            match event.take().as_deref() {
                Some("done") => return Ok(answer),
                Some("error") => {
                    anyhow::bail!("answer failed: {}", data.take().unwrap_or_default())
                }
                _ => {
                    if let Some(chunk) = data.take() {
                        on_chunk(&chunk);
                        answer.push_str(&chunk);
                    }
                }
            }
            continue;
        }

        // keep-alive comment
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = line.split_once(':').unwrap_or((line.as_str(), ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    anyhow::bail!("stream closed before the answer completed")
}

/// Append one question/answer exchange to the log on disk.
pub fn record_exchange(
    path: &Path,
    mut log: ConversationLog,
    query: &str,
    answer: &str,
    response_time: f64,
) -> anyhow::Result<ConversationLog> {
    log.push_user(query);
    log.push_assistant(answer, Some(response_time));
    log.save(path)?;
    Ok(log)
}

// ============================================================================
// Commands
// ============================================================================

fn do_status(server: &str) -> anyhow::Result<()> {
    let client = Client::new(server, Duration::from_secs(10))?;
    let body = client.get("/health")?;
    println!("{}", render_status(&body));
    Ok(())
}

fn do_rebuild(server: &str, force: bool) -> anyhow::Result<()> {
    let client = Client::new(server, Duration::from_secs(900))?;
    let body = client.post("/index/rebuild", &serde_json::json!({ "force": force }))?;
    let verb = match body["outcome"]["outcome"].as_str() {
        Some("loaded") => "loaded",
        _ => "built",
    };
    println!("Index {}: {} documents", verb, body["documents"]);
    Ok(())
}

fn do_clear(server: &str) -> anyhow::Result<()> {
    let client = Client::new(server, Duration::from_secs(30))?;
    client.delete("/index")?;
    println!("Index cleared");
    Ok(())
}

fn do_search(server: &str, query: &str, limit: Option<usize>, json_output: bool) -> anyhow::Result<()> {
    let client = Client::new(server, Duration::from_secs(60))?;
    let body = client.post(
        "/search",
        &serde_json::json!({ "query": query, "limit": limit }),
    )?;
    let resp: SearchResponse = serde_json::from_value(body)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&resp.results)?);
        return Ok(());
    }

    if resp.results.is_empty() {
        eprintln!("No matching call summaries for: {}", resp.query);
        return Ok(());
    }
    for (i, hit) in resp.results.iter().enumerate() {
        println!("{}\n", render_hit(i + 1, hit));
    }
    if let Some(ms) = resp.took_ms {
        eprintln!("{} results in {} ms", resp.count, ms);
    }
    Ok(())
}

fn do_ask(
    server: &str,
    query: &str,
    direct: bool,
    stream: bool,
    history: &Path,
    reset: bool,
) -> anyhow::Result<()> {
    let client = Client::new(server, Duration::from_secs(300))?;
    let log = if reset {
        ConversationLog::new()
    } else {
        ConversationLog::load(history)?
    };

    let body = chat_body(query, &log, direct);
    let started = Instant::now();

    let answer = if stream {
        let resp = client.post_raw("/chat/stream", &body)?;
        let mut stdout = std::io::stdout();
        let answer = read_sse(BufReader::new(resp), |chunk| {
            let _ = write!(stdout, "{}", chunk);
            let _ = stdout.flush();
        })?;
        println!();
        answer
    } else {
        let reply: ChatAnswer = serde_json::from_value(client.post("/chat", &body)?)?;
        println!("{}", reply.answer);
        reply.answer
    };

    record_exchange(history, log, query, &answer, started.elapsed().as_secs_f64())?;
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server;

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Rebuild { force } => do_rebuild(&server, force),
        Commands::Clear => do_clear(&server),
        Commands::Search { query, limit, json } => do_search(&server, &query, limit, json),
        Commands::Ask {
            query,
            direct,
            stream,
            history,
            reset,
        } => do_ask(&server, &query, direct, stream, &history, reset),
    };

    if let Err(e) = result {
        eprintln!("callscope: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

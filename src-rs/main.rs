mod error;
mod provider;
mod source;
mod tag;
mod workflow;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::error::AltError;
use crate::provider::{HttpBackend, ProviderConfig, ProviderOverrides};
use crate::tag::Attr;
use crate::workflow::{DocumentContext, Outcome};

#[derive(Parser, Debug)]
#[command(
    name = "img-alt-loop",
    version,
    about = "Find the <img> tag under a cursor offset and write AI-generated alt text into it"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Print results (and errors) as JSON
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    json: bool,
    /// Raise log verbosity on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::enum_variant_names)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Show the <img> tag spanning an offset and its src/alt state
    Locate(LocateArgs),
    /// List every <img> tag in a document with its alt status
    Scan(ScanArgs),
    /// Resolve an <img> src into the payload sent to the provider
    Resolve(ResolveArgs),
    /// Ask the provider to describe the image and write the result into alt
    Describe(EditArgs),
    /// Translate the existing alt text to English in place
    Translate(EditArgs),
}

#[derive(Args, Debug)]
struct DocumentArgs {
    /// HTML document path (also the base for relative image paths)
    #[arg(long)]
    file: PathBuf,
    /// Read the document text from stdin; --file then only names the document
    #[arg(long, action = ArgAction::SetTrue)]
    stdin: bool,
}

#[derive(Args, Debug)]
struct LocateArgs {
    #[command(flatten)]
    document: DocumentArgs,
    /// Zero-based character offset of the cursor
    #[arg(long)]
    offset: usize,
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[command(flatten)]
    document: DocumentArgs,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// The src attribute value
    #[arg(long)]
    src: String,
    /// Document the src appears in
    #[arg(long)]
    file: PathBuf,
    /// Root for src values starting with `/` (default: IMG_ALT_WORKSPACE_ROOT)
    #[arg(long)]
    workspace_root: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EditArgs {
    #[command(flatten)]
    document: DocumentArgs,
    /// Zero-based character offset of the cursor
    #[arg(long)]
    offset: usize,
    /// Root for src values starting with `/` (default: IMG_ALT_WORKSPACE_ROOT)
    #[arg(long)]
    workspace_root: Option<PathBuf>,
    #[command(flatten)]
    provider: ProviderArgs,
    /// Compute the edit without writing the document
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct ProviderArgs {
    /// AI provider: openai or mistral (default: IMG_ALT_PROVIDER, then openai)
    #[arg(long)]
    provider: Option<String>,
    /// API key (default: IMG_ALT_API_KEY, then OPENAI_API_KEY / MISTRAL_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
    /// Model override (default: IMG_ALT_MODEL, then the provider's default)
    #[arg(long)]
    model: Option<String>,
    /// Chat completions endpoint override (default: IMG_ALT_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,
    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl ProviderArgs {
    fn overrides(&self) -> ProviderOverrides {
        ProviderOverrides {
            provider: self.provider.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            timeout_secs: self.timeout,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let json_output = cli.json;

    if let Err(err) = run(cli) {
        if json_output {
            let payload = error_json(&err);
            if let Ok(raw) = serde_json::to_string_pretty(&payload) {
                println!("{raw}");
            }
        }
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let json_output = cli.json;
    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Locate(args) => command_locate(args, json_output),
        Commands::Scan(args) => command_scan(args, json_output),
        Commands::Resolve(args) => command_resolve(args, json_output),
        Commands::Describe(args) => command_edit(args, workflow::Action::Describe, json_output),
        Commands::Translate(args) => command_edit(args, workflow::Action::Translate, json_output),
    }
}

fn init_logging(verbose: u8) {
    let filter = first_non_empty_env(&["IMG_ALT_LOG", "RUST_LOG"])
        .map(EnvFilter::new)
        .unwrap_or_else(|| {
            EnvFilter::new(match verbose {
                0 => "warn",
                1 => "info",
                _ => "debug",
            })
        });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "locate",
            "description": "Show the <img> tag spanning a character offset and its src/alt state.",
        }),
        json!({
            "name": "scan",
            "description": "List every <img> tag with offsets and alt status (missing/decorative/present).",
        }),
        json!({
            "name": "resolve",
            "description": "Resolve an src value into a URL or base64 data URI payload.",
        }),
        json!({
            "name": "describe",
            "description": "Generate alt text with the configured provider and insert/replace the alt attribute.",
        }),
        json!({
            "name": "translate",
            "description": "Translate existing alt text to English and replace it in place.",
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn command_locate(args: LocateArgs, json_output: bool) -> Result<()> {
    let text = read_document(&args.document)?;
    let span = tag::locate(&text, args.offset)
        .ok_or_else(|| AltError::tag_not_at_offset(args.offset))?;

    if json_output {
        let payload = json!({
            "file": abs_path(&args.document.file).display().to_string(),
            "offset": args.offset,
            "tag": tag_json(&span),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}..{} {}", span.start, span.end, span.text);
    }
    Ok(())
}

fn command_scan(args: ScanArgs, json_output: bool) -> Result<()> {
    let text = read_document(&args.document)?;
    let spans = tag::scan(&text);

    if json_output {
        let missing = spans
            .iter()
            .filter(|span| span.attr(Attr::Alt).is_none())
            .count();
        let payload = json!({
            "generated_at": timestamp_iso(),
            "file": abs_path(&args.document.file).display().to_string(),
            "tag_count": spans.len(),
            "missing_alt_count": missing,
            "tags": spans.iter().map(tag_json).collect::<Vec<Value>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for span in &spans {
            println!(
                "{}..{}\t{}\t{}",
                span.start,
                span.end,
                alt_status(span.attr(Attr::Alt).as_deref()),
                span.attr(Attr::Src).unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn command_resolve(args: ResolveArgs, json_output: bool) -> Result<()> {
    let root = workspace_root(args.workspace_root);
    let payload = source::resolve(&args.src, &args.file, root.as_deref())?;

    if json_output {
        let (mime, encoded_len) = match &payload {
            source::ImagePayload::Url { .. } => (Value::Null, Value::Null),
            source::ImagePayload::DataUri { mime, data } => (json!(mime), json!(data.len())),
        };
        let out = json!({
            "src": args.src,
            "kind": payload.kind(),
            "mime": mime,
            "encoded_len": encoded_len,
            "url_preview": truncate_text(&payload.to_url(), 96),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", truncate_text(&payload.to_url(), 96));
    }
    Ok(())
}

fn command_edit(args: EditArgs, action: workflow::Action, json_output: bool) -> Result<()> {
    let snapshot = read_document(&args.document)?;
    let ctx = DocumentContext {
        path: abs_path(&args.document.file),
        workspace_root: workspace_root(args.workspace_root.clone()),
        offset: args.offset,
    };

    let config = ProviderConfig::from_env(&args.provider.overrides())?;
    tracing::debug!(?config, "provider configuration");
    let backend = HttpBackend::new(config)?;

    let reread = || -> Result<String> {
        if args.document.stdin {
            Ok(snapshot.clone())
        } else {
            fs::read_to_string(&args.document.file).with_context(|| {
                format!("failed to re-read document: {}", args.document.file.display())
            })
        }
    };

    let outcome = match action {
        workflow::Action::Describe => workflow::describe(&snapshot, &ctx, &backend, reread)?,
        workflow::Action::Translate => workflow::translate(&snapshot, &ctx, &backend, reread)?,
    };
    for warning in &outcome.warnings {
        tracing::warn!("{warning}");
    }

    let mode = match &outcome.updated_text {
        None => "unchanged",
        Some(_) if args.document.stdin => "edit",
        Some(_) if args.dry_run => "dry_run",
        Some(updated) => {
            write_text_file(&args.document.file, updated)?;
            tracing::info!(file = %args.document.file.display(), "wrote updated document");
            "written"
        }
    };

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome_json(&outcome, &ctx.path, mode))?
        );
    } else if let Some(alt) = &outcome.alt {
        println!("{alt}");
    }
    Ok(())
}

fn outcome_json(outcome: &Outcome, file: &Path, mode: &str) -> Value {
    json!({
        "generated_at": timestamp_iso(),
        "file": file.display().to_string(),
        "action": outcome.action,
        "mode": mode,
        "changed": outcome.changed(),
        "tag": tag_json(&outcome.tag),
        "previous_alt": outcome.previous_alt,
        "alt": outcome.alt,
        "payload_kind": outcome.payload_kind,
        "edit": outcome.edit.as_ref().map(|edit| json!({
            "range": { "start": edit.range.start, "end": edit.range.end },
            "replacement": edit.new_tag_text,
        })),
        "warnings": outcome.warnings,
    })
}

fn tag_json(span: &tag::TagSpan) -> Value {
    let alt = span.attr(Attr::Alt);
    json!({
        "start": span.start,
        "end": span.end,
        "text": span.text,
        "src": span.attr(Attr::Src),
        "alt": alt,
        "alt_status": alt_status(alt.as_deref()),
    })
}

fn alt_status(alt: Option<&str>) -> &'static str {
    match alt {
        None => "missing",
        Some("") => "decorative",
        Some(_) => "present",
    }
}

fn error_json(err: &anyhow::Error) -> Value {
    let code = err
        .downcast_ref::<AltError>()
        .map(AltError::code)
        .unwrap_or("unknown");
    json!({
        "error": {
            "code": code,
            "message": format!("{err:#}"),
        }
    })
}

fn read_document(args: &DocumentArgs) -> Result<String> {
    if args.stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read document from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read document: {}", args.file.display()))
}

fn workspace_root(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| first_non_empty_env(&["IMG_ALT_WORKSPACE_ROOT"]).map(PathBuf::from))
}

fn first_non_empty_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>() + "..."
}

fn write_text_file(path: &Path, content: &str) -> Result<()> {
    ensure_parent_dir(path)?;
    fs::write(path, content).with_context(|| format!("failed to write text: {}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cli_parses_describe_arguments() {
        let cli = Cli::try_parse_from([
            "img-alt-loop",
            "describe",
            "--file",
            "site/index.html",
            "--offset",
            "42",
            "--provider",
            "mistral",
            "--dry-run",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Describe(args) => {
                assert_eq!(args.offset, 42);
                assert_eq!(args.provider.provider.as_deref(), Some("mistral"));
                assert!(args.dry_run);
                assert!(!args.document.stdin);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn alt_status_distinguishes_decorative() {
        assert_eq!(alt_status(None), "missing");
        assert_eq!(alt_status(Some("")), "decorative");
        assert_eq!(alt_status(Some("A cat")), "present");
    }

    #[test]
    fn error_json_carries_code() {
        let err = anyhow::Error::from(AltError::AttributeMissing { name: "src" });
        let payload = error_json(&err);
        assert_eq!(payload["error"]["code"], json!("attribute_missing"));

        let other = anyhow::anyhow!("disk full");
        assert_eq!(error_json(&other)["error"]["code"], json!("unknown"));
    }

    #[test]
    fn outcome_json_reports_edit_range() {
        let doc = r#"<div><img src="https://example.com/a.png"></div>"#;
        let span = tag::locate(doc, 8).unwrap();
        let edit = tag::rewrite_alt_at(doc, &span, "Logo").unwrap();
        let outcome = Outcome {
            action: workflow::Action::Describe,
            tag: span,
            previous_alt: None,
            alt: Some("Logo".to_string()),
            payload_kind: Some("url"),
            updated_text: Some(edit.apply(doc).unwrap()),
            edit: Some(edit),
            warnings: Vec::new(),
        };
        let payload = outcome_json(&outcome, Path::new("/site/index.html"), "dry_run");
        assert_eq!(payload["edit"]["range"]["start"], json!(5));
        assert_eq!(payload["edit"]["range"]["end"], json!(42));
        assert_eq!(
            payload["edit"]["replacement"],
            json!(r#"<img src="https://example.com/a.png" alt="Logo">"#)
        );
        assert_eq!(payload["tag"]["alt_status"], json!("missing"));
        assert_eq!(payload["action"], json!("describe"));
    }

    #[test]
    fn reads_document_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, "<img src=\"a.png\">").unwrap();
        let args = DocumentArgs {
            file: path,
            stdin: false,
        };
        assert_eq!(read_document(&args).unwrap(), "<img src=\"a.png\">");
    }

    #[test]
    fn writes_text_creating_parents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.html");
        write_text_file(&target, "<p></p>").unwrap();
        assert_eq!(fs::read_to_string(target).unwrap(), "<p></p>");
    }

    #[test]
    fn truncate_text_keeps_short_values() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("abcdef", 3), "abc...");
    }
}

use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use stylist_contracts::chat::{parse_intent, Intent, STUDIO_HELP_COMMANDS};
use stylist_contracts::history::{export_filename, SaveTarget};
use stylist_contracts::modal::ModalKind;
use stylist_contracts::photo::PhotoSlot;
use stylist_engine::prompts::{ANALYZING_LABEL, GENERATING_LABEL};
use stylist_engine::{DirectorySaver, Studio, StudioConfig, StudioStatus};

#[derive(Debug, Parser)]
#[command(name = "stylist", version, about = "AI hairstyle studio client")]
struct Cli {
    /// Proxy endpoint; overrides STYLIST_PROXY_URL.
    #[arg(long, global = true)]
    proxy_url: Option<String>,
    /// Persisted quota and history file; overrides STYLIST_STATE_PATH.
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session driven by slash commands.
    Studio,
    Generate(GenerateArgs),
    Suggest(SuggestArgs),
    Describe(DescribeArgs),
    Redeem(RedeemArgs),
    Status,
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    style: Option<PathBuf>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct SuggestArgs {
    #[arg(long)]
    photo: PathBuf,
}

#[derive(Debug, Parser)]
struct DescribeArgs {
    #[arg(long)]
    style: PathBuf,
}

#[derive(Debug, Parser)]
struct RedeemArgs {
    code: String,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    out: PathBuf,
    /// 1-based history positions to export.
    #[arg(long = "index", value_delimiter = ',')]
    indices: Vec<usize>,
    #[arg(long, conflicts_with = "indices")]
    all: bool,
}

const DATA_URL_PREVIEW_CHARS: usize = 48;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stylist error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = resolve_config(&cli, StudioConfig::from_env());
    let studio = Studio::from_config(&config)?;
    match cli.command {
        Command::Studio => {
            run_studio(&studio)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(&studio, args),
        Command::Suggest(args) => {
            studio.select_photo(PhotoSlot::Subject, &args.photo)?;
            studio.suggest_styles()?;
            if let Some(modal) = studio.modal() {
                println!("{}", modal.rendered_body());
            }
            Ok(0)
        }
        Command::Describe(args) => {
            studio.select_photo(PhotoSlot::Style, &args.style)?;
            println!("{}", studio.describe_style()?);
            Ok(0)
        }
        Command::Redeem(args) => {
            let outcome = studio.redeem(&args.code);
            println!("{}: {}", outcome.heading(), outcome.message());
            Ok(if outcome.is_success() { 0 } else { 2 })
        }
        Command::Status => {
            println!(
                "{}",
                serde_json::to_string_pretty(&status_json(&studio.status()))?
            );
            Ok(0)
        }
        Command::Export(args) => run_export(&studio, args),
    }
}

fn resolve_config(cli: &Cli, mut config: StudioConfig) -> StudioConfig {
    if let Some(state) = cli.state.clone() {
        config = config.with_state_path(state);
    }
    if let Some(events) = cli.events.clone() {
        config.events_path = events;
    }
    if let Some(proxy_url) = cli.proxy_url.as_deref() {
        config.proxy_url = proxy_url.trim_end_matches('/').to_string();
    }
    config
}

fn run_generate(studio: &Studio, args: GenerateArgs) -> Result<i32> {
    studio.select_photo(PhotoSlot::Subject, &args.photo)?;
    if let Some(style) = args.style.as_deref() {
        studio.select_photo(PhotoSlot::Style, style)?;
    }
    if let Some(prompt) = args.prompt.as_deref() {
        studio.set_prompt(prompt);
    }
    if !studio.ready_to_generate() {
        let status = studio.status();
        if status.quota.can_generate() {
            bail!("generate needs --prompt or --style");
        }
    }

    eprintln!("{GENERATING_LABEL}");
    let result = studio.generate()?;
    let path = DirectorySaver::new(&args.out)
        .save(
            result.data_url(),
            &export_filename(Utc::now().timestamp_millis(), 1),
        )?;
    println!("{}", path.display());
    print_quota(&studio.status());
    Ok(0)
}

fn run_export(studio: &Studio, args: ExportArgs) -> Result<i32> {
    let history_len = studio.status().history_len;
    let positions = export_positions(&args, history_len);
    if positions.is_empty() {
        bail!("nothing to export: pass --index N or --all");
    }
    for index in positions {
        if studio.select(index).is_none() {
            bail!("history has no item #{} ({} stored)", index + 1, history_len);
        }
    }
    let saved = studio.export_selected(&mut DirectorySaver::new(&args.out))?;
    for path in &saved {
        println!("{}", path.display());
    }
    Ok(0)
}

/// Zero-based history positions named by `args`, first mention wins.
fn export_positions(args: &ExportArgs, history_len: usize) -> Vec<usize> {
    if args.all {
        return (0..history_len).collect();
    }
    let mut positions = Vec::with_capacity(args.indices.len());
    for index in args.indices.iter().filter(|position| **position > 0).map(|position| position - 1) {
        if !positions.contains(&index) {
            positions.push(index);
        }
    }
    positions
}

fn run_studio(studio: &Studio) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Stylist studio started. Type /help for commands.");
    print_quota(&studio.status());

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => continue,
            "quit" => break,
            "help" => println!("Commands: {}", STUDIO_HELP_COMMANDS.join(" ")),
            "set_prompt" => {
                let text = intent.arg_str("text").unwrap_or_default();
                studio.set_prompt(text);
                if text.is_empty() {
                    println!("Prompt cleared.");
                } else {
                    println!("Prompt set.");
                }
            }
            "select_subject" | "select_style" => {
                let slot = if intent.action == "select_subject" {
                    PhotoSlot::Subject
                } else {
                    PhotoSlot::Style
                };
                let Some(path) = intent.arg_str("path") else {
                    println!("/{} requires a path", slot_command(slot));
                    continue;
                };
                match studio.select_photo(slot, Path::new(path)) {
                    Ok(()) => println!("{} photo set to {path}", capitalize(slot.as_str())),
                    Err(_) => show_modal(studio),
                }
            }
            "generate" => {
                println!("{GENERATING_LABEL}");
                match studio.generate() {
                    Ok(_) => {
                        println!("New look ready. /view 1 to see it, /animate for before/after.");
                        print_quota(&studio.status());
                    }
                    Err(_) => show_modal(studio),
                }
            }
            "suggest" => {
                println!("{ANALYZING_LABEL}");
                let _ = studio.suggest_styles();
                show_modal(studio);
            }
            "describe" => {
                println!("{ANALYZING_LABEL}");
                match studio.describe_style() {
                    Ok(description) => println!("Prompt set from style photo: {description}"),
                    Err(_) => show_modal(studio),
                }
            }
            "redeem" => {
                studio.redeem(intent.arg_str("code").unwrap_or_default());
                show_modal(studio);
            }
            "status" => print_status(&studio.status()),
            "history" => print_history(studio),
            "view_history" => {
                let Some(index) = first_index(&intent) else {
                    println!("/view requires a history number");
                    continue;
                };
                let _ = studio.show_history_item(index);
                show_modal(studio);
            }
            "toggle_selection" => {
                let indices = intent.arg_indices("indices");
                if indices.is_empty() {
                    println!("/select requires one or more history numbers");
                    continue;
                }
                for index in indices {
                    match studio.toggle_selection(index) {
                        Some(true) => println!("#{} selected", index + 1),
                        Some(false) => println!("#{} deselected", index + 1),
                        None => println!("#{} is not in history", index + 1),
                    }
                }
            }
            "export_selected" => {
                let Some(dir) = intent.arg_str("path") else {
                    println!("/export requires a directory");
                    continue;
                };
                match studio.export_selected(&mut DirectorySaver::new(dir)) {
                    Ok(saved) if saved.is_empty() => println!("Nothing selected. Use /select N."),
                    Ok(saved) => {
                        for path in saved {
                            println!("Saved {}", path.display());
                        }
                    }
                    Err(err) => println!("Export failed: {err:#}"),
                }
            }
            "animate" => {
                let mut frame = 0usize;
                let opened = studio.open_before_after(Box::new(move |_source: &str| {
                    let label = if frame % 2 == 0 { "before" } else { "after" };
                    frame = frame.wrapping_add(1);
                    println!("[{label}]");
                }));
                if opened.is_err() {
                    show_modal(studio);
                } else {
                    println!("Before/after running. /close to stop.");
                }
            }
            "close_modal" => studio.close_modal(),
            "reset" => {
                studio.reset();
                println!("Session cleared.");
            }
            _ => {
                let command = intent.arg_str("command").unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }

    studio.close_modal();
    Ok(())
}

/// Prints the open modal. Text and image modals are dismissed once shown;
/// the before/after modal stays until `/close`.
fn show_modal(studio: &Studio) {
    let Some(modal) = studio.modal() else {
        return;
    };
    match modal.kind {
        ModalKind::Text => {
            println!("{}\n{}", modal.heading, modal.rendered_body());
            studio.close_modal();
        }
        ModalKind::Image => {
            println!("{}: {}", modal.heading, preview_data_url(&modal.body));
            studio.close_modal();
        }
        ModalKind::Animation => println!("{}", modal.heading),
    }
}

fn print_history(studio: &Studio) {
    let history = studio.history();
    if history.is_empty() {
        println!("History is empty.");
        return;
    }
    for (index, entry) in history.iter().enumerate() {
        let marker = if studio.is_selected(index) { "*" } else { " " };
        println!("{marker} #{:<2} {}", index + 1, preview_data_url(entry.data_url()));
    }
}

fn print_quota(status: &StudioStatus) {
    if status.quota.unlimited {
        println!("Unlimited generations.");
    } else {
        println!(
            "Generations used: {}/{}",
            status.quota.used, status.quota.cap
        );
    }
}

fn print_status(status: &StudioStatus) {
    print_quota(status);
    println!(
        "Subject photo: {}  Style photo: {}",
        ready_label(status.subject_ready),
        ready_label(status.style_ready)
    );
    if status.prompt.is_empty() {
        println!("Prompt: (empty)");
    } else {
        println!("Prompt: {}", status.prompt);
    }
    println!(
        "History: {} ({} selected)",
        status.history_len, status.selected_count
    );
    if let Some(pending) = status.pending.as_ref() {
        println!("Busy: {} ({})", pending.label, pending.phase);
    }
}

fn status_json(status: &StudioStatus) -> Value {
    let remaining = if status.quota.unlimited {
        Value::Null
    } else {
        Value::from(status.quota.remaining())
    };
    json!({
        "quota": status.quota,
        "remaining": remaining,
        "history_len": status.history_len,
        "selected": status.selected_count,
    })
}

fn preview_data_url(data_url: &str) -> String {
    let preview: String = data_url.chars().take(DATA_URL_PREVIEW_CHARS).collect();
    if preview.len() < data_url.len() {
        format!("{preview}... ({} bytes)", data_url.len())
    } else {
        preview
    }
}

fn first_index(intent: &Intent) -> Option<usize> {
    intent.arg_indices("indices").first().copied()
}

fn slot_command(slot: PhotoSlot) -> &'static str {
    match slot {
        PhotoSlot::Subject => "photo",
        PhotoSlot::Style => "style",
    }
}

fn ready_label(ready: bool) -> &'static str {
    if ready {
        "ready"
    } else {
        "none"
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

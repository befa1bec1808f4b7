use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use brood_contracts::events::EventWriter;
use brood_contracts::intent::{recover_intent_document, select_mode, TransformationMode};
use brood_mother::collaborators::CanvasImage;
use brood_mother::dryrun::DryrunHost;
use brood_mother::session::new_session_id;
use brood_mother::{InboundEvent, MotherConfig, Orchestrator, SessionView};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "brood-mother", version, about = "Brood Mother proposal orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recover an intent document from raw model output.
    Parse(ParseArgs),
    /// Drive the orchestrator from a JSONL script with dry-run collaborators.
    Replay(ReplayArgs),
}

#[derive(Debug, Parser)]
struct ParseArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "hybridize")]
    default_mode: String,
}

#[derive(Debug, Parser)]
struct ReplayArgs {
    #[arg(long)]
    script: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Make `prepare()` fail so drafting is never armed.
    #[arg(long)]
    runtime_unavailable: bool,
}

/// Script lines that steer the dry-run host rather than the orchestrator.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Directive {
    Images { images: Vec<CanvasImage> },
    Advance { ms: u64 },
    Fire { kind: String },
}

const DIRECTIVE_TYPES: [&str; 3] = ["images", "advance", "fire"];

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("brood-mother error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Parse(args) => run_parse(&args),
        Command::Replay(args) => run_replay(&args),
    }
}

fn run_parse(args: &ParseArgs) -> Result<i32> {
    let (report, code) = parse_report(args)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(code)
}

fn parse_report(args: &ParseArgs) -> Result<(Value, i32)> {
    let Some(default_mode) = TransformationMode::parse(&args.default_mode) else {
        bail!("unknown transformation mode: {}", args.default_mode);
    };
    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    match recover_intent_document(&text) {
        Ok(document) => {
            let selection = select_mode(&document.mode_evidence(), default_mode);
            Ok((
                json!({
                    "ok": true,
                    "document": document,
                    "selection": selection,
                }),
                0,
            ))
        }
        Err(err) => Ok((
            json!({
                "ok": false,
                "reason": err.reason.as_str(),
                "first_error": err.first_error,
            }),
            2,
        )),
    }
}

fn run_replay(args: &ReplayArgs) -> Result<i32> {
    let report = replay(args)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for step in &report.steps {
        writeln!(out, "{}", serde_json::to_string(step)?)?;
    }
    writeln!(out, "{}", serde_json::to_string(&report.view.to_json())?)?;
    Ok(0)
}

struct ReplayReport {
    view: SessionView,
    steps: Vec<Value>,
    events_path: PathBuf,
    outbound_path: PathBuf,
}

fn replay(args: &ReplayArgs) -> Result<ReplayReport> {
    let config = match args.config.as_deref() {
        Some(path) => MotherConfig::load(path)?,
        None => MotherConfig::from_env(),
    };
    let script = fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read script {}", args.script.display()))?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));

    let mut host = DryrunHost::new(Vec::new());
    host.snapshot_dir = args.out.to_string_lossy().to_string();
    host.runtime_available = !args.runtime_unavailable;
    let events = EventWriter::new(&events_path, new_session_id());
    let mut mother = Orchestrator::new(config, host.collaborators(), events);
    mother.start();

    let mut steps = Vec::new();
    for (index, raw) in script.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("script line {line_no} is not JSON"))?;
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
        if DIRECTIVE_TYPES.contains(&kind) {
            let directive: Directive = serde_json::from_value(value)
                .with_context(|| format!("script line {line_no} is not a valid directive"))?;
            let event = match directive {
                Directive::Images { images } => {
                    host.set_images(images);
                    continue;
                }
                Directive::Advance { ms } => {
                    host.clock.advance(ms);
                    continue;
                }
                Directive::Fire { kind } => {
                    let token = mother
                        .live_timers()
                        .into_iter()
                        .find(|(_, tag)| tag.kind() == kind)
                        .map(|(token, _)| token)
                        .with_context(|| {
                            format!("script line {line_no}: no live {kind} timer to fire")
                        })?;
                    InboundEvent::TimerFired { token }
                }
            };
            steps.push(drive(&mut mother, line_no, event));
            continue;
        }
        let event: InboundEvent = serde_json::from_value(value)
            .with_context(|| format!("script line {line_no} is not a known event"))?;
        steps.push(drive(&mut mother, line_no, event));
    }

    let outbound_path = args.out.join("outbound.jsonl");
    write_jsonl(
        &outbound_path,
        host.log
            .calls()
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Value>, _>>()?,
    )?;

    Ok(ReplayReport {
        view: mother.view(),
        steps,
        events_path,
        outbound_path,
    })
}

fn drive(mother: &mut Orchestrator, line_no: usize, event: InboundEvent) -> Value {
    let name = event.name();
    let step = mother.handle(event);
    json!({
        "line": line_no,
        "event": name,
        "before": step.before.as_str(),
        "after": step.after.as_str(),
        "absorbed": step.absorbed.as_ref().map(|err| err.code()),
        "detail": step.absorbed.as_ref().map(|err| err.to_string()),
    })
}

fn write_jsonl(path: &Path, rows: Vec<Value>) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        writeln!(file, "{}", serde_json::to_string(&row)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use serde_json::{json, Value};

    use super::{parse_report, replay, ParseArgs, ReplayArgs};
    use brood_mother::Phase;

    fn read_jsonl(path: &Path) -> anyhow::Result<Vec<Value>> {
        fs::read_to_string(path)?
            .lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    fn replay_args(dir: &Path, script: &str) -> anyhow::Result<ReplayArgs> {
        let script_path = dir.join("script.jsonl");
        fs::write(&script_path, script)?;
        Ok(ReplayArgs {
            script: script_path,
            out: dir.join("out"),
            events: None,
            config: None,
            runtime_unavailable: false,
        })
    }

    #[test]
    fn parse_recovers_fenced_output() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("output.txt");
        fs::write(
            &input,
            "Sure! Here you go:\n```json\n{\"data\": {\"transformation_mode\": \"mythologize\",}}\n```",
        )?;
        let (report, code) = parse_report(&ParseArgs {
            input,
            default_mode: "hybridize".to_string(),
        })?;
        assert_eq!(code, 0);
        assert_eq!(report["ok"], json!(true));
        assert_eq!(report["selection"]["primary"], json!("mythologize"));
        Ok(())
    }

    #[test]
    fn parse_reports_the_failure_reason() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("output.txt");
        fs::write(&input, "{\"transformation_mode\": \"amp")?;
        let (report, code) = parse_report(&ParseArgs {
            input: input.clone(),
            default_mode: "hybridize".to_string(),
        })?;
        assert_eq!(code, 2);
        assert_eq!(report["reason"], json!("truncated_json"));

        let unknown = parse_report(&ParseArgs {
            input,
            default_mode: "sparkle".to_string(),
        });
        assert!(unknown.is_err());
        Ok(())
    }

    #[test]
    fn replay_runs_a_full_cycle_and_writes_logs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out = temp.path().join("out");
        let intent_path = out.join("mother-intent-a1.png");
        let draft_path = out.join("mother-draft-a2.png");
        let script = [
            json!({"type": "images", "images": [
                {"id": "img-1", "label": "harbor", "bounds": {"x": 0, "y": 0, "w": 512, "h": 512}}
            ]}),
            json!({"type": "fire", "kind": "idle_attract"}),
            json!({"type": "intent_inferred", "action_version": 1,
                   "snapshot_path": intent_path.to_string_lossy(),
                   "text": "{\"transformation_mode\": \"purify\"}"}),
            json!({"type": "fire", "kind": "idle_inference"}),
            json!({"type": "confirm"}),
            json!({"type": "generation_result", "action_version": 7, "artifact_ref": "stray.png"}),
            json!({"type": "generation_result", "action_version": 2,
                   "snapshot_path": draft_path.to_string_lossy(), "artifact_ref": "draft.png"}),
            json!({"type": "deploy"}),
            json!({"type": "commit_done"}),
        ]
        .iter()
        .map(Value::to_string)
        .collect::<Vec<String>>()
        .join("\n");
        let args = replay_args(temp.path(), &format!("# canonical cycle\n{script}\n"))?;

        let report = replay(&args)?;
        assert_eq!(report.view.phase, Phase::Cooldown);
        assert_eq!(report.steps.len(), 8);
        assert_eq!(report.steps[4]["absorbed"], json!("correlation_mismatch"));

        let events = read_jsonl(&report.events_path)?;
        let types: Vec<&str> = events
            .iter()
            .filter_map(|row| row["type"].as_str())
            .collect();
        assert!(types.contains(&"mother_result_ignored"));
        assert!(types.contains(&"mother_commit"));
        assert!(events
            .iter()
            .all(|row| row["session_id"] == events[0]["session_id"]));

        let outbound = read_jsonl(&report.outbound_path)?;
        assert!(outbound
            .iter()
            .any(|call| call["call"] == json!("commit") && call["placement"]["policy"] == json!("adjacent")));
        Ok(())
    }

    #[test]
    fn replay_rejects_unknown_events_with_the_line_number() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let args = replay_args(temp.path(), "{\"type\": \"reject\"}\n{\"type\": \"teleport\"}\n")?;
        let err = match replay(&args) {
            Ok(_) => anyhow::bail!("unknown event was accepted"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").contains("script line 2"));

        let args = replay_args(temp.path(), "{\"type\": \"fire\", \"kind\": \"cooldown\"}\n")?;
        assert!(replay(&args).is_err());
        Ok(())
    }
}

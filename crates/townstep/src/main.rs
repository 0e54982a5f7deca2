use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use town_core::io::frame::make_frame;
use town_core::rng::seed_from_phrase;
use town_core::world::Role;
use town_core::{fresh_town, ActionRequest, MemoryStore, Params, Registration, Scheduler, Store, TownDef};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "townstep",
    about = "Batch runner for deterministic NDJSON town frames"
)]
struct Args {
    /// Path to a town JSON document. The built-in town is used when omitted.
    #[arg(long, value_name = "PATH")]
    town: Option<PathBuf>,

    /// Numeric world seed.
    #[arg(long, value_name = "NUMBER", conflicts_with = "seed_phrase", default_value_t = 1)]
    seed: u64,

    /// Derive the world seed from a phrase instead.
    #[arg(long = "seed-phrase", value_name = "TEXT")]
    seed_phrase: Option<String>,

    /// Number of ticks to execute.
    #[arg(long)]
    ticks: u64,

    /// Output NDJSON file path.
    #[arg(long)]
    out: PathBuf,

    /// NDJSON script of registrations and actions keyed by tick.
    #[arg(long, value_name = "PATH")]
    script: Option<PathBuf>,
}

/// One scripted line. Entries for tick `t` are applied just before tick `t`
/// runs, in file order.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Cue {
    Register {
        t: u64,
        name: String,
        #[serde(default)]
        role: Option<Role>,
        #[serde(default)]
        backstory: Option<String>,
    },
    Act {
        t: u64,
        actor: String,
        action: String,
        #[serde(default)]
        params: Params,
    },
}

impl Cue {
    fn tick(&self) -> u64 {
        match self {
            Cue::Register { t, .. } | Cue::Act { t, .. } => *t,
        }
    }
}

type Script = BTreeMap<u64, Vec<Cue>>;

fn parse_script<R: BufRead>(reader: R) -> Result<Script> {
    let mut script = Script::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cue: Cue = serde_json::from_str(line)
            .with_context(|| format!("script line {} is not a valid cue", index + 1))?;
        if cue.tick() == 0 {
            bail!("script line {}: ticks start at 1", index + 1);
        }
        script.entry(cue.tick()).or_default().push(cue);
    }
    Ok(script)
}

fn load_script(path: &Path) -> Result<Script> {
    let file = File::open(path).with_context(|| format!("failed to open script {:?}", path))?;
    parse_script(BufReader::new(file))
}

fn load_town(path: Option<&Path>) -> Result<TownDef> {
    match path {
        Some(path) => TownDef::load_from_path(path)
            .with_context(|| format!("failed to read town {:?}", path)),
        None => TownDef::deadwood(),
    }
}

async fn apply(scheduler: &mut Scheduler<MemoryStore>, cue: Cue) -> Result<()> {
    match cue {
        Cue::Register {
            name,
            role,
            backstory,
            ..
        } => {
            let registration = Registration {
                name,
                role,
                backstory,
            };
            if let Err(err) = scheduler.register(&registration).await {
                warn!(name = %registration.name, error = %err, "scripted registration refused");
            }
        }
        Cue::Act {
            actor,
            action,
            params,
            ..
        } => {
            let Some(character) = scheduler.engine().store.character_by_name(&actor) else {
                warn!(%actor, "scripted actor does not exist");
                return Ok(());
            };
            let request = ActionRequest { action, params };
            if let Err(rejection) = scheduler.queue().submit(character.id, request).await {
                warn!(%actor, code = %rejection.code, "scripted action refused");
            }
        }
    }
    Ok(())
}

/// Run `ticks` ticks and write one frame per tick to `out`.
async fn run<W: Write>(
    town: Arc<TownDef>,
    seed: u64,
    ticks: u64,
    mut script: Script,
    out: &mut W,
) -> Result<()> {
    let mut scheduler = fresh_town(town, seed)?;
    for _ in 0..ticks {
        let next_tick = scheduler.tick_count() + 1;
        for cue in script.remove(&next_tick).unwrap_or_default() {
            apply(&mut scheduler, cue).await?;
        }
        let Some(report) = scheduler.tick().await else {
            bail!("world paused at tick {next_tick}");
        };
        let line = make_frame(&report).to_ndjson()?;
        out.write_all(line.as_bytes())?;
    }
    if let Some((tick, _)) = script.first_key_value() {
        warn!(tick, "script entries beyond the last tick were ignored");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let town = Arc::new(load_town(args.town.as_deref())?);
    let seed = args
        .seed_phrase
        .as_deref()
        .map(seed_from_phrase)
        .unwrap_or(args.seed);
    let script = match &args.script {
        Some(path) => load_script(path)?,
        None => Script::new(),
    };

    let frame_file =
        File::create(&args.out).with_context(|| format!("failed to create {:?}", args.out))?;
    let mut frame_writer = BufWriter::new(frame_file);

    info!(town = %town.name, seed, ticks = args.ticks, "running");
    run(town, seed, args.ticks, script, &mut frame_writer).await?;
    frame_writer.flush()?;
    Ok(())
}

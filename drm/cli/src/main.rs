use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drm_eme::memory::{MemoryKeySystem, MemorySession};
use drm_eme::{Clock, ManualClock, MediaKeySession, MediaKeys, SystemClock};

mod scenario;

use self::scenario::Scenario;

#[derive(Parser, Debug)]
#[command(name = "eme-sim")]
#[command(about = "Replay EME session scenarios against the init data session registry")]
struct Args {
    /// Scenario file (JSON)
    scenario: PathBuf,

    /// Evaluate expiry at this time (ms since Unix epoch), overriding the scenario
    #[arg(long)]
    now_ms: Option<f64>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let scenario = Scenario::load(&args.scenario).await?;

    let clock: Arc<dyn Clock> = match args.now_ms.or(scenario.now_ms) {
        Some(now) => Arc::new(ManualClock::new(now)),
        None => Arc::new(SystemClock),
    };
    info!(now_ms = clock.now_millis(), "evaluating scenario");

    let mismatches = run(&scenario, clock).await?;
    if mismatches > 0 {
        bail!("{mismatches} lookup(s) did not match their expected session");
    }
    Ok(())
}

/**
    Set up every session in the scenario, run its lookups, and return
    how many lookups disagreed with their `expect`.
*/
async fn run(scenario: &Scenario, clock: Arc<dyn Clock>) -> Result<usize> {
    let keys = MediaKeys::with_clock(MemoryKeySystem::new(), clock);
    let sessions = create_sessions(&keys, scenario).await?;
    close_sessions(&keys, scenario, &sessions).await?;

    let mut mismatches = 0;
    for (i, lookup) in scenario.lookups.iter().enumerate() {
        let init_data_type = lookup.init_data_type();
        let init_data = lookup
            .init_data()
            .with_context(|| format!("lookup {i}"))?;

        let found = keys
            .session_for_init_data(&init_data_type, &init_data)
            .await
            .with_context(|| format!("lookup {i}"))?;
        let name = found.and_then(|session| {
            sessions
                .iter()
                .find(|(_, s)| *s == session)
                .map(|(name, _)| name.clone())
        });

        println!(
            "[lookup {i}] {init_data_type} {} -> {}",
            hex::encode(&init_data),
            name.as_deref().unwrap_or("none")
        );

        if let Some(expected) = &lookup.expect
            && *expected != name
        {
            warn!(lookup = i, ?expected, actual = ?name, "unexpected lookup result");
            mismatches += 1;
        }
    }

    Ok(mismatches)
}

async fn create_sessions(
    keys: &MediaKeys<MemoryKeySystem>,
    scenario: &Scenario,
) -> Result<Vec<(String, MemorySession)>> {
    let mut sessions = Vec::with_capacity(scenario.sessions.len());

    for spec in &scenario.sessions {
        let session = keys.create_session(spec.session_type()?)?;
        keys.generate_request(&session, &spec.init_data_type(), &spec.init_data()?)
            .await
            .with_context(|| format!("session {:?}: request failed", spec.name))?;

        session.update_key_statuses(spec.key_statuses()?);
        session.set_expiration(spec.expiration());

        info!(
            name = %spec.name,
            session_id = %session.session_id(),
            init_data_type = %spec.init_data_type,
            keys = spec.keys.len(),
            "created session"
        );
        sessions.push((spec.name.clone(), session));
    }

    Ok(sessions)
}

async fn close_sessions(
    keys: &MediaKeys<MemoryKeySystem>,
    scenario: &Scenario,
    sessions: &[(String, MemorySession)],
) -> Result<()> {
    let mut open = sessions.len();
    for (spec, (name, session)) in scenario.sessions.iter().zip(sessions) {
        if spec.closed {
            info!(name = %name, "closing session");
            session.close();
            open -= 1;
        }
    }

    // Removal happens on spawned tasks, wait for them to land
    tokio::time::timeout(Duration::from_secs(1), async {
        while keys.registry().len() != open {
            tokio::task::yield_now().await;
        }
    })
    .await
    .context("closed sessions were not removed from the registry")?;

    Ok(())
}

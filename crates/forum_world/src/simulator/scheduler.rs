use chrono::Utc;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::actor::{ActionKind, Actor, ActorSnapshot};
use super::checkpoint::{load_checkpoint, write_checkpoint, CheckpointPaths};
use super::clock::SimClock;
use super::config::{ConfigError, SimConfig};
use super::daily_log::{DailyLog, DailyLogEntry};
use super::runtime::{ActorRuntime, TurnDirective, TurnOutcome, TurnRequest};
use super::tools::{PublicationKind, WorldTools};
use super::turn_state::{ActorTurnState, TurnKind};
use crate::digest::{truncate_chars, SummaryCache};
use crate::feed::{FeedError, FeedWriter, TurnAction, TurnRecord};
use crate::models::{ActorId, Persona};
use crate::persist::PersistError;
use crate::world::{ForumStore, JournalStore};

const MEMORY_LINE_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("data directory {dir} already holds a run; enable resume to continue it")]
    ExistingRun { dir: String },
    #[error("actor already registered: {id}")]
    DuplicateActor { id: ActorId },
}

/// Run-level cancellation, checked between ticks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub turns: u64,
    pub skipped_turns: u64,
    pub failed_appends: u64,
    pub acted: Vec<ActorId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ticks_run: u64,
    pub turns: u64,
    pub skipped_turns: u64,
    pub failed_appends: u64,
    pub cancelled: bool,
    pub turns_by_actor: BTreeMap<ActorId, u64>,
}

impl RunReport {
    fn absorb(&mut self, tick: TickReport) {
        self.ticks_run += 1;
        self.turns += tick.turns;
        self.skipped_turns += tick.skipped_turns;
        self.failed_appends += tick.failed_appends;
        for actor_id in tick.acted {
            *self.turns_by_actor.entry(actor_id).or_default() += 1;
        }
    }
}

struct PlannedTurn {
    request: TurnRequest,
    next: ActorTurnState,
    action: TurnAction,
}

/// Drives ticks: picks actors, plays their turns through the runtime,
/// records every turn, advances the clock and checkpoints.
pub struct Engine<R: ActorRuntime> {
    config: SimConfig,
    runtime: R,
    rng: StdRng,
    clock: Arc<RwLock<SimClock>>,
    actors: RwLock<BTreeMap<ActorId, Actor>>,
    world: WorldTools,
    feed: FeedWriter,
    daily_log: DailyLog,
    checkpoints: CheckpointPaths,
    cancel: CancelToken,
}

impl<R: ActorRuntime> Engine<R> {
    /// Opens or resumes the run in `config.data_dir`.
    pub fn open(config: SimConfig, runtime: R) -> Result<Self, EngineError> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)
            .map_err(|err| PersistError::io(&config.data_dir, err))?;
        let checkpoints = CheckpointPaths::new(config.state_dir());
        if checkpoints.exists() && !config.resume {
            return Err(EngineError::ExistingRun {
                dir: config.data_dir.display().to_string(),
            });
        }

        let loaded = load_checkpoint(&checkpoints, config.review_policy, config.digest_limits)?;
        let resumed = loaded.clock.is_some();
        let clock = match loaded.clock {
            Some(mut clock) => {
                clock.step_seconds = config.step_seconds;
                clock
            }
            None => SimClock::new(Utc::now(), config.step_seconds),
        };
        let forum = loaded.forum.unwrap_or_default();
        let journal = loaded
            .journal
            .unwrap_or_else(|| JournalStore::new(config.review_policy));
        let digest = loaded
            .digest
            .unwrap_or_else(|| SummaryCache::new(config.digest_limits));

        let feed = FeedWriter::open(config.feed_dir(), config.max_events_per_shard, config.resume)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            data_dir = %config.data_dir.display(),
            resumed,
            tick = clock.tick,
            sim_time = %clock.sim_time,
            feed_total = feed.total(),
            posts = forum.len(),
            papers = journal.len(),
            "engine opened"
        );

        Ok(Self {
            daily_log: DailyLog::new(config.actor_logs_dir()),
            world: WorldTools::new(Arc::new(forum), Arc::new(journal), Arc::new(digest)),
            clock: Arc::new(RwLock::new(clock)),
            actors: RwLock::new(BTreeMap::new()),
            checkpoints,
            feed,
            rng,
            runtime,
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Registers an actor with a fresh turn budget, restoring its durable
    /// state from the checkpoint when present.
    pub fn add_actor(&mut self, persona: Persona) -> Result<(), EngineError> {
        if self.actors.read().contains_key(&persona.id) {
            return Err(EngineError::DuplicateActor { id: persona.id });
        }
        let mut actor = Actor::new(
            persona,
            self.config.turn_budget(),
            self.config.memory_chars,
            self.config.note_capacity,
            &mut self.rng,
        );
        if let Some(snapshot) = ActorSnapshot::load_json(self.checkpoints.actor(actor.id()))? {
            actor.restore(snapshot);
            actor.notes.set_capacity(self.config.note_capacity);
            tracing::debug!(actor_id = actor.id(), "restored actor state");
        }
        self.actors.write().insert(actor.id().to_string(), actor);
        Ok(())
    }

    pub fn run_tick(&mut self) -> TickReport {
        let (sim_time, tick) = {
            let clock = self.clock.read();
            (clock.sim_time, clock.tick + 1)
        };
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let mut eligible: Vec<ActorId> = self
            .actors
            .read()
            .values()
            .filter(|actor| actor.turn.is_eligible())
            .map(|actor| actor.id().to_string())
            .collect();
        eligible.shuffle(&mut self.rng);
        eligible.truncate(self.config.actors_per_tick);

        for actor_id in eligible {
            let Some(planned) = self.plan_turn(&actor_id, tick, sim_time) else {
                continue;
            };
            let mut session = self.world.session(&actor_id, sim_time);
            let outcome = match self.runtime.run_turn(&planned.request, &mut session) {
                Ok(outcome) => outcome,
                Err(err) => {
                    let rolled_back = session.rollback();
                    tracing::warn!(
                        actor_id = %actor_id,
                        tick,
                        rolled_back,
                        error = %err,
                        "actor turn failed, skipping"
                    );
                    report.skipped_turns += 1;
                    continue;
                }
            };
            let interactions = session.interactions().to_vec();
            let publications = session.publications().to_vec();
            drop(session);

            {
                let mut actors = self.actors.write();
                if let Some(actor) = actors.get_mut(&actor_id) {
                    actor.turn = planned.next;
                    actor.memory.push(sim_time, tick, &memory_line(planned.action, &outcome));
                    actor.record_interactions(&interactions);
                    for publication in &publications {
                        let (tag, importance) = match publication.kind {
                            PublicationKind::Post => ("post", 0.6),
                            PublicationKind::Paper => ("paper", 0.8),
                        };
                        actor.notes.store(
                            format!("I published {} {} \"{}\"", tag, publication.id, publication.title),
                            sim_time,
                            vec![tag.to_string()],
                            importance,
                        );
                    }
                }
            }

            let real_time = Utc::now();
            let entry = DailyLogEntry::new(
                real_time,
                sim_time,
                tick,
                planned.action,
                &outcome.response_text,
                outcome.tool_calls.clone(),
            );
            if let Err(err) = self.daily_log.append(&actor_id, &entry) {
                tracing::warn!(actor_id = %actor_id, tick, error = %err, "daily log append failed");
            }

            let record = TurnRecord {
                real_time,
                sim_time,
                tick,
                actor_id: actor_id.clone(),
                actor_name: planned.request.actor_name.clone(),
                action: planned.action,
                prompt: planned.request.prompt(),
                response: outcome.response_text,
                tool_calls: outcome.tool_calls,
                tool_responses: outcome.tool_responses,
                turns_taken: planned.next.turns_taken,
                bell_rung: planned.next.bell_rung(),
                grace_remaining: planned.next.grace_remaining(),
                usage: outcome.usage,
            }
            .with_truncated_text();
            if let Err(err) = self.feed.append(&record) {
                tracing::warn!(actor_id = %actor_id, tick, error = %err, "feed append failed");
                report.failed_appends += 1;
            }
            report.turns += 1;
            report.acted.push(actor_id);
        }

        let tick = self.clock.write().advance();
        if tick % self.config.checkpoint_interval == 0 {
            self.checkpoint();
        }
        tracing::debug!(
            tick,
            turns = report.turns,
            skipped = report.skipped_turns,
            "tick complete"
        );
        report
    }

    /// Runs `ticks` ticks, stopping early once the cancel token fires.
    pub fn run_for(&mut self, ticks: u64) -> RunReport {
        let mut report = RunReport::default();
        for _ in 0..ticks {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                tracing::info!(ticks_run = report.ticks_run, "run cancelled");
                break;
            }
            let tick = self.run_tick();
            report.absorb(tick);
        }
        report
    }

    /// Persists everything, logging rather than returning a failure.
    pub fn checkpoint(&self) {
        match self.save() {
            Ok(()) => tracing::info!(tick = self.clock.read().tick, "checkpoint written"),
            Err(err) => tracing::warn!(error = %err, "checkpoint failed"),
        }
    }

    pub fn save(&self) -> Result<(), EngineError> {
        let snapshots: Vec<ActorSnapshot> =
            self.actors.read().values().map(Actor::snapshot).collect();
        let clock = *self.clock.read();
        write_checkpoint(
            &self.checkpoints,
            &snapshots,
            self.world.forum(),
            self.world.journal(),
            self.world.digest(),
            &clock,
        )?;
        Ok(())
    }

    /// Saves state and closes the feed.
    pub fn close(self) -> Result<(), EngineError> {
        self.save()?;
        self.feed.close()?;
        Ok(())
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn clock(&self) -> SimClock {
        *self.clock.read()
    }

    /// Shared handle for read-only observers.
    pub fn clock_handle(&self) -> Arc<RwLock<SimClock>> {
        Arc::clone(&self.clock)
    }

    pub fn world(&self) -> &WorldTools {
        &self.world
    }

    pub fn feed(&self) -> &FeedWriter {
        &self.feed
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.actors.read().keys().cloned().collect()
    }

    pub fn actor_snapshot(&self, actor_id: &str) -> Option<ActorSnapshot> {
        self.actors.read().get(actor_id).map(Actor::snapshot)
    }

    pub fn actor_turn_state(&self, actor_id: &str) -> Option<ActorTurnState> {
        self.actors.read().get(actor_id).map(|actor| actor.turn)
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    fn plan_turn(
        &mut self,
        actor_id: &str,
        tick: u64,
        sim_time: chrono::DateTime<Utc>,
    ) -> Option<PlannedTurn> {
        let actors = self.actors.read();
        let actor = actors.get(actor_id)?;
        let (kind, next) = actor.turn.advance()?;
        let directive = match kind {
            TurnKind::Act { rings_bell } => TurnDirective::Act {
                action: actor.weights.choose(&mut self.rng),
                rings_bell,
            },
            TurnKind::Rest => TurnDirective::Rest {
                grace_remaining: next.grace_remaining(),
            },
        };
        let action = match directive {
            TurnDirective::Act { action, .. } => action.into(),
            TurnDirective::Rest { .. } => TurnAction::Rest,
        };
        let relationships = actor
            .top_relationships(5)
            .into_iter()
            .map(|(other, rel)| {
                format!(
                    "- {other}: affinity {:+.2} over {} interactions",
                    rel.affinity, rel.interactions
                )
            })
            .collect::<Vec<_>>();
        let request = TurnRequest {
            actor_id: actor_id.to_string(),
            actor_name: actor.persona.name.clone(),
            persona: actor.persona.describe(),
            tick,
            sim_time,
            directive,
            instruction: render_instruction(directive),
            memory: actor.memory.render(),
            notes: actor.notes.render(5),
            relationships: if relationships.is_empty() {
                "Nobody yet.".to_string()
            } else {
                relationships.join("\n")
            },
        };
        Some(PlannedTurn {
            request,
            next,
            action,
        })
    }
}

fn render_instruction(directive: TurnDirective) -> String {
    match directive {
        TurnDirective::Act { action, rings_bell } => {
            let task = match action {
                ActionKind::Post => "Write a new forum post about one of your interests.",
                ActionKind::Comment => "Find a thread worth responding to and add a comment.",
                ActionKind::Vote => {
                    "Look through recent threads and vote on content you have an opinion about."
                }
                ActionKind::Browse => {
                    "Catch up on a discussion. If its digest needs a summary, write one and save it."
                }
                ActionKind::SubmitPaper => "Draft a short paper and submit it to the journal.",
                ActionKind::ReviewPaper => {
                    "Review a paper awaiting review and score it from 1 to 10."
                }
            };
            if rings_bell {
                format!(
                    "{task}\n\nThe rest bell has rung: this is your last regular turn for now. \
                     Wrap up what you are doing."
                )
            } else {
                task.to_string()
            }
        }
        TurnDirective::Rest { grace_remaining } => format!(
            "The rest bell has rung and it is time to take a break. Reply with a short \
             farewell and do not use any tools. ({grace_remaining} grace turns remain.)"
        ),
    }
}

fn memory_line(action: TurnAction, outcome: &TurnOutcome) -> String {
    let (response, _) = truncate_chars(outcome.response_text.trim(), MEMORY_LINE_CHARS);
    if outcome.tool_calls.is_empty() {
        format!("{}: {}", action.as_str(), response)
    } else {
        format!(
            "{}: {} [tools: {}]",
            action.as_str(),
            response,
            outcome.tool_calls.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActorRole, CognitiveStyle, PersonaTraits};
    use crate::simulator::runtime::{RuntimeError, ScriptedRuntime};
    use crate::simulator::tools::ToolSession;

    fn config(dir: &std::path::Path) -> SimConfig {
        SimConfig {
            data_dir: dir.to_path_buf(),
            actors_per_tick: 2,
            turn_limit: 2,
            grace_turns: 1,
            checkpoint_interval: 2,
            seed: Some(5),
            ..SimConfig::default()
        }
    }

    fn persona(id: &str) -> Persona {
        Persona::new(
            id,
            format!("{id} name"),
            ActorRole::Researcher,
            CognitiveStyle::Analytical,
            PersonaTraits::default(),
        )
    }

    struct FailingRuntime;

    impl ActorRuntime for FailingRuntime {
        fn run_turn(
            &mut self,
            _request: &TurnRequest,
            _tools: &mut ToolSession<'_>,
        ) -> Result<TurnOutcome, RuntimeError> {
            Err(RuntimeError::Unavailable {
                message: "offline".to_string(),
            })
        }
    }

    #[test]
    fn actors_stop_after_limit_plus_grace() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::open(config(dir.path()), ScriptedRuntime::new()).unwrap();
        engine.add_actor(persona("a")).unwrap();
        engine.add_actor(persona("b")).unwrap();

        let report = engine.run_for(10);

        assert_eq!(report.ticks_run, 10);
        assert_eq!(report.turns, 6);
        for turns in report.turns_by_actor.values() {
            assert_eq!(*turns, 3);
        }
        assert_eq!(engine.feed().total(), 6);
        assert!(!engine.actor_turn_state("a").unwrap().is_eligible());
    }

    #[test]
    fn failed_turns_leave_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::open(config(dir.path()), FailingRuntime).unwrap();
        engine.add_actor(persona("a")).unwrap();

        let report = engine.run_tick();

        assert_eq!(report.skipped_turns, 1);
        assert_eq!(report.turns, 0);
        assert_eq!(engine.feed().total(), 0);
        assert_eq!(engine.actor_turn_state("a").unwrap().turns_taken, 0);
        assert_eq!(engine.clock().tick, 1);
    }

    /// Posts, then fails before the turn completes.
    struct PostThenFailRuntime;

    impl ActorRuntime for PostThenFailRuntime {
        fn run_turn(
            &mut self,
            _request: &TurnRequest,
            tools: &mut ToolSession<'_>,
        ) -> Result<TurnOutcome, RuntimeError> {
            let response = tools.invoke(crate::simulator::tools::ToolCall::CreatePost {
                title: "Half done".to_string(),
                content: "written before the failure".to_string(),
            });
            assert!(response.ok);
            Err(RuntimeError::Unavailable {
                message: "connection reset".to_string(),
            })
        }
    }

    #[test]
    fn failed_turn_discards_its_world_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::open(config(dir.path()), PostThenFailRuntime).unwrap();
        engine.add_actor(persona("a")).unwrap();

        let report = engine.run_tick();

        assert_eq!(report.skipped_turns, 1);
        assert_eq!(engine.feed().total(), 0);
        assert!(engine.world().forum().is_empty());
        assert!(engine.actor_snapshot("a").unwrap().notes.is_empty());
        assert_eq!(engine.actor_turn_state("a").unwrap().turns_taken, 0);
    }

    #[test]
    fn duplicate_actor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::open(config(dir.path()), ScriptedRuntime::new()).unwrap();
        engine.add_actor(persona("a")).unwrap();
        assert!(matches!(
            engine.add_actor(persona("a")),
            Err(EngineError::DuplicateActor { .. })
        ));
    }

    #[test]
    fn checkpoint_interval_writes_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::open(config(dir.path()), ScriptedRuntime::new()).unwrap();
        engine.add_actor(persona("a")).unwrap();
        engine.run_tick();
        assert!(!dir.path().join("state").join("sim_state.json").exists());
        engine.run_tick();
        assert!(dir.path().join("state").join("sim_state.json").exists());
        assert!(dir
            .path()
            .join("state")
            .join("actors")
            .join("a.json")
            .exists());
    }

    #[test]
    fn cancelled_run_stops_between_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::open(config(dir.path()), ScriptedRuntime::new()).unwrap();
        engine.add_actor(persona("a")).unwrap();
        engine.cancel_token().cancel();
        let report = engine.run_for(5);
        assert!(report.cancelled);
        assert_eq!(report.ticks_run, 0);
    }

    #[test]
    fn bell_turn_instruction_mentions_the_bell() {
        let text = render_instruction(TurnDirective::Act {
            action: ActionKind::Post,
            rings_bell: true,
        });
        assert!(text.contains("rest bell"));
        let rest = render_instruction(TurnDirective::Rest { grace_remaining: 2 });
        assert!(rest.contains("2 grace turns"));
    }
}

//! Round engine: one play session's state machine.
//!
//! The engine runs as a single task that owns all mutable session state. Every
//! external signal reaches it through that task's loop: player commands arrive on
//! the command mailbox, fetch completions on an internal channel, and countdown
//! signals from the owned `CountdownTimer`. Transitions are therefore applied one
//! at a time and never observed concurrently.
//!
//! The remote fetch runs on its own task and rejoins the loop through the
//! completion channel, tagged with the round number that launched it. A result
//! whose round is no longer the one being fetched is dropped.
//!
//! The countdown is the session's time budget. It is armed on the first question,
//! paused while an answer is evaluated and the next question is fetched, and
//! resumed once that question arrives, so fetch latency is never charged to the
//! player. Cancelling a round holds the clock rather than refilling it. The tick
//! that reaches zero ends the session in the same transition.

use std::sync::Arc;

use rand::{rngs::StdRng, Rng};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};

use crate::answers;
use crate::domain::{profile_for, Difficulty, DifficultyProfile, Metric, Question, RoundChallenge};
use crate::fetcher::{FetchError, RoundFetcher};
use crate::ledger::ScoreLedger;
use crate::scores::ScoreSink;
use crate::timer::{CountdownTimer, TimerSignal};

const COMMAND_QUEUE: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    Fetching,
    AwaitingAnswer,
    Evaluating,
    TimedOut,
    Cancelled,
}

impl RoundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundState::Idle => "idle",
            RoundState::Fetching => "fetching",
            RoundState::AwaitingAnswer => "awaiting_answer",
            RoundState::Evaluating => "evaluating",
            RoundState::TimedOut => "timed_out",
            RoundState::Cancelled => "cancelled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, RoundState::TimedOut | RoundState::Cancelled)
    }
}

/// Lifecycle events for the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    RoundReady { round: u64, challenge: RoundChallenge },
    Tick { remaining: u32 },
    Answered { correct: bool, correct_value: u32, score: u32 },
    GameOver { final_score: u32, difficulty: Difficulty },
    ConnectionFailed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{op} is not allowed while the round is {}", .state.as_str())]
    OrderingViolation { op: &'static str, state: RoundState },

    #[error("round engine has stopped")]
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub correct_value: u32,
    pub score: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub state: RoundState,
    pub round: u64,
    pub score: u32,
    pub difficulty: Difficulty,
    pub remaining: u32,
    pub timer_armed: bool,
    pub paused: bool,
}

/// Per-session inputs that are not collaborators.
pub struct EngineSettings {
    pub difficulty: Difficulty,
    pub player: String,
    pub option_range_max: u32,
    pub rng: StdRng,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum Command {
    NewSession { difficulty: Difficulty, reply: Reply<()> },
    StartRound { reply: Reply<()> },
    Submit { value: u32, reply: Reply<AnswerOutcome> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    Cancel { reply: Reply<()> },
    Snapshot { reply: oneshot::Sender<Snapshot> },
}

struct FetchDone {
    round: u64,
    result: Result<Question, FetchError>,
}

/// Cloneable front door to a running engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Reset score and state for a fresh session at `difficulty`.
    pub async fn new_session(&self, difficulty: Difficulty) -> Result<(), EngineError> {
        self.call(|reply| Command::NewSession { difficulty, reply }).await
    }

    pub async fn start_round(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::StartRound { reply }).await
    }

    pub async fn submit_answer(&self, value: u32) -> Result<AnswerOutcome, EngineError> {
        self.call(|reply| Command::Submit { value, reply }).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::Resume { reply }).await
    }

    pub async fn cancel(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::Cancel { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { reply }).await.map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }
}

pub struct RoundEngine {
    state: RoundState,
    profile: DifficultyProfile,
    ledger: ScoreLedger,
    timer: CountdownTimer,
    clock_started: bool,
    held: bool,
    round: u64,
    challenge: Option<RoundChallenge>,
    in_flight: Option<JoinHandle<()>>,

    player: String,
    option_range_max: u32,
    rng: StdRng,

    fetcher: Arc<dyn RoundFetcher>,
    sink: Arc<dyn ScoreSink>,
    events: mpsc::UnboundedSender<EngineEvent>,
    fetch_tx: mpsc::UnboundedSender<FetchDone>,
    fetch_rx: mpsc::UnboundedReceiver<FetchDone>,
}

impl RoundEngine {
    pub fn new(
        settings: EngineSettings,
        fetcher: Arc<dyn RoundFetcher>,
        sink: Arc<dyn ScoreSink>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            state: RoundState::Idle,
            profile: profile_for(settings.difficulty),
            ledger: ScoreLedger::new(),
            timer: CountdownTimer::new(),
            clock_started: false,
            held: false,
            round: 0,
            challenge: None,
            in_flight: None,
            player: settings.player,
            option_range_max: settings.option_range_max,
            rng: settings.rng,
            fetcher,
            sink,
            events,
            fetch_tx,
            fetch_rx,
        }
    }

    /// Start the engine task. The task ends once every handle is dropped.
    pub fn spawn(
        settings: EngineSettings,
        fetcher: Arc<dyn RoundFetcher>,
        sink: Arc<dyn ScoreSink>,
    ) -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, inbox) = mpsc::channel(COMMAND_QUEUE);
        let engine = Self::new(settings, fetcher, sink, events_tx);
        tokio::spawn(engine.run(inbox));
        (EngineHandle { tx }, events_rx)
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        info!(target: "round", player = %self.player, difficulty = %self.profile.id, "Round engine started");
        loop {
            tokio::select! {
                cmd = inbox.recv() => match cmd {
                    Some(cmd) => self.dispatch(cmd),
                    None => break,
                },
                Some(done) = self.fetch_rx.recv() => self.on_fetch(done),
                signal = self.timer.next_signal() => self.on_timer(signal),
            }
        }
        self.abort_fetch();
        self.timer.cancel();
        info!(target: "round", player = %self.player, score = self.ledger.value(), "Round engine stopped");
    }

    fn dispatch(&mut self, cmd: Command) {
        // A dropped reply receiver only means the caller stopped waiting.
        match cmd {
            Command::NewSession { difficulty, reply } => { let _ = reply.send(self.new_session(difficulty)); }
            Command::StartRound { reply } => { let _ = reply.send(self.start_round()); }
            Command::Submit { value, reply } => { let _ = reply.send(self.submit_answer(value)); }
            Command::Pause { reply } => { let _ = reply.send(self.pause()); }
            Command::Resume { reply } => { let _ = reply.send(self.resume()); }
            Command::Cancel { reply } => { let _ = reply.send(self.cancel()); }
            Command::Snapshot { reply } => { let _ = reply.send(self.snapshot()); }
        }
    }

    fn violation(&self, op: &'static str) -> EngineError {
        error!(target: "round", op, state = self.state.as_str(), round = self.round, "Ordering violation");
        EngineError::OrderingViolation { op, state: self.state }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!(target: "round", "No event subscriber; event dropped");
        }
    }

    fn abort_fetch(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }

    #[instrument(level = "info", skip(self), fields(player = %self.player))]
    fn new_session(&mut self, difficulty: Difficulty) -> Result<(), EngineError> {
        if !(self.state == RoundState::Idle || self.state.is_terminal()) {
            return Err(self.violation("new_session"));
        }
        self.profile = profile_for(difficulty);
        self.ledger.reset();
        self.timer.cancel();
        self.clock_started = false;
        self.held = false;
        self.challenge = None;
        self.state = RoundState::Idle;
        info!(target: "round", %difficulty, timer = self.profile.timer_seconds, points = self.profile.points_per_correct, "New session");
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(round = self.round + 1))]
    fn start_round(&mut self) -> Result<(), EngineError> {
        if self.state != RoundState::Idle {
            return Err(self.violation("start_round"));
        }
        self.round += 1;
        self.state = RoundState::Fetching;

        let round = self.round;
        let fetcher = Arc::clone(&self.fetcher);
        let done = self.fetch_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = fetcher.fetch().await;
            let _ = done.send(FetchDone { round, result });
        }));
        debug!(target: "round", round, "Fetching question");
        Ok(())
    }

    fn on_fetch(&mut self, done: FetchDone) {
        if self.state != RoundState::Fetching || done.round != self.round {
            debug!(
                target: "round",
                round = done.round,
                current = self.round,
                state = self.state.as_str(),
                ok = done.result.is_ok(),
                "Discarding stale fetch result"
            );
            return;
        }
        self.in_flight = None;

        match done.result {
            Ok(_) if self.out_of_time() => self.game_over(),
            Ok(question) => {
                let challenge = self.build_challenge(question);
                if self.clock_started {
                    self.timer.resume();
                } else {
                    self.timer.arm(self.profile.timer_seconds);
                    self.clock_started = true;
                }
                self.state = RoundState::AwaitingAnswer;
                info!(
                    target: "round",
                    round = self.round,
                    metric = ?challenge.metric,
                    options = ?challenge.options,
                    remaining = self.timer.remaining(),
                    "Round ready"
                );
                self.challenge = Some(challenge.clone());
                self.emit(EngineEvent::RoundReady { round: self.round, challenge });
            }
            Err(e) => {
                self.timer.cancel();
                self.state = RoundState::Cancelled;
                warn!(target: "round", round = self.round, error = %e, "Question fetch failed; round abandoned");
                self.emit(EngineEvent::ConnectionFailed { reason: e.to_string() });
            }
        }
    }

    fn build_challenge(&mut self, q: Question) -> RoundChallenge {
        let metric = if self.rng.gen_bool(0.5) { Metric::Hearts } else { Metric::Carrots };
        let correct_value = metric.value_in(&q);
        let options = answers::generate(correct_value, self.option_range_max, &mut self.rng);
        RoundChallenge { image_ref: q.image_ref, metric, correct_value, options }
    }

    #[instrument(level = "debug", skip(self), fields(round = self.round))]
    fn submit_answer(&mut self, value: u32) -> Result<AnswerOutcome, EngineError> {
        if self.state != RoundState::AwaitingAnswer || self.held {
            return Err(self.violation("submit_answer"));
        }
        if self.out_of_time() {
            self.game_over();
            return Err(self.violation("submit_answer"));
        }
        let Some(challenge) = self.challenge.take() else {
            return Err(self.violation("submit_answer"));
        };
        self.timer.pause();
        self.state = RoundState::Evaluating;

        let correct = value == challenge.correct_value;
        let score = self.ledger.record(correct, &self.profile);
        info!(
            target: "round",
            round = self.round,
            value,
            expected = challenge.correct_value,
            correct,
            score,
            "Answer evaluated"
        );
        self.emit(EngineEvent::Answered { correct, correct_value: challenge.correct_value, score });

        self.state = RoundState::Idle;
        Ok(AnswerOutcome { correct, correct_value: challenge.correct_value, score })
    }

    fn on_timer(&mut self, signal: TimerSignal) {
        if self.state != RoundState::AwaitingAnswer {
            debug!(target: "round", ?signal, state = self.state.as_str(), "Ignoring timer signal outside a round");
            return;
        }
        match signal {
            TimerSignal::Tick { remaining } => {
                self.emit(EngineEvent::Tick { remaining });
                if remaining == 0 {
                    self.game_over();
                }
            }
            TimerSignal::Expired => self.game_over(),
        }
    }

    fn out_of_time(&self) -> bool {
        self.clock_started && self.timer.remaining() == 0
    }

    fn game_over(&mut self) {
        self.timer.cancel();
        self.state = RoundState::TimedOut;
        self.challenge = None;
        self.held = false;
        let final_score = self.ledger.value();
        let difficulty = self.profile.id;
        info!(target: "round", round = self.round, final_score, %difficulty, "Time is up; session over");
        self.emit(EngineEvent::GameOver { final_score, difficulty });

        let sink = Arc::clone(&self.sink);
        let player = self.player.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.save_score(&player, final_score, difficulty).await {
                error!(target: "scores", %player, final_score, error = %e, "Failed to persist final score");
            }
        });
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        if self.state != RoundState::AwaitingAnswer {
            return Err(self.violation("pause"));
        }
        if !self.held {
            self.timer.pause();
            self.held = true;
            debug!(target: "round", remaining = self.timer.remaining(), "Countdown held");
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        if self.state != RoundState::AwaitingAnswer {
            return Err(self.violation("resume"));
        }
        if self.held {
            self.timer.resume();
            self.held = false;
            debug!(target: "round", remaining = self.timer.remaining(), "Countdown resumed");
        }
        Ok(())
    }

    #[instrument(level = "info", skip(self), fields(round = self.round, state = self.state.as_str()))]
    fn cancel(&mut self) -> Result<(), EngineError> {
        match self.state {
            RoundState::Fetching | RoundState::AwaitingAnswer => {
                self.abort_fetch();
                // Held, not reset: the next question resumes the same budget.
                self.timer.pause();
                self.held = false;
                self.challenge = None;
                self.state = RoundState::Idle;
                info!(target: "round", round = self.round, score = self.ledger.value(), "Round cancelled");
            }
            _ => debug!(target: "round", "Nothing in flight to cancel"),
        }
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            round: self.round,
            score: self.ledger.value(),
            difficulty: self.profile.id,
            remaining: if self.clock_started { self.timer.remaining() } else { self.profile.timer_seconds },
            timer_armed: self.timer.is_armed(),
            paused: self.held,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::ScoreSinkError;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use std::{collections::VecDeque, sync::Mutex, time::Duration};
    use tokio::{sync::Notify, time::timeout};

    fn q(hearts: u32, carrots: u32) -> Question {
        Question { image_ref: format!("https://img/{hearts}-{carrots}.png"), hearts, carrots }
    }

    /// Hands out scripted results in order, optionally after a delay.
    struct Scripted {
        results: Mutex<VecDeque<Result<Question, FetchError>>>,
        delay: Duration,
    }

    impl Scripted {
        fn new(results: Vec<Result<Question, FetchError>>) -> Arc<Self> {
            Arc::new(Self { results: Mutex::new(results.into()), delay: Duration::ZERO })
        }

        fn slow(results: Vec<Result<Question, FetchError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self { results: Mutex::new(results.into()), delay })
        }
    }

    #[async_trait]
    impl RoundFetcher for Scripted {
        async fn fetch(&self) -> Result<Question, FetchError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.results
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".into())))
        }
    }

    /// The first call signals `entered` and then waits on `gate`; later calls return `then`.
    struct Gated {
        entered: Notify,
        gate: Notify,
        calls: Mutex<u32>,
        then: Question,
    }

    #[async_trait]
    impl RoundFetcher for Gated {
        async fn fetch(&self) -> Result<Question, FetchError> {
            let first = {
                let mut calls = self.calls.lock().expect("lock");
                *calls += 1;
                *calls == 1
            };
            if first {
                self.entered.notify_one();
                self.gate.notified().await;
                return Ok(q(13, 13));
            }
            Ok(self.then.clone())
        }
    }

    #[derive(Default)]
    struct Recorder {
        saved: Mutex<Vec<(String, u32, Difficulty)>>,
    }

    #[async_trait]
    impl ScoreSink for Recorder {
        async fn save_score(&self, player: &str, score: u32, difficulty: Difficulty) -> Result<(), ScoreSinkError> {
            self.saved.lock().expect("lock").push((player.to_string(), score, difficulty));
            Ok(())
        }
    }

    fn settings(difficulty: Difficulty) -> EngineSettings {
        EngineSettings {
            difficulty,
            player: "tester".into(),
            option_range_max: answers::DEFAULT_RANGE_MAX,
            rng: StdRng::seed_from_u64(11),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> EngineEvent {
        timeout(Duration::from_secs(600), rx.recv()).await.expect("event in time").expect("engine alive")
    }

    async fn next_non_tick(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> EngineEvent {
        loop {
            match next_event(rx).await {
                EngineEvent::Tick { .. } => continue,
                other => return other,
            }
        }
    }

    async fn ready(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> RoundChallenge {
        match next_non_tick(rx).await {
            EngineEvent::RoundReady { challenge, .. } => challenge,
            other => panic!("expected round_ready, got {other:?}"),
        }
    }

    fn wrong_option(c: &RoundChallenge) -> u32 {
        *c.options.iter().find(|v| **v != c.correct_value).expect("distractor")
    }

    #[tokio::test(start_paused = true)]
    async fn medium_scoring_with_penalty_floor() {
        let fetcher = Scripted::new(vec![Ok(q(4, 4)), Ok(q(6, 6)), Ok(q(2, 2))]);
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Medium), fetcher, Arc::new(Recorder::default()));

        engine.start_round().await.expect("start");
        let c = ready(&mut rx).await;
        assert_eq!(c.correct_value, 4);
        let out = engine.submit_answer(c.correct_value).await.expect("submit");
        assert_eq!(out, AnswerOutcome { correct: true, correct_value: 4, score: 3 });
        assert_eq!(
            next_non_tick(&mut rx).await,
            EngineEvent::Answered { correct: true, correct_value: 4, score: 3 }
        );

        engine.start_round().await.expect("start");
        let c = ready(&mut rx).await;
        let out = engine.submit_answer(wrong_option(&c)).await.expect("submit");
        assert!(!out.correct);
        assert_eq!(out.correct_value, 6);
        assert_eq!(out.score, 2);
        assert_eq!(
            next_non_tick(&mut rx).await,
            EngineEvent::Answered { correct: false, correct_value: 6, score: 2 }
        );

        engine.new_session(Difficulty::Medium).await.expect("reset");
        assert_eq!(engine.snapshot().await.expect("snap").score, 0);
        engine.start_round().await.expect("start");
        let c = ready(&mut rx).await;
        let out = engine.submit_answer(wrong_option(&c)).await.expect("submit");
        assert_eq!(out.score, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_round_while_awaiting_answer_is_rejected() {
        let fetcher = Scripted::new(vec![Ok(q(3, 5))]);
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Easy), fetcher, Arc::new(Recorder::default()));
        engine.start_round().await.expect("start");
        ready(&mut rx).await;

        let before = engine.snapshot().await.expect("snap");
        let err = engine.start_round().await.expect_err("must be rejected");
        assert_eq!(err, EngineError::OrderingViolation { op: "start_round", state: RoundState::AwaitingAnswer });
        let after = engine.snapshot().await.expect("snap");
        assert_eq!(after.state, RoundState::AwaitingAnswer);
        assert_eq!(after.score, before.score);
        assert_eq!(after.round, before.round);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_cancels_without_arming_the_timer() {
        let fetcher = Scripted::new(vec![Err(FetchError::Status(500))]);
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Hard), fetcher, Arc::new(Recorder::default()));
        engine.start_round().await.expect("start");

        match next_event(&mut rx).await {
            EngineEvent::ConnectionFailed { reason } => assert!(reason.contains("500"), "{reason}"),
            other => panic!("expected connection_failed, got {other:?}"),
        }
        let snap = engine.snapshot().await.expect("snap");
        assert_eq!(snap.state, RoundState::Cancelled);
        assert!(!snap.timer_armed);
        assert_eq!(snap.score, 0);

        assert!(matches!(
            engine.start_round().await,
            Err(EngineError::OrderingViolation { op: "start_round", state: RoundState::Cancelled })
        ));
        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err(), "no ticks after failure");
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_ends_session_and_persists_score() {
        let fetcher = Scripted::new(vec![Ok(q(1, 1))]);
        let sink = Arc::new(Recorder::default());
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Hard), fetcher, sink.clone());
        engine.start_round().await.expect("start");
        ready(&mut rx).await;

        let mut ticks = Vec::new();
        let over = loop {
            match next_event(&mut rx).await {
                EngineEvent::Tick { remaining } => ticks.push(remaining),
                other => break other,
            }
        };
        assert_eq!(ticks, (0..20).rev().collect::<Vec<u32>>());
        assert_eq!(over, EngineEvent::GameOver { final_score: 0, difficulty: Difficulty::Hard });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*sink.saved.lock().expect("lock"), vec![("tester".to_string(), 0, Difficulty::Hard)]);
        assert_eq!(engine.snapshot().await.expect("snap").state, RoundState::TimedOut);
        assert!(engine.submit_answer(1).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_latency_does_not_consume_the_budget() {
        let fetcher = Scripted::slow(vec![Ok(q(2, 2)), Ok(q(3, 3))], Duration::from_secs(25));
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Hard), fetcher, Arc::new(Recorder::default()));

        engine.start_round().await.expect("start");
        let c = ready(&mut rx).await;
        assert_eq!(engine.snapshot().await.expect("snap").remaining, 20);

        for expected in [19, 18, 17] {
            assert_eq!(next_event(&mut rx).await, EngineEvent::Tick { remaining: expected });
        }
        engine.submit_answer(c.correct_value).await.expect("submit");
        next_non_tick(&mut rx).await;

        engine.start_round().await.expect("start");
        ready(&mut rx).await;
        let snap = engine.snapshot().await.expect("snap");
        assert_eq!(snap.remaining, 17, "budget carries across rounds, fetch time excluded");
        assert_eq!(snap.score, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fetch_resolves_never_yields_round_ready() {
        let fetcher = Arc::new(Gated { entered: Notify::new(), gate: Notify::new(), calls: Mutex::new(0), then: q(8, 2) });
        let (engine, mut rx) = RoundEngine::spawn(
            settings(Difficulty::Medium),
            fetcher.clone(),
            Arc::new(Recorder::default()),
        );

        engine.start_round().await.expect("start");
        fetcher.entered.notified().await;
        engine.cancel().await.expect("cancel");
        fetcher.gate.notify_waiters();

        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err(), "cancelled round stays silent");
        let snap = engine.snapshot().await.expect("snap");
        assert_eq!(snap.state, RoundState::Idle);
        assert_eq!(snap.score, 0);
        assert!(!snap.timer_armed);

        engine.start_round().await.expect("next round");
        let c = ready(&mut rx).await;
        assert_eq!(c.image_ref, q(8, 2).image_ref);
    }

    #[tokio::test]
    async fn stale_fetch_result_is_dropped_by_round_number() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut engine = RoundEngine::new(
            settings(Difficulty::Easy),
            Scripted::new(vec![]),
            Arc::new(Recorder::default()),
            events_tx,
        );

        engine.start_round().expect("round 1");
        engine.cancel().expect("cancel");
        engine.start_round().expect("round 2");
        assert_eq!(engine.round, 2);

        engine.on_fetch(FetchDone { round: 1, result: Ok(q(9, 9)) });
        assert_eq!(engine.state, RoundState::Fetching);
        assert!(engine.challenge.is_none());
        assert!(events_rx.try_recv().is_err());

        engine.on_fetch(FetchDone { round: 2, result: Ok(q(4, 4)) });
        assert_eq!(engine.state, RoundState::AwaitingAnswer);
        assert!(matches!(events_rx.try_recv(), Ok(EngineEvent::RoundReady { round: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_the_clock_and_blocks_answers() {
        let fetcher = Scripted::new(vec![Ok(q(5, 5))]);
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Easy), fetcher, Arc::new(Recorder::default()));
        engine.start_round().await.expect("start");
        let c = ready(&mut rx).await;
        assert_eq!(next_event(&mut rx).await, EngineEvent::Tick { remaining: 44 });

        engine.pause().await.expect("pause");
        assert!(matches!(
            engine.submit_answer(c.correct_value).await,
            Err(EngineError::OrderingViolation { op: "submit_answer", .. })
        ));
        assert!(timeout(Duration::from_secs(120), rx.recv()).await.is_err(), "no ticks while held");
        let snap = engine.snapshot().await.expect("snap");
        assert!(snap.paused);
        assert_eq!(snap.remaining, 44);

        engine.resume().await.expect("resume");
        assert_eq!(next_event(&mut rx).await, EngineEvent::Tick { remaining: 43 });
        let out = engine.submit_answer(c.correct_value).await.expect("submit");
        assert_eq!(out.score, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_awaiting_answer_silences_timer() {
        let fetcher = Scripted::new(vec![Ok(q(7, 0))]);
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Hard), fetcher, Arc::new(Recorder::default()));
        engine.start_round().await.expect("start");
        ready(&mut rx).await;

        engine.cancel().await.expect("cancel");
        engine.cancel().await.expect("idempotent");
        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err());
        assert_eq!(engine.snapshot().await.expect("snap").state, RoundState::Idle);
        assert!(engine.submit_answer(7).await.is_err());
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn tick_reaching_zero_ends_the_session_at_once() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut engine = RoundEngine::new(
            settings(Difficulty::Hard),
            Scripted::new(vec![]),
            Arc::new(Recorder::default()),
            events_tx,
        );
        engine.start_round().expect("start");
        engine.on_fetch(FetchDone { round: 1, result: Ok(q(4, 4)) });

        let mut last = None;
        while engine.state == RoundState::AwaitingAnswer {
            let signal = engine.timer.next_signal().await;
            last = Some(signal);
            engine.on_timer(signal);
        }
        assert_eq!(last, Some(TimerSignal::Tick { remaining: 0 }));
        assert_eq!(engine.state, RoundState::TimedOut);

        let events = drain(&mut events_rx);
        assert!(matches!(events.first(), Some(EngineEvent::RoundReady { round: 1, .. })));
        assert_eq!(
            &events[events.len() - 2..],
            &[EngineEvent::Tick { remaining: 0 }, EngineEvent::GameOver { final_score: 0, difficulty: Difficulty::Hard }]
        );

        // A queued answer or round request after zero changes nothing.
        assert!(engine.submit_answer(4).is_err());
        assert!(engine.start_round().is_err());
        assert_eq!(engine.ledger.value(), 0);
        assert!(timeout(Duration::from_secs(60), engine.timer.next_signal()).await.is_err(), "no expiry after game over");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_clock_never_scores_or_starts_another_round() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut engine = RoundEngine::new(
            settings(Difficulty::Medium),
            Scripted::new(vec![]),
            Arc::new(Recorder::default()),
            events_tx,
        );
        engine.start_round().expect("round 1");
        engine.on_fetch(FetchDone { round: 1, result: Ok(q(6, 6)) });
        engine.submit_answer(6).expect("answer");
        assert_eq!(engine.ledger.value(), 3);

        // Clock runs dry while the next question is still on its way.
        engine.start_round().expect("round 2");
        engine.timer.arm(1);
        assert_eq!(engine.timer.next_signal().await, TimerSignal::Tick { remaining: 0 });
        engine.timer.pause();
        drain(&mut events_rx);

        engine.on_fetch(FetchDone { round: 2, result: Ok(q(2, 2)) });
        assert_eq!(engine.state, RoundState::TimedOut);
        assert!(engine.challenge.is_none());
        assert_eq!(
            drain(&mut events_rx),
            vec![EngineEvent::GameOver { final_score: 3, difficulty: Difficulty::Medium }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn answer_on_an_exhausted_clock_is_refused() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut engine = RoundEngine::new(
            settings(Difficulty::Hard),
            Scripted::new(vec![]),
            Arc::new(Recorder::default()),
            events_tx,
        );
        engine.start_round().expect("start");
        engine.on_fetch(FetchDone { round: 1, result: Ok(q(5, 5)) });
        engine.timer.arm(1);
        assert_eq!(engine.timer.next_signal().await, TimerSignal::Tick { remaining: 0 });
        drain(&mut events_rx);

        assert!(matches!(
            engine.submit_answer(5),
            Err(EngineError::OrderingViolation { op: "submit_answer", state: RoundState::TimedOut })
        ));
        assert_eq!(engine.ledger.value(), 0);
        assert_eq!(
            drain(&mut events_rx),
            vec![EngineEvent::GameOver { final_score: 0, difficulty: Difficulty::Hard }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_then_restart_keeps_the_remaining_budget() {
        let fetcher = Scripted::new(vec![Ok(q(2, 2)), Ok(q(3, 3))]);
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Hard), fetcher, Arc::new(Recorder::default()));
        engine.start_round().await.expect("start");
        let c = ready(&mut rx).await;
        for expected in [19, 18, 17] {
            assert_eq!(next_event(&mut rx).await, EngineEvent::Tick { remaining: expected });
        }
        engine.submit_answer(c.correct_value).await.expect("submit");
        next_non_tick(&mut rx).await;
        engine.start_round().await.expect("round 2");
        ready(&mut rx).await;

        engine.cancel().await.expect("cancel");
        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err(), "clock held after cancel");
        let snap = engine.snapshot().await.expect("snap");
        assert_eq!((snap.state, snap.score, snap.remaining), (RoundState::Idle, 5, 17));

        engine.start_round().await.expect("restart");
        ready(&mut rx).await;
        let snap = engine.snapshot().await.expect("snap");
        assert_eq!((snap.score, snap.remaining), (5, 17));
        assert_eq!(next_event(&mut rx).await, EngineEvent::Tick { remaining: 16 });
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_mid_session_keeps_score_and_stays_silent() {
        let fetcher = Scripted::new(vec![Ok(q(4, 4)), Err(FetchError::Status(502))]);
        let (engine, mut rx) = RoundEngine::spawn(settings(Difficulty::Medium), fetcher, Arc::new(Recorder::default()));
        engine.start_round().await.expect("start");
        let c = ready(&mut rx).await;
        assert_eq!(next_event(&mut rx).await, EngineEvent::Tick { remaining: 29 });
        engine.submit_answer(c.correct_value).await.expect("submit");
        assert_eq!(
            next_event(&mut rx).await,
            EngineEvent::Answered { correct: true, correct_value: 4, score: 3 }
        );

        engine.start_round().await.expect("round 2");
        match next_event(&mut rx).await {
            EngineEvent::ConnectionFailed { reason } => assert!(reason.contains("502"), "{reason}"),
            other => panic!("expected connection_failed, got {other:?}"),
        }
        let snap = engine.snapshot().await.expect("snap");
        assert_eq!(snap.state, RoundState::Cancelled);
        assert_eq!(snap.score, 3);
        assert!(!snap.timer_armed);
        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err(), "no ticks after failure");
    }

    #[tokio::test]
    async fn handle_reports_closed_engine() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = EngineHandle { tx };
        assert_eq!(handle.start_round().await, Err(EngineError::Closed));
    }
}

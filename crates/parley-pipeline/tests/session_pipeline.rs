//! End-to-end behavior of the stage chain with scripted services.

use async_trait::async_trait;
use parley_pipeline::{
    ConversationContext, Frame, LanguageModel, Pipeline, PipelineError, SessionTask,
    SpeechRecognizer, SpeechSynthesizer, TaskOutcome,
};
use parley_transport::Outbound;
use parley_types::{AudioChunk, PipelineParams, Role, ServiceError, Transcript, Turn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records chunk sequences and replies with scripted transcripts.
struct ScriptedRecognizer {
    seen: Arc<Mutex<Vec<u64>>>,
    script: HashMap<u64, &'static str>,
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn recognize(&mut self, chunk: &AudioChunk) -> Result<Vec<Transcript>, ServiceError> {
        self.seen.lock().unwrap().push(chunk.sequence);
        Ok(self
            .script
            .get(&chunk.sequence)
            .map(|text| vec![Transcript::final_text(*text)])
            .unwrap_or_default())
    }
}

enum Reply {
    Deltas(Vec<&'static str>),
    Stall,
    Fail,
}

/// Replays one scripted reply per call and records the turns it saw.
struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Arc<Mutex<Vec<Vec<Turn>>>>,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        turns: &[Turn],
        deltas: mpsc::Sender<String>,
    ) -> Result<(), ServiceError> {
        self.prompts.lock().unwrap().push(turns.to_vec());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Deltas(parts)) => {
                for part in parts {
                    deltas
                        .send(part.to_string())
                        .await
                        .map_err(|_| ServiceError::Failed("receiver gone".into()))?;
                }
                Ok(())
            }
            Some(Reply::Stall) => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Some(Reply::Fail) | None => Err(ServiceError::Unavailable("no reply".into())),
        }
    }
}

/// One 100 ms chunk per sentence, every sample set to the sentence length.
struct MarkerSynthesizer {
    spoken: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SpeechSynthesizer for MarkerSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        sample_rate: u32,
        audio: mpsc::Sender<AudioChunk>,
    ) -> Result<(), ServiceError> {
        self.spoken.lock().unwrap().push(text.to_string());
        let samples = vec![text.len() as i16; (sample_rate / 10) as usize];
        audio
            .send(AudioChunk::from_samples(&samples, sample_rate, 0))
            .await
            .map_err(|_| ServiceError::Failed("receiver gone".into()))
    }
}

struct Session {
    task: SessionTask,
    audio_in: mpsc::Sender<AudioChunk>,
    outbound: mpsc::Receiver<Outbound>,
    context: Arc<ConversationContext>,
    heard: Arc<Mutex<Vec<u64>>>,
    prompts: Arc<Mutex<Vec<Vec<Turn>>>>,
    spoken: Arc<Mutex<Vec<String>>>,
}

fn session(
    script: &[(u64, &'static str)],
    replies: Vec<Reply>,
    params: PipelineParams,
) -> Session {
    let (audio_in, input) = mpsc::channel(64);
    let (output, outbound) = mpsc::channel(256);
    let context = Arc::new(ConversationContext::new("You are a patient teacher."));
    let heard = Arc::new(Mutex::new(Vec::new()));
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let spoken = Arc::new(Mutex::new(Vec::new()));

    let pipeline = Pipeline::builder()
        .transport_input(input)
        .transport_output(output)
        .recognizer(Box::new(ScriptedRecognizer {
            seen: heard.clone(),
            script: script.iter().copied().collect(),
        }))
        .language_model(Arc::new(ScriptedModel {
            replies: Mutex::new(replies.into()),
            prompts: prompts.clone(),
        }))
        .synthesizer(Arc::new(MarkerSynthesizer {
            spoken: spoken.clone(),
        }))
        .context(context.clone())
        .fallback_response("Sorry, could you repeat that?")
        .build()
        .unwrap();

    Session {
        task: SessionTask::new(pipeline, params),
        audio_in,
        outbound,
        context,
        heard,
        prompts,
        spoken,
    }
}

fn unpaced() -> PipelineParams {
    PipelineParams {
        pace_output: false,
        ..PipelineParams::default()
    }
}

fn chunk(sequence: u64) -> AudioChunk {
    AudioChunk::from_samples(&[0; 160], 8000, sequence)
}

fn marker(out: &Outbound) -> Option<i16> {
    match out {
        Outbound::Audio(chunk) => chunk.samples().first().copied(),
        Outbound::Clear => None,
    }
}

#[test]
fn builder_reports_the_missing_stage() {
    let (_tx, rx) = mpsc::channel(1);
    let result = Pipeline::builder().transport_input(rx).build();
    assert!(matches!(result, Err(PipelineError::MissingStage("output"))));
}

#[test]
fn chain_has_the_fixed_stage_order() {
    let (_tx, rx) = mpsc::channel(1);
    let (out_tx, _out_rx) = mpsc::channel(1);
    let pipeline = Pipeline::builder()
        .transport_input(rx)
        .transport_output(out_tx)
        .recognizer(Box::new(ScriptedRecognizer {
            seen: Arc::default(),
            script: HashMap::new(),
        }))
        .language_model(Arc::new(ScriptedModel {
            replies: Mutex::default(),
            prompts: Arc::default(),
        }))
        .synthesizer(Arc::new(MarkerSynthesizer {
            spoken: Arc::default(),
        }))
        .context(Arc::new(ConversationContext::new("sys")))
        .build()
        .unwrap();
    assert_eq!(
        pipeline.stage_names(),
        vec![
            "input",
            "recognizer",
            "user_aggregator",
            "llm",
            "synthesizer",
            "output",
            "assistant_aggregator",
        ]
    );
}

#[tokio::test]
async fn caller_audio_reaches_the_recognizer_in_order() {
    let s = session(&[], vec![], unpaced());
    for sequence in 0..20 {
        s.audio_in.send(chunk(sequence)).await.unwrap();
    }
    drop(s.audio_in);

    assert_eq!(s.task.run().await, TaskOutcome::Completed);
    assert_eq!(*s.heard.lock().unwrap(), (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn a_user_turn_produces_a_spoken_assistant_turn() {
    let mut s = session(
        &[(0, "hello")],
        vec![Reply::Deltas(vec!["Hi there", ". How can I ", "help?"])],
        unpaced(),
    );
    s.audio_in.send(chunk(0)).await.unwrap();
    drop(s.audio_in);

    assert_eq!(s.task.run().await, TaskOutcome::Completed);

    assert_eq!(
        s.context.snapshot(),
        vec![
            Turn::system("You are a patient teacher."),
            Turn::user("hello"),
            Turn::assistant("Hi there. How can I help?"),
        ]
    );
    assert_eq!(
        *s.spoken.lock().unwrap(),
        vec!["Hi there.".to_string(), "How can I help?".to_string()]
    );
    let mut audio = 0;
    while let Ok(out) = s.outbound.try_recv() {
        assert!(matches!(out, Outbound::Audio(_)));
        audio += 1;
    }
    assert_eq!(audio, 2);
}

#[tokio::test]
async fn enqueued_context_update_prompts_a_greeting() {
    let s = session(&[], vec![Reply::Deltas(vec!["Welcome!"])], unpaced());
    s.context.append(Role::System, "Introduce yourself.");
    s.task.enqueue(Frame::ContextUpdated).await.unwrap();
    drop(s.audio_in);

    assert_eq!(s.task.run().await, TaskOutcome::Completed);
    let prompts = s.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].last(), Some(&Turn::system("Introduce yourself.")));
    assert_eq!(
        s.context.snapshot().last(),
        Some(&Turn::assistant("Welcome!"))
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_model_times_out_into_the_fallback_line() {
    let params = PipelineParams {
        service_timeout: Duration::from_millis(200),
        ..unpaced()
    };
    let s = session(&[(0, "are you there")], vec![Reply::Stall], params);
    s.audio_in.send(chunk(0)).await.unwrap();
    drop(s.audio_in);

    assert_eq!(s.task.run().await, TaskOutcome::Completed);
    assert_eq!(
        s.context.snapshot().last(),
        Some(&Turn::assistant("Sorry, could you repeat that?"))
    );
}

#[tokio::test]
async fn failed_model_falls_back_and_the_session_continues() {
    let s = session(
        &[(0, "first"), (1, "second")],
        vec![Reply::Fail, Reply::Deltas(vec!["Second answer."])],
        PipelineParams {
            allow_interruptions: false,
            ..unpaced()
        },
    );
    s.audio_in.send(chunk(0)).await.unwrap();
    s.audio_in.send(chunk(1)).await.unwrap();
    drop(s.audio_in);

    assert_eq!(s.task.run().await, TaskOutcome::Completed);
    let roles: Vec<Role> = s.context.snapshot().iter().map(|t| t.role).collect();
    assert_eq!(roles[0], Role::System);
    for pair in roles[1..].windows(2) {
        assert_ne!(pair[0], pair[1], "turns must alternate: {roles:?}");
    }
    assert!(s
        .spoken
        .lock()
        .unwrap()
        .contains(&"Sorry, could you repeat that?".to_string()));
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let s = session(&[], vec![], unpaced());
    let handle = s.task.handle();

    s.task.cancel();
    s.task.cancel();
    handle.cancel();

    assert!(handle.is_cancelled());
    assert_eq!(
        handle.enqueue(Frame::ContextUpdated).await,
        Err(PipelineError::Closed)
    );
    assert_eq!(s.task.run().await, TaskOutcome::Cancelled);
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn interruption_discards_the_stale_turn() {
    let mut s = session(
        &[(0, "tell me about planets"), (1, "stop please")],
        vec![
            Reply::Deltas(vec![
                "Alpha one. ",
                "Bravo two. ",
                "Charlie three. ",
                "Delta four.",
            ]),
            Reply::Deltas(vec!["Understood, stopping now."]),
        ],
        PipelineParams::default(),
    );
    let tracker = s.task.tracker().clone();
    let running = tokio::spawn(s.task.run());

    s.audio_in.send(chunk(0)).await.unwrap();
    let first = s.outbound.recv().await.unwrap();
    assert_eq!(marker(&first), Some("Alpha one.".len() as i16));

    s.audio_in.send(chunk(1)).await.unwrap();

    let reply_marker = "Understood, stopping now.".len() as i16;
    let mut after_first = Vec::new();
    loop {
        let out = s.outbound.recv().await.unwrap();
        let done = marker(&out) == Some(reply_marker);
        after_first.push(out);
        if done {
            break;
        }
    }
    drop(s.audio_in);
    assert_eq!(running.await.unwrap(), TaskOutcome::Completed);

    let clear_at = after_first
        .iter()
        .position(|out| *out == Outbound::Clear)
        .expect("interruption clears provider playback");
    assert_eq!(
        after_first.iter().filter(|out| **out == Outbound::Clear).count(),
        1
    );
    assert!(after_first[clear_at + 1..]
        .iter()
        .all(|out| marker(out) == Some(reply_marker)));
    assert_eq!(tracker.current(), 1);

    let turns = s.context.snapshot();
    let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant,
        ]
    );
    assert!(!turns[2].content.contains("Delta four."));
    assert_eq!(turns[3].content, "stop please");
    assert_eq!(turns[4].content, "Understood, stopping now.");
}

#[tokio::test(start_paused = true)]
async fn speech_during_an_uninterruptible_reply_waits_for_its_turn() {
    let mut s = session(
        &[(0, "first question"), (1, "second question")],
        vec![
            Reply::Deltas(vec!["Alpha one. ", "Bravo two. ", "Charlie three."]),
            Reply::Deltas(vec!["Got it, second one."]),
        ],
        PipelineParams {
            allow_interruptions: false,
            ..PipelineParams::default()
        },
    );
    let tracker = s.task.tracker().clone();
    let running = tokio::spawn(s.task.run());

    s.audio_in.send(chunk(0)).await.unwrap();
    let first = s.outbound.recv().await.unwrap();
    assert_eq!(marker(&first), Some("Alpha one.".len() as i16));

    // The caller talks over the rest of the first reply.
    s.audio_in.send(chunk(1)).await.unwrap();

    let reply_marker = "Got it, second one.".len() as i16;
    let mut rest = Vec::new();
    loop {
        let out = s.outbound.recv().await.unwrap();
        let done = marker(&out) == Some(reply_marker);
        rest.push(out);
        if done {
            break;
        }
    }
    drop(s.audio_in);
    assert_eq!(running.await.unwrap(), TaskOutcome::Completed);

    assert!(!rest.contains(&Outbound::Clear));
    assert_eq!(tracker.current(), 0);
    assert_eq!(
        s.context.snapshot(),
        vec![
            Turn::system("You are a patient teacher."),
            Turn::user("first question"),
            Turn::assistant("Alpha one. Bravo two. Charlie three."),
            Turn::user("second question"),
            Turn::assistant("Got it, second one."),
        ]
    );

    let prompts = s.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert_eq!(
        prompts[1][1..],
        [
            Turn::user("first question"),
            Turn::assistant("Alpha one. Bravo two. Charlie three."),
            Turn::user("second question"),
        ]
    );
}

use parley_types::{AudioChunk, Transcript};

/// Unit of work passed between stages.
///
/// Assistant-side frames carry the [`TurnTracker`](crate::TurnTracker)
/// epoch they were produced in so stale output can be dropped after an
/// interruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Caller audio from the transport.
    InputAudio(AudioChunk),
    /// Recognized caller speech.
    Transcript(Transcript),
    /// The conversation context changed and wants a reply.
    ContextUpdated,
    ResponseStart { epoch: u64 },
    /// A streamed piece of model output.
    ResponseText { epoch: u64, text: String },
    ResponseEnd { epoch: u64 },
    /// Synthesized speech for the caller.
    OutputAudio { epoch: u64, chunk: AudioChunk },
    /// Text whose audio has been handed to the transport.
    SpokenText { epoch: u64, text: String },
    /// Input is exhausted; every stage forwards this and exits.
    End,
}

impl Frame {
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::ResponseStart { epoch }
            | Self::ResponseText { epoch, .. }
            | Self::ResponseEnd { epoch }
            | Self::OutputAudio { epoch, .. }
            | Self::SpokenText { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputAudio(_) => "input_audio",
            Self::Transcript(_) => "transcript",
            Self::ContextUpdated => "context_updated",
            Self::ResponseStart { .. } => "response_start",
            Self::ResponseText { .. } => "response_text",
            Self::ResponseEnd { .. } => "response_end",
            Self::OutputAudio { .. } => "output_audio",
            Self::SpokenText { .. } => "spoken_text",
            Self::End => "end",
        }
    }
}

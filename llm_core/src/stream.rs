//! Wire parsing for streamed chat completions.

use serde::Deserialize;

use crate::LlmProvider;

/// One decoded line of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamLine {
    Token(String),
    Done,
    Skip,
}

#[derive(Deserialize)]
struct OpenAiChunk {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChunk {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

/// OpenAI streams server-sent events (`data: {...}` ... `data: [DONE]`),
/// Ollama streams newline-delimited JSON objects.
pub(crate) fn parse_line(provider: LlmProvider, line: &str) -> anyhow::Result<StreamLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StreamLine::Skip);
    }

    match provider {
        LlmProvider::OpenAI => {
            let Some(data) = line.strip_prefix("data:") else {
                // event:, id:, retry: and comments
                return Ok(StreamLine::Skip);
            };
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(StreamLine::Done);
            }
            let chunk: OpenAiChunk = serde_json::from_str(data)
                .map_err(|e| anyhow::anyhow!("invalid stream chunk: {e}"))?;
            let Some(choice) = chunk.choices.into_iter().next() else {
                return Ok(StreamLine::Skip);
            };
            match choice.delta.content {
                Some(content) if !content.is_empty() => Ok(StreamLine::Token(content)),
                _ if choice.finish_reason.is_some() => Ok(StreamLine::Done),
                _ => Ok(StreamLine::Skip),
            }
        }
        LlmProvider::Ollama => {
            let chunk: OllamaChunk = serde_json::from_str(line)
                .map_err(|e| anyhow::anyhow!("invalid stream chunk: {e}"))?;
            if let Some(error) = chunk.error {
                return Err(anyhow::anyhow!("ollama error: {error}"));
            }
            let token = chunk.message.map(|m| m.content).unwrap_or_default();
            match (token.is_empty(), chunk.done) {
                (false, _) => Ok(StreamLine::Token(token)),
                (true, true) => Ok(StreamLine::Done),
                (true, false) => Ok(StreamLine::Skip),
            }
        }
    }
}

/// Splits a byte stream into complete lines; UTF-8 sequences split across
/// network chunks are kept until the line is complete.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        Some(line)
    }
}

/// Cuts generation at the first stop sequence (anti-prompt), holding back
/// text that could be the start of one until it is decided.
#[derive(Debug, Clone)]
pub struct StopSequenceFilter {
    stops: Vec<String>,
    held: String,
    stopped: bool,
}

impl StopSequenceFilter {
    pub fn new(stops: Vec<String>) -> Self {
        Self {
            stops: stops.into_iter().filter(|s| !s.is_empty()).collect(),
            held: String::new(),
            stopped: false,
        }
    }

    /// Returns the text safe to emit and whether a stop sequence was hit.
    pub fn push(&mut self, token: &str) -> (String, bool) {
        if self.stopped {
            return (String::new(), true);
        }
        self.held.push_str(token);

        let earliest = self.stops.iter().filter_map(|s| self.held.find(s.as_str())).min();
        if let Some(pos) = earliest {
            self.held.truncate(pos);
            self.stopped = true;
            return (std::mem::take(&mut self.held), true);
        }

        let keep = self.partial_match_len();
        let emit_len = self.held.len() - keep;
        let rest = self.held.split_off(emit_len);
        (std::mem::replace(&mut self.held, rest), false)
    }

    /// Flush held-back text at the end of the stream.
    pub fn finish(&mut self) -> String {
        if self.stopped {
            return String::new();
        }
        std::mem::take(&mut self.held)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Longest suffix of the held text that is a proper prefix of a stop.
    fn partial_match_len(&self) -> usize {
        self.stops
            .iter()
            .flat_map(|stop| stop.char_indices().skip(1).map(move |(i, _)| &stop[..i]))
            .filter(|prefix| self.held.ends_with(prefix))
            .map(|prefix| prefix.len())
            .max()
            .unwrap_or(0)
    }
}

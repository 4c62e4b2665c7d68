//! Engine output translation
//!
//! The engine has no status channel; its readiness and failures are only
//! visible in the text it prints. Every substring rule lives in this one
//! table so the supervisor never looks at raw output.

use super::engine::OutputStream;

/// Meaningful events recognized in engine output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    /// Playback began
    Started,
    /// Audio capture and processing are live
    Recording,
    /// Unrecoverable failure; carries the offending line
    Fatal(String),
}

struct Rule {
    stream: OutputStream,
    needle: &'static str,
    signal: fn(&str) -> EngineSignal,
}

fn started(_: &str) -> EngineSignal {
    EngineSignal::Started
}

fn recording(_: &str) -> EngineSignal {
    EngineSignal::Recording
}

fn fatal(line: &str) -> EngineSignal {
    EngineSignal::Fatal(line.to_string())
}

const RULES: &[Rule] = &[
    Rule {
        stream: OutputStream::Stdout,
        needle: "Karaoke with Recording started",
        signal: recording,
    },
    Rule {
        stream: OutputStream::Stdout,
        needle: "Starting karaoke",
        signal: started,
    },
    Rule {
        stream: OutputStream::Stderr,
        needle: "not found",
        signal: fatal,
    },
    Rule {
        stream: OutputStream::Stderr,
        needle: "failed",
        signal: fatal,
    },
];

/// Translate one output line; first matching rule wins
pub fn translate(stream: OutputStream, line: &str) -> Option<EngineSignal> {
    let line = line.trim();
    RULES
        .iter()
        .filter(|rule| rule.stream == stream)
        .find(|rule| line.contains(rule.needle))
        .map(|rule| (rule.signal)(line))
}

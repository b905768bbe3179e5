use std::collections::HashMap;

/// Reply used when no keyword matches.
pub const FALLBACK_RESPONSE: &str = "Sorry, I don't understand that.";

const STANDARD_RESPONSES: &[(&str, &str)] = &[
    ("hello", "Hi there! How can I help you today?"),
    ("how are you", "I'm just a bunch of code, but I'm doing great! How about you?"),
    ("bye", "Goodbye! Have a great day!"),
    (
        "help",
        "I can respond to 'hello', 'how are you', 'bye', 'help', 'what's your name?', 'what can you do?', and 'tell me a joke'.",
    ),
    ("what's your name?", "I'm ChatBot, your virtual assistant."),
    ("what can you do?", "I can chat with you and answer simple questions. Ask me anything!"),
    ("tell me a joke", "Why don't scientists trust atoms? Because they make up everything!"),
    (
        "what is the meaning of life?",
        "42. But seriously, it's to find your own purpose and make the most of it!",
    ),
    ("how old are you?", "I was created quite recently, so I'm quite young!"),
    ("who created you?", "I was created by a team of developers at OpenAI."),
    (
        "what's your favorite color?",
        "As a bot, I don't have preferences, but I've heard blue is quite popular!",
    ),
    ("where are you from?", "I'm from the digital world, a place full of codes and algorithms."),
    (
        "what's the weather like?",
        "I can't check the weather right now, but I hope it's nice wherever you are!",
    ),
];

/// Canned keyword replies used by the console client.
/// Immutable once built; lookups take the raw user input.
#[derive(Debug, Clone)]
pub struct ResponseTable {
    entries: HashMap<&'static str, &'static str>,
}

impl ResponseTable {
    /// The built-in keyword set.
    pub fn standard() -> Self {
        Self {
            entries: STANDARD_RESPONSES.iter().copied().collect(),
        }
    }

    /// Reply for `input`, or `None` when no keyword matches.
    pub fn get(&self, input: &str) -> Option<&'static str> {
        self.entries.get(normalize(input).as_str()).copied()
    }

    /// Reply for `input`, falling back to [`FALLBACK_RESPONSE`].
    pub fn lookup(&self, input: &str) -> &'static str {
        self.get(input).unwrap_or(FALLBACK_RESPONSE)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_lowercase()
}

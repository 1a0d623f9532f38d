//! # Routines
//!
//! A routine is a stored trigger set plus a canned response. Every
//! non-command guild message is checked against every routine; each match
//! produces one reply, optionally text-to-speech.
//!
//! Substring matching is case-sensitive containment. Whole-phrase matching
//! is case-insensitive, and a trigger only counts when it stands alone: at
//! the start, end, or interior of the message with whitespace or light
//! punctuation on each side.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serenity::model::id::UserId;

use crate::core::ValidationError;

/// Command words the bot owns. None of them may be used as a trigger,
/// otherwise a stored routine would shadow a command.
pub const RESERVED_TOKENS: &[&str] = &[
    ":addnew:",
    ":remindme:",
    ":help:",
    ":?:",
    ":colors:",
    ":addcolor:",
    ":removecolor:",
    ":setcolor:",
    ":setcolorpermrole:",
    ":setjoinmessage:",
];

pub const USAGE: &str = "Usage: :addnew: <trigger words> <whole phrase: true|false> \
<allowed user ids or none> <text to speech: true|false> <response>";

/// How a trigger is matched against a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Trigger may appear anywhere, even inside another word.
    Substring,
    /// Trigger must stand alone as a phrase.
    WordBoundary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub triggers: Vec<String>,
    pub mode: MatchMode,
    /// Empty set means everyone may fire the routine.
    pub whitelist: BTreeSet<UserId>,
    pub tts: bool,
    pub response: String,
}

impl Routine {
    /// Parses the `:addnew:` command body. The same grammar is used for
    /// the stored record, so load and creation share this path.
    pub fn parse_command(body: &str) -> Result<Routine, ValidationError> {
        let mut tokens = body.split(' ').filter(|t| !t.is_empty()).peekable();
        if tokens.peek() == Some(&":addnew:") {
            tokens.next();
        }

        let mut triggers = Vec::new();
        loop {
            match tokens.peek() {
                Some(&"true") | Some(&"false") => break,
                Some(&token) => {
                    if is_reserved(token) {
                        return Err(ValidationError::new(format!(
                            "\"{token}\" is a command word and can't be used as a trigger"
                        )));
                    }
                    triggers.push(token.to_string());
                    tokens.next();
                }
                None => return Err(ValidationError::new(USAGE)),
            }
        }
        if triggers.is_empty() {
            return Err(ValidationError::new("At least one trigger word is required"));
        }

        let mode = match take_bool(tokens.next())? {
            true => MatchMode::WordBoundary,
            false => MatchMode::Substring,
        };

        let mut whitelist = BTreeSet::new();
        loop {
            match tokens.peek() {
                Some(&"true") | Some(&"false") => break,
                Some(&"none") => {
                    tokens.next();
                }
                Some(&token) => {
                    let id = token.parse::<u64>().map_err(|_| {
                        ValidationError::new(format!("\"{token}\" is not a user id"))
                    })?;
                    whitelist.insert(UserId(id));
                    tokens.next();
                }
                None => return Err(ValidationError::new(USAGE)),
            }
        }

        let tts = take_bool(tokens.next())?;
        let response = tokens.collect::<Vec<_>>().join(" ");
        if response.is_empty() {
            return Err(ValidationError::new("A response is required"));
        }

        Ok(Routine {
            triggers,
            mode,
            whitelist,
            tts,
            response,
        })
    }

    /// Stored-record payload; parseable by [`Routine::parse_command`].
    pub fn encode_command(&self) -> String {
        let mut out = String::from(":addnew:");
        for trigger in &self.triggers {
            write!(out, " {trigger}").ok();
        }
        write!(out, " {}", self.mode == MatchMode::WordBoundary).ok();
        if self.whitelist.is_empty() {
            out.push_str(" none");
        } else {
            for user in &self.whitelist {
                write!(out, " {}", user.0).ok();
            }
        }
        write!(out, " {} {}", self.tts, self.response).ok();
        out
    }

    /// Confirmation text echoed back after a routine is created.
    pub fn summary(&self) -> String {
        format!(
            "Created a routine with triggers [{}] and response \"{}\"",
            self.triggers.join(", "),
            self.response
        )
    }

    /// Whether a message from `sender` fires this routine.
    pub fn matches(&self, message: &str, sender: UserId) -> bool {
        if !self.whitelist.is_empty() && !self.whitelist.contains(&sender) {
            return false;
        }
        self.triggers.iter().any(|t| match self.mode {
            MatchMode::Substring => message.contains(t.as_str()),
            MatchMode::WordBoundary => phrase_exists(message, t),
        })
    }
}

/// Known command words plus anything shaped like one (`:word:`).
fn is_reserved(token: &str) -> bool {
    RESERVED_TOKENS.contains(&token)
        || (token.len() > 2 && token.starts_with(':') && token.ends_with(':'))
}

fn take_bool(token: Option<&str>) -> Result<bool, ValidationError> {
    match token {
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        _ => Err(ValidationError::new(USAGE)),
    }
}

const TRAILERS: [char; 4] = [' ', ',', '.', '!'];

fn at_beginning(message: &str, phrase: &str) -> bool {
    let message = message.to_lowercase();
    let phrase = phrase.to_lowercase();
    match message.strip_prefix(&phrase) {
        Some(rest) => rest.starts_with(&TRAILERS[..]),
        None => false,
    }
}

fn at_middle(message: &str, phrase: &str) -> bool {
    let message = message.to_lowercase();
    let phrase = phrase.to_lowercase();
    for lead in [' ', '\n'] {
        for trail in [' ', ',', '.', '!', '\n'] {
            if message.contains(&format!("{lead}{phrase}{trail}")) {
                return true;
            }
        }
    }
    false
}

fn at_end(message: &str, phrase: &str) -> bool {
    let message = message.to_lowercase();
    let phrase = phrase.to_lowercase();
    message.ends_with(&phrase)
        || message.ends_with(&format!("{phrase}."))
        || message.ends_with(&format!("{phrase}!"))
}

fn phrase_exists(message: &str, phrase: &str) -> bool {
    message.eq_ignore_ascii_case(phrase)
        || at_beginning(message, phrase)
        || at_middle(message, phrase)
        || at_end(message, phrase)
}

//! Interactive questions, answered from the terminal or from an answers file.

use anyhow::{Context, Result};
use console::Term;
use std::collections::VecDeque;
use tracing::debug;

use crate::config::Answers;

/// What a question is asking for, so scripted providers can answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKey {
    /// Use the local image with this file name?
    UseLocalIso(String),
    Hostname,
    Username,
    Password,
    IncludeSshKey,
    SshKeyPath,
}

pub trait InputProvider {
    /// Ask `question` and return the raw answer. An empty answer selects the
    /// default.
    fn ask(&mut self, key: &PromptKey, question: &str) -> Result<String>;

    /// Yes/no question; only `Y` or `y` accepts.
    fn confirm(&mut self, key: &PromptKey, question: &str) -> Result<bool> {
        Ok(is_yes(&self.ask(key, question)?))
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim(), "Y" | "y")
}

/// Reads answers from the controlling terminal.
pub struct ConsolePrompt {
    term: Term,
}

impl ConsolePrompt {
    pub fn new() -> Self {
        Self { term: Term::stderr() }
    }
}

impl Default for ConsolePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl InputProvider for ConsolePrompt {
    fn ask(&mut self, key: &PromptKey, question: &str) -> Result<String> {
        self.term
            .write_str(question)
            .context("Failed to write prompt")?;
        let answer = if *key == PromptKey::Password {
            self.term.read_secure_line()
        } else {
            self.term.read_line()
        }
        .context("Failed to read answer from terminal")?;
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Answers from an answers file, falling back to another provider (or the
/// defaults when there is none) for questions the file leaves open.
pub struct ScriptedPrompt {
    answers: Answers,
    fallback: Option<Box<dyn InputProvider>>,
}

impl ScriptedPrompt {
    pub fn new(answers: Answers) -> Self {
        Self { answers, fallback: None }
    }

    pub fn with_fallback(answers: Answers, fallback: Box<dyn InputProvider>) -> Self {
        Self {
            answers,
            fallback: Some(fallback),
        }
    }

    fn recorded(&self, key: &PromptKey) -> Option<String> {
        let yes_no = |v: bool| if v { "y" } else { "n" }.to_string();
        match key {
            PromptKey::UseLocalIso(_) => self.answers.use_local_iso.map(yes_no),
            PromptKey::Hostname => self.answers.hostname.clone(),
            PromptKey::Username => self.answers.username.clone(),
            PromptKey::Password => self.answers.password.clone(),
            PromptKey::IncludeSshKey => self.answers.include_ssh_key.map(yes_no),
            PromptKey::SshKeyPath => self
                .answers
                .ssh_key_path
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }
}

impl InputProvider for ScriptedPrompt {
    fn ask(&mut self, key: &PromptKey, question: &str) -> Result<String> {
        if let Some(answer) = self.recorded(key) {
            debug!("Answered from file: {:?}", key);
            return Ok(answer);
        }
        match self.fallback.as_mut() {
            Some(fallback) => fallback.ask(key, question),
            None => {
                debug!("No answer for {:?}, using default", key);
                Ok(String::new())
            }
        }
    }
}

/// Replays a fixed sequence of answers; an exhausted queue answers with
/// defaults.
#[derive(Debug, Default)]
pub struct QueuedPrompt {
    answers: VecDeque<String>,
    pub asked: Vec<PromptKey>,
}

impl QueuedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }
}

impl InputProvider for QueuedPrompt {
    fn ask(&mut self, key: &PromptKey, _question: &str) -> Result<String> {
        self.asked.push(key.clone());
        Ok(self.answers.pop_front().unwrap_or_default())
    }
}

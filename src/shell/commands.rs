//! Callable commands
//!
//! Host code can register commands implemented as Rust closures (or JS
//! functions, through the browser binding). A callable receives the stage's
//! arguments and the previous stage's output, and answers with a
//! [`CommandOutput`] in one of three shapes:
//!
//! - `Text`: the value itself
//! - `Future`: a value completed later
//! - `Stream`: values produced incrementally, concatenated in order
//!
//! All three are normalized to one string by [`CommandOutput::collect`].

use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;
use futures::{Future, FutureExt, Stream, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Error raised by a callable command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError(pub String);

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CommandError {}

/// Result type for callable commands
pub type CommandResult<T> = Result<T, CommandError>;

/// What a callable answers with
pub enum CommandOutput {
    Text(String),
    Future(LocalBoxFuture<'static, CommandResult<String>>),
    Stream(LocalBoxStream<'static, CommandResult<String>>),
}

impl CommandOutput {
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = CommandResult<String>> + 'static,
    {
        Self::Future(future.boxed_local())
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = CommandResult<String>> + 'static,
    {
        Self::Stream(stream.boxed_local())
    }

    /// Wait for the whole output
    pub async fn collect(self) -> CommandResult<String> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Future(future) => future.await,
            Self::Stream(mut stream) => {
                let mut output = String::new();
                while let Some(chunk) = stream.next().await {
                    output.push_str(&chunk?);
                }
                Ok(output)
            }
        }
    }
}

impl fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Future(_) => write!(f, "Future(..)"),
            Self::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

impl From<String> for CommandOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for CommandOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<()> for CommandOutput {
    fn from(_: ()) -> Self {
        Self::Text(String::new())
    }
}

/// Callback of a callable: `(args, stdin_preset)`
pub type CommandFn = Rc<dyn Fn(Vec<String>, Option<String>) -> CommandResult<CommandOutput>>;

/// A registered callable
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub callback: CommandFn,
    /// Completion candidates offered by the line editor
    pub autocomplete: Vec<String>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("autocomplete", &self.autocomplete)
            .finish()
    }
}

/// Tab completion of the last word of a line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Byte offset where the completed word starts
    pub start: usize,
    pub candidates: Vec<String>,
}

/// Name -> callable
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a callable
    pub fn register<F>(&mut self, name: &str, callback: F, autocomplete: Vec<String>)
    where
        F: Fn(Vec<String>, Option<String>) -> CommandResult<CommandOutput> + 'static,
    {
        self.commands.insert(
            name.to_string(),
            Command {
                name: name.to_string(),
                callback: Rc::new(callback),
                autocomplete,
            },
        );
    }

    /// Returns whether the command existed
    pub fn unregister(&mut self, name: &str) -> bool {
        self.commands.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Sorted command names
    pub fn names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    /// Command names for the first word of a stage, the command's hints
    /// after it
    pub fn complete(&self, line: &str) -> Completion {
        let word = line
            .rsplit(|c: char| c.is_whitespace() || c == '|')
            .next()
            .unwrap_or("");
        let start = line.len() - word.len();
        let stage = line[..start].rsplit('|').next().unwrap_or("");

        let candidates: Vec<&String> = match stage.split_whitespace().next() {
            None => self.commands.keys().collect(),
            Some(program) => match self.commands.get(program) {
                Some(command) => command.autocomplete.iter().collect(),
                None => Vec::new(),
            },
        };
        Completion {
            start,
            candidates: candidates
                .into_iter()
                .filter(|c| c.starts_with(word))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn rev(args: Vec<String>, stdin: Option<String>) -> CommandResult<CommandOutput> {
        let input = stdin.unwrap_or_else(|| args.join(" "));
        Ok(input.chars().rev().collect::<String>().into())
    }

    // ============ Registry ============

    #[test]
    fn test_register_and_get() {
        let mut registry = CommandRegistry::new();
        registry.register("rev", rev, vec![]);
        assert!(registry.contains("rev"));

        let command = registry.get("rev").unwrap();
        let output = (command.callback)(vec![], Some("abc".to_string())).unwrap();
        assert_eq!(block_on(output.collect()).unwrap(), "cba");
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = CommandRegistry::new();
        registry.register("x", |_, _| Ok("one".into()), vec![]);
        registry.register("x", |_, _| Ok("two".into()), vec!["--all".to_string()]);
        assert_eq!(registry.names(), vec!["x"]);

        let command = registry.get("x").unwrap();
        assert_eq!(command.autocomplete, vec!["--all"]);
        let output = (command.callback)(vec![], None).unwrap();
        assert_eq!(block_on(output.collect()).unwrap(), "two");
    }

    #[test]
    fn test_complete_names_then_hints() {
        let mut registry = CommandRegistry::new();
        registry.register("help", rev, vec![]);
        registry.register("hello", rev, vec![]);
        registry.register("ls", rev, vec!["--all".to_string(), "--long".to_string()]);

        let names = registry.complete("he");
        assert_eq!(names.start, 0);
        assert_eq!(names.candidates, vec!["hello", "help"]);

        let hints = registry.complete("ls --l");
        assert_eq!(hints.start, 3);
        assert_eq!(hints.candidates, vec!["--long"]);

        let next_stage = registry.complete("ls --all |hel");
        assert_eq!(next_stage.start, 10);
        assert_eq!(next_stage.candidates, vec!["hello", "help"]);

        assert!(registry.complete("zz a").candidates.is_empty());
    }

    #[test]
    fn test_unregister() {
        let mut registry = CommandRegistry::new();
        registry.register("b", rev, vec![]);
        registry.register("a", rev, vec![]);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.names(), vec!["b"]);
    }

    // ============ Output Shapes ============

    #[test]
    fn test_future_output() {
        let output = CommandOutput::future(async { Ok("later".to_string()) });
        assert_eq!(block_on(output.collect()).unwrap(), "later");
    }

    #[test]
    fn test_stream_output_concatenated() {
        let chunks = vec![Ok("a".to_string()), Ok("b".to_string()), Ok("c".to_string())];
        let output = CommandOutput::stream(futures::stream::iter(chunks));
        assert_eq!(block_on(output.collect()).unwrap(), "abc");
    }

    #[test]
    fn test_stream_error_stops_collection() {
        let chunks = vec![
            Ok("a".to_string()),
            Err(CommandError::new("boom")),
            Ok("c".to_string()),
        ];
        let output = CommandOutput::stream(futures::stream::iter(chunks));
        assert_eq!(block_on(output.collect()), Err(CommandError::new("boom")));
    }

    #[test]
    fn test_unit_is_empty_text() {
        let output: CommandOutput = ().into();
        assert_eq!(block_on(output.collect()).unwrap(), "");
    }
}

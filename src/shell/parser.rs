//! Command-line parser
//!
//! Turns one input line into pipeline stages. Parsing never fails: unusual
//! input produces [`ParseWarning`]s and a best-effort pipeline.
//!
//! - Words split on whitespace; single quotes are literal, double quotes
//!   honour `\` escapes, a bare `\` escapes the next character
//! - `|` separates stages; empty stages are dropped with a warning
//! - `name=value` words at the start of a stage are stripped with a warning
//! - Any other operator (`||`, `&&`, `&`, `;`, `<`, `>`, `>>`, `2>`, `2>>`)
//!   stops parsing; the words read before it still form a stage

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// A single command (program + arguments)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    /// Program name
    pub program: String,
    /// Arguments (not including program name)
    pub args: Vec<String>,
}

impl SimpleCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }
}

/// Stages of one line, left to right, plus what was skipped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<SimpleCommand>,
    pub warnings: Vec<ParseWarning>,
}

impl Pipeline {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Non-fatal parse diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// `NAME=value` before a command; environment assignment is unsupported
    EnvAssignment(String),
    /// A shell operator other than `|`; the rest of the line is ignored
    UnsupportedOperator(String),
    /// Quote still open at end of line; the line was closed for it
    UnterminatedQuote(char),
    /// Nothing between two pipes (or at either end)
    EmptyStage,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvAssignment(token) => {
                write!(f, "environment variables are not supported, ignoring '{}'", token)
            }
            Self::UnsupportedOperator(op) => {
                write!(f, "operator '{}' is not supported, ignoring the rest of the line", op)
            }
            Self::UnterminatedQuote(quote) => write!(f, "unterminated {} quote", quote),
            Self::EmptyStage => write!(f, "empty command in pipeline"),
        }
    }
}

/// Token types
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// A word; `bare` when no character of it was quoted or escaped
    Word { text: String, bare: bool },
    /// Pipe: |
    Pipe,
    /// Any other operator
    Operator(String),
}

/// Tokenizer for shell input
struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    warnings: Vec<ParseWarning>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            warnings: Vec::new(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    /// Consume `c` if it is next
    fn eat(&mut self, c: char) -> bool {
        self.chars.next_if_eq(&c).is_some()
    }

    fn next_token(&mut self) -> Option<Token> {
        self.skip_whitespace();

        let c = *self.chars.peek()?;
        match c {
            '|' => {
                self.chars.next();
                if self.eat('|') {
                    Some(Token::Operator("||".to_string()))
                } else {
                    Some(Token::Pipe)
                }
            }
            '&' => {
                self.chars.next();
                let op = if self.eat('&') { "&&" } else { "&" };
                Some(Token::Operator(op.to_string()))
            }
            ';' | '<' => {
                self.chars.next();
                Some(Token::Operator(c.to_string()))
            }
            '>' => {
                self.chars.next();
                let op = if self.eat('>') { ">>" } else { ">" };
                Some(Token::Operator(op.to_string()))
            }
            '2' => {
                // 2> and 2>>, otherwise a word starting with '2'
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if lookahead.peek() == Some(&'>') {
                    self.chars.next();
                    self.chars.next();
                    let op = if self.eat('>') { "2>>" } else { "2>" };
                    Some(Token::Operator(op.to_string()))
                } else {
                    self.read_word()
                }
            }
            _ => self.read_word(),
        }
    }

    fn read_word(&mut self) -> Option<Token> {
        let mut text = String::new();
        let mut bare = true;

        while let Some(&c) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => break,
                '|' | '&' | ';' | '<' | '>' => break,
                // Quotes can appear mid-word: foo"bar"baz
                '"' | '\'' => {
                    self.chars.next();
                    bare = false;
                    text.push_str(&self.read_quoted_content(c));
                }
                '\\' => {
                    self.chars.next();
                    bare = false;
                    if let Some(escaped) = self.chars.next() {
                        text.push(escaped);
                    }
                }
                _ => {
                    text.push(c);
                    self.chars.next();
                }
            }
        }

        if text.is_empty() && bare {
            None
        } else {
            Some(Token::Word { text, bare })
        }
    }

    fn read_quoted_content(&mut self, quote: char) -> String {
        let mut content = String::new();

        loop {
            match self.chars.next() {
                Some(c) if c == quote => break,
                // Escape sequences only in double quotes
                Some('\\') if quote == '"' => match self.chars.next() {
                    Some(escaped) => content.push(escaped),
                    None => {
                        self.warnings.push(ParseWarning::UnterminatedQuote(quote));
                        break;
                    }
                },
                Some(c) => content.push(c),
                None => {
                    self.warnings.push(ParseWarning::UnterminatedQuote(quote));
                    break;
                }
            }
        }

        content
    }
}

/// `NAME=value` with a shell identifier as the name
fn is_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Collects the words of the stage being read
#[derive(Default)]
struct StageBuilder {
    words: Vec<String>,
}

impl StageBuilder {
    fn push(&mut self, text: String, bare: bool, warnings: &mut Vec<ParseWarning>) {
        if self.words.is_empty() && bare && is_assignment(&text) {
            warnings.push(ParseWarning::EnvAssignment(text));
            return;
        }
        self.words.push(text);
    }

    fn finish(&mut self) -> Option<SimpleCommand> {
        if self.words.is_empty() {
            return None;
        }
        let mut words = std::mem::take(&mut self.words).into_iter();
        let program = words.next()?;
        Some(SimpleCommand {
            program,
            args: words.collect(),
        })
    }
}

/// Parse a command line into a pipeline
pub fn parse(input: &str) -> Pipeline {
    let mut lexer = Lexer::new(input);
    let mut pipeline = Pipeline::default();
    let mut warnings = Vec::new();
    let mut stage = StageBuilder::default();
    let mut saw_pipe = false;

    loop {
        match lexer.next_token() {
            None => break,
            Some(Token::Word { text, bare }) => stage.push(text, bare, &mut warnings),
            Some(Token::Pipe) => {
                saw_pipe = true;
                match stage.finish() {
                    Some(command) => pipeline.commands.push(command),
                    None => warnings.push(ParseWarning::EmptyStage),
                }
            }
            Some(Token::Operator(op)) => {
                warnings.push(ParseWarning::UnsupportedOperator(op));
                saw_pipe = false;
                break;
            }
        }
    }

    match stage.finish() {
        Some(command) => pipeline.commands.push(command),
        // Trailing pipe
        None if saw_pipe => warnings.push(ParseWarning::EmptyStage),
        None => {}
    }

    // Lexer warnings come first: they describe the words themselves
    pipeline.warnings = lexer.warnings;
    pipeline.warnings.extend(warnings);
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programs(pipeline: &Pipeline) -> Vec<&str> {
        pipeline.commands.iter().map(|c| c.program.as_str()).collect()
    }

    // ============ Simple Commands ============

    #[test]
    fn test_simple_command() {
        let result = parse("ls");
        assert_eq!(result.commands, vec![SimpleCommand::new("ls")]);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_command_with_args() {
        let result = parse("ls -la /home");
        assert_eq!(result.commands[0].program, "ls");
        assert_eq!(result.commands[0].args, vec!["-la", "/home"]);
    }

    #[test]
    fn test_extra_whitespace() {
        let result = parse("  ls   -la \t  /home  ");
        assert_eq!(result.commands[0], SimpleCommand::new("ls").args(["-la", "/home"]));
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("").is_empty());
        assert!(parse("   ").is_empty());
        assert!(parse("").warnings.is_empty());
    }

    #[test]
    fn test_word_starting_with_two() {
        let result = parse("head 20 2x");
        assert_eq!(result.commands[0].args, vec!["20", "2x"]);
    }

    // ============ Quoting ============

    #[test]
    fn test_double_quoted_string() {
        let result = parse(r#"echo "hello world""#);
        assert_eq!(result.commands[0].args, vec!["hello world"]);
    }

    #[test]
    fn test_single_quotes_are_literal() {
        let result = parse(r"echo 'a \n b'");
        assert_eq!(result.commands[0].args, vec![r"a \n b"]);
    }

    #[test]
    fn test_quotes_with_special_chars() {
        let result = parse(r#"echo "hello | world" '&&'"#);
        assert_eq!(result.commands.len(), 1);
        assert_eq!(result.commands[0].args, vec!["hello | world", "&&"]);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_escaped_quote_in_double_quotes() {
        let result = parse(r#"echo "hello \"world\"""#);
        assert_eq!(result.commands[0].args, vec!["hello \"world\""]);
    }

    #[test]
    fn test_backslash_outside_quotes() {
        let result = parse(r"echo a\ b c\|d");
        assert_eq!(result.commands.len(), 1);
        assert_eq!(result.commands[0].args, vec!["a b", "c|d"]);
    }

    #[test]
    fn test_concatenated_quotes() {
        let result = parse(r#"echo foo"bar"baz"#);
        assert_eq!(result.commands[0].args, vec!["foobarbaz"]);
    }

    #[test]
    fn test_empty_quotes_are_an_argument() {
        let result = parse(r#"printf "" x"#);
        assert_eq!(result.commands[0].args, vec!["", "x"]);
    }

    #[test]
    fn test_unterminated_quote_closed_at_end() {
        let result = parse(r#"echo "hello"#);
        assert_eq!(result.commands[0].args, vec!["hello"]);
        assert_eq!(result.warnings, vec![ParseWarning::UnterminatedQuote('"')]);

        let result = parse("echo 'hello | x");
        assert_eq!(result.commands.len(), 1);
        assert_eq!(result.warnings, vec![ParseWarning::UnterminatedQuote('\'')]);
    }

    // ============ Pipes ============

    #[test]
    fn test_simple_pipe() {
        let result = parse("ls | grep foo");
        assert_eq!(programs(&result), vec!["ls", "grep"]);
        assert_eq!(result.commands[1].args, vec!["foo"]);
    }

    #[test]
    fn test_multi_pipe_no_spaces() {
        let result = parse("cat file|grep pattern|wc -l");
        assert_eq!(programs(&result), vec!["cat", "grep", "wc"]);
    }

    #[test]
    fn test_empty_stages_dropped() {
        let result = parse("| grep foo");
        assert_eq!(programs(&result), vec!["grep"]);
        assert_eq!(result.warnings, vec![ParseWarning::EmptyStage]);

        let result = parse("ls |");
        assert_eq!(programs(&result), vec!["ls"]);
        assert_eq!(result.warnings, vec![ParseWarning::EmptyStage]);
    }

    // ============ Environment Assignments ============

    #[test]
    fn test_env_assignment_stripped() {
        let result = parse("name=x ls");
        assert_eq!(result.commands, vec![SimpleCommand::new("ls")]);
        assert_eq!(
            result.warnings,
            vec![ParseWarning::EnvAssignment("name=x".to_string())]
        );
    }

    #[test]
    fn test_assignment_only_at_stage_start() {
        let result = parse("A=1 B=2 env | grep C=3");
        assert_eq!(programs(&result), vec!["env", "grep"]);
        assert_eq!(result.commands[1].args, vec!["C=3"]);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_quoted_assignment_is_a_word() {
        let result = parse(r#""a=b" x"#);
        assert_eq!(result.commands[0].program, "a=b");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_non_identifier_is_not_assignment() {
        assert!(is_assignment("_x1=2"));
        assert!(!is_assignment("1x=2"));
        assert!(!is_assignment("=x"));
        assert!(!is_assignment("--opt=x"));
        assert_eq!(parse("--opt=x").commands[0].program, "--opt=x");
    }

    // ============ Unsupported Operators ============

    #[test]
    fn test_operator_keeps_earlier_stages() {
        let result = parse("cat a | sort > out.txt | wc");
        assert_eq!(programs(&result), vec!["cat", "sort"]);
        assert_eq!(
            result.warnings,
            vec![ParseWarning::UnsupportedOperator(">".to_string())]
        );
    }

    #[test]
    fn test_each_operator_recognized() {
        for op in ["||", "&&", "&", ";", "<", ">", ">>", "2>", "2>>"] {
            let result = parse(&format!("a {} b", op));
            assert_eq!(programs(&result), vec!["a"], "operator {}", op);
            assert_eq!(
                result.warnings,
                vec![ParseWarning::UnsupportedOperator(op.to_string())]
            );
        }
    }

    #[test]
    fn test_operator_without_spaces() {
        let result = parse("sleep 10&");
        assert_eq!(result.commands[0].args, vec!["10"]);
        assert_eq!(
            result.warnings,
            vec![ParseWarning::UnsupportedOperator("&".to_string())]
        );
    }

    #[test]
    fn test_leading_operator_yields_nothing() {
        let result = parse("; ls");
        assert!(result.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_warning_display() {
        assert_eq!(ParseWarning::EmptyStage.to_string(), "empty command in pipeline");
        assert!(
            ParseWarning::UnsupportedOperator(";".to_string())
                .to_string()
                .contains("';'")
        );
    }
}

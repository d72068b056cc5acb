//! Structured command lines.
//!
//! Commands are assembled from typed tokens and only flattened to an argument
//! vector at the process boundary, so no shell quoting is ever involved in
//! execution. Quoting exists only for the human-readable preview.

use std::fmt;
use std::process::Command;

use crate::core::platform::Platform;

/// One argument of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Executable to launch.
    Program(String),
    /// `-m <module>` pair selecting the tool hosted by the interpreter.
    Module(String),
    /// `--name` or `--name=value`.
    Flag { name: String, value: Option<String> },
    /// Argument passed through verbatim.
    Raw(String),
    /// Positional argument (the entry point for compiler commands).
    Positional(String),
}

impl Token {
    fn push_args(&self, argv: &mut Vec<String>) {
        match self {
            Self::Program(program) => argv.push(program.clone()),
            Self::Module(module) => {
                argv.push("-m".to_string());
                argv.push(module.clone());
            }
            Self::Flag { name, value: None } => argv.push(name.clone()),
            Self::Flag {
                name,
                value: Some(value),
            } => argv.push(format!("{name}={value}")),
            Self::Raw(raw) | Self::Positional(raw) => argv.push(raw.clone()),
        }
    }
}

/// Immutable, validated command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    tokens: Vec<Token>,
}

impl CommandLine {
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Flattened argument vector; the first element is the program.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.tokens.len() + 1);
        for token in &self.tokens {
            token.push_args(&mut argv);
        }
        argv
    }

    pub fn program(&self) -> &str {
        match self.tokens.first() {
            Some(Token::Program(program)) => program,
            _ => "",
        }
    }

    /// The trailing positional argument, if the command has one.
    pub fn positional(&self) -> Option<&str> {
        match self.tokens.last() {
            Some(Token::Positional(value)) => Some(value),
            _ => None,
        }
    }

    /// Whether a flag token with exactly this rendered form is present.
    pub fn contains_arg(&self, arg: &str) -> bool {
        self.argv().iter().any(|candidate| candidate == arg)
    }

    pub fn to_command(&self) -> Command {
        let argv = self.argv();
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        command
    }

    /// Quoted rendering suitable for copy/paste into a shell on `platform`.
    pub fn display_for(&self, platform: Platform) -> String {
        self.argv()
            .iter()
            .map(|arg| quote_arg(arg, platform))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_for(Platform::current()))
    }
}

/// Incremental builder for [`CommandLine`].
///
/// Values that cannot be passed to the operating system (interior NUL bytes)
/// are dropped and returned alongside the finished command instead of
/// failing the whole build.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    tokens: Vec<Token>,
    rejected: Vec<String>,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            tokens: vec![Token::Program(program.into())],
            rejected: Vec::new(),
        }
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.push(Token::Module(module.into()));
        self
    }

    pub fn switch(&mut self, name: &str) {
        self.push(Token::Flag {
            name: name.to_string(),
            value: None,
        });
    }

    pub fn valued(&mut self, name: &str, value: impl Into<String>) {
        self.push(Token::Flag {
            name: name.to_string(),
            value: Some(value.into()),
        });
    }

    pub fn raw(&mut self, raw: impl Into<String>) {
        self.push(Token::Raw(raw.into()));
    }

    /// Finish with a trailing positional argument.
    pub fn finish(mut self, positional: impl Into<String>) -> (CommandLine, Vec<String>) {
        let positional = positional.into();
        if is_valid_arg(&positional) {
            self.tokens.push(Token::Positional(positional));
        } else {
            self.rejected.push(positional.replace('\0', "\\0"));
            self.tokens.push(Token::Positional(String::from(".")));
        }
        (
            CommandLine {
                tokens: self.tokens,
            },
            self.rejected,
        )
    }

    /// Finish without a positional argument.
    pub fn build(self) -> (CommandLine, Vec<String>) {
        (
            CommandLine {
                tokens: self.tokens,
            },
            self.rejected,
        )
    }

    fn push(&mut self, token: Token) {
        let mut rendered = Vec::new();
        token.push_args(&mut rendered);
        if rendered.iter().all(|arg| is_valid_arg(arg)) {
            self.tokens.push(token);
        } else {
            self.rejected
                .extend(rendered.into_iter().map(|arg| arg.replace('\0', "\\0")));
        }
    }
}

fn is_valid_arg(arg: &str) -> bool {
    !arg.contains('\0')
}

/// Quote one argument for display.
pub fn quote_arg(arg: &str, platform: Platform) -> String {
    if platform.is_windows() {
        quote_windows(arg)
    } else {
        quote_posix(arg)
    }
}

// MSVC runtime rules: quote on whitespace, double backslashes that precede a quote.
fn quote_windows(arg: &str) -> String {
    let needs_quotes = arg.is_empty() || arg.contains([' ', '\t']);
    let mut out = String::with_capacity(arg.len() + 2);
    if needs_quotes {
        out.push('"');
    }
    let mut backslashes = 0usize;
    for ch in arg.chars() {
        match ch {
            '\\' => backslashes += 1,
            '"' => {
                out.push_str(&"\\".repeat(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            other => {
                out.push_str(&"\\".repeat(backslashes));
                out.push(other);
                backslashes = 0;
            }
        }
    }
    if needs_quotes {
        out.push_str(&"\\".repeat(backslashes * 2));
        out.push('"');
    } else {
        out.push_str(&"\\".repeat(backslashes));
    }
    out
}

fn quote_posix(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg.chars().all(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '=' | '.' | '/' | ':' | ',' | '+' | '@' | '%')
        });
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

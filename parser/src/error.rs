use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Error, Debug, Diagnostic)]
pub enum ParseError {
    #[error("could not read the description or recording")]
    #[diagnostic(code(evemu::io))]
    Io(#[from] std::io::Error),

    #[error("line {line}: {msg}")]
    #[diagnostic(code(evemu::syntax))]
    Syntax {
        line: usize,
        msg: String,
        #[help]
        help_msg: String,
    },

    #[error("no device description found")]
    #[diagnostic(
        code(evemu::missing_description),
        help("a description has lines such as `N: <name>`, `I: 0003 046d c52b 0111` and `B: 01 ...` before the first `E:` line")
    )]
    MissingDescription,
}

impl ParseError {
    /// Line number (1-based) the error was found on, if it is tied to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Syntax { line, .. } => Some(*line),
            _ => None,
        }
    }
}

pub(crate) fn syntax_error(line: usize, msg: impl Into<String>, help: &str) -> ParseError {
    ParseError::Syntax {
        line,
        msg: msg.into(),
        help_msg: help.to_owned(),
    }
}

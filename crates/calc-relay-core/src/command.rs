//! Parsing of operator commands like `+ 2`, `x3`, `÷ 0.5`.

use std::sync::OnceLock;

use regex::Regex;

/// Arithmetic operation named by a command token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    fn from_token(token: char) -> Option<Self> {
        match token {
            '+' => Some(Self::Add),
            '-' => Some(Self::Subtract),
            '*' | 'x' | 'X' => Some(Self::Multiply),
            '/' | '÷' => Some(Self::Divide),
            _ => None,
        }
    }
}

/// A parsed command. `token` keeps the spelling the operator typed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command {
    pub op: Operator,
    pub token: char,
    pub operand: f64,
}

fn command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `[0-9]` rather than `\d`: Unicode digits must not match.
    RE.get_or_init(|| Regex::new(r"^([+\-*/xX÷])\s*([0-9]+(?:\.[0-9]+)?)$").expect("valid regex"))
}

/// Parse a whole message into a command, or `None` if it is ordinary chat.
pub fn parse(text: &str) -> Option<Command> {
    let caps = command_re().captures(text.trim())?;
    let token = caps.get(1)?.as_str().chars().next()?;
    let op = Operator::from_token(token)?;
    let operand = caps.get(2)?.as_str().parse::<f64>().ok()?;
    Some(Command { op, token, operand })
}

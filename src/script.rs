//! Replayable text form of the macro log.
//!
//! Each line is one of
//!
//! ```text
//! ui = Plot()
//! ui.f(x=1, label="a")
//! ui.parameters.a = 2.5
//! ```
//!
//! Blank lines and lines starting with `#` are ignored when parsing.

use std::{fmt, fs, path::Path};

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, tag, take_while_m_n},
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{all_consuming, map, map_opt, map_res, recognize, value, verify},
    multi::{fold_many0, many0_count, separated_list0, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, separated_pair, terminated},
};
use thiserror::Error;

use crate::{signature::CallArgs, value::Value};

/// Script parse or replay failure.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A line is not a valid call expression.
    #[error("line {line}: cannot parse `{text}`")]
    Syntax {
        /// 1-based line number.
        line: usize,
        /// Offending line.
        text: String,
    },
    /// A line addresses a different object than the replaying session.
    #[error("script addresses `{found}` but the session is `{expected}`")]
    TargetMismatch {
        /// Session target name.
        expected: String,
        /// Target named by the line.
        found: String,
    },
    /// A construction marker appeared where an operation was expected.
    #[error("construction marker cannot be replayed as an operation: {0}")]
    MisplacedInit(String),
    /// Reading or writing the script file failed.
    #[error("script io: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed script line.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptLine {
    /// `target = TypeName()`.
    Init {
        /// Object name.
        target: String,
        /// Constructed type.
        type_name: String,
    },
    /// `target.path(args)`.
    Call {
        /// Object name.
        target: String,
        /// Dotted operation path.
        path: String,
        /// Parsed arguments, still unbound.
        args: CallArgs,
    },
    /// `target.path = value`.
    Set {
        /// Object name.
        target: String,
        /// Dotted field path.
        path: String,
        /// Assigned value.
        value: Value,
    },
}

impl ScriptLine {
    /// Object the line addresses.
    pub fn target(&self) -> &str {
        match self {
            Self::Init { target, .. } | Self::Call { target, .. } | Self::Set { target, .. } => {
                target
            }
        }
    }
}

/// Rendered macro, one call expression per line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    lines: Vec<String>,
}

impl Script {
    /// Wraps already rendered lines.
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Rendered lines.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when there are no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Writes the script to `path`, one line per record.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), ScriptError> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Reads script text previously written with [`Script::write_to`].
    pub fn read_text(path: impl AsRef<Path>) -> Result<String, ScriptError> {
        Ok(fs::read_to_string(path)?)
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Parses every non-blank, non-comment line of `text`.
pub fn parse_script(text: &str) -> Result<Vec<ScriptLine>, ScriptError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        out.push(parse_line(trimmed).map_err(|_| ScriptError::Syntax {
            line: idx + 1,
            text: trimmed.to_string(),
        })?);
    }
    Ok(out)
}

/// Parses a single call expression.
pub fn parse_line(text: &str) -> Result<ScriptLine, nom::Err<nom::error::Error<&str>>> {
    all_consuming(delimited(multispace0, line, multispace0))(text).map(|(_, parsed)| parsed)
}

enum Tail {
    Call(CallArgs),
    Set(Value),
}

enum Arg {
    Positional(Value),
    Keyword(String, Value),
}

enum Fragment<'a> {
    Literal(&'a str),
    Escaped(char),
}

fn line(input: &str) -> IResult<&str, ScriptLine> {
    let (rest, target) = terminated(ident, multispace0)(input)?;
    alt((
        map(
            preceded(
                pair(char('='), multispace0),
                terminated(ident, pair(multispace0, tag("()"))),
            ),
            |type_name: &str| ScriptLine::Init {
                target: target.to_string(),
                type_name: type_name.to_string(),
            },
        ),
        map(
            preceded(
                char('.'),
                pair(
                    path,
                    preceded(
                        multispace0,
                        alt((
                            map(call_args, Tail::Call),
                            map(preceded(pair(char('='), multispace0), value_expr), Tail::Set),
                        )),
                    ),
                ),
            ),
            |(path, tail): (&str, Tail)| match tail {
                Tail::Call(args) => ScriptLine::Call {
                    target: target.to_string(),
                    path: path.to_string(),
                    args,
                },
                Tail::Set(assigned) => ScriptLine::Set {
                    target: target.to_string(),
                    path: path.to_string(),
                    value: assigned,
                },
            },
        ),
    ))(rest)
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn path(input: &str) -> IResult<&str, &str> {
    recognize(separated_list1(char('.'), ident))(input)
}

fn comma(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char(','), multispace0)(input)
}

fn call_args(input: &str) -> IResult<&str, CallArgs> {
    map(
        delimited(
            pair(char('('), multispace0),
            separated_list0(comma, arg),
            pair(multispace0, char(')')),
        ),
        |args: Vec<Arg>| {
            args.into_iter().fold(CallArgs::new(), |acc, a| match a {
                Arg::Positional(v) => acc.arg(v),
                Arg::Keyword(name, v) => acc.kwarg(name, v),
            })
        },
    )(input)
}

fn arg(input: &str) -> IResult<&str, Arg> {
    alt((
        map(
            separated_pair(ident, delimited(multispace0, char('='), multispace0), value_expr),
            |(name, v): (&str, Value)| Arg::Keyword(name.to_string(), v),
        ),
        map(value_expr, Arg::Positional),
    ))(input)
}

fn value_expr(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::None, tag("none")),
        value(Value::Bool(true), tag("true")),
        value(Value::Bool(false), tag("false")),
        value(Value::Float(f64::NAN), tag("NaN")),
        value(Value::Float(f64::NEG_INFINITY), tag("-inf")),
        value(Value::Float(f64::INFINITY), tag("inf")),
        number,
        map(string_lit, Value::Str),
        map(list, Value::List),
    ))(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    map_res(recognize_float, |text: &str| {
        if text.contains(['.', 'e', 'E']) {
            text.parse::<f64>().map(Value::Float).map_err(|e| e.to_string())
        } else {
            text.parse::<i64>().map(Value::Int).map_err(|e| e.to_string())
        }
    })(input)
}

fn list(input: &str) -> IResult<&str, Vec<Value>> {
    delimited(
        pair(char('['), multispace0),
        separated_list0(comma, value_expr),
        pair(multispace0, char(']')),
    )(input)
}

fn string_lit(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        fold_many0(fragment, String::new, |mut acc, frag| {
            match frag {
                Fragment::Literal(s) => acc.push_str(s),
                Fragment::Escaped(c) => acc.push(c),
            }
            acc
        }),
        char('"'),
    )(input)
}

fn fragment(input: &str) -> IResult<&str, Fragment<'_>> {
    alt((
        map(verify(is_not("\"\\"), |s: &str| !s.is_empty()), Fragment::Literal),
        map(escaped_char, Fragment::Escaped),
    ))(input)
}

fn escaped_char(input: &str) -> IResult<&str, char> {
    preceded(
        char('\\'),
        alt((
            unicode_escape,
            value('\n', char('n')),
            value('\r', char('r')),
            value('\t', char('t')),
            value('\0', char('0')),
            value('\\', char('\\')),
            value('"', char('"')),
            value('\'', char('\'')),
        )),
    )(input)
}

fn unicode_escape(input: &str) -> IResult<&str, char> {
    map_opt(
        delimited(
            tag("u{"),
            take_while_m_n(1, 6, |c: char| c.is_ascii_hexdigit()),
            char('}'),
        ),
        |hex: &str| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32),
    )(input)
}

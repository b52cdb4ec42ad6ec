// Instruction text parsing for the MCOS emulator.
//
// Two surface forms are accepted for every instruction: the parenthesized
// form `ADD(x, y, 1)` and a space-separated form `ADD x y 1`. Programs are
// `;`-separated at the top level; FOR bodies nest arbitrarily, so splitting
// tracks bracket/parenthesis depth and single-quote state instead of using
// per-instruction patterns.

use std::fmt;

use crate::instruction::{Instruction, Operand, PrintPart};

/// Parse a `;`-separated program. Blank segments are skipped.
pub fn parse_program(source: &str) -> Result<Vec<Instruction>, ParseError> {
    let mut program = Vec::new();
    for segment in split_top_level(source, |c| c == ';')? {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        program.push(parse_instruction(segment)?);
    }
    Ok(program)
}

/// Parse a single instruction in either surface form.
pub fn parse_instruction(line: &str) -> Result<Instruction, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::EmptyInstruction);
    }

    // Parenthesized form: NAME(arg, arg, ...)
    if let Some(open) = line.find('(') {
        let name = line[..open].trim();
        if name.chars().all(|c| c.is_ascii_alphabetic()) && line.ends_with(')') {
            let args_str = &line[open + 1..line.len() - 1];
            return parse_named(name, args_str, split_args(args_str)?);
        }
    }

    // Space-separated form: NAME arg arg ...
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let args = split_top_level(rest, char::is_whitespace)?
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    parse_named(name, rest, args)
}

/// Dispatch on the instruction name. `raw_args` is the unsplit argument text
/// (PRINT consumes it whole), `args` the top-level split.
fn parse_named(
    name: &str,
    raw_args: &str,
    args: Vec<String>,
) -> Result<Instruction, ParseError> {
    match name {
        "DECLARE" => {
            let [var, value] = take_args::<2>("DECLARE", args)?;
            Ok(Instruction::Declare { var: parse_ident(&var)?, value: parse_int(&value)? })
        }
        "ADD" => {
            let [dst, lhs, rhs] = take_args::<3>("ADD", args)?;
            Ok(Instruction::Add {
                dst: parse_ident(&dst)?,
                lhs: parse_operand(&lhs)?,
                rhs: parse_operand(&rhs)?,
            })
        }
        "SUBTRACT" => {
            let [dst, lhs, rhs] = take_args::<3>("SUBTRACT", args)?;
            Ok(Instruction::Subtract {
                dst: parse_ident(&dst)?,
                lhs: parse_operand(&lhs)?,
                rhs: parse_operand(&rhs)?,
            })
        }
        "PRINT" => Ok(Instruction::Print { parts: parse_print_expr(raw_args)? }),
        "SLEEP" => {
            let [ticks] = take_args::<1>("SLEEP", args)?;
            let ticks = ticks
                .parse()
                .map_err(|_| ParseError::InvalidNumber(ticks.to_string()))?;
            Ok(Instruction::Sleep { ticks })
        }
        "FOR" => {
            let [body, repeats] = take_args::<2>("FOR", args)?;
            let body = body.trim();
            if !(body.starts_with('[') && body.ends_with(']') && body.len() >= 2) {
                return Err(ParseError::MalformedBody(body.to_string()));
            }
            let repeats = repeats
                .parse()
                .map_err(|_| ParseError::InvalidNumber(repeats.to_string()))?;
            Ok(Instruction::For {
                body: parse_program(&body[1..body.len() - 1])?,
                repeats,
            })
        }
        "WRITE" => {
            let [addr, value] = take_args::<2>("WRITE", args)?;
            Ok(Instruction::Write { addr: parse_address(&addr)?, value: parse_operand(&value)? })
        }
        "READ" => {
            let [var, addr] = take_args::<2>("READ", args)?;
            Ok(Instruction::Read { var: parse_ident(&var)?, addr: parse_address(&addr)? })
        }
        other => Err(ParseError::UnknownInstruction(other.to_string())),
    }
}

fn take_args<const N: usize>(
    name: &'static str,
    args: Vec<String>,
) -> Result<[String; N], ParseError> {
    let found = args.len();
    args.try_into()
        .map_err(|_| ParseError::WrongArity { name, expected: N, found })
}

fn parse_ident(token: &str) -> Result<String, ParseError> {
    let token = token.trim();
    let starts_ok = token.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if starts_ok && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(token.to_string())
    } else {
        Err(ParseError::InvalidIdentifier(token.to_string()))
    }
}

fn parse_int(token: &str) -> Result<i64, ParseError> {
    token
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidNumber(token.trim().to_string()))
}

fn parse_operand(token: &str) -> Result<Operand, ParseError> {
    let token = token.trim();
    if let Ok(value) = token.parse::<i64>() {
        return Ok(Operand::Literal(value));
    }
    Ok(Operand::Var(parse_ident(token)?))
}

/// Addresses are decimal or `0x`-prefixed hex.
fn parse_address(token: &str) -> Result<usize, ParseError> {
    let token = token.trim();
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| ParseError::InvalidAddress(token.to_string()))
}

/// Split a PRINT expression on top-level `+` into literal and value parts.
fn parse_print_expr(expr: &str) -> Result<Vec<PrintPart>, ParseError> {
    let mut parts = Vec::new();
    for piece in split_top_level(expr, |c| c == '+')? {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if piece.len() >= 2 && piece.starts_with('\'') && piece.ends_with('\'') {
            parts.push(PrintPart::Literal(piece[1..piece.len() - 1].to_string()));
        } else {
            parts.push(PrintPart::Value(parse_operand(piece)?));
        }
    }
    Ok(parts)
}

/// Split arguments on top-level commas. An all-whitespace argument list
/// yields no arguments.
fn split_args(args_str: &str) -> Result<Vec<String>, ParseError> {
    if args_str.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(split_top_level(args_str, |c| c == ',')?
        .into_iter()
        .map(|s| s.trim().to_string())
        .collect())
}

/// Split on a separator predicate, ignoring separators inside parentheses,
/// brackets, or single-quoted strings.
fn split_top_level(text: &str, is_sep: impl Fn(char) -> bool) -> Result<Vec<&str>, ParseError> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0usize;

    for (i, c) in text.char_indices() {
        if in_quote {
            if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        match c {
            '\'' => in_quote = true,
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::UnbalancedDelimiters(text.to_string()))?;
            }
            c if depth == 0 && is_sep(c) => {
                pieces.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if depth != 0 || in_quote {
        return Err(ParseError::UnbalancedDelimiters(text.to_string()));
    }
    pieces.push(&text[start..]);
    Ok(pieces)
}

/// Instruction parsing errors, reported at process creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    EmptyInstruction,
    UnknownInstruction(String),
    WrongArity { name: &'static str, expected: usize, found: usize },
    InvalidIdentifier(String),
    InvalidNumber(String),
    InvalidAddress(String),
    MalformedBody(String),
    UnbalancedDelimiters(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::EmptyInstruction => write!(f, "empty instruction"),
            ParseError::UnknownInstruction(name) => write!(f, "unknown instruction '{name}'"),
            ParseError::WrongArity { name, expected, found } => {
                write!(f, "{name} expects {expected} arguments, found {found}")
            }
            ParseError::InvalidIdentifier(token) => write!(f, "invalid identifier '{token}'"),
            ParseError::InvalidNumber(token) => write!(f, "invalid number '{token}'"),
            ParseError::InvalidAddress(token) => write!(f, "invalid address '{token}'"),
            ParseError::MalformedBody(body) => write!(f, "malformed FOR body '{body}'"),
            ParseError::UnbalancedDelimiters(text) => {
                write!(f, "unbalanced delimiters in '{text}'")
            }
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declare() {
        assert_eq!(
            parse_instruction("DECLARE(x, 5)").unwrap(),
            Instruction::Declare { var: "x".to_string(), value: 5 }
        );
        // Negative literals are accepted and clamp to zero at execution.
        assert_eq!(
            parse_instruction("DECLARE(x, -3)").unwrap(),
            Instruction::Declare { var: "x".to_string(), value: -3 }
        );
    }

    #[test]
    fn test_parse_arithmetic_operands() {
        assert_eq!(
            parse_instruction("ADD(sum, x, 10)").unwrap(),
            Instruction::Add {
                dst: "sum".to_string(),
                lhs: Operand::Var("x".to_string()),
                rhs: Operand::Literal(10),
            }
        );
        assert_eq!(
            parse_instruction("SUBTRACT(diff, y, x)").unwrap(),
            Instruction::Subtract {
                dst: "diff".to_string(),
                lhs: Operand::Var("y".to_string()),
                rhs: Operand::Var("x".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_print_expression() {
        let parsed = parse_instruction("PRINT('Value of sum: ' + sum)").unwrap();
        assert_eq!(
            parsed,
            Instruction::Print {
                parts: vec![
                    PrintPart::Literal("Value of sum: ".to_string()),
                    PrintPart::Value(Operand::Var("sum".to_string())),
                ]
            }
        );
    }

    #[test]
    fn test_print_plus_inside_quotes_is_literal() {
        let parsed = parse_instruction("PRINT('a + b')").unwrap();
        assert_eq!(
            parsed,
            Instruction::Print { parts: vec![PrintPart::Literal("a + b".to_string())] }
        );
    }

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            parse_instruction("WRITE(0x10, 42)").unwrap(),
            Instruction::Write { addr: 16, value: Operand::Literal(42) }
        );
        assert_eq!(
            parse_instruction("READ(val, 512)").unwrap(),
            Instruction::Read { var: "val".to_string(), addr: 512 }
        );
        assert!(parse_instruction("WRITE(-4, 1)").is_err());
        assert!(parse_instruction("WRITE(0xzz, 1)").is_err());
    }

    #[test]
    fn test_parse_nested_for() {
        let parsed = parse_instruction("FOR([ADD(x, x, 1); FOR([PRINT('hi')], 2)], 3)").unwrap();
        match parsed {
            Instruction::For { body, repeats } => {
                assert_eq!(repeats, 3);
                assert_eq!(body.len(), 2);
                assert!(matches!(body[1], Instruction::For { repeats: 2, .. }));
            }
            other => panic!("expected FOR, parsed {other:?}"),
        }
    }

    #[test]
    fn test_parse_program_splits_top_level_only() {
        let program = parse_program("DECLARE(x, 1); FOR([ADD(x, x, 1); ADD(x, x, 2)], 2)").unwrap();
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_space_separated_forms() {
        assert_eq!(
            parse_instruction("DECLARE x 5").unwrap(),
            parse_instruction("DECLARE(x, 5)").unwrap()
        );
        assert_eq!(
            parse_instruction("ADD sum x y").unwrap(),
            parse_instruction("ADD(sum, x, y)").unwrap()
        );
        assert_eq!(
            parse_instruction("WRITE 0x20 7").unwrap(),
            parse_instruction("WRITE(0x20, 7)").unwrap()
        );
        assert_eq!(parse_instruction("SLEEP 4").unwrap(), Instruction::Sleep { ticks: 4 });
        assert_eq!(
            parse_instruction("PRINT 'hello' + x").unwrap(),
            parse_instruction("PRINT('hello' + x)").unwrap()
        );
        assert_eq!(
            parse_instruction("FOR [PRINT('a'); PRINT('b')] 2").unwrap(),
            parse_instruction("FOR([PRINT('a'); PRINT('b')], 2)").unwrap()
        );
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        assert!(parse_instruction("").is_err());
        assert!(parse_instruction("JUMP(3)").is_err());
        assert!(parse_instruction("ADD(x, y)").is_err());
        assert!(parse_instruction("DECLARE(9lives, 1)").is_err());
        assert!(parse_instruction("FOR([PRINT('a'), 2)").is_err());
    }
}

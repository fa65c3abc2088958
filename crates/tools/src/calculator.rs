//! Calculator tool: exact arithmetic for the model.
//!
//! Supports `+`, `-`, `*`, `/`, `%`, parentheses, and unary negation through
//! a recursive-descent parser. Integral results are returned as JSON
//! integers, everything else as floats.

use async_trait::async_trait;
use runwarden_core::error::ToolError;
use runwarden_core::{Tool, ToolContext, ToolOutput};
use serde_json::{Value, json};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression exactly. Use this for any arithmetic instead of computing it yourself. Supports +, -, *, /, %, parentheses, and decimal numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '15 * 27' or '(2 + 3) / 4'"
                }
            },
            "required": ["expression"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _ctx: &ToolContext, arguments: Value) -> Result<ToolOutput, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        let value = evaluate(expr).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: "calculator".into(),
            reason,
        })?;
        Ok(ToolOutput::new(to_payload(value)))
    }
}

/// Integral results become JSON integers so `15 * 27` yields exactly `405`.
fn to_payload(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

// ── Expression evaluator ──────────────────────────────────────────────────

/// Evaluate an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut parser = Parser {
        src: expr,
        pos: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    match parser.peek() {
        None => Ok(value),
        Some(c) => Err(format!("Unexpected '{c}' at offset {}", parser.pos)),
    }
}

/// Recursive descent directly over the input, one byte offset at a time.
///
/// ```text
/// expr    = term (('+' | '-') term)*
/// term    = factor (('*' | '/' | '%') factor)*
/// factor  = '-' factor | number | '(' expr ')'
/// ```
struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    /// Consume `c` if it is the next non-space character.
    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        loop {
            if self.eat('+') {
                acc += self.term()?;
            } else if self.eat('-') {
                acc -= self.term()?;
            } else {
                return Ok(acc);
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.factor()?;
        loop {
            if self.eat('*') {
                acc *= self.factor()?;
            } else if self.eat('/') {
                let rhs = self.factor()?;
                if rhs == 0.0 {
                    return Err("Division by zero".into());
                }
                acc /= rhs;
            } else if self.eat('%') {
                let rhs = self.factor()?;
                if rhs == 0.0 {
                    return Err("Modulo by zero".into());
                }
                acc %= rhs;
            } else {
                return Ok(acc);
            }
        }
    }

    fn factor(&mut self) -> Result<f64, String> {
        if self.eat('-') {
            return Ok(-self.factor()?);
        }
        if self.eat('(') {
            let inner = self.expr()?;
            if !self.eat(')') {
                return Err("Expected closing parenthesis".into());
            }
            return Ok(inner);
        }
        self.number()
    }

    fn number(&mut self) -> Result<f64, String> {
        self.skip_ws();
        let start = self.pos;
        let len = self.src[start..]
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(self.src.len() - start);
        if len == 0 {
            return Err(match self.peek() {
                Some(c) => format!("Unexpected '{c}' at offset {start}"),
                None => "Unexpected end of expression".into(),
            });
        }
        self.pos += len;
        let text = &self.src[start..self.pos];
        text.parse()
            .map_err(|_| format!("Invalid number: {text}"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

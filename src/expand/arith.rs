use log::trace;

use crate::prelude::*;

/// Where arithmetic reads and writes variables
pub trait ArithEnv {
	fn get_num(&self, name: &str) -> RashResult<i64>;
	fn set_num(&mut self, name: &str, value: i64) -> RashResult<()>;
}

impl ArithEnv for Rash {
	fn get_num(&self, name: &str) -> RashResult<i64> {
		match self.get_var(name) {
			None => Ok(0),
			Some(value) if value.trim().is_empty() => Ok(0),
			Some(value) => parse_number(value.trim())
				.ok_or_else(|| RashErr::expansion(format!("Illegal number: {value}")))
		}
	}
	fn set_num(&mut self, name: &str, value: i64) -> RashResult<()> {
		self.set_var(name, &value.to_string())
	}
}

/// Decimal, `0x` hexadecimal or leading-zero octal, with an optional sign
pub fn parse_number(text: &str) -> Option<i64> {
	let (neg, digits) = match text.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, text.strip_prefix('+').unwrap_or(text))
	};
	let value: u64 = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
		u64::from_str_radix(hex, 16).ok()?
	} else if digits.len() > 1 && digits.starts_with('0') {
		u64::from_str_radix(&digits[1..], 8).ok()?
	} else {
		digits.parse::<u64>().ok()?
	};
	let value = value as i64;
	Some(if neg { value.wrapping_neg() } else { value })
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
enum BinOp {
	Mul, Div, Rem,
	Add, Sub,
	Shl, Shr,
	Lt, Le, Gt, Ge,
	Eq, Ne,
	BitAnd, BitXor, BitOr,
}

impl BinOp {
	fn apply(self, lhs: i64, rhs: i64) -> RashResult<i64> {
		Ok(match self {
			BinOp::Mul => lhs.wrapping_mul(rhs),
			BinOp::Div | BinOp::Rem if rhs == 0 => return Err(RashErr::expansion("division by zero")),
			BinOp::Div => lhs.wrapping_div(rhs),
			BinOp::Rem => lhs.wrapping_rem(rhs),
			BinOp::Add => lhs.wrapping_add(rhs),
			BinOp::Sub => lhs.wrapping_sub(rhs),
			BinOp::Shl => lhs.wrapping_shl(rhs as u32),
			BinOp::Shr => lhs.wrapping_shr(rhs as u32),
			BinOp::Lt => (lhs < rhs) as i64,
			BinOp::Le => (lhs <= rhs) as i64,
			BinOp::Gt => (lhs > rhs) as i64,
			BinOp::Ge => (lhs >= rhs) as i64,
			BinOp::Eq => (lhs == rhs) as i64,
			BinOp::Ne => (lhs != rhs) as i64,
			BinOp::BitAnd => lhs & rhs,
			BinOp::BitXor => lhs ^ rhs,
			BinOp::BitOr => lhs | rhs,
		})
	}

	fn from_str(op: &str) -> Option<Self> {
		Some(match op {
			"*" => BinOp::Mul, "/" => BinOp::Div, "%" => BinOp::Rem,
			"+" => BinOp::Add, "-" => BinOp::Sub,
			"<<" => BinOp::Shl, ">>" => BinOp::Shr,
			"<" => BinOp::Lt, "<=" => BinOp::Le, ">" => BinOp::Gt, ">=" => BinOp::Ge,
			"==" => BinOp::Eq, "!=" => BinOp::Ne,
			"&" => BinOp::BitAnd, "^" => BinOp::BitXor, "|" => BinOp::BitOr,
			_ => return None
		})
	}
}

#[derive(Debug,Clone,PartialEq)]
enum Expr {
	Num(i64),
	Var(String),
	Neg(Box<Expr>),
	Not(Box<Expr>),
	BitNot(Box<Expr>),
	Binary(BinOp, Box<Expr>, Box<Expr>),
	And(Box<Expr>, Box<Expr>),
	Or(Box<Expr>, Box<Expr>),
	Cond(Box<Expr>, Box<Expr>, Box<Expr>),
	/// `name = expr` and the compound forms, which carry their operator
	Assign(String, Option<BinOp>, Box<Expr>),
}

#[derive(Debug,Clone,PartialEq)]
enum ArithTk {
	Num(i64),
	Name(String),
	Op(&'static str),
}

/// Longest first so `<<=` wins over `<<` and `<`
const OPERATORS: [&str;32] = [
	"<<=", ">>=",
	"<<", ">>", "<=", ">=", "==", "!=", "&&", "||",
	"+=", "-=", "*=", "/=", "%=", "&=", "^=", "|=",
	"+", "-", "*", "/", "%", "<", ">", "&", "^", "|", "!", "~", "?", ":",
];

fn syntax_err() -> RashErr {
	RashErr::expansion("arithmetic syntax error")
}

fn tokenize(text: &str) -> RashResult<Vec<ArithTk>> {
	let chars: Vec<char> = text.chars().collect();
	let mut tokens = vec![];
	let mut i = 0;
	while i < chars.len() {
		let ch = chars[i];
		if ch.is_whitespace() {
			i += 1;
			continue
		}
		if ch.is_ascii_digit() {
			let start = i;
			while i < chars.len() && chars[i].is_ascii_alphanumeric() {
				i += 1;
			}
			let literal: String = chars[start..i].iter().collect();
			let value = parse_number(&literal).ok_or_else(syntax_err)?;
			tokens.push(ArithTk::Num(value));
			continue
		}
		if ch.is_ascii_alphabetic() || ch == '_' {
			let start = i;
			while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
				i += 1;
			}
			tokens.push(ArithTk::Name(chars[start..i].iter().collect()));
			continue
		}
		if ch == '(' || ch == ')' || ch == '=' && chars.get(i + 1) != Some(&'=') {
			tokens.push(ArithTk::Op(match ch { '(' => "(", ')' => ")", _ => "=" }));
			i += 1;
			continue
		}
		let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
		let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
			return Err(syntax_err())
		};
		tokens.push(ArithTk::Op(*op));
		i += op.chars().count();
	}
	Ok(tokens)
}

/// Binding power of each binary operator, loosest first
const LEVELS: [&[&str];10] = [
	&["||"],
	&["&&"],
	&["|"],
	&["^"],
	&["&"],
	&["==", "!="],
	&["<", "<=", ">", ">="],
	&["<<", ">>"],
	&["+", "-"],
	&["*", "/", "%"],
];

struct ArithParser {
	tokens: Vec<ArithTk>,
	pos: usize,
}

impl ArithParser {
	fn peek(&self) -> Option<&ArithTk> {
		self.tokens.get(self.pos)
	}

	fn peek_op(&self) -> Option<&'static str> {
		match self.peek() {
			Some(ArithTk::Op(op)) => Some(*op),
			_ => None
		}
	}

	fn next(&mut self) -> Option<ArithTk> {
		let tk = self.tokens.get(self.pos).cloned();
		self.pos += 1;
		tk
	}

	fn expect(&mut self, op: &str) -> RashResult<()> {
		match self.next() {
			Some(ArithTk::Op(found)) if found == op => Ok(()),
			_ => Err(syntax_err())
		}
	}

	fn assignment(&mut self) -> RashResult<Expr> {
		if let (Some(ArithTk::Name(name)), Some(ArithTk::Op(op))) = (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
			let compound = match *op {
				"=" => Some(None),
				_ => op.strip_suffix('=')
					.filter(|base| !base.is_empty() && !matches!(*op, "<=" | ">=" | "==" | "!="))
					.and_then(BinOp::from_str)
					.map(Some)
			};
			if let Some(compound) = compound {
				let name = name.clone();
				self.pos += 2;
				let rhs = self.assignment()?;
				return Ok(Expr::Assign(name, compound, Box::new(rhs)))
			}
		}
		self.conditional()
	}

	fn conditional(&mut self) -> RashResult<Expr> {
		let cond = self.binary(0)?;
		if self.peek_op() != Some("?") {
			return Ok(cond)
		}
		self.next();
		let then = self.assignment()?;
		self.expect(":")?;
		let other = self.conditional()?;
		Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(other)))
	}

	fn binary(&mut self, level: usize) -> RashResult<Expr> {
		if level == LEVELS.len() {
			return self.unary()
		}
		let mut lhs = self.binary(level + 1)?;
		while let Some(op) = self.peek_op().filter(|op| LEVELS[level].contains(op)) {
			self.next();
			let rhs = self.binary(level + 1)?;
			lhs = match op {
				"&&" => Expr::And(Box::new(lhs), Box::new(rhs)),
				"||" => Expr::Or(Box::new(lhs), Box::new(rhs)),
				_ => {
					let bin = BinOp::from_str(op).ok_or_else(syntax_err)?;
					Expr::Binary(bin, Box::new(lhs), Box::new(rhs))
				}
			};
		}
		Ok(lhs)
	}

	fn unary(&mut self) -> RashResult<Expr> {
		match self.peek_op() {
			Some("-") => { self.next(); Ok(Expr::Neg(Box::new(self.unary()?))) }
			Some("+") => { self.next(); self.unary() }
			Some("!") => { self.next(); Ok(Expr::Not(Box::new(self.unary()?))) }
			Some("~") => { self.next(); Ok(Expr::BitNot(Box::new(self.unary()?))) }
			_ => self.primary()
		}
	}

	fn primary(&mut self) -> RashResult<Expr> {
		match self.next() {
			Some(ArithTk::Num(n)) => Ok(Expr::Num(n)),
			Some(ArithTk::Name(name)) => Ok(Expr::Var(name)),
			Some(ArithTk::Op("(")) => {
				let inner = self.assignment()?;
				self.expect(")")?;
				Ok(inner)
			}
			_ => Err(syntax_err())
		}
	}
}

fn eval(expr: &Expr, env: &mut dyn ArithEnv) -> RashResult<i64> {
	Ok(match expr {
		Expr::Num(n) => *n,
		Expr::Var(name) => env.get_num(name)?,
		Expr::Neg(inner) => eval(inner, env)?.wrapping_neg(),
		Expr::Not(inner) => (eval(inner, env)? == 0) as i64,
		Expr::BitNot(inner) => !eval(inner, env)?,
		Expr::Binary(op, lhs, rhs) => {
			let lhs = eval(lhs, env)?;
			let rhs = eval(rhs, env)?;
			op.apply(lhs, rhs)?
		}
		Expr::And(lhs, rhs) => (eval(lhs, env)? != 0 && eval(rhs, env)? != 0) as i64,
		Expr::Or(lhs, rhs) => (eval(lhs, env)? != 0 || eval(rhs, env)? != 0) as i64,
		Expr::Cond(cond, then, other) => {
			if eval(cond, env)? != 0 {
				eval(then, env)?
			} else {
				eval(other, env)?
			}
		}
		Expr::Assign(name, op, rhs) => {
			let rhs = eval(rhs, env)?;
			let value = match op {
				Some(op) => op.apply(env.get_num(name)?, rhs)?,
				None => rhs
			};
			env.set_num(name, value)?;
			value
		}
	})
}

/// Evaluate the text of `$((...))` after its own parameter expansion
pub fn eval_arith(env: &mut dyn ArithEnv, text: &str) -> RashResult<i64> {
	let tokens = tokenize(text)?;
	if tokens.is_empty() {
		return Ok(0)
	}
	let mut parser = ArithParser { tokens, pos: 0 };
	let expr = parser.assignment()?;
	if parser.peek().is_some() {
		return Err(syntax_err())
	}
	trace!("arithmetic {text:?} -> {expr:?}");
	eval(&expr, env)
}

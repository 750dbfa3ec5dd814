use log::trace;

use crate::interp::token::{Word, WordPart};
use crate::shopt::ShOpts;
use crate::prelude::*;

pub mod arith;
pub mod cmdsub;
pub mod glob;
pub mod misc;
pub mod param;
pub mod split;

use split::Field;

/// Text produced by the substitution stage, tagged with what the later stages may do to it
#[derive(Debug,Clone,PartialEq)]
pub enum Piece {
	Text {
		text: String,
		/// Quoted text is never split and its characters never act as glob syntax
		quoted: bool,
		/// Produced by a substitution, so IFS splitting applies
		splittable: bool
	},
	/// Boundary between two positional parameters in `$@`
	FieldBreak
}

impl Piece {
	fn quoted(text: impl Into<String>) -> Self {
		Piece::Text { text: text.into(), quoted: true, splittable: false }
	}
	/// The result of a substitution in the given quoting context
	pub fn subst(text: impl Into<String>, in_dquote: bool) -> Self {
		Piece::Text { text: text.into(), quoted: in_dquote, splittable: !in_dquote }
	}
}

#[derive(Debug,Clone,Copy)]
pub(crate) struct Ctx {
	/// Inside double quotes
	pub quoted: bool,
	/// Literal text is itself subject to splitting, as in the word of `${x:-a b}`
	pub split_lits: bool,
}

impl Ctx {
	pub const BARE: Ctx = Ctx { quoted: false, split_lits: false };
	pub const DQUOTE: Ctx = Ctx { quoted: true, split_lits: false };
}

fn has_at(parts: &[WordPart]) -> bool {
	parts.iter().any(|part| matches!(part, WordPart::Param(param) if param.name == "@"))
}

/// Run tilde, parameter, command and arithmetic substitution over a list of parts
pub(crate) fn expand_parts(rash: &mut Rash, parts: &[WordPart], ctx: Ctx, out: &mut Vec<Piece>) -> RashResult<()> {
	for part in parts {
		match part {
			WordPart::Lit(text) => {
				out.push(Piece::Text { text: text.clone(), quoted: ctx.quoted, splittable: ctx.split_lits && !ctx.quoted });
			}
			WordPart::Quoted(text) |
			WordPart::SQuote(text) => out.push(Piece::quoted(text.clone())),
			WordPart::DQuote(inner) => {
				// `""` still makes a field. `"$@"` with no parameters makes none.
				if !has_at(inner) {
					out.push(Piece::quoted(""));
				}
				expand_parts(rash, inner, Ctx::DQUOTE, out)?;
			}
			WordPart::Param(param) => {
				param::expand_param(rash, param, ctx.quoted || param.in_dquote, out)?;
			}
			WordPart::CmdSub(body) => {
				let text = cmdsub::run_cmdsub(rash, body.as_deref())?;
				out.push(Piece::subst(text, ctx.quoted));
			}
			WordPart::Arith(expr) => {
				let text = parts_to_string(rash, expr, Ctx::DQUOTE)?;
				let value = arith::eval_arith(&mut *rash, &text)?;
				out.push(Piece::subst(value.to_string(), ctx.quoted));
			}
		}
	}
	Ok(())
}

/// Expand parts and glue the result back together, with `$@` fields joined by spaces
pub(crate) fn parts_to_string(rash: &mut Rash, parts: &[WordPart], ctx: Ctx) -> RashResult<String> {
	let mut pieces = vec![];
	expand_parts(rash, parts, ctx, &mut pieces)?;
	Ok(join_pieces(&pieces))
}

fn join_pieces(pieces: &[Piece]) -> String {
	let mut result = String::new();
	for piece in pieces {
		match piece {
			Piece::Text { text, .. } => result.push_str(text),
			Piece::FieldBreak => result.push(' ')
		}
	}
	result
}

/// Tilde expansion at the start of a word. Returns the parts with the prefix replaced.
fn tilde_prefix(rash: &Rash, parts: &[WordPart]) -> Option<(String, Vec<WordPart>)> {
	let Some(WordPart::Lit(first)) = parts.first() else {
		return None
	};
	if !first.starts_with('~') {
		return None
	}
	let end = first.find('/').unwrap_or(first.len());
	// `~"user"` is not a tilde prefix; the prefix has to end inside this literal
	if end == first.len() && parts.len() > 1 {
		return None
	}
	let home = misc::expand_tilde(rash, &first[1..end])?;
	let mut rest = parts.to_vec();
	let remainder = first[end..].to_string();
	if remainder.is_empty() {
		rest.remove(0);
	} else {
		rest[0] = WordPart::Lit(remainder);
	}
	Some((home, rest))
}

fn word_pieces(rash: &mut Rash, word: &Word) -> RashResult<Vec<Piece>> {
	let mut pieces = vec![];
	match tilde_prefix(rash, &word.parts) {
		Some((home, rest)) => {
			pieces.push(Piece::quoted(home));
			expand_parts(rash, &rest, Ctx::BARE, &mut pieces)?;
		}
		None => expand_parts(rash, &word.parts, Ctx::BARE, &mut pieces)?
	}
	Ok(pieces)
}

fn ifs(rash: &Rash) -> String {
	rash.get_var("IFS").map(|s| s.to_string()).unwrap_or_else(|| " \t\n".into())
}

/// Full expansion of command arguments: substitution, field splitting, then pathname expansion
pub fn expand_argv(rash: &mut Rash, words: &[Word]) -> RashResult<Vec<String>> {
	let mut argv = vec![];
	for word in words {
		let pieces = word_pieces(rash, word)?;
		let fields = split::split_pieces(&pieces, &ifs(rash));
		let noglob = rash.meta().has_opt(ShOpts::NOGLOB);
		for field in fields {
			expand_field(field, noglob, &mut argv);
		}
	}
	trace!("expanded argv: {argv:?}");
	Ok(argv)
}

fn expand_field(field: Field, noglob: bool, argv: &mut Vec<String>) {
	if noglob || !field.has_magic {
		argv.push(field.text);
		return
	}
	match glob::glob_field(&field.pattern) {
		Some(matches) => argv.extend(matches),
		None => argv.push(field.text)
	}
}

/// Expansion without field splitting or globbing: redirection targets, `case` words, here-documents
pub fn expand_word_to_string(rash: &mut Rash, word: &Word) -> RashResult<String> {
	let pieces = word_pieces(rash, word)?;
	Ok(join_pieces(&pieces))
}

/// The value side of `name=value`, with tilde expansion after `=` and every unquoted `:`
pub fn expand_assignment(rash: &mut Rash, word: &Word) -> RashResult<(String, String)> {
	let Some(WordPart::Lit(first)) = word.parts.first() else {
		return Err(RashErr::internal("assignment without a name"))
	};
	let Some((name, value_start)) = first.split_assignment() else {
		return Err(RashErr::internal("assignment without a name"))
	};
	let name = name.to_string();
	let mut parts = word.parts.clone();
	parts[0] = WordPart::Lit(value_start.to_string());
	if matches!(parts.first(), Some(WordPart::Lit(text)) if text.is_empty()) {
		parts.remove(0);
	}

	let mut value = String::new();
	let last = parts.len().saturating_sub(1);
	for (i, part) in parts.iter().enumerate() {
		match part {
			WordPart::Lit(text) => {
				let at_start = i == 0 || value.ends_with(':');
				value.push_str(&misc::assignment_tildes(rash, text, at_start, i == last));
			}
			other => {
				let text = parts_to_string(rash, std::slice::from_ref(other), Ctx::DQUOTE)?;
				value.push_str(&text);
			}
		}
	}
	Ok((name, value))
}

/// A pattern for `case` or `${x#pat}`: quoted characters are escaped, everything else is live
pub fn expand_pattern(rash: &mut Rash, word: &Word) -> RashResult<String> {
	let pieces = word_pieces(rash, word)?;
	Ok(pieces_to_pattern(&pieces))
}

pub(crate) fn pieces_to_pattern(pieces: &[Piece]) -> String {
	let mut pattern = String::new();
	for piece in pieces {
		match piece {
			Piece::Text { text, quoted: true, .. } => pattern.push_str(&::glob::Pattern::escape(text)),
			Piece::Text { text, .. } => pattern.push_str(text),
			Piece::FieldBreak => pattern.push(' ')
		}
	}
	pattern
}

/// The body of an unquoted here-document gets parameter, command and arithmetic expansion only
pub fn expand_heredoc(rash: &mut Rash, body: &Word) -> RashResult<String> {
	match body.parts.as_slice() {
		[WordPart::SQuote(text)] => Ok(text.clone()),
		parts => parts_to_string(rash, parts, Ctx::DQUOTE)
	}
}

use glob::{MatchOptions, Pattern};
use log::trace;

use crate::interp::token::{ParamExp, ParamOp};
use crate::shopt::ShOpts;
use crate::prelude::*;

use super::{expand_parts, parts_to_string, pieces_to_pattern, Ctx, Piece};

/// The value of a parameter by name, covering positional and special parameters.
/// `$@` and `$*` come back joined by spaces here; field-producing callers handle them separately.
pub fn lookup(rash: &Rash, name: &str) -> Option<String> {
	match name {
		"#" => Some(rash.vars().params().len().to_string()),
		"?" => Some(rash.get_status().to_string()),
		"-" => Some(rash.meta().opts.letters()),
		"$" => Some(rash.meta().shell_pid.to_string()),
		"!" => rash.meta().last_bg.map(|pid| pid.to_string()),
		"0" => Some(rash.shell_name().to_string()),
		"@" | "*" => Some(rash.vars().params().join(" ")),
		_ if name.is_digits() => {
			let index = name.parse::<usize>().ok()?;
			rash.vars().get_param(index).map(|s| s.to_string())
		}
		_ => rash.get_var(name).map(|s| s.to_string())
	}
}

fn is_set(rash: &Rash, name: &str) -> bool {
	match name {
		"@" | "*" => !rash.vars().params().is_empty(),
		_ => lookup(rash, name).is_some()
	}
}

/// Push the value of `$@` or `$*` as pieces
fn push_params(rash: &Rash, name: &str, in_dquote: bool, out: &mut Vec<Piece>) {
	let params = rash.vars().params();
	if name == "*" && in_dquote {
		let sep = match rash.get_var("IFS") {
			Some(ifs) => ifs.chars().next().map(|ch| ch.to_string()).unwrap_or_default(),
			None => " ".into()
		};
		out.push(Piece::subst(params.join(&sep), true));
		return
	}
	for (i, param) in params.iter().enumerate() {
		if i > 0 {
			out.push(Piece::FieldBreak);
		}
		out.push(Piece::subst(param.clone(), in_dquote));
	}
}

fn push_value(rash: &Rash, name: &str, value: String, in_dquote: bool, out: &mut Vec<Piece>) {
	if matches!(name, "@" | "*") {
		push_params(rash, name, in_dquote, out);
	} else {
		out.push(Piece::subst(value, in_dquote));
	}
}

/// Expand the word after an operator in the quoting context of the expansion itself
fn expand_arg(rash: &mut Rash, param: &ParamExp, in_dquote: bool, out: &mut Vec<Piece>) -> RashResult<()> {
	let ctx = if in_dquote { Ctx::DQUOTE } else { Ctx { quoted: false, split_lits: true } };
	expand_parts(rash, &param.arg, ctx, out)
}

pub fn expand_param(rash: &mut Rash, param: &ParamExp, in_dquote: bool, out: &mut Vec<Piece>) -> RashResult<()> {
	let name = param.name.as_str();
	let set = is_set(rash, name);
	let value = lookup(rash, name);
	// With a colon, an empty value counts as unset
	let usable = set && !(param.colon && value.as_deref().unwrap_or_default().is_empty());
	trace!("expanding ${{{name}}} op={:?} set={set}", param.op);

	match param.op {
		ParamOp::Plain | ParamOp::Length => {
			if !set && !matches!(name, "@" | "*") && rash.meta().has_opt(ShOpts::NOUNSET) {
				return Err(RashErr::expansion(format!("{name}: parameter not set")))
			}
			if param.op == ParamOp::Length {
				let len = match name {
					"@" | "*" => rash.vars().params().len(),
					_ => value.unwrap_or_default().chars().count()
				};
				out.push(Piece::subst(len.to_string(), in_dquote));
			} else {
				push_value(rash, name, value.unwrap_or_default(), in_dquote, out);
			}
		}
		ParamOp::Default => {
			if usable {
				push_value(rash, name, value.unwrap_or_default(), in_dquote, out);
			} else {
				expand_arg(rash, param, in_dquote, out)?;
			}
		}
		ParamOp::Alt => {
			if usable {
				expand_arg(rash, param, in_dquote, out)?;
			}
		}
		ParamOp::Assign => {
			if usable {
				push_value(rash, name, value.unwrap_or_default(), in_dquote, out);
			} else {
				if !name.is_valid_name() {
					return Err(RashErr::expansion(format!("{name}: cannot assign in this way")))
				}
				let new = parts_to_string(rash, &param.arg, Ctx::DQUOTE)?;
				rash.set_var(name, &new)?;
				out.push(Piece::subst(new, in_dquote));
			}
		}
		ParamOp::Error => {
			if usable {
				push_value(rash, name, value.unwrap_or_default(), in_dquote, out);
			} else {
				let msg = if param.arg.is_empty() {
					if param.colon { "parameter null or not set".to_string() } else { "parameter not set".to_string() }
				} else {
					parts_to_string(rash, &param.arg, Ctx::DQUOTE)?
				};
				return Err(RashErr::expansion(format!("{name}: {msg}")))
			}
		}
		ParamOp::TrimPrefix |
		ParamOp::TrimPrefixLong |
		ParamOp::TrimSuffix |
		ParamOp::TrimSuffixLong => {
			if !set && rash.meta().has_opt(ShOpts::NOUNSET) {
				return Err(RashErr::expansion(format!("{name}: parameter not set")))
			}
			// Only quoting written inside the pattern word escapes, not the outer double quotes
			let mut pat_pieces = vec![];
			expand_parts(rash, &param.arg, Ctx::BARE, &mut pat_pieces)?;
			let pattern = pieces_to_pattern(&pat_pieces);
			let value = value.unwrap_or_default();
			let trimmed = trim(&value, &pattern, param.op);
			out.push(Piece::subst(trimmed, in_dquote));
		}
	}
	Ok(())
}

fn match_opts() -> MatchOptions {
	MatchOptions {
		case_sensitive: true,
		require_literal_separator: false,
		require_literal_leading_dot: false
	}
}

/// Remove the shortest or longest match of `pattern` from one end of `value`
pub fn trim(value: &str, pattern: &str, op: ParamOp) -> String {
	let pat = match Pattern::new(pattern) {
		Ok(pat) => pat,
		Err(_) => match Pattern::new(&Pattern::escape(pattern)) {
			Ok(pat) => pat,
			Err(_) => return value.to_string()
		}
	};
	let opts = match_opts();
	let mut bounds: Vec<usize> = value.char_indices().map(|(i, _)| i).collect();
	bounds.push(value.len());

	match op {
		ParamOp::TrimPrefix => bounds.iter()
			.find(|i| pat.matches_with(&value[..**i], opts))
			.map(|i| value[*i..].to_string()),
		ParamOp::TrimPrefixLong => bounds.iter().rev()
			.find(|i| pat.matches_with(&value[..**i], opts))
			.map(|i| value[*i..].to_string()),
		ParamOp::TrimSuffix => bounds.iter().rev()
			.find(|i| pat.matches_with(&value[**i..], opts))
			.map(|i| value[..*i].to_string()),
		ParamOp::TrimSuffixLong => bounds.iter()
			.find(|i| pat.matches_with(&value[**i..], opts))
			.map(|i| value[..*i].to_string()),
		_ => None
	}.unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn trims() {
		let path = "/usr/local/lib/libfoo.so.1";
		assert_eq!(trim(path, "*/", ParamOp::TrimPrefix), "usr/local/lib/libfoo.so.1");
		assert_eq!(trim(path, "*/", ParamOp::TrimPrefixLong), "libfoo.so.1");
		assert_eq!(trim(path, ".*", ParamOp::TrimSuffix), "/usr/local/lib/libfoo.so");
		assert_eq!(trim(path, ".*", ParamOp::TrimSuffixLong), "/usr/local/lib/libfoo");
		assert_eq!(trim("abc", "x", ParamOp::TrimSuffix), "abc");
		assert_eq!(trim("héllo", "h?", ParamOp::TrimPrefix), "llo");
	}

	#[test]
	fn special_parameters() {
		let mut rash = Rash::new();
		rash.vars_mut().set_params(vec!["one".into(), "two".into()]);
		rash.set_code(3);
		assert_eq!(lookup(&rash, "#").as_deref(), Some("2"));
		assert_eq!(lookup(&rash, "?").as_deref(), Some("3"));
		assert_eq!(lookup(&rash, "2").as_deref(), Some("two"));
		assert_eq!(lookup(&rash, "3"), None);
		assert_eq!(lookup(&rash, "!"), None);
	}
}

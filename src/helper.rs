use once_cell::sync::Lazy;
use regex::Regex;

use crate::prelude::*;

pub static REGEX: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
	let mut regex = HashMap::new();
	regex.insert("name", Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
	regex.insert("assignment", Regex::new(r"^(?P<name>[A-Za-z_][A-Za-z0-9_]*)=").unwrap());
	regex.insert("number", Regex::new(r"^[+-]?[0-9]+$").unwrap());
	regex.insert("digits", Regex::new(r"^[0-9]+$").unwrap());
	regex.insert("job_spec", Regex::new(r"^%(?P<spec>[%+-]|[0-9]+|\??.+)?$").unwrap());
	regex.insert("octal", Regex::new(r"^[0-7]{1,4}$").unwrap());
	regex
});

pub trait StrExtension {
	/// A valid shell variable name
	fn is_valid_name(&self) -> bool;
	/// Optional sign followed by decimal digits
	fn is_number(&self) -> bool;
	fn is_digits(&self) -> bool;
	/// Split `name=value` when the left side is a valid name
	fn split_assignment(&self) -> Option<(&str,&str)>;
	/// Quote a string so that the shell reads it back verbatim
	fn sh_quote(&self) -> String;
}

impl StrExtension for str {
	fn is_valid_name(&self) -> bool {
		REGEX["name"].is_match(self)
	}

	fn is_number(&self) -> bool {
		REGEX["number"].is_match(self)
	}

	fn is_digits(&self) -> bool {
		REGEX["digits"].is_match(self)
	}

	fn split_assignment(&self) -> Option<(&str,&str)> {
		let caps = REGEX["assignment"].captures(self)?;
		let name = caps.name("name")?;
		Some((name.as_str(), &self[name.end() + 1..]))
	}

	fn sh_quote(&self) -> String {
		let safe = !self.is_empty() && self.chars().all(|ch| ch.is_ascii_alphanumeric() || "_-./:,=+@%".contains(ch));
		if safe {
			return self.to_string()
		}
		let mut quoted = String::from("'");
		for ch in self.chars() {
			if ch == '\'' {
				quoted.push_str("'\\''");
			} else {
				quoted.push(ch);
			}
		}
		quoted.push('\'');
		quoted
	}
}

/// Parse a numeric argument the way builtins like `exit`, `shift` and `return` expect
pub fn parse_count(arg: &str) -> Option<i64> {
	if arg.is_number() {
		arg.parse::<i64>().ok()
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_and_assignments() {
		assert!("_foo1".is_valid_name());
		assert!(!"1foo".is_valid_name());
		assert_eq!("a=b=c".split_assignment(), Some(("a","b=c")));
		assert_eq!("a=".split_assignment(), Some(("a","")));
		assert_eq!("-a=b".split_assignment(), None);
	}

	#[test]
	fn quoting_survives_reparse() {
		assert_eq!("plain".sh_quote(), "plain");
		assert_eq!("two words".sh_quote(), "'two words'");
		assert_eq!("it's".sh_quote(), "'it'\\''s'");
		assert_eq!("".sh_quote(), "''");
	}
}

use super::Piece;

/// One field after splitting, ready for pathname expansion
#[derive(Debug,Clone,PartialEq,Default)]
pub struct Field {
	/// The final text if no glob applies
	pub text: String,
	/// The same text with quoted glob characters escaped
	pub pattern: String,
	/// Contains an unquoted `*`, `?` or `[`
	pub has_magic: bool,
}

const MAGIC: [char;3] = ['*', '?', '['];

struct Splitter<'a> {
	ifs: &'a str,
	fields: Vec<Field>,
	current: Field,
	/// The current field has content, or a quoted part that makes it exist even when empty
	started: bool,
	/// The last field was ended by IFS whitespace, so a following
	/// non-whitespace separator belongs to the same delimiter
	just_finished_by_ws: bool,
}

impl<'a> Splitter<'a> {
	fn new(ifs: &'a str) -> Self {
		Self {
			ifs,
			fields: vec![],
			current: Field::default(),
			started: false,
			just_finished_by_ws: false
		}
	}

	fn finish(&mut self) {
		let field = std::mem::take(&mut self.current);
		self.fields.push(field);
		self.started = false;
	}

	fn push_char(&mut self, ch: char, quoted: bool) {
		self.current.text.push(ch);
		if quoted && (MAGIC.contains(&ch) || ch == ']') {
			self.current.pattern.push_str(&glob::Pattern::escape(&ch.to_string()));
		} else {
			self.current.pattern.push(ch);
			if !quoted && MAGIC.contains(&ch) {
				self.current.has_magic = true;
			}
		}
		self.started = true;
		self.just_finished_by_ws = false;
	}

	fn push_text(&mut self, text: &str, quoted: bool) {
		for ch in text.chars() {
			self.push_char(ch, quoted);
		}
		if quoted {
			self.started = true;
			self.just_finished_by_ws = false;
		}
	}

	fn split_text(&mut self, text: &str) {
		for ch in text.chars() {
			if !self.ifs.contains(ch) {
				self.push_char(ch, false);
			} else if ch.is_ascii_whitespace() {
				if self.started {
					self.finish();
					self.just_finished_by_ws = true;
				}
			} else if self.just_finished_by_ws {
				self.just_finished_by_ws = false;
			} else {
				self.finish();
			}
		}
	}
}

/// Split expanded pieces into fields on IFS. Only pieces that came from an unquoted
/// substitution are scanned for separators.
pub fn split_pieces(pieces: &[Piece], ifs: &str) -> Vec<Field> {
	let mut splitter = Splitter::new(ifs);
	for piece in pieces {
		match piece {
			Piece::Text { text, quoted: false, splittable: true } => splitter.split_text(text),
			Piece::Text { text, quoted, .. } => splitter.push_text(text, *quoted),
			Piece::FieldBreak => {
				if splitter.started {
					splitter.finish();
				}
				splitter.just_finished_by_ws = false;
			}
		}
	}
	if splitter.started {
		splitter.finish();
	}
	splitter.fields
}

#[cfg(test)]
mod tests {
	use super::*;

	fn split(text: &str, ifs: &str) -> Vec<String> {
		let pieces = vec![Piece::subst(text, false)];
		split_pieces(&pieces, ifs).into_iter().map(|field| field.text).collect()
	}

	#[test]
	fn whitespace_runs_collapse() {
		assert_eq!(split("  a \t b\n", " \t\n"), vec!["a", "b"]);
		assert!(split("   ", " \t\n").is_empty());
	}

	#[test]
	fn non_whitespace_separators_keep_empty_fields() {
		assert_eq!(split("a::b", ":"), vec!["a", "", "b"]);
		assert_eq!(split(":a", ":"), vec!["", "a"]);
		assert_eq!(split("a:", ":"), vec!["a"]);
	}

	#[test]
	fn mixed_separators() {
		assert_eq!(split("a : b", " :"), vec!["a", "b"]);
		assert_eq!(split("a: :b", " :"), vec!["a", "", "b"]);
		assert_eq!(split(" :b", " :"), vec!["", "b"]);
	}

	#[test]
	fn empty_ifs_never_splits() {
		assert_eq!(split("a b", ""), vec!["a b"]);
	}

	#[test]
	fn quoted_text_joins_and_escapes() {
		let pieces = vec![
			Piece::Text { text: "*".into(), quoted: true, splittable: false },
			Piece::Text { text: "x y?".into(), quoted: false, splittable: true },
		];
		let fields = split_pieces(&pieces, " ");
		assert_eq!(fields.len(), 2);
		assert_eq!(fields[0].text, "*x");
		assert_eq!(fields[0].pattern, "[*]x");
		assert!(!fields[0].has_magic);
		assert_eq!(fields[1].pattern, "y?");
		assert!(fields[1].has_magic);
	}
}

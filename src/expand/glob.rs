use std::fs;
use std::os::unix::ffi::OsStrExt;

use glob::{MatchOptions, Pattern};
use log::trace;

use crate::utils::{decode_bytes, to_path};

const PATH_OPTS: MatchOptions = MatchOptions {
	case_sensitive: true,
	require_literal_separator: true,
	require_literal_leading_dot: true
};

fn has_magic(component: &str) -> bool {
	component.contains(['*', '?', '['])
}

fn join(prefix: &str, name: &str) -> String {
	if prefix.is_empty() || prefix.ends_with('/') {
		format!("{prefix}{name}")
	} else {
		format!("{prefix}/{name}")
	}
}

/// Entries of the directory `prefix` names that match one path component.
/// Dotfiles only match a component that itself starts with `.`, and then
/// `.` and `..` are candidates too.
fn match_dir(prefix: &str, pattern: &Pattern, dotted: bool) -> Vec<String> {
	let dir = if prefix.is_empty() { to_path(".") } else { to_path(prefix) };
	let Ok(entries) = fs::read_dir(&dir) else {
		return vec![]
	};
	let mut names: Vec<String> = entries
		.filter_map(|entry| entry.ok())
		.map(|entry| decode_bytes(entry.file_name().as_bytes()))
		.collect();
	if dotted {
		names.push(".".into());
		names.push("..".into());
	}
	names.into_iter()
		.filter(|name| pattern.matches_with(name, PATH_OPTS))
		.map(|name| join(prefix, &name))
		.collect()
}

/// Pathname expansion. `None` when nothing matched or the pattern is malformed,
/// in which case the caller keeps the word as it was.
pub fn glob_field(pattern: &str) -> Option<Vec<String>> {
	let mut paths = vec![if pattern.starts_with('/') { "/".to_string() } else { String::new() }];
	let dirs_only = pattern.ends_with('/');
	let components: Vec<&str> = pattern.split('/').filter(|comp| !comp.is_empty()).collect();

	for comp in components {
		if !has_magic(comp) {
			for path in paths.iter_mut() {
				*path = join(path, comp);
			}
			continue
		}
		let pat = match Pattern::new(comp) {
			Ok(pat) => pat,
			Err(e) => {
				trace!("not a valid pattern, keeping it literal: {pattern}: {e}");
				return None
			}
		};
		let dotted = comp.starts_with('.');
		paths = paths.iter()
			.flat_map(|prefix| match_dir(prefix, &pat, dotted))
			.collect();
		if paths.is_empty() {
			return None
		}
	}

	// Literal components after the last pattern still have to exist
	let mut matches: Vec<String> = paths.into_iter()
		.filter(|path| fs::symlink_metadata(to_path(path)).is_ok())
		.filter(|path| !dirs_only || to_path(path).is_dir())
		.map(|path| if dirs_only { format!("{path}/") } else { path })
		.collect();
	if matches.is_empty() {
		return None
	}
	matches.sort();
	Some(matches)
}

/// `case` and parameter-trim matching. Neither `/` nor a leading `.` is special.
pub fn pattern_match(pattern: &str, text: &str) -> bool {
	let opts = MatchOptions {
		case_sensitive: true,
		require_literal_separator: false,
		require_literal_leading_dot: false
	};
	match Pattern::new(pattern) {
		Ok(pat) => pat.matches_with(text, opts),
		Err(_) => pattern == text
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_match_keeps_pattern() {
		let dir = tempfile::tempdir().unwrap();
		let pattern = format!("{}/*.nonexistent", dir.path().display());
		assert_eq!(glob_field(&pattern), None);
	}

	#[test]
	fn matches_are_sorted_and_skip_dotfiles() {
		let dir = tempfile::tempdir().unwrap();
		for name in ["b.txt", "a.txt", ".hidden.txt", "c.log"] {
			std::fs::write(dir.path().join(name), "").unwrap();
		}
		let base = dir.path().display().to_string();
		let found = glob_field(&format!("{base}/*.txt")).unwrap();
		assert_eq!(found, vec![format!("{base}/a.txt"), format!("{base}/b.txt")]);
		let dotted = glob_field(&format!("{base}/.*.txt")).unwrap();
		assert_eq!(dotted, vec![format!("{base}/.hidden.txt")]);
	}

	#[test]
	fn leading_dot_pattern_lists_dot_entries() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(".rc"), "").unwrap();
		std::fs::write(dir.path().join("plain"), "").unwrap();
		let base = dir.path().display().to_string();
		let found = glob_field(&format!("{base}/.*")).unwrap();
		assert_eq!(found, vec![format!("{base}/."), format!("{base}/.."), format!("{base}/.rc")]);
	}

	#[test]
	fn patterns_span_directories() {
		let dir = tempfile::tempdir().unwrap();
		for sub in ["one", "two", ".skip"] {
			std::fs::create_dir(dir.path().join(sub)).unwrap();
			std::fs::write(dir.path().join(sub).join("conf"), "").unwrap();
		}
		std::fs::write(dir.path().join("file"), "").unwrap();
		let base = dir.path().display().to_string();
		let found = glob_field(&format!("{base}/*/conf")).unwrap();
		assert_eq!(found, vec![format!("{base}/one/conf"), format!("{base}/two/conf")]);
		let dirs = glob_field(&format!("{base}/*/")).unwrap();
		assert_eq!(dirs, vec![format!("{base}/one/"), format!("{base}/two/")]);
		assert_eq!(glob_field(&format!("{base}/*/missing")), None);
	}

	#[test]
	fn malformed_bracket_is_literal() {
		assert_eq!(glob_field("["), None);
		assert!(pattern_match("[", "["));
	}

	#[test]
	fn case_patterns() {
		assert!(pattern_match("*.rs", "src/main.rs"));
		assert!(pattern_match(".*", ".profile"));
		assert!(pattern_match("[!a]?", "bc"));
		assert!(!pattern_match("[!a]?", "ac"));
		assert!(pattern_match("[*]", "*"));
	}
}

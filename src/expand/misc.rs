use nix::unistd::{gethostname, User};

use crate::prelude::*;

/// `~` or `~user`. `None` when the user is unknown, which leaves the text alone.
pub fn expand_tilde(rash: &Rash, user: &str) -> Option<String> {
	if user.is_empty() {
		return match rash.get_var("HOME") {
			Some(home) => Some(home.to_string()),
			None => User::from_uid(nix::unistd::getuid()).ok().flatten().map(|u| crate::utils::decode_os(u.dir.as_os_str()))
		}
	}
	if !user.chars().all(|ch| ch.is_ascii_alphanumeric() || "._-".contains(ch)) {
		return None
	}
	User::from_name(user).ok().flatten().map(|u| crate::utils::decode_os(u.dir.as_os_str()))
}

/// Tilde expansion inside an assignment value, at the start and after each `:`.
/// `at_start` says whether `text` begins a segment; `last` whether nothing follows it in the word.
pub fn assignment_tildes(rash: &Rash, text: &str, at_start: bool, last: bool) -> String {
	let mut result = String::new();
	let segments: Vec<&str> = text.split(':').collect();
	let count = segments.len();
	for (i, segment) in segments.into_iter().enumerate() {
		if i > 0 {
			result.push(':');
		}
		let eligible = (i > 0 || at_start) && segment.starts_with('~');
		if !eligible {
			result.push_str(segment);
			continue
		}
		let end = segment.find('/').unwrap_or(segment.len());
		// A prefix running into a quoted part is not a tilde prefix
		if end == segment.len() && i + 1 == count && !last {
			result.push_str(segment);
			continue
		}
		match expand_tilde(rash, &segment[1..end]) {
			Some(home) => {
				result.push_str(&home);
				result.push_str(&segment[end..]);
			}
			None => result.push_str(segment)
		}
	}
	result
}

pub fn expand_time(fmt: &str) -> String {
	chrono::Local::now().format(fmt).to_string()
}

/// Replace `$HOME` at the front of a path with `~`
fn abbreviate_home(rash: &Rash, path: &str) -> String {
	match rash.get_var("HOME") {
		Some(home) if !home.is_empty() && home != "/" && path.starts_with(home) => {
			let rest = &path[home.len()..];
			if rest.is_empty() || rest.starts_with('/') {
				format!("~{rest}")
			} else {
				path.to_string()
			}
		}
		_ => path.to_string()
	}
}

/// Expand the backslash escapes of a prompt string
pub fn expand_prompt(rash: &Rash, raw: &str) -> String {
	let mut result = String::new();
	let mut chars = raw.chars().peekable();
	while let Some(ch) = chars.next() {
		if ch != '\\' {
			result.push(ch);
			continue
		}
		let Some(esc) = chars.next() else {
			result.push('\\');
			break
		};
		match esc {
			'u' => {
				let user = rash.get_var("USER").map(|s| s.to_string()).or_else(|| {
					User::from_uid(nix::unistd::getuid()).ok().flatten().map(|u| u.name)
				});
				result.push_str(&user.unwrap_or_default());
			}
			'h' | 'H' => {
				let host = gethostname().map(|h| h.to_string_lossy().into_owned()).unwrap_or_default();
				if esc == 'h' {
					result.push_str(host.split('.').next().unwrap_or_default());
				} else {
					result.push_str(&host);
				}
			}
			'w' | 'W' => {
				let pwd = rash.get_var("PWD").unwrap_or_default().to_string();
				let pwd = abbreviate_home(rash, &pwd);
				if esc == 'w' || pwd == "/" || pwd == "~" {
					result.push_str(&pwd);
				} else {
					result.push_str(pwd.rsplit('/').next().unwrap_or_default());
				}
			}
			'$' => result.push(if nix::unistd::geteuid().is_root() { '#' } else { '$' }),
			'n' => result.push('\n'),
			'r' => result.push('\r'),
			'a' => result.push('\x07'),
			'e' => result.push('\x1b'),
			't' => result.push_str(&expand_time("%H:%M:%S")),
			'T' => result.push_str(&expand_time("%I:%M:%S")),
			'A' => result.push_str(&expand_time("%H:%M")),
			'@' => result.push_str(&expand_time("%I:%M %p")),
			'd' => result.push_str(&expand_time("%a %b %d")),
			's' => result.push_str(rash.shell_name().rsplit('/').next().unwrap_or_default()),
			// Non-printing sequence markers mean nothing without a line editor that counts columns
			'[' | ']' => {}
			'\\' => result.push('\\'),
			'0'..='7' => {
				let mut digits = esc.to_string();
				while digits.len() < 3 {
					match chars.peek() {
						Some(next @ '0'..='7') => {
							digits.push(*next);
							chars.next();
						}
						_ => break
					}
				}
				match u8::from_str_radix(&digits, 8) {
					Ok(byte) => result.push(byte as char),
					Err(_) => result.push_str(&digits)
				}
			}
			other => {
				result.push('\\');
				result.push(other);
			}
		}
	}
	result
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_user_is_left_alone() {
		let rash = Rash::new();
		assert_eq!(expand_tilde(&rash, "no_such_user_here_42"), None);
		assert_eq!(assignment_tildes(&rash, "~no_such_user_here_42/x", true, true), "~no_such_user_here_42/x");
	}

	#[test]
	fn prompt_escapes() {
		let mut rash = Rash::new();
		rash.set_var("HOME", "/home/me").unwrap();
		rash.set_var("PWD", "/home/me/src/rash").unwrap();
		assert_eq!(expand_prompt(&rash, "\\w> "), "~/src/rash> ");
		assert_eq!(expand_prompt(&rash, "\\W\\\\"), "rash\\");
		assert_eq!(expand_prompt(&rash, "a\\101b"), "aAb");
		assert_eq!(expand_prompt(&rash, "\\[x\\]"), "x");
	}
}

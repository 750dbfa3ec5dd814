use std::cell::RefCell;

use log::{debug, warn};
use rustyline::{error::ReadlineError, Config, DefaultEditor, EditMode};

use crate::interp::token::{FdSource, LineSource};
use crate::utils::write_err;
use crate::prelude::*;

const MAX_HISTORY: usize = 1000;

thread_local! {
	// One editor for the life of the interactive shell. `exit` and `exec` reach
	// it from outside the lexer to write the history file.
	static EDITOR: RefCell<Option<DefaultEditor>> = const { RefCell::new(None) };
}

/// `$HISTFILE`, or `~/.rash_history`
fn history_path(rash: &Rash) -> Option<PathBuf> {
	if let Some(file) = rash.get_var("HISTFILE").filter(|file| !file.is_empty()) {
		return Some(PathBuf::from(file))
	}
	rash.get_var("HOME")
		.filter(|home| !home.is_empty())
		.map(|home| Path::new(home).join(".rash_history"))
}

fn build_editor(history: Option<&Path>) -> rustyline::Result<DefaultEditor> {
	let config = Config::builder()
		.max_history_size(MAX_HISTORY)?
		.history_ignore_dups(true)?
		.history_ignore_space(true)
		.edit_mode(EditMode::Emacs)
		.auto_add_history(false)
		.build();
	let mut editor = DefaultEditor::with_config(config)?;
	if let Some(path) = history {
		if let Err(e) = editor.load_history(path) {
			debug!("no history loaded from {}: {e}", path.display());
		}
	}
	Ok(editor)
}

/// Input for an interactive shell
pub enum PromptSource {
	Editor,
	/// Standard input is not a terminal. Prompts still go to stderr.
	Plain(FdSource)
}

impl PromptSource {
	pub fn new(rash: &Rash) -> Self {
		let stdin_tty = unsafe { libc::isatty(STDIN_FILENO) == 1 };
		if stdin_tty {
			match build_editor(history_path(rash).as_deref()) {
				Ok(editor) => {
					EDITOR.with(|cell| *cell.borrow_mut() = Some(editor));
					return Self::Editor
				}
				Err(e) => warn!("line editor unavailable: {e}")
			}
		}
		Self::Plain(FdSource::new(unsafe { RustFd::from_raw_fd(STDIN_FILENO) }))
	}
}

fn read_edited(prompt: &str) -> Result<String, ReadlineError> {
	EDITOR.with(|cell| {
		let mut slot = cell.borrow_mut();
		let Some(editor) = slot.as_mut() else {
			return Err(ReadlineError::Eof)
		};
		let line = editor.readline(prompt)?;
		if !line.trim().is_empty() {
			editor.add_history_entry(line.as_str())?;
		}
		Ok(line)
	})
}

impl LineSource for PromptSource {
	fn next_line(&mut self, prompt: &str) -> RashResult<Option<String>> {
		match self {
			PromptSource::Plain(source) => {
				write_err(prompt)?;
				source.next_line(prompt)
			}
			PromptSource::Editor => match read_edited(prompt) {
				Ok(mut line) => {
					line.push('\n');
					Ok(Some(line))
				}
				Err(ReadlineError::Interrupted) => Err(Low(RashErrLow::Interrupted)),
				Err(ReadlineError::Eof) => Ok(None),
				Err(e) => Err(RashErr::internal(format!("line editor: {e}")))
			}
		}
	}
}

/// Write the line editor's history out. Only the interactive top level shell keeps one.
pub fn save_history(rash: &Rash) {
	if rash.meta().is_subshell() || !rash.meta().is_interactive() {
		return
	}
	let Some(path) = history_path(rash) else {
		return
	};
	EDITOR.with(|cell| {
		if let Some(editor) = cell.borrow_mut().as_mut() {
			if let Err(e) = editor.save_history(&path) {
				warn!("failed to save history to {}: {e}", path.display());
			}
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn history_location() {
		let mut rash = Rash::new();
		rash.set_var("HOME", "/home/someone").unwrap();
		rash.unset_var("HISTFILE").unwrap();
		assert_eq!(history_path(&rash), Some(PathBuf::from("/home/someone/.rash_history")));
		rash.set_var("HISTFILE", "/tmp/hist").unwrap();
		assert_eq!(history_path(&rash), Some(PathBuf::from("/tmp/hist")));
	}
}

use log::{debug, info, trace};

use crate::error::ErrClass;
use crate::execute::{eval_node, ExecFlags};
use crate::expand::misc::expand_prompt;
use crate::interp::parse::{ParseResult, Parser};
use crate::interp::token::{FdSource, Lexer};
use crate::prompt::PromptSource;
use crate::shellenv::jobs::{JobCmdFlags, JobID, JobState};
use crate::shopt::ShOpts;
use crate::signal::run_pending_traps;
use crate::utils::write_err;
use crate::prelude::*;

/// Where the shell reads its commands from
pub enum InputMode {
	/// `-c string`
	Command(String),
	/// A script file
	Script(RustFd),
	/// Standard input. Interactive shells read it through the line editor.
	Stdin,
}

/// Tell the user about jobs that finished or stopped in the background
fn notify_jobs(rash: &mut Rash) -> RashResult<()> {
	let mut out = String::new();
	for id in rash.jobs_mut().take_changed() {
		let marker = rash.jobs().marker(id);
		if let Some(job) = rash.jobs().query(JobID::TableID(id)) {
			if job.state() == JobState::Stopped {
				out.push_str(&format!("{}\n", job.display(marker, JobCmdFlags::empty())));
			}
		}
	}
	for (job, marker) in rash.jobs_mut().take_done() {
		out.push_str(&format!("{}\n", job.display(marker, JobCmdFlags::empty())));
	}
	write_err(&out)?;
	Ok(())
}

/// Scripts only keep the job behind `$!`, so `wait $!` still finds its status
fn forget_done_jobs(rash: &mut Rash) {
	let last_bg = rash.meta().last_bg;
	let done: Vec<usize> = rash.jobs().jobs()
		.filter(|job| job.state() == JobState::Done)
		.filter(|job| !last_bg.is_some_and(|pid| job.get_children().iter().any(|child| child.pid() == pid)))
		.filter_map(|job| job.table_id())
		.collect();
	for id in done {
		trace!("forgetting finished job {id}");
		rash.jobs_mut().remove_job(id);
	}
}

/// The safe point at the top of the command loop
fn checkpoint(rash: &mut Rash) -> RashResult<()> {
	let untraced = rash.meta().has_opt(ShOpts::MONITOR);
	if let Err(e) = rash.jobs_mut().reap(untraced) {
		debug!("reaping jobs failed: {e}");
	}
	if rash.meta().is_interactive() {
		notify_jobs(rash)?;
	} else {
		forget_done_jobs(rash);
	}
	run_pending_traps(rash)
}

/// What the command loop does after a statement fails.
/// `Ok` means carry on with the next statement.
fn handle_err(rash: &mut Rash, err: RashErr, top: bool) -> RashResult<()> {
	match err.class() {
		ErrClass::ControlFlow => {
			if top && matches!(err.low(), RashErrLow::Interrupted) {
				rash.set_code(130);
				return Ok(())
			}
			Err(err)
		}
		ErrClass::Syntax => {
			rash.report_err(&err);
			rash.set_code(2);
			if !rash.meta().is_interactive() {
				return Err(Low(RashErrLow::CleanExit(2)))
			}
			Ok(())
		}
		ErrClass::Fatal => {
			rash.report_err(&err);
			Err(Low(RashErrLow::CleanExit(err.status())))
		}
		ErrClass::Expansion | ErrClass::Execution => {
			rash.report_err(&err);
			rash.set_code(err.status());
			Ok(())
		}
	}
}

fn refresh_lexer(rash: &Rash, lexer: &mut Lexer, top: bool) {
	lexer.set_aliases(rash.logic().aliases().clone());
	lexer.set_verbose(rash.meta().has_opt(ShOpts::VERBOSE));
	if top && rash.meta().is_interactive() {
		let ps1 = expand_prompt(rash, rash.get_var("PS1").unwrap_or_default());
		let ps2 = rash.get_var("PS2").unwrap_or_default().to_string();
		lexer.set_prompts(ps1, ps2);
	}
}

/// Parse and run one statement at a time until the input runs out.
/// `top` is the main command loop, which owns job notification and the prompt.
pub fn run_source(rash: &mut Rash, lexer: &mut Lexer, top: bool) -> RashResult<()> {
	loop {
		if top {
			checkpoint(rash)?;
		}
		refresh_lexer(rash, lexer, top);

		let parsed = Parser::new(lexer).parse_cmd();
		let node = match parsed {
			Ok(ParseResult::Eof) => break,
			Ok(ParseResult::Empty) => continue,
			Ok(ParseResult::Cmd(node)) => node,
			Err(e) => {
				lexer.discard_line();
				handle_err(rash, e, top)?;
				if !top {
					return Ok(())
				}
				continue
			}
		};

		if rash.meta().has_opt(ShOpts::NOEXEC) && !rash.meta().is_interactive() {
			continue
		}
		if let Err(e) = eval_node(rash, &node, ExecFlags::empty()) {
			handle_err(rash, e, top)?;
		}
	}
	Ok(())
}

/// Run a string as shell source in the current shell: `eval`, `.`, traps and `-c`.
/// Control flow (`exit`, `return`, `break`) is handed back to the caller.
pub fn eval_string(rash: &mut Rash, src: &str) -> RashResult<()> {
	let saved_line = rash.meta().cur_line;
	let mut lexer = Lexer::from_str(src, 1, rash.logic().aliases().clone());
	let result = run_source(rash, &mut lexer, false);
	rash.meta_mut().cur_line = saved_line;
	result
}

impl Rash {
	/// The main command loop. Never returns: the shell exits when input ends.
	pub fn run(&mut self, mode: InputMode) -> ! {
		let result = match mode {
			InputMode::Command(text) => {
				info!("running command string");
				let mut lexer = Lexer::from_str(&text, 1, self.logic().aliases().clone());
				run_source(self, &mut lexer, true)
			}
			InputMode::Script(fd) => {
				info!("running script from fd {}", fd.as_raw_fd());
				let mut lexer = Lexer::new(Box::new(FdSource::new(fd)));
				run_source(self, &mut lexer, true)
			}
			InputMode::Stdin => {
				let mut lexer = if self.meta().is_interactive() {
					Lexer::new(Box::new(PromptSource::new(self)))
				} else {
					Lexer::new(Box::new(FdSource::new(unsafe { RustFd::from_raw_fd(STDIN_FILENO) })))
				};
				run_source(self, &mut lexer, true)
			}
		};

		let code = match result {
			Ok(()) => self.get_status(),
			Err(e) => match e.low() {
				RashErrLow::CleanExit(code) | RashErrLow::FuncReturn(code) => *code,
				_ if e.is_control_flow() => self.get_status(),
				_ => {
					self.report_err(&e);
					e.status()
				}
			}
		};
		self.exit_shell(code)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn statements_run_in_order() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "a=1\nb=$a$a\nc=${b}x").unwrap();
		assert_eq!(rash.get_var("c"), Some("11x"));
	}

	#[test]
	fn syntax_error_ends_scripts() {
		let mut rash = Rash::new();
		let result = eval_string(&mut rash, "a=1\nif then\nb=2");
		assert!(matches!(result.map_err(|e| e.into_low()), Err(RashErrLow::CleanExit(2))));
		assert_eq!(rash.get_var("a"), Some("1"));
		assert_eq!(rash.get_var("b"), None);
	}

	#[test]
	fn interactive_syntax_error_sets_status() {
		let mut rash = Rash::new();
		rash.meta_mut().opts |= ShOpts::INTERACTIVE;
		eval_string(&mut rash, "fi").unwrap();
		assert_eq!(rash.get_status(), 2);
	}

	#[test]
	fn expansion_error_abandons_statement() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "x=${unset_here?gone} y=1\nz=2").unwrap();
		assert_eq!(rash.get_var("y"), None);
		assert_eq!(rash.get_var("z"), Some("2"));
	}

	#[test]
	fn noexec_only_parses() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "set -n\nran=yes").unwrap();
		assert_eq!(rash.get_var("ran"), None);
	}
}

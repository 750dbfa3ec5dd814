use log::{debug, info, warn};
use nix::unistd::{getpgrp, getpid, getppid, setpgid};

use crate::execute::redir::RedirStack;
use crate::shopt::ShOpts;
use crate::signal::{ShellSigMode, TrapTable};
use crate::prelude::*;

pub mod vars;
pub mod logic;
pub mod jobs;

use vars::{VarFlags, VarTable};
use logic::LogicTable;
use jobs::JobTable;

/// Everything about the running shell that isn't a variable, a function or a job
#[derive(Debug)]
pub struct ShellMeta {
	pub opts: ShOpts,
	pub traps: TrapTable,
	/// `$0`
	pub shell_name: String,
	/// `$$`. Subshells keep the parent's value.
	pub shell_pid: Pid,
	pub shell_pgid: Pid,
	/// The controlling terminal, when job control is on
	pub tty_fd: Option<RawFd>,
	/// `$!`
	pub last_bg: Option<Pid>,
	pub loop_depth: usize,
	pub func_depth: usize,
	pub dot_depth: usize,
	/// Line of the command currently running, for error messages
	pub cur_line: usize,
	/// Status of the last command substitution in the current simple command
	pub cmdsub_status: Option<i32>,
	last_status: i32,
	in_trap: bool,
	subshell: bool,
	login: bool,
	exiting: bool,
}

impl ShellMeta {
	fn new() -> Self {
		let pid = getpid();
		Self {
			opts: ShOpts::empty(),
			traps: TrapTable::new(),
			shell_name: "rash".into(),
			shell_pid: pid,
			shell_pgid: getpgrp(),
			tty_fd: None,
			last_bg: None,
			loop_depth: 0,
			func_depth: 0,
			dot_depth: 0,
			cur_line: 0,
			cmdsub_status: None,
			last_status: 0,
			in_trap: false,
			subshell: false,
			login: false,
			exiting: false,
		}
	}

	pub fn is_interactive(&self) -> bool {
		self.opts.contains(ShOpts::INTERACTIVE)
	}

	pub fn has_opt(&self, opt: ShOpts) -> bool {
		self.opts.contains(opt)
	}

	pub fn in_trap(&self) -> bool {
		self.in_trap
	}

	pub fn set_in_trap(&mut self, in_trap: bool) {
		self.in_trap = in_trap
	}

	pub fn is_subshell(&self) -> bool {
		self.subshell
	}

	pub fn is_login(&self) -> bool {
		self.login
	}

	pub fn set_login(&mut self, login: bool) {
		self.login = login
	}

	pub fn sig_mode(&self) -> ShellSigMode {
		ShellSigMode {
			interactive: self.is_interactive(),
			monitor: self.has_opt(ShOpts::MONITOR)
		}
	}
}

/// Per-execution state that nests as commands nest
#[derive(Debug,Default)]
pub struct ExecCtx {
	redirs: RedirStack
}

impl ExecCtx {
	pub fn redirs(&self) -> &RedirStack {
		&self.redirs
	}
	pub fn redirs_mut(&mut self) -> &mut RedirStack {
		&mut self.redirs
	}
}

#[derive(Debug)]
pub struct Rash {
	vars: VarTable,
	logic: LogicTable,
	jobs: JobTable,
	meta: ShellMeta,
	ctx: ExecCtx
}

impl Default for Rash {
	fn default() -> Self {
		Self::new()
	}
}

impl Rash {
	pub fn new() -> Self {
		let mut rash = Self {
			vars: VarTable::from_env(),
			logic: LogicTable::new(),
			jobs: JobTable::new(),
			meta: ShellMeta::new(),
			ctx: ExecCtx::default()
		};
		rash.init_vars();
		rash
	}

	fn init_vars(&mut self) {
		let root = nix::unistd::geteuid().is_root();
		let defaults = [
			("IFS", " \t\n".to_string()),
			("PS1", if root { "# ".to_string() } else { "$ ".to_string() }),
			("PS2", "> ".to_string()),
			("PS4", "+ ".to_string()),
			("OPTIND", "1".to_string()),
		];
		for (name, value) in defaults {
			// IFS and the prompts are never taken from the environment
			let inherited = self.vars.get_var(name).is_some() && !matches!(name, "IFS" | "PS1" | "PS2" | "PS4");
			if !inherited {
				let _ = self.vars.set_var(name, &value);
			}
		}
		if self.vars.get_var("PATH").is_none() {
			let _ = self.vars.set_var("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin");
		}
		let _ = self.vars.set_var("PPID", &getppid().to_string());

		// Keep an inherited PWD only when it really names the current directory
		let cwd = env::current_dir().ok();
		let pwd_ok = match (self.vars.get_var("PWD"), &cwd) {
			(Some(pwd), Some(cwd)) => pwd.starts_with('/') && crate::utils::to_path(pwd).canonicalize().ok().as_ref() == Some(cwd),
			_ => false
		};
		if !pwd_ok {
			if let Some(cwd) = cwd {
				let _ = self.vars.export_var("PWD", &crate::utils::decode_os(cwd.as_os_str()));
			}
		}
	}

	pub fn vars(&self) -> &VarTable {
		&self.vars
	}
	pub fn vars_mut(&mut self) -> &mut VarTable {
		&mut self.vars
	}
	pub fn logic(&self) -> &LogicTable {
		&self.logic
	}
	pub fn logic_mut(&mut self) -> &mut LogicTable {
		&mut self.logic
	}
	pub fn jobs(&self) -> &JobTable {
		&self.jobs
	}
	pub fn jobs_mut(&mut self) -> &mut JobTable {
		&mut self.jobs
	}
	pub fn meta(&self) -> &ShellMeta {
		&self.meta
	}
	pub fn meta_mut(&mut self) -> &mut ShellMeta {
		&mut self.meta
	}
	pub fn ctx(&self) -> &ExecCtx {
		&self.ctx
	}
	pub fn ctx_mut(&mut self) -> &mut ExecCtx {
		&mut self.ctx
	}

	pub fn get_status(&self) -> i32 {
		self.meta.last_status
	}

	pub fn set_code(&mut self, code: i32) {
		self.meta.last_status = code;
	}

	pub fn get_var(&self, name: &str) -> Option<&str> {
		self.vars.get_var(name)
	}

	/// Assignment as the language sees it: honors `allexport` and drops the
	/// command hash whenever PATH changes
	pub fn set_var(&mut self, name: &str, value: &str) -> RashResult<()> {
		let flags = if self.meta.has_opt(ShOpts::ALLEXPORT) { VarFlags::EXPORT } else { VarFlags::empty() };
		self.vars.set_var_flags(name, Some(value), flags)?;
		if name == "PATH" {
			debug!("PATH changed, clearing command hash");
			self.logic.clear_hash();
		}
		Ok(())
	}

	pub fn unset_var(&mut self, name: &str) -> RashResult<()> {
		self.vars.unset_var(name)?;
		if name == "PATH" {
			self.logic.clear_hash();
		}
		Ok(())
	}

	pub fn shell_name(&self) -> &str {
		&self.meta.shell_name
	}

	/// `name: line`, the front of every diagnostic
	pub fn blame(&self) -> String {
		format!("{}: {}", self.meta.shell_name, self.meta.cur_line)
	}

	/// Print a diagnostic the way every shell error is printed: `name: line: message`
	pub fn report(&self, msg: &str) {
		let _ = crate::utils::write_err(&format!("{}: {msg}\n", self.blame()));
	}

	pub fn report_err(&self, err: &RashErr) {
		if err.is_control_flow() {
			return
		}
		let line = err.line().unwrap_or(self.meta.cur_line);
		let name = &self.meta.shell_name;
		let _ = crate::utils::write_err(&format!("{name}: {line}: {}\n", err.low()));
	}

	/// Run the EXIT trap, if any, and leave. Forked children leave without
	/// running anything std would run at exit.
	pub fn exit_shell(&mut self, code: i32) -> ! {
		if !self.meta.exiting {
			self.meta.exiting = true;
			if let Some(cmd) = self.meta.traps.take_exit_trap() {
				debug!("running exit trap");
				self.set_code(code);
				match crate::interpret::eval_string(self, &cmd) {
					Err(e) if !e.is_control_flow() => self.report_err(&e),
					_ => {}
				}
			}
		}
		if self.meta.subshell {
			unsafe { libc::_exit(code) }
		}
		crate::prompt::save_history(self);
		std::process::exit(code)
	}

	/// Turn a freshly forked copy of the shell into a subshell environment
	pub fn enter_subshell(&mut self) {
		self.meta.subshell = true;
		self.meta.traps.reset_for_subshell();
		self.meta.opts.remove(ShOpts::MONITOR | ShOpts::INTERACTIVE);
		self.meta.tty_fd = None;
		self.meta.exiting = false;
		self.jobs.clear();
	}

	/// End a forked child with the outcome of whatever it ran
	pub fn exit_child(&mut self, result: RashResult<()>) -> ! {
		let code = match result {
			Ok(()) => self.get_status(),
			Err(e) => match e.low() {
				RashErrLow::CleanExit(code) => *code,
				_ if e.is_control_flow() => self.get_status(),
				_ => {
					self.report_err(&e);
					e.status()
				}
			}
		};
		self.exit_shell(code)
	}

	/// Take the terminal and put the shell in its own process group
	pub fn setup_job_control(&mut self) {
		let tty = match RustFd::dup_high(STDERR_FILENO, 10) {
			Ok(fd) if fd.is_tty() => fd,
			_ => {
				warn!("no terminal, job control disabled");
				self.meta.opts.remove(ShOpts::MONITOR);
				return
			}
		};
		let tty_fd = tty.into_raw_fd();
		loop {
			let fg = unsafe { libc::tcgetpgrp(tty_fd) };
			if fg == -1 || fg == getpgrp().as_raw() {
				break
			}
			// Wait until the shell is in the foreground before taking over
			let _ = nix::sys::signal::killpg(getpgrp(), Signal::SIGTTIN);
		}
		let pid = getpid();
		if let Err(e) = setpgid(pid, pid) {
			info!("setpgid failed: {e}");
		}
		unsafe { libc::tcsetpgrp(tty_fd, pid.as_raw()) };
		self.meta.shell_pgid = pid;
		self.meta.tty_fd = Some(tty_fd);
	}

	/// Give the terminal to a process group, if the shell owns one
	pub fn give_terminal(&self, pgid: Pid) {
		if let Some(tty) = self.meta.tty_fd {
			unsafe { libc::tcsetpgrp(tty, pgid.as_raw()) };
		}
	}

	pub fn reclaim_terminal(&self) {
		self.give_terminal(self.meta.shell_pgid);
	}

	/// Install signal dispositions to match the current options
	pub fn refresh_signals(&self) {
		self.meta.traps.setup_shell(self.meta.sig_mode());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allexport_exports_assignments() {
		let mut rash = Rash::new();
		rash.meta_mut().opts |= ShOpts::ALLEXPORT;
		rash.set_var("RASH_TEST_VAR", "1").unwrap();
		assert!(rash.vars().get("RASH_TEST_VAR").unwrap().is_exported());
	}

	#[test]
	fn path_change_clears_hash() {
		let mut rash = Rash::new();
		rash.logic_mut().hash_cmd("ls", PathBuf::from("/bin/ls"));
		rash.set_var("PATH", "/usr/bin").unwrap();
		assert!(rash.logic().get_hashed("ls").is_none());
	}

	#[test]
	fn defaults_are_present() {
		let rash = Rash::new();
		assert_eq!(rash.get_var("IFS"), Some(" \t\n"));
		assert_eq!(rash.get_var("PS2"), Some("> "));
		assert!(rash.get_var("PPID").is_some());
	}
}

use log::{debug, trace};
use nix::unistd::{getpid, setpgid};

use crate::shellenv::jobs::{ChildProc, Job, JobBuilder};
use crate::shopt::ShOpts;
use crate::prelude::*;

pub mod command;
pub mod dispatch;
pub mod func;
pub mod pipeline;
pub mod redir;
pub mod subshell;

pub use dispatch::eval_node;

bitflags! {
	#[derive(Debug,Clone,Copy,PartialEq,Eq)]
	pub struct ExecFlags: u8 {
		/// Nothing runs after this node in the current process, so an external command can replace it
		const EXIT          = 0b001;
		/// Exit status is being tested, so `set -e` does not apply
		const TESTED        = 0b010;
		/// Asynchronous command in a shell without job control
		const BG_NO_MONITOR = 0b100;
	}
}

/// Put a freshly forked child in the right process group, hand it the terminal
/// if it runs in the foreground, and reset the shell state it inherited
pub(crate) fn prepare_child(rash: &mut Rash, pgid: Option<Pid>, background: bool) {
	let monitor = rash.meta().has_opt(ShOpts::MONITOR);
	if monitor {
		let pid = getpid();
		let group = pgid.unwrap_or(pid);
		let _ = setpgid(pid, group);
		if !background {
			// Done before the default SIGTTOU disposition comes back
			rash.give_terminal(group);
		}
	}
	let flags = if background && !monitor { ExecFlags::BG_NO_MONITOR } else { ExecFlags::empty() };
	rash.enter_subshell();
	rash.meta().traps.setup_child(flags);
	if flags.contains(ExecFlags::BG_NO_MONITOR) {
		if let Ok(mut null) = RustFd::open("/dev/null", O_RDONLY, 0) {
			let _ = null.dup2(&STDIN_FILENO);
			let _ = null.close();
		}
	}
}

/// Fork one child to run `f`. The child never returns from here.
pub(crate) fn fork_single<F>(rash: &mut Rash, text: &str, background: bool, f: F) -> RashResult<Job>
where
	F: FnOnce(&mut Rash) -> RashResult<()>
{
	let monitor = rash.meta().has_opt(ShOpts::MONITOR);
	match unsafe { fork() } {
		Ok(ForkResult::Child) => {
			prepare_child(rash, None, background);
			let result = f(rash);
			rash.exit_child(result)
		}
		Ok(ForkResult::Parent { child }) => {
			trace!("forked {child} for {text}");
			if monitor {
				let _ = setpgid(child, child);
			}
			Ok(JobBuilder::new()
				.with_pgid(child, monitor)
				.with_children(vec![ChildProc::new(child, text)])
				.with_cmd(text)
				.build())
		}
		Err(e) => {
			debug!("fork failed: {e}");
			Err(RashErr::exec(format!("cannot fork: {}", e.desc())))
		}
	}
}
